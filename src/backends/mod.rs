// SPDX-License-Identifier: MPL-2.0

//! Hardware capability abstraction
//!
//! The session coordinator never touches sensors directly. Everything it needs
//! from the platform goes through [`CaptureHardware`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │      SessionHandle       │  ← commands + observable state
//! └────────────┬─────────────┘
//!              │
//!              ▼
//! ┌──────────────────────────┐
//! │ CaptureSessionCoordinator│  ← serialization point
//! └────────────┬─────────────┘
//!              │
//!              ▼
//! ┌──────────────────────────┐
//! │  CaptureHardware trait   │  ← common interface
//! └────────────┬─────────────┘
//!              │
//!        ┌─────┴──────┐
//!        ▼            ▼
//!    ┌──────┐   ┌───────────┐
//!    │ V4L2 │   │ Simulated │
//!    └──────┘   └───────────┘
//! ```

pub mod simulated;
pub mod types;
#[cfg(all(target_os = "linux", feature = "v4l2"))]
pub mod v4l2;

pub use simulated::SimulatedHardware;
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};

/// Fired by the hardware the moment the shutter closes during a still capture
pub type ShutterSignal = oneshot::Sender<()>;

/// Complete hardware capability trait
///
/// Backends provide:
/// - Authorization and device enumeration by kind and position
/// - Format detection
/// - Session (re)configuration
/// - Photo and movie capture primitives
/// - Asynchronous notifications
#[async_trait]
pub trait CaptureHardware: Send + Sync + 'static {
    // ===== Metadata =====

    /// Get the backend type identifier
    fn backend_type(&self) -> HardwareBackendType;

    /// True when no physical device is behind this backend
    fn is_simulated(&self) -> bool;

    // ===== Enumeration =====

    /// Check or request camera access
    async fn authorize(&self) -> bool;

    /// Enumerate devices of one kind at the given positions
    async fn discover(&self, kind: DeviceKind, positions: &[DevicePosition]) -> Vec<Device>;

    /// The platform default audio capture device, if any
    async fn default_microphone(&self) -> Option<Device>;

    /// Get supported formats for a specific camera device
    async fn formats(&self, device: &DeviceId) -> BackendResult<Vec<HardwareFormat>>;

    // ===== Session =====

    /// Open or reconfigure the capture session
    ///
    /// Returns once the hardware runs with the new configuration. On error the
    /// previous configuration must still be in effect.
    async fn configure(&self, config: &SessionConfig) -> BackendResult<()>;

    /// Apply a zoom factor, returning the factor the hardware settled on
    async fn set_zoom(&self, factor: f64) -> BackendResult<f64>;

    // ===== Capture =====

    /// Capture a single still
    ///
    /// `shutter` is fired when the exposure completes, before the payload is
    /// finalized.
    async fn capture_photo(
        &self,
        settings: &PhotoSettings,
        shutter: ShutterSignal,
    ) -> BackendResult<RawPhoto>;

    /// Start movie recording; returns once recording has begun
    async fn start_movie(&self) -> BackendResult<()>;

    /// Stop movie recording and finalize the payload
    async fn stop_movie(&self) -> BackendResult<RawMovie>;

    // ===== Notifications =====

    /// Subscribe to interruption, authorization and hot-plug notifications
    fn subscribe(&self) -> broadcast::Receiver<HardwareEvent>;
}

/// Get a backend instance for the requested type
pub fn get_backend_for_type(
    backend_type: HardwareBackendType,
) -> BackendResult<Arc<dyn CaptureHardware>> {
    match backend_type {
        HardwareBackendType::Simulated => Ok(Arc::new(SimulatedHardware::with_demo_devices())),
        #[cfg(all(target_os = "linux", feature = "v4l2"))]
        HardwareBackendType::V4l2 => Ok(Arc::new(v4l2::V4l2Hardware::new())),
        #[cfg(not(all(target_os = "linux", feature = "v4l2")))]
        HardwareBackendType::V4l2 => Err(BackendError::NotAvailable(
            "built without V4L2 support".to_string(),
        )),
    }
}

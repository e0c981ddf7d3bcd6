// SPDX-License-Identifier: MPL-2.0

//! Camera session - capture orchestration for cameras and microphones
//!
//! This library selects an imaging device, negotiates a resolution and frame
//! rate, drives photo and movie capture and publishes the live session state.
//! The physical capture session is reached through the
//! [`CaptureHardware`](backends::CaptureHardware) trait.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Hardware capability trait plus V4L2 and simulated backends
//! - [`catalog`]: Device discovery, preferred camera and format selection
//! - [`capture`]: Capture activity state machine and photo/movie outputs
//! - [`session`]: The coordinator task and its handle
//! - [`config`]: User configuration and the preferred-device store
//!
//! # Example
//!
//! ```no_run
//! use camera_session::backends::SimulatedHardware;
//! use camera_session::config::MemoryPreferenceStore;
//! use camera_session::{CaptureSession, Config};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), camera_session::CaptureError> {
//! let hardware = Arc::new(SimulatedHardware::with_demo_devices());
//! let store = Arc::new(MemoryPreferenceStore::new());
//! let session = CaptureSession::start(hardware, store, &Config::default()).await?;
//! session.ready().await?;
//! let photo = session.capture_photo().await?;
//! println!("{}x{}", photo.width, photo.height);
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod capture;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod errors;
pub mod session;

// Re-export commonly used types
pub use capture::{CaptureActivity, CaptureCapabilities, CaptureMode};
pub use catalog::{FormatId, Selection, VideoFormatInfo};
pub use config::Config;
pub use errors::{CaptureError, CaptureResult};
pub use session::{CameraStatus, CaptureOutcome, CaptureSession, SessionHandle, SessionSnapshot};

// SPDX-License-Identifier: GPL-3.0-only
// Shared types for the hardware capability layer

//! Shared types for capture hardware backends

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Hardware backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HardwareBackendType {
    /// Video4Linux2 devices under /dev
    #[default]
    V4l2,
    /// In-memory devices, no physical hardware touched
    Simulated,
}

impl std::fmt::Display for HardwareBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HardwareBackendType::V4l2 => write!(f, "V4L2"),
            HardwareBackendType::Simulated => write!(f, "simulated"),
        }
    }
}

impl std::str::FromStr for HardwareBackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v4l2" => Ok(HardwareBackendType::V4l2),
            "simulated" | "sim" => Ok(HardwareBackendType::Simulated),
            other => Err(format!("unknown backend '{other}'")),
        }
    }
}

/// Stable device identifier assigned by the backend (device path, node id, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a device captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Camera,
    Microphone,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Camera => write!(f, "camera"),
            DeviceKind::Microphone => write!(f, "microphone"),
        }
    }
}

/// Physical placement of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DevicePosition {
    Front,
    Back,
    External,
    #[default]
    Unspecified,
}

impl DevicePosition {
    /// Parse a camera location string ("front", "back", "external")
    pub fn from_location(location: &str) -> Self {
        match location.trim().to_ascii_lowercase().as_str() {
            "front" => DevicePosition::Front,
            "back" | "rear" => DevicePosition::Back,
            "external" => DevicePosition::External,
            _ => DevicePosition::Unspecified,
        }
    }
}

impl std::fmt::Display for DevicePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DevicePosition::Front => write!(f, "front"),
            DevicePosition::Back => write!(f, "back"),
            DevicePosition::External => write!(f, "external"),
            DevicePosition::Unspecified => write!(f, "unspecified"),
        }
    }
}

/// Lens or transducer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceType {
    WideAngle,
    UltraWide,
    Telephoto,
    External,
    BuiltInMicrophone,
    #[default]
    Unknown,
}

/// Sensor rotation in degrees (clockwise)
///
/// Sensors may be mounted at an angle relative to the device, and the
/// effective angle changes with device orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RotationAngle {
    /// No rotation (sensor is oriented correctly)
    #[default]
    None,
    /// 90 degrees clockwise
    Rotate90,
    /// 180 degrees (upside down)
    Rotate180,
    /// 270 degrees clockwise (90 degrees counter-clockwise)
    Rotate270,
}

impl RotationAngle {
    /// Create rotation from an integer degree value (normalised to 0-360).
    pub fn from_degrees(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => RotationAngle::Rotate90,
            180 => RotationAngle::Rotate180,
            270 => RotationAngle::Rotate270,
            _ => RotationAngle::None,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            RotationAngle::None => 0,
            RotationAngle::Rotate90 => 90,
            RotationAngle::Rotate180 => 180,
            RotationAngle::Rotate270 => 270,
        }
    }

    /// Check if rotation swaps width and height
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, RotationAngle::Rotate90 | RotationAngle::Rotate270)
    }
}

impl std::fmt::Display for RotationAngle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Capability flags reported by the backend for a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub supports_live_photo: bool,
    pub supports_hdr: bool,
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub rotation: RotationAngle,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            supports_live_photo: false,
            supports_hdr: false,
            min_zoom: 1.0,
            max_zoom: 1.0,
            rotation: RotationAngle::None,
        }
    }
}

impl DeviceCapabilities {
    /// Clamp a requested zoom factor into the supported range
    pub fn clamp_zoom(&self, factor: f64) -> f64 {
        let max = self.max_zoom.max(self.min_zoom);
        factor.clamp(self.min_zoom, max)
    }
}

/// A discovered camera or microphone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub kind: DeviceKind,
    pub position: DevicePosition,
    pub device_type: DeviceType,
    pub capabilities: DeviceCapabilities,
}

impl Device {
    pub fn is_camera(&self) -> bool {
        self.kind == DeviceKind::Camera
    }
}

/// One concrete mode the hardware can stream in
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HardwareFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub hardware_accelerated: bool,
    /// FourCC code (e.g., "MJPG", "H264", "YUYV")
    pub pixel_format: String,
}

impl std::fmt::Display for HardwareFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} @ {}fps ({})",
            self.width, self.height, self.fps, self.pixel_format
        )
    }
}

/// Everything the hardware needs to (re)open a capture session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub camera: DeviceId,
    pub microphone: Option<DeviceId>,
    pub format: HardwareFormat,
    pub zoom: f64,
}

/// Photo quality trade-off requested from the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPrioritization {
    Speed,
    #[default]
    Balanced,
    Quality,
}

impl std::str::FromStr for QualityPrioritization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "speed" => Ok(QualityPrioritization::Speed),
            "balanced" => Ok(QualityPrioritization::Balanced),
            "quality" => Ok(QualityPrioritization::Quality),
            other => Err(format!("unknown quality prioritization '{other}'")),
        }
    }
}

/// Settings for a single still capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PhotoSettings {
    pub live_photo: bool,
    pub quality: QualityPrioritization,
}

/// Raw payload delivered by the hardware after a still capture
#[derive(Debug, Clone)]
pub struct RawPhoto {
    pub width: u32,
    pub height: u32,
    pub pixel_format: String,
    pub data: Arc<[u8]>,
}

/// Raw payload delivered by the hardware after a movie recording
#[derive(Debug, Clone)]
pub struct RawMovie {
    pub duration: Duration,
    pub data: Arc<[u8]>,
}

/// Finalized photo handed back to the caller
#[derive(Debug, Clone)]
pub struct PhotoArtifact {
    pub id: Uuid,
    pub device_id: DeviceId,
    pub width: u32,
    pub height: u32,
    pub pixel_format: String,
    pub is_live_photo: bool,
    pub data: Arc<[u8]>,
    pub captured_at: DateTime<Local>,
}

/// Finalized movie handed back to the caller
#[derive(Debug, Clone)]
pub struct MovieArtifact {
    pub id: Uuid,
    pub device_id: DeviceId,
    pub duration: Duration,
    pub data: Arc<[u8]>,
    pub finished_at: DateTime<Local>,
}

/// Asynchronous notifications from the hardware layer
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareEvent {
    /// A device was plugged or unplugged
    DevicesChanged,
    /// Another client or the system took the camera away
    Interrupted,
    /// The interruption ended and the session may resume
    InterruptionEnded,
    /// Camera access was granted or revoked
    AuthorizationChanged { authorized: bool },
    /// Elapsed time of the active movie recording
    RecordingProgress { elapsed: Duration },
    /// The effective sensor rotation of a device changed
    RotationChanged { device: DeviceId, rotation: RotationAngle },
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for backend operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    /// Backend is not available on this system
    #[error("Backend not available: {0}")]
    NotAvailable(String),
    /// Camera access denied
    #[error("Not authorized")]
    NotAuthorized,
    /// Camera device not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    /// Device could not be attached as session input
    #[error("Failed to add input: {0}")]
    AddInputFailed(String),
    /// Photo or movie output could not be attached
    #[error("Failed to add output: {0}")]
    AddOutputFailed(String),
    /// Format not supported
    #[error("Format not supported: {0}")]
    FormatNotSupported(String),
    /// Operation not offered by this backend
    #[error("Not supported: {0}")]
    NotSupported(String),
    /// Recording already in progress
    #[error("Recording already in progress")]
    RecordingInProgress,
    /// No recording in progress
    #[error("No recording in progress")]
    NoRecordingInProgress,
    /// General I/O error
    #[error("I/O error: {0}")]
    Io(String),
    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_normalises_degrees() {
        assert_eq!(RotationAngle::from_degrees(-90), RotationAngle::Rotate270);
        assert_eq!(RotationAngle::from_degrees(450), RotationAngle::Rotate90);
        assert_eq!(RotationAngle::from_degrees(45), RotationAngle::None);
        assert!(RotationAngle::Rotate90.swaps_dimensions());
        assert!(!RotationAngle::Rotate180.swaps_dimensions());
    }

    #[test]
    fn zoom_is_clamped_to_device_range() {
        let caps = DeviceCapabilities {
            min_zoom: 1.0,
            max_zoom: 8.0,
            ..Default::default()
        };
        assert_eq!(caps.clamp_zoom(0.5), 1.0);
        assert_eq!(caps.clamp_zoom(3.0), 3.0);
        assert_eq!(caps.clamp_zoom(20.0), 8.0);
    }

    #[test]
    fn position_parses_locations() {
        assert_eq!(DevicePosition::from_location("Back"), DevicePosition::Back);
        assert_eq!(DevicePosition::from_location("rear"), DevicePosition::Back);
        assert_eq!(DevicePosition::from_location("front"), DevicePosition::Front);
        assert_eq!(DevicePosition::from_location(""), DevicePosition::Unspecified);
    }

    #[test]
    fn backend_type_parses() {
        assert_eq!("V4L2".parse::<HardwareBackendType>(), Ok(HardwareBackendType::V4l2));
        assert_eq!("sim".parse::<HardwareBackendType>(), Ok(HardwareBackendType::Simulated));
        assert!("pipewire".parse::<HardwareBackendType>().is_err());
    }
}

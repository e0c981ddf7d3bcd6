// SPDX-License-Identifier: MPL-2.0

//! Error types for the capture session
//!
//! [`CaptureError`] is what callers of the session see. Hardware adapters report
//! [`BackendError`](crate::backends::BackendError), which the coordinator maps
//! onto the kind of the operation that hit it.

use crate::backends::BackendError;
use crate::capture::activity::TransitionError;
use crate::config::PrefsError;
use thiserror::Error;

/// Result type alias using CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Errors returned by the catalogs and the session coordinator
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CaptureError {
    /// No preferred or system camera is set
    #[error("No video device available")]
    VideoDeviceUnavailable,
    /// The platform reports no default microphone
    #[error("No audio device available")]
    AudioDeviceUnavailable,
    /// The hardware refused the device input
    #[error("Failed to add capture input: {0}")]
    AddInputFailed(String),
    /// The hardware refused the capture output
    #[error("Failed to add capture output: {0}")]
    AddOutputFailed(String),
    /// Initial session configuration failed
    #[error("Session setup failed: {0}")]
    SetupFailed(String),
    /// Switching device, format or frame rate failed
    #[error("Device change failed: {0}")]
    DeviceChangeFailed(String),
    /// A real deployment discovered zero cameras
    #[error("No camera devices present")]
    NoCamerasPresent,
    /// Camera access has not been granted
    #[error("Camera access not authorized")]
    NotAuthorized,
    /// Device, format and mode changes are rejected while capturing
    #[error("A capture is in progress")]
    CaptureInProgress,
    /// The device id is not in the catalog
    #[error("Unknown device: {0}")]
    UnknownDevice(String),
    /// The format id is not offered by the current device
    #[error("Unknown format: {0}")]
    UnknownFormat(String),
    /// The frame rate is not offered by the selected format
    #[error("Frame rate {0} fps not supported by the selected format")]
    UnsupportedFrameRate(u32),
    /// Zoom factor is not a positive finite number
    #[error("Invalid zoom factor: {0}")]
    InvalidZoom(f64),
    /// The hardware failed to produce a photo or movie
    #[error("Capture failed: {0}")]
    CaptureFailed(String),
    /// Activity state machine rejected a transition
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    /// Preferred-device store could not be read or written
    #[error("Preference store error: {0}")]
    Preferences(String),
    /// The coordinator task is gone
    #[error("Capture session is closed")]
    SessionClosed,
}

impl CaptureError {
    /// Startup invariant violations the product cannot run with
    pub fn is_fatal(&self) -> bool {
        matches!(self, CaptureError::NoCamerasPresent)
    }

    /// Map a hardware failure during a device, format or frame rate change
    pub fn device_change(err: BackendError) -> Self {
        match err {
            BackendError::AddInputFailed(msg) => CaptureError::AddInputFailed(msg),
            BackendError::AddOutputFailed(msg) => CaptureError::AddOutputFailed(msg),
            BackendError::NotAuthorized => CaptureError::NotAuthorized,
            other => CaptureError::DeviceChangeFailed(other.to_string()),
        }
    }

    /// Map a hardware failure during initial session setup
    pub fn setup(err: BackendError) -> Self {
        match err {
            BackendError::AddInputFailed(msg) => CaptureError::AddInputFailed(msg),
            BackendError::AddOutputFailed(msg) => CaptureError::AddOutputFailed(msg),
            BackendError::NotAuthorized => CaptureError::NotAuthorized,
            other => CaptureError::SetupFailed(other.to_string()),
        }
    }

    /// Map a hardware failure during a photo or movie capture
    pub fn capture(err: BackendError) -> Self {
        match err {
            BackendError::AddOutputFailed(msg) => CaptureError::AddOutputFailed(msg),
            BackendError::NotAuthorized => CaptureError::NotAuthorized,
            other => CaptureError::CaptureFailed(other.to_string()),
        }
    }
}

impl From<PrefsError> for CaptureError {
    fn from(err: PrefsError) -> Self {
        CaptureError::Preferences(err.to_string())
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::Preferences(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_cameras_is_fatal() {
        assert!(CaptureError::NoCamerasPresent.is_fatal());
        assert!(!CaptureError::VideoDeviceUnavailable.is_fatal());
        assert!(!CaptureError::SetupFailed("x".into()).is_fatal());
    }

    #[test]
    fn device_change_keeps_input_and_output_kinds() {
        assert_eq!(
            CaptureError::device_change(BackendError::AddInputFailed("busy".into())),
            CaptureError::AddInputFailed("busy".into())
        );
        assert_eq!(
            CaptureError::device_change(BackendError::AddOutputFailed("photo".into())),
            CaptureError::AddOutputFailed("photo".into())
        );
        assert!(matches!(
            CaptureError::device_change(BackendError::Other("boom".into())),
            CaptureError::DeviceChangeFailed(_)
        ));
    }

    #[test]
    fn setup_maps_generic_failures_to_setup_failed() {
        assert!(matches!(
            CaptureError::setup(BackendError::Io("eio".into())),
            CaptureError::SetupFailed(_)
        ));
    }
}

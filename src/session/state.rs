// SPDX-License-Identifier: GPL-3.0-only

//! Observable session state

use crate::backends::{Device, QualityPrioritization};
use crate::capture::CaptureMode;
use crate::catalog::{Selection, VideoFormatInfo};
use crate::errors::CaptureError;

/// Health of the capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraStatus {
    /// Setup has not finished yet
    #[default]
    Unknown,
    /// Camera access denied
    Unauthorized,
    /// Setup or the last reconfiguration failed
    Failed,
    Running,
    /// Another client or the system took the camera
    Interrupted,
}

impl std::fmt::Display for CameraStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraStatus::Unknown => write!(f, "unknown"),
            CameraStatus::Unauthorized => write!(f, "unauthorized"),
            CameraStatus::Failed => write!(f, "failed"),
            CameraStatus::Running => write!(f, "running"),
            CameraStatus::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Read-only view of catalogs and selections
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    /// Device the hardware session runs on
    pub device: Option<Device>,
    /// Cameras in name order
    pub cameras: Vec<Device>,
    pub microphones: Vec<Device>,
    /// Every format of the current device
    pub formats: Vec<VideoFormatInfo>,
    /// Grouped formats of the current device, most pixels first
    pub grouped_formats: Vec<(String, VideoFormatInfo)>,
    /// Frame rates of the selected format, highest first
    pub fps_options: Vec<u32>,
    pub selection: Selection,
    pub zoom: f64,
    pub mode: CaptureMode,
    pub live_photo: bool,
    pub quality: QualityPrioritization,
    /// Why the session last entered [`CameraStatus::Failed`]
    pub last_error: Option<CaptureError>,
}

impl SessionSnapshot {
    pub fn selected_format(&self) -> Option<&VideoFormatInfo> {
        let id = self.selection.selected_format_id.as_ref()?;
        self.formats.iter().find(|f| &f.id() == id)
    }
}

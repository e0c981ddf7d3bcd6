// SPDX-License-Identifier: GPL-3.0-only

//! Capture session coordinator and its handle
//!
//! [`CaptureSession::start`] discovers devices and spawns one coordinator
//! task that owns the catalogs, the selection and the installed output.
//! Everything else talks to it through a cloneable [`SessionHandle`]:
//! commands go through a bounded queue and are answered one at a time in
//! arrival order, observable state comes back on watch channels.

mod coordinator;
pub mod state;

pub use coordinator::CaptureSession;
pub use state::{CameraStatus, SessionSnapshot};

use crate::backends::{DeviceId, MovieArtifact, PhotoArtifact, QualityPrioritization};
use crate::capture::{CaptureActivity, CaptureCapabilities, CaptureMode};
use crate::catalog::FormatId;
use crate::errors::{CaptureError, CaptureResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

type Reply<T> = oneshot::Sender<CaptureResult<T>>;

/// Result of [`SessionHandle::start_capture`]
#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    /// A photo was taken and finalized
    Photo(PhotoArtifact),
    /// Movie recording is running
    RecordingStarted,
}

/// Requests processed by the coordinator task
#[derive(Debug)]
pub(crate) enum Command {
    SelectDevice {
        id: DeviceId,
        reply: Reply<()>,
    },
    SetZoom {
        factor: f64,
        reply: Reply<f64>,
    },
    SetFormat {
        id: FormatId,
        reply: Reply<()>,
    },
    SetFrameRate {
        fps: u32,
        reply: Reply<()>,
    },
    StartCapture {
        mode: CaptureMode,
        reply: Reply<CaptureOutcome>,
    },
    StopCapture {
        reply: Reply<Option<MovieArtifact>>,
    },
    CapturePhoto {
        reply: Reply<PhotoArtifact>,
    },
    SetCaptureMode {
        mode: CaptureMode,
        reply: Reply<()>,
    },
    SetLivePhoto {
        enabled: bool,
        reply: Reply<()>,
    },
    SetQuality {
        quality: QualityPrioritization,
        reply: Reply<()>,
    },
    RefreshDevices {
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Command::SelectDevice { .. } => "select_device",
            Command::SetZoom { .. } => "set_zoom",
            Command::SetFormat { .. } => "set_format",
            Command::SetFrameRate { .. } => "set_frame_rate",
            Command::StartCapture { .. } => "start_capture",
            Command::StopCapture { .. } => "stop_capture",
            Command::CapturePhoto { .. } => "capture_photo",
            Command::SetCaptureMode { .. } => "set_capture_mode",
            Command::SetLivePhoto { .. } => "set_live_photo",
            Command::SetQuality { .. } => "set_quality_prioritization",
            Command::RefreshDevices { .. } => "refresh_devices",
            Command::Shutdown { .. } => "shutdown",
        }
    }
}

/// Clears the stop-pending flag however the stop request ends
struct StopPendingGuard<'a>(&'a AtomicBool);

impl Drop for StopPendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Cloneable front end of a running capture session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<CameraStatus>,
    activity: watch::Receiver<CaptureActivity>,
    capabilities: watch::Receiver<CaptureCapabilities>,
    snapshot: watch::Receiver<SessionSnapshot>,
    stop_pending: Arc<AtomicBool>,
}

impl SessionHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> CaptureResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| CaptureError::SessionClosed)?;
        rx.await.map_err(|_| CaptureError::SessionClosed)?
    }

    // ===== Observers =====

    pub fn status(&self) -> watch::Receiver<CameraStatus> {
        self.status.clone()
    }

    pub fn activity(&self) -> watch::Receiver<CaptureActivity> {
        self.activity.clone()
    }

    pub fn capabilities(&self) -> watch::Receiver<CaptureCapabilities> {
        self.capabilities.clone()
    }

    pub fn snapshot(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Current snapshot, cloned
    pub fn current(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Wait until initial setup has settled and return the status
    pub async fn ready(&self) -> CaptureResult<CameraStatus> {
        let mut status = self.status.clone();
        let settled = status
            .wait_for(|s| *s != CameraStatus::Unknown)
            .await
            .map_err(|_| CaptureError::SessionClosed)?;
        Ok(*settled)
    }

    // ===== Commands =====

    /// Switch the session to another camera and make it the preferred one
    pub async fn select_device(&self, id: DeviceId) -> CaptureResult<()> {
        self.request(|reply| Command::SelectDevice { id, reply })
            .await
    }

    /// Returns the factor the hardware applied after clamping
    pub async fn set_zoom(&self, factor: f64) -> CaptureResult<f64> {
        self.request(|reply| Command::SetZoom { factor, reply })
            .await
    }

    pub async fn set_format(&self, id: FormatId) -> CaptureResult<()> {
        self.request(|reply| Command::SetFormat { id, reply }).await
    }

    pub async fn set_frame_rate(&self, fps: u32) -> CaptureResult<()> {
        self.request(|reply| Command::SetFrameRate { fps, reply })
            .await
    }

    pub async fn start_capture(&self, mode: CaptureMode) -> CaptureResult<CaptureOutcome> {
        self.request(|reply| Command::StartCapture { mode, reply })
            .await
    }

    /// Stop the running recording
    ///
    /// A stop issued while another is queued or in flight returns `Ok(None)`
    /// without reaching the coordinator, as does stopping while idle.
    pub async fn stop_capture(&self) -> CaptureResult<Option<MovieArtifact>> {
        if self.stop_pending.swap(true, Ordering::AcqRel) {
            debug!("Stop already pending");
            return Ok(None);
        }
        let _guard = StopPendingGuard(&self.stop_pending);
        self.request(|reply| Command::StopCapture { reply }).await
    }

    pub async fn capture_photo(&self) -> CaptureResult<PhotoArtifact> {
        self.request(|reply| Command::CapturePhoto { reply }).await
    }

    pub async fn set_capture_mode(&self, mode: CaptureMode) -> CaptureResult<()> {
        self.request(|reply| Command::SetCaptureMode { mode, reply })
            .await
    }

    pub async fn set_live_photo(&self, enabled: bool) -> CaptureResult<()> {
        self.request(|reply| Command::SetLivePhoto { enabled, reply })
            .await
    }

    pub async fn set_quality_prioritization(
        &self,
        quality: QualityPrioritization,
    ) -> CaptureResult<()> {
        self.request(|reply| Command::SetQuality { quality, reply })
            .await
    }

    /// Re-enumerate devices as if a hot-plug event arrived
    pub async fn refresh_devices(&self) -> CaptureResult<()> {
        self.request(|reply| Command::RefreshDevices { reply })
            .await
    }

    /// Stop any recording and end the coordinator task
    pub async fn shutdown(&self) -> CaptureResult<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

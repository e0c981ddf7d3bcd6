// SPDX-License-Identifier: GPL-3.0-only

//! Capture activity state machine
//!
//! ```text
//!            begin_photo            shutter_fired (live)
//!   Idle ───────────────▶ PhotoPending ──────────────▶ PhotoLive
//!    ▲ ▲                      │                           │
//!    │ └──── finish_photo ────┴───────────────────────────┘
//!    │
//!    │  begin_movie      advance_movie
//!    └────────────▶ Movie(0) ──────▶ Movie(t) ── finish_movie ──▶ Idle
//! ```
//!
//! Photo and movie states never reach each other directly. Every accepted
//! transition is published on a watch channel.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, trace};

/// What the capture system is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CaptureActivity {
    #[default]
    Idle,
    PhotoCapture {
        /// The shutter has not fired yet
        will_capture: bool,
        is_live_photo: bool,
    },
    MovieCapture {
        duration: Duration,
    },
}

impl CaptureActivity {
    pub fn is_idle(&self) -> bool {
        matches!(self, CaptureActivity::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, CaptureActivity::MovieCapture { .. })
    }

    pub fn kind(&self) -> ActivityKind {
        match self {
            CaptureActivity::Idle => ActivityKind::Idle,
            CaptureActivity::PhotoCapture {
                will_capture: true, ..
            } => ActivityKind::PhotoPending,
            CaptureActivity::PhotoCapture { .. } => ActivityKind::PhotoLive,
            CaptureActivity::MovieCapture { .. } => ActivityKind::MovieRecording,
        }
    }

    /// Elapsed recording time, zero outside a recording
    pub fn duration(&self) -> Duration {
        match self {
            CaptureActivity::MovieCapture { duration } => *duration,
            _ => Duration::ZERO,
        }
    }
}

/// State names used in transition errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Idle,
    PhotoPending,
    PhotoLive,
    MovieRecording,
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityKind::Idle => write!(f, "idle"),
            ActivityKind::PhotoPending => write!(f, "photo capture pending"),
            ActivityKind::PhotoLive => write!(f, "live photo capture"),
            ActivityKind::MovieRecording => write!(f, "movie recording"),
        }
    }
}

/// A transition the state machine refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot {action} during {from}")]
pub struct TransitionError {
    pub from: ActivityKind,
    pub action: &'static str,
}

/// Capability flags of the installed output, all false until reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CaptureCapabilities {
    pub is_live_photo_capture_supported: bool,
    pub is_hdr_supported: bool,
}

/// Owner of the current [`CaptureActivity`]
#[derive(Debug)]
pub struct ActivityStateMachine {
    tx: watch::Sender<CaptureActivity>,
    live_photo: bool,
}

impl Default for ActivityStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityStateMachine {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(CaptureActivity::Idle);
        Self {
            tx,
            live_photo: false,
        }
    }

    pub fn current(&self) -> CaptureActivity {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureActivity> {
        self.tx.subscribe()
    }

    fn publish(&self, next: CaptureActivity) {
        trace!(?next, "Capture activity");
        self.tx.send_replace(next);
    }

    fn reject(&self, action: &'static str) -> TransitionError {
        let err = TransitionError {
            from: self.current().kind(),
            action,
        };
        debug!(%err, "Rejected activity transition");
        err
    }

    /// Idle → photo pending
    pub fn begin_photo(&mut self, live_photo: bool) -> Result<(), TransitionError> {
        if !self.current().is_idle() {
            return Err(self.reject("begin a photo capture"));
        }
        self.live_photo = live_photo;
        self.publish(CaptureActivity::PhotoCapture {
            will_capture: true,
            is_live_photo: false,
        });
        Ok(())
    }

    /// Photo pending → photo taken (live when requested)
    pub fn shutter_fired(&mut self) -> Result<(), TransitionError> {
        if self.current().kind() != ActivityKind::PhotoPending {
            return Err(self.reject("fire the shutter"));
        }
        self.publish(CaptureActivity::PhotoCapture {
            will_capture: false,
            is_live_photo: self.live_photo,
        });
        Ok(())
    }

    /// Photo → idle, once the artifact is final or the capture failed
    pub fn finish_photo(&mut self) -> Result<(), TransitionError> {
        if !matches!(self.current(), CaptureActivity::PhotoCapture { .. }) {
            return Err(self.reject("finish a photo capture"));
        }
        self.live_photo = false;
        self.publish(CaptureActivity::Idle);
        Ok(())
    }

    /// Idle → recording at zero
    pub fn begin_movie(&mut self) -> Result<(), TransitionError> {
        if !self.current().is_idle() {
            return Err(self.reject("start recording"));
        }
        self.publish(CaptureActivity::MovieCapture {
            duration: Duration::ZERO,
        });
        Ok(())
    }

    /// Publish a new elapsed time; returns false when it would go backwards
    pub fn advance_movie(&mut self, elapsed: Duration) -> Result<bool, TransitionError> {
        let CaptureActivity::MovieCapture { duration } = self.current() else {
            return Err(self.reject("advance the recording timer"));
        };
        if elapsed <= duration {
            return Ok(false);
        }
        self.publish(CaptureActivity::MovieCapture { duration: elapsed });
        Ok(true)
    }

    /// Recording → idle
    pub fn finish_movie(&mut self) -> Result<(), TransitionError> {
        if !self.current().is_recording() {
            return Err(self.reject("stop recording"));
        }
        self.publish(CaptureActivity::Idle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_photo_sequence() {
        let mut sm = ActivityStateMachine::new();
        sm.begin_photo(true).unwrap();
        assert_eq!(sm.current().kind(), ActivityKind::PhotoPending);
        sm.shutter_fired().unwrap();
        assert_eq!(
            sm.current(),
            CaptureActivity::PhotoCapture {
                will_capture: false,
                is_live_photo: true
            }
        );
        sm.finish_photo().unwrap();
        assert!(sm.current().is_idle());
    }

    #[test]
    fn plain_photo_never_reports_live() {
        let mut sm = ActivityStateMachine::new();
        sm.begin_photo(false).unwrap();
        sm.shutter_fired().unwrap();
        assert_eq!(
            sm.current(),
            CaptureActivity::PhotoCapture {
                will_capture: false,
                is_live_photo: false
            }
        );
    }

    #[test]
    fn photo_and_movie_do_not_mix() {
        let mut sm = ActivityStateMachine::new();
        sm.begin_photo(false).unwrap();
        let err = sm.begin_movie().unwrap_err();
        assert_eq!(err.from, ActivityKind::PhotoPending);
        sm.finish_photo().unwrap();

        sm.begin_movie().unwrap();
        assert!(sm.begin_photo(false).is_err());
        assert!(sm.finish_photo().is_err());
        assert!(sm.current().is_recording());
    }

    #[test]
    fn shutter_requires_pending_photo() {
        let mut sm = ActivityStateMachine::new();
        assert!(sm.shutter_fired().is_err());
        sm.begin_photo(true).unwrap();
        sm.shutter_fired().unwrap();
        assert!(sm.shutter_fired().is_err());
    }

    #[test]
    fn duration_is_monotonic_and_resets() {
        let mut sm = ActivityStateMachine::new();
        sm.begin_movie().unwrap();
        assert!(sm.advance_movie(Duration::from_secs(2)).unwrap());
        assert!(!sm.advance_movie(Duration::from_secs(1)).unwrap());
        assert_eq!(sm.current().duration(), Duration::from_secs(2));

        sm.finish_movie().unwrap();
        assert!(sm.advance_movie(Duration::from_secs(3)).is_err());
        sm.begin_movie().unwrap();
        assert_eq!(sm.current().duration(), Duration::ZERO);
    }

    #[test]
    fn transitions_are_published() {
        let mut sm = ActivityStateMachine::new();
        let mut rx = sm.subscribe();
        sm.begin_movie().unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_recording());
        sm.finish_movie().unwrap();
        assert!(rx.borrow_and_update().is_idle());
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Photo and movie outputs
//!
//! Exactly one output is installed at a time. [`CaptureOutput`] holds it
//! together with the single activity state machine, so the activity and its
//! observers survive a mode switch. Mode switches happen only while idle.
//!
//! Device configuration updates (new device, new sensor rotation) that
//! arrive during a capture are parked and applied on the next return to
//! idle. Only the latest parked update is kept.

use super::activity::{
    ActivityStateMachine, CaptureActivity, CaptureCapabilities, TransitionError,
};
use crate::backends::{
    DeviceCapabilities, DeviceId, PhotoSettings, QualityPrioritization, RotationAngle,
};
use crate::constants::LIVE_PHOTO_MAX_FPS;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Installed output variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CaptureMode {
    #[default]
    Photo,
    Movie,
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureMode::Photo => write!(f, "photo"),
            CaptureMode::Movie => write!(f, "movie"),
        }
    }
}

impl std::str::FromStr for CaptureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "photo" => Ok(CaptureMode::Photo),
            "movie" | "video" => Ok(CaptureMode::Movie),
            other => Err(format!("unknown capture mode '{other}'")),
        }
    }
}

/// Device-level configuration applied to the installed output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_id: DeviceId,
    pub rotation: RotationAngle,
}

/// Behaviour shared by the photo and movie outputs
pub trait OutputCoordinator {
    fn mode(&self) -> CaptureMode;

    /// Capabilities for the current device and frame rate
    fn capabilities(&self) -> CaptureCapabilities;

    fn device_config(&self) -> Option<&DeviceConfig>;

    fn apply_device_config(&mut self, config: DeviceConfig);

    /// Device flags and the selected frame rate changed
    fn update_device_features(&mut self, features: &DeviceCapabilities, fps: Option<u32>);
}

/// Still capture output
#[derive(Debug, Clone, Default)]
pub struct PhotoOutput {
    settings: PhotoSettings,
    device: Option<DeviceConfig>,
    features: DeviceCapabilities,
    fps: Option<u32>,
}

impl PhotoOutput {
    pub fn new(settings: PhotoSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    /// Whether the user asked for live photos
    pub fn live_photo_requested(&self) -> bool {
        self.settings.live_photo
    }

    pub fn set_live_photo(&mut self, enabled: bool) {
        self.settings.live_photo = enabled;
    }

    pub fn quality(&self) -> QualityPrioritization {
        self.settings.quality
    }

    pub fn set_quality(&mut self, quality: QualityPrioritization) {
        self.settings.quality = quality;
    }

    /// Settings for the next capture, live photo only where supported
    pub fn effective_settings(&self) -> PhotoSettings {
        PhotoSettings {
            live_photo: self.settings.live_photo
                && self.capabilities().is_live_photo_capture_supported,
            quality: self.settings.quality,
        }
    }
}

impl OutputCoordinator for PhotoOutput {
    fn mode(&self) -> CaptureMode {
        CaptureMode::Photo
    }

    fn capabilities(&self) -> CaptureCapabilities {
        let fps_ok = self.fps.is_none_or(|fps| fps <= LIVE_PHOTO_MAX_FPS);
        CaptureCapabilities {
            is_live_photo_capture_supported: self.features.supports_live_photo && fps_ok,
            is_hdr_supported: self.features.supports_hdr,
        }
    }

    fn device_config(&self) -> Option<&DeviceConfig> {
        self.device.as_ref()
    }

    fn apply_device_config(&mut self, config: DeviceConfig) {
        self.device = Some(config);
    }

    fn update_device_features(&mut self, features: &DeviceCapabilities, fps: Option<u32>) {
        self.features = features.clone();
        self.fps = fps;
    }
}

/// Movie recording output
#[derive(Debug, Clone, Default)]
pub struct MovieOutput {
    record_audio: bool,
    device: Option<DeviceConfig>,
    features: DeviceCapabilities,
    last_duration: Duration,
}

impl MovieOutput {
    pub fn new(record_audio: bool) -> Self {
        Self {
            record_audio,
            ..Default::default()
        }
    }

    pub fn record_audio(&self) -> bool {
        self.record_audio
    }

    /// Duration of the most recent finished recording
    pub fn last_duration(&self) -> Duration {
        self.last_duration
    }
}

impl OutputCoordinator for MovieOutput {
    fn mode(&self) -> CaptureMode {
        CaptureMode::Movie
    }

    fn capabilities(&self) -> CaptureCapabilities {
        CaptureCapabilities {
            is_live_photo_capture_supported: false,
            is_hdr_supported: self.features.supports_hdr,
        }
    }

    fn device_config(&self) -> Option<&DeviceConfig> {
        self.device.as_ref()
    }

    fn apply_device_config(&mut self, config: DeviceConfig) {
        self.device = Some(config);
    }

    fn update_device_features(&mut self, features: &DeviceCapabilities, _fps: Option<u32>) {
        self.features = features.clone();
    }
}

/// The installed output
#[derive(Debug, Clone)]
pub enum OutputVariant {
    Photo(PhotoOutput),
    Movie(MovieOutput),
}

impl OutputVariant {
    fn coordinator(&self) -> &dyn OutputCoordinator {
        match self {
            OutputVariant::Photo(photo) => photo,
            OutputVariant::Movie(movie) => movie,
        }
    }

    fn coordinator_mut(&mut self) -> &mut dyn OutputCoordinator {
        match self {
            OutputVariant::Photo(photo) => photo,
            OutputVariant::Movie(movie) => movie,
        }
    }
}

/// Installed output plus the activity it reports
#[derive(Debug)]
pub struct CaptureOutput {
    variant: OutputVariant,
    activity: ActivityStateMachine,
    capabilities: watch::Sender<CaptureCapabilities>,
    pending: Option<DeviceConfig>,
    // Kept across mode switches
    photo_settings: PhotoSettings,
    record_audio: bool,
    features: DeviceCapabilities,
    fps: Option<u32>,
}

impl CaptureOutput {
    pub fn new(mode: CaptureMode, photo_settings: PhotoSettings, record_audio: bool) -> Self {
        let variant = match mode {
            CaptureMode::Photo => OutputVariant::Photo(PhotoOutput::new(photo_settings)),
            CaptureMode::Movie => OutputVariant::Movie(MovieOutput::new(record_audio)),
        };
        let (capabilities, _) = watch::channel(CaptureCapabilities::default());
        Self {
            variant,
            activity: ActivityStateMachine::new(),
            capabilities,
            pending: None,
            photo_settings,
            record_audio,
            features: DeviceCapabilities::default(),
            fps: None,
        }
    }

    pub fn variant(&self) -> &OutputVariant {
        &self.variant
    }

    pub fn activity(&self) -> CaptureActivity {
        self.activity.current()
    }

    pub fn subscribe_activity(&self) -> watch::Receiver<CaptureActivity> {
        self.activity.subscribe()
    }

    pub fn subscribe_capabilities(&self) -> watch::Receiver<CaptureCapabilities> {
        self.capabilities.subscribe()
    }

    pub fn photo(&self) -> Option<&PhotoOutput> {
        match &self.variant {
            OutputVariant::Photo(photo) => Some(photo),
            OutputVariant::Movie(_) => None,
        }
    }

    pub fn movie(&self) -> Option<&MovieOutput> {
        match &self.variant {
            OutputVariant::Movie(movie) => Some(movie),
            OutputVariant::Photo(_) => None,
        }
    }

    /// Device update waiting for the next idle transition
    pub fn pending_device_config(&self) -> Option<&DeviceConfig> {
        self.pending.as_ref()
    }

    fn publish_capabilities(&self) {
        let caps = self.variant.coordinator().capabilities();
        self.capabilities.send_if_modified(|current| {
            if *current == caps {
                false
            } else {
                *current = caps;
                true
            }
        });
    }

    /// Install the other output; idle only
    ///
    /// Returns false when `mode` is already installed.
    pub fn set_mode(&mut self, mode: CaptureMode) -> Result<bool, TransitionError> {
        if self.mode() == mode {
            return Ok(false);
        }
        let current = self.activity();
        if !current.is_idle() {
            return Err(TransitionError {
                from: current.kind(),
                action: "switch capture mode",
            });
        }

        let device = self.device_config().cloned();
        let mut variant = match mode {
            CaptureMode::Photo => OutputVariant::Photo(PhotoOutput::new(self.photo_settings)),
            CaptureMode::Movie => OutputVariant::Movie(MovieOutput::new(self.record_audio)),
        };
        let coordinator = variant.coordinator_mut();
        coordinator.update_device_features(&self.features, self.fps);
        if let Some(device) = device {
            coordinator.apply_device_config(device);
        }
        self.variant = variant;

        info!(%mode, "Capture output installed");
        self.publish_capabilities();
        Ok(true)
    }

    pub fn set_live_photo(&mut self, enabled: bool) {
        self.photo_settings.live_photo = enabled;
        if let OutputVariant::Photo(photo) = &mut self.variant {
            photo.set_live_photo(enabled);
        }
    }

    pub fn set_quality(&mut self, quality: QualityPrioritization) {
        self.photo_settings.quality = quality;
        if let OutputVariant::Photo(photo) = &mut self.variant {
            photo.set_quality(quality);
        }
    }

    /// Apply now when idle, else park until idle (latest wins)
    ///
    /// Returns true when applied immediately.
    pub fn submit_device_config(&mut self, config: DeviceConfig) -> bool {
        if self.activity().is_idle() {
            debug!(device = %config.device_id, rotation = %config.rotation, "Device config applied");
            self.variant.coordinator_mut().apply_device_config(config);
            self.pending = None;
            true
        } else {
            debug!(device = %config.device_id, "Device config parked until idle");
            self.pending = Some(config);
            false
        }
    }

    fn flush_pending(&mut self) {
        if let Some(config) = self.pending.take() {
            debug!(device = %config.device_id, "Applying parked device config");
            self.variant.coordinator_mut().apply_device_config(config);
        }
    }

    // ===== Activity transitions =====

    /// Idle → photo pending; the photo output must be installed
    ///
    /// Returns the settings to capture with.
    pub fn begin_photo(&mut self) -> Result<PhotoSettings, TransitionError> {
        let OutputVariant::Photo(photo) = &self.variant else {
            return Err(TransitionError {
                from: self.activity().kind(),
                action: "capture a photo with the movie output",
            });
        };
        let settings = photo.effective_settings();
        self.activity.begin_photo(settings.live_photo)?;
        Ok(settings)
    }

    pub fn shutter_fired(&mut self) -> Result<(), TransitionError> {
        self.activity.shutter_fired()
    }

    pub fn finish_photo(&mut self) -> Result<(), TransitionError> {
        self.activity.finish_photo()?;
        self.flush_pending();
        Ok(())
    }

    /// Idle → recording; the movie output must be installed
    pub fn begin_movie(&mut self) -> Result<(), TransitionError> {
        if self.mode() != CaptureMode::Movie {
            return Err(TransitionError {
                from: self.activity().kind(),
                action: "record with the photo output",
            });
        }
        self.activity.begin_movie()
    }

    pub fn advance_movie(&mut self, elapsed: Duration) -> Result<bool, TransitionError> {
        self.activity.advance_movie(elapsed)
    }

    /// Recording → idle, remembering the final duration
    pub fn finish_movie(&mut self, final_duration: Duration) -> Result<(), TransitionError> {
        // Final tick before leaving, never backwards
        if self.activity.current().is_recording() {
            self.activity.advance_movie(final_duration)?;
        }
        let recorded = self.activity.current().duration();
        self.activity.finish_movie()?;
        if let OutputVariant::Movie(movie) = &mut self.variant {
            movie.last_duration = recorded;
        }
        self.flush_pending();
        Ok(())
    }
}

impl OutputCoordinator for CaptureOutput {
    fn mode(&self) -> CaptureMode {
        self.variant.coordinator().mode()
    }

    fn capabilities(&self) -> CaptureCapabilities {
        self.variant.coordinator().capabilities()
    }

    fn device_config(&self) -> Option<&DeviceConfig> {
        self.variant.coordinator().device_config()
    }

    fn apply_device_config(&mut self, config: DeviceConfig) {
        self.submit_device_config(config);
    }

    fn update_device_features(&mut self, features: &DeviceCapabilities, fps: Option<u32>) {
        self.features = features.clone();
        self.fps = fps;
        self.variant
            .coordinator_mut()
            .update_device_features(features, fps);
        self.publish_capabilities();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(live: bool, hdr: bool) -> DeviceCapabilities {
        DeviceCapabilities {
            supports_live_photo: live,
            supports_hdr: hdr,
            ..Default::default()
        }
    }

    fn config(id: &str, rotation: RotationAngle) -> DeviceConfig {
        DeviceConfig {
            device_id: DeviceId::new(id),
            rotation,
        }
    }

    #[test]
    fn capabilities_start_unknown() {
        let output = CaptureOutput::new(CaptureMode::Photo, PhotoSettings::default(), false);
        assert_eq!(output.capabilities(), CaptureCapabilities::default());
        assert_eq!(*output.subscribe_capabilities().borrow(), CaptureCapabilities::default());
    }

    #[test]
    fn live_photo_needs_low_frame_rate() {
        let mut photo = PhotoOutput::new(PhotoSettings {
            live_photo: true,
            ..Default::default()
        });
        photo.update_device_features(&features(true, true), Some(30));
        assert!(photo.capabilities().is_live_photo_capture_supported);
        assert!(photo.effective_settings().live_photo);

        photo.update_device_features(&features(true, true), Some(120));
        assert!(!photo.capabilities().is_live_photo_capture_supported);
        assert!(!photo.effective_settings().live_photo);
        assert!(photo.capabilities().is_hdr_supported);
    }

    #[test]
    fn movie_output_never_offers_live_photo() {
        let mut movie = MovieOutput::new(false);
        movie.update_device_features(&features(true, true), Some(30));
        assert!(!movie.capabilities().is_live_photo_capture_supported);
        assert!(movie.capabilities().is_hdr_supported);
    }

    #[test]
    fn mode_switch_keeps_device_config_and_republishes() {
        let mut output = CaptureOutput::new(CaptureMode::Photo, PhotoSettings::default(), false);
        let caps = output.subscribe_capabilities();
        output.update_device_features(&features(true, false), Some(30));
        output.submit_device_config(config("cam", RotationAngle::Rotate90));
        assert!(caps.borrow().is_live_photo_capture_supported);

        assert!(output.set_mode(CaptureMode::Movie).unwrap());
        assert!(!output.set_mode(CaptureMode::Movie).unwrap());
        assert_eq!(output.device_config().unwrap().rotation, RotationAngle::Rotate90);
        assert!(!caps.borrow().is_live_photo_capture_supported);
    }

    #[test]
    fn mode_switch_rejected_while_capturing() {
        let mut output = CaptureOutput::new(CaptureMode::Photo, PhotoSettings::default(), false);
        output.begin_photo().unwrap();
        assert!(output.set_mode(CaptureMode::Movie).is_err());
        assert_eq!(output.mode(), CaptureMode::Photo);
    }

    #[test]
    fn device_config_parked_until_idle() {
        let mut output = CaptureOutput::new(CaptureMode::Movie, PhotoSettings::default(), false);
        output.submit_device_config(config("a", RotationAngle::None));
        output.begin_movie().unwrap();

        assert!(!output.submit_device_config(config("b", RotationAngle::Rotate90)));
        assert!(!output.submit_device_config(config("c", RotationAngle::Rotate180)));
        assert_eq!(output.device_config().unwrap().device_id.as_str(), "a");

        output.finish_movie(Duration::from_secs(1)).unwrap();
        assert_eq!(output.device_config().unwrap().device_id.as_str(), "c");
        assert!(output.pending_device_config().is_none());
        assert_eq!(output.movie().unwrap().last_duration(), Duration::from_secs(1));
    }

    #[test]
    fn photo_requires_photo_output() {
        let mut output = CaptureOutput::new(CaptureMode::Movie, PhotoSettings::default(), false);
        assert!(output.begin_photo().is_err());
        assert!(output.activity().is_idle());
    }
}

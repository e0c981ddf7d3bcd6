// SPDX-License-Identifier: GPL-3.0-only

//! Simulated capture hardware
//!
//! An in-memory device set that behaves like a real session: it acknowledges
//! configuration changes, fires the shutter, times recordings and emits
//! hot-plug events. Used by the test suite and by `--backend simulated`.
//! Failures can be scripted per operation.

use super::types::*;
use super::{CaptureHardware, ShutterSignal};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Capacity of the notification channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct SimState {
    authorized: bool,
    cameras: Vec<Device>,
    microphones: Vec<Device>,
    default_microphone: Option<DeviceId>,
    formats: HashMap<DeviceId, Vec<HardwareFormat>>,
    active: Option<SessionConfig>,
    zoom: f64,
    recording_since: Option<Instant>,
    fail_next_configure: Option<BackendError>,
    fail_next_photo: Option<BackendError>,
    fail_next_start_movie: Option<BackendError>,
    configure_calls: usize,
    start_movie_calls: usize,
    stop_movie_calls: usize,
    last_photo_settings: Option<PhotoSettings>,
}

/// Scriptable in-memory hardware
pub struct SimulatedHardware {
    state: Mutex<SimState>,
    events: broadcast::Sender<HardwareEvent>,
    latency: Duration,
}

impl Default for SimulatedHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHardware {
    /// Hardware with no devices and access granted
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(SimState {
                authorized: true,
                zoom: 1.0,
                ..Default::default()
            }),
            events,
            latency: Duration::ZERO,
        }
    }

    /// A phone-like rig: back wide, back ultra-wide, front and a USB webcam
    pub fn with_demo_devices() -> Self {
        let mut wide = Self::camera("sim:back-wide", "Back Camera", DevicePosition::Back);
        wide.device_type = DeviceType::WideAngle;
        wide.capabilities = DeviceCapabilities {
            supports_live_photo: true,
            supports_hdr: true,
            min_zoom: 1.0,
            max_zoom: 10.0,
            rotation: RotationAngle::Rotate90,
        };

        let mut ultra = Self::camera(
            "sim:back-ultrawide",
            "Back Ultra Wide Camera",
            DevicePosition::Back,
        );
        ultra.device_type = DeviceType::UltraWide;
        ultra.capabilities.max_zoom = 2.0;

        let mut front = Self::camera("sim:front", "Front Camera", DevicePosition::Front);
        front.device_type = DeviceType::WideAngle;
        front.capabilities.supports_live_photo = true;
        front.capabilities.rotation = RotationAngle::Rotate270;

        let mut usb = Self::camera("sim:usb", "USB Webcam", DevicePosition::External);
        usb.device_type = DeviceType::External;

        Self::new()
            .with_camera(
                wide,
                [
                    mode(3840, 2160, &[24, 30, 60]),
                    mode(1920, 1080, &[30, 60, 120, 240]),
                    mode(1280, 720, &[30, 60, 120, 240]),
                ]
                .concat(),
            )
            .with_camera(
                ultra,
                [mode(3840, 2160, &[30]), mode(1920, 1080, &[30, 60])].concat(),
            )
            .with_camera(
                front,
                [mode(1920, 1080, &[30, 60]), mode(1280, 720, &[30, 60])].concat(),
            )
            .with_camera(
                usb,
                [mode(1280, 720, &[30]), mode(640, 480, &[15, 30])].concat(),
            )
            .with_microphone(Self::microphone("sim:mic", "Built-in Microphone"), true)
    }

    /// Camera device with default capabilities
    pub fn camera(id: &str, name: &str, position: DevicePosition) -> Device {
        Device {
            id: DeviceId::new(id),
            name: name.to_string(),
            kind: DeviceKind::Camera,
            position,
            device_type: DeviceType::Unknown,
            capabilities: DeviceCapabilities::default(),
        }
    }

    /// Microphone device
    pub fn microphone(id: &str, name: &str) -> Device {
        Device {
            id: DeviceId::new(id),
            name: name.to_string(),
            kind: DeviceKind::Microphone,
            position: DevicePosition::Unspecified,
            device_type: DeviceType::BuiltInMicrophone,
            capabilities: DeviceCapabilities::default(),
        }
    }

    pub fn with_camera(self, device: Device, formats: Vec<HardwareFormat>) -> Self {
        {
            let mut state = self.state();
            state.formats.insert(device.id.clone(), formats);
            state.cameras.push(device);
        }
        self
    }

    pub fn with_microphone(self, device: Device, is_default: bool) -> Self {
        {
            let mut state = self.state();
            if is_default {
                state.default_microphone = Some(device.id.clone());
            }
            state.microphones.push(device);
        }
        self
    }

    /// Delay applied to every acknowledged hardware operation
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn deny_authorization(self) -> Self {
        self.state().authorized = false;
        self
    }

    // ===== Scripting =====

    pub fn fail_next_configure(&self, err: BackendError) {
        self.state().fail_next_configure = Some(err);
    }

    pub fn fail_next_photo(&self, err: BackendError) {
        self.state().fail_next_photo = Some(err);
    }

    pub fn fail_next_start_movie(&self, err: BackendError) {
        self.state().fail_next_start_movie = Some(err);
    }

    /// Hot-plug a camera and notify subscribers
    pub fn plug_camera(&self, device: Device, formats: Vec<HardwareFormat>) {
        info!(device = %device.name, "Simulated camera plugged");
        {
            let mut state = self.state();
            state.formats.insert(device.id.clone(), formats);
            state.cameras.retain(|c| c.id != device.id);
            state.cameras.push(device);
        }
        self.emit(HardwareEvent::DevicesChanged);
    }

    /// Unplug a camera and notify subscribers
    pub fn unplug_camera(&self, id: &DeviceId) {
        info!(device = %id, "Simulated camera unplugged");
        {
            let mut state = self.state();
            state.cameras.retain(|c| &c.id != id);
            state.formats.remove(id);
        }
        self.emit(HardwareEvent::DevicesChanged);
    }

    /// Grant or revoke access and notify subscribers
    pub fn set_authorized(&self, authorized: bool) {
        self.state().authorized = authorized;
        self.emit(HardwareEvent::AuthorizationChanged { authorized });
    }

    pub fn emit(&self, event: HardwareEvent) {
        // No receivers is fine; nobody is observing yet
        let _ = self.events.send(event);
    }

    // ===== Inspection =====

    pub fn active_config(&self) -> Option<SessionConfig> {
        self.state().active.clone()
    }

    pub fn configure_count(&self) -> usize {
        self.state().configure_calls
    }

    pub fn start_movie_count(&self) -> usize {
        self.state().start_movie_calls
    }

    pub fn stop_movie_count(&self) -> usize {
        self.state().stop_movie_calls
    }

    pub fn is_recording(&self) -> bool {
        self.state().recording_since.is_some()
    }

    pub fn zoom(&self) -> f64 {
        self.state().zoom
    }

    pub fn last_photo_settings(&self) -> Option<PhotoSettings> {
        self.state().last_photo_settings
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn settle(&self) {
        if self.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn ensure_authorized(&self) -> BackendResult<()> {
        if self.state().authorized {
            Ok(())
        } else {
            Err(BackendError::NotAuthorized)
        }
    }
}

/// Raw hardware formats for one resolution, one entry per frame rate
pub fn mode(width: u32, height: u32, fps_list: &[u32]) -> Vec<HardwareFormat> {
    fps_list
        .iter()
        .map(|fps| HardwareFormat {
            width,
            height,
            fps: *fps,
            hardware_accelerated: false,
            pixel_format: "NV12".to_string(),
        })
        .collect()
}

#[async_trait]
impl CaptureHardware for SimulatedHardware {
    fn backend_type(&self) -> HardwareBackendType {
        HardwareBackendType::Simulated
    }

    fn is_simulated(&self) -> bool {
        true
    }

    async fn authorize(&self) -> bool {
        self.state().authorized
    }

    async fn discover(&self, kind: DeviceKind, positions: &[DevicePosition]) -> Vec<Device> {
        let state = self.state();
        let pool = match kind {
            DeviceKind::Camera => &state.cameras,
            DeviceKind::Microphone => &state.microphones,
        };
        pool.iter()
            .filter(|d| positions.is_empty() || positions.contains(&d.position))
            .cloned()
            .collect()
    }

    async fn default_microphone(&self) -> Option<Device> {
        let state = self.state();
        let id = state.default_microphone.as_ref()?;
        state.microphones.iter().find(|m| &m.id == id).cloned()
    }

    async fn formats(&self, device: &DeviceId) -> BackendResult<Vec<HardwareFormat>> {
        self.state()
            .formats
            .get(device)
            .cloned()
            .ok_or_else(|| BackendError::DeviceNotFound(device.to_string()))
    }

    async fn configure(&self, config: &SessionConfig) -> BackendResult<()> {
        self.ensure_authorized()?;
        self.settle().await;

        let mut state = self.state();
        state.configure_calls += 1;
        if let Some(err) = state.fail_next_configure.take() {
            debug!(%err, "Simulated configure failure");
            return Err(err);
        }
        let Some(formats) = state.formats.get(&config.camera) else {
            return Err(BackendError::AddInputFailed(format!(
                "{} is not connected",
                config.camera
            )));
        };
        if !formats.contains(&config.format) {
            return Err(BackendError::FormatNotSupported(config.format.to_string()));
        }
        state.zoom = config.zoom;
        state.active = Some(config.clone());
        debug!(camera = %config.camera, format = %config.format, "Simulated session configured");
        Ok(())
    }

    async fn set_zoom(&self, factor: f64) -> BackendResult<f64> {
        self.settle().await;
        let mut state = self.state();
        if state.active.is_none() {
            return Err(BackendError::Other("session not configured".to_string()));
        }
        state.zoom = factor;
        Ok(factor)
    }

    async fn capture_photo(
        &self,
        settings: &PhotoSettings,
        shutter: ShutterSignal,
    ) -> BackendResult<RawPhoto> {
        self.ensure_authorized()?;
        let format = {
            let mut state = self.state();
            state.last_photo_settings = Some(*settings);
            if let Some(err) = state.fail_next_photo.take() {
                return Err(err);
            }
            state
                .active
                .as_ref()
                .map(|c| c.format.clone())
                .ok_or_else(|| BackendError::Other("session not configured".to_string()))?
        };

        self.settle().await;
        let _ = shutter.send(());
        self.settle().await;

        let data: Arc<[u8]> = Arc::from(vec![0u8; 64]);
        Ok(RawPhoto {
            width: format.width,
            height: format.height,
            pixel_format: format.pixel_format,
            data,
        })
    }

    async fn start_movie(&self) -> BackendResult<()> {
        self.ensure_authorized()?;
        self.settle().await;
        let mut state = self.state();
        state.start_movie_calls += 1;
        if let Some(err) = state.fail_next_start_movie.take() {
            return Err(err);
        }
        if state.active.is_none() {
            return Err(BackendError::AddOutputFailed(
                "session not configured".to_string(),
            ));
        }
        if state.recording_since.is_some() {
            return Err(BackendError::RecordingInProgress);
        }
        state.recording_since = Some(Instant::now());
        Ok(())
    }

    async fn stop_movie(&self) -> BackendResult<RawMovie> {
        self.settle().await;
        let mut state = self.state();
        state.stop_movie_calls += 1;
        let started = state
            .recording_since
            .take()
            .ok_or(BackendError::NoRecordingInProgress)?;
        Ok(RawMovie {
            duration: started.elapsed(),
            data: Arc::from(vec![0u8; 128]),
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<HardwareEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discover_filters_by_position() {
        let hw = SimulatedHardware::with_demo_devices();
        let back = hw
            .discover(DeviceKind::Camera, &[DevicePosition::Back])
            .await;
        assert_eq!(back.len(), 2);
        assert!(back.iter().all(|d| d.position == DevicePosition::Back));

        let mics = hw.discover(DeviceKind::Microphone, &[]).await;
        assert_eq!(mics.len(), 1);
        assert!(hw.default_microphone().await.is_some());
    }

    #[tokio::test]
    async fn configure_rejects_unknown_format() {
        let hw = SimulatedHardware::with_demo_devices();
        let config = SessionConfig {
            camera: DeviceId::new("sim:usb"),
            microphone: None,
            format: HardwareFormat {
                width: 3840,
                height: 2160,
                fps: 30,
                hardware_accelerated: false,
                pixel_format: "NV12".into(),
            },
            zoom: 1.0,
        };
        assert!(matches!(
            hw.configure(&config).await,
            Err(BackendError::FormatNotSupported(_))
        ));
        assert!(hw.active_config().is_none());
    }

    #[tokio::test]
    async fn scripted_failure_is_consumed_once() {
        let hw = SimulatedHardware::with_demo_devices();
        let config = SessionConfig {
            camera: DeviceId::new("sim:usb"),
            microphone: None,
            format: mode(1280, 720, &[30]).remove(0),
            zoom: 1.0,
        };
        hw.fail_next_configure(BackendError::AddInputFailed("busy".into()));
        assert!(hw.configure(&config).await.is_err());
        assert!(hw.configure(&config).await.is_ok());
        assert_eq!(hw.configure_count(), 2);
    }

    #[tokio::test]
    async fn movie_requires_configured_session() {
        let hw = SimulatedHardware::with_demo_devices();
        assert!(hw.start_movie().await.is_err());
        assert!(matches!(
            hw.stop_movie().await,
            Err(BackendError::NoRecordingInProgress)
        ));
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! The coordinator task
//!
//! One task owns every piece of mutable session state and handles commands,
//! hardware events and the recording tick from a single `select!` loop, so
//! no two reconfigurations or capture transitions ever overlap.
//!
//! Reconfiguring commands compute the next configuration first, wait for
//! the hardware to acknowledge it and only then commit. A failed command
//! leaves the catalogs, selection, zoom and output exactly as they were.

use super::state::{CameraStatus, SessionSnapshot};
use super::{CaptureOutcome, Command, SessionHandle};
use crate::backends::{
    BackendError, CaptureHardware, Device, DeviceId, HardwareEvent, MovieArtifact, PhotoArtifact,
    PhotoSettings, RotationAngle, SessionConfig,
};
use crate::capture::{CaptureMode, CaptureOutput, DeviceConfig, OutputCoordinator};
use crate::catalog::{DeviceCatalog, FormatCatalog, FormatId, Selection, initialize_selection};
use crate::catalog::{coerce_fps, fps_options};
use crate::config::{Config, PreferenceStore};
use crate::errors::{CaptureError, CaptureResult};
use chrono::Local;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Entry point for starting a capture session
pub struct CaptureSession;

impl CaptureSession {
    /// Discover devices and spawn the coordinator task
    ///
    /// Fails only when the deployment cannot run at all
    /// ([`CaptureError::NoCamerasPresent`]). Setup of the default camera
    /// happens on the task; await [`SessionHandle::ready`] for its outcome.
    pub async fn start<H>(
        hardware: Arc<H>,
        store: Arc<dyn PreferenceStore>,
        config: &Config,
    ) -> CaptureResult<SessionHandle>
    where
        H: CaptureHardware + ?Sized,
    {
        info!(backend = %hardware.backend_type(), "Starting capture session");

        // Subscribe before discovery so no hot-plug is missed
        let events = hardware.subscribe();
        let devices = DeviceCatalog::discover(hardware.as_ref(), store.as_ref()).await?;

        let (command_tx, command_rx) = mpsc::channel(config.command_queue_depth());
        let (status_tx, status_rx) = watch::channel(CameraStatus::Unknown);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let photo_settings = PhotoSettings {
            live_photo: config.live_photo,
            quality: config.quality,
        };
        let output = CaptureOutput::new(CaptureMode::Photo, photo_settings, config.record_audio);
        let activity_rx = output.subscribe_activity();
        let capabilities_rx = output.subscribe_capabilities();

        let coordinator = Coordinator {
            hardware,
            store,
            devices,
            formats: FormatCatalog::default(),
            selection: Selection::default(),
            device: None,
            zoom: 1.0,
            output,
            record_audio: config.record_audio,
            recording_started: None,
            catalog_dirty: false,
            last_error: None,
            status: status_tx,
            snapshot: snapshot_tx,
        };

        tokio::spawn(coordinator.run(command_rx, events, config.recording_tick()));

        Ok(SessionHandle {
            commands: command_tx,
            status: status_rx,
            activity: activity_rx,
            capabilities: capabilities_rx,
            snapshot: snapshot_rx,
            stop_pending: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Which error kind a failed hardware reconfiguration maps to
#[derive(Debug, Clone, Copy)]
enum Phase {
    Setup,
    DeviceChange,
}

impl Phase {
    fn map(self, err: BackendError) -> CaptureError {
        match self {
            Phase::Setup => CaptureError::setup(err),
            Phase::DeviceChange => CaptureError::device_change(err),
        }
    }
}

/// A configuration the hardware acknowledged, ready to commit
struct Prepared {
    device: Device,
    formats: FormatCatalog,
    selection: Selection,
    zoom: f64,
}

struct Coordinator<H: ?Sized> {
    hardware: Arc<H>,
    store: Arc<dyn PreferenceStore>,
    devices: DeviceCatalog,
    formats: FormatCatalog,
    selection: Selection,
    /// Device the hardware session runs on
    device: Option<Device>,
    zoom: f64,
    output: CaptureOutput,
    record_audio: bool,
    recording_started: Option<Instant>,
    /// Hot-plug arrived during a capture; re-derive once idle
    catalog_dirty: bool,
    last_error: Option<CaptureError>,
    status: watch::Sender<CameraStatus>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl<H> Coordinator<H>
where
    H: CaptureHardware + ?Sized,
{
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: broadcast::Receiver<HardwareEvent>,
        recording_tick: Duration,
    ) {
        self.initial_setup().await;

        let mut tick = tokio::time::interval(recording_tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut events_open = true;

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!("All session handles dropped");
                        break;
                    };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                event = events.recv(), if events_open => match event {
                    Ok(event) => self.handle_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Hardware events lagged, resynchronizing");
                        self.on_devices_changed().await;
                    }
                    Err(RecvError::Closed) => {
                        debug!("Hardware event channel closed");
                        events_open = false;
                    }
                },
                _ = tick.tick() => self.on_tick(),
            }
        }

        if self.output.activity().is_recording() {
            if let Err(e) = self.hardware.stop_movie().await {
                warn!(error = %e, "Failed to stop recording on exit");
            }
        }
        info!("Capture session ended");
    }

    // ===== Publishing =====

    fn set_status(&self, status: CameraStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            info!(%status, "Camera status");
        }
    }

    fn fail(&mut self, err: CaptureError) {
        error!(error = %err, "Capture session failed");
        self.last_error = Some(err);
        self.set_status(CameraStatus::Failed);
        self.publish();
    }

    fn publish(&self) {
        let photo = self.output.photo();
        let snapshot = SessionSnapshot {
            device: self.device.clone(),
            cameras: self.devices.list_cameras().values().cloned().collect(),
            microphones: self.devices.microphones().to_vec(),
            formats: self.formats.formats().to_vec(),
            grouped_formats: self.formats.grouped(),
            fps_options: self
                .selection
                .selected_format_id
                .as_ref()
                .map(|id| self.formats.fps_options_for(id))
                .unwrap_or_default(),
            selection: self.selection.clone(),
            zoom: self.zoom,
            mode: self.output.mode(),
            live_photo: photo.is_some_and(|p| p.live_photo_requested()),
            quality: photo.map(|p| p.quality()).unwrap_or_default(),
            last_error: self.last_error.clone(),
        };
        self.snapshot.send_replace(snapshot);
    }

    // ===== Setup and reconfiguration =====

    async fn initial_setup(&mut self) {
        if !self.hardware.authorize().await {
            warn!("Camera access not authorized");
            self.set_status(CameraStatus::Unauthorized);
            self.publish();
            return;
        }
        self.setup_default_camera(Phase::Setup).await;
    }

    /// Bring the session up on the default camera
    async fn setup_default_camera(&mut self, phase: Phase) {
        let device = match self.devices.default_camera() {
            Ok(device) => device.clone(),
            Err(e) => {
                self.clear_device();
                self.fail(e);
                return;
            }
        };
        let prior = self.selection.clone();
        match self.prepare(device, &prior, phase).await {
            Ok(prepared) => self.commit(prepared),
            Err(e) => self.fail(e),
        }
    }

    fn clear_device(&mut self) {
        self.device = None;
        self.formats = FormatCatalog::default();
        self.selection = Selection::default();
    }

    /// Fetch formats, derive the selection and let the hardware acknowledge it
    async fn prepare(
        &self,
        device: Device,
        prior: &Selection,
        phase: Phase,
    ) -> CaptureResult<Prepared> {
        let modes = self
            .hardware
            .formats(&device.id)
            .await
            .map_err(|e| phase.map(e))?;
        let formats = FormatCatalog::from_hardware(&modes);
        let selection = initialize_selection(prior, formats.formats());
        let zoom = if self.device.as_ref().is_some_and(|d| d.id == device.id) {
            device.capabilities.clamp_zoom(self.zoom)
        } else {
            device.capabilities.min_zoom
        };

        self.configure(&device, &formats, &selection, zoom, phase)
            .await?;
        Ok(Prepared {
            device,
            formats,
            selection,
            zoom,
        })
    }

    async fn configure(
        &self,
        device: &Device,
        formats: &FormatCatalog,
        selection: &Selection,
        zoom: f64,
        phase: Phase,
    ) -> CaptureResult<()> {
        let format = formats.resolve_selection(selection).ok_or_else(|| {
            phase.map(BackendError::FormatNotSupported(format!(
                "{} offers no usable format",
                device.name
            )))
        })?;
        let microphone = if self.record_audio {
            self.devices.default_microphone().ok().map(|m| m.id.clone())
        } else {
            None
        };
        let config = SessionConfig {
            camera: device.id.clone(),
            microphone,
            format,
            zoom,
        };
        debug!(camera = %device.name, format = %config.format, zoom, "Configuring hardware");
        self.hardware
            .configure(&config)
            .await
            .map_err(|e| phase.map(e))
    }

    fn commit(&mut self, prepared: Prepared) {
        let Prepared {
            device,
            formats,
            selection,
            zoom,
        } = prepared;

        self.output
            .update_device_features(&device.capabilities, selection.selected_fps);
        self.output.submit_device_config(DeviceConfig {
            device_id: device.id.clone(),
            rotation: device.capabilities.rotation,
        });

        info!(
            camera = %device.name,
            format = ?selection.selected_format_id,
            fps = ?selection.selected_fps,
            "Capture session configured"
        );
        self.device = Some(device);
        self.formats = formats;
        self.selection = selection;
        self.zoom = zoom;
        self.last_error = None;
        self.set_status(CameraStatus::Running);
        self.publish();
    }

    /// Apply a new selection on the current device
    async fn reselect(&mut self, selection: Selection) -> CaptureResult<()> {
        let device = self
            .device
            .clone()
            .ok_or(CaptureError::VideoDeviceUnavailable)?;
        self.configure(
            &device,
            &self.formats,
            &selection,
            self.zoom,
            Phase::DeviceChange,
        )
        .await?;

        self.output
            .update_device_features(&device.capabilities, selection.selected_fps);
        info!(format = ?selection.selected_format_id, fps = ?selection.selected_fps, "Format changed");
        self.selection = selection;
        self.last_error = None;
        self.set_status(CameraStatus::Running);
        self.publish();
        Ok(())
    }

    /// Re-derive device and selection after the device catalog changed
    async fn on_catalog_changed(&mut self) {
        if !self.output.activity().is_idle() {
            debug!("Capture in progress, deferring catalog update");
            self.catalog_dirty = true;
            return;
        }
        self.catalog_dirty = false;

        if *self.status.borrow() == CameraStatus::Unauthorized {
            self.publish();
            return;
        }

        // Rotation follows RotationChanged events rather than discovery
        let current = self.device.as_ref().and_then(|live| {
            self.devices.camera(&live.id).map(|found| {
                let mut device = found.clone();
                device.capabilities.rotation = live.capabilities.rotation;
                device
            })
        });

        let Some(active) = current else {
            if let Some(lost) = &self.device {
                warn!(camera = %lost.name, "Active camera disappeared");
            }
            self.setup_default_camera(Phase::DeviceChange).await;
            return;
        };

        let prior = self.selection.clone();

        // A returning preferred camera takes over from the fallback
        let preferred = self
            .devices
            .preferred_camera()
            .and_then(|id| self.devices.camera(id))
            .filter(|d| d.id != active.id)
            .cloned();
        if let Some(preferred) = preferred {
            info!(camera = %preferred.name, "Switching to preferred camera");
            match self.prepare(preferred, &prior, Phase::DeviceChange).await {
                Ok(prepared) => self.commit(prepared),
                Err(e) => self.keep_configuration(e),
            }
            return;
        }

        if self.is_unchanged(&active).await {
            debug!(camera = %active.name, "Active camera unchanged");
            self.publish();
            return;
        }

        match self.prepare(active, &prior, Phase::DeviceChange).await {
            Ok(prepared) => self.commit(prepared),
            Err(e) => self.keep_configuration(e),
        }
    }

    /// Whether the running configuration still matches what the device offers
    async fn is_unchanged(&self, device: &Device) -> bool {
        if *self.status.borrow() == CameraStatus::Failed || self.device.as_ref() != Some(device) {
            return false;
        }
        match self.hardware.formats(&device.id).await {
            Ok(modes) => FormatCatalog::from_hardware(&modes) == self.formats,
            Err(e) => {
                debug!(camera = %device.name, error = %e, "Failed to re-read formats");
                false
            }
        }
    }

    /// The hardware still runs the last committed configuration
    fn keep_configuration(&mut self, err: CaptureError) {
        warn!(error = %err, "Reconfiguration failed, keeping current camera");
        self.last_error = Some(err);
        self.publish();
    }

    fn ensure_idle(&self) -> CaptureResult<()> {
        if self.output.activity().is_idle() {
            Ok(())
        } else {
            Err(CaptureError::CaptureInProgress)
        }
    }

    fn ensure_capture_ready(&self) -> CaptureResult<&Device> {
        match *self.status.borrow() {
            CameraStatus::Unauthorized => return Err(CaptureError::NotAuthorized),
            CameraStatus::Running => {}
            status => {
                return Err(CaptureError::CaptureFailed(format!(
                    "camera is {status}"
                )));
            }
        }
        self.device
            .as_ref()
            .ok_or(CaptureError::VideoDeviceUnavailable)
    }

    async fn after_idle(&mut self) {
        if self.catalog_dirty {
            self.on_catalog_changed().await;
        }
    }

    // ===== Commands =====

    /// Returns false when the loop should end
    async fn handle_command(&mut self, command: Command) -> bool {
        debug!(command = command.name(), "Handling command");
        match command {
            Command::SelectDevice { id, reply } => {
                let _ = reply.send(self.select_device(id).await);
            }
            Command::SetZoom { factor, reply } => {
                let _ = reply.send(self.set_zoom(factor).await);
            }
            Command::SetFormat { id, reply } => {
                let _ = reply.send(self.set_format(id).await);
            }
            Command::SetFrameRate { fps, reply } => {
                let _ = reply.send(self.set_frame_rate(fps).await);
            }
            Command::StartCapture { mode, reply } => {
                let result = match mode {
                    CaptureMode::Photo => self.capture_photo().await.map(CaptureOutcome::Photo),
                    CaptureMode::Movie => self
                        .start_recording()
                        .await
                        .map(|()| CaptureOutcome::RecordingStarted),
                };
                let _ = reply.send(result);
            }
            Command::StopCapture { reply } => {
                let _ = reply.send(self.stop_recording().await);
            }
            Command::CapturePhoto { reply } => {
                let _ = reply.send(self.capture_photo().await);
            }
            Command::SetCaptureMode { mode, reply } => {
                let _ = reply.send(self.set_capture_mode(mode));
            }
            Command::SetLivePhoto { enabled, reply } => {
                self.output.set_live_photo(enabled);
                self.publish();
                let _ = reply.send(Ok(()));
            }
            Command::SetQuality { quality, reply } => {
                self.output.set_quality(quality);
                self.publish();
                let _ = reply.send(Ok(()));
            }
            Command::RefreshDevices { reply } => {
                self.on_devices_changed().await;
                let _ = reply.send(Ok(()));
            }
            Command::Shutdown { reply } => {
                if self.output.activity().is_recording() {
                    if let Err(e) = self.stop_recording().await {
                        warn!(error = %e, "Failed to stop recording on shutdown");
                    }
                }
                let _ = reply.send(Ok(()));
                return false;
            }
        }
        true
    }

    async fn select_device(&mut self, id: DeviceId) -> CaptureResult<()> {
        self.ensure_idle()?;
        let device = self
            .devices
            .camera(&id)
            .cloned()
            .ok_or_else(|| CaptureError::UnknownDevice(id.to_string()))?;

        let already_active = self.device.as_ref().is_some_and(|d| d.id == id)
            && *self.status.borrow() == CameraStatus::Running;
        if !already_active {
            let prior = self.selection.clone();
            let prepared = self.prepare(device, &prior, Phase::DeviceChange).await?;
            self.commit(prepared);
        }

        if let Err(e) = self.devices.set_preferred_camera(&id, self.store.as_ref()) {
            warn!(error = %e, "Failed to persist preferred camera");
        }
        self.publish();
        Ok(())
    }

    async fn set_zoom(&mut self, factor: f64) -> CaptureResult<f64> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(CaptureError::InvalidZoom(factor));
        }
        let device = self
            .device
            .as_ref()
            .ok_or(CaptureError::VideoDeviceUnavailable)?;
        let clamped = device.capabilities.clamp_zoom(factor);
        let applied = self
            .hardware
            .set_zoom(clamped)
            .await
            .map_err(CaptureError::device_change)?;

        debug!(requested = factor, applied, "Zoom set");
        self.zoom = applied;
        self.publish();
        Ok(applied)
    }

    async fn set_format(&mut self, id: FormatId) -> CaptureResult<()> {
        self.ensure_idle()?;
        let format = self
            .formats
            .find(&id)
            .ok_or_else(|| CaptureError::UnknownFormat(id.to_string()))?;
        let fps = coerce_fps(self.selection.selected_fps, &fps_options(format));
        let selection = Selection {
            selected_format_id: Some(id),
            selected_fps: fps,
        };
        if selection == self.selection {
            return Ok(());
        }
        self.reselect(selection).await
    }

    async fn set_frame_rate(&mut self, fps: u32) -> CaptureResult<()> {
        self.ensure_idle()?;
        let id = self
            .selection
            .selected_format_id
            .clone()
            .ok_or(CaptureError::VideoDeviceUnavailable)?;
        let supported = self.formats.find(&id).is_some_and(|f| f.supports_fps(fps));
        if !supported {
            return Err(CaptureError::UnsupportedFrameRate(fps));
        }
        if self.selection.selected_fps == Some(fps) {
            return Ok(());
        }
        self.reselect(Selection::new(id, fps)).await
    }

    fn set_capture_mode(&mut self, mode: CaptureMode) -> CaptureResult<()> {
        self.ensure_idle()?;
        self.output.set_mode(mode)?;
        self.publish();
        Ok(())
    }

    async fn capture_photo(&mut self) -> CaptureResult<PhotoArtifact> {
        self.ensure_idle()?;
        let device_id = self.ensure_capture_ready()?.id.clone();
        let previous_mode = self.output.mode();
        self.output.set_mode(CaptureMode::Photo)?;

        let settings = self.output.begin_photo()?;
        let (shutter_tx, mut shutter_rx) = oneshot::channel();
        let hardware = Arc::clone(&self.hardware);
        let capture = async move { hardware.capture_photo(&settings, shutter_tx).await };
        tokio::pin!(capture);

        let mut shutter_done = false;
        let result = loop {
            tokio::select! {
                result = &mut capture => break result,
                fired = &mut shutter_rx, if !shutter_done => {
                    shutter_done = true;
                    if fired.is_ok() {
                        let _ = self.output.shutter_fired();
                    }
                }
            }
        };
        if !shutter_done && shutter_rx.try_recv().is_ok() {
            let _ = self.output.shutter_fired();
        }

        self.output.finish_photo()?;
        if result.is_err() {
            let _ = self.output.set_mode(previous_mode);
        }
        self.publish();
        self.after_idle().await;

        let raw = result.map_err(CaptureError::capture)?;
        info!(
            width = raw.width,
            height = raw.height,
            live = settings.live_photo,
            "Photo captured"
        );
        Ok(PhotoArtifact {
            id: Uuid::new_v4(),
            device_id,
            width: raw.width,
            height: raw.height,
            pixel_format: raw.pixel_format,
            is_live_photo: settings.live_photo,
            data: raw.data,
            captured_at: Local::now(),
        })
    }

    async fn start_recording(&mut self) -> CaptureResult<()> {
        self.ensure_idle()?;
        self.ensure_capture_ready()?;
        if self.record_audio {
            self.devices.default_microphone()?;
        }

        let previous_mode = self.output.mode();
        self.output.set_mode(CaptureMode::Movie)?;

        if let Err(e) = self.hardware.start_movie().await {
            // Put the previous output back
            let _ = self.output.set_mode(previous_mode);
            return Err(CaptureError::capture(e));
        }

        self.output.begin_movie()?;
        self.recording_started = Some(Instant::now());
        info!("Recording started");
        self.publish();
        Ok(())
    }

    async fn stop_recording(&mut self) -> CaptureResult<Option<MovieArtifact>> {
        if !self.output.activity().is_recording() {
            debug!("Stop requested while not recording");
            return Ok(None);
        }
        let Some(device_id) = self.device.as_ref().map(|d| d.id.clone()) else {
            return Err(CaptureError::VideoDeviceUnavailable);
        };

        let elapsed = self
            .recording_started
            .map(|started| started.elapsed())
            .unwrap_or_default();

        let raw = match self.hardware.stop_movie().await {
            Ok(raw) => raw,
            Err(BackendError::NoRecordingInProgress) => {
                // Hardware already stopped on its own
                self.recording_started = None;
                self.output.finish_movie(elapsed)?;
                self.publish();
                self.after_idle().await;
                return Err(CaptureError::capture(BackendError::NoRecordingInProgress));
            }
            Err(e) => return Err(CaptureError::capture(e)),
        };

        self.recording_started = None;
        self.output.finish_movie(raw.duration)?;
        let duration = self
            .output
            .movie()
            .map(|m| m.last_duration())
            .unwrap_or(raw.duration);
        info!(duration_ms = duration.as_millis() as u64, "Recording finished");
        self.publish();
        self.after_idle().await;

        Ok(Some(MovieArtifact {
            id: Uuid::new_v4(),
            device_id,
            duration,
            data: raw.data,
            finished_at: Local::now(),
        }))
    }

    // ===== Hardware events =====

    async fn handle_event(&mut self, event: HardwareEvent) {
        debug!(?event, "Hardware event");
        match event {
            HardwareEvent::DevicesChanged => self.on_devices_changed().await,
            HardwareEvent::Interrupted => {
                if *self.status.borrow() == CameraStatus::Running {
                    self.set_status(CameraStatus::Interrupted);
                }
            }
            HardwareEvent::InterruptionEnded => {
                if *self.status.borrow() == CameraStatus::Interrupted {
                    self.set_status(CameraStatus::Running);
                }
            }
            HardwareEvent::AuthorizationChanged { authorized: false } => {
                self.set_status(CameraStatus::Unauthorized);
                self.publish();
            }
            HardwareEvent::AuthorizationChanged { authorized: true } => {
                if *self.status.borrow() != CameraStatus::Running && self.output.activity().is_idle()
                {
                    info!("Camera access granted, setting up");
                    self.setup_default_camera(Phase::Setup).await;
                }
            }
            HardwareEvent::RecordingProgress { elapsed } => {
                if self.output.activity().is_recording() {
                    let _ = self.output.advance_movie(elapsed);
                }
            }
            HardwareEvent::RotationChanged { device, rotation } => {
                self.on_rotation_changed(device, rotation);
            }
        }
    }

    async fn on_devices_changed(&mut self) {
        let changed = self
            .devices
            .refresh(self.hardware.as_ref(), self.store.as_ref())
            .await;
        debug!(default_changed = changed, "Devices changed");
        self.on_catalog_changed().await;
    }

    fn on_rotation_changed(&mut self, id: DeviceId, rotation: RotationAngle) {
        let Some(device) = self.device.as_mut().filter(|d| d.id == id) else {
            return;
        };
        device.capabilities.rotation = rotation;
        let applied = self.output.submit_device_config(DeviceConfig {
            device_id: id,
            rotation,
        });
        debug!(%rotation, applied, "Sensor rotation changed");
        self.publish();
    }

    fn on_tick(&mut self) {
        if let Some(started) = self.recording_started {
            let _ = self.output.advance_movie(started.elapsed());
        }
    }
}

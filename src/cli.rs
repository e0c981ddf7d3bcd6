// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for camera operations
//!
//! This module provides command-line functionality for:
//! - Listing available cameras and microphones
//! - Showing and selecting formats
//! - Taking photos
//! - Recording videos
//!
//! Captured payloads are described, never written to disk.

use camera_session::backends::{
    CaptureHardware, DeviceId, HardwareBackendType, get_backend_for_type,
};
use camera_session::catalog::{DeviceCatalog, FormatCatalog, fps_options};
use camera_session::config::{FilePreferenceStore, MemoryPreferenceStore, PreferenceStore};
use camera_session::{
    CameraStatus, CaptureActivity, CaptureMode, CaptureOutcome, CaptureSession, Config, FormatId,
    SessionHandle,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::warn;

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Options shared by every subcommand
pub struct SessionOptions {
    pub backend: Option<HardwareBackendType>,
    pub config: Option<PathBuf>,
}

impl SessionOptions {
    fn load_config(&self) -> Result<Config, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => match Config::default_path() {
                Ok(path) => Config::load(&path)?,
                Err(e) => {
                    warn!(error = %e, "Using default configuration");
                    Config::default()
                }
            },
        };
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        Ok(config)
    }
}

fn open_store() -> Arc<dyn PreferenceStore> {
    match FilePreferenceStore::open_default() {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(error = %e, "Device preferences will not persist");
            Arc::new(MemoryPreferenceStore::new())
        }
    }
}

/// Start a session and wait for it to come up
async fn open_session(
    config: &Config,
    camera: Option<String>,
) -> Result<SessionHandle, Box<dyn std::error::Error>> {
    let hardware = get_backend_for_type(config.backend)?;
    let session = CaptureSession::start(hardware, open_store(), config).await?;

    let status = session.ready().await?;
    if status == CameraStatus::Unauthorized {
        return Err("Camera access not authorized".into());
    }

    if let Some(id) = camera {
        session.select_device(DeviceId::new(id)).await?;
    } else if status != CameraStatus::Running {
        let reason = session
            .current()
            .last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| status.to_string());
        return Err(format!("Camera not ready: {reason}").into());
    }

    Ok(session)
}

/// List all available cameras
pub async fn list_devices(options: &SessionOptions) -> CliResult {
    let config = options.load_config()?;
    let hardware = get_backend_for_type(config.backend)?;
    let store = open_store();
    let catalog = DeviceCatalog::discover(hardware.as_ref(), store.as_ref()).await?;

    if catalog.list_cameras().is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    let default = catalog.default_camera().ok().map(|d| d.id.clone());

    println!("Available cameras ({} backend):", hardware.backend_type());
    println!();
    for (name, camera) in catalog.list_cameras() {
        let marker = if Some(&camera.id) == default.as_ref() {
            "*"
        } else {
            " "
        };
        println!("  {marker} {name} [{}] ({})", camera.id, camera.position);

        let formats = match hardware.formats(&camera.id).await {
            Ok(modes) => FormatCatalog::from_hardware(&modes),
            Err(e) => {
                println!("      Formats unavailable: {e}");
                continue;
            }
        };

        // Show top 3 groups
        let summary: Vec<String> = formats
            .grouped()
            .iter()
            .take(3)
            .map(|(label, f)| format!("{label}@{}fps", f.max_fps()))
            .collect();
        if !summary.is_empty() {
            println!("      Formats: {}", summary.join(", "));
        }
    }

    println!();
    match catalog.default_microphone() {
        Ok(mic) => println!("Default microphone: {} [{}]", mic.name, mic.id),
        Err(_) => println!("No default microphone."),
    }

    Ok(())
}

/// Show grouped formats and frame rates of a camera
pub async fn show_formats(options: &SessionOptions, camera: Option<String>) -> CliResult {
    let config = options.load_config()?;
    let session = open_session(&config, camera).await?;
    let snapshot = session.current();

    if let Some(device) = &snapshot.device {
        println!("Formats of {} [{}]:", device.name, device.id);
    }
    println!();

    for (label, format) in &snapshot.grouped_formats {
        let selected = snapshot.selection.selected_format_id.as_ref() == Some(&format.id());
        let fps: Vec<String> = fps_options(format)
            .iter()
            .map(|fps| {
                if selected && snapshot.selection.selected_fps == Some(*fps) {
                    format!("[{fps}]")
                } else {
                    fps.to_string()
                }
            })
            .collect();
        println!(
            "  {} {label:<10} {}  fps: {}",
            if selected { "*" } else { " " },
            format.id(),
            fps.join(", ")
        );
    }

    session.shutdown().await?;
    Ok(())
}

/// Take a photo using the specified camera
pub async fn take_photo(
    options: &SessionOptions,
    camera: Option<String>,
    format: Option<String>,
    fps: Option<u32>,
    live: bool,
) -> CliResult {
    let config = options.load_config()?;
    let session = open_session(&config, camera).await?;

    if let Some(id) = format {
        session.set_format(FormatId::new(id)).await?;
    }
    if let Some(fps) = fps {
        session.set_frame_rate(fps).await?;
    }
    if live {
        session.set_live_photo(true).await?;
    }

    let snapshot = session.current();
    if let Some(device) = &snapshot.device {
        println!("Using camera: {}", device.name);
    }
    if let Some(format) = snapshot.selected_format() {
        println!(
            "Capture format: {} @ {}fps",
            format,
            snapshot.selection.selected_fps.unwrap_or_default()
        );
    }

    println!("Capturing...");
    let photo = match session.start_capture(CaptureMode::Photo).await? {
        CaptureOutcome::Photo(photo) => photo,
        CaptureOutcome::RecordingStarted => return Err("Unexpected recording".into()),
    };

    println!(
        "Photo {}: {}x{} {} ({} bytes{})",
        photo.id,
        photo.width,
        photo.height,
        photo.pixel_format,
        photo.data.len(),
        if photo.is_live_photo { ", live" } else { "" }
    );

    session.shutdown().await?;
    Ok(())
}

/// Why [`follow_recording`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordingEnd {
    Deadline,
    Interrupted,
    SessionClosed,
}

/// Print the running duration until the deadline passes or `stop` fires
async fn follow_recording(
    mut activity: watch::Receiver<CaptureActivity>,
    duration: Duration,
    stop: impl Future<Output = ()>,
) -> RecordingEnd {
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = &mut deadline => return RecordingEnd::Deadline,
            _ = &mut stop => return RecordingEnd::Interrupted,
            changed = activity.changed() => {
                if changed.is_err() {
                    return RecordingEnd::SessionClosed;
                }
                if let CaptureActivity::MovieCapture { duration } = *activity.borrow_and_update() {
                    print!("\r  {:.1}s", duration.as_secs_f64());
                    let _ = std::io::stdout().flush();
                }
            }
        }
    }
}

/// Record a video
pub async fn record_video(
    options: &SessionOptions,
    camera: Option<String>,
    duration_secs: u64,
    audio: bool,
) -> CliResult {
    let mut config = options.load_config()?;
    config.record_audio |= audio;
    let session = open_session(&config, camera).await?;

    if let Some(device) = &session.current().device {
        println!("Using camera: {}", device.name);
    }

    session.start_capture(CaptureMode::Movie).await?;
    println!("Recording for {duration_secs} seconds... (Ctrl+C to stop early)");

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };
    if follow_recording(session.activity(), Duration::from_secs(duration_secs), ctrl_c).await
        == RecordingEnd::Interrupted
    {
        println!();
        println!("Stopping...");
    }
    println!();

    match session.stop_capture().await? {
        Some(movie) => println!(
            "Movie {}: {:.1}s ({} bytes)",
            movie.id,
            movie.duration.as_secs_f64(),
            movie.data.len()
        ),
        None => println!("Recording had already stopped."),
    }

    session.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Keep the activity channel busy until the receiver goes away
    fn pump(tx: watch::Sender<CaptureActivity>) {
        tokio::spawn(async move {
            let mut elapsed = Duration::ZERO;
            loop {
                elapsed += Duration::from_millis(2);
                if tx.send(CaptureActivity::MovieCapture { duration: elapsed }).is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        });
    }

    #[tokio::test]
    async fn stop_signal_survives_activity_updates() {
        let (tx, rx) = watch::channel(CaptureActivity::Idle);
        pump(tx);

        let stop = tokio::time::sleep(Duration::from_millis(50));
        let end = follow_recording(rx, Duration::from_secs(10), stop).await;
        assert_eq!(end, RecordingEnd::Interrupted);
    }

    #[tokio::test]
    async fn deadline_ends_recording() {
        let (tx, rx) = watch::channel(CaptureActivity::Idle);
        pump(tx);

        let end = follow_recording(rx, Duration::from_millis(30), std::future::pending()).await;
        assert_eq!(end, RecordingEnd::Deadline);
    }

    #[tokio::test]
    async fn closed_session_ends_recording() {
        let (tx, rx) = watch::channel(CaptureActivity::Idle);
        drop(tx);

        let end = follow_recording(rx, Duration::from_secs(10), std::future::pending()).await;
        assert_eq!(end, RecordingEnd::SessionClosed);
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 capture hardware
//!
//! Scans `/dev/video*` for capture-capable nodes, probes their discrete
//! frame sizes and intervals, applies formats and grabs single frames for
//! still capture. Movie recording needs an encoder pipeline, which is not
//! part of this backend, so `start_movie` reports `NotSupported`.
//!
//! V4L2 has no notion of front/back placement: USB devices are reported as
//! external, everything else as unspecified.

use super::types::{
    BackendError, BackendResult, Device, DeviceCapabilities, DeviceId, DeviceKind,
    DevicePosition, DeviceType, HardwareBackendType, HardwareEvent, HardwareFormat,
    PhotoSettings, RawMovie, RawPhoto, SessionConfig,
};
use super::{CaptureHardware, ShutterSignal};
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use v4l::Device as V4lDevice;
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::video::capture::Parameters;

/// Capacity of the notification channel
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Buffers requested for still capture streams
const STILL_CAPTURE_BUFFERS: u32 = 4;

/// Frames dropped before the kept still, letting auto exposure settle
const STILL_CAPTURE_WARMUP_FRAMES: usize = 3;

/// Resolutions offered for stepwise/continuous frame size ranges
const STEPWISE_CANDIDATES: [(u32, u32); 5] = [
    (3840, 2160),
    (1920, 1080),
    (1280, 720),
    (640, 480),
    (320, 240),
];

/// Linux V4L2 backend
pub struct V4l2Hardware {
    active: Mutex<Option<SessionConfig>>,
    events: broadcast::Sender<HardwareEvent>,
}

impl Default for V4l2Hardware {
    fn default() -> Self {
        Self::new()
    }
}

impl V4l2Hardware {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            active: Mutex::new(None),
            events,
        }
    }

    fn active(&self) -> Option<SessionConfig> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Enumerate capture-capable V4L2 nodes
fn scan_video_devices() -> Vec<Device> {
    let mut devices = Vec::new();

    let entries = match std::fs::read_dir("/dev") {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "Failed to read /dev");
            return devices;
        }
    };

    let mut paths: Vec<_> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("video"))
        })
        .collect();
    paths.sort();

    for path in paths {
        let Ok(dev) = V4lDevice::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            // Metadata nodes share the card name with the capture node
            debug!(path = %path.display(), "Skipping non-capture node");
            continue;
        }

        let position = if caps.bus.starts_with("usb") {
            DevicePosition::External
        } else {
            DevicePosition::Unspecified
        };
        let device_type = if position == DevicePosition::External {
            DeviceType::External
        } else {
            DeviceType::Unknown
        };

        let device = Device {
            id: DeviceId::new(path.to_string_lossy()),
            name: caps.card.clone(),
            kind: DeviceKind::Camera,
            position,
            device_type,
            capabilities: DeviceCapabilities::default(),
        };
        info!(name = %device.name, path = %device.id, driver = %caps.driver, "Found V4L2 camera");
        devices.push(device);
    }

    devices
}

/// Probe all discrete (size, interval) pairs of a device
fn probe_formats(path: &Path) -> BackendResult<Vec<HardwareFormat>> {
    let dev = V4lDevice::with_path(path)?;
    let mut formats = Vec::new();

    for desc in dev.enum_formats()? {
        let pixel_format = desc.fourcc.str().unwrap_or("????").to_string();
        let hardware_accelerated = pixel_format == "MJPG" || pixel_format == "H264";

        let Ok(sizes) = dev.enum_framesizes(desc.fourcc) else {
            continue;
        };

        let mut resolutions = Vec::new();
        for size in sizes {
            match size.size {
                v4l::framesize::FrameSizeEnum::Discrete(discrete) => {
                    resolutions.push((discrete.width, discrete.height));
                }
                v4l::framesize::FrameSizeEnum::Stepwise(step) => {
                    resolutions.extend(STEPWISE_CANDIDATES.iter().copied().filter(|(w, h)| {
                        *w >= step.min_width
                            && *w <= step.max_width
                            && *h >= step.min_height
                            && *h <= step.max_height
                    }));
                }
            }
        }

        for (width, height) in resolutions {
            let Ok(intervals) = dev.enum_frameintervals(desc.fourcc, width, height) else {
                continue;
            };
            for interval in intervals {
                let fps = match interval.interval {
                    v4l::frameinterval::FrameIntervalEnum::Discrete(frac)
                        if frac.numerator > 0 =>
                    {
                        frac.denominator / frac.numerator
                    }
                    v4l::frameinterval::FrameIntervalEnum::Discrete(_) => continue,
                    v4l::frameinterval::FrameIntervalEnum::Stepwise(step) => {
                        // Fastest rate of the range
                        if step.min.numerator == 0 {
                            continue;
                        }
                        step.min.denominator / step.min.numerator
                    }
                };
                if fps == 0 {
                    continue;
                }
                formats.push(HardwareFormat {
                    width,
                    height,
                    fps,
                    hardware_accelerated,
                    pixel_format: pixel_format.clone(),
                });
            }
        }
    }

    debug!(path = %path.display(), count = formats.len(), "Probed V4L2 formats");
    Ok(formats)
}

/// Apply format and frame rate to an open device
fn apply_format(dev: &V4lDevice, format: &HardwareFormat) -> BackendResult<()> {
    let fourcc_bytes: [u8; 4] = format
        .pixel_format
        .as_bytes()
        .try_into()
        .map_err(|_| BackendError::FormatNotSupported(format.pixel_format.clone()))?;
    let fourcc = v4l::FourCC::new(&fourcc_bytes);

    let mut fmt = dev
        .format()
        .map_err(|e| BackendError::AddInputFailed(e.to_string()))?;
    fmt.width = format.width;
    fmt.height = format.height;
    fmt.fourcc = fourcc;

    let applied = dev
        .set_format(&fmt)
        .map_err(|e| BackendError::AddInputFailed(e.to_string()))?;
    if applied.width != format.width || applied.height != format.height || applied.fourcc != fourcc
    {
        return Err(BackendError::FormatNotSupported(format.to_string()));
    }

    dev.set_params(&Parameters::with_fps(format.fps))
        .map_err(|e| BackendError::FormatNotSupported(e.to_string()))?;
    Ok(())
}

/// Open, configure and grab one frame
fn grab_still(config: &SessionConfig) -> BackendResult<RawPhoto> {
    let dev = V4lDevice::with_path(config.camera.as_str())
        .map_err(|e| BackendError::DeviceNotFound(e.to_string()))?;
    apply_format(&dev, &config.format)?;

    let mut stream = MmapStream::with_buffers(&dev, Type::VideoCapture, STILL_CAPTURE_BUFFERS)?;
    for _ in 0..STILL_CAPTURE_WARMUP_FRAMES {
        stream.next()?;
    }
    let (buf, meta) = stream.next()?;
    debug!(sequence = meta.sequence, bytes = buf.len(), "Grabbed V4L2 frame");

    Ok(RawPhoto {
        width: config.format.width,
        height: config.format.height,
        pixel_format: config.format.pixel_format.clone(),
        data: Arc::from(buf),
    })
}

#[async_trait]
impl CaptureHardware for V4l2Hardware {
    fn backend_type(&self) -> HardwareBackendType {
        HardwareBackendType::V4l2
    }

    fn is_simulated(&self) -> bool {
        false
    }

    async fn authorize(&self) -> bool {
        // Device node permissions are checked when the node is opened
        true
    }

    async fn discover(&self, kind: DeviceKind, positions: &[DevicePosition]) -> Vec<Device> {
        if kind != DeviceKind::Camera {
            return Vec::new();
        }
        let positions = positions.to_vec();
        tokio::task::spawn_blocking(move || {
            scan_video_devices()
                .into_iter()
                .filter(|d| positions.is_empty() || positions.contains(&d.position))
                .collect()
        })
        .await
        .unwrap_or_default()
    }

    async fn default_microphone(&self) -> Option<Device> {
        // Audio capture is not routed through V4L2
        None
    }

    async fn formats(&self, device: &DeviceId) -> BackendResult<Vec<HardwareFormat>> {
        let path = device.as_str().to_string();
        tokio::task::spawn_blocking(move || probe_formats(Path::new(&path)))
            .await
            .map_err(|e| BackendError::Other(e.to_string()))?
    }

    async fn configure(&self, config: &SessionConfig) -> BackendResult<()> {
        let owned = config.clone();
        tokio::task::spawn_blocking(move || {
            let dev = V4lDevice::with_path(owned.camera.as_str())
                .map_err(|e| BackendError::AddInputFailed(e.to_string()))?;
            apply_format(&dev, &owned.format)
        })
        .await
        .map_err(|e| BackendError::Other(e.to_string()))??;

        info!(camera = %config.camera, format = %config.format, "V4L2 session configured");
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(config.clone());
        Ok(())
    }

    async fn set_zoom(&self, factor: f64) -> BackendResult<f64> {
        // Optical zoom controls are not probed; digital zoom is a UI concern
        debug!(requested = factor, "V4L2 backend keeps 1x zoom");
        Ok(1.0)
    }

    async fn capture_photo(
        &self,
        _settings: &PhotoSettings,
        shutter: ShutterSignal,
    ) -> BackendResult<RawPhoto> {
        let config = self
            .active()
            .ok_or_else(|| BackendError::Other("session not configured".to_string()))?;
        let photo = tokio::task::spawn_blocking(move || grab_still(&config))
            .await
            .map_err(|e| BackendError::Other(e.to_string()))??;
        let _ = shutter.send(());
        Ok(photo)
    }

    async fn start_movie(&self) -> BackendResult<()> {
        Err(BackendError::NotSupported(
            "movie recording requires an encoder pipeline".to_string(),
        ))
    }

    async fn stop_movie(&self) -> BackendResult<RawMovie> {
        Err(BackendError::NoRecordingInProgress)
    }

    fn subscribe(&self) -> broadcast::Receiver<HardwareEvent> {
        self.events.subscribe()
    }
}

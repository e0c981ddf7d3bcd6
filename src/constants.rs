// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Frame rates tried in order when a format is selected for the first time
pub const PREFERRED_FPS_LADDER: [u32; 4] = [240, 120, 60, 30];

/// Resolutions with a marketing label
///
/// Anything not listed is labelled `"{width}x{height}"`.
pub const MARKETING_NAMES: [((u32, u32), &str); 4] = [
    ((3840, 2160), "4K"),
    ((4096, 2160), "4K"),
    ((1920, 1080), "1080p"),
    ((1280, 720), "720p"),
];

/// Highest frame rate at which live photos can be captured
pub const LIVE_PHOTO_MAX_FPS: u32 = 60;

/// Camera positions scanned for cameras, in merge order
///
/// Later positions win when two devices share a name. Unspecified covers
/// built-in sensors of platforms that do not report placement.
pub const CAMERA_DISCOVERY_ORDER: [crate::backends::DevicePosition; 4] = [
    crate::backends::DevicePosition::Back,
    crate::backends::DevicePosition::Front,
    crate::backends::DevicePosition::External,
    crate::backends::DevicePosition::Unspecified,
];

/// Capacity of the coordinator command queue
pub const DEFAULT_COMMAND_QUEUE_DEPTH: usize = 32;

/// How often the recording duration is republished
pub const DEFAULT_RECORDING_TICK: Duration = Duration::from_millis(250);

/// Application directory name under the user config directory
pub const APP_DIR_NAME: &str = "camera-session";

/// User configuration file name
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Preferred-device store file name
pub const PREFERENCES_FILE_NAME: &str = "preferences.json";

// SPDX-License-Identifier: GPL-3.0-only

//! User configuration and the persisted preferred-device store
//!
//! Both live as JSON files under `$XDG_CONFIG_HOME/camera-session/`. The
//! configuration is read once at startup. The preference store is the only
//! state the session writes back.

use crate::backends::{DeviceId, DeviceKind, HardwareBackendType, QualityPrioritization};
use crate::constants::{
    APP_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_COMMAND_QUEUE_DEPTH, DEFAULT_RECORDING_TICK,
    PREFERENCES_FILE_NAME,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Result type for configuration and preference I/O
pub type PrefsResult<T> = Result<T, PrefsError>;

/// Configuration or preference file failure
#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("No user configuration directory")]
    NoConfigDir,
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hardware backend to drive
    pub backend: HardwareBackendType,
    /// Attach the default microphone to movie recordings
    pub record_audio: bool,
    /// Capture live photos when the device supports them
    pub live_photo: bool,
    /// Photo quality trade-off
    pub quality: QualityPrioritization,
    /// Capacity of the coordinator command queue
    pub command_queue_depth: usize,
    /// Recording duration publish interval in milliseconds
    pub recording_tick_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: HardwareBackendType::default(),
            record_audio: false,
            live_photo: false,
            quality: QualityPrioritization::default(),
            command_queue_depth: DEFAULT_COMMAND_QUEUE_DEPTH,
            recording_tick_ms: DEFAULT_RECORDING_TICK.as_millis() as u64,
        }
    }
}

impl Config {
    /// `$XDG_CONFIG_HOME/camera-session`
    pub fn app_dir() -> PrefsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR_NAME))
            .ok_or(PrefsError::NoConfigDir)
    }

    pub fn default_path() -> PrefsResult<PathBuf> {
        Ok(Self::app_dir()?.join(CONFIG_FILE_NAME))
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> PrefsResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let config = serde_json::from_str(&text).map_err(|source| PrefsError::Json {
                    path: path.to_path_buf(),
                    source,
                })?;
                info!(path = %path.display(), "Loaded configuration");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No configuration file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(PrefsError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn recording_tick(&self) -> Duration {
        // A zero interval would make tokio's interval panic
        Duration::from_millis(self.recording_tick_ms.max(1))
    }

    pub fn command_queue_depth(&self) -> usize {
        self.command_queue_depth.max(1)
    }
}

/// Preferred device per kind, as persisted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicePreferences {
    pub camera: Option<DeviceId>,
    pub microphone: Option<DeviceId>,
}

impl DevicePreferences {
    pub fn get(&self, kind: DeviceKind) -> Option<&DeviceId> {
        match kind {
            DeviceKind::Camera => self.camera.as_ref(),
            DeviceKind::Microphone => self.microphone.as_ref(),
        }
    }

    pub fn set(&mut self, kind: DeviceKind, id: Option<DeviceId>) {
        match kind {
            DeviceKind::Camera => self.camera = id,
            DeviceKind::Microphone => self.microphone = id,
        }
    }
}

/// Storage for the preferred device of each kind
///
/// Survives process restarts; nothing else in the session is persisted.
pub trait PreferenceStore: Send + Sync {
    fn preferred(&self, kind: DeviceKind) -> Option<DeviceId>;

    fn set_preferred(&self, kind: DeviceKind, id: Option<DeviceId>) -> PrefsResult<()>;
}

/// JSON file backed preference store
pub struct FilePreferenceStore {
    path: PathBuf,
    cached: Mutex<DevicePreferences>,
}

impl FilePreferenceStore {
    /// Open the store at the default location
    pub fn open_default() -> PrefsResult<Self> {
        Self::open(Config::app_dir()?.join(PREFERENCES_FILE_NAME))
    }

    /// Open the store at `path`; a missing file starts empty
    pub fn open(path: impl Into<PathBuf>) -> PrefsResult<Self> {
        let path = path.into();
        let cached = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Discarding unreadable device preferences");
                DevicePreferences::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => DevicePreferences::default(),
            Err(source) => return Err(PrefsError::Io { path, source }),
        };
        Ok(Self {
            path,
            cached: Mutex::new(cached),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, prefs: &DevicePreferences) -> PrefsResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PrefsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let text = serde_json::to_string_pretty(prefs).map_err(|source| PrefsError::Json {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, text).map_err(|source| PrefsError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn preferred(&self, kind: DeviceKind) -> Option<DeviceId> {
        self.cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
    }

    fn set_preferred(&self, kind: DeviceKind, id: Option<DeviceId>) -> PrefsResult<()> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        let mut updated = cached.clone();
        updated.set(kind, id);
        self.write(&updated)?;
        *cached = updated;
        debug!(path = %self.path.display(), %kind, "Saved device preference");
        Ok(())
    }
}

/// In-memory preference store for tests and throwaway sessions
#[derive(Default)]
pub struct MemoryPreferenceStore {
    prefs: Mutex<DevicePreferences>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_camera(id: DeviceId) -> Self {
        Self {
            prefs: Mutex::new(DevicePreferences {
                camera: Some(id),
                microphone: None,
            }),
        }
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn preferred(&self, kind: DeviceKind) -> Option<DeviceId> {
        self.prefs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
    }

    fn set_preferred(&self, kind: DeviceKind, id: Option<DeviceId>) -> PrefsResult<()> {
        self.prefs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set(kind, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"record_audio": true}"#).unwrap();
        assert!(config.record_audio);
        assert_eq!(config.command_queue_depth, DEFAULT_COMMAND_QUEUE_DEPTH);
        assert_eq!(config.backend, HardwareBackendType::V4l2);
    }

    #[test]
    fn zero_tick_is_clamped() {
        let config = Config {
            recording_tick_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.recording_tick(), Duration::from_millis(1));
    }

    #[test]
    fn memory_store_round_trips_per_kind() {
        let store = MemoryPreferenceStore::new();
        store
            .set_preferred(DeviceKind::Camera, Some(DeviceId::new("cam")))
            .unwrap();
        assert_eq!(
            store.preferred(DeviceKind::Camera),
            Some(DeviceId::new("cam"))
        );
        assert_eq!(store.preferred(DeviceKind::Microphone), None);
    }
}

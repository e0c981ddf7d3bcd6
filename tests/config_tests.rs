// SPDX-License-Identifier: MPL-2.0

//! Integration tests for configuration and the preference store

use camera_session::Config;
use camera_session::backends::{DeviceId, DeviceKind, HardwareBackendType, QualityPrioritization};
use camera_session::config::{FilePreferenceStore, PreferenceStore};
use std::time::Duration;

#[test]
fn test_config_default() {
    let config = Config::default();

    assert_eq!(config.backend, HardwareBackendType::V4l2);
    assert!(!config.record_audio);
    assert!(!config.live_photo);
    assert_eq!(config.quality, QualityPrioritization::Balanced);
    assert!(config.command_queue_depth() > 0);
    assert_eq!(config.recording_tick(), Duration::from_millis(250));
}

#[test]
fn test_config_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&dir.path().join("config.json")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_config_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{
            "backend": "simulated",
            "record_audio": true,
            "quality": "quality",
            "recording_tick_ms": 100
        }"#,
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.backend, HardwareBackendType::Simulated);
    assert!(config.record_audio);
    assert_eq!(config.quality, QualityPrioritization::Quality);
    assert_eq!(config.recording_tick(), Duration::from_millis(100));
    // Unset keys keep their defaults
    assert_eq!(config.command_queue_depth, Config::default().command_queue_depth);
}

#[test]
fn test_config_malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = Config::load(&path).unwrap_err();
    assert!(err.to_string().contains("config.json"));
}

#[test]
fn test_preferences_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("devices.json");

    let store = FilePreferenceStore::open(&path).unwrap();
    assert_eq!(store.preferred(DeviceKind::Camera), None);
    store
        .set_preferred(DeviceKind::Camera, Some(DeviceId::new("/dev/video2")))
        .unwrap();
    assert!(path.exists());

    let reopened = FilePreferenceStore::open(&path).unwrap();
    assert_eq!(
        reopened.preferred(DeviceKind::Camera),
        Some(DeviceId::new("/dev/video2"))
    );
    assert_eq!(reopened.preferred(DeviceKind::Microphone), None);
}

#[test]
fn test_preferences_can_be_cleared() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.json");

    let store = FilePreferenceStore::open(&path).unwrap();
    store
        .set_preferred(DeviceKind::Camera, Some(DeviceId::new("cam")))
        .unwrap();
    store.set_preferred(DeviceKind::Camera, None).unwrap();

    let reopened = FilePreferenceStore::open(&path).unwrap();
    assert_eq!(reopened.preferred(DeviceKind::Camera), None);
}

#[test]
fn test_unreadable_preferences_start_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.json");
    std::fs::write(&path, "garbage").unwrap();

    let store = FilePreferenceStore::open(&path).unwrap();
    assert_eq!(store.preferred(DeviceKind::Camera), None);
    assert_eq!(store.path(), path.as_path());
}

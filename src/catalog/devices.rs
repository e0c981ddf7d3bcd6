// SPDX-License-Identifier: GPL-3.0-only

//! Camera and microphone catalog with the preferred-camera policy
//!
//! Cameras are keyed by display name. Discovery runs once per position and
//! the batches are merged in [`CAMERA_DISCOVERY_ORDER`], so a later batch
//! replaces an earlier entry with the same name.
//!
//! The preferred camera always names a camera that is present, or is unset.
//! When nothing was stored the catalog seeds it with the back wide-angle
//! camera, else the first back camera by name. With no preference at all
//! [`DeviceCatalog::default_camera`] still answers with the system camera,
//! the first camera in discovery order.

use crate::backends::{
    CaptureHardware, Device, DeviceId, DeviceKind, DevicePosition, DeviceType,
};
use crate::config::PreferenceStore;
use crate::constants::CAMERA_DISCOVERY_ORDER;
use crate::errors::{CaptureError, CaptureResult};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Merge per-position discovery batches into one name-keyed map
///
/// Batches are applied in order and the last writer wins on a name clash.
pub fn merge_cameras(batches: impl IntoIterator<Item = Vec<Device>>) -> BTreeMap<String, Device> {
    let mut cameras = BTreeMap::new();
    for device in batches.into_iter().flatten() {
        if let Some(previous) = cameras.insert(device.name.clone(), device) {
            debug!(name = %previous.name, replaced = %previous.id, "Camera name collision");
        }
    }
    cameras
}

/// Preference seeding: stored (if present) > back wide-angle > first back
pub fn seed_preference(
    cameras: &BTreeMap<String, Device>,
    stored: Option<&DeviceId>,
) -> Option<DeviceId> {
    if let Some(id) = stored {
        if cameras.values().any(|d| &d.id == id) {
            return Some(id.clone());
        }
    }

    let back = || {
        cameras
            .values()
            .filter(|d| d.position == DevicePosition::Back)
    };

    back()
        .find(|d| d.device_type == DeviceType::WideAngle)
        .or_else(|| back().next())
        .map(|d| d.id.clone())
}

/// Devices currently known to the session
#[derive(Debug, Clone, Default)]
pub struct DeviceCatalog {
    cameras: BTreeMap<String, Device>,
    microphones: Vec<Device>,
    default_microphone: Option<DeviceId>,
    preferred_camera: Option<DeviceId>,
}

impl DeviceCatalog {
    /// Enumerate every camera and microphone the hardware reports
    ///
    /// Zero cameras on real hardware is fatal: [`CaptureError::NoCamerasPresent`].
    pub async fn discover<H>(hardware: &H, store: &dyn PreferenceStore) -> CaptureResult<Self>
    where
        H: CaptureHardware + ?Sized,
    {
        let (cameras, microphones, default_microphone) = scan(hardware).await;
        if cameras.is_empty() && !hardware.is_simulated() {
            return Err(CaptureError::NoCamerasPresent);
        }
        Ok(Self::from_devices(
            cameras,
            microphones,
            default_microphone,
            store,
        ))
    }

    /// Build from already discovered devices and seed the preference
    ///
    /// A seeded preference is persisted when the store held none.
    pub fn from_devices(
        cameras: BTreeMap<String, Device>,
        microphones: Vec<Device>,
        default_microphone: Option<Device>,
        store: &dyn PreferenceStore,
    ) -> Self {
        let stored = store.preferred(DeviceKind::Camera);
        let preferred_camera = seed_preference(&cameras, stored.as_ref());

        if stored.is_none() {
            if let Some(seeded) = &preferred_camera {
                info!(camera = %seeded, "Seeded preferred camera");
                if let Err(e) = store.set_preferred(DeviceKind::Camera, Some(seeded.clone())) {
                    warn!(error = %e, "Failed to persist seeded camera preference");
                }
            }
        }

        let catalog = Self {
            cameras,
            default_microphone: pick_microphone(&microphones, default_microphone, store),
            microphones,
            preferred_camera,
        };
        info!(
            cameras = catalog.cameras.len(),
            microphones = catalog.microphones.len(),
            preferred = ?catalog.preferred_camera,
            "Device catalog ready"
        );
        catalog
    }

    /// Re-enumerate after a hot-plug event
    ///
    /// Zero cameras is not an error here. Returns true when the default
    /// camera changed.
    pub async fn refresh<H>(&mut self, hardware: &H, store: &dyn PreferenceStore) -> bool
    where
        H: CaptureHardware + ?Sized,
    {
        let (cameras, microphones, default_microphone) = scan(hardware).await;
        self.replace(cameras, microphones, default_microphone, store)
    }

    /// Replace the catalog contents, see [`DeviceCatalog::refresh`]
    ///
    /// A stored camera that is present always becomes the preference again.
    /// Otherwise a present in-memory preference is kept, and failing that the
    /// preference is re-seeded in memory only.
    pub fn replace(
        &mut self,
        cameras: BTreeMap<String, Device>,
        microphones: Vec<Device>,
        default_microphone: Option<Device>,
        store: &dyn PreferenceStore,
    ) -> bool {
        let before = self.default_camera().ok().map(|d| d.id.clone());

        self.cameras = cameras;
        self.default_microphone = pick_microphone(&microphones, default_microphone, store);
        self.microphones = microphones;

        let stored = store
            .preferred(DeviceKind::Camera)
            .filter(|id| self.camera(id).is_some());
        let previous = self.preferred_camera.take();
        let kept = previous
            .clone()
            .filter(|id| self.camera(id).is_some());

        self.preferred_camera = match (stored, kept) {
            (Some(stored), kept) => {
                if kept.as_ref().is_some_and(|id| id != &stored) {
                    info!(camera = %stored, "Stored camera is back, restoring preference");
                }
                Some(stored)
            }
            (None, Some(kept)) => Some(kept),
            (None, None) => {
                if let Some(lost) = previous {
                    warn!(camera = %lost, "Preferred camera disappeared");
                }
                seed_preference(&self.cameras, None)
            }
        };

        let after = self.default_camera().ok().map(|d| d.id.clone());
        debug!(cameras = self.cameras.len(), default = ?after, "Device catalog refreshed");
        before != after
    }

    /// Name-keyed cameras
    pub fn list_cameras(&self) -> &BTreeMap<String, Device> {
        &self.cameras
    }

    pub fn microphones(&self) -> &[Device] {
        &self.microphones
    }

    pub fn camera(&self, id: &DeviceId) -> Option<&Device> {
        self.cameras.values().find(|d| &d.id == id)
    }

    pub fn preferred_camera(&self) -> Option<&DeviceId> {
        self.preferred_camera.as_ref()
    }

    /// Preferred camera, else the system camera
    pub fn default_camera(&self) -> CaptureResult<&Device> {
        if let Some(device) = self.preferred_camera.as_ref().and_then(|id| self.camera(id)) {
            return Ok(device);
        }
        CAMERA_DISCOVERY_ORDER
            .iter()
            .find_map(|position| self.cameras.values().find(|d| d.position == *position))
            .ok_or(CaptureError::VideoDeviceUnavailable)
    }

    /// Stored microphone when present, else the platform default
    pub fn default_microphone(&self) -> CaptureResult<&Device> {
        self.default_microphone
            .as_ref()
            .and_then(|id| self.microphone(id))
            .ok_or(CaptureError::AudioDeviceUnavailable)
    }

    pub fn microphone(&self, id: &DeviceId) -> Option<&Device> {
        self.microphones.iter().find(|d| &d.id == id)
    }

    /// Make `id` the default microphone and persist it
    ///
    /// Nothing changes when the id is unknown or the store write fails.
    pub fn set_preferred_microphone(
        &mut self,
        id: &DeviceId,
        store: &dyn PreferenceStore,
    ) -> CaptureResult<()> {
        if self.microphone(id).is_none() {
            return Err(CaptureError::UnknownDevice(id.to_string()));
        }
        store.set_preferred(DeviceKind::Microphone, Some(id.clone()))?;
        self.default_microphone = Some(id.clone());
        info!(microphone = %id, "Preferred microphone updated");
        Ok(())
    }

    /// Make `id` the preferred camera and persist it
    ///
    /// Nothing changes when the id is unknown or the store write fails.
    pub fn set_preferred_camera(
        &mut self,
        id: &DeviceId,
        store: &dyn PreferenceStore,
    ) -> CaptureResult<()> {
        if self.camera(id).is_none() {
            return Err(CaptureError::UnknownDevice(id.to_string()));
        }
        store.set_preferred(DeviceKind::Camera, Some(id.clone()))?;
        self.preferred_camera = Some(id.clone());
        info!(camera = %id, "Preferred camera updated");
        Ok(())
    }
}

fn pick_microphone(
    microphones: &[Device],
    platform: Option<Device>,
    store: &dyn PreferenceStore,
) -> Option<DeviceId> {
    store
        .preferred(DeviceKind::Microphone)
        .filter(|id| microphones.iter().any(|d| &d.id == id))
        .or_else(|| platform.map(|d| d.id))
}

type Scan = (BTreeMap<String, Device>, Vec<Device>, Option<Device>);

async fn scan<H>(hardware: &H) -> Scan
where
    H: CaptureHardware + ?Sized,
{
    let mut batches = Vec::with_capacity(CAMERA_DISCOVERY_ORDER.len());
    for position in CAMERA_DISCOVERY_ORDER {
        let found = hardware.discover(DeviceKind::Camera, &[position]).await;
        debug!(%position, count = found.len(), "Discovered cameras");
        batches.push(found);
    }
    let cameras = merge_cameras(batches);
    let microphones = hardware.discover(DeviceKind::Microphone, &[]).await;
    let default_microphone = hardware.default_microphone().await;
    (cameras, microphones, default_microphone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{DeviceCapabilities, SimulatedHardware};
    use crate::config::MemoryPreferenceStore;

    fn cam(id: &str, name: &str, position: DevicePosition, device_type: DeviceType) -> Device {
        Device {
            id: DeviceId::new(id),
            name: name.to_string(),
            kind: DeviceKind::Camera,
            position,
            device_type,
            capabilities: DeviceCapabilities::default(),
        }
    }

    #[test]
    fn merge_keeps_one_entry_per_name() {
        let back = vec![cam("a", "Camera", DevicePosition::Back, DeviceType::WideAngle)];
        let front = vec![cam("b", "Camera", DevicePosition::Front, DeviceType::WideAngle)];
        let external = vec![cam("c", "USB", DevicePosition::External, DeviceType::External)];

        let merged = merge_cameras([back, front, external]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["Camera"].id, DeviceId::new("b"));
        for (name, device) in &merged {
            assert_eq!(name, &device.name);
        }
    }

    #[test]
    fn seeds_wide_angle_over_ultra_wide() {
        let cameras = merge_cameras([vec![
            cam("uw", "A Ultra Wide", DevicePosition::Back, DeviceType::UltraWide),
            cam("w", "B Wide", DevicePosition::Back, DeviceType::WideAngle),
        ]]);
        let store = MemoryPreferenceStore::new();
        let catalog = DeviceCatalog::from_devices(cameras, Vec::new(), None, &store);

        assert_eq!(catalog.preferred_camera(), Some(&DeviceId::new("w")));
        assert_eq!(store.preferred(DeviceKind::Camera), Some(DeviceId::new("w")));
    }

    #[test]
    fn seeds_first_back_camera_without_wide_angle() {
        let cameras = merge_cameras([vec![
            cam("t", "Tele", DevicePosition::Back, DeviceType::Telephoto),
            cam("uw", "Ultra", DevicePosition::Back, DeviceType::UltraWide),
            cam("f", "Front", DevicePosition::Front, DeviceType::WideAngle),
        ]]);
        assert_eq!(seed_preference(&cameras, None), Some(DeviceId::new("t")));
    }

    #[test]
    fn front_only_leaves_preference_unset() {
        let cameras = merge_cameras([vec![cam(
            "f",
            "Front",
            DevicePosition::Front,
            DeviceType::WideAngle,
        )]]);
        let store = MemoryPreferenceStore::new();
        let catalog = DeviceCatalog::from_devices(cameras, Vec::new(), None, &store);

        assert_eq!(catalog.preferred_camera(), None);
        assert_eq!(store.preferred(DeviceKind::Camera), None);
        // System camera still resolves
        assert_eq!(catalog.default_camera().unwrap().id, DeviceId::new("f"));
    }

    #[test]
    fn stored_preference_wins_when_present() {
        let cameras = merge_cameras([vec![
            cam("w", "Wide", DevicePosition::Back, DeviceType::WideAngle),
            cam("f", "Front", DevicePosition::Front, DeviceType::WideAngle),
        ]]);
        let store = MemoryPreferenceStore::with_camera(DeviceId::new("f"));
        let catalog = DeviceCatalog::from_devices(cameras, Vec::new(), None, &store);
        assert_eq!(catalog.default_camera().unwrap().id, DeviceId::new("f"));
    }

    #[test]
    fn empty_catalog_has_no_defaults() {
        let catalog = DeviceCatalog::default();
        assert_eq!(
            catalog.default_camera().unwrap_err(),
            CaptureError::VideoDeviceUnavailable
        );
        assert_eq!(
            catalog.default_microphone().unwrap_err(),
            CaptureError::AudioDeviceUnavailable
        );
    }

    #[test]
    fn unknown_camera_cannot_be_preferred() {
        let store = MemoryPreferenceStore::new();
        let mut catalog = DeviceCatalog::default();
        let err = catalog
            .set_preferred_camera(&DeviceId::new("ghost"), &store)
            .unwrap_err();
        assert!(matches!(err, CaptureError::UnknownDevice(_)));
        assert_eq!(store.preferred(DeviceKind::Camera), None);
    }

    #[test]
    fn refresh_reseeds_when_preferred_camera_leaves() {
        let store = MemoryPreferenceStore::with_camera(DeviceId::new("usb"));
        let usb = cam("usb", "USB", DevicePosition::External, DeviceType::External);
        let wide = cam("w", "Wide", DevicePosition::Back, DeviceType::WideAngle);

        let mut catalog = DeviceCatalog::from_devices(
            merge_cameras([vec![wide.clone(), usb]]),
            Vec::new(),
            None,
            &store,
        );
        assert_eq!(catalog.preferred_camera(), Some(&DeviceId::new("usb")));

        let changed = catalog.replace(merge_cameras([vec![wide]]), Vec::new(), None, &store);
        assert!(changed);
        assert_eq!(catalog.preferred_camera(), Some(&DeviceId::new("w")));
        // Only explicit selection rewrites the store
        assert_eq!(store.preferred(DeviceKind::Camera), Some(DeviceId::new("usb")));
    }

    #[test]
    fn replugged_stored_camera_is_restored() {
        let store = MemoryPreferenceStore::with_camera(DeviceId::new("w"));
        let wide = cam("w", "Wide", DevicePosition::Back, DeviceType::WideAngle);
        let ultra = cam("uw", "Ultra", DevicePosition::Back, DeviceType::UltraWide);

        let mut catalog = DeviceCatalog::from_devices(
            merge_cameras([vec![wide.clone(), ultra.clone()]]),
            Vec::new(),
            None,
            &store,
        );
        assert!(catalog.replace(merge_cameras([vec![ultra.clone()]]), Vec::new(), None, &store));
        assert_eq!(catalog.preferred_camera(), Some(&DeviceId::new("uw")));

        assert!(catalog.replace(merge_cameras([vec![wide, ultra]]), Vec::new(), None, &store));
        assert_eq!(catalog.default_camera().unwrap().id, DeviceId::new("w"));
    }

    #[test]
    fn unrelated_refresh_keeps_default_camera() {
        let store = MemoryPreferenceStore::new();
        let wide = cam("w", "Wide", DevicePosition::Back, DeviceType::WideAngle);
        let usb = cam("usb", "USB", DevicePosition::External, DeviceType::External);

        let mut catalog =
            DeviceCatalog::from_devices(merge_cameras([vec![wide.clone()]]), Vec::new(), None, &store);
        let changed = catalog.replace(merge_cameras([vec![wide, usb]]), Vec::new(), None, &store);
        assert!(!changed);
        assert_eq!(catalog.list_cameras().len(), 2);
    }

    fn mic(id: &str, name: &str) -> Device {
        Device {
            kind: DeviceKind::Microphone,
            ..cam(id, name, DevicePosition::Unspecified, DeviceType::BuiltInMicrophone)
        }
    }

    #[test]
    fn stored_microphone_wins_over_platform_default() {
        let store = MemoryPreferenceStore::new();
        store
            .set_preferred(DeviceKind::Microphone, Some(DeviceId::new("headset")))
            .unwrap();
        let builtin = mic("builtin", "Built-in");
        let headset = mic("headset", "Headset");

        let catalog = DeviceCatalog::from_devices(
            BTreeMap::new(),
            vec![builtin.clone(), headset],
            Some(builtin.clone()),
            &store,
        );
        assert_eq!(catalog.default_microphone().unwrap().id.as_str(), "headset");

        // Unplugged headset falls back to the platform default
        let mut catalog = catalog;
        catalog.replace(BTreeMap::new(), vec![builtin.clone()], Some(builtin), &store);
        assert_eq!(catalog.default_microphone().unwrap().id.as_str(), "builtin");
    }

    #[test]
    fn preferred_microphone_is_persisted() {
        let store = MemoryPreferenceStore::new();
        let builtin = mic("builtin", "Built-in");
        let headset = mic("headset", "Headset");
        let mut catalog = DeviceCatalog::from_devices(
            BTreeMap::new(),
            vec![builtin.clone(), headset],
            Some(builtin),
            &store,
        );

        let err = catalog
            .set_preferred_microphone(&DeviceId::new("ghost"), &store)
            .unwrap_err();
        assert!(matches!(err, CaptureError::UnknownDevice(_)));
        assert_eq!(catalog.default_microphone().unwrap().id.as_str(), "builtin");

        catalog
            .set_preferred_microphone(&DeviceId::new("headset"), &store)
            .unwrap();
        assert_eq!(catalog.default_microphone().unwrap().id.as_str(), "headset");
        assert_eq!(
            store.preferred(DeviceKind::Microphone),
            Some(DeviceId::new("headset"))
        );
    }

    #[tokio::test]
    async fn discovers_demo_devices() {
        let hardware = SimulatedHardware::with_demo_devices();
        let store = MemoryPreferenceStore::new();
        let catalog = DeviceCatalog::discover(&hardware, &store).await.unwrap();

        assert_eq!(catalog.list_cameras().len(), 4);
        assert_eq!(catalog.default_camera().unwrap().id.as_str(), "sim:back-wide");
        assert_eq!(catalog.default_microphone().unwrap().id.as_str(), "sim:mic");
    }

    #[tokio::test]
    async fn simulated_backend_tolerates_zero_cameras() {
        let hardware = SimulatedHardware::new();
        let store = MemoryPreferenceStore::new();
        let catalog = DeviceCatalog::discover(&hardware, &store).await.unwrap();
        assert!(catalog.list_cameras().is_empty());
    }
}

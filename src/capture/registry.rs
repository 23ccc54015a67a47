//! Device registry
//!
//! Resolves cameras and microphones through the system discovery service and
//! keeps the system-wide preferred camera populated.

use super::traits::{Device, DeviceDiscovery, DevicePosition, MediaKind};
use crate::utils::error::{CaptureError, CaptureResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Enumerates and resolves capture devices
pub struct DeviceRegistry {
    discovery: Arc<dyn DeviceDiscovery>,
    preference_checked: AtomicBool,
}

impl DeviceRegistry {
    pub fn new(discovery: Arc<dyn DeviceDiscovery>) -> Self {
        Self {
            discovery,
            preference_checked: AtomicBool::new(false),
        }
    }

    /// Cameras in switch-cycle order (front, back, then the rest)
    ///
    /// Empty in a device-less environment; that is not an error here.
    pub async fn ordered_video_devices(&self) -> Vec<Device> {
        let mut devices = self.discovery.devices(MediaKind::Video).await;
        devices.sort_by_key(|d| d.position.rank());
        self.ensure_preferred(&devices);
        devices
    }

    /// Camera for a new session
    ///
    /// Prefers the system-preferred camera when it matches `position`, then
    /// the first camera at `position`, then any camera.
    pub async fn default_video_device(
        &self,
        position: Option<DevicePosition>,
    ) -> CaptureResult<Device> {
        let devices = self.ordered_video_devices().await;
        if devices.is_empty() {
            return Err(CaptureError::NoDeviceAvailable(MediaKind::Video));
        }

        let matches = |d: &&Device| position.map_or(true, |p| d.position == p);

        let preferred = self
            .discovery
            .preferred_video_device()
            .and_then(|id| devices.iter().find(|d| d.id == id))
            .filter(matches);
        if let Some(device) = preferred {
            return Ok(device.clone());
        }

        if let Some(device) = devices.iter().find(matches) {
            return Ok(device.clone());
        }

        tracing::debug!(
            "No camera at {:?}, falling back to {}",
            position,
            devices[0].id
        );
        Ok(devices[0].clone())
    }

    pub async fn default_audio_device(&self) -> CaptureResult<Device> {
        self.discovery
            .devices(MediaKind::Audio)
            .await
            .into_iter()
            .next()
            .ok_or(CaptureError::NoDeviceAvailable(MediaKind::Audio))
    }

    /// Record `device` as the system-wide preferred camera
    pub fn remember_preferred(&self, device: &Device) {
        tracing::debug!("Preferred camera is now {}", device.id);
        self.discovery.set_preferred_video_device(&device.id);
    }

    /// Designate the first back-facing camera as preferred if nothing is recorded yet
    fn ensure_preferred(&self, devices: &[Device]) {
        if self.preference_checked.load(Ordering::Acquire) || devices.is_empty() {
            return;
        }
        self.preference_checked.store(true, Ordering::Release);

        if self.discovery.preferred_video_device().is_some() {
            return;
        }

        let designated = devices
            .iter()
            .find(|d| d.position == DevicePosition::Back)
            .unwrap_or(&devices[0]);
        tracing::info!("Designating {} as preferred camera", designated.id);
        self.discovery.set_preferred_video_device(&designated.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::simulated::SimulatedHardware;
    use crate::capture::traits::DeviceId;

    fn registry(hardware: &SimulatedHardware) -> DeviceRegistry {
        DeviceRegistry::new(Arc::new(hardware.clone()))
    }

    #[tokio::test]
    async fn test_ordered_devices_put_front_first() {
        let hardware = SimulatedHardware::new();
        hardware.add_video_device(Device::camera("usb", "USB Camera", DevicePosition::Unspecified, false));
        hardware.add_video_device(Device::camera("back", "Back", DevicePosition::Back, true));
        hardware.add_video_device(Device::camera("front", "Front", DevicePosition::Front, false));

        let ids: Vec<String> = registry(&hardware)
            .ordered_video_devices()
            .await
            .into_iter()
            .map(|d| d.id.0)
            .collect();
        assert_eq!(ids, vec!["front", "back", "usb"]);
    }

    #[tokio::test]
    async fn test_first_use_designates_back_camera() {
        let hardware = SimulatedHardware::with_default_devices();
        assert_eq!(hardware.preferred(), None);

        let device = registry(&hardware).default_video_device(None).await.unwrap();
        assert_eq!(device.id, DeviceId::new("back-wide"));
        assert_eq!(hardware.preferred(), Some(DeviceId::new("back-wide")));
    }

    #[tokio::test]
    async fn test_existing_preference_is_kept() {
        let hardware = SimulatedHardware::with_default_devices();
        hardware.set_preferred_video_device(&DeviceId::new("front"));

        let registry = registry(&hardware);
        let device = registry.default_video_device(None).await.unwrap();
        assert_eq!(device.id, DeviceId::new("front"));

        let device = registry
            .default_video_device(Some(DevicePosition::Back))
            .await
            .unwrap();
        assert_eq!(device.id, DeviceId::new("back-wide"));
        assert_eq!(hardware.preferred(), Some(DeviceId::new("front")));
    }

    #[tokio::test]
    async fn test_empty_environment() {
        let hardware = SimulatedHardware::new();
        let registry = registry(&hardware);

        assert!(registry.ordered_video_devices().await.is_empty());
        assert_eq!(
            registry.default_video_device(None).await.unwrap_err(),
            CaptureError::NoDeviceAvailable(MediaKind::Video)
        );
        assert_eq!(
            registry.default_audio_device().await.unwrap_err(),
            CaptureError::NoDeviceAvailable(MediaKind::Audio)
        );
    }
}

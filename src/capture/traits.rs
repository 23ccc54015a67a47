//! Capture trait definitions
//!
//! The hardware boundary: device descriptions, the exclusive capture graph,
//! device discovery and the permission gate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Stable identity of a capture device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Media carried by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => f.write_str("video"),
            MediaKind::Audio => f.write_str("audio"),
        }
    }
}

/// Physical placement of a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePosition {
    Front,
    Back,
    Unspecified,
}

impl DevicePosition {
    /// Sort key for the front/back device ordering
    pub fn rank(&self) -> u8 {
        match self {
            DevicePosition::Front => 0,
            DevicePosition::Back => 1,
            DevicePosition::Unspecified => 2,
        }
    }
}

/// A capture-capable device
///
/// Equality is by identity only; the remaining fields describe the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Stable device identity
    pub id: DeviceId,

    /// Human readable name
    pub name: String,

    /// Media this device produces
    pub kind: MediaKind,

    /// Where the device faces
    pub position: DevicePosition,

    /// Whether the device carries an illuminator (torch)
    pub has_illuminator: bool,
}

impl Device {
    pub fn camera(id: &str, name: &str, position: DevicePosition, has_illuminator: bool) -> Self {
        Self {
            id: DeviceId::new(id),
            name: name.to_string(),
            kind: MediaKind::Video,
            position,
            has_illuminator,
        }
    }

    pub fn microphone(id: &str, name: &str) -> Self {
        Self {
            id: DeviceId::new(id),
            name: name.to_string(),
            kind: MediaKind::Audio,
            position: DevicePosition::Unspecified,
            has_illuminator: false,
        }
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Device {}

/// Quality preset applied to the whole capture graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPreset {
    High,
    Medium,
    Low,
    Hd1280x720,
    Hd1920x1080,
    Hd4k,
}

impl Default for SessionPreset {
    fn default() -> Self {
        Self::High
    }
}

/// Torch mode as commanded or reported by the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TorchMode {
    Off,
    On,
}

impl Default for TorchMode {
    fn default() -> Self {
        Self::Off
    }
}

/// Torch state as the hardware reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TorchObservedState {
    pub available: bool,
    pub active: bool,
    pub mode: TorchMode,
}

/// Handle to an input attached to the capture graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputHandle(pub u64);

/// Registration of a torch property observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObservationToken(pub u64);

/// Notifications the hardware emits on its own schedule
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareEvent {
    /// A torch property of an observed device changed
    TorchChanged {
        token: ObservationToken,
        device: DeviceId,
        state: TorchObservedState,
    },

    /// The recording output finished writing a file
    RecordingFinished {
        output: PathBuf,
        error: Option<String>,
    },
}

/// Channel the hardware uses to deliver [`HardwareEvent`]s
pub type HardwareEventSender = mpsc::UnboundedSender<HardwareEvent>;

/// Errors reported by the hardware boundary
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HardwareError {
    #[error("rejected by capture graph: {0}")]
    Rejected(String),

    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// The exclusive capture graph
///
/// Only one coherent configuration exists at a time. Calls are synchronous,
/// everything asynchronous comes back through the event sink.
pub trait CaptureHardware: Send {
    /// Install the channel used for property notifications and recording completion
    fn set_event_sink(&mut self, sink: HardwareEventSender);

    fn begin_configuration(&mut self);

    fn commit_configuration(&mut self);

    fn set_preset(&mut self, preset: SessionPreset) -> Result<(), HardwareError>;

    fn add_input(&mut self, device: &Device) -> Result<InputHandle, HardwareError>;

    fn remove_input(&mut self, input: InputHandle);

    fn add_movie_output(&mut self) -> Result<(), HardwareError>;

    fn supports_stabilization(&self) -> bool;

    fn set_stabilization(&mut self, enabled: bool);

    fn start_running(&mut self);

    fn stop_running(&mut self);

    fn is_running(&self) -> bool;

    /// Begin writing to `output`; completion arrives as [`HardwareEvent::RecordingFinished`]
    fn start_recording(&mut self, output: &Path) -> Result<(), HardwareError>;

    fn stop_recording(&mut self);

    fn torch_state(&self, device: &DeviceId) -> TorchObservedState;

    fn set_torch_mode(
        &mut self,
        device: &DeviceId,
        mode: TorchMode,
        level: f32,
    ) -> Result<(), HardwareError>;

    /// Start delivering torch changes for `device` until the token is cancelled
    fn observe_torch(&mut self, device: &DeviceId) -> ObservationToken;

    fn cancel_observation(&mut self, token: ObservationToken);
}

/// System device enumeration
#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    /// Devices of `kind` in discovery order
    async fn devices(&self, kind: MediaKind) -> Vec<Device>;

    /// System-wide preferred camera, if one was recorded
    fn preferred_video_device(&self) -> Option<DeviceId>;

    fn set_preferred_video_device(&self, id: &DeviceId);
}

/// Asynchronous access grant per media kind
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn request_access(&self, kind: MediaKind) -> bool;
}

/// Read-only handle to the live frame stream
///
/// Created once per coordinator; its identity never changes.
#[derive(Debug, Clone)]
pub struct FrameSource {
    id: Uuid,
    live: watch::Receiver<bool>,
}

impl FrameSource {
    pub(crate) fn new(live: watch::Receiver<bool>) -> Self {
        Self {
            id: Uuid::new_v4(),
            live,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether frames are currently flowing
    pub fn is_live(&self) -> bool {
        *self.live.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_equality_is_by_identity() {
        let a = Device::camera("cam-1", "Wide", DevicePosition::Back, true);
        let mut b = a.clone();
        b.name = "Renamed".to_string();
        b.has_illuminator = false;
        assert_eq!(a, b);

        let c = Device::camera("cam-2", "Wide", DevicePosition::Back, true);
        assert_ne!(a, c);
    }

    #[test]
    fn test_position_rank_orders_front_first() {
        assert!(DevicePosition::Front.rank() < DevicePosition::Back.rank());
        assert!(DevicePosition::Back.rank() < DevicePosition::Unspecified.rank());
    }
}

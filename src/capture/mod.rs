//! Capture hardware boundary
//!
//! Device discovery, permissions and the exclusive capture graph the engine drives.

pub mod permissions;
pub mod registry;
pub mod simulated;
pub mod traits;

pub use permissions::{request_capture_access, AccessDecision, StaticPermissions};
pub use registry::DeviceRegistry;
pub use simulated::SimulatedHardware;
pub use traits::{
    CaptureHardware, Device, DeviceDiscovery, DeviceId, DevicePosition, FrameSource,
    HardwareError, HardwareEvent, MediaKind, PermissionGate, SessionPreset, TorchMode,
    TorchObservedState,
};

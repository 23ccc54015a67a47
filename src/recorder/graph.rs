//! Session graph bookkeeping
//!
//! Wraps the exclusive capture hardware with the inputs and output the engine
//! attached, plus the transactional helpers every mutation goes through.

use crate::capture::traits::{CaptureHardware, Device, HardwareError, InputHandle};
use parking_lot::Mutex;
use std::sync::Arc;

/// Graph shared between the components that live inside the coordinator
pub type SharedGraph = Arc<Mutex<SessionGraph>>;

/// An input currently attached to the graph
#[derive(Debug, Clone)]
pub struct AttachedInput {
    pub device: Device,
    pub handle: InputHandle,
}

/// The capture graph and what is attached to it
pub struct SessionGraph {
    hardware: Box<dyn CaptureHardware>,
    video: Option<AttachedInput>,
    audio: Option<AttachedInput>,
    output_attached: bool,
}

impl SessionGraph {
    pub fn new(hardware: Box<dyn CaptureHardware>) -> Self {
        Self {
            hardware,
            video: None,
            audio: None,
            output_attached: false,
        }
    }

    pub fn into_shared(self) -> SharedGraph {
        Arc::new(Mutex::new(self))
    }

    pub fn hardware(&self) -> &dyn CaptureHardware {
        self.hardware.as_ref()
    }

    pub fn hardware_mut(&mut self) -> &mut dyn CaptureHardware {
        self.hardware.as_mut()
    }

    /// Run `edit` inside one begin/commit configuration transaction
    ///
    /// The commit happens whatever `edit` returns, so the running stream
    /// never sees a half-applied configuration.
    pub fn transaction<R>(&mut self, edit: impl FnOnce(&mut Self) -> R) -> R {
        self.hardware.begin_configuration();
        let result = edit(self);
        self.hardware.commit_configuration();
        result
    }

    pub fn active_video(&self) -> Option<&AttachedInput> {
        self.video.as_ref()
    }

    pub fn active_video_device(&self) -> Option<&Device> {
        self.video.as_ref().map(|input| &input.device)
    }

    pub fn active_audio_device(&self) -> Option<&Device> {
        self.audio.as_ref().map(|input| &input.device)
    }

    pub fn has_output(&self) -> bool {
        self.output_attached
    }

    pub fn is_running(&self) -> bool {
        self.hardware.is_running()
    }

    /// Detach every input the engine attached
    pub fn remove_all_inputs(&mut self) {
        for input in [self.video.take(), self.audio.take()].into_iter().flatten() {
            tracing::debug!("Removing input {}", input.device.id);
            self.hardware.remove_input(input.handle);
        }
    }

    pub fn attach_video(&mut self, device: Device) -> Result<(), HardwareError> {
        let handle = self.hardware.add_input(&device)?;
        tracing::debug!("Attached video input {}", device.id);
        self.video = Some(AttachedInput { device, handle });
        Ok(())
    }

    pub fn attach_audio(&mut self, device: Device) -> Result<(), HardwareError> {
        let handle = self.hardware.add_input(&device)?;
        tracing::debug!("Attached audio input {}", device.id);
        self.audio = Some(AttachedInput { device, handle });
        Ok(())
    }

    /// Attach the recording output unless it already is
    ///
    /// Stabilization is enabled only when the hardware supports it.
    pub fn attach_output_once(&mut self) -> Result<(), HardwareError> {
        if self.output_attached {
            return Ok(());
        }

        self.hardware.add_movie_output()?;
        self.output_attached = true;

        if self.hardware.supports_stabilization() {
            self.hardware.set_stabilization(true);
        }
        Ok(())
    }

    /// Replace the active camera with `next`
    ///
    /// On failure the original camera is attached again before the
    /// transaction commits. Returns the camera that was replaced.
    pub fn swap_video(&mut self, next: Device) -> Result<Device, HardwareError> {
        self.transaction(|graph| {
            let mut swap = VideoSwap::stage(graph)?;
            let handle = swap.graph.hardware.add_input(&next)?;
            Ok(swap.confirm(AttachedInput {
                device: next,
                handle,
            }))
        })
    }
}

/// Scoped replacement of the active video input
///
/// Holds the detached original until the replacement is confirmed; dropping an
/// unconfirmed swap re-attaches the original.
struct VideoSwap<'g> {
    graph: &'g mut SessionGraph,
    original: AttachedInput,
    confirmed: bool,
}

impl<'g> VideoSwap<'g> {
    fn stage(graph: &'g mut SessionGraph) -> Result<Self, HardwareError> {
        let original = graph
            .video
            .take()
            .ok_or_else(|| HardwareError::Rejected("no active video input".to_string()))?;
        graph.hardware.remove_input(original.handle);

        Ok(Self {
            graph,
            original,
            confirmed: false,
        })
    }

    fn confirm(mut self, replacement: AttachedInput) -> Device {
        self.graph.video = Some(replacement);
        self.confirmed = true;
        self.original.device.clone()
    }
}

impl Drop for VideoSwap<'_> {
    fn drop(&mut self) {
        if self.confirmed {
            return;
        }

        let device = self.original.device.clone();
        tracing::warn!("Rolling back to video input {}", device.id);
        match self.graph.hardware.add_input(&device) {
            Ok(handle) => {
                self.graph.video = Some(AttachedInput { device, handle });
            }
            Err(e) => {
                tracing::error!("Failed to restore video input {}: {}", device.id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::simulated::SimulatedHardware;
    use crate::capture::traits::{DeviceId, DevicePosition};

    fn camera(id: &str, position: DevicePosition) -> Device {
        Device::camera(id, id, position, false)
    }

    #[test]
    fn test_transaction_commits_once() {
        let hardware = SimulatedHardware::with_default_devices();
        let mut graph = SessionGraph::new(Box::new(hardware.clone()));

        let result: Result<(), HardwareError> = graph.transaction(|g| {
            g.attach_video(camera("front", DevicePosition::Front))?;
            g.attach_output_once()
        });
        assert!(result.is_ok());
        assert_eq!(hardware.commits(), 1);
        assert!(hardware.stabilization_enabled());
    }

    #[test]
    fn test_output_attached_once() {
        let hardware = SimulatedHardware::with_default_devices();
        let mut graph = SessionGraph::new(Box::new(hardware.clone()));

        graph.attach_output_once().unwrap();
        graph.attach_output_once().unwrap();
        assert_eq!(hardware.output_attachments(), 1);
    }

    #[test]
    fn test_stabilization_only_when_supported() {
        let hardware = SimulatedHardware::with_default_devices();
        hardware.set_stabilization_supported(false);
        let mut graph = SessionGraph::new(Box::new(hardware.clone()));

        graph.attach_output_once().unwrap();
        assert!(!hardware.stabilization_enabled());
    }

    #[test]
    fn test_swap_video_success() {
        let hardware = SimulatedHardware::with_default_devices();
        let mut graph = SessionGraph::new(Box::new(hardware.clone()));
        graph.attach_video(camera("front", DevicePosition::Front)).unwrap();

        let previous = graph.swap_video(camera("back-wide", DevicePosition::Back)).unwrap();
        assert_eq!(previous.id, DeviceId::new("front"));
        assert_eq!(hardware.active_video_device(), Some(DeviceId::new("back-wide")));
        assert_eq!(
            graph.active_video_device().map(|d| d.id.clone()),
            Some(DeviceId::new("back-wide"))
        );
    }

    #[test]
    fn test_swap_video_rolls_back_on_rejection() {
        let hardware = SimulatedHardware::with_default_devices();
        hardware.reject_device("back-wide", "preset not supported");
        let mut graph = SessionGraph::new(Box::new(hardware.clone()));
        graph.attach_video(camera("front", DevicePosition::Front)).unwrap();

        let err = graph
            .swap_video(camera("back-wide", DevicePosition::Back))
            .unwrap_err();
        assert_eq!(err, HardwareError::Rejected("preset not supported".to_string()));
        assert_eq!(hardware.active_video_device(), Some(DeviceId::new("front")));
        assert_eq!(
            graph.active_video_device().map(|d| d.id.clone()),
            Some(DeviceId::new("front"))
        );
        assert_eq!(hardware.commits(), 1);
    }

    #[test]
    fn test_swap_without_video_input() {
        let hardware = SimulatedHardware::with_default_devices();
        let mut graph = SessionGraph::new(Box::new(hardware.clone()));

        assert!(graph.swap_video(camera("front", DevicePosition::Front)).is_err());
        assert_eq!(hardware.active_video_device(), None);
    }
}

//! Session configuration
//!
//! Builds the capture graph exactly once: camera, optional microphone and the
//! recording output, inside one hardware configuration transaction.

use super::graph::SharedGraph;
use super::state::SessionState;
use crate::capture::registry::DeviceRegistry;
use crate::capture::traits::{DevicePosition, SessionPreset};
use crate::utils::error::{CaptureError, CaptureResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What to build
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureRequest {
    pub preset: SessionPreset,
    pub position: Option<DevicePosition>,
    pub include_audio: bool,
}

/// What a configure call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigureOutcome {
    /// This call built the graph
    Configured,
    /// The graph was already built
    AlreadyConfigured,
    /// Another call is building the graph right now
    InProgress,
}

/// Idempotent builder of the capture graph
pub struct SessionConfigurator {
    state: Mutex<SessionState>,
    graph: SharedGraph,
    registry: Arc<DeviceRegistry>,
}

impl SessionConfigurator {
    pub fn new(graph: SharedGraph, registry: Arc<DeviceRegistry>) -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
            graph,
            registry,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Build the graph if nobody has yet
    ///
    /// The session is marked `Configuring` before the first await, so a
    /// concurrent call returns `InProgress` instead of racing the same edits.
    /// Any failure puts the session back to `Idle` for a later retry.
    pub async fn configure(&self, request: &ConfigureRequest) -> CaptureResult<ConfigureOutcome> {
        let Some(guard) = ConfiguringGuard::enter(&self.state) else {
            let outcome = match self.state() {
                SessionState::Ready => ConfigureOutcome::AlreadyConfigured,
                _ => ConfigureOutcome::InProgress,
            };
            tracing::debug!("Configure ignored: {:?}", outcome);
            return Ok(outcome);
        };

        tracing::info!(
            "Configuring capture session (preset {:?}, position {:?}, audio {})",
            request.preset,
            request.position,
            request.include_audio
        );

        let video = self.registry.default_video_device(request.position).await?;

        let audio = if request.include_audio {
            match self.registry.default_audio_device().await {
                Ok(device) => Some(device),
                Err(e) => {
                    tracing::info!("Continuing without audio: {}", e);
                    None
                }
            }
        } else {
            None
        };

        {
            let mut graph = self.graph.lock();
            graph.transaction(|graph| -> CaptureResult<()> {
                graph
                    .hardware_mut()
                    .set_preset(request.preset)
                    .map_err(|e| CaptureError::ConfigurationFailed(e.to_string()))?;

                graph.remove_all_inputs();

                graph
                    .attach_video(video)
                    .map_err(|e| CaptureError::AddInputFailed(e.to_string()))?;

                if let Some(audio) = audio {
                    if let Err(e) = graph.attach_audio(audio) {
                        tracing::warn!("Audio input rejected, recording video-only: {}", e);
                    }
                }

                graph
                    .attach_output_once()
                    .map_err(|e| CaptureError::AddOutputFailed(e.to_string()))
            })?;
        }

        guard.commit();
        tracing::info!("Capture session configured");
        Ok(ConfigureOutcome::Configured)
    }
}

/// Holds the session in `Configuring`
///
/// Dropping without [`ConfiguringGuard::commit`] returns the session to `Idle`,
/// including when the configure future itself is dropped mid-flight.
struct ConfiguringGuard<'a> {
    state: &'a Mutex<SessionState>,
    committed: bool,
}

impl<'a> ConfiguringGuard<'a> {
    fn enter(state: &'a Mutex<SessionState>) -> Option<Self> {
        let mut current = state.lock();
        if *current != SessionState::Idle {
            return None;
        }
        *current = SessionState::Configuring;

        Some(Self {
            state,
            committed: false,
        })
    }

    fn commit(mut self) {
        *self.state.lock() = SessionState::Ready;
        self.committed = true;
    }
}

impl Drop for ConfiguringGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            tracing::warn!("Capture session configuration abandoned, back to idle");
            *self.state.lock() = SessionState::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::simulated::SimulatedHardware;
    use crate::capture::traits::{Device, DeviceId, MediaKind};
    use crate::recorder::graph::SessionGraph;

    fn configurator(hardware: &SimulatedHardware) -> SessionConfigurator {
        let graph = SessionGraph::new(Box::new(hardware.clone())).into_shared();
        let registry = Arc::new(DeviceRegistry::new(Arc::new(hardware.clone())));
        SessionConfigurator::new(graph, registry)
    }

    fn request(include_audio: bool) -> ConfigureRequest {
        ConfigureRequest {
            preset: SessionPreset::Hd1920x1080,
            position: None,
            include_audio,
        }
    }

    #[tokio::test]
    async fn test_configure_builds_graph() {
        let hardware = SimulatedHardware::with_default_devices();
        let configurator = configurator(&hardware);

        let outcome = configurator.configure(&request(true)).await.unwrap();
        assert_eq!(outcome, ConfigureOutcome::Configured);
        assert_eq!(configurator.state(), SessionState::Ready);
        assert_eq!(hardware.active_video_device(), Some(DeviceId::new("back-wide")));
        assert_eq!(hardware.active_audio_device(), Some(DeviceId::new("mic")));
        assert_eq!(hardware.output_attachments(), 1);
        assert_eq!(hardware.preset(), SessionPreset::Hd1920x1080);
        assert_eq!(hardware.commits(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_configure_builds_once() {
        let hardware = SimulatedHardware::with_default_devices();
        hardware.set_discovery_delay(std::time::Duration::from_millis(10));
        let configurator = configurator(&hardware);

        let (a, b) = (request(true), request(true));
        let (first, second) = tokio::join!(configurator.configure(&a), configurator.configure(&b));

        assert_eq!(first.unwrap(), ConfigureOutcome::Configured);
        assert_eq!(second.unwrap(), ConfigureOutcome::InProgress);
        assert_eq!(hardware.commits(), 1);
        assert_eq!(hardware.output_attachments(), 1);

        let third = configurator.configure(&request(true)).await.unwrap();
        assert_eq!(third, ConfigureOutcome::AlreadyConfigured);
        assert_eq!(hardware.commits(), 1);
    }

    #[tokio::test]
    async fn test_missing_camera_reverts_to_idle() {
        let hardware = SimulatedHardware::new();
        let configurator = configurator(&hardware);

        let err = configurator.configure(&request(true)).await.unwrap_err();
        assert_eq!(err, CaptureError::NoDeviceAvailable(MediaKind::Video));
        assert_eq!(configurator.state(), SessionState::Idle);

        hardware.add_video_device(Device::camera("usb", "USB Camera", DevicePosition::Unspecified, false));
        let outcome = configurator.configure(&request(true)).await.unwrap();
        assert_eq!(outcome, ConfigureOutcome::Configured);
        assert_eq!(hardware.active_video_device(), Some(DeviceId::new("usb")));
    }

    #[tokio::test]
    async fn test_rejected_camera_is_add_input_failure() {
        let hardware = SimulatedHardware::with_default_devices();
        hardware.reject_device("back-wide", "incompatible preset");
        let configurator = configurator(&hardware);

        let err = configurator.configure(&request(false)).await.unwrap_err();
        assert!(matches!(err, CaptureError::AddInputFailed(_)));
        assert_eq!(configurator.state(), SessionState::Idle);

        hardware.accept_device("back-wide");
        configurator.configure(&request(false)).await.unwrap();
        assert_eq!(configurator.state(), SessionState::Ready);
        assert_eq!(hardware.output_attachments(), 1);
    }

    #[tokio::test]
    async fn test_audio_is_best_effort() {
        let hardware = SimulatedHardware::with_default_devices();
        hardware.reject_device("mic", "microphone busy");
        let configurator = configurator(&hardware);

        configurator.configure(&request(true)).await.unwrap();
        assert_eq!(configurator.state(), SessionState::Ready);
        assert_eq!(hardware.active_audio_device(), None);
    }

    #[tokio::test]
    async fn test_missing_microphone_is_not_fatal() {
        let hardware = SimulatedHardware::new();
        hardware.add_video_device(Device::camera("front", "Front", DevicePosition::Front, false));
        let configurator = configurator(&hardware);

        configurator.configure(&request(true)).await.unwrap();
        assert_eq!(hardware.active_video_device(), Some(DeviceId::new("front")));
        assert_eq!(hardware.active_audio_device(), None);
    }
}

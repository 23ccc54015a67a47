//! Camera hot-swapping on a configured graph

use super::graph::SharedGraph;
use super::state::SessionState;
use crate::capture::registry::DeviceRegistry;
use crate::capture::traits::Device;
use crate::utils::error::{CaptureError, CaptureResult};
use std::sync::Arc;

/// Result of a successful switch
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchOutcome {
    pub previous: Device,
    pub current: Device,
}

impl SwitchOutcome {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

/// Cycles the active camera through the registry order
pub struct DeviceSwitcher {
    graph: SharedGraph,
    registry: Arc<DeviceRegistry>,
}

impl DeviceSwitcher {
    pub fn new(graph: SharedGraph, registry: Arc<DeviceRegistry>) -> Self {
        Self { graph, registry }
    }

    /// Move to the camera after the active one, wrapping around
    ///
    /// A rejected camera leaves the previous one attached and the preference
    /// untouched.
    pub async fn switch_to_next(&self, state: SessionState) -> CaptureResult<SwitchOutcome> {
        if state != SessionState::Ready {
            return Err(CaptureError::NotConfigured);
        }

        let devices = self.registry.ordered_video_devices().await;

        let outcome = {
            let mut graph = self.graph.lock();
            let current = graph
                .active_video_device()
                .cloned()
                .ok_or(CaptureError::NotConfigured)?;

            if devices.len() < 2 {
                tracing::debug!("Only one camera available, nothing to switch to");
                return Ok(SwitchOutcome {
                    previous: current.clone(),
                    current,
                });
            }

            let index = devices.iter().position(|d| *d == current).unwrap_or(0);
            let next = devices[(index + 1) % devices.len()].clone();
            tracing::info!("Switching camera {} -> {}", current.id, next.id);

            let previous = graph
                .swap_video(next.clone())
                .map_err(|e| CaptureError::DeviceSwitchFailed(e.to_string()))?;

            SwitchOutcome {
                previous,
                current: next,
            }
        };

        self.registry.remember_preferred(&outcome.current);
        Ok(outcome)
    }
}

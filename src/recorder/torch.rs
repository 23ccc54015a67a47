//! Torch reconciliation
//!
//! Keeps what the user asked for (intent) separate from what the hardware
//! reports (observed), and re-issues "on" whenever the hardware drops the
//! torch while the intent still says on.

use super::broadcaster::{CaptureNotice, StatusBroadcaster};
use super::controller::TimerEvent;
use super::graph::SessionGraph;
use crate::capture::traits::{Device, HardwareError, ObservationToken, TorchMode, TorchObservedState};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Level used when switching the torch on
pub const MAX_TORCH_LEVEL: f32 = 1.0;

const REASSERTION_WINDOW: Duration = Duration::from_secs(1);

/// Tracks torch intent and converges the hardware toward it
pub struct TorchReconciler {
    intent: bool,
    observed: TorchObservedState,
    device: Option<Device>,
    observation: Option<ObservationToken>,
    max_reassertions_per_sec: u32,
    reassertions: VecDeque<Instant>,
    retry: Option<JoinHandle<()>>,
    timers: mpsc::UnboundedSender<TimerEvent>,
}

impl TorchReconciler {
    /// `timers` receives the deferred reassertion once the cap lets it through
    pub fn new(max_reassertions_per_sec: u32, timers: mpsc::UnboundedSender<TimerEvent>) -> Self {
        Self {
            intent: false,
            observed: TorchObservedState::default(),
            device: None,
            observation: None,
            max_reassertions_per_sec,
            reassertions: VecDeque::new(),
            retry: None,
            timers,
        }
    }

    pub fn intent(&self) -> bool {
        self.intent
    }

    pub fn observed(&self) -> TorchObservedState {
        self.observed
    }

    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    /// Follow `device` from now on
    ///
    /// The previous observation is cancelled before the new one is registered,
    /// so no callback from the old device can reach us afterwards.
    pub fn bind(
        &mut self,
        graph: &mut SessionGraph,
        device: Option<Device>,
        status: &StatusBroadcaster,
    ) {
        self.unbind(graph);

        if let Some(device) = &device {
            let token = graph.hardware_mut().observe_torch(&device.id);
            tracing::debug!("Observing torch of {} ({:?})", device.id, token);
            self.observation = Some(token);
        }
        self.device = device;
        self.refresh(graph, status);
    }

    fn unbind(&mut self, graph: &mut SessionGraph) {
        if let Some(token) = self.observation.take() {
            graph.hardware_mut().cancel_observation(token);
        }
        self.device = None;
        self.reassertions.clear();
        self.cancel_retry();
    }

    /// Flip the intent and command the hardware accordingly
    ///
    /// Torch failures are logged and reported as notices; they never fail the caller.
    pub fn toggle(&mut self, graph: &mut SessionGraph, status: &StatusBroadcaster) -> bool {
        self.intent = !self.intent;
        tracing::info!("Torch intent is now {}", if self.intent { "on" } else { "off" });

        if self.intent {
            if self.observed.available {
                self.command(graph, TorchMode::On, status);
            } else {
                tracing::debug!("Torch unavailable, keeping intent until it returns");
            }
        } else if self.supports_torch() {
            self.command(graph, TorchMode::Off, status);
        }

        self.refresh(graph, status);
        self.intent
    }

    /// Handle a torch notification that was marshaled into the coordinator
    pub fn on_torch_changed(
        &mut self,
        graph: &mut SessionGraph,
        token: ObservationToken,
        state: TorchObservedState,
        status: &StatusBroadcaster,
    ) {
        if self.observation != Some(token) {
            tracing::debug!("Ignoring stale torch notification ({:?})", token);
            return;
        }

        let previous = self.observed;
        self.observed = state;
        status.publish_torch(state);

        let dropped = previous.active && !state.active;
        let returned = !previous.available && state.available;
        if !(self.intent && state.available && !state.active && (dropped || returned)) {
            return;
        }

        if self.allow_reassertion(Instant::now()) {
            tracing::info!("Torch went off while intent is on, reasserting");
            self.command(graph, TorchMode::On, status);
            self.refresh(graph, status);
        } else {
            tracing::warn!(
                "Torch reassertion limit reached ({} per second), retrying later",
                self.max_reassertions_per_sec
            );
            self.schedule_retry();
        }
    }

    /// One corrective pass: switch on if intent is on and the hardware is not
    ///
    /// Returns whether a command was issued.
    pub fn reconcile(&mut self, graph: &mut SessionGraph, status: &StatusBroadcaster) -> bool {
        self.cancel_retry();
        self.refresh(graph, status);

        if !(self.intent && self.observed.available && !self.observed.active) {
            return false;
        }

        tracing::debug!("Reconciling torch toward intent");
        self.command(graph, TorchMode::On, status);
        self.refresh(graph, status);
        true
    }

    /// Session is stopping: torch off regardless of intent, observation released
    ///
    /// The intent survives so the next start can restore the torch.
    pub fn shutdown(&mut self, graph: &mut SessionGraph, status: &StatusBroadcaster) {
        if self.supports_torch() {
            self.command(graph, TorchMode::Off, status);
        }
        self.unbind(graph);

        self.observed = TorchObservedState {
            available: false,
            active: false,
            mode: TorchMode::Off,
        };
        status.publish_torch(self.observed);
    }

    fn supports_torch(&self) -> bool {
        self.device.as_ref().map_or(false, |d| d.has_illuminator)
    }

    fn command(&mut self, graph: &mut SessionGraph, mode: TorchMode, status: &StatusBroadcaster) {
        let Some(device) = &self.device else {
            return;
        };

        let level = match mode {
            TorchMode::On => MAX_TORCH_LEVEL,
            TorchMode::Off => 0.0,
        };

        match graph.hardware_mut().set_torch_mode(&device.id, mode, level) {
            Ok(()) => tracing::debug!("Torch of {} set to {:?}", device.id, mode),
            Err(e) => self.report_failure(&device.id.to_string(), mode, e, status),
        }
    }

    fn report_failure(
        &self,
        device: &str,
        mode: TorchMode,
        error: HardwareError,
        status: &StatusBroadcaster,
    ) {
        tracing::warn!("Failed to set torch of {} to {:?}: {}", device, mode, error);
        status.notify(CaptureNotice::TorchCommandFailed {
            message: error.to_string(),
        });
    }

    /// Re-read the hardware state of the bound device and publish it
    fn refresh(&mut self, graph: &SessionGraph, status: &StatusBroadcaster) {
        self.observed = match &self.device {
            Some(device) => graph.hardware().torch_state(&device.id),
            None => TorchObservedState::default(),
        };
        status.publish_torch(self.observed);
    }

    /// Queue one reconcile pass for when the oldest reassertion leaves the window
    fn schedule_retry(&mut self) {
        if self.retry.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let Some(oldest) = self.reassertions.front() else {
            return;
        };

        let due = *oldest + REASSERTION_WINDOW;
        let timers = self.timers.clone();
        self.retry = Some(tokio::spawn(async move {
            tokio::time::sleep_until(due).await;
            let _ = timers.send(TimerEvent::ReconcileTorch);
        }));
    }

    fn cancel_retry(&mut self) {
        if let Some(task) = self.retry.take() {
            task.abort();
        }
    }

    fn allow_reassertion(&mut self, now: Instant) -> bool {
        while let Some(oldest) = self.reassertions.front() {
            if now.duration_since(*oldest) >= REASSERTION_WINDOW {
                self.reassertions.pop_front();
            } else {
                break;
            }
        }

        if self.reassertions.len() >= self.max_reassertions_per_sec as usize {
            return false;
        }
        self.reassertions.push_back(now);
        true
    }
}

impl Drop for TorchReconciler {
    fn drop(&mut self) {
        self.cancel_retry();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::simulated::SimulatedHardware;
    use crate::capture::traits::{DevicePosition, HardwareEvent};
    use tokio::sync::mpsc;

    struct Fixture {
        hardware: SimulatedHardware,
        graph: SessionGraph,
        events: mpsc::UnboundedReceiver<HardwareEvent>,
        timers: mpsc::UnboundedReceiver<TimerEvent>,
        status: StatusBroadcaster,
        torch: TorchReconciler,
    }

    fn back() -> Device {
        Device::camera("back-wide", "Back Wide Camera", DevicePosition::Back, true)
    }

    fn front() -> Device {
        Device::camera("front", "Front Camera", DevicePosition::Front, false)
    }

    fn running_fixture(device: Device, max_per_sec: u32) -> Fixture {
        let hardware = SimulatedHardware::with_default_devices();
        let mut boxed = hardware.clone();
        let (tx, events) = mpsc::unbounded_channel();
        crate::capture::traits::CaptureHardware::set_event_sink(&mut boxed, tx);

        let mut graph = SessionGraph::new(Box::new(boxed));
        graph.attach_video(device.clone()).unwrap();
        graph.hardware_mut().start_running();

        let status = StatusBroadcaster::new(16);
        let (timer_tx, timers) = mpsc::unbounded_channel();
        let mut torch = TorchReconciler::new(max_per_sec, timer_tx);
        torch.bind(&mut graph, Some(device), &status);

        Fixture {
            hardware,
            graph,
            events,
            timers,
            status,
            torch,
        }
    }

    impl Fixture {
        /// Deliver queued hardware events the way the coordinator does
        fn pump(&mut self) {
            while let Ok(event) = self.events.try_recv() {
                if let HardwareEvent::TorchChanged { token, state, .. } = event {
                    self.torch
                        .on_torch_changed(&mut self.graph, token, state, &self.status);
                }
            }
            while let Ok(timer) = self.timers.try_recv() {
                if timer == TimerEvent::ReconcileTorch {
                    self.torch.reconcile(&mut self.graph, &self.status);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_toggle_on_and_off() {
        let mut f = running_fixture(back(), 4);

        assert!(f.torch.toggle(&mut f.graph, &f.status));
        assert!(f.torch.observed().active);
        assert_eq!(f.torch.observed().mode, TorchMode::On);

        assert!(!f.torch.toggle(&mut f.graph, &f.status));
        f.pump();
        assert!(!f.torch.observed().active);
        assert_eq!(f.hardware.torch("back-wide").mode, TorchMode::Off);
    }

    #[tokio::test]
    async fn test_toggle_on_unavailable_device_stays_off() {
        let mut f = running_fixture(front(), 4);

        assert!(f.torch.toggle(&mut f.graph, &f.status));
        assert!(f.torch.intent());
        assert!(!f.torch.observed().available);
        assert!(!f.torch.observed().active);
        assert!(f.hardware.torch_commands().is_empty());
    }

    #[tokio::test]
    async fn test_hardware_revert_is_reasserted() {
        let mut f = running_fixture(back(), 4);
        f.torch.toggle(&mut f.graph, &f.status);
        f.pump();

        f.hardware.force_torch_off("back-wide");
        assert!(!f.hardware.torch("back-wide").active);
        f.pump();

        assert!(f.torch.intent());
        assert!(f.torch.observed().active);
        assert!(f.hardware.torch("back-wide").active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reassertion_is_capped() {
        let mut f = running_fixture(back(), 2);
        f.torch.toggle(&mut f.graph, &f.status);
        f.pump();

        for _ in 0..3 {
            f.hardware.force_torch_off("back-wide");
            f.pump();
        }
        assert!(!f.hardware.torch("back-wide").active);
        assert!(f.torch.intent());
        assert!(!f.torch.observed().active);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        f.pump();
        assert!(f.hardware.torch("back-wide").active);
        assert!(f.torch.observed().active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capped_reassertion_schedules_one_retry() {
        let mut f = running_fixture(back(), 1);
        f.torch.toggle(&mut f.graph, &f.status);
        f.pump();

        for _ in 0..4 {
            f.hardware.force_torch_off("back-wide");
            f.pump();
        }
        assert!(!f.hardware.torch("back-wide").active);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let mut retries = 0;
        while let Ok(timer) = f.timers.try_recv() {
            assert_eq!(timer, TimerEvent::ReconcileTorch);
            retries += 1;
        }
        assert_eq!(retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbind_cancels_pending_retry() {
        let mut f = running_fixture(back(), 1);
        f.torch.toggle(&mut f.graph, &f.status);
        f.pump();

        for _ in 0..2 {
            f.hardware.force_torch_off("back-wide");
            f.pump();
        }
        f.torch.shutdown(&mut f.graph, &f.status);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(f.timers.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_forces_off_and_keeps_intent() {
        let mut f = running_fixture(back(), 4);
        f.torch.toggle(&mut f.graph, &f.status);
        assert!(f.torch.observed().active);

        f.torch.shutdown(&mut f.graph, &f.status);
        assert_eq!(f.torch.observed().mode, TorchMode::Off);
        assert!(!f.torch.observed().active);
        assert!(f.torch.intent());
        assert_eq!(f.hardware.observer_count(), 0);
        assert_eq!(f.hardware.torch("back-wide").mode, TorchMode::Off);

        f.torch.bind(&mut f.graph, Some(back()), &f.status);
        assert!(f.torch.reconcile(&mut f.graph, &f.status));
        assert!(f.torch.observed().active);
    }

    #[tokio::test]
    async fn test_stale_notifications_are_ignored() {
        let mut f = running_fixture(back(), 4);
        let stale = f.torch.observation.unwrap();
        f.torch.bind(&mut f.graph, Some(back()), &f.status);

        let bogus = TorchObservedState {
            available: true,
            active: true,
            mode: TorchMode::On,
        };
        f.torch.on_torch_changed(&mut f.graph, stale, bogus, &f.status);
        assert!(!f.torch.observed().active);
    }
}

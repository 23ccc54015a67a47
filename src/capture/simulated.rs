//! In-memory capture hardware
//!
//! A stand-in for the platform capture stack. It enforces the same rules the
//! real graph does (one input per media kind, one movie output, torch only on a
//! running attached device) and reports torch changes and recording completion
//! from outside the caller's context, the way hardware callbacks arrive.

use super::traits::{
    CaptureHardware, Device, DeviceDiscovery, DeviceId, DevicePosition, HardwareError, HardwareEvent,
    HardwareEventSender, InputHandle, MediaKind, ObservationToken, SessionPreset, TorchMode,
    TorchObservedState,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Time between `stop_recording` and the finished notification
const DEFAULT_FINALIZE_DELAY: Duration = Duration::from_millis(50);

/// Simulated capture device set and graph
///
/// Cloning shares the same underlying state, so a test can keep a clone to
/// drive and inspect the hardware the engine owns.
#[derive(Clone)]
pub struct SimulatedHardware {
    inner: Arc<Mutex<SimState>>,
}

#[derive(Default)]
struct SimState {
    video_devices: Vec<Device>,
    audio_devices: Vec<Device>,
    preferred: Option<DeviceId>,
    rejected: HashMap<DeviceId, String>,
    sink: Option<HardwareEventSender>,

    preset: SessionPreset,
    in_configuration: bool,
    commits: u32,
    inputs: Vec<(InputHandle, Device)>,
    next_handle: u64,
    output_attached: bool,
    output_attachments: u32,
    stabilization_supported: bool,
    stabilization: bool,
    running: bool,
    recording: Option<PathBuf>,

    torch_on: HashSet<DeviceId>,
    observers: HashMap<ObservationToken, DeviceId>,
    last_emitted: HashMap<ObservationToken, TorchObservedState>,
    next_token: u64,
    torch_commands: Vec<(DeviceId, TorchMode)>,

    revert_torch_on_record: bool,
    fail_next_recording: Option<String>,
    finalize_delay: Duration,
    discovery_delay: Duration,
}

impl SimState {
    fn find_device(&self, id: &DeviceId) -> Option<&Device> {
        self.video_devices
            .iter()
            .chain(self.audio_devices.iter())
            .find(|d| &d.id == id)
    }

    fn is_attached(&self, id: &DeviceId) -> bool {
        self.inputs.iter().any(|(_, d)| &d.id == id)
    }

    fn torch_state_of(&self, id: &DeviceId) -> TorchObservedState {
        let has_illuminator = self
            .find_device(id)
            .map(|d| d.has_illuminator)
            .unwrap_or(false);
        let available = has_illuminator && self.running && self.is_attached(id);
        let on = self.torch_on.contains(id);

        TorchObservedState {
            available,
            active: available && on,
            mode: if on { TorchMode::On } else { TorchMode::Off },
        }
    }

    /// Emit a change notification to every observer whose device state moved
    fn notify_observers(&mut self) {
        let Some(sink) = self.sink.clone() else {
            return;
        };

        let observers: Vec<(ObservationToken, DeviceId)> = self
            .observers
            .iter()
            .map(|(token, device)| (*token, device.clone()))
            .collect();

        for (token, device) in observers {
            let state = self.torch_state_of(&device);
            if self.last_emitted.get(&token) == Some(&state) {
                continue;
            }
            self.last_emitted.insert(token, state);
            let _ = sink.send(HardwareEvent::TorchChanged {
                token,
                device,
                state,
            });
        }
    }
}

impl SimulatedHardware {
    /// Hardware with no devices at all
    pub fn new() -> Self {
        let state = SimState {
            finalize_delay: DEFAULT_FINALIZE_DELAY,
            stabilization_supported: true,
            ..SimState::default()
        };
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// A phone-like device set: front camera, back camera with torch, one microphone
    pub fn with_default_devices() -> Self {
        let hardware = Self::new();
        hardware.add_video_device(Device::camera(
            "front",
            "Front Camera",
            DevicePosition::Front,
            false,
        ));
        hardware.add_video_device(Device::camera(
            "back-wide",
            "Back Wide Camera",
            DevicePosition::Back,
            true,
        ));
        hardware.add_audio_device(Device::microphone("mic", "Built-in Microphone"));
        hardware
    }

    pub fn add_video_device(&self, device: Device) {
        self.inner.lock().video_devices.push(device);
    }

    pub fn add_audio_device(&self, device: Device) {
        self.inner.lock().audio_devices.push(device);
    }

    /// Make the graph refuse inputs from `id`
    pub fn reject_device(&self, id: &str, reason: &str) {
        self.inner
            .lock()
            .rejected
            .insert(DeviceId::new(id), reason.to_string());
    }

    pub fn accept_device(&self, id: &str) {
        self.inner.lock().rejected.remove(&DeviceId::new(id));
    }

    pub fn set_stabilization_supported(&self, supported: bool) {
        self.inner.lock().stabilization_supported = supported;
    }

    /// Turn the torch off whenever a recording starts
    pub fn set_revert_torch_on_record(&self, revert: bool) {
        self.inner.lock().revert_torch_on_record = revert;
    }

    /// The next finished recording reports `message` as its error
    pub fn fail_next_recording(&self, message: &str) {
        self.inner.lock().fail_next_recording = Some(message.to_string());
    }

    pub fn set_finalize_delay(&self, delay: Duration) {
        self.inner.lock().finalize_delay = delay;
    }

    /// Make device enumeration take `delay`, like a permission-gated system call
    pub fn set_discovery_delay(&self, delay: Duration) {
        self.inner.lock().discovery_delay = delay;
    }

    /// The hardware switches the torch off on its own
    pub fn force_torch_off(&self, id: &str) {
        let mut state = self.inner.lock();
        state.torch_on.remove(&DeviceId::new(id));
        state.notify_observers();
    }

    pub fn active_video_device(&self) -> Option<DeviceId> {
        self.active_device(MediaKind::Video)
    }

    pub fn active_audio_device(&self) -> Option<DeviceId> {
        self.active_device(MediaKind::Audio)
    }

    fn active_device(&self, kind: MediaKind) -> Option<DeviceId> {
        self.inner
            .lock()
            .inputs
            .iter()
            .find(|(_, d)| d.kind == kind)
            .map(|(_, d)| d.id.clone())
    }

    /// Number of committed configuration transactions
    pub fn commits(&self) -> u32 {
        self.inner.lock().commits
    }

    /// Number of times a movie output was attached
    pub fn output_attachments(&self) -> u32 {
        self.inner.lock().output_attachments
    }

    pub fn stabilization_enabled(&self) -> bool {
        self.inner.lock().stabilization
    }

    pub fn running(&self) -> bool {
        self.inner.lock().running
    }

    pub fn recording_path(&self) -> Option<PathBuf> {
        self.inner.lock().recording.clone()
    }

    pub fn preferred(&self) -> Option<DeviceId> {
        self.inner.lock().preferred.clone()
    }

    pub fn preset(&self) -> SessionPreset {
        self.inner.lock().preset
    }

    pub fn observer_count(&self) -> usize {
        self.inner.lock().observers.len()
    }

    /// Every torch command accepted so far, oldest first
    pub fn torch_commands(&self) -> Vec<(DeviceId, TorchMode)> {
        self.inner.lock().torch_commands.clone()
    }

    pub fn torch(&self, id: &str) -> TorchObservedState {
        self.inner.lock().torch_state_of(&DeviceId::new(id))
    }
}

impl Default for SimulatedHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureHardware for SimulatedHardware {
    fn set_event_sink(&mut self, sink: HardwareEventSender) {
        self.inner.lock().sink = Some(sink);
    }

    fn begin_configuration(&mut self) {
        self.inner.lock().in_configuration = true;
    }

    fn commit_configuration(&mut self) {
        let mut state = self.inner.lock();
        state.in_configuration = false;
        state.commits += 1;
        state.notify_observers();
    }

    fn set_preset(&mut self, preset: SessionPreset) -> Result<(), HardwareError> {
        self.inner.lock().preset = preset;
        Ok(())
    }

    fn add_input(&mut self, device: &Device) -> Result<InputHandle, HardwareError> {
        let mut state = self.inner.lock();

        let known = state
            .find_device(&device.id)
            .cloned()
            .ok_or_else(|| HardwareError::DeviceNotFound(device.id.clone()))?;

        if let Some(reason) = state.rejected.get(&device.id) {
            return Err(HardwareError::Rejected(reason.clone()));
        }

        if state.inputs.iter().any(|(_, d)| d.kind == known.kind) {
            return Err(HardwareError::Rejected(format!(
                "graph already has a {} input",
                known.kind
            )));
        }

        state.next_handle += 1;
        let handle = InputHandle(state.next_handle);
        state.inputs.push((handle, known));
        if !state.in_configuration {
            state.notify_observers();
        }
        Ok(handle)
    }

    fn remove_input(&mut self, input: InputHandle) {
        let mut state = self.inner.lock();
        if let Some(index) = state.inputs.iter().position(|(h, _)| *h == input) {
            let (_, device) = state.inputs.remove(index);
            state.torch_on.remove(&device.id);
        }
        if !state.in_configuration {
            state.notify_observers();
        }
    }

    fn add_movie_output(&mut self) -> Result<(), HardwareError> {
        let mut state = self.inner.lock();
        if state.output_attached {
            return Err(HardwareError::Rejected(
                "movie output already attached".to_string(),
            ));
        }
        state.output_attached = true;
        state.output_attachments += 1;
        Ok(())
    }

    fn supports_stabilization(&self) -> bool {
        self.inner.lock().stabilization_supported
    }

    fn set_stabilization(&mut self, enabled: bool) {
        self.inner.lock().stabilization = enabled;
    }

    fn start_running(&mut self) {
        let mut state = self.inner.lock();
        state.running = true;
        state.notify_observers();
    }

    fn stop_running(&mut self) {
        let mut state = self.inner.lock();
        state.running = false;
        state.torch_on.clear();
        state.notify_observers();
    }

    fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    fn start_recording(&mut self, output: &Path) -> Result<(), HardwareError> {
        let mut state = self.inner.lock();

        if !state.output_attached {
            return Err(HardwareError::Rejected("no movie output attached".to_string()));
        }
        if !state.running {
            return Err(HardwareError::Rejected("session is not running".to_string()));
        }
        if state.recording.is_some() {
            return Err(HardwareError::Rejected("output is already recording".to_string()));
        }

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HardwareError::Io(e.to_string()))?;
        }
        std::fs::write(output, b"simulated recording")
            .map_err(|e| HardwareError::Io(e.to_string()))?;

        state.recording = Some(output.to_path_buf());

        if state.revert_torch_on_record {
            state.torch_on.clear();
            state.notify_observers();
        }
        Ok(())
    }

    fn stop_recording(&mut self) {
        let mut state = self.inner.lock();
        let Some(output) = state.recording.take() else {
            return;
        };
        let error = state.fail_next_recording.take();
        let Some(sink) = state.sink.clone() else {
            return;
        };
        let delay = state.finalize_delay;
        let event = HardwareEvent::RecordingFinished { output, error };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = sink.send(event);
                });
            }
            Err(_) => {
                let _ = sink.send(event);
            }
        }
    }

    fn torch_state(&self, device: &DeviceId) -> TorchObservedState {
        self.inner.lock().torch_state_of(device)
    }

    fn set_torch_mode(
        &mut self,
        device: &DeviceId,
        mode: TorchMode,
        level: f32,
    ) -> Result<(), HardwareError> {
        let mut state = self.inner.lock();

        let has_illuminator = state
            .find_device(device)
            .map(|d| d.has_illuminator)
            .ok_or_else(|| HardwareError::DeviceNotFound(device.clone()))?;
        if !has_illuminator {
            return Err(HardwareError::Unsupported(format!("{device} has no torch")));
        }

        match mode {
            TorchMode::On => {
                if !state.torch_state_of(device).available {
                    return Err(HardwareError::Rejected("torch is unavailable".to_string()));
                }
                if !(level > 0.0 && level <= 1.0) {
                    return Err(HardwareError::Rejected(format!("invalid torch level {level}")));
                }
                state.torch_on.insert(device.clone());
            }
            TorchMode::Off => {
                state.torch_on.remove(device);
            }
        }

        state.torch_commands.push((device.clone(), mode));
        state.notify_observers();
        Ok(())
    }

    fn observe_torch(&mut self, device: &DeviceId) -> ObservationToken {
        let mut state = self.inner.lock();
        state.next_token += 1;
        let token = ObservationToken(state.next_token);
        state.observers.insert(token, device.clone());
        let current = state.torch_state_of(device);
        state.last_emitted.insert(token, current);
        token
    }

    fn cancel_observation(&mut self, token: ObservationToken) {
        let mut state = self.inner.lock();
        state.observers.remove(&token);
        state.last_emitted.remove(&token);
    }
}

#[async_trait]
impl DeviceDiscovery for SimulatedHardware {
    async fn devices(&self, kind: MediaKind) -> Vec<Device> {
        let delay = self.inner.lock().discovery_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let state = self.inner.lock();
        match kind {
            MediaKind::Video => state.video_devices.clone(),
            MediaKind::Audio => state.audio_devices.clone(),
        }
    }

    fn preferred_video_device(&self) -> Option<DeviceId> {
        self.inner.lock().preferred.clone()
    }

    fn set_preferred_video_device(&self, id: &DeviceId) {
        self.inner.lock().preferred = Some(id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn back_camera(hardware: &SimulatedHardware) -> Device {
        hardware
            .inner
            .lock()
            .video_devices
            .iter()
            .find(|d| d.id.as_str() == "back-wide")
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_graph_accepts_one_input_per_kind() {
        let mut hardware = SimulatedHardware::with_default_devices();
        let back = back_camera(&hardware);
        let front = Device::camera("front", "Front Camera", DevicePosition::Front, false);

        hardware.add_input(&back).unwrap();
        let err = hardware.add_input(&front).unwrap_err();
        assert!(matches!(err, HardwareError::Rejected(_)));
        assert_eq!(hardware.active_video_device(), Some(DeviceId::new("back-wide")));
    }

    #[test]
    fn test_torch_requires_running_attached_device() {
        let mut hardware = SimulatedHardware::with_default_devices();
        let back = back_camera(&hardware);

        assert!(!hardware.torch("back-wide").available);
        hardware.add_input(&back).unwrap();
        assert!(!hardware.torch("back-wide").available);

        hardware.start_running();
        assert!(hardware.torch("back-wide").available);
        hardware
            .set_torch_mode(&back.id, TorchMode::On, 1.0)
            .unwrap();
        assert!(hardware.torch("back-wide").active);

        hardware.stop_running();
        let state = hardware.torch("back-wide");
        assert!(!state.available);
        assert_eq!(state.mode, TorchMode::Off);
    }

    #[test]
    fn test_observers_receive_only_changes() {
        let mut hardware = SimulatedHardware::with_default_devices();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hardware.set_event_sink(tx);
        let back = back_camera(&hardware);
        hardware.add_input(&back).unwrap();
        hardware.start_running();

        let token = hardware.observe_torch(&back.id);
        hardware.set_torch_mode(&back.id, TorchMode::On, 1.0).unwrap();
        hardware.force_torch_off("back-wide");
        hardware.force_torch_off("back-wide");

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            HardwareEvent::TorchChanged { token: t, state, .. } if *t == token && !state.active
        ));

        hardware.cancel_observation(token);
        hardware.set_torch_mode(&back.id, TorchMode::On, 1.0).unwrap();
        assert!(rx.try_recv().is_err());
    }
}

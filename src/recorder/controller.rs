//! Recording controller
//!
//! Starts and stops file recording on the configured output, polls the
//! elapsed duration while a session is open and closes the session when the
//! hardware reports that the file is finished.

use super::broadcaster::StatusBroadcaster;
use super::graph::SessionGraph;
use super::state::{CaptureStatus, RecordingPaths, RecordingSession};
use crate::utils::error::{CaptureError, CaptureResult};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

/// Timer callbacks resubmitted into the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Duration poll for an open recording
    RecordingTick { session_id: Uuid },
    /// Torch pass after a recording started or a capped reassertion
    ReconcileTorch,
}

/// A session closed by the hardware
#[derive(Debug)]
pub struct FinishedRecording {
    pub session: RecordingSession,
    pub duration_secs: f64,
    pub error: Option<String>,
}

/// Owns the single recording session and its timers
pub struct RecordingController {
    session: Option<RecordingSession>,
    last_duration: f64,
    stopped_duration: Option<f64>,
    poller: Option<JoinHandle<()>>,
    torch_pass: Option<JoinHandle<()>>,
    poll_interval: Duration,
    torch_delay: Duration,
    timers: mpsc::UnboundedSender<TimerEvent>,
}

impl RecordingController {
    pub fn new(
        poll_interval: Duration,
        torch_delay: Duration,
        timers: mpsc::UnboundedSender<TimerEvent>,
    ) -> Self {
        Self {
            session: None,
            last_duration: 0.0,
            stopped_duration: None,
            poller: None,
            torch_pass: None,
            poll_interval,
            torch_delay,
            timers,
        }
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Begin recording to `paths.video`
    ///
    /// Rejected without side effects while another session is open.
    pub fn start(
        &mut self,
        graph: &mut SessionGraph,
        paths: RecordingPaths,
        status: &StatusBroadcaster,
    ) -> CaptureResult<RecordingSession> {
        if let Some(open) = &self.session {
            tracing::warn!("Recording already in progress: {}", open.id);
            return Err(CaptureError::RecordingInProgress);
        }
        if !graph.has_output() {
            return Err(CaptureError::NotConfigured);
        }

        tracing::info!("Starting recording to: {}", paths.video.display());
        graph
            .hardware_mut()
            .start_recording(&paths.video)
            .map_err(|e| CaptureError::RecordingFailed(e.to_string()))?;

        let session = RecordingSession::new(paths);
        self.last_duration = 0.0;
        self.stopped_duration = None;
        status.publish_capture(CaptureStatus::Recording { duration_secs: 0.0 });

        self.spawn_poller(session.id);
        self.spawn_torch_pass();

        self.session = Some(session.clone());
        Ok(session)
    }

    /// Ask the hardware to finish the open recording
    ///
    /// Polling stops immediately; the session stays open until the hardware
    /// reports completion. Returns whether a recording was open.
    pub fn stop(&mut self, graph: &mut SessionGraph) -> bool {
        let Some(session) = &self.session else {
            tracing::debug!("Stop requested with no open recording");
            return false;
        };

        if self.stopped_duration.is_some() {
            return true;
        }

        tracing::info!("Stopping recording {}", session.id);
        self.stopped_duration = Some(session.elapsed_secs().max(self.last_duration));
        self.cancel_timers();
        graph.hardware_mut().stop_recording();
        true
    }

    /// Publish the elapsed duration; ticks for other sessions are ignored
    pub fn on_tick(&mut self, session_id: Uuid, status: &StatusBroadcaster) {
        let Some(session) = &self.session else {
            return;
        };
        if session.id != session_id || self.stopped_duration.is_some() {
            return;
        }

        let duration = session.elapsed_secs().max(self.last_duration);
        self.last_duration = duration;
        status.publish_capture(CaptureStatus::Recording {
            duration_secs: duration,
        });
    }

    /// Close the session after the hardware finished writing `output`
    pub fn on_finished(
        &mut self,
        output: &Path,
        error: Option<String>,
        status: &StatusBroadcaster,
    ) -> Option<FinishedRecording> {
        self.cancel_timers();

        let Some(session) = self.session.take() else {
            tracing::warn!("Completion for {} without an open recording", output.display());
            return None;
        };
        if session.output != output {
            tracing::warn!(
                "Completion path {} differs from session output {}",
                output.display(),
                session.output.display()
            );
        }

        let duration_secs = self
            .stopped_duration
            .take()
            .unwrap_or_else(|| session.elapsed_secs().max(self.last_duration));
        self.last_duration = 0.0;
        status.publish_capture(CaptureStatus::Idle);

        match &error {
            Some(e) => tracing::error!("Recording {} failed: {}", session.id, e),
            None => tracing::info!("Recording {} finished after {:.2}s", session.id, duration_secs),
        }

        Some(FinishedRecording {
            session,
            duration_secs,
            error,
        })
    }

    fn spawn_poller(&mut self, session_id: Uuid) {
        let timers = self.timers.clone();
        let period = self.poll_interval;

        self.poller = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if timers.send(TimerEvent::RecordingTick { session_id }).is_err() {
                    break;
                }
            }
        }));
    }

    /// Recording start may make the hardware drop the torch; check once it settled
    fn spawn_torch_pass(&mut self) {
        let timers = self.timers.clone();
        let delay = self.torch_delay;

        self.torch_pass = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timers.send(TimerEvent::ReconcileTorch);
        }));
    }

    fn cancel_timers(&mut self) {
        for task in [self.poller.take(), self.torch_pass.take()].into_iter().flatten() {
            task.abort();
        }
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}

//! Capture coordinator
//!
//! The single owner of the capture graph. Requests from handles, hardware
//! callbacks and timer ticks all arrive as messages and are applied one at a
//! time, so no two mutations of the graph, the recording output or the torch
//! ever overlap.

use super::broadcaster::{CaptureNotice, StatusBroadcaster, StatusFeed};
use super::configurator::{ConfigureOutcome, ConfigureRequest, SessionConfigurator};
use super::controller::{FinishedRecording, RecordingController, TimerEvent};
use super::graph::{SessionGraph, SharedGraph};
use super::state::{RecordedMedia, RecordingCompletion, RecordingPaths, RecordingSession, SessionState};
use super::switcher::{DeviceSwitcher, SwitchOutcome};
use super::torch::TorchReconciler;
use crate::capture::permissions::{request_capture_access, StaticPermissions};
use crate::capture::registry::DeviceRegistry;
use crate::capture::simulated::SimulatedHardware;
use crate::capture::traits::{
    CaptureHardware, Device, DeviceDiscovery, FrameSource, HardwareEvent, MediaKind, PermissionGate,
    TorchObservedState,
};
use crate::config::CaptureConfig;
use crate::thumbnail::{FfmpegThumbnailer, ThumbnailGenerator};
use crate::utils::error::{CaptureError, CaptureResult};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// How long shutdown waits for the hardware to finish an open recording
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(10);

/// Requests a [`CaptureHandle`] sends to the coordinator
enum Request {
    Prepare {
        request: ConfigureRequest,
        reply: oneshot::Sender<CaptureResult<()>>,
    },
    Configure {
        request: ConfigureRequest,
        reply: oneshot::Sender<CaptureResult<()>>,
    },
    StartStream {
        reply: oneshot::Sender<CaptureResult<()>>,
    },
    StopStream {
        reply: oneshot::Sender<CaptureResult<()>>,
    },
    SwitchToNext {
        reply: oneshot::Sender<CaptureResult<SwitchOutcome>>,
    },
    StartRecording {
        paths: RecordingPaths,
        reply: oneshot::Sender<CaptureResult<RecordingSession>>,
    },
    StopRecording {
        reply: oneshot::Sender<bool>,
    },
    ToggleTorch {
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Point-in-time view of the whole session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub running: bool,
    pub video_device: Option<Device>,
    pub audio_device: Option<Device>,
    pub recording: Option<RecordingSession>,
    pub torch_intent: bool,
    pub torch: TorchObservedState,
}

/// Platform services the coordinator drives
pub struct CaptureBackend {
    pub hardware: Box<dyn CaptureHardware>,
    pub discovery: Arc<dyn DeviceDiscovery>,
    pub permissions: Arc<dyn PermissionGate>,
    pub thumbnails: Arc<dyn ThumbnailGenerator>,
}

impl CaptureBackend {
    /// Simulated hardware, all permissions granted, ffmpeg thumbnails
    pub fn simulated(hardware: &SimulatedHardware) -> Self {
        Self {
            hardware: Box::new(hardware.clone()),
            discovery: Arc::new(hardware.clone()),
            permissions: Arc::new(StaticPermissions::granted()),
            thumbnails: Arc::new(FfmpegThumbnailer::new()),
        }
    }

    pub fn with_permissions(mut self, permissions: impl PermissionGate + 'static) -> Self {
        self.permissions = Arc::new(permissions);
        self
    }

    pub fn with_thumbnails(mut self, thumbnails: impl ThumbnailGenerator + 'static) -> Self {
        self.thumbnails = Arc::new(thumbnails);
        self
    }
}

/// Receiving ends of the coordinator's three inboxes
struct Inbox {
    hardware: mpsc::UnboundedReceiver<HardwareEvent>,
    timers: mpsc::UnboundedReceiver<TimerEvent>,
    requests: mpsc::UnboundedReceiver<Request>,
}

/// Exclusive owner of the capture session
pub struct CaptureCoordinator {
    config: CaptureConfig,
    graph: SharedGraph,
    configurator: SessionConfigurator,
    switcher: DeviceSwitcher,
    recorder: RecordingController,
    torch: TorchReconciler,
    status: StatusBroadcaster,
    permissions: Arc<dyn PermissionGate>,
    thumbnails: Arc<dyn ThumbnailGenerator>,
    live: watch::Sender<bool>,
    completions: mpsc::UnboundedSender<RecordingCompletion>,
}

impl CaptureCoordinator {
    /// Start the coordinator task
    ///
    /// Returns the handle used to drive the session and the completion sink,
    /// which receives exactly one [`RecordingCompletion`] per recording. The
    /// task stops the session and exits once every handle is dropped.
    pub fn spawn(
        config: CaptureConfig,
        backend: CaptureBackend,
    ) -> (CaptureHandle, mpsc::UnboundedReceiver<RecordingCompletion>) {
        let (hardware_tx, hardware_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (live_tx, live_rx) = watch::channel(false);

        let mut hardware = backend.hardware;
        hardware.set_event_sink(hardware_tx);
        let graph = SessionGraph::new(hardware).into_shared();
        let registry = Arc::new(DeviceRegistry::new(backend.discovery));
        let status = StatusBroadcaster::new(config.notice_capacity);

        let handle = CaptureHandle {
            requests: request_tx,
            frame_source: FrameSource::new(live_rx),
            feed: status.feed(),
            output_dir: config.output_dir.clone(),
            video_extension: config.video_extension.clone(),
        };

        let coordinator = Self {
            configurator: SessionConfigurator::new(graph.clone(), registry.clone()),
            switcher: DeviceSwitcher::new(graph.clone(), registry),
            recorder: RecordingController::new(
                config.poll_interval(),
                config.torch_reconcile_delay(),
                timer_tx.clone(),
            ),
            torch: TorchReconciler::new(config.max_torch_reassertions_per_sec, timer_tx),
            graph,
            status,
            permissions: backend.permissions,
            thumbnails: backend.thumbnails,
            live: live_tx,
            completions: completion_tx,
            config,
        };

        let inbox = Inbox {
            hardware: hardware_rx,
            timers: timer_rx,
            requests: request_rx,
        };
        tokio::spawn(coordinator.run(inbox));

        (handle, completion_rx)
    }

    async fn run(mut self, mut inbox: Inbox) {
        tracing::info!("Capture coordinator started");

        loop {
            tokio::select! {
                biased;

                Some(event) = inbox.hardware.recv() => self.on_hardware_event(event),
                Some(timer) = inbox.timers.recv() => self.on_timer(timer),
                request = inbox.requests.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => break,
                },
            }
        }

        self.shutdown(&mut inbox.hardware).await;
        tracing::info!("Capture coordinator stopped");
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::Prepare { request, reply } => {
                let _ = reply.send(self.prepare(request).await);
            }
            Request::Configure { request, reply } => {
                let _ = reply.send(self.configure(&request).await);
            }
            Request::StartStream { reply } => {
                let _ = reply.send(self.start_stream());
            }
            Request::StopStream { reply } => {
                self.stop_stream();
                let _ = reply.send(Ok(()));
            }
            Request::SwitchToNext { reply } => {
                let _ = reply.send(self.switch_to_next().await);
            }
            Request::StartRecording { paths, reply } => {
                let _ = reply.send(self.start_recording(paths));
            }
            Request::StopRecording { reply } => {
                let mut graph = self.graph.lock();
                let _ = reply.send(self.recorder.stop(&mut graph));
            }
            Request::ToggleTorch { reply } => {
                let mut graph = self.graph.lock();
                let _ = reply.send(self.torch.toggle(&mut graph, &self.status));
            }
            Request::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    /// Ask for access, configure with whatever was granted and start the stream
    async fn prepare(&mut self, mut request: ConfigureRequest) -> CaptureResult<()> {
        let access = request_capture_access(self.permissions.as_ref()).await;
        if !access.can_capture() {
            return Err(CaptureError::PermissionDenied(MediaKind::Video));
        }
        request.include_audio &= access.audio;

        self.configure(&request).await?;
        self.start_stream()
    }

    async fn configure(&mut self, request: &ConfigureRequest) -> CaptureResult<()> {
        if self.configurator.state() == SessionState::Idle {
            self.status.publish_session(SessionState::Configuring);
        }

        let result = self.configurator.configure(request).await;
        self.status.publish_session(self.configurator.state());

        match result {
            Ok(ConfigureOutcome::Configured) => {
                let graph = self.graph.lock();
                if let Some(video) = graph.active_video_device() {
                    self.status.notify(CaptureNotice::Configured {
                        video: video.id.clone(),
                        audio: graph.active_audio_device().map(|d| d.id.clone()),
                    });
                }
                Ok(())
            }
            Ok(outcome) => {
                tracing::debug!("Configure request coalesced: {:?}", outcome);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to configure capture session: {}", e);
                Err(e)
            }
        }
    }

    fn start_stream(&mut self) -> CaptureResult<()> {
        if !self.configurator.is_ready() {
            return Err(CaptureError::NotConfigured);
        }

        let mut graph = self.graph.lock();
        if graph.is_running() {
            return Ok(());
        }

        graph.hardware_mut().start_running();
        let device = graph.active_video_device().cloned();
        self.torch.bind(&mut graph, device, &self.status);
        self.torch.reconcile(&mut graph, &self.status);
        drop(graph);

        self.live.send_replace(true);
        self.status.notify(CaptureNotice::StreamStarted);
        tracing::info!("Capture stream started");
        Ok(())
    }

    /// Halt the stream; an open recording is stopped and the torch forced off
    fn stop_stream(&mut self) {
        let mut graph = self.graph.lock();
        if !graph.is_running() {
            return;
        }

        if self.recorder.stop(&mut graph) {
            tracing::info!("Stopping open recording with the stream");
        }
        self.torch.shutdown(&mut graph, &self.status);
        graph.hardware_mut().stop_running();
        drop(graph);

        self.live.send_replace(false);
        self.status.notify(CaptureNotice::StreamStopped);
        tracing::info!("Capture stream stopped");
    }

    async fn switch_to_next(&mut self) -> CaptureResult<SwitchOutcome> {
        let result = self
            .switcher
            .switch_to_next(self.configurator.state())
            .await;

        match &result {
            Ok(outcome) if outcome.changed() => {
                let mut graph = self.graph.lock();
                if graph.is_running() {
                    self.torch
                        .bind(&mut graph, Some(outcome.current.clone()), &self.status);
                    self.torch.reconcile(&mut graph, &self.status);
                }
                self.status.notify(CaptureNotice::DeviceSwitched {
                    previous: outcome.previous.id.clone(),
                    current: outcome.current.id.clone(),
                });
            }
            Ok(_) => {}
            Err(CaptureError::DeviceSwitchFailed(message)) => {
                tracing::warn!("Camera switch rolled back: {}", message);
                self.status.notify(CaptureNotice::DeviceSwitchFailed {
                    message: message.clone(),
                });
            }
            Err(e) => tracing::debug!("Camera switch refused: {}", e),
        }

        result
    }

    fn start_recording(&mut self, paths: RecordingPaths) -> CaptureResult<RecordingSession> {
        if !self.configurator.is_ready() {
            return Err(CaptureError::NotConfigured);
        }

        let mut graph = self.graph.lock();
        let session = self.recorder.start(&mut graph, paths, &self.status)?;
        self.status.notify(CaptureNotice::RecordingStarted {
            session_id: session.id,
            output: session.output.clone(),
        });
        Ok(session)
    }

    fn snapshot(&self) -> SessionSnapshot {
        let graph = self.graph.lock();
        SessionSnapshot {
            state: self.configurator.state(),
            running: graph.is_running(),
            video_device: graph.active_video_device().cloned(),
            audio_device: graph.active_audio_device().cloned(),
            recording: self.recorder.session().cloned(),
            torch_intent: self.torch.intent(),
            torch: self.torch.observed(),
        }
    }

    fn on_hardware_event(&mut self, event: HardwareEvent) {
        match event {
            HardwareEvent::TorchChanged {
                token,
                device,
                state,
            } => {
                tracing::trace!("Torch of {} changed: {:?}", device, state);
                let mut graph = self.graph.lock();
                self.torch
                    .on_torch_changed(&mut graph, token, state, &self.status);
            }
            HardwareEvent::RecordingFinished { output, error } => {
                if let Some(finished) = self.recorder.on_finished(&output, error, &self.status) {
                    self.complete(finished);
                }
            }
        }
    }

    fn on_timer(&mut self, timer: TimerEvent) {
        match timer {
            TimerEvent::RecordingTick { session_id } => {
                self.recorder.on_tick(session_id, &self.status);
            }
            TimerEvent::ReconcileTorch => {
                let mut graph = self.graph.lock();
                if graph.is_running() {
                    self.torch.reconcile(&mut graph, &self.status);
                }
            }
        }
    }

    /// Deliver the outcome of a closed recording to the completion sink
    ///
    /// Thumbnail derivation runs off the coordinator; its failure still
    /// delivers the video, with the thumbnail marked pending.
    fn complete(&mut self, finished: FinishedRecording) {
        let FinishedRecording {
            session,
            duration_secs,
            error,
        } = finished;

        if let Some(message) = error {
            self.status.notify(CaptureNotice::RecordingFailed {
                session_id: session.id,
                message: message.clone(),
            });
            let completion = RecordingCompletion::Failed {
                session_id: session.id,
                output: session.output,
                error: CaptureError::RecordingFailed(message),
            };
            if self.completions.send(completion).is_err() {
                tracing::warn!("Recording completion dropped: no receiver");
            }
            return;
        }

        let thumbnails = self.thumbnails.clone();
        let completions = self.completions.clone();
        let notifier = self.status.notifier();
        let offset = self.config.thumbnail_offset();

        tokio::spawn(async move {
            let thumbnail_error = match thumbnails
                .generate(&session.output, &session.thumbnail, offset)
                .await
            {
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("Thumbnail for {} failed: {}", session.id, e);
                    notifier.notify(CaptureNotice::ThumbnailFailed {
                        session_id: session.id,
                        message: e.to_string(),
                    });
                    Some(e.to_string())
                }
            };

            notifier.notify(CaptureNotice::RecordingFinished {
                session_id: session.id,
                output: session.output.clone(),
                thumbnail: session.thumbnail.clone(),
            });

            let media = RecordedMedia {
                session_id: session.id,
                video: session.output,
                thumbnail: session.thumbnail,
                thumbnail_error,
                recorded_at: session.started_at,
                duration_secs,
            };
            if completions.send(RecordingCompletion::Finished(media)).is_err() {
                tracing::warn!("Recording completion dropped: no receiver");
            }
        });
    }

    /// Finish any open recording, then stop the stream
    async fn shutdown(&mut self, hardware: &mut mpsc::UnboundedReceiver<HardwareEvent>) {
        let stopping = {
            let mut graph = self.graph.lock();
            self.recorder.stop(&mut graph)
        };
        if stopping {
            tracing::info!("Waiting for the open recording to finish");
            let drained = tokio::time::timeout(FINALIZE_TIMEOUT, async {
                while self.recorder.is_recording() {
                    match hardware.recv().await {
                        Some(event) => self.on_hardware_event(event),
                        None => break,
                    }
                }
            })
            .await;
            if drained.is_err() {
                tracing::warn!("Recording did not finish before shutdown");
            }
        }

        let mut graph = self.graph.lock();
        if graph.is_running() {
            self.torch.shutdown(&mut graph, &self.status);
            graph.hardware_mut().stop_running();
        }
        drop(graph);
        self.live.send_replace(false);
    }
}

/// Cloneable front door to a running coordinator
///
/// Every call fails with [`CaptureError::SessionClosed`] once the
/// coordinator is gone.
#[derive(Clone)]
pub struct CaptureHandle {
    requests: mpsc::UnboundedSender<Request>,
    frame_source: FrameSource,
    feed: StatusFeed,
    output_dir: PathBuf,
    video_extension: String,
}

impl CaptureHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> CaptureResult<T> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(make(reply))
            .map_err(|_| CaptureError::SessionClosed)?;
        response.await.map_err(|_| CaptureError::SessionClosed)
    }

    /// Request permissions, configure and start streaming
    pub async fn prepare(&self, request: ConfigureRequest) -> CaptureResult<()> {
        self.call(|reply| Request::Prepare { request, reply }).await?
    }

    /// Build the capture graph; repeated calls after success are no-ops
    pub async fn configure(&self, request: ConfigureRequest) -> CaptureResult<()> {
        self.call(|reply| Request::Configure { request, reply }).await?
    }

    pub async fn start_stream(&self) -> CaptureResult<()> {
        self.call(|reply| Request::StartStream { reply }).await?
    }

    pub async fn stop_stream(&self) -> CaptureResult<()> {
        self.call(|reply| Request::StopStream { reply }).await?
    }

    /// Move to the next camera; a rejected camera leaves the current one active
    pub async fn switch_to_next(&self) -> CaptureResult<SwitchOutcome> {
        self.call(|reply| Request::SwitchToNext { reply }).await?
    }

    /// Record to a caller-chosen file
    pub async fn start_recording(&self, destination: impl Into<PathBuf>) -> CaptureResult<RecordingSession> {
        let paths = RecordingPaths::for_video(destination.into());
        self.call(|reply| Request::StartRecording { paths, reply }).await?
    }

    /// Record to a fresh `VID_<uuid>` file in the configured output directory
    pub async fn record_to_default_location(&self) -> CaptureResult<RecordingSession> {
        let paths = RecordingPaths::generate(&self.output_dir, &self.video_extension);
        self.call(|reply| Request::StartRecording { paths, reply }).await?
    }

    /// Returns whether a recording was open
    pub async fn stop_recording(&self) -> CaptureResult<bool> {
        self.call(|reply| Request::StopRecording { reply }).await
    }

    /// Flip the torch intent; returns the new intent
    pub async fn toggle_torch(&self) -> CaptureResult<bool> {
        self.call(|reply| Request::ToggleTorch { reply }).await
    }

    pub async fn snapshot(&self) -> CaptureResult<SessionSnapshot> {
        self.call(|reply| Request::Snapshot { reply }).await
    }

    pub fn frame_source(&self) -> FrameSource {
        self.frame_source.clone()
    }

    pub fn status(&self) -> StatusFeed {
        self.feed.clone()
    }
}

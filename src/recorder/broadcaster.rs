//! Status fan-out
//!
//! Push streams for session, capture and torch status with replay-one
//! semantics, plus a broadcast channel of non-fatal lifecycle notices.

use super::state::{CaptureStatus, SessionState};
use crate::capture::traits::{DeviceId, TorchMode, TorchObservedState};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

/// Non-fatal events emitted while the session runs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CaptureNotice {
    Configured {
        video: DeviceId,
        audio: Option<DeviceId>,
    },
    StreamStarted,
    StreamStopped,
    DeviceSwitched {
        previous: DeviceId,
        current: DeviceId,
    },
    DeviceSwitchFailed {
        message: String,
    },
    RecordingStarted {
        session_id: Uuid,
        output: PathBuf,
    },
    RecordingFinished {
        session_id: Uuid,
        output: PathBuf,
        thumbnail: PathBuf,
    },
    RecordingFailed {
        session_id: Uuid,
        message: String,
    },
    ThumbnailFailed {
        session_id: Uuid,
        message: String,
    },
    TorchCommandFailed {
        message: String,
    },
}

/// Cloneable sender for notices, usable outside the coordinator
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<CaptureNotice>,
}

impl Notifier {
    pub fn notify(&self, notice: CaptureNotice) {
        tracing::debug!("Notice: {:?}", notice);
        // No subscribers is fine
        let _ = self.tx.send(notice);
    }
}

/// Publishing side, owned by the coordinator
pub struct StatusBroadcaster {
    session: watch::Sender<SessionState>,
    capture: watch::Sender<CaptureStatus>,
    torch_available: watch::Sender<bool>,
    torch_mode: watch::Sender<TorchMode>,
    torch_active: watch::Sender<bool>,
    notices: Notifier,
}

impl StatusBroadcaster {
    pub fn new(notice_capacity: usize) -> Self {
        let (notices, _) = broadcast::channel(notice_capacity.max(1));
        Self {
            session: watch::Sender::new(SessionState::Idle),
            capture: watch::Sender::new(CaptureStatus::Idle),
            torch_available: watch::Sender::new(false),
            torch_mode: watch::Sender::new(TorchMode::Off),
            torch_active: watch::Sender::new(false),
            notices: Notifier { tx: notices },
        }
    }

    pub fn publish_session(&self, state: SessionState) {
        publish(&self.session, state);
    }

    pub fn publish_capture(&self, status: CaptureStatus) {
        publish(&self.capture, status);
    }

    pub fn publish_torch(&self, state: TorchObservedState) {
        publish(&self.torch_available, state.available);
        publish(&self.torch_mode, state.mode);
        publish(&self.torch_active, state.active);
    }

    pub fn capture(&self) -> CaptureStatus {
        *self.capture.borrow()
    }

    pub fn notify(&self, notice: CaptureNotice) {
        self.notices.notify(notice);
    }

    pub fn notifier(&self) -> Notifier {
        self.notices.clone()
    }

    /// Read side handed out to observers
    pub fn feed(&self) -> StatusFeed {
        StatusFeed {
            session: self.session.subscribe(),
            capture: self.capture.subscribe(),
            torch_available: self.torch_available.subscribe(),
            torch_mode: self.torch_mode.subscribe(),
            torch_active: self.torch_active.subscribe(),
            notices: self.notices.tx.clone(),
        }
    }
}

/// Only wake subscribers when the value actually changed
fn publish<T: PartialEq>(tx: &watch::Sender<T>, value: T) {
    tx.send_if_modified(|current| {
        if *current == value {
            return false;
        }
        *current = value;
        true
    });
}

/// Subscription point for every status kind
#[derive(Clone)]
pub struct StatusFeed {
    session: watch::Receiver<SessionState>,
    capture: watch::Receiver<CaptureStatus>,
    torch_available: watch::Receiver<bool>,
    torch_mode: watch::Receiver<TorchMode>,
    torch_active: watch::Receiver<bool>,
    notices: broadcast::Sender<CaptureNotice>,
}

impl StatusFeed {
    pub fn session_state(&self) -> StatusStream<SessionState> {
        StatusStream::new(self.session.clone())
    }

    pub fn capture_status(&self) -> StatusStream<CaptureStatus> {
        StatusStream::new(self.capture.clone())
    }

    pub fn torch_available(&self) -> StatusStream<bool> {
        StatusStream::new(self.torch_available.clone())
    }

    pub fn torch_mode(&self) -> StatusStream<TorchMode> {
        StatusStream::new(self.torch_mode.clone())
    }

    pub fn torch_active(&self) -> StatusStream<bool> {
        StatusStream::new(self.torch_active.clone())
    }

    /// Notices emitted after this call
    pub fn notices(&self) -> broadcast::Receiver<CaptureNotice> {
        self.notices.subscribe()
    }
}

/// One status kind as a push stream
///
/// The first [`StatusStream::next`] yields the current value immediately;
/// later calls wait for the next change. Intermediate values may be skipped,
/// never reordered.
pub struct StatusStream<T> {
    rx: watch::Receiver<T>,
    replayed: bool,
}

impl<T: Clone> StatusStream<T> {
    fn new(rx: watch::Receiver<T>) -> Self {
        Self { rx, replayed: false }
    }

    /// Latest published value
    pub fn current(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Next value, or `None` once the coordinator is gone
    pub async fn next(&mut self) -> Option<T> {
        if !self.replayed {
            self.replayed = true;
            return Some(self.rx.borrow_and_update().clone());
        }

        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

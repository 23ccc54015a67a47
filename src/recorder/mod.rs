//! Capture session orchestration
//!
//! This module implements the single-writer capture engine:
//! - SessionConfigurator builds the graph once
//! - DeviceSwitcher hot-swaps cameras with rollback
//! - RecordingController owns the recording session and its duration polling
//! - TorchReconciler converges the torch toward the user's intent
//! - StatusBroadcaster publishes status to observers
//! - CaptureCoordinator serializes all of the above behind one task

pub mod broadcaster;
pub mod configurator;
pub mod controller;
pub mod coordinator;
pub mod graph;
pub mod state;
pub mod switcher;
pub mod torch;

pub use broadcaster::{CaptureNotice, StatusFeed, StatusStream};
pub use configurator::{ConfigureOutcome, ConfigureRequest};
pub use coordinator::{CaptureBackend, CaptureCoordinator, CaptureHandle, SessionSnapshot};
pub use state::{
    CaptureStatus, CatalogRecord, RecordedMedia, RecordingCompletion, RecordingPaths,
    RecordingSession, SessionState,
};
pub use switcher::SwitchOutcome;

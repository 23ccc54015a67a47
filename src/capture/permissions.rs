//! Capture permission handling
//!
//! Video access gates the whole session; audio access only decides whether the
//! microphone joins the graph.

use super::traits::{MediaKind, PermissionGate};
use async_trait::async_trait;

/// Result of asking the permission gate for both media kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessDecision {
    pub video: bool,
    pub audio: bool,
}

impl AccessDecision {
    /// Whether the session may start at all
    pub fn can_capture(&self) -> bool {
        self.video
    }
}

/// Request video then audio access
///
/// Audio is asked for even when video was refused so the caller always gets
/// a complete picture; a denied microphone never fails the session.
pub async fn request_capture_access(gate: &dyn PermissionGate) -> AccessDecision {
    let video = gate.request_access(MediaKind::Video).await;
    let audio = gate.request_access(MediaKind::Audio).await;

    if video && !audio {
        tracing::warn!("Microphone access denied; recordings will be video-only");
    }
    if !video {
        tracing::warn!("Camera access denied");
    }

    AccessDecision { video, audio }
}

/// Fixed answers, used for simulated sessions and tests
#[derive(Debug, Clone, Copy)]
pub struct StaticPermissions {
    pub video: bool,
    pub audio: bool,
}

impl StaticPermissions {
    pub fn granted() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }

    pub fn new(video: bool, audio: bool) -> Self {
        Self { video, audio }
    }
}

#[async_trait]
impl PermissionGate for StaticPermissions {
    async fn request_access(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Video => self.video,
            MediaKind::Audio => self.audio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_audio_denial_does_not_block_capture() {
        let decision = request_capture_access(&StaticPermissions::new(true, false)).await;
        assert!(decision.can_capture());
        assert!(!decision.audio);
    }

    #[tokio::test]
    async fn test_video_denial_blocks_capture() {
        let decision = request_capture_access(&StaticPermissions::new(false, true)).await;
        assert!(!decision.can_capture());
        assert!(decision.audio);
    }
}

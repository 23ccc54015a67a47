//! Recording state management
//!
//! Defines the session state machine, capture status and recording session tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::time::Instant;
use uuid::Uuid;

/// File name prefix for recorded videos
pub const VIDEO_PREFIX: &str = "VID_";

/// File name prefix for derived thumbnails
pub const THUMBNAIL_PREFIX: &str = "THUMB_";

/// Thumbnails are always written as PNG
pub const THUMBNAIL_EXTENSION: &str = "png";

/// Lifecycle of the capture graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Nothing configured yet, or the last attempt failed
    Idle,
    /// A configuration attempt is in flight
    Configuring,
    /// The graph is built; terminal for this session
    Ready,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

/// What the recording output is doing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum CaptureStatus {
    Idle,
    Recording { duration_secs: f64 },
}

impl Default for CaptureStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl CaptureStatus {
    pub fn is_recording(&self) -> bool {
        matches!(self, CaptureStatus::Recording { .. })
    }

    pub fn duration_secs(&self) -> Option<f64> {
        match self {
            CaptureStatus::Idle => None,
            CaptureStatus::Recording { duration_secs } => Some(*duration_secs),
        }
    }
}

/// Paired video and thumbnail locations sharing one identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingPaths {
    pub id: Uuid,
    pub video: PathBuf,
    pub thumbnail: PathBuf,
}

impl RecordingPaths {
    /// Fresh `VID_<uuid>.<ext>` / `THUMB_<uuid>.png` pair inside `dir`
    pub fn generate(dir: &Path, video_extension: &str) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            video: dir.join(format!("{VIDEO_PREFIX}{id}.{video_extension}")),
            thumbnail: dir.join(format!("{THUMBNAIL_PREFIX}{id}.{THUMBNAIL_EXTENSION}")),
        }
    }

    /// Paths for a caller-chosen video destination
    ///
    /// A `VID_<uuid>` name keeps its identifier; any other name gets a new one
    /// and a `THUMB_<stem>` thumbnail beside it.
    pub fn for_video(video: PathBuf) -> Self {
        let dir = video.parent().map(Path::to_path_buf).unwrap_or_default();
        let stem = video
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let parsed = stem
            .strip_prefix(VIDEO_PREFIX)
            .and_then(|rest| Uuid::parse_str(rest).ok());

        let (id, thumbnail_stem) = match parsed {
            Some(id) => (id, id.to_string()),
            None => (Uuid::new_v4(), stem),
        };

        Self {
            id,
            thumbnail: dir.join(format!(
                "{THUMBNAIL_PREFIX}{thumbnail_stem}.{THUMBNAIL_EXTENSION}"
            )),
            video,
        }
    }
}

/// An open recording
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    /// Unique session identifier
    pub id: Uuid,

    /// Where the video is written
    pub output: PathBuf,

    /// Where the thumbnail will be derived
    pub thumbnail: PathBuf,

    /// Wall clock time the recording started
    pub started_at: DateTime<Utc>,

    #[serde(skip)]
    started: Instant,
}

impl RecordingSession {
    /// Create a session starting now
    pub fn new(paths: RecordingPaths) -> Self {
        Self {
            id: paths.id,
            output: paths.video,
            thumbnail: paths.thumbnail,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Seconds since the session started
    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

/// A finished recording handed to the completion sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedMedia {
    pub session_id: Uuid,
    pub video: PathBuf,

    /// Planned thumbnail location; the file may be missing if derivation failed
    pub thumbnail: PathBuf,

    /// Why the thumbnail is missing, if it is
    pub thumbnail_error: Option<String>,

    pub recorded_at: DateTime<Utc>,
    pub duration_secs: f64,
}

impl RecordedMedia {
    /// Whether the thumbnail should be shown as pending rather than ready
    pub fn thumbnail_pending(&self) -> bool {
        self.thumbnail_error.is_some()
    }

    /// Record handed to the persistent catalog
    pub fn catalog_record(&self) -> CatalogRecord {
        CatalogRecord {
            timestamp: self.recorded_at,
            output_locator: self.video.to_string_lossy().to_string(),
            thumbnail_locator: self.thumbnail.to_string_lossy().to_string(),
        }
    }
}

/// Entry the catalog stores for every successful recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRecord {
    pub timestamp: DateTime<Utc>,
    pub output_locator: String,
    pub thumbnail_locator: String,
}

/// Outcome delivered exactly once per recording session
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingCompletion {
    Finished(RecordedMedia),
    Failed {
        session_id: Uuid,
        output: PathBuf,
        error: crate::utils::error::CaptureError,
    },
}

impl RecordingCompletion {
    pub fn session_id(&self) -> Uuid {
        match self {
            RecordingCompletion::Finished(media) => media.session_id,
            RecordingCompletion::Failed { session_id, .. } => *session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_paths_share_identifier() {
        let paths = RecordingPaths::generate(Path::new("/tmp/captures"), "mov");
        let video = paths.video.file_name().unwrap().to_string_lossy().to_string();
        let thumb = paths.thumbnail.file_name().unwrap().to_string_lossy().to_string();

        assert_eq!(video, format!("VID_{}.mov", paths.id));
        assert_eq!(thumb, format!("THUMB_{}.png", paths.id));
    }

    #[test]
    fn test_for_video_reuses_identifier() {
        let id = Uuid::new_v4();
        let paths = RecordingPaths::for_video(PathBuf::from(format!("/data/VID_{id}.mp4")));
        assert_eq!(paths.id, id);
        assert_eq!(paths.thumbnail, PathBuf::from(format!("/data/THUMB_{id}.png")));
    }

    #[test]
    fn test_for_video_with_custom_name() {
        let paths = RecordingPaths::for_video(PathBuf::from("/data/A.mov"));
        assert_eq!(paths.video, PathBuf::from("/data/A.mov"));
        assert_eq!(paths.thumbnail, PathBuf::from("/data/THUMB_A.png"));
    }

    #[test]
    fn test_capture_status_serialization() {
        let json = serde_json::to_string(&CaptureStatus::Recording { duration_secs: 1.5 }).unwrap();
        assert_eq!(json, r#"{"state":"recording","durationSecs":1.5}"#);
        let parsed: CaptureStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.duration_secs(), Some(1.5));

        let idle: CaptureStatus = serde_json::from_str(r#"{"state":"idle"}"#).unwrap();
        assert_eq!(idle, CaptureStatus::Idle);
    }

    #[test]
    fn test_catalog_record_uses_planned_thumbnail() {
        let media = RecordedMedia {
            session_id: Uuid::new_v4(),
            video: PathBuf::from("/data/A.mov"),
            thumbnail: PathBuf::from("/data/THUMB_A.png"),
            thumbnail_error: Some("ffmpeg missing".to_string()),
            recorded_at: Utc::now(),
            duration_secs: 3.0,
        };

        assert!(media.thumbnail_pending());
        let record = media.catalog_record();
        assert_eq!(record.output_locator, "/data/A.mov");
        assert_eq!(record.thumbnail_locator, "/data/THUMB_A.png");
    }
}

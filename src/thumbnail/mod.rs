//! Thumbnail derivation
//!
//! Produces a still image for a finished recording.

mod extractor;

pub use extractor::{read_thumbnail_info, FfmpegThumbnailer};

use crate::utils::error::CaptureResult;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A thumbnail written to disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailInfo {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Derives a thumbnail image from a video file
#[async_trait]
pub trait ThumbnailGenerator: Send + Sync {
    /// Write a frame of `video` taken at `offset` to `thumbnail`
    async fn generate(
        &self,
        video: &Path,
        thumbnail: &Path,
        offset: Duration,
    ) -> CaptureResult<ThumbnailInfo>;
}

//! FFmpeg-based thumbnail extraction
//!
//! Grabs a single frame from a finished recording as a PNG file.

use super::{ThumbnailGenerator, ThumbnailInfo};
use crate::utils::error::{CaptureError, CaptureResult};
use async_trait::async_trait;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Thumbnailer backed by the `ffmpeg` command line tool
#[derive(Debug, Clone)]
pub struct FfmpegThumbnailer {
    binary: PathBuf,
}

impl FfmpegThumbnailer {
    pub fn new() -> Self {
        Self::with_binary("ffmpeg")
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn extract_frame(&self, video: &Path, thumbnail: &Path, offset: Duration) -> CaptureResult<()> {
        let offset = format!("{:.3}", offset.as_secs_f64());

        let output = Command::new(&self.binary)
            .arg("-y")
            .args(["-ss", &offset])
            .arg("-i")
            .arg(video)
            .args(["-frames:v", "1", "-f", "image2", "-vcodec", "png"])
            .arg(thumbnail)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                CaptureError::ThumbnailDerivationFailed(format!(
                    "failed to run {}: {}",
                    self.binary.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr.lines().last().unwrap_or("unknown error").trim().to_string();
            return Err(CaptureError::ThumbnailDerivationFailed(reason));
        }
        Ok(())
    }
}

impl Default for FfmpegThumbnailer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ThumbnailGenerator for FfmpegThumbnailer {
    async fn generate(
        &self,
        video: &Path,
        thumbnail: &Path,
        offset: Duration,
    ) -> CaptureResult<ThumbnailInfo> {
        if let Some(parent) = thumbnail.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CaptureError::ThumbnailDerivationFailed(e.to_string()))?;
        }

        self.extract_frame(video, thumbnail, offset).await?;

        // Seeking past the end of a short clip succeeds without writing a frame
        if !thumbnail.exists() && !offset.is_zero() {
            tracing::debug!(
                "No frame at {:?} in {}, retrying at the first frame",
                offset,
                video.display()
            );
            self.extract_frame(video, thumbnail, Duration::ZERO).await?;
        }

        let info = read_thumbnail_info(thumbnail)?;
        tracing::info!(
            "Thumbnail {} ({}x{})",
            info.path.display(),
            info.width,
            info.height
        );
        Ok(info)
    }
}

/// Check that `path` is a decodable PNG and read its dimensions
pub fn read_thumbnail_info(path: &Path) -> CaptureResult<ThumbnailInfo> {
    let invalid = |e: String| {
        CaptureError::ThumbnailDerivationFailed(format!("{}: {}", path.display(), e))
    };

    let file = File::open(path).map_err(|e| invalid(e.to_string()))?;
    let decoder = png::Decoder::new(BufReader::new(file));
    let reader = decoder.read_info().map_err(|e| invalid(e.to_string()))?;
    let info = reader.info();

    if info.width == 0 || info.height == 0 {
        return Err(invalid("empty image".to_string()));
    }

    Ok(ThumbnailInfo {
        path: path.to_path_buf(),
        width: info.width,
        height: info.height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufWriter;

    fn write_png(path: &Path, width: u32, height: u32) {
        let file = File::create(path).unwrap();
        let mut encoder = png::Encoder::new(BufWriter::new(file), width, height);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().unwrap();
        let data = vec![128u8; (width * height * 3) as usize];
        writer.write_image_data(&data).unwrap();
    }

    #[test]
    fn test_read_thumbnail_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("THUMB_A.png");
        write_png(&path, 64, 36);

        let info = read_thumbnail_info(&path).unwrap();
        assert_eq!(info.width, 64);
        assert_eq!(info.height, 36);
        assert_eq!(info.path, path);
    }

    #[test]
    fn test_invalid_thumbnail_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("THUMB_A.png");
        std::fs::write(&path, b"not an image").unwrap();

        let err = read_thumbnail_info(&path).unwrap_err();
        assert!(matches!(err, CaptureError::ThumbnailDerivationFailed(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("A.mov");
        std::fs::write(&video, b"simulated recording").unwrap();

        let thumbnailer = FfmpegThumbnailer::with_binary(dir.path().join("no-such-ffmpeg"));
        let err = thumbnailer
            .generate(&video, &dir.path().join("THUMB_A.png"), Duration::from_secs(1))
            .await
            .unwrap_err();

        match err {
            CaptureError::ThumbnailDerivationFailed(message) => {
                assert!(message.contains("no-such-ffmpeg"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

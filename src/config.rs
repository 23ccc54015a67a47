//! Engine configuration
//!
//! Everything is optional in the JSON file; missing fields take the defaults below.

use crate::capture::traits::{DevicePosition, SessionPreset};
use crate::recorder::configurator::ConfigureRequest;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors while loading a configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Capture engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureConfig {
    pub preset: SessionPreset,
    pub position: Option<DevicePosition>,
    pub include_audio: bool,

    /// Where generated `VID_`/`THUMB_` files go
    pub output_dir: PathBuf,
    pub video_extension: String,

    pub duration_poll_interval_ms: u64,
    pub torch_reconcile_delay_ms: u64,
    pub max_torch_reassertions_per_sec: u32,
    pub thumbnail_offset_ms: u64,
    pub notice_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            preset: SessionPreset::High,
            position: None,
            include_audio: true,
            output_dir: std::env::temp_dir().join("open-camstudio"),
            video_extension: "mov".to_string(),
            duration_poll_interval_ms: 250,
            torch_reconcile_delay_ms: 150,
            max_torch_reassertions_per_sec: 4,
            thumbnail_offset_ms: 1000,
            notice_capacity: 100,
        }
    }
}

impl CaptureConfig {
    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        tracing::debug!("Loaded capture config from {}", path.display());
        Ok(config)
    }

    /// Load from `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn configure_request(&self) -> ConfigureRequest {
        ConfigureRequest {
            preset: self.preset,
            position: self.position,
            include_audio: self.include_audio,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.duration_poll_interval_ms.max(1))
    }

    pub fn torch_reconcile_delay(&self) -> Duration {
        Duration::from_millis(self.torch_reconcile_delay_ms)
    }

    pub fn thumbnail_offset(&self) -> Duration {
        Duration::from_millis(self.thumbnail_offset_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.json");
        std::fs::write(
            &path,
            r#"{ "preset": "hd1920x1080", "position": "front", "durationPollIntervalMs": 100 }"#,
        )
        .unwrap();

        let config = CaptureConfig::load(&path).unwrap();
        assert_eq!(config.preset, SessionPreset::Hd1920x1080);
        assert_eq!(config.position, Some(DevicePosition::Front));
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert!(config.include_audio);
        assert_eq!(config.video_extension, "mov");
        assert_eq!(config.max_torch_reassertions_per_sec, 4);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(CaptureConfig::load(&path), Err(ConfigError::Json(_))));
        assert!(matches!(
            CaptureConfig::load(&dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_configure_request_from_config() {
        let config = CaptureConfig {
            include_audio: false,
            ..CaptureConfig::default()
        };
        let request = config.configure_request();
        assert_eq!(request.preset, SessionPreset::High);
        assert!(!request.include_audio);
        assert_eq!(config.thumbnail_offset(), Duration::from_secs(1));
    }
}

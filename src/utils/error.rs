//! Error types and handling
//!
//! Common error types used across the capture engine.

use crate::capture::traits::MediaKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine-wide error type
///
/// Every variant carries owned text so an outcome can be cloned into
/// completion messages and status notices.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("No {0} device available")]
    NoDeviceAvailable(MediaKind),

    #[error("Failed to add input: {0}")]
    AddInputFailed(String),

    #[error("Failed to add output: {0}")]
    AddOutputFailed(String),

    #[error("Configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("Device switch failed (rolled back): {0}")]
    DeviceSwitchFailed(String),

    #[error("Recording failed: {0}")]
    RecordingFailed(String),

    #[error("Thumbnail derivation failed: {0}")]
    ThumbnailDerivationFailed(String),

    #[error("A recording is already in progress")]
    RecordingInProgress,

    #[error("Capture session is not configured")]
    NotConfigured,

    #[error("Permission denied: {0}")]
    PermissionDenied(MediaKind),

    #[error("Capture session is closed")]
    SessionClosed,
}

/// Error response for UI consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&CaptureError> for ErrorResponse {
    fn from(error: &CaptureError) -> Self {
        let code = match error {
            CaptureError::NoDeviceAvailable(_) => "NO_DEVICE_AVAILABLE",
            CaptureError::AddInputFailed(_) => "ADD_INPUT_FAILED",
            CaptureError::AddOutputFailed(_) => "ADD_OUTPUT_FAILED",
            CaptureError::ConfigurationFailed(_) => "CONFIGURATION_FAILED",
            CaptureError::DeviceSwitchFailed(_) => "DEVICE_SWITCH_FAILED",
            CaptureError::RecordingFailed(_) => "RECORDING_FAILED",
            CaptureError::ThumbnailDerivationFailed(_) => "THUMBNAIL_DERIVATION_FAILED",
            CaptureError::RecordingInProgress => "RECORDING_IN_PROGRESS",
            CaptureError::NotConfigured => "NOT_CONFIGURED",
            CaptureError::PermissionDenied(_) => "PERMISSION_DENIED",
            CaptureError::SessionClosed => "SESSION_CLOSED",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

impl From<CaptureError> for ErrorResponse {
    fn from(error: CaptureError) -> Self {
        ErrorResponse::from(&error)
    }
}

/// Result type alias using CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_codes() {
        let response = ErrorResponse::from(CaptureError::NoDeviceAvailable(MediaKind::Video));
        assert_eq!(response.code, "NO_DEVICE_AVAILABLE");
        assert_eq!(response.message, "No video device available");

        let response = ErrorResponse::from(&CaptureError::DeviceSwitchFailed("busy".into()));
        assert_eq!(response.code, "DEVICE_SWITCH_FAILED");
        assert!(response.message.contains("rolled back"));
    }
}

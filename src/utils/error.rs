//! Error types and handling
//!
//! Application-boundary error type aggregating the layer errors.

use crate::capture::error::CaptureError;
use crate::export::types::ExportError;
use crate::recorder::error::{PrepareError, SessionError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Camera error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Recording error: {0}")]
    Session(#[from] SessionError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),
}

impl From<PrepareError> for AppError {
    fn from(error: PrepareError) -> Self {
        AppError::Session(SessionError::Preparation(error))
    }
}

/// Machine-readable error for CLI output
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Capture(CaptureError::DeviceUnavailable(_)) => "DEVICE_UNAVAILABLE",
            AppError::Capture(CaptureError::DeviceBusy(_)) => "DEVICE_BUSY",
            AppError::Capture(_) => "CAPTURE_ERROR",
            AppError::Session(SessionError::ContractViolation { .. }) => "CONTRACT_VIOLATION",
            AppError::Session(SessionError::Preparation(PrepareError::NoWritableStorage)) => "NO_WRITABLE_STORAGE",
            AppError::Session(SessionError::Preparation(PrepareError::Capture(CaptureError::DeviceUnavailable(_)))) => {
                "DEVICE_UNAVAILABLE"
            }
            AppError::Session(SessionError::Preparation(PrepareError::Capture(CaptureError::DeviceBusy(_)))) => {
                "DEVICE_BUSY"
            }
            AppError::Session(SessionError::Preparation(PrepareError::EncoderConfig(_))) => "ENCODER_CONFIG_ERROR",
            AppError::Session(_) => "RECORDING_ERROR",
            AppError::Export(_) => "EXPORT_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::traits::Facing;

    #[test]
    fn test_error_codes() {
        let response = ErrorResponse::from(AppError::from(PrepareError::Capture(CaptureError::DeviceUnavailable(
            Facing::Back,
        ))));
        assert_eq!(response.code, "DEVICE_UNAVAILABLE");
        assert!(response.message.contains("back"));

        let response = ErrorResponse::from(AppError::from(PrepareError::NoWritableStorage));
        assert_eq!(response.code, "NO_WRITABLE_STORAGE");

        let response = ErrorResponse::from(AppError::Config("bad".to_string()));
        assert_eq!(response.code, "CONFIG_ERROR");
    }

    #[test]
    fn test_export_errors_keep_their_code() {
        let err = ExportError::Probe {
            path: "a.mp4".to_string(),
            message: "no video stream".to_string(),
        };
        let response = ErrorResponse::from(AppError::from(err));
        assert_eq!(response.code, "EXPORT_ERROR");
        assert!(response.message.contains("a.mp4"));
        assert!(response.message.contains("no video stream"));
    }
}

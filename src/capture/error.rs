//! Capture error types
//!
//! Errors raised by camera devices and media encoders.

use super::traits::Facing;
use thiserror::Error;

/// Camera acquisition and configuration failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("No camera facing {0} is available")]
    DeviceUnavailable(Facing),

    #[error("Camera {0} is held by another owner")]
    DeviceBusy(String),

    #[error("Camera error: {0}")]
    DeviceError(String),

    #[error("Preview surface is not ready: {0}")]
    PreviewBindingError(String),
}

/// Media encoder failures
#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("Encoder called in an illegal state: {0}")]
    IllegalState(String),

    #[error("Encoder IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stop was requested before any valid output was produced.
    #[error("Encoder produced no output")]
    NoOutput,

    #[error("Encoder failed: {0}")]
    Failed(String),
}

pub type CaptureResult<T> = Result<T, CaptureError>;

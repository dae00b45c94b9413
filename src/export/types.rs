//! Export types and configuration
//!
//! Options, probed clip metadata and errors for crossfade concatenation.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Crossfade concatenation options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossfadeOptions {
    /// Length of the overlap between the two clips (milliseconds)
    pub duration_ms: u64,

    /// Crossfade audio too when both clips carry an audio track
    pub include_audio: bool,

    /// xfade transition name
    pub transition: String,

    /// CRF for the re-encoded output
    pub crf: u8,
}

impl Default for CrossfadeOptions {
    fn default() -> Self {
        Self {
            duration_ms: 1000,
            include_audio: true,
            transition: "fade".to_string(),
            crf: 18,
        }
    }
}

impl CrossfadeOptions {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Metadata probed from one clip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration_secs: f64,
    pub codec: String,
    pub has_audio: bool,
}

/// Export error types
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("Failed to probe {path}: {message}")]
    Probe { path: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Export task failed: {0}")]
    Task(String),
}

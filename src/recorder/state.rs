//! Capture session state
//!
//! Observable phases, labels and events of the capture state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Current phase of the capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    /// No camera or encoder held
    #[default]
    Idle,
    /// Preparation task in flight
    Preparing,
    /// Encoder running
    Recording,
    /// Stop sequence running
    Releasing,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Preparing => "preparing",
            SessionPhase::Recording => "recording",
            SessionPhase::Releasing => "releasing",
        };
        f.write_str(name)
    }
}

/// Label shown on the capture affordance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaptureLabel {
    /// Ready to capture
    #[default]
    Ready,
    /// Recording in progress
    Recording,
}

/// Why an output file was thrown away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiscardReason {
    /// Stop arrived before the encoder produced valid output
    FastStopRace,
    /// The encoder failed to halt for another reason
    EncoderStopFailed,
    /// The encoder stopped cleanly but left nothing on disk
    EmptyOutput,
}

/// Result of a stop request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum StopOutcome {
    /// Output file finalized
    Saved { path: PathBuf },
    /// Output file removed
    Discarded { reason: DiscardReason },
}

/// Events emitted by the capture controller
#[derive(Debug, Clone)]
pub enum SessionEvent {
    LabelChanged(CaptureLabel),
    RecordingSaved(PathBuf),
    RecordingDiscarded(DiscardReason),
    /// Preparation failed fatally; the hosting screen should close
    Terminated(String),
}

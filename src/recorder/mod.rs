//! Capture session module
//!
//! This module implements the recording lifecycle:
//! - EncoderSession wrapping a platform encoder
//! - Preparation task acquiring camera and encoder off the interactive thread
//! - CaptureController owning the session state machine

pub mod controller;
pub mod encoder;
pub mod error;
pub mod output;
pub mod preparation;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::CaptureController;
pub use encoder::{EncoderSession, EncoderState};
pub use error::{PrepareError, SessionError, SessionResult};
pub use output::{OutputFile, OutputFilePolicy, TimestampedOutput};
pub use preparation::{ActiveSession, CaptureEnvironment, SessionSettings};
pub use state::{CaptureLabel, DiscardReason, SessionEvent, SessionPhase, StopOutcome};

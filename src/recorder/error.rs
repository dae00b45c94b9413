//! Session error types

use super::state::SessionPhase;
use crate::capture::error::{CaptureError, EncoderError};
use thiserror::Error;

/// Why a preparation task failed. All resources are released before one of
/// these is reported.
#[derive(Error, Debug)]
pub enum PrepareError {
    #[error("No writable storage for the output file")]
    NoWritableStorage,

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("Encoder configuration failed: {0}")]
    EncoderConfig(#[from] EncoderError),

    #[error("Preparation task ended without reporting")]
    Aborted,
}

/// Errors returned by the capture controller
#[derive(Error, Debug)]
pub enum SessionError {
    /// Transition requested from a state that does not allow it
    #[error("Cannot {operation} while {phase}")]
    ContractViolation {
        operation: &'static str,
        phase: SessionPhase,
    },

    #[error("Preparation failed: {0}")]
    Preparation(#[from] PrepareError),
}

impl SessionError {
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, SessionError::ContractViolation { .. })
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

//! Encoder session
//!
//! Wraps a platform `MediaEncoder` bound to one output file and one camera,
//! enforcing idle -> configured -> recording -> stopped.

use crate::capture::device::DeviceHandle;
use crate::capture::error::EncoderError;
use crate::capture::traits::{EncoderConfig, MediaEncoder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};

/// Configuration state of an encoder session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderState {
    Idle,
    /// Fully configured and prepared
    Configured,
    Recording,
    Stopped,
}

/// Why halting the encoder failed
#[derive(Debug)]
pub enum StopFailure {
    /// Stopped before valid output existed
    FastStopRace(EncoderError),
    Failed(EncoderError),
}

impl StopFailure {
    pub fn is_fast_stop(&self) -> bool {
        matches!(self, StopFailure::FastStopRace(_))
    }

    pub fn error(&self) -> &EncoderError {
        match self {
            StopFailure::FastStopRace(e) | StopFailure::Failed(e) => e,
        }
    }
}

/// One configured encoder writing one output file
pub struct EncoderSession {
    encoder: Box<dyn MediaEncoder>,
    state: EncoderState,
    /// Camera this session was bound to. The handle itself stays with its owner.
    device_id: String,
    config: Option<EncoderConfig>,
    started_at: Option<Instant>,
    fast_stop_threshold: Duration,
    released: bool,
}

impl EncoderSession {
    /// Bind a fresh encoder to a camera
    pub fn bind(encoder: Box<dyn MediaEncoder>, device: &DeviceHandle, fast_stop_threshold: Duration) -> Self {
        Self {
            encoder,
            state: EncoderState::Idle,
            device_id: device.id().to_string(),
            config: None,
            started_at: None,
            fast_stop_threshold,
            released: false,
        }
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    fn output(&self) -> Option<&Path> {
        self.config.as_ref().map(|c| c.output.as_path())
    }

    /// Time since recording started
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|t| t.elapsed())
    }

    /// Set output file, size and rotation
    pub fn configure(&mut self, config: EncoderConfig) -> Result<(), EncoderError> {
        if self.state != EncoderState::Idle || self.config.is_some() {
            return Err(EncoderError::IllegalState(format!(
                "configure called while {:?}",
                self.state
            )));
        }
        self.encoder.configure(&config)?;
        tracing::debug!(
            "Encoder for camera {} configured: {:?} at {}",
            self.device_id,
            config.output,
            config.size
        );
        self.config = Some(config);
        Ok(())
    }

    /// Finish configuration. Blocking.
    pub fn prepare(&mut self) -> Result<(), EncoderError> {
        if self.state != EncoderState::Idle || self.config.is_none() {
            return Err(EncoderError::IllegalState(
                "prepare called before configure".to_string(),
            ));
        }
        self.encoder.prepare()?;
        self.state = EncoderState::Configured;
        Ok(())
    }

    /// Start encoding. The camera must already be unlocked for the encoder.
    pub fn start(&mut self, device: &mut DeviceHandle) -> Result<(), EncoderError> {
        if self.state != EncoderState::Configured {
            return Err(EncoderError::IllegalState(format!(
                "start called while {:?}",
                self.state
            )));
        }
        if device.id() != self.device_id {
            return Err(EncoderError::IllegalState(format!(
                "session bound to camera {} started with camera {}",
                self.device_id,
                device.id()
            )));
        }
        self.encoder.start()?;
        device.hand_to_encoder();
        self.state = EncoderState::Recording;
        self.started_at = Some(Instant::now());
        tracing::info!("Encoder started for camera {}", self.device_id);
        Ok(())
    }

    /// Halt encoding
    pub fn stop(&mut self) -> Result<Duration, StopFailure> {
        if self.state != EncoderState::Recording {
            return Err(StopFailure::Failed(EncoderError::IllegalState(format!(
                "stop called while {:?}",
                self.state
            ))));
        }

        let elapsed = self.elapsed().unwrap_or_default();
        let result = self.encoder.stop();
        self.state = EncoderState::Stopped;

        match result {
            Ok(()) => {
                tracing::info!("Encoder stopped after {}ms", elapsed.as_millis());
                Ok(elapsed)
            }
            Err(e) => Err(self.classify_stop_failure(e, elapsed)),
        }
    }

    /// An explicit no-output signal is authoritative; other failures inside
    /// the threshold are treated the same way.
    fn classify_stop_failure(&self, error: EncoderError, elapsed: Duration) -> StopFailure {
        match error {
            EncoderError::NoOutput => StopFailure::FastStopRace(error),
            e if elapsed < self.fast_stop_threshold => StopFailure::FastStopRace(e),
            e => StopFailure::Failed(e),
        }
    }

    /// Reset and release the encoder
    pub fn release(mut self) {
        self.release_inner();
    }

    pub(crate) fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.encoder.reset();
        self.encoder.release();
        self.released = true;
        tracing::debug!("Encoder for camera {} released", self.device_id);
    }
}

impl Drop for EncoderSession {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!("Encoder for camera {} dropped without release", self.device_id);
            self.release_inner();
        }
    }
}

impl std::fmt::Debug for EncoderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderSession")
            .field("state", &self.state)
            .field("device_id", &self.device_id)
            .field("output", &self.output())
            .finish()
    }
}

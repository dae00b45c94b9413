//! Capture session controller
//!
//! Drives one camera and one encoder through idle -> preparing -> recording
//! -> releasing -> idle. Only the data valid in a phase is held in that phase.

use super::error::{PrepareError, SessionError, SessionResult};
use super::preparation::{self, ActiveSession, CaptureEnvironment, PrepareOutcome};
use super::state::{CaptureLabel, SessionEvent, SessionPhase, StopOutcome};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

enum SessionState {
    Idle,
    Preparing {
        session_id: Uuid,
        completion: oneshot::Receiver<PrepareOutcome>,
    },
    Recording {
        session_id: Uuid,
        session: ActiveSession,
    },
    Releasing,
}

impl SessionState {
    fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Idle => SessionPhase::Idle,
            SessionState::Preparing { .. } => SessionPhase::Preparing,
            SessionState::Recording { .. } => SessionPhase::Recording,
            SessionState::Releasing => SessionPhase::Releasing,
        }
    }
}

/// Owns the capture session and exposes the start/stop transitions
pub struct CaptureController {
    env: Arc<CaptureEnvironment>,
    runtime: Handle,
    state: SessionState,
    label: CaptureLabel,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl CaptureController {
    /// Create an idle controller. Preparation tasks run on `runtime`'s blocking pool.
    pub fn new(env: CaptureEnvironment, runtime: Handle) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            env: Arc::new(env),
            runtime,
            state: SessionState::Idle,
            label: CaptureLabel::Ready,
            event_tx,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    pub fn label(&self) -> CaptureLabel {
        self.label
    }

    /// Subscribe to label changes and session results
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Begin a recording. The label stays unchanged until preparation completes.
    pub fn request_start(&mut self) -> SessionResult<()> {
        if !matches!(self.state, SessionState::Idle) {
            return Err(self.reject("start"));
        }

        let session_id = Uuid::new_v4();
        tracing::info!("Starting capture session {}", session_id);

        let completion = preparation::dispatch(self.env.clone(), &self.runtime, session_id);
        self.state = SessionState::Preparing {
            session_id,
            completion,
        };
        Ok(())
    }

    /// Apply the preparation result if it has arrived.
    ///
    /// Returns `Ok(true)` once recording has started, `Ok(false)` while the
    /// task is still running.
    pub fn poll_preparation(&mut self) -> SessionResult<bool> {
        let SessionState::Preparing { completion, .. } = &mut self.state else {
            return Err(self.reject("poll preparation"));
        };

        let outcome = match completion.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return Ok(false),
            Err(TryRecvError::Closed) => Err(PrepareError::Aborted),
        };
        self.finish_preparation(outcome).map(|()| true)
    }

    /// Wait for the preparation task and apply its result
    pub async fn preparation_complete(&mut self) -> SessionResult<()> {
        let SessionState::Preparing { completion, .. } = &mut self.state else {
            return Err(self.reject("await preparation"));
        };

        let outcome = completion.await.unwrap_or(Err(PrepareError::Aborted));
        self.finish_preparation(outcome)
    }

    fn finish_preparation(&mut self, outcome: PrepareOutcome) -> SessionResult<()> {
        let SessionState::Preparing { session_id, .. } = std::mem::replace(&mut self.state, SessionState::Idle)
        else {
            return Err(self.reject("finish preparation"));
        };

        match outcome {
            Ok(session) => {
                tracing::info!("Capture session {} recording", session_id);
                self.state = SessionState::Recording {
                    session_id,
                    session,
                };
                self.set_label(CaptureLabel::Recording);
                Ok(())
            }
            Err(e) => {
                // The task has already released everything it acquired
                tracing::error!("Capture session {} failed to start: {}", session_id, e);
                let _ = self.event_tx.send(SessionEvent::Terminated(e.to_string()));
                Err(SessionError::Preparation(e))
            }
        }
    }

    /// Stop recording and release the camera. Runs synchronously.
    pub fn request_stop(&mut self) -> SessionResult<StopOutcome> {
        if !matches!(self.state, SessionState::Recording { .. }) {
            return Err(self.reject("stop"));
        }

        let SessionState::Recording {
            session_id,
            session,
        } = std::mem::replace(&mut self.state, SessionState::Releasing)
        else {
            return Err(self.reject("stop"));
        };

        tracing::info!("Stopping capture session {}", session_id);
        let outcome = session.release();

        self.state = SessionState::Idle;
        self.set_label(CaptureLabel::Ready);
        let event = match &outcome {
            StopOutcome::Saved { path } => SessionEvent::RecordingSaved(path.clone()),
            StopOutcome::Discarded { reason } => SessionEvent::RecordingDiscarded(*reason),
        };
        let _ = self.event_tx.send(event);

        Ok(outcome)
    }

    /// Force the session back to idle when the host goes away.
    ///
    /// An in-flight preparation cannot be cancelled, so it is awaited first.
    pub async fn teardown(&mut self) -> Option<StopOutcome> {
        match self.state.phase() {
            SessionPhase::Idle | SessionPhase::Releasing => None,
            SessionPhase::Preparing => {
                tracing::info!("Teardown waiting for preparation to finish");
                match self.preparation_complete().await {
                    Ok(()) => self.request_stop().ok(),
                    Err(_) => None,
                }
            }
            SessionPhase::Recording => self.request_stop().ok(),
        }
    }

    fn set_label(&mut self, label: CaptureLabel) {
        if self.label != label {
            self.label = label;
            let _ = self.event_tx.send(SessionEvent::LabelChanged(label));
        }
    }

    fn reject(&self, operation: &'static str) -> SessionError {
        let phase = self.state.phase();
        tracing::error!("Rejected {} while {}", operation, phase);
        SessionError::ContractViolation { operation, phase }
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        // A pending preparation releases its own session once the receiver is gone
        if let SessionState::Recording { session_id, session } =
            std::mem::replace(&mut self.state, SessionState::Idle)
        {
            tracing::warn!("Capture session {} dropped while recording", session_id);
            session.abandon();
        }
    }
}

//! Preparation task
//!
//! Opens the camera and configures the encoder off the interactive thread.
//! Any failure releases everything acquired so far, newest first, before the
//! single completion is delivered.

use super::encoder::{EncoderSession, StopFailure};
use super::error::PrepareError;
use super::output::{OutputFile, OutputFilePolicy};
use super::state::{DiscardReason, StopOutcome};
use crate::capture::device::DeviceHandle;
use crate::capture::error::CaptureError;
use crate::capture::traits::{CaptureBackend, EncoderConfig, Facing, PreviewSurface};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Capture settings the controller and its tasks share
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Camera orientation to record from
    pub facing: Facing,
    /// Stop failures sooner than this after start count as a fast-stop race
    pub fast_stop_threshold: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            facing: Facing::Back,
            fast_stop_threshold: Duration::from_millis(1000),
        }
    }
}

/// External collaborators a capture session runs against
pub struct CaptureEnvironment {
    pub backend: Arc<dyn CaptureBackend>,
    pub output: Arc<dyn OutputFilePolicy>,
    pub preview: PreviewSurface,
    pub settings: SessionSettings,
}

/// Resources held while recording, handed from the task to the controller.
///
/// Dropping a session that was never released runs the same stop sequence
/// and removes the output file.
#[derive(Debug)]
pub struct ActiveSession {
    device: DeviceHandle,
    encoder: EncoderSession,
    output: OutputFile,
    released: bool,
}

impl ActiveSession {
    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub fn encoder(&self) -> &EncoderSession {
        &self.encoder
    }

    pub fn output_path(&self) -> &Path {
        self.output.path()
    }

    /// Stop recording and keep the file if the encoder finished it
    pub fn release(mut self) -> StopOutcome {
        let halt = self.halt();

        // The file is removed only after the encoder has let go of it
        match halt {
            Ok(elapsed) => match self.output.keep_if_written() {
                Some(path) => {
                    tracing::info!("Recorded {}ms to {:?}", elapsed.as_millis(), path);
                    StopOutcome::Saved { path }
                }
                None => StopOutcome::Discarded {
                    reason: DiscardReason::EmptyOutput,
                },
            },
            Err(failure) => {
                let reason = match &failure {
                    StopFailure::FastStopRace(_) => {
                        tracing::debug!("Stop came right after start: {}", failure.error());
                        DiscardReason::FastStopRace
                    }
                    StopFailure::Failed(e) => {
                        tracing::warn!("Encoder failed to stop: {}", e);
                        DiscardReason::EncoderStopFailed
                    }
                };
                self.output.remove();
                StopOutcome::Discarded { reason }
            }
        }
    }

    /// Stop recording for a session nobody will finish. The output is removed.
    pub fn abandon(mut self) {
        self.abandon_inner();
    }

    fn abandon_inner(&mut self) {
        if let Err(failure) = self.halt() {
            tracing::debug!("Abandoned encoder did not stop cleanly: {}", failure.error());
        }
        self.output.remove();
    }

    /// Halt the encoder, release it, reclaim and release the camera, in that order.
    fn halt(&mut self) -> Result<Duration, StopFailure> {
        self.released = true;
        let halt = self.encoder.stop();
        self.encoder.release_inner();
        if let Err(e) = self.device.lock() {
            tracing::warn!("Failed to reclaim camera {} from encoder: {}", self.device.id(), e);
        }
        self.device.release_inner();
        halt
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!("Session on camera {} dropped while recording", self.device.id());
            self.abandon_inner();
        }
    }
}

pub(crate) type PrepareOutcome = Result<ActiveSession, PrepareError>;

/// Run the preparation task on the blocking pool.
///
/// The receiver yields exactly one outcome. If nobody is left to receive a
/// successful outcome, the task tears the session down itself.
pub(crate) fn dispatch(
    env: Arc<CaptureEnvironment>,
    runtime: &Handle,
    session_id: Uuid,
) -> oneshot::Receiver<PrepareOutcome> {
    let (tx, rx) = oneshot::channel();

    runtime.spawn_blocking(move || {
        let span = tracing::info_span!("prepare", session = %session_id);
        let _guard = span.enter();

        let outcome = prepare_session(&env);
        if let Err(Ok(unclaimed)) = tx.send(outcome) {
            tracing::warn!("Controller went away during preparation, releasing session");
            unclaimed.abandon();
        }
    });

    rx
}

/// Acquire the camera, configure the encoder and start recording.
pub(crate) fn prepare_session(env: &CaptureEnvironment) -> PrepareOutcome {
    let output = env
        .output
        .create_output_file()
        .ok_or(PrepareError::NoWritableStorage)?;

    let mut device = match acquire_device(env) {
        Ok(device) => device,
        Err(e) => return Err(unwind(e.into(), None, None, output)),
    };

    if let Err(e) = setup_device(env, &mut device) {
        return Err(unwind(e.into(), None, Some(device), output));
    }

    // The encoder cannot take the camera until it is unlocked
    if let Err(e) = device.unlock() {
        return Err(unwind(e.into(), None, Some(device), output));
    }
    let mut encoder = EncoderSession::bind(
        env.backend.create_encoder(),
        &device,
        env.settings.fast_stop_threshold,
    );

    if let Err(e) = start_encoder(&mut encoder, &mut device, &output, env) {
        return Err(unwind(e, Some(encoder), Some(device), output));
    }

    tracing::info!("Recording prepared on camera {} to {:?}", device.id(), output.path());
    Ok(ActiveSession {
        device,
        encoder,
        output,
        released: false,
    })
}

/// First camera with the requested facing, or its stand-in when none has it
fn find_camera(backend: &dyn CaptureBackend, facing: Facing) -> Result<Option<String>, CaptureError> {
    let ids = backend.list_camera_identifiers()?;
    let facings: Vec<(String, Facing)> = ids
        .into_iter()
        .map(|id| {
            let facing = backend.identifier_facing(&id);
            (id, facing)
        })
        .collect();

    let pick = |wanted: Facing| {
        facings
            .iter()
            .find(|(_, facing)| *facing == wanted)
            .map(|(id, _)| id.clone())
    };
    Ok(pick(facing).or_else(|| {
        let stand_in = facing.stand_in()?;
        let id = pick(stand_in)?;
        tracing::info!("No {} camera, using {} camera {}", facing, stand_in, id);
        Some(id)
    }))
}

fn acquire_device(env: &CaptureEnvironment) -> Result<DeviceHandle, CaptureError> {
    let facing = env.settings.facing;
    let id = find_camera(env.backend.as_ref(), facing)?.ok_or(CaptureError::DeviceUnavailable(facing))?;

    tracing::debug!("Opening camera {} for {} facing", id, facing);
    DeviceHandle::open(env.backend.as_ref(), &id)
}

fn setup_device(env: &CaptureEnvironment, device: &mut DeviceHandle) -> Result<(), CaptureError> {
    let rotation = env.backend.display_rotation_for(device.id());
    let supported = device.supported_sizes();
    let size = env
        .backend
        .choose_size(&supported, env.preview.size(), rotation)
        .ok_or_else(|| CaptureError::DeviceError("camera reports no capture sizes".to_string()))?;

    device.apply(size, rotation)?;
    device.bind_preview(&env.preview)
}

fn start_encoder(
    encoder: &mut EncoderSession,
    device: &mut DeviceHandle,
    output: &OutputFile,
    env: &CaptureEnvironment,
) -> Result<(), PrepareError> {
    // Encode at what the camera actually delivers
    let config = EncoderConfig {
        output: output.path().to_path_buf(),
        size: device.size().unwrap_or_else(|| env.preview.size()),
        rotation: device.rotation(),
        stream: device.stream_format(),
        tap: device.frame_tap(),
    };
    encoder.configure(config)?;
    encoder.prepare()?;
    encoder.start(device)?;
    Ok(())
}

/// Release partially acquired resources, newest first
fn unwind(
    error: PrepareError,
    encoder: Option<EncoderSession>,
    device: Option<DeviceHandle>,
    output: OutputFile,
) -> PrepareError {
    tracing::warn!("Preparation failed, rolling back: {}", error);

    if let Some(encoder) = encoder {
        encoder.release();
    }
    if let Some(mut device) = device {
        if let Err(e) = device.lock() {
            tracing::warn!("Failed to reclaim camera {}: {}", device.id(), e);
        }
        device.release();
    }
    output.discard();

    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::device::{held_device, is_device_held, LockState};
    use crate::capture::traits::Resolution;
    use crate::recorder::encoder::EncoderState;
    use crate::recorder::testing::{FakeBackend, FakeConfig, FakeStep, SequentialOutput};
    use tempfile::TempDir;

    struct Fixture {
        backend: Arc<FakeBackend>,
        output: Arc<SequentialOutput>,
        env: CaptureEnvironment,
        _dir: TempDir,
    }

    fn fixture(config: FakeConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::new(config));
        let output = Arc::new(SequentialOutput::new(dir.path()));
        let preview = PreviewSurface::new(Resolution::new(1280, 720));
        preview.mark_ready();
        let env = CaptureEnvironment {
            backend: backend.clone(),
            output: output.clone(),
            preview,
            settings: SessionSettings::default(),
        };
        Fixture {
            backend,
            output,
            env,
            _dir: dir,
        }
    }

    fn assert_fully_released_devices(f: &Fixture) {
        assert_eq!(f.backend.live_devices(), 0);
        assert_eq!(f.backend.live_encoders(), 0);
        assert_eq!(held_device(), None);
    }

    fn assert_fully_released(f: &Fixture) {
        assert_eq!(f.backend.live_devices(), 0);
        assert_eq!(f.backend.live_encoders(), 0);
        assert!(!is_device_held(&f.backend.back_camera_id()));
        assert!(f.output.files().is_empty());
    }

    #[test]
    fn test_successful_preparation() {
        let f = fixture(FakeConfig::default());
        let session = prepare_session(&f.env).unwrap();

        assert_eq!(session.device().lock_state(), LockState::LockedByEncoder);
        assert_eq!(session.device().size(), Some(Resolution::new(1280, 720)));
        assert_eq!(session.encoder().state(), EncoderState::Recording);
        assert_eq!(
            f.backend.calls(),
            vec![
                "device.open",
                "device.configure",
                "device.bind_preview",
                "device.unlock",
                "encoder.configure",
                "encoder.prepare",
                "encoder.start",
            ]
        );

        assert!(matches!(session.release(), StopOutcome::Saved { .. }));
        assert_eq!(f.backend.live_devices(), 0);
        assert_eq!(f.backend.live_encoders(), 0);
    }

    #[test]
    fn test_dropped_session_releases_encoder_first_and_removes_file() {
        let f = fixture(FakeConfig::default());
        let session = prepare_session(&f.env).unwrap();
        assert!(session.output_path().exists());

        drop(session);
        let calls = f.backend.calls();
        assert_eq!(
            &calls[calls.len() - 5..],
            &[
                "encoder.stop",
                "encoder.reset",
                "encoder.release",
                "device.lock",
                "device.release"
            ]
        );
        assert_fully_released(&f);
    }

    #[test]
    fn test_abandon_discards_finished_recording() {
        let f = fixture(FakeConfig::default());
        let session = prepare_session(&f.env).unwrap();

        session.abandon();
        assert_fully_released(&f);
        assert_eq!(f.backend.calls().last(), Some(&"device.release"));
    }

    #[test]
    fn test_external_camera_stands_in_for_back() {
        let f = fixture(FakeConfig {
            no_back_camera: true,
            external_camera: true,
            ..FakeConfig::default()
        });
        let session = prepare_session(&f.env).unwrap();
        assert_eq!(session.device().id(), f.backend.external_camera_id());
        session.release();
        assert_fully_released_devices(&f);
    }

    #[test]
    fn test_back_camera_preferred_over_external() {
        let f = fixture(FakeConfig {
            external_camera: true,
            ..FakeConfig::default()
        });
        let session = prepare_session(&f.env).unwrap();
        assert_eq!(session.device().id(), f.backend.back_camera_id());
        session.release();
    }

    #[test]
    fn test_encoder_records_negotiated_size() {
        let f = fixture(FakeConfig {
            negotiated_size: Some(Resolution::new(1280, 960)),
            ..FakeConfig::default()
        });
        let session = prepare_session(&f.env).unwrap();
        assert_eq!(session.device().size(), Some(Resolution::new(1280, 960)));
        assert_eq!(f.backend.encoded_size(), Some(Resolution::new(1280, 960)));
        session.release();
    }

    #[test]
    fn test_missing_facing_is_unavailable() {
        let f = fixture(FakeConfig {
            no_back_camera: true,
            ..FakeConfig::default()
        });
        let err = prepare_session(&f.env).unwrap_err();
        assert!(matches!(
            err,
            PrepareError::Capture(CaptureError::DeviceUnavailable(Facing::Back))
        ));
        assert_eq!(f.backend.opens(), 0);
        assert_fully_released(&f);
    }

    #[test]
    fn test_no_writable_storage_acquires_nothing() {
        let backend = Arc::new(FakeBackend::new(FakeConfig::default()));
        let preview = PreviewSurface::new(Resolution::new(640, 480));
        preview.mark_ready();
        let env = CaptureEnvironment {
            backend: backend.clone(),
            output: Arc::new(SequentialOutput::unavailable()),
            preview,
            settings: SessionSettings::default(),
        };

        assert!(matches!(prepare_session(&env), Err(PrepareError::NoWritableStorage)));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_open_failure_creates_no_encoder() {
        let f = fixture(FakeConfig {
            fail_at: Some(FakeStep::Open),
            ..FakeConfig::default()
        });
        let err = prepare_session(&f.env).unwrap_err();
        assert!(matches!(err, PrepareError::Capture(CaptureError::DeviceBusy(_))));
        assert_eq!(f.backend.encoders_created(), 0);
        assert_fully_released(&f);
    }

    #[test]
    fn test_unready_preview_rolls_back_device() {
        let mut f = fixture(FakeConfig::default());
        f.env.preview = PreviewSurface::new(Resolution::new(1280, 720));

        let err = prepare_session(&f.env).unwrap_err();
        assert!(matches!(
            err,
            PrepareError::Capture(CaptureError::PreviewBindingError(_))
        ));
        assert_eq!(f.backend.encoders_created(), 0);
        assert_fully_released(&f);
    }

    #[test]
    fn test_every_failing_step_releases_everything() {
        let steps = [
            FakeStep::Configure,
            FakeStep::BindPreview,
            FakeStep::Unlock,
            FakeStep::EncoderConfigure,
            FakeStep::Prepare,
            FakeStep::Start,
        ];
        for step in steps {
            let f = fixture(FakeConfig {
                fail_at: Some(step),
                ..FakeConfig::default()
            });
            assert!(prepare_session(&f.env).is_err(), "{step:?} should fail");
            assert_fully_released(&f);

            let calls = f.backend.calls();
            assert_eq!(calls.last(), Some(&"device.release"), "{step:?}: {calls:?}");
        }
    }

    #[test]
    fn test_encoder_failure_releases_encoder_before_device() {
        let f = fixture(FakeConfig {
            fail_at: Some(FakeStep::Prepare),
            ..FakeConfig::default()
        });
        let err = prepare_session(&f.env).unwrap_err();
        assert!(matches!(err, PrepareError::EncoderConfig(_)));

        let calls = f.backend.calls();
        assert_eq!(
            &calls[calls.len() - 4..],
            &["encoder.reset", "encoder.release", "device.lock", "device.release"]
        );
    }
}

//! In-memory camera backend for tests
//!
//! Records every device and encoder call in order and counts live handles.

use crate::capture::error::{CaptureError, CaptureResult, EncoderError};
use crate::recorder::output::{OutputFile, OutputFilePolicy};
use crate::capture::traits::{
    CameraDevice, CaptureBackend, EncoderConfig, Facing, MediaEncoder, PreviewSurface, Resolution, Rotation,
};
use parking_lot::{Condvar, Mutex};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Step at which the fake backend reports a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeStep {
    Open,
    Configure,
    BindPreview,
    Unlock,
    EncoderConfigure,
    Prepare,
    Start,
}

#[derive(Debug, Clone)]
pub struct FakeConfig {
    pub fail_at: Option<FakeStep>,
    pub no_back_camera: bool,
    /// Also list a USB-style camera with no orientation
    pub external_camera: bool,
    /// Size the camera settles on instead of the requested one
    pub negotiated_size: Option<Resolution>,
    /// Halting the encoder fails with a generic error
    pub fail_stop: bool,
    /// Stopping sooner than this after start yields no output
    pub min_recording: Duration,
    pub rotation: Rotation,
}

impl Default for FakeConfig {
    fn default() -> Self {
        Self {
            fail_at: None,
            no_back_camera: false,
            external_camera: false,
            negotiated_size: None,
            fail_stop: false,
            min_recording: Duration::ZERO,
            rotation: Rotation::NONE,
        }
    }
}

#[derive(Default)]
struct FakeState {
    calls: Mutex<Vec<&'static str>>,
    live_devices: AtomicUsize,
    live_encoders: AtomicUsize,
    opens: AtomicUsize,
    encoders_created: AtomicUsize,
    encoded_size: Mutex<Option<Resolution>>,
}

impl FakeState {
    fn record(&self, call: &'static str) {
        self.calls.lock().push(call);
    }
}

/// Only one camera may be held per process, so fake backends take turns
static BACKEND_IN_USE: Mutex<bool> = parking_lot::const_mutex(false);
static BACKEND_FREED: Condvar = Condvar::new();

pub struct FakeBackend {
    config: FakeConfig,
    prefix: String,
    state: Arc<FakeState>,
}

impl FakeBackend {
    /// Blocks until no other fake backend is alive
    pub fn new(config: FakeConfig) -> Self {
        let mut in_use = BACKEND_IN_USE.lock();
        while *in_use {
            BACKEND_FREED.wait(&mut in_use);
        }
        *in_use = true;

        Self {
            config,
            prefix: Uuid::new_v4().to_string(),
            state: Arc::new(FakeState::default()),
        }
    }

    pub fn back_camera_id(&self) -> String {
        format!("{}-back", self.prefix)
    }

    pub fn front_camera_id(&self) -> String {
        format!("{}-front", self.prefix)
    }

    pub fn external_camera_id(&self) -> String {
        format!("{}-external", self.prefix)
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.calls.lock().clone()
    }

    pub fn live_devices(&self) -> usize {
        self.state.live_devices.load(Ordering::SeqCst)
    }

    pub fn live_encoders(&self) -> usize {
        self.state.live_encoders.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn encoders_created(&self) -> usize {
        self.state.encoders_created.load(Ordering::SeqCst)
    }

    /// Size the last configured encoder was asked to record at
    pub fn encoded_size(&self) -> Option<Resolution> {
        *self.state.encoded_size.lock()
    }

    fn fails_at(&self, step: FakeStep) -> bool {
        self.config.fail_at == Some(step)
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        *BACKEND_IN_USE.lock() = false;
        BACKEND_FREED.notify_one();
    }
}

impl CaptureBackend for FakeBackend {
    fn list_camera_identifiers(&self) -> CaptureResult<Vec<String>> {
        let mut ids = vec![self.front_camera_id()];
        if self.config.external_camera {
            ids.push(self.external_camera_id());
        }
        if !self.config.no_back_camera {
            ids.push(self.back_camera_id());
        }
        Ok(ids)
    }

    fn identifier_facing(&self, id: &str) -> Facing {
        if id.ends_with("-back") {
            Facing::Back
        } else if id.ends_with("-external") {
            Facing::External
        } else {
            Facing::Front
        }
    }

    fn open_device(&self, id: &str) -> CaptureResult<Box<dyn CameraDevice>> {
        self.state.record("device.open");
        if self.fails_at(FakeStep::Open) {
            return Err(CaptureError::DeviceBusy(id.to_string()));
        }
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        self.state.live_devices.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDevice {
            config: self.config.clone(),
            state: self.state.clone(),
            released: false,
        }))
    }

    fn display_rotation_for(&self, _id: &str) -> Rotation {
        self.config.rotation
    }

    fn create_encoder(&self) -> Box<dyn MediaEncoder> {
        self.state.encoders_created.fetch_add(1, Ordering::SeqCst);
        self.state.live_encoders.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeEncoder {
            config: self.config.clone(),
            state: self.state.clone(),
            output: None,
            started_at: None,
            released: false,
        })
    }
}

struct FakeDevice {
    config: FakeConfig,
    state: Arc<FakeState>,
    released: bool,
}

impl FakeDevice {
    fn step(&self, call: &'static str, step: FakeStep) -> CaptureResult<()> {
        self.state.record(call);
        if self.config.fail_at == Some(step) {
            return Err(match step {
                FakeStep::BindPreview => CaptureError::PreviewBindingError(call.to_string()),
                _ => CaptureError::DeviceError(call.to_string()),
            });
        }
        Ok(())
    }
}

impl CameraDevice for FakeDevice {
    fn supported_sizes(&self) -> Vec<Resolution> {
        vec![
            Resolution::new(1920, 1080),
            Resolution::new(1280, 720),
            Resolution::new(640, 480),
        ]
    }

    fn configure(&mut self, size: Resolution, _rotation: Rotation) -> CaptureResult<Resolution> {
        self.step("device.configure", FakeStep::Configure)?;
        Ok(self.config.negotiated_size.unwrap_or(size))
    }

    fn bind_preview(&mut self, _surface: &PreviewSurface) -> CaptureResult<()> {
        self.step("device.bind_preview", FakeStep::BindPreview)
    }

    fn unlock(&mut self) -> CaptureResult<()> {
        self.step("device.unlock", FakeStep::Unlock)
    }

    fn lock(&mut self) -> CaptureResult<()> {
        self.state.record("device.lock");
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.state.record("device.release");
        self.state.live_devices.fetch_sub(1, Ordering::SeqCst);
        self.released = true;
    }
}

struct FakeEncoder {
    config: FakeConfig,
    state: Arc<FakeState>,
    output: Option<PathBuf>,
    started_at: Option<Instant>,
    released: bool,
}

impl FakeEncoder {
    fn step(&self, call: &'static str, step: FakeStep) -> Result<(), EncoderError> {
        self.state.record(call);
        if self.config.fail_at == Some(step) {
            return Err(match step {
                FakeStep::Prepare => {
                    EncoderError::Io(std::io::Error::new(std::io::ErrorKind::Other, call))
                }
                _ => EncoderError::IllegalState(call.to_string()),
            });
        }
        Ok(())
    }
}

impl MediaEncoder for FakeEncoder {
    fn configure(&mut self, config: &EncoderConfig) -> Result<(), EncoderError> {
        self.step("encoder.configure", FakeStep::EncoderConfigure)?;
        *self.state.encoded_size.lock() = Some(config.size);
        self.output = Some(config.output.clone());
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), EncoderError> {
        self.step("encoder.prepare", FakeStep::Prepare)?;
        // Real encoders open the output file while preparing
        if let Some(output) = &self.output {
            std::fs::write(output, b"")?;
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), EncoderError> {
        self.step("encoder.start", FakeStep::Start)?;
        self.started_at = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EncoderError> {
        self.state.record("encoder.stop");
        if self.config.fail_stop {
            return Err(EncoderError::Failed("stop failed".to_string()));
        }
        let elapsed = self.started_at.map(|t| t.elapsed()).unwrap_or_default();
        if elapsed < self.config.min_recording {
            return Err(EncoderError::NoOutput);
        }
        if let Some(output) = &self.output {
            std::fs::write(output, b"fake-mp4-payload")?;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.state.record("encoder.reset");
        self.started_at = None;
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.state.record("encoder.release");
        self.state.live_encoders.fetch_sub(1, Ordering::SeqCst);
        self.released = true;
    }
}

/// Names output files `clip-<n>.mp4` in a directory
pub struct SequentialOutput {
    directory: PathBuf,
    next: AtomicUsize,
    pub unavailable: bool,
}

impl SequentialOutput {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            next: AtomicUsize::new(0),
            unavailable: false,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new(PathBuf::new())
        }
    }

    /// Every file currently in the directory
    pub fn files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(&self.directory)
            .map(|entries| entries.filter_map(|e| e.ok().map(|e| e.path())).collect())
            .unwrap_or_default()
    }
}

impl OutputFilePolicy for SequentialOutput {
    fn create_output_file(&self) -> Option<OutputFile> {
        if self.unavailable {
            return None;
        }
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        Some(OutputFile::new(self.directory.join(format!("clip-{n}.mp4"))))
    }
}

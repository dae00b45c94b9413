//! Capture trait definitions
//!
//! Platform-agnostic traits for camera devices and media encoders, plus the
//! small value types they exchange.

use super::error::{CaptureResult, EncoderError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::Arc;

/// Physical orientation of a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    /// Rear-facing camera
    #[default]
    Back,
    /// Camera with no fixed orientation (USB webcams)
    External,
}

impl Facing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Facing::Front => "front",
            Facing::Back => "back",
            Facing::External => "external",
        }
    }

    /// Facing accepted when no camera has this one. Desktop webcams report no
    /// orientation, so they stand in for the rear camera and the reverse.
    pub fn stand_in(&self) -> Option<Facing> {
        match self {
            Facing::Back => Some(Facing::External),
            Facing::External => Some(Facing::Back),
            Facing::Front => None,
        }
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Facing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "front" => Ok(Facing::Front),
            "back" | "rear" => Ok(Facing::Back),
            "external" => Ok(Facing::External),
            other => Err(format!("unknown camera facing: {other}")),
        }
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Width divided by height, 0.0 for a degenerate size
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f64 / self.height as f64
        }
    }

    pub fn transposed(&self) -> Self {
        Self::new(self.height, self.width)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Display-relative rotation in clockwise degrees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Rotation(u16);

impl Rotation {
    pub const NONE: Rotation = Rotation(0);

    /// Normalize any angle to the nearest quarter turn
    pub fn from_degrees(degrees: i32) -> Self {
        let quarter = ((degrees as f64 / 90.0).round() as i32).rem_euclid(4);
        Rotation((quarter * 90) as u16)
    }

    pub fn degrees(&self) -> u16 {
        self.0
    }

    /// Whether the output is portrait relative to the sensor
    pub fn swaps_axes(&self) -> bool {
        self.0 == 90 || self.0 == 270
    }
}

/// Information about a camera
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    pub facing: Facing,
}

/// Raw frame layout produced by an opened camera stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFormat {
    /// FFmpeg pixel format name (yuyv422, nv12, rgb24, mjpeg)
    pub pixel_format: String,
    pub fps: u32,
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self {
            pixel_format: "yuyv422".to_string(),
            fps: 30,
        }
    }
}

/// The live preview target a camera stream is bound to.
///
/// The hosting UI marks the surface ready once it can accept frames; binding
/// an unready surface fails. The most recent preview frame is published here.
#[derive(Debug, Clone)]
pub struct PreviewSurface {
    size: Resolution,
    ready: Arc<AtomicBool>,
    latest_frame: Arc<Mutex<Option<Vec<u8>>>>,
}

impl PreviewSurface {
    pub fn new(size: Resolution) -> Self {
        Self {
            size,
            ready: Arc::new(AtomicBool::new(false)),
            latest_frame: Arc::new(Mutex::new(None)),
        }
    }

    pub fn size(&self) -> Resolution {
        self.size
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn publish(&self, frame: &[u8]) {
        *self.latest_frame.lock() = Some(frame.to_vec());
    }

    /// Most recent frame for the host to draw
    pub fn latest_frame(&self) -> Option<Vec<u8>> {
        self.latest_frame.lock().clone()
    }
}

/// Hand-off point for camera frames once an encoder has taken control.
///
/// The camera pushes every captured frame; frames go nowhere until an encoder
/// attaches a sender. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct FrameTap {
    sender: Arc<Mutex<Option<SyncSender<Vec<u8>>>>>,
}

impl FrameTap {
    pub fn attach(&self, sender: SyncSender<Vec<u8>>) {
        *self.sender.lock() = Some(sender);
    }

    pub fn detach(&self) {
        self.sender.lock().take();
    }

    pub fn is_attached(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Offer a frame to the attached encoder. Returns false if it was dropped.
    pub fn push(&self, frame: &[u8]) -> bool {
        let mut guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return false;
        };
        match sender.try_send(frame.to_vec()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!("Encoder is behind, dropping frame");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                guard.take();
                false
            }
        }
    }
}

/// Everything an encoder needs to record one output file
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub output: PathBuf,
    pub size: Resolution,
    pub rotation: Rotation,
    pub stream: StreamFormat,
    pub tap: FrameTap,
}

/// Camera enumeration and device access provided by the platform
pub trait CaptureBackend: Send + Sync {
    fn list_camera_identifiers(&self) -> CaptureResult<Vec<String>>;

    fn identifier_facing(&self, id: &str) -> Facing;

    /// Open a camera exclusively. May block on hardware arbitration.
    fn open_device(&self, id: &str) -> CaptureResult<Box<dyn CameraDevice>>;

    fn display_rotation_for(&self, id: &str) -> Rotation;

    /// Pick the capture size for a preview surface
    fn choose_size(&self, supported: &[Resolution], preview: Resolution, rotation: Rotation) -> Option<Resolution> {
        super::sizing::choose_optimal_size(supported, preview, rotation)
    }

    /// Create an unconfigured encoder
    fn create_encoder(&self) -> Box<dyn MediaEncoder>;
}

/// An opened, exclusively held camera
pub trait CameraDevice: Send {
    fn supported_sizes(&self) -> Vec<Resolution>;

    /// Apply a capture size and return the size the camera settled on
    fn configure(&mut self, size: Resolution, rotation: Rotation) -> CaptureResult<Resolution>;

    /// Start streaming into the preview surface. Blocks until the stream is live.
    fn bind_preview(&mut self, surface: &PreviewSurface) -> CaptureResult<()>;

    /// Give up software control so an encoder can drive the camera
    fn unlock(&mut self) -> CaptureResult<()>;

    /// Reclaim software control from an encoder
    fn lock(&mut self) -> CaptureResult<()>;

    fn stream_format(&self) -> StreamFormat {
        StreamFormat::default()
    }

    fn frame_tap(&self) -> FrameTap {
        FrameTap::default()
    }

    /// Close the device and drop the hardware lock
    fn release(&mut self);
}

/// A hardware-backed audio/video encoder
pub trait MediaEncoder: Send {
    fn configure(&mut self, config: &EncoderConfig) -> Result<(), EncoderError>;

    /// Finish configuration. May block.
    fn prepare(&mut self) -> Result<(), EncoderError>;

    fn start(&mut self) -> Result<(), EncoderError>;

    fn stop(&mut self) -> Result<(), EncoderError>;

    /// Return to the unconfigured state, abandoning any recording
    fn reset(&mut self);

    fn release(&mut self);
}

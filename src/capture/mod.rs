//! Camera capture
//!
//! Device handles, backend traits and the nokhwa/FFmpeg implementations.

pub mod device;
pub mod error;
pub mod ffmpeg_recorder;
pub mod sizing;
pub mod traits;
pub mod webcam;

pub use device::{DeviceHandle, LockState};
pub use error::{CaptureError, CaptureResult, EncoderError};
pub use ffmpeg_recorder::FfmpegRecorder;
pub use traits::{
    CameraDevice, CameraInfo, CaptureBackend, EncoderConfig, Facing, FrameTap, MediaEncoder, PreviewSurface,
    Resolution, Rotation, StreamFormat,
};
pub use webcam::NokhwaBackend;

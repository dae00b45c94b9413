//! Post-capture export
//!
//! Concatenates two recorded clips with a crossfade using an external
//! transcoding engine.

pub mod ffmpeg;
pub mod types;

pub use ffmpeg::{build_crossfade_args, probe_video, FfmpegTranscoder, Transcoder};
pub use types::{CrossfadeOptions, ExportError, VideoMetadata};

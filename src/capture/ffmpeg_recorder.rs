//! FFmpeg-backed media encoder
//!
//! Raw camera frames arrive through the device's `FrameTap`, a writer thread
//! pipes them into an ffmpeg child process which encodes H.264 into an MP4.

use super::error::EncoderError;
use super::traits::{EncoderConfig, MediaEncoder};
use std::io::Write;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Frames buffered between camera and ffmpeg before new ones are dropped
const FRAME_QUEUE_DEPTH: usize = 60;

/// Build the ffmpeg arguments for recording raw frames from stdin
pub fn recording_args(config: &EncoderConfig) -> Vec<String> {
    let fps = config.stream.fps.max(1);
    let mut args: Vec<String> = vec!["-y".into(), "-hide_banner".into(), "-nostats".into()];
    args.extend(["-loglevel".into(), "error".into()]);

    // Input: raw frames in the camera's native pixel format
    if config.stream.pixel_format == "mjpeg" {
        args.extend(["-f".into(), "mjpeg".into()]);
    } else {
        args.extend([
            "-f".into(),
            "rawvideo".into(),
            "-pixel_format".into(),
            config.stream.pixel_format.clone(),
            "-video_size".into(),
            config.size.to_string(),
        ]);
    }
    args.extend([
        "-framerate".into(),
        fps.to_string(),
        "-i".into(),
        "-".into(),
    ]);

    args.extend([
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "veryfast".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-crf".into(),
        "18".into(),
        "-g".into(),
        (fps * 2).to_string(),
    ]);

    if config.rotation.degrees() != 0 {
        args.extend([
            "-metadata:s:v:0".into(),
            format!("rotate={}", config.rotation.degrees()),
        ]);
    }

    args.extend([
        "-movflags".into(),
        "+faststart".into(),
        config.output.to_string_lossy().to_string(),
    ]);
    args
}

/// Check whether an ffmpeg binary is on the path
pub fn ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Encoder writing camera frames to an MP4 through an ffmpeg process
#[derive(Default)]
pub struct FfmpegRecorder {
    config: Option<EncoderConfig>,
    process: Option<Child>,
    writer: Option<JoinHandle<()>>,
    frames: Arc<AtomicU64>,
}

impl FfmpegRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames written to ffmpeg so far
    pub fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Detach from the camera and let the writer drain
    fn close_input(&mut self) {
        if let Some(config) = &self.config {
            config.tap.detach();
        }
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                tracing::warn!("FFmpeg frame writer panicked");
            }
        }
    }
}

fn write_frames(frames: Receiver<Vec<u8>>, mut stdin: ChildStdin, count: Arc<AtomicU64>) {
    for frame in frames {
        if let Err(e) = stdin.write_all(&frame) {
            tracing::warn!("FFmpeg stopped accepting frames: {}", e);
            break;
        }
        count.fetch_add(1, Ordering::Relaxed);
    }
    // Dropping stdin signals EOF to ffmpeg
}

impl MediaEncoder for FfmpegRecorder {
    fn configure(&mut self, config: &EncoderConfig) -> Result<(), EncoderError> {
        if config.size.area() == 0 {
            return Err(EncoderError::IllegalState(format!(
                "cannot record at {}",
                config.size
            )));
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), EncoderError> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| EncoderError::IllegalState("prepare called before configure".to_string()))?;

        if !ffmpeg_available() {
            return Err(EncoderError::Failed(
                "FFmpeg not found. Please install FFmpeg".to_string(),
            ));
        }

        let args = recording_args(config);
        let process = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        tracing::info!(
            "Started FFmpeg encoder: {} @ {}fps, pixel_format={}, output: {:?}",
            config.size,
            config.stream.fps,
            config.stream.pixel_format,
            config.output
        );
        self.process = Some(process);
        Ok(())
    }

    fn start(&mut self) -> Result<(), EncoderError> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| EncoderError::IllegalState("start called before configure".to_string()))?;
        let stdin = self
            .process
            .as_mut()
            .and_then(|p| p.stdin.take())
            .ok_or_else(|| EncoderError::IllegalState("start called before prepare".to_string()))?;

        let (tx, rx) = mpsc::sync_channel(FRAME_QUEUE_DEPTH);
        let count = self.frames.clone();
        let writer = std::thread::Builder::new()
            .name("ffmpeg-writer".to_string())
            .spawn(move || write_frames(rx, stdin, count))?;
        config.tap.attach(tx);
        self.writer = Some(writer);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EncoderError> {
        self.close_input();
        let process = self
            .process
            .take()
            .ok_or_else(|| EncoderError::IllegalState("stop called before prepare".to_string()))?;

        let frames = self.frame_count();
        if frames == 0 {
            let mut process = process;
            let _ = process.kill();
            let _ = process.wait();
            return Err(EncoderError::NoOutput);
        }

        let output = process.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EncoderError::Failed(format!(
                "FFmpeg exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        tracing::info!("FFmpeg encoder finished: {} frames", frames);
        Ok(())
    }

    fn reset(&mut self) {
        self.close_input();
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
        self.config = None;
        self.frames.store(0, Ordering::Relaxed);
    }

    fn release(&mut self) {
        self.reset();
    }
}

impl Drop for FfmpegRecorder {
    fn drop(&mut self) {
        self.reset();
    }
}

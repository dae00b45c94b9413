//! FFmpeg crossfade concatenation
//!
//! Probes both clips with ffprobe, then builds one filter graph that joins
//! them with an `xfade` video transition and, when both clips have sound, an
//! `acrossfade` on the audio.

use crate::export::types::{CrossfadeOptions, ExportError, VideoMetadata};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Command;

/// External transcoding engine used for post-capture editing
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Read dimensions, frame rate, duration and audio presence of a clip
    async fn probe(&self, path: &Path) -> Result<VideoMetadata, ExportError>;

    /// Join `first` and `second` into `output`, overlapping them by the fade duration
    async fn crossfade(
        &self,
        first: &Path,
        second: &Path,
        output: &Path,
        options: &CrossfadeOptions,
    ) -> Result<PathBuf, ExportError>;
}

/// Transcoder running the ffmpeg and ffprobe binaries on the blocking pool
#[derive(Debug, Clone, Default)]
pub struct FfmpegTranscoder;

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe(&self, path: &Path) -> Result<VideoMetadata, ExportError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || probe_video(&path))
            .await
            .map_err(|e| ExportError::Task(e.to_string()))?
    }

    async fn crossfade(
        &self,
        first: &Path,
        second: &Path,
        output: &Path,
        options: &CrossfadeOptions,
    ) -> Result<PathBuf, ExportError> {
        let (first, second, output) = (first.to_path_buf(), second.to_path_buf(), output.to_path_buf());
        let options = options.clone();
        tokio::task::spawn_blocking(move || crossfade_blocking(&first, &second, &output, &options))
            .await
            .map_err(|e| ExportError::Task(e.to_string()))?
    }
}

/// Probe a clip with ffprobe
pub fn probe_video(path: &Path) -> Result<VideoMetadata, ExportError> {
    let output = Command::new("ffprobe")
        .args(["-v", "quiet", "-print_format", "json", "-show_streams", "-show_format"])
        .arg(path)
        .output()
        .map_err(|e| ExportError::Ffmpeg(format!("Failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        return Err(ExportError::Probe {
            path: path.display().to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    parse_probe_output(&String::from_utf8_lossy(&output.stdout)).map_err(|message| ExportError::Probe {
        path: path.display().to_string(),
        message,
    })
}

/// Parse ffprobe's JSON (`-show_streams -show_format`) into clip metadata
pub fn parse_probe_output(json_str: &str) -> Result<VideoMetadata, String> {
    let json: serde_json::Value =
        serde_json::from_str(json_str).map_err(|e| format!("Failed to parse ffprobe output: {}", e))?;

    let streams = json
        .get("streams")
        .and_then(|s| s.as_array())
        .ok_or("No streams found in video")?;

    let codec_type = |stream: &serde_json::Value| stream.get("codec_type").and_then(|v| v.as_str()).map(str::to_owned);
    let video_stream = streams
        .iter()
        .find(|s| codec_type(s).as_deref() == Some("video"))
        .ok_or("No video stream found")?;
    let has_audio = streams.iter().any(|s| codec_type(s).as_deref() == Some("audio"));

    let width = video_stream.get("width").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let height = video_stream.get("height").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    if width == 0 || height == 0 {
        return Err("Video stream has no dimensions".to_string());
    }

    let codec = video_stream
        .get("codec_name")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let fps = video_stream
        .get("r_frame_rate")
        .and_then(|v| v.as_str())
        .map(parse_frame_rate)
        .unwrap_or(0.0);

    // Container duration first, the stream's own as a fallback
    let duration_secs = json
        .get("format")
        .and_then(|f| f.get("duration"))
        .or_else(|| video_stream.get("duration"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or("No duration reported")?;

    Ok(VideoMetadata {
        width,
        height,
        fps,
        duration_secs,
        codec,
        has_audio,
    })
}

/// Parse a frame rate given as "30/1", "30000/1001" or "29.97"
fn parse_frame_rate(s: &str) -> f64 {
    match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().unwrap_or(0.0);
            let den: f64 = den.parse().unwrap_or(1.0);
            if den > 0.0 {
                num / den
            } else {
                0.0
            }
        }
        None => s.parse().unwrap_or(0.0),
    }
}

/// Build the ffmpeg arguments joining two probed clips with a crossfade
pub fn build_crossfade_args(
    first: &Path,
    second: &Path,
    first_meta: &VideoMetadata,
    second_meta: &VideoMetadata,
    output: &Path,
    options: &CrossfadeOptions,
) -> Result<Vec<String>, ExportError> {
    let fade = options.duration().as_secs_f64();
    if fade <= 0.0 {
        return Err(ExportError::InvalidConfig(
            "Crossfade duration must be positive".to_string(),
        ));
    }
    if fade >= first_meta.duration_secs || fade >= second_meta.duration_secs {
        return Err(ExportError::InvalidConfig(format!(
            "Crossfade of {:.3}s does not fit clips of {:.3}s and {:.3}s",
            fade, first_meta.duration_secs, second_meta.duration_secs
        )));
    }

    let offset = first_meta.duration_secs - fade;
    let (w, h) = (first_meta.width, first_meta.height);
    let fps = if first_meta.fps > 0.0 { first_meta.fps } else { 30.0 };

    // xfade needs both inputs at the same size, rate and pixel format
    let mut filter = format!(
        "[0:v]setsar=1,fps={fps:.3},format=yuv420p[v0];\
         [1:v]scale={w}:{h}:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps:.3},format=yuv420p[v1];\
         [v0][v1]xfade=transition={}:duration={fade:.3}:offset={offset:.3}[v]",
        options.transition
    );

    let with_audio = options.include_audio && first_meta.has_audio && second_meta.has_audio;
    if with_audio {
        filter.push_str(&format!(";[0:a][1:a]acrossfade=d={fade:.3}[a]"));
    }

    let mut args: Vec<String> = vec![
        "-y".into(),
        "-i".into(),
        first.to_string_lossy().to_string(),
        "-i".into(),
        second.to_string_lossy().to_string(),
        "-filter_complex".into(),
        filter,
        "-map".into(),
        "[v]".into(),
    ];
    if with_audio {
        args.extend(["-map".into(), "[a]".into(), "-c:a".into(), "aac".into(), "-b:a".into(), "192k".into()]);
    }
    args.extend([
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "medium".into(),
        "-crf".into(),
        options.crf.to_string(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-movflags".into(),
        "+faststart".into(),
        output.to_string_lossy().to_string(),
    ]);

    Ok(args)
}

fn crossfade_blocking(
    first: &Path,
    second: &Path,
    output: &Path,
    options: &CrossfadeOptions,
) -> Result<PathBuf, ExportError> {
    let first_meta = probe_video(first)?;
    let second_meta = probe_video(second)?;

    tracing::info!(
        "Crossfading {:?} ({}x{}, {:.2}s) into {:?} ({}x{}, {:.2}s) over {}ms",
        first,
        first_meta.width,
        first_meta.height,
        first_meta.duration_secs,
        second,
        second_meta.width,
        second_meta.height,
        second_meta.duration_secs,
        options.duration_ms
    );

    let args = build_crossfade_args(first, second, &first_meta, &second_meta, output, options)?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let result = Command::new("ffmpeg")
        .args(&args)
        .output()
        .map_err(|e| ExportError::Ffmpeg(format!("Failed to start FFmpeg: {}", e)))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        tracing::error!("FFmpeg crossfade failed: {}", stderr);
        return Err(ExportError::Ffmpeg(format!(
            "FFmpeg exited with status {}",
            result.status
        )));
    }

    tracing::info!("Crossfade written to {:?}", output);
    Ok(output.to_path_buf())
}

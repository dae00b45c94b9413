//! Camcorder command-line interface
//!
//! Lists cameras, records a clip through the capture session controller and
//! joins two clips with a crossfade.

use anyhow::Context;
use camcorder_lib::capture::traits::{Facing, PreviewSurface};
use camcorder_lib::capture::webcam::{get_cameras, NokhwaBackend};
use camcorder_lib::config::{self, AppConfig};
use camcorder_lib::export::{FfmpegTranscoder, Transcoder};
use camcorder_lib::recorder::{CaptureController, CaptureEnvironment, StopOutcome};
use camcorder_lib::utils::error::{AppError, AppResult, ErrorResponse};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Camcorder - camera recording CLI
#[derive(Parser, Debug)]
#[command(name = "camcorder")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Read configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available cameras
    Cameras,
    /// Record a clip until the duration elapses or Ctrl-C
    Record {
        /// Auto-stop after duration (seconds)
        #[arg(short, long)]
        seconds: Option<u64>,

        /// Camera facing: front, back or external
        #[arg(long)]
        facing: Option<Facing>,

        /// Output directory (overrides configured directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Join two clips with a crossfade
    Crossfade {
        first: PathBuf,
        second: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Crossfade length in milliseconds
        #[arg(long)]
        duration_ms: Option<u64>,

        /// Do not crossfade audio
        #[arg(long)]
        no_audio: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    camcorder_lib::init_logging(camcorder_lib::DEFAULT_LOG_FILTER);

    let config = match &cli.config {
        Some(path) => config::load_config_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => config::load_config(),
    };

    let result = match cli.command {
        Commands::Cameras => list_cameras(cli.json),
        Commands::Record {
            seconds,
            facing,
            output,
        } => record(config, seconds, facing, output, cli.json).await,
        Commands::Crossfade {
            first,
            second,
            output,
            duration_ms,
            no_audio,
        } => crossfade(&config, first, second, output, duration_ms, no_audio, cli.json).await,
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if cli.json => {
            let response = ErrorResponse::from(e);
            println!("{}", serde_json::to_string_pretty(&response)?);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

fn list_cameras(json: bool) -> AppResult<()> {
    let cameras = get_cameras();
    if json {
        println!("{}", serde_json::to_string_pretty(&cameras)?);
        return Ok(());
    }

    if cameras.is_empty() {
        println!("No cameras found");
    }
    for camera in cameras {
        println!("{:<12} {:<10} {}", camera.id, camera.facing, camera.name);
    }
    Ok(())
}

async fn record(
    mut config: AppConfig,
    seconds: Option<u64>,
    facing: Option<Facing>,
    output: Option<PathBuf>,
    json: bool,
) -> AppResult<()> {
    if let Some(facing) = facing {
        config.capture.facing = facing;
    }
    if let Some(output) = output {
        config.output.directory = Some(output.to_string_lossy().to_string());
    }

    // No UI here: the preview surface only holds the latest frame
    let preview = PreviewSurface::new(config.preview_size());
    preview.mark_ready();

    let env = CaptureEnvironment {
        backend: Arc::new(NokhwaBackend::new().with_frame_rate(config.capture.fps)),
        output: Arc::new(config.output_policy()),
        preview,
        settings: config.session_settings(),
    };
    let mut controller = CaptureController::new(env, tokio::runtime::Handle::current());

    controller.request_start()?;
    controller.preparation_complete().await?;
    if !json {
        match seconds {
            Some(s) => println!("Recording for {s}s, press Ctrl-C to stop early"),
            None => println!("Recording, press Ctrl-C to stop"),
        }
    }

    let limit = async {
        match seconds {
            Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = limit => {}
        signal = tokio::signal::ctrl_c() => signal?,
    }

    let outcome = controller.request_stop()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        match outcome {
            StopOutcome::Saved { path } => println!("Saved {}", path.display()),
            StopOutcome::Discarded { reason } => println!("Recording discarded ({reason:?})"),
        }
    }
    Ok(())
}

async fn crossfade(
    config: &AppConfig,
    first: PathBuf,
    second: PathBuf,
    output: PathBuf,
    duration_ms: Option<u64>,
    no_audio: bool,
    json: bool,
) -> AppResult<()> {
    let mut options = config.crossfade_options();
    if let Some(ms) = duration_ms {
        options.duration_ms = ms;
    }
    if no_audio {
        options.include_audio = false;
    }

    for path in [&first, &second] {
        if !path.is_file() {
            return Err(AppError::Config(format!("{} is not a file", path.display())));
        }
    }

    let written = FfmpegTranscoder::new()
        .crossfade(&first, &second, &output, &options)
        .await?;

    if json {
        println!("{}", serde_json::json!({ "output": written }));
    } else {
        println!("Wrote {}", written.display());
    }
    Ok(())
}

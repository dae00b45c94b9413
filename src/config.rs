//! Configuration management
//!
//! Loads and saves user configuration in the platform config directory:
//! - Linux: `~/.config/camcorder/config.json`
//! - macOS: `~/Library/Application Support/camcorder/config.json`
//! - Windows: `%APPDATA%\camcorder\config.json`

use crate::capture::traits::{Facing, Resolution};
use crate::export::types::CrossfadeOptions;
use crate::recorder::output::TimestampedOutput;
use crate::recorder::preparation::SessionSettings;
use crate::utils::error::{AppError, AppResult};
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Folder created under the user's Videos directory for recordings
const OUTPUT_FOLDER: &str = "CameraSample";

/// Camera and session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Camera to record from. `back` also takes an external webcam.
    #[serde(default)]
    pub facing: Facing,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Stop failures sooner than this after start are treated as a fast-stop race
    #[serde(default = "default_fast_stop_threshold_ms")]
    pub fast_stop_threshold_ms: u64,
    #[serde(default = "default_preview_width")]
    pub preview_width: u32,
    #[serde(default = "default_preview_height")]
    pub preview_height: u32,
}

fn default_fps() -> u32 {
    30
}

fn default_fast_stop_threshold_ms() -> u64 {
    1000
}

fn default_preview_width() -> u32 {
    1280
}

fn default_preview_height() -> u32 {
    720
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            facing: Facing::default(),
            fps: default_fps(),
            fast_stop_threshold_ms: default_fast_stop_threshold_ms(),
            preview_width: default_preview_width(),
            preview_height: default_preview_height(),
        }
    }
}

/// Output file settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    /// Custom output directory. If None, uses Videos/CameraSample.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

/// Crossfade defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossfadeConfig {
    #[serde(default = "default_crossfade_ms")]
    pub duration_ms: u64,
    #[serde(default = "default_include_audio")]
    pub include_audio: bool,
}

fn default_crossfade_ms() -> u64 {
    1000
}

fn default_include_audio() -> bool {
    true
}

impl Default for CrossfadeConfig {
    fn default() -> Self {
        Self {
            duration_ms: default_crossfade_ms(),
            include_audio: default_include_audio(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub crossfade: CrossfadeConfig,
}

impl AppConfig {
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            facing: self.capture.facing,
            fast_stop_threshold: Duration::from_millis(self.capture.fast_stop_threshold_ms),
        }
    }

    pub fn preview_size(&self) -> Resolution {
        Resolution::new(self.capture.preview_width, self.capture.preview_height)
    }

    /// Naming policy for recordings under the configured directory
    pub fn output_policy(&self) -> TimestampedOutput {
        let mut policy = TimestampedOutput::new(output_dir(self));
        if let Some(prefix) = &self.output.file_prefix {
            policy = policy.with_prefix(prefix.clone());
        }
        if let Some(extension) = &self.output.extension {
            policy = policy.with_extension(extension.clone());
        }
        policy
    }

    pub fn crossfade_options(&self) -> CrossfadeOptions {
        CrossfadeOptions {
            duration_ms: self.crossfade.duration_ms,
            include_audio: self.crossfade.include_audio,
            ..CrossfadeOptions::default()
        }
    }
}

/// Get the path to the config file
pub fn config_path() -> AppResult<PathBuf> {
    let proj_dirs = ProjectDirs::from("", "", "camcorder")
        .ok_or_else(|| AppError::Config("Could not determine config directory".to_string()))?;
    Ok(proj_dirs.config_dir().join("config.json"))
}

/// Load configuration from the default location.
/// Returns defaults if the file doesn't exist or is invalid.
pub fn load_config() -> AppConfig {
    let path = match config_path() {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!("Failed to get config path: {}", e);
            return AppConfig::default();
        }
    };

    if !path.exists() {
        tracing::debug!("No config file found, using defaults");
        return AppConfig::default();
    }

    match load_config_from(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Failed to load config file: {}. Using defaults.", e);
            AppConfig::default()
        }
    }
}

/// Load configuration from a specific file
pub fn load_config_from(path: &Path) -> AppResult<AppConfig> {
    let contents = fs::read_to_string(path)?;
    let config = serde_json::from_str(&contents)?;
    tracing::debug!("Loaded config from {:?}", path);
    Ok(config)
}

/// Save configuration to the default location
pub fn save_config(config: &AppConfig) -> AppResult<()> {
    save_config_to(&config_path()?, config)
}

/// Save configuration to a specific file, creating its directory
pub fn save_config_to(path: &Path, config: &AppConfig) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(config)?)?;
    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

/// Default recording directory: Videos/CameraSample, or ./CameraSample
pub fn default_output_dir() -> PathBuf {
    UserDirs::new()
        .and_then(|dirs| dirs.video_dir().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(OUTPUT_FOLDER)
}

/// The configured output directory, falling back to the default if not set
pub fn output_dir(config: &AppConfig) -> PathBuf {
    match &config.output.directory {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => default_output_dir(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"capture": {"facing": "front"}}"#).unwrap();
        assert_eq!(config.capture.facing, Facing::Front);
        assert_eq!(config.capture.fps, 30);
        assert_eq!(config.capture.fast_stop_threshold_ms, 1000);
        assert_eq!(config.preview_size(), Resolution::new(1280, 720));
        assert_eq!(config.crossfade.duration_ms, 1000);
        assert!(config.output.directory.is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.capture.facing = Facing::External;
        config.output.directory = Some("/tmp/clips".to_string());
        config.crossfade.include_audio = false;
        save_config_to(&path, &config).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.capture.facing, Facing::External);
        assert_eq!(loaded.output.directory.as_deref(), Some("/tmp/clips"));
        assert!(!loaded.crossfade.include_audio);
    }

    #[test]
    fn test_invalid_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_config_from(&path), Err(AppError::Serialization(_))));
    }

    #[test]
    fn test_output_dir_prefers_configured() {
        let mut config = AppConfig::default();
        assert!(output_dir(&config).ends_with(OUTPUT_FOLDER));

        config.output.directory = Some("/srv/videos".to_string());
        assert_eq!(output_dir(&config), PathBuf::from("/srv/videos"));
    }

    #[test]
    fn test_session_settings_from_config() {
        let mut config = AppConfig::default();
        config.capture.fast_stop_threshold_ms = 250;
        let settings = config.session_settings();
        assert_eq!(settings.facing, Facing::Back);
        assert_eq!(settings.fast_stop_threshold, Duration::from_millis(250));
    }
}

//! Output files for recording attempts
//!
//! An `OutputFile` reserves a path before recording starts and is either
//! finalized on a clean stop or discarded, never both.

use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};

/// Naming policy for output files
pub trait OutputFilePolicy: Send + Sync {
    /// Reserve a path for a new video recording. `None` means no writable storage.
    fn create_output_file(&self) -> Option<OutputFile>;
}

/// One recording attempt's file
#[derive(Debug)]
pub struct OutputFile {
    path: PathBuf,
}

impl OutputFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file exists and holds data
    pub fn has_content(&self) -> bool {
        fs::metadata(&self.path)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Keep the file. Returns `None` and removes it if nothing was written.
    pub fn finalize(self) -> Option<PathBuf> {
        self.keep_if_written()
    }

    /// Remove the file if it was created
    pub fn discard(self) {
        self.remove();
    }

    pub(crate) fn keep_if_written(&self) -> Option<PathBuf> {
        if self.has_content() {
            tracing::info!("Recording saved to {:?}", self.path);
            Some(self.path.clone())
        } else {
            tracing::warn!("Recording {:?} is empty, removing it", self.path);
            self.remove();
            None
        }
    }

    pub(crate) fn remove(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::info!("Discarded {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {:?}: {}", self.path, e),
        }
    }
}

/// Names files `<prefix>yyyyMMdd_HHmmss<extension>` inside a directory
#[derive(Debug, Clone)]
pub struct TimestampedOutput {
    directory: PathBuf,
    prefix: String,
    extension: String,
}

impl TimestampedOutput {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            prefix: "VID_".to_string(),
            extension: ".mp4".to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        self.extension = if extension.is_empty() || extension.starts_with('.') {
            extension
        } else {
            format!(".{extension}")
        };
        self
    }

    fn file_name(&self, stamp: &str, attempt: usize) -> String {
        let suffix = if attempt == 0 {
            String::new()
        } else {
            format!("_{attempt}")
        };
        format!("{}{stamp}{suffix}{}", self.prefix, self.extension)
    }
}

impl OutputFilePolicy for TimestampedOutput {
    fn create_output_file(&self) -> Option<OutputFile> {
        if let Err(e) = fs::create_dir_all(&self.directory) {
            tracing::error!("Failed to create output directory {:?}: {}", self.directory, e);
            return None;
        }

        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        // Two attempts within the same second must not share a file
        let path = (0..)
            .map(|attempt| self.directory.join(self.file_name(&stamp, attempt)))
            .find(|path| !path.exists())?;

        tracing::debug!("Reserved output file {:?}", path);
        Some(OutputFile::new(path))
    }
}

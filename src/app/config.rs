//! Application configuration
//!
//! Settings that come from global command-line flags rather than from the
//! machine or experiment configuration files.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const DEFAULT_LOG_FILE: &str = "sqs.log";

/// Application configuration structure
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Verbosity level for console logging
    pub verbose: u8,
    /// Append-only transcript of every run
    pub log_file: PathBuf,
    /// Working directory; the simulation tree deployed by `copy` and `run`
    pub working_dir: PathBuf,
}

impl AppConfig {
    /// Create a new application configuration
    pub fn new(verbose: u8, log_file: impl Into<PathBuf>) -> Result<Self> {
        let working_dir =
            std::env::current_dir().context("Failed to get current directory")?;

        Ok(Self {
            verbose,
            log_file: log_file.into(),
            working_dir,
        })
    }

    /// Set the working directory
    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = dir;
        self
    }

    /// Get the console log filter based on verbosity
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            2 => "trace",
            _ => "trace,tokio=debug,runtime=debug",
        }
    }

    /// Log file path, resolved against the working directory when relative.
    pub fn log_path(&self) -> PathBuf {
        resolve(&self.working_dir, &self.log_file)
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            verbose: 0,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            working_dir: PathBuf::from("."),
        }
    }
}

//! Configuration module for the Chatlog engine.
//!
//! This module handles parsing configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `CHATLOG_CLAUDE_DIR` | No | `~/.claude` | Root holding `history.jsonl` and `projects/` |
//! | `CHATLOG_DEBOUNCE_MS` | No | 100 | Change watcher settle window in milliseconds |
//! | `CHATLOG_EVENT_BUFFER` | No | 1000 | Change notification buffer capacity |
//!
//! # Example
//!
//! ```no_run
//! use chatlog_engine::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("History log: {}", config.history_path().display());
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use thiserror::Error;

use crate::utils::debounce::DEFAULT_DEBOUNCE_MS;
use crate::utils::paths::{HISTORY_FILE_NAME, PROJECTS_DIR_NAME};

/// Default change notification buffer capacity.
pub const DEFAULT_EVENT_BUFFER: usize = 1000;

/// Default Claude Code directory name relative to home.
const DEFAULT_CLAUDE_DIR: &str = ".claude";

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to determine home directory.
    #[error("failed to determine home directory")]
    NoHomeDirectory,
}

/// Configuration for the Chatlog engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root directory containing the history log and the projects directory.
    pub claude_dir: PathBuf,

    /// Settle window applied per path before a change notification fires.
    pub debounce: Duration,

    /// Capacity of the change notification channel.
    pub event_buffer: usize,
}

impl Config {
    /// Creates a configuration for an explicit root directory with defaults
    /// for everything else.
    #[must_use]
    pub fn with_root(claude_dir: impl Into<PathBuf>) -> Self {
        Self {
            claude_dir: claude_dir.into(),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// Sets the debounce window (builder pattern).
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - `CHATLOG_DEBOUNCE_MS` is set but is not a non-negative integer
    /// - `CHATLOG_EVENT_BUFFER` is set but is not a positive integer
    /// - `CHATLOG_CLAUDE_DIR` is unset and the home directory cannot be determined
    pub fn from_env() -> Result<Self, ConfigError> {
        // Optional: CHATLOG_CLAUDE_DIR (default: ~/.claude)
        let claude_dir = match env::var("CHATLOG_CLAUDE_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => {
                let base_dirs = BaseDirs::new().ok_or(ConfigError::NoHomeDirectory)?;
                base_dirs.home_dir().join(DEFAULT_CLAUDE_DIR)
            }
        };

        // Optional: CHATLOG_DEBOUNCE_MS (default: 100, zero allowed)
        let debounce_ms = match env::var("CHATLOG_DEBOUNCE_MS") {
            Ok(val) => val.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: "CHATLOG_DEBOUNCE_MS".to_string(),
                message: format!("expected non-negative integer, got '{val}'"),
            })?,
            Err(_) => DEFAULT_DEBOUNCE_MS,
        };

        // Optional: CHATLOG_EVENT_BUFFER (default: 1000, must be > 0)
        let event_buffer = match env::var("CHATLOG_EVENT_BUFFER") {
            Ok(val) => {
                let size = val
                    .parse::<usize>()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: "CHATLOG_EVENT_BUFFER".to_string(),
                        message: format!("expected positive integer, got '{val}'"),
                    })?;
                if size == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "CHATLOG_EVENT_BUFFER".to_string(),
                        message: "buffer size must be greater than 0".to_string(),
                    });
                }
                size
            }
            Err(_) => DEFAULT_EVENT_BUFFER,
        };

        Ok(Self {
            claude_dir,
            debounce: Duration::from_millis(debounce_ms),
            event_buffer,
        })
    }

    /// Path of the history log.
    #[must_use]
    pub fn history_path(&self) -> PathBuf {
        self.claude_dir.join(HISTORY_FILE_NAME)
    }

    /// Directory holding one subdirectory per project.
    #[must_use]
    pub fn projects_dir(&self) -> PathBuf {
        self.claude_dir.join(PROJECTS_DIR_NAME)
    }
}

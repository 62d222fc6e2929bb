//! Unified error types for sketchloop.
//!
//! Model-service and code-generation faults are recovered locally and never
//! reach the caller as errors. What remains here are persistence, config and
//! device-link failures, plus the `FailOpen` helper used at every boundary
//! that must stay total.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for sketchloop operations.
#[derive(Error, Debug)]
pub enum SketchError {
    /// I/O errors from version, training or session-log files.
    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// JSON or TOML parsing/serialization errors.
    #[error("serialization error: {message}")]
    Serde { message: String },

    /// Configuration loading errors.
    #[error("config error: {message}")]
    Config { message: String },

    /// Suggestion service unreachable or returned a non-success status.
    #[error("service error: {message}")]
    Service { message: String },

    /// Device link errors (connect failure is fatal to a session).
    #[error("transport error: {message}")]
    Transport { message: String },

    /// A version slot already exists on disk.
    #[error("version {version} already exists")]
    VersionConflict { version: u64 },

    /// Controller state machine violations.
    #[error("invalid state: {message}")]
    InvalidState { message: String },
}

/// A specialized Result type for sketchloop operations.
pub type Result<T> = std::result::Result<T, SketchError>;

impl SketchError {
    /// Create a storage error from an I/O error.
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Create a serialization error.
    pub fn serde(message: impl Into<String>) -> Self {
        Self::Serde {
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a service error.
    pub fn service(message: impl Into<String>) -> Self {
        Self::Service {
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a version conflict error.
    pub fn version_conflict(version: u64) -> Self {
        Self::VersionConflict { version }
    }

    /// Create an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Whether this error ends the session.
    ///
    /// Only physical-link failures terminate the process; everything else is
    /// reported and the loop continues with the previous firmware.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl From<io::Error> for SketchError {
    fn from(err: io::Error) -> Self {
        Self::Storage {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for SketchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde {
            message: err.to_string(),
        }
    }
}

/// Trait for fail-open error handling.
///
/// Logs the error and substitutes a value instead of propagating.
pub trait FailOpen<T> {
    /// Handle an error by logging a warning and returning the default value.
    fn fail_open_default(self, context: &str) -> T
    where
        T: Default;

    /// Handle an error by logging a warning and returning the provided fallback.
    fn fail_open_with(self, context: &str, fallback: T) -> T;
}

impl<T> FailOpen<T> for Result<T> {
    fn fail_open_default(self, context: &str) -> T
    where
        T: Default,
    {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("{}: {} (fail-open: using default)", context, err);
                T::default()
            }
        }
    }

    fn fail_open_with(self, context: &str, fallback: T) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("{}: {} (fail-open: using fallback)", context, err);
                fallback
            }
        }
    }
}

/// Exit codes for the sketchloop CLI.
pub mod exit_codes {
    /// Command completed.
    pub const SUCCESS: i32 = 0;

    /// Command failed (storage, config or usage error).
    pub const ERROR: i32 = 1;

    /// The device link could not be established.
    pub const LINK_FAILURE: i32 = 2;

    /// The process panicked.
    pub const CRASH: i32 = 3;
}

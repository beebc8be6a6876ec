//! Error types and handling for the reqprof server
//!
//! Profiling failures are deliberately non-fatal: they are logged at the
//! point of failure and never propagate into the client-visible response
//! path. The types here exist so those failures carry enough context to be
//! worth logging.

use std::path::PathBuf;
use thiserror::Error;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the reqprof server
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Profiling subsystem errors
    #[error("Profiler error: {0}")]
    Profiler(#[from] ProfilerError),

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Profiling-specific errors
#[derive(Error, Debug)]
pub enum ProfilerError {
    /// The capture backend refused or failed an operation
    #[error("Backend failure: {0}")]
    Backend(String),

    /// A session label was already registered as active
    #[error("Session label already in use: {label}")]
    LabelInUse {
        /// The colliding label
        label: String,
    },

    /// An artifact could not be written to disk
    #[error("Failed to export artifact to {path:?}: {source}")]
    Export {
        /// Target file path of the failed write
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl ProfilerError {
    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

//! Error types for dmp-ap
//!
//! Failures are reported to callers as `Result`s on the control side and as
//! `PlayerEvent`s once playback is running. Nothing here crosses the render path.

use thiserror::Error;

/// Main error type for dmp-ap
#[derive(Error, Debug)]
pub enum Error {
    /// A track could not be opened (missing file, decoder rejected the format)
    #[error("Failed to open {path}: {reason}")]
    Open { path: String, reason: String },

    /// Station unreachable after every retry and negotiation
    #[error("Failed to connect to {url} after {attempts} attempts: {reason}")]
    RadioConnect {
        url: String,
        attempts: u32,
        reason: String,
    },

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// The device or driver rejected the requested sample format
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    /// HTTP transport errors
    #[error("Network error: {0}")]
    Network(String),

    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid argument to an operation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors bubbled up from dmp-common
    #[error(transparent)]
    Common(#[from] dmp_common::Error),
}

impl Error {
    /// Shorthand for an open failure on a path
    pub fn open(path: &std::path::Path, reason: impl std::fmt::Display) -> Self {
        Error::Open {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(err.to_string())
    }
}

/// Convenience Result type using dmp-ap Error
pub type Result<T> = std::result::Result<T, Error>;

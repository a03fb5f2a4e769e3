//! Error types for sht4x-core.
//!
//! # Error Recovery Strategies
//!
//! | Error Type | Strategy | Rationale |
//! |------------|----------|-----------|
//! | [`Error::DeviceOpen`] | Fatal at startup, retry with delay during recovery | Driver may be reloading |
//! | [`Error::EndOfStream`] | Close and reopen the device | Stream exhausted or device reset |
//! | [`Error::Io`] | Close and reopen the device | Read failed mid-stream |
//! | [`Error::NotOpen`] | Open the device first | Programming error or failed recovery |
//!
//! Malformed lines never surface as errors: the reader skips them and keeps
//! reading until a line matches or the stream ends.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when reading from a sensor device.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The device could not be opened.
    #[error("Cannot open device '{}': {source}", path.display())]
    DeviceOpen {
        /// Path of the device.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Read attempted while the device is closed.
    #[error("Device is not open")]
    NotOpen,

    /// The stream ended without producing a valid reading.
    #[error("No reading before end of stream on '{}'", path.display())]
    EndOfStream {
        /// Path of the device.
        path: PathBuf,
    },

    /// I/O error while reading.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a device open error.
    pub fn device_open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DeviceOpen {
            path: path.into(),
            source,
        }
    }

    /// Create an end of stream error.
    pub fn end_of_stream(path: impl Into<PathBuf>) -> Self {
        Self::EndOfStream { path: path.into() }
    }
}

/// Result type alias using sht4x-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

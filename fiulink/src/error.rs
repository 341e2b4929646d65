//! Error types for fiulink.

use std::io;
use thiserror::Error;

/// Result type for fiulink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for fiulink operations.
///
/// The first five variants are the outcomes a submitted command can resolve
/// with. Mismatching frames are dropped by the frame layer, so a command
/// normally runs into `Timeout` rather than resolving with `AckMismatch`.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport or the command layer is already occupied.
    #[error("Link busy: a command is already in flight")]
    Busy,

    /// Out-of-range channel, enumerant or an empty channel mask.
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// The transport accepted the busy check but could not start sending.
    #[error("Transport failed to send the frame")]
    SendFailed,

    /// A received frame failed header, tail, checksum or echo validation.
    #[error("Acknowledgment mismatch: {0}")]
    AckMismatch(String),

    /// No valid acknowledgment within the response window.
    #[error("Timeout: no acknowledgment after {elapsed_ms} ms")]
    Timeout {
        /// Milliseconds between arming and detection.
        elapsed_ms: u32,
    },

    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No serial port found.
    #[error("No serial port found")]
    DeviceNotFound,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

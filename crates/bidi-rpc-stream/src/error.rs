//! Error types for byte-stream transports.

use std::io;

use thiserror::Error;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for transport operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Frame exceeds the configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual size.
        size: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// Payload does not match its checksum.
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Checksum carried by the frame.
        expected: u32,
        /// Checksum of the received payload.
        actual: u32,
    },

    /// A message could not be encoded.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// A payload could not be decoded into a message.
    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    /// Session-level failure.
    #[error("Session error: {0}")]
    Session(#[from] proven_bidi_rpc::Error),
}

//! Protocol error types.

use thiserror::Error;

/// Result alias for framing operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding, decoding or transporting frames.
///
/// All variants are fatal for the connection that produced them: once a
/// length prefix cannot be trusted the byte stream cannot be resynchronised.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Buffer is shorter than the fixed length prefix.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Length prefix announces more bytes than the configured limit.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Announced payload size
        size: u64,
        /// Configured limit
        max: u64,
    },

    /// Buffer ends before the announced payload does.
    #[error("frame truncated: expected {expected} payload bytes, got {actual}")]
    FrameTruncated {
        /// Announced payload size
        expected: usize,
        /// Payload bytes available
        actual: usize,
    },

    /// Underlying stream failed (includes EOF in the middle of a frame).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

//! Server error types.

use pipehub_proto::ProtocolError;
use thiserror::Error;

/// Errors that can occur in the relay runtime.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error (unparseable bind address, bind failure).
    ///
    /// Fatal: nothing is started.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport/network error (accept failure, socket I/O).
    ///
    /// Usually scoped to one session; the relay keeps running.
    #[error("transport error: {0}")]
    Transport(String),

    /// Protocol error (oversized or truncated frame).
    ///
    /// Fatal for that session only.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Internal error (dispatch thread panicked or could not start).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

//! Client error types.

use pipehub_proto::ProtocolError;
use thiserror::Error;

/// Errors returned by [`PipelineClient`](crate::PipelineClient).
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not reach the relay.
    #[error("connection failed: {0}")]
    Connection(#[source] std::io::Error),

    /// Framing or socket failure on an established connection.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Message could not be serialized, or a received message is not JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Relay sent a frame whose payload is not UTF-8.
    #[error("relay sent a non UTF-8 payload: {0}")]
    InvalidText(#[from] std::str::Utf8Error),
}

//! Message envelope classification.
//!
//! Payloads are free-form JSON. The relay only ever looks at two fields:
//!
//! - `"type"`: what the message is (`graph`, `status`, `reset`, ...)
//! - `"uuid"`: the pipeline the message belongs to
//!
//! Everything else passes through untouched.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

/// Errors raised when a payload does not have the structure the relay routes
/// on.
#[derive(Debug, Error)]
pub enum MessageError {
    /// Payload is not JSON, or `"type"`/`"uuid"` have the wrong shape.
    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),

    /// Message type requires a `"uuid"` field and has none.
    #[error("{kind} message is missing \"uuid\"")]
    MissingUuid {
        /// Type of the offending message
        kind: MessageKind,
    },
}

/// Declared `"type"` of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Pipeline registration (carries the pipeline graph and its `uuid`)
    Graph,
    /// Block/pipeline status update
    Status,
    /// Pipeline reset
    Reset,
    /// Error raised by a pipeline block
    BlockError,
    /// Pipeline deletion
    Delete,
    /// Any other type, kept verbatim for forward compatibility
    Other(String),
}

impl MessageKind {
    /// Classify a `"type"` value.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "graph" => Self::Graph,
            "status" => Self::Status,
            "reset" => Self::Reset,
            "block_error" => Self::BlockError,
            "delete" => Self::Delete,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire name of this type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Graph => "graph",
            Self::Status => "status",
            Self::Reset => "reset",
            Self::BlockError => "block_error",
            Self::Delete => "delete",
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    uuid: Option<String>,
}

#[derive(Deserialize)]
struct RawTarget {
    uuid: String,
}

/// The routing-relevant part of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Declared message type
    pub kind: MessageKind,
    /// Pipeline identifier, if present
    pub uuid: Option<String>,
}

impl Envelope {
    /// Parse the envelope out of a JSON payload.
    ///
    /// Unknown fields are ignored. A `graph` message without `"uuid"` is
    /// rejected since it cannot register anything.
    ///
    /// # Errors
    ///
    /// - `MessageError::Json` if the payload is not a JSON object with a
    ///   string `"type"` (and, when present, a string `"uuid"`)
    /// - `MessageError::MissingUuid` for a `graph` message without `"uuid"`
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        let kind = MessageKind::parse(&raw.kind);

        if kind == MessageKind::Graph && raw.uuid.is_none() {
            return Err(MessageError::MissingUuid { kind });
        }

        Ok(Self { kind, uuid: raw.uuid })
    }
}

/// Extract the `"uuid"` an outbound event is addressed to.
///
/// # Errors
///
/// - `MessageError::Json` if the payload is not a JSON object with a string
///   `"uuid"`
pub fn route_target(text: &str) -> Result<String, MessageError> {
    let raw: RawTarget = serde_json::from_str(text)?;
    Ok(raw.uuid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_kinds_roundtrip_through_wire_names() {
        for name in ["graph", "status", "reset", "block_error", "delete"] {
            let kind = MessageKind::parse(name);
            assert!(!matches!(kind, MessageKind::Other(_)), "{name} should be recognised");
            assert_eq!(kind.as_str(), name);
        }
    }

    #[test]
    fn unknown_kind_is_kept_verbatim() {
        assert_eq!(MessageKind::parse("heartbeat"), MessageKind::Other("heartbeat".to_string()));
        assert_eq!(MessageKind::parse("heartbeat").to_string(), "heartbeat");
    }

    #[test]
    fn parse_graph_registration() {
        let env = Envelope::parse(r#"{"type":"graph","uuid":"abc","payload":{"nodes":[]}}"#)
            .unwrap();
        assert_eq!(env.kind, MessageKind::Graph);
        assert_eq!(env.uuid.as_deref(), Some("abc"));
    }

    #[test]
    fn graph_without_uuid_is_rejected() {
        let result = Envelope::parse(r#"{"type":"graph"}"#);
        assert!(matches!(result, Err(MessageError::MissingUuid { kind: MessageKind::Graph })));
    }

    #[test]
    fn status_without_uuid_is_accepted() {
        let env = Envelope::parse(r#"{"type":"status","value":1}"#).unwrap();
        assert_eq!(env.kind, MessageKind::Status);
        assert_eq!(env.uuid, None);
    }

    #[test]
    fn non_json_is_rejected() {
        assert!(matches!(Envelope::parse("hello"), Err(MessageError::Json(_))));
    }

    #[test]
    fn missing_type_is_rejected() {
        assert!(matches!(Envelope::parse(r#"{"uuid":"abc"}"#), Err(MessageError::Json(_))));
    }

    #[test]
    fn route_target_extracts_uuid() {
        let uuid = route_target(r#"{"type":"status","uuid":"abc","value":1}"#).unwrap();
        assert_eq!(uuid, "abc");
    }

    #[test]
    fn route_target_requires_string_uuid() {
        assert!(route_target(r#"{"type":"status"}"#).is_err());
        assert!(route_target(r#"{"type":"status","uuid":7}"#).is_err());
        assert!(route_target("[1,2,3]").is_err());
    }
}

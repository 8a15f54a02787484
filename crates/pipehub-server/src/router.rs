//! Message classification for both directions.
//!
//! Inbound messages come from pipelines and may be anything; the router only
//! decides whether one registers an identifier. Outbound events come from the
//! bridge and must name the pipeline they are addressed to.

use pipehub_proto::{Envelope, MessageError, MessageKind, route_target};

use crate::registry::ClientId;

/// How the driver should treat an inbound message.
///
/// Every variant is still forwarded to the notification sink unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundRoute {
    /// `graph` message: the session claims this identifier
    Register(ClientId),
    /// Well-formed message with no routing side effect
    Accept(MessageKind),
    /// Not JSON, or missing required fields; carries the reason
    Malformed(String),
}

/// Classify one inbound message.
pub fn classify_inbound(text: &str) -> InboundRoute {
    match Envelope::parse(text) {
        Ok(Envelope { kind: MessageKind::Graph, uuid: Some(uuid) }) => {
            InboundRoute::Register(ClientId::from(uuid))
        },
        Ok(envelope) => InboundRoute::Accept(envelope.kind),
        Err(err) => InboundRoute::Malformed(err.to_string()),
    }
}

/// Identifier an outbound event is addressed to.
///
/// # Errors
///
/// - `MessageError::Json` if the event is not a JSON object with a string
///   `"uuid"`
pub fn outbound_target(text: &str) -> Result<ClientId, MessageError> {
    route_target(text).map(ClientId::from)
}

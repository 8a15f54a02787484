//! Fuzz target for message classification
//!
//! Inbound messages and outbound events are attacker-controlled JSON. The
//! classifiers must reject anything malformed with an error, never a panic.
//!
//! # Invariants
//!
//! - A message classified as a registration always carries its `uuid`
//! - `outbound_target` agrees with `route_target`

#![no_main]

use libfuzzer_sys::fuzz_target;
use pipehub_proto::{Envelope, MessageKind, route_target};
use pipehub_server::{InboundRoute, classify_inbound, outbound_target};

fuzz_target!(|text: &str| {
    if let Ok(envelope) = Envelope::parse(text) {
        if envelope.kind == MessageKind::Graph {
            assert!(envelope.uuid.is_some());
        }
        assert_eq!(MessageKind::parse(envelope.kind.as_str()), envelope.kind);
    }

    if let InboundRoute::Register(client_id) = classify_inbound(text) {
        assert!(matches!(Envelope::parse(text), Ok(Envelope { uuid: Some(uuid), .. }) if uuid == client_id.as_str()));
    }

    let target = outbound_target(text).ok();
    let raw = route_target(text).ok();
    assert_eq!(target.as_ref().map(|id| id.as_str()), raw.as_deref());
});

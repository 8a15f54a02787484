//! Fuzz target for RelayDriver event sequences
//!
//! # Strategy
//!
//! - Arbitrary interleavings of accepts, inbound messages, pushed events,
//!   writable notifications and disconnects
//! - Inbound text and pushed payloads are either well-formed registrations
//!   and status events or raw fuzz bytes
//! - Events for handles the driver has never seen
//!
//! # Invariants
//!
//! - An outbound buffer exists iff a live session holds its identifier
//! - Events are only sent to the session holding their `uuid`
//! - Unknown handles produce an error, never a panic
//! - Shutdown leaves no sessions and no buffers

#![no_main]

use std::net::SocketAddr;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pipehub_proto::route_target;
use pipehub_server::{ClientId, RelayAction, RelayDriver, RelayEvent, SessionId};

const UUIDS: [&str; 4] = ["a", "b", "c", "d"];

#[derive(Debug, Clone, Arbitrary)]
enum Step {
    Accept,
    Register { session: u8, uuid: u8 },
    Inbound { session: u8, text: String },
    Push { uuid: u8 },
    PushRaw { text: String },
    Write { session: u8 },
    Close { session: u8 },
}

fuzz_target!(|steps: Vec<Step>| {
    let mut driver = RelayDriver::default();
    let mut next_session = 0u64;
    let peer = SocketAddr::from(([127, 0, 0, 1], 9000));

    for step in steps {
        let event = match step {
            Step::Accept => {
                next_session += 1;
                RelayEvent::ConnectionAccepted { session_id: SessionId::new(next_session), peer }
            }
            Step::Register { session, uuid } => RelayEvent::MessageReceived {
                session_id: SessionId::new(u64::from(session % 8)),
                text: format!(r#"{{"type":"graph","uuid":"{}"}}"#, UUIDS[uuid as usize % UUIDS.len()]),
            },
            Step::Inbound { session, text } => RelayEvent::MessageReceived {
                session_id: SessionId::new(u64::from(session % 8)),
                text,
            },
            Step::Push { uuid } => RelayEvent::EventsDrained {
                payloads: vec![format!(
                    r#"{{"type":"status","uuid":"{}"}}"#,
                    UUIDS[uuid as usize % UUIDS.len()]
                )],
            },
            Step::PushRaw { text } => RelayEvent::EventsDrained { payloads: vec![text] },
            Step::Write { session } => {
                RelayEvent::WriteReady { session_id: SessionId::new(u64::from(session % 8)) }
            }
            Step::Close { session } => RelayEvent::ConnectionClosed {
                session_id: SessionId::new(u64::from(session % 8)),
                reason: "fuzz".to_string(),
            },
        };

        let Ok(actions) = driver.process_event(event) else {
            continue;
        };

        for action in &actions {
            if let RelayAction::SendToSession { session_id, payloads } = action {
                let holder = driver.session(*session_id).and_then(|s| s.client_id().cloned());
                for payload in payloads {
                    let target = route_target(payload).ok().map(ClientId::from);
                    assert_eq!(target, holder);
                }
            }
        }

        for uuid in UUIDS {
            let client_id = ClientId::from(uuid);
            assert_eq!(
                driver.has_buffer(&client_id),
                driver.session_for_client(&client_id).is_some()
            );
        }
    }

    let _ = driver.process_event(RelayEvent::Shutdown);
    assert_eq!(driver.session_count(), 0);
    assert_eq!(driver.buffer_count(), 0);
});

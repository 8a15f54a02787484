//! Relay driver.
//!
//! Ties together the SessionRegistry (handle → identity), the outbound buffer
//! table and the message router. The driver never touches a socket: the
//! runtime feeds it [`RelayEvent`]s in tick order and executes the
//! [`RelayAction`]s it returns.

use std::net::SocketAddr;

use crate::{
    notify::Notification,
    outbound::OutboundBuffers,
    registry::{ClientId, Identification, Session, SessionId, SessionRegistry},
    router::{InboundRoute, classify_inbound, outbound_target},
    server_error::DriverError,
};

/// Event name used for forwarded inbound messages unless configured otherwise.
pub const DEFAULT_EVENT_NAME: &str = "pipeline-update";

/// Driver configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Event name passed to the notification sink
    pub event_name: String,
    /// Broadcast flag passed to the notification sink
    pub broadcast: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { event_name: DEFAULT_EVENT_NAME.to_string(), broadcast: true }
    }
}

/// Events that the relay driver processes.
///
/// Produced by the dispatch loop in per-tick phase order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Start of a dispatch tick
    Tick,

    /// A new connection was accepted
    ConnectionAccepted {
        /// Handle assigned by the runtime
        session_id: SessionId,
        /// Remote address
        peer: SocketAddr,
    },

    /// A complete frame was read from a session
    MessageReceived {
        /// Session that sent the message
        session_id: SessionId,
        /// Decoded text (trailing whitespace stripped, possibly empty)
        text: String,
    },

    /// A connection was closed (by peer or error)
    ConnectionClosed {
        /// Connection that was closed
        session_id: SessionId,
        /// Reason for closure
        reason: String,
    },

    /// Snapshot of the pending event queue, in push order
    EventsDrained {
        /// Raw outbound payloads
        payloads: Vec<String>,
    },

    /// A session socket is writable
    WriteReady {
        /// Writable session
        session_id: SessionId,
    },

    /// The relay is stopping; every session must be closed
    Shutdown,
}

/// Actions that the relay driver produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// Hand a message to the notification sink
    Notify(Notification),

    /// Write frames to a session, in order
    SendToSession {
        /// Target session
        session_id: SessionId,
        /// Payloads, one frame each
        payloads: Vec<String>,
    },

    /// Release a session socket
    CloseConnection {
        /// Session to close
        session_id: SessionId,
        /// Reason for closure
        reason: String,
    },

    /// Log a message (for debugging/monitoring)
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
    },
}

/// Log levels for relay actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

/// Counters maintained by the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Dispatch ticks started
    pub ticks: u64,
    /// Connections accepted
    pub sessions_accepted: u64,
    /// Connections closed, for any reason
    pub sessions_closed: u64,
    /// Successful `graph` registrations
    pub sessions_registered: u64,
    /// Inbound messages handed to the notification sink
    pub messages_forwarded: u64,
    /// Inbound messages that failed classification (still forwarded)
    pub messages_malformed: u64,
    /// Outbound events appended to a buffer
    pub events_routed: u64,
    /// Outbound events discarded (unknown identifier or unparseable)
    pub events_dropped: u64,
    /// Frames handed to the runtime for writing
    pub frames_dispatched: u64,
    /// Sessions currently live
    pub live_sessions: u64,
}

/// Action-based relay driver.
///
/// Owns all routing state. Only the dispatch loop calls into it, so none of
/// it is synchronized.
#[derive(Debug, Default)]
pub struct RelayDriver {
    registry: SessionRegistry,
    buffers: OutboundBuffers,
    config: DriverConfig,
    stats: RelayStats,
}

impl RelayDriver {
    /// Create a new driver.
    pub fn new(config: DriverConfig) -> Self {
        Self {
            registry: SessionRegistry::new(),
            buffers: OutboundBuffers::new(),
            config,
            stats: RelayStats::default(),
        }
    }

    /// Process a relay event and return actions to execute.
    ///
    /// # Errors
    ///
    /// - `DriverError::SessionAlreadyExists` for an accept on a live handle
    /// - `DriverError::SessionNotFound` for activity on an unknown handle
    pub fn process_event(&mut self, event: RelayEvent) -> Result<Vec<RelayAction>, DriverError> {
        let result = match event {
            RelayEvent::Tick => {
                self.stats.ticks += 1;
                Ok(Vec::new())
            },
            RelayEvent::ConnectionAccepted { session_id, peer } => {
                self.handle_connection_accepted(session_id, peer)
            },
            RelayEvent::MessageReceived { session_id, text } => {
                self.handle_message_received(session_id, text)
            },
            RelayEvent::ConnectionClosed { session_id, reason } => {
                self.handle_connection_closed(session_id, reason)
            },
            RelayEvent::EventsDrained { payloads } => Ok(self.handle_events_drained(payloads)),
            RelayEvent::WriteReady { session_id } => self.handle_write_ready(session_id),
            RelayEvent::Shutdown => Ok(self.handle_shutdown()),
        };

        self.stats.live_sessions = self.registry.len() as u64;
        result
    }

    fn handle_connection_accepted(
        &mut self,
        session_id: SessionId,
        peer: SocketAddr,
    ) -> Result<Vec<RelayAction>, DriverError> {
        if !self.registry.add(session_id, peer) {
            return Err(DriverError::SessionAlreadyExists(session_id));
        }

        self.stats.sessions_accepted += 1;

        Ok(vec![RelayAction::Log {
            level: LogLevel::Info,
            message: format!("session {session_id} connected from {peer}"),
        }])
    }

    fn handle_message_received(
        &mut self,
        session_id: SessionId,
        text: String,
    ) -> Result<Vec<RelayAction>, DriverError> {
        if !self.registry.contains(session_id) {
            return Err(DriverError::SessionNotFound(session_id));
        }

        if text.is_empty() {
            return Ok(vec![RelayAction::Log {
                level: LogLevel::Debug,
                message: format!("session {session_id} sent an empty message, ignored"),
            }]);
        }

        let mut actions = Vec::new();

        match classify_inbound(&text) {
            InboundRoute::Register(client_id) => {
                actions.extend(self.register(session_id, client_id)?);
            },
            InboundRoute::Accept(kind) => {
                actions.push(RelayAction::Log {
                    level: LogLevel::Debug,
                    message: format!("session {session_id} sent {kind} message"),
                });
            },
            InboundRoute::Malformed(reason) => {
                self.stats.messages_malformed += 1;
                actions.push(RelayAction::Log {
                    level: LogLevel::Warn,
                    message: format!("malformed message from session {session_id}: {reason}"),
                });
            },
        }

        self.stats.messages_forwarded += 1;
        actions.push(RelayAction::Notify(Notification {
            event: self.config.event_name.clone(),
            payload: text,
            broadcast: self.config.broadcast,
        }));

        Ok(actions)
    }

    /// Assign `client_id` to a session and give it a fresh buffer.
    fn register(
        &mut self,
        session_id: SessionId,
        client_id: ClientId,
    ) -> Result<Vec<RelayAction>, DriverError> {
        let Identification { previous, displaced } = self
            .registry
            .identify(session_id, client_id.clone())
            .ok_or(DriverError::SessionNotFound(session_id))?;

        let mut actions = Vec::new();

        if let Some(previous) = previous.filter(|prev| *prev != client_id) {
            let discarded = self.buffers.remove(&previous).map_or(0, |pending| pending.len());
            actions.push(RelayAction::Log {
                level: LogLevel::Info,
                message: format!(
                    "session {session_id} re-registered: {previous} -> {client_id}, \
                     {discarded} pending event(s) discarded"
                ),
            });
        }

        if let Some(displaced) = displaced {
            actions.push(RelayAction::Log {
                level: LogLevel::Warn,
                message: format!(
                    "pipeline {client_id} moved from session {displaced} to session {session_id}"
                ),
            });
        }

        let discarded = self.buffers.create(client_id.clone());
        if discarded > 0 {
            actions.push(RelayAction::Log {
                level: LogLevel::Info,
                message: format!(
                    "buffer for {client_id} reset, {discarded} pending event(s) discarded"
                ),
            });
        }

        self.stats.sessions_registered += 1;
        actions.push(RelayAction::Log {
            level: LogLevel::Info,
            message: format!("session {session_id} registered as {client_id}"),
        });

        Ok(actions)
    }

    fn handle_connection_closed(
        &mut self,
        session_id: SessionId,
        reason: String,
    ) -> Result<Vec<RelayAction>, DriverError> {
        let session =
            self.registry.remove(session_id).ok_or(DriverError::SessionNotFound(session_id))?;

        Ok(self.release(session_id, &session, reason))
    }

    /// Drop the buffer a removed session held and close its socket.
    fn release(
        &mut self,
        session_id: SessionId,
        session: &Session,
        reason: String,
    ) -> Vec<RelayAction> {
        self.stats.sessions_closed += 1;

        let mut actions = Vec::new();

        if let Some(client_id) = session.client_id() {
            if let Some(pending) = self.buffers.remove(client_id) {
                if !pending.is_empty() {
                    actions.push(RelayAction::Log {
                        level: LogLevel::Debug,
                        message: format!(
                            "discarding {} undelivered event(s) for {client_id}",
                            pending.len()
                        ),
                    });
                }
            }
        }

        actions.push(RelayAction::Log {
            level: LogLevel::Info,
            message: format!("session {session_id} [{session}] closed: {reason}"),
        });
        actions.push(RelayAction::CloseConnection { session_id, reason });

        actions
    }

    fn handle_events_drained(&mut self, payloads: Vec<String>) -> Vec<RelayAction> {
        let mut actions = Vec::new();

        for payload in payloads {
            let client_id = match outbound_target(&payload) {
                Ok(client_id) => client_id,
                Err(e) => {
                    self.stats.events_dropped += 1;
                    actions.push(RelayAction::Log {
                        level: LogLevel::Warn,
                        message: format!("dropping unroutable event: {e}"),
                    });
                    continue;
                },
            };

            if self.buffers.enqueue(&client_id, payload) {
                self.stats.events_routed += 1;
            } else {
                self.stats.events_dropped += 1;
                actions.push(RelayAction::Log {
                    level: LogLevel::Info,
                    message: format!("dropping event for unknown pipeline {client_id}"),
                });
            }
        }

        actions
    }

    fn handle_write_ready(&mut self, session_id: SessionId) -> Result<Vec<RelayAction>, DriverError> {
        let session =
            self.registry.lookup(session_id).ok_or(DriverError::SessionNotFound(session_id))?;

        let Some(client_id) = session.client_id() else {
            return Ok(Vec::new());
        };

        let payloads = self.buffers.drain(client_id);
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        self.stats.frames_dispatched += payloads.len() as u64;
        Ok(vec![RelayAction::SendToSession { session_id, payloads }])
    }

    fn handle_shutdown(&mut self) -> Vec<RelayAction> {
        let ids: Vec<SessionId> = self.registry.session_ids().collect();
        let mut actions = Vec::new();

        for session_id in ids {
            if let Some(session) = self.registry.remove(session_id) {
                actions.extend(self.release(session_id, &session, "relay shutting down".to_string()));
            }
        }

        actions
    }

    /// Whether the runtime should wait for `session_id` to become writable.
    pub fn wants_write(&self, session_id: SessionId) -> bool {
        self.registry
            .lookup(session_id)
            .and_then(Session::client_id)
            .is_some_and(|client_id| self.buffers.has_pending(client_id))
    }

    /// Session metadata.
    pub fn session(&self, session_id: SessionId) -> Option<&Session> {
        self.registry.lookup(session_id)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Session currently holding `client_id`.
    pub fn session_for_client(&self, client_id: &ClientId) -> Option<SessionId> {
        self.registry.session_for_client(client_id)
    }

    /// Whether an outbound buffer exists for `client_id`.
    pub fn has_buffer(&self, client_id: &ClientId) -> bool {
        self.buffers.contains(client_id)
    }

    /// Number of buffered events for `client_id`.
    pub fn pending_for(&self, client_id: &ClientId) -> usize {
        self.buffers.len_of(client_id)
    }

    /// Number of outbound buffers.
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Current counters.
    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40_000))
    }

    fn accept(driver: &mut RelayDriver, raw: u64) -> SessionId {
        let session_id = SessionId::new(raw);
        driver.process_event(RelayEvent::ConnectionAccepted { session_id, peer: peer() }).unwrap();
        session_id
    }

    fn receive(driver: &mut RelayDriver, session_id: SessionId, text: &str) -> Vec<RelayAction> {
        driver
            .process_event(RelayEvent::MessageReceived { session_id, text: text.to_string() })
            .unwrap()
    }

    fn push(driver: &mut RelayDriver, payloads: &[&str]) -> Vec<RelayAction> {
        let payloads = payloads.iter().map(ToString::to_string).collect();
        driver.process_event(RelayEvent::EventsDrained { payloads }).unwrap()
    }

    fn notifications(actions: &[RelayAction]) -> Vec<&Notification> {
        actions
            .iter()
            .filter_map(|a| match a {
                RelayAction::Notify(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn graph_registers_and_creates_buffer() {
        let mut driver = RelayDriver::default();
        let s = accept(&mut driver, 1);

        let actions = receive(&mut driver, s, r#"{"type":"graph","uuid":"abc"}"#);

        let abc = ClientId::from("abc");
        assert_eq!(driver.session(s).unwrap().client_id(), Some(&abc));
        assert!(driver.has_buffer(&abc));
        assert_eq!(driver.pending_for(&abc), 0);
        assert_eq!(notifications(&actions).len(), 1);
        assert_eq!(driver.stats().sessions_registered, 1);
    }

    #[test]
    fn pushed_event_is_buffered_then_sent() {
        let mut driver = RelayDriver::new(DriverConfig::default());
        let s = accept(&mut driver, 1);
        receive(&mut driver, s, r#"{"type":"graph","uuid":"abc"}"#);

        push(&mut driver, &[r#"{"type":"status","uuid":"abc","value":1}"#]);
        assert_eq!(driver.pending_for(&ClientId::from("abc")), 1);
        assert!(driver.wants_write(s));

        let actions = driver.process_event(RelayEvent::WriteReady { session_id: s }).unwrap();
        assert_eq!(actions, vec![RelayAction::SendToSession {
            session_id: s,
            payloads: vec![r#"{"type":"status","uuid":"abc","value":1}"#.to_string()],
        }]);
        assert_eq!(driver.pending_for(&ClientId::from("abc")), 0);
        assert!(!driver.wants_write(s));
    }

    #[test]
    fn event_for_unknown_pipeline_is_dropped() {
        let mut driver = RelayDriver::default();
        push(&mut driver, &[r#"{"type":"status","uuid":"zzz"}"#]);

        assert!(!driver.has_buffer(&ClientId::from("zzz")));
        assert_eq!(driver.buffer_count(), 0);
        assert_eq!(driver.stats().events_dropped, 1);
    }

    #[test]
    fn unparseable_event_is_dropped() {
        let mut driver = RelayDriver::default();
        let actions = push(&mut driver, &["not json", r#"{"type":"status"}"#]);

        assert_eq!(driver.stats().events_dropped, 2);
        assert!(actions.iter().all(|a| matches!(a, RelayAction::Log { level: LogLevel::Warn, .. })));
    }

    #[test]
    fn disconnect_removes_session_and_buffer() {
        let mut driver = RelayDriver::default();
        let s = accept(&mut driver, 1);
        receive(&mut driver, s, r#"{"type":"graph","uuid":"abc"}"#);
        push(&mut driver, &[r#"{"type":"status","uuid":"abc"}"#]);

        let actions = driver
            .process_event(RelayEvent::ConnectionClosed {
                session_id: s,
                reason: "peer closed".to_string(),
            })
            .unwrap();

        assert!(actions.contains(&RelayAction::CloseConnection {
            session_id: s,
            reason: "peer closed".to_string()
        }));
        assert!(driver.session(s).is_none());
        assert!(!driver.has_buffer(&ClientId::from("abc")));

        push(&mut driver, &[r#"{"type":"status","uuid":"abc"}"#]);
        assert_eq!(driver.stats().events_dropped, 1);

        let err = driver.process_event(RelayEvent::WriteReady { session_id: s }).unwrap_err();
        assert_eq!(err, DriverError::SessionNotFound(s));
    }

    #[test]
    fn malformed_message_is_forwarded_unchanged() {
        let mut driver = RelayDriver::default();
        let s = accept(&mut driver, 1);

        let actions = receive(&mut driver, s, "hello");

        let forwarded = notifications(&actions);
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].payload, "hello");
        assert_eq!(forwarded[0].event, DEFAULT_EVENT_NAME);
        assert!(forwarded[0].broadcast);
        assert!(driver.session(s).is_some());
        assert_eq!(driver.stats().messages_malformed, 1);
    }

    #[test]
    fn empty_message_is_ignored() {
        let mut driver = RelayDriver::default();
        let s = accept(&mut driver, 1);

        let actions = receive(&mut driver, s, "");
        assert!(notifications(&actions).is_empty());
        assert_eq!(driver.stats().messages_forwarded, 0);
    }

    #[test]
    fn reregistration_releases_old_buffer() {
        let mut driver = RelayDriver::default();
        let s = accept(&mut driver, 1);
        receive(&mut driver, s, r#"{"type":"graph","uuid":"old"}"#);
        push(&mut driver, &[r#"{"type":"status","uuid":"old"}"#]);

        receive(&mut driver, s, r#"{"type":"graph","uuid":"new"}"#);

        assert!(!driver.has_buffer(&ClientId::from("old")));
        assert!(driver.has_buffer(&ClientId::from("new")));
        assert_eq!(driver.buffer_count(), 1);
    }

    #[test]
    fn same_identifier_again_resets_buffer() {
        let mut driver = RelayDriver::default();
        let s = accept(&mut driver, 1);
        receive(&mut driver, s, r#"{"type":"graph","uuid":"abc"}"#);
        push(&mut driver, &[r#"{"type":"status","uuid":"abc"}"#]);

        receive(&mut driver, s, r#"{"type":"graph","uuid":"abc"}"#);

        assert!(driver.has_buffer(&ClientId::from("abc")));
        assert_eq!(driver.pending_for(&ClientId::from("abc")), 0);
    }

    #[test]
    fn claiming_held_identifier_displaces_holder() {
        let mut driver = RelayDriver::default();
        let first = accept(&mut driver, 1);
        let second = accept(&mut driver, 2);
        receive(&mut driver, first, r#"{"type":"graph","uuid":"abc"}"#);
        receive(&mut driver, second, r#"{"type":"graph","uuid":"abc"}"#);

        let abc = ClientId::from("abc");
        assert_eq!(driver.session_for_client(&abc), Some(second));
        assert!(!driver.session(first).unwrap().is_identified());

        // Displaced session leaving must not take the new holder's buffer.
        driver
            .process_event(RelayEvent::ConnectionClosed {
                session_id: first,
                reason: "peer closed".to_string(),
            })
            .unwrap();
        assert!(driver.has_buffer(&abc));
    }

    #[test]
    fn shutdown_closes_every_session() {
        let mut driver = RelayDriver::default();
        let a = accept(&mut driver, 1);
        let b = accept(&mut driver, 2);
        receive(&mut driver, a, r#"{"type":"graph","uuid":"abc"}"#);

        let actions = driver.process_event(RelayEvent::Shutdown).unwrap();

        let closed: Vec<SessionId> = actions
            .iter()
            .filter_map(|a| match a {
                RelayAction::CloseConnection { session_id, .. } => Some(*session_id),
                _ => None,
            })
            .collect();
        assert_eq!(closed, vec![a, b]);
        assert_eq!(driver.session_count(), 0);
        assert_eq!(driver.buffer_count(), 0);
        assert_eq!(driver.stats().live_sessions, 0);
        assert_eq!(driver.stats().sessions_closed, 2);
    }

    #[test]
    fn duplicate_accept_is_an_error() {
        let mut driver = RelayDriver::default();
        let s = accept(&mut driver, 1);
        let err = driver
            .process_event(RelayEvent::ConnectionAccepted { session_id: s, peer: peer() })
            .unwrap_err();
        assert_eq!(err, DriverError::SessionAlreadyExists(s));
    }

    #[test]
    fn unidentified_session_never_wants_write() {
        let mut driver = RelayDriver::default();
        let s = accept(&mut driver, 1);
        assert!(!driver.wants_write(s));
        assert!(driver.process_event(RelayEvent::WriteReady { session_id: s }).unwrap().is_empty());
    }
}

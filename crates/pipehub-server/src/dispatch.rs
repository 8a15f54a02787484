//! Dispatch loop.
//!
//! Runs on the relay's dedicated thread and owns every socket. Each tick
//! executes the same phases in the same order:
//!
//! 1. readiness wait (bounded by the tick interval)
//! 2. accept
//! 3. inbound reads
//! 4. pending event drain
//! 5. outbound writes
//!
//! Outbound delivery depends on this order: an event drained in phase 4 is
//! written in phase 5 of the same or the following tick, never before its
//! session was registered in phase 3.

use std::{collections::BTreeMap, io, net::SocketAddr, sync::Arc, time::Duration};

use pipehub_proto::{FrameHeader, ProtocolError, ReadOutcome, read_frame, write_frame};
use tokio::{
    io::AsyncReadExt,
    net::{TcpListener, TcpStream},
    sync::watch,
};
use tokio_util::sync::CancellationToken;

use crate::{
    driver::{LogLevel, RelayAction, RelayDriver, RelayEvent, RelayStats},
    notify::NotificationSink,
    queue::EventQueue,
    registry::{Handle, SessionId},
    transport::{Readiness, wait_ready},
};

/// Loop-owned state. Nothing here is shared except the event queue.
pub(crate) struct Dispatcher<S> {
    pub driver: RelayDriver,
    pub listener: TcpListener,
    pub connections: BTreeMap<SessionId, TcpStream>,
    pub sink: S,
    pub queue: Arc<EventQueue>,
    pub stats_tx: watch::Sender<RelayStats>,
    pub tick_interval: Duration,
    pub max_frame_size: u64,
    pub next_session: u64,
    pub pending_sends: Vec<(SessionId, Vec<String>)>,
}

impl<S: NotificationSink> Dispatcher<S> {
    /// Run ticks until `token` is cancelled, then close every socket.
    pub async fn run(mut self, token: CancellationToken) {
        tracing::debug!("dispatch loop started");

        while !token.is_cancelled() {
            self.tick(&token).await;
            self.stats_tx.send_replace(*self.driver.stats());
        }

        self.dispatch(RelayEvent::Shutdown);
        self.connections.clear();
        self.stats_tx.send_replace(*self.driver.stats());

        tracing::info!("relay stopped");
    }

    async fn tick(&mut self, token: &CancellationToken) {
        self.dispatch(RelayEvent::Tick);

        let driver = &self.driver;
        let readiness = tokio::select! {
            biased;
            () = token.cancelled() => return,
            ready = wait_ready(&self.listener, &self.connections, |id| driver.wants_write(id)) => ready,
            () = self.queue.notified() => Readiness::default(),
            () = tokio::time::sleep(self.tick_interval) => Readiness::default(),
        };

        let Readiness { accepted, readable, writable } = readiness;

        if let Some(accepted) = accepted {
            self.accept(accepted);
        }

        for handle in readable {
            if let Handle::Session(session_id) = handle {
                self.read_session(session_id).await;
            }
        }

        let payloads = self.queue.drain();
        if !payloads.is_empty() {
            self.dispatch(RelayEvent::EventsDrained { payloads });
        }

        for session_id in writable {
            // Closed earlier in this tick.
            if self.connections.contains_key(&session_id) {
                self.dispatch(RelayEvent::WriteReady { session_id });
            }
        }
        self.flush().await;
    }

    fn accept(&mut self, accepted: io::Result<(TcpStream, SocketAddr)>) {
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("accept failed: {e}");
                return;
            },
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, "failed to set TCP_NODELAY: {e}");
        }

        let session_id = SessionId::new(self.next_session);
        self.next_session += 1;

        self.connections.insert(session_id, stream);
        self.dispatch(RelayEvent::ConnectionAccepted { session_id, peer });
    }

    async fn read_session(&mut self, session_id: SessionId) {
        let outcome = match self.read_one(session_id).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => return,
            Err(e) => {
                self.dispatch(RelayEvent::ConnectionClosed { session_id, reason: e.to_string() });
                return;
            },
        };

        let event = match outcome {
            ReadOutcome::Message(text) => RelayEvent::MessageReceived { session_id, text },
            ReadOutcome::Malformed { payload, error } => {
                tracing::warn!(%session_id, "message is not valid UTF-8: {error}");
                let text = String::from_utf8_lossy(&payload).trim_end().to_string();
                RelayEvent::MessageReceived { session_id, text }
            },
            ReadOutcome::PeerClosed => {
                RelayEvent::ConnectionClosed { session_id, reason: "peer closed".to_string() }
            },
        };

        self.dispatch(event);
    }

    /// Read one frame from a session that polled readable.
    ///
    /// Returns `Ok(None)` if the readiness was spurious. Once the first byte
    /// arrives the whole frame is read before returning, and every other
    /// session waits until the peer sends the rest or disconnects.
    async fn read_one(
        &mut self,
        session_id: SessionId,
    ) -> Result<Option<ReadOutcome>, ProtocolError> {
        let Some(stream) = self.connections.get_mut(&session_id) else {
            return Ok(None);
        };

        let mut prefix = [0u8; FrameHeader::SIZE];
        let n = match stream.try_read(&mut prefix) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if n == 0 {
            return Ok(Some(ReadOutcome::PeerClosed));
        }

        let mut reader = (&prefix[..n]).chain(&mut *stream);
        read_frame(&mut reader, self.max_frame_size).await.map(Some)
    }

    /// Feed one event to the driver and execute the resulting actions.
    fn dispatch(&mut self, event: RelayEvent) {
        match self.driver.process_event(event) {
            Ok(actions) => self.apply(actions),
            Err(e) => tracing::error!("driver rejected event: {e}"),
        }
    }

    fn apply(&mut self, actions: Vec<RelayAction>) {
        for action in actions {
            match action {
                RelayAction::Notify(notification) => {
                    self.sink.notify(
                        &notification.event,
                        &notification.payload,
                        notification.broadcast,
                    );
                },
                RelayAction::SendToSession { session_id, payloads } => {
                    self.pending_sends.push((session_id, payloads));
                },
                RelayAction::CloseConnection { session_id, .. } => {
                    // Dropping the stream closes the socket.
                    self.connections.remove(&session_id);
                },
                RelayAction::Log { level, message } => match level {
                    LogLevel::Debug => tracing::debug!("{message}"),
                    LogLevel::Info => tracing::info!("{message}"),
                    LogLevel::Warn => tracing::warn!("{message}"),
                    LogLevel::Error => tracing::error!("{message}"),
                },
            }
        }
    }

    /// Write every queued send. A failed write closes that session only.
    async fn flush(&mut self) {
        for (session_id, payloads) in std::mem::take(&mut self.pending_sends) {
            if let Err(e) = self.send(session_id, &payloads).await {
                self.dispatch(RelayEvent::ConnectionClosed {
                    session_id,
                    reason: format!("write failed: {e}"),
                });
            }
        }
    }

    async fn send(&mut self, session_id: SessionId, payloads: &[String]) -> Result<(), ProtocolError> {
        let Some(stream) = self.connections.get_mut(&session_id) else {
            return Ok(());
        };

        for payload in payloads {
            write_frame(stream, payload).await?;
        }

        tracing::debug!(%session_id, frames = payloads.len(), "flushed outbound buffer");
        Ok(())
    }
}

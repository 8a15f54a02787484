//! Notification sinks.
//!
//! Every successfully read inbound message is handed to a [`NotificationSink`]
//! on the dispatch thread, in read order. Sinks must not block for long: the
//! whole relay waits while one runs.

use std::io::Write;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

/// One forwarded inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Event name (`pipeline-update` by default)
    pub event: String,
    /// Message text exactly as received (trailing whitespace stripped)
    pub payload: String,
    /// Whether the bridge should fan the event out to every subscriber
    pub broadcast: bool,
}

/// Receiver of forwarded inbound messages.
///
/// Implemented for any `FnMut(&str, &str, bool)` closure.
pub trait NotificationSink: Send + 'static {
    /// Handle one notification.
    fn notify(&mut self, event: &str, payload: &str, broadcast: bool);
}

impl<F> NotificationSink for F
where
    F: FnMut(&str, &str, bool) + Send + 'static,
{
    fn notify(&mut self, event: &str, payload: &str, broadcast: bool) {
        self(event, payload, broadcast);
    }
}

/// Sink that only logs notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&mut self, event: &str, payload: &str, broadcast: bool) {
        tracing::info!(event, broadcast, bytes = payload.len(), "notification: {payload}");
    }
}

/// Fan-out sink backed by a `tokio::sync::broadcast` channel.
///
/// Subscribers that fall behind lose the oldest notifications; having no
/// subscribers at all is fine.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastSink {
    /// Create a sink retaining up to `capacity` undelivered notifications per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// New subscriber receiving every notification sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl NotificationSink for BroadcastSink {
    fn notify(&mut self, event: &str, payload: &str, broadcast: bool) {
        let notification =
            Notification { event: event.to_string(), payload: payload.to_string(), broadcast };
        // Err only means nobody is subscribed right now.
        let _ = self.sender.send(notification);
    }
}

/// Sink forwarding notifications into an unbounded channel.
///
/// Handy for embedding the relay in async code and for tests.
#[derive(Debug)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&mut self, event: &str, payload: &str, broadcast: bool) {
        let notification =
            Notification { event: event.to_string(), payload: payload.to_string(), broadcast };
        if self.sender.send(notification).is_err() {
            tracing::debug!(event, "notification receiver dropped");
        }
    }
}

/// Sink writing one JSON object per line to a writer.
///
/// Each line has the shape `{"event":..,"payload":..,"broadcast":..}`.
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    writer: W,
}

impl<W: Write + Send + 'static> JsonLinesSink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line(&mut self, notification: &Notification) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, notification)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

impl<W: Write + Send + 'static> NotificationSink for JsonLinesSink<W> {
    fn notify(&mut self, event: &str, payload: &str, broadcast: bool) {
        let notification =
            Notification { event: event.to_string(), payload: payload.to_string(), broadcast };
        if let Err(e) = self.write_line(&notification) {
            tracing::warn!(event, "failed to write notification: {e}");
        }
    }
}

//! pipehub relay server.
//!
//! Accepts TCP connections from pipeline clients, forwards every message they
//! send to a [`NotificationSink`], and delivers events pushed by the bridge to
//! the pipeline they are addressed to.
//!
//! # Architecture
//!
//! The routing logic lives in [`RelayDriver`], which follows the Sans-IO
//! pattern: it consumes [`RelayEvent`]s and returns [`RelayAction`]s without
//! touching a socket. [`RelayHandle::start`] binds the listener and spawns a
//! dedicated thread running a current-thread Tokio runtime that owns the
//! driver, every socket and the sink.
//!
//! The only ways in from other threads are [`RelayHandle::push`] (or a cloned
//! [`EventPusher`]) and cancellation through [`RelayHandle::stop`].
//!
//! # Components
//!
//! - [`RelayDriver`]: registration, buffering and routing (pure logic, no I/O)
//! - [`SessionRegistry`]: live sessions and their pipeline identifiers
//! - [`OutboundBuffers`]: per-pipeline FIFOs awaiting a writable socket
//! - [`EventQueue`]: thread-safe ingress for pushed events
//! - [`NotificationSink`]: receiver of forwarded inbound messages
//!
//! # Example
//!
//! ```no_run
//! use pipehub_server::{RelayConfig, RelayHandle, TracingSink};
//!
//! let relay = RelayHandle::start(RelayConfig::new("127.0.0.1", 9000), TracingSink)?;
//! relay.push(r#"{"type":"status","uuid":"abc","value":1}"#);
//! relay.stop()?;
//! # Ok::<(), pipehub_server::ServerError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod dispatch;
mod driver;
mod error;
mod notify;
mod outbound;
mod queue;
mod registry;
mod router;
mod server_error;
mod transport;

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

pub use driver::{
    DEFAULT_EVENT_NAME, DriverConfig, LogLevel, RelayAction, RelayDriver, RelayEvent, RelayStats,
};
pub use error::ServerError;
pub use notify::{
    BroadcastSink, ChannelSink, JsonLinesSink, Notification, NotificationSink, TracingSink,
};
pub use outbound::OutboundBuffers;
use pipehub_proto::FrameHeader;
pub use queue::{EventPusher, EventQueue};
pub use registry::{ClientId, Handle, Identification, Session, SessionId, SessionRegistry};
pub use router::{InboundRoute, classify_inbound, outbound_target};
pub use server_error::DriverError;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;

/// Port the relay listens on by default.
pub const DEFAULT_PORT: u16 = 9000;

/// Interface the relay listens on by default.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default upper bound on one dispatch tick's readiness wait.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Relay configuration for the production runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Address to bind to (e.g., "0.0.0.0:9000"); port 0 picks a free port
    pub bind_address: String,
    /// Longest a tick waits for readiness before running the drain phase
    pub tick_interval: Duration,
    /// Largest accepted frame payload in bytes
    pub max_frame_size: u64,
    /// Driver configuration (event name, broadcast flag)
    pub driver: DriverConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl RelayConfig {
    /// Configuration listening on `host:port` with default settings.
    ///
    /// IPv6 literals are bracketed automatically.
    pub fn new(host: &str, port: u16) -> Self {
        let bind_address = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };

        Self {
            bind_address,
            tick_interval: DEFAULT_TICK_INTERVAL,
            max_frame_size: FrameHeader::DEFAULT_MAX_PAYLOAD_SIZE,
            driver: DriverConfig::default(),
        }
    }

    /// Set the readiness wait bound.
    #[must_use]
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    /// Set the largest accepted frame payload.
    #[must_use]
    pub fn with_max_frame_size(mut self, max_frame_size: u64) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Set the event name passed to the notification sink.
    #[must_use]
    pub fn with_event_name(mut self, event_name: impl Into<String>) -> Self {
        self.driver.event_name = event_name.into();
        self
    }
}

/// Handle to a running relay.
///
/// Dropping the handle stops the relay and waits for its thread.
#[derive(Debug)]
pub struct RelayHandle {
    local_addr: SocketAddr,
    pusher: EventPusher,
    token: CancellationToken,
    stats: watch::Receiver<RelayStats>,
    thread: Option<JoinHandle<()>>,
}

impl RelayHandle {
    /// Bind the listener and start the dispatch thread.
    ///
    /// Returns once the listener is bound; connections are accepted from
    /// then on.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` if the address cannot be resolved or bound
    /// - `ServerError::Internal` if the runtime or thread cannot be created
    pub fn start<S: NotificationSink>(config: RelayConfig, sink: S) -> Result<Self, ServerError> {
        let std_listener = transport::bind(&config.bind_address)?;
        let local_addr = std_listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ServerError::Internal(format!("failed to build runtime: {e}")))?;

        let listener = {
            let _guard = runtime.enter();
            tokio::net::TcpListener::from_std(std_listener)?
        };

        let queue = Arc::new(EventQueue::new());
        let token = CancellationToken::new();
        let (stats_tx, stats) = watch::channel(RelayStats::default());

        let dispatcher = Dispatcher {
            driver: RelayDriver::new(config.driver),
            listener,
            connections: BTreeMap::new(),
            sink,
            queue: Arc::clone(&queue),
            stats_tx,
            tick_interval: config.tick_interval,
            max_frame_size: config.max_frame_size,
            next_session: 1,
            pending_sends: Vec::new(),
        };

        let loop_token = token.clone();
        let thread = thread::Builder::new()
            .name("pipehub-dispatch".to_string())
            .spawn(move || runtime.block_on(dispatcher.run(loop_token)))
            .map_err(|e| ServerError::Internal(format!("failed to spawn dispatch thread: {e}")))?;

        tracing::info!("relay listening on {local_addr}");

        Ok(Self {
            local_addr,
            pusher: EventPusher::new(queue),
            token,
            stats,
            thread: Some(thread),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue an outbound event; it is routed on the next tick.
    pub fn push(&self, payload: impl Into<String>) {
        self.pusher.push(payload);
    }

    /// Producer handle usable from other threads.
    pub fn pusher(&self) -> EventPusher {
        self.pusher.clone()
    }

    /// Counters as of the last completed tick.
    pub fn stats(&self) -> RelayStats {
        *self.stats.borrow()
    }

    /// Receiver updated after every tick.
    pub fn subscribe_stats(&self) -> watch::Receiver<RelayStats> {
        self.stats.clone()
    }

    /// Whether the dispatch thread is still running.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }

    /// Stop the relay and wait until every socket is closed.
    ///
    /// Buffered outbound events are discarded. A frame read that is already
    /// in progress is finished first, so a peer that stalls partway through
    /// a frame blocks this call until it sends the rest or disconnects.
    ///
    /// # Errors
    ///
    /// - `ServerError::Internal` if the dispatch thread panicked
    pub fn stop(mut self) -> Result<(), ServerError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), ServerError> {
        self.token.cancel();

        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| ServerError::Internal("dispatch thread panicked".to_string()))?;
        }

        Ok(())
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!("relay shutdown failed: {e}");
        }
    }
}

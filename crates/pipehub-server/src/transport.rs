//! TCP transport for the dispatch loop.
//!
//! Binding is synchronous so a bad address or a port in use is reported to
//! the caller of `start` before any thread exists. Readiness is collected for
//! every handle in one poll pass, select-style, instead of one task per
//! connection.

use std::{
    collections::BTreeMap,
    future::Future,
    io,
    net::SocketAddr,
    task::Poll,
};

use futures::future::poll_fn;
use tokio::net::{TcpListener, TcpStream};

use crate::{
    error::ServerError,
    registry::{Handle, SessionId},
};

/// Bind a non-blocking listener on `address` (`host:port`, hostnames are
/// resolved).
pub(crate) fn bind(address: &str) -> Result<std::net::TcpListener, ServerError> {
    let listener = std::net::TcpListener::bind(address)
        .map_err(|e| ServerError::Config(format!("failed to bind '{address}': {e}")))?;

    listener.set_nonblocking(true)?;

    Ok(listener)
}

/// Handles found ready in one readiness pass.
#[derive(Debug, Default)]
pub(crate) struct Readiness {
    /// Connection taken off the listener, if it was readable
    pub accepted: Option<io::Result<(TcpStream, SocketAddr)>>,
    /// Readable handles, listener first
    pub readable: Vec<Handle>,
    /// Writable sessions (only those that asked)
    pub writable: Vec<SessionId>,
}

impl Readiness {
    /// Nothing became ready.
    pub fn is_empty(&self) -> bool {
        self.accepted.is_none() && self.readable.is_empty() && self.writable.is_empty()
    }
}

/// Wait until at least one handle is ready.
///
/// Every session is polled for read readiness; write readiness is only
/// polled for sessions where `wants_write` holds, since an idle socket is
/// always writable.
pub(crate) fn wait_ready<'a, F>(
    listener: &'a TcpListener,
    sessions: &'a BTreeMap<SessionId, TcpStream>,
    wants_write: F,
) -> impl Future<Output = Readiness> + 'a
where
    F: Fn(SessionId) -> bool + 'a,
{
    poll_fn(move |cx| {
        let mut ready = Readiness::default();

        if let Poll::Ready(accepted) = listener.poll_accept(cx) {
            ready.accepted = Some(accepted);
            ready.readable.push(Handle::Listener);
        }

        for (&session_id, stream) in sessions {
            // An error counts as readable: the read surfaces it.
            if stream.poll_read_ready(cx).is_ready() {
                ready.readable.push(Handle::Session(session_id));
            }
            if wants_write(session_id) && stream.poll_write_ready(cx).is_ready() {
                ready.writable.push(session_id);
            }
        }

        if ready.is_empty() { Poll::Pending } else { Poll::Ready(ready) }
    })
}

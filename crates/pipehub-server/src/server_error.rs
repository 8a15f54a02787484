//! Driver error types.
//!
//! The sans-IO driver only fails on bookkeeping inconsistencies between the
//! runtime and its own state. Message-level problems (bad JSON, unknown
//! identifiers) are never errors; they become log actions.

use thiserror::Error;

use crate::registry::SessionId;

/// Errors returned by [`RelayDriver::process_event`](crate::RelayDriver::process_event).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// Event referenced a session the driver does not know.
    ///
    /// The runtime reported activity for a handle that was already removed.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// Runtime reported an accept for a handle that is already live.
    ///
    /// Handles are never reused, so this is a runtime bug.
    #[error("session already exists: {0}")]
    SessionAlreadyExists(SessionId),
}

//! Per-pipeline outbound buffers.
//!
//! One FIFO per registered identifier. A buffer exists exactly while some live
//! session holds its identifier; the driver creates it on registration and
//! removes it on disconnect or displacement.

use std::collections::{HashMap, VecDeque};

use crate::registry::ClientId;

/// Outbound buffer table: identifier → pending payloads.
#[derive(Debug, Default)]
pub struct OutboundBuffers {
    buffers: HashMap<ClientId, VecDeque<String>>,
}

impl OutboundBuffers {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or reset to empty) the buffer for `client_id`.
    ///
    /// Returns the number of payloads discarded by the reset.
    pub fn create(&mut self, client_id: ClientId) -> usize {
        self.buffers.insert(client_id, VecDeque::new()).map_or(0, |old| old.len())
    }

    /// Delete the buffer for `client_id`.
    ///
    /// Returns the payloads that were still pending, if the buffer existed.
    pub fn remove(&mut self, client_id: &ClientId) -> Option<VecDeque<String>> {
        self.buffers.remove(client_id)
    }

    /// Append a payload to an existing buffer.
    ///
    /// Returns `false` (and drops the payload) if no buffer exists for
    /// `client_id`.
    pub fn enqueue(&mut self, client_id: &ClientId, payload: String) -> bool {
        match self.buffers.get_mut(client_id) {
            Some(buffer) => {
                buffer.push_back(payload);
                true
            },
            None => false,
        }
    }

    /// Take every pending payload for `client_id` in FIFO order.
    ///
    /// The buffer itself stays in place, empty.
    pub fn drain(&mut self, client_id: &ClientId) -> Vec<String> {
        self.buffers.get_mut(client_id).map(|buffer| buffer.drain(..).collect()).unwrap_or_default()
    }

    /// Whether `client_id` has at least one pending payload.
    pub fn has_pending(&self, client_id: &ClientId) -> bool {
        self.buffers.get(client_id).is_some_and(|buffer| !buffer.is_empty())
    }

    /// Number of pending payloads for `client_id` (0 if no buffer).
    pub fn len_of(&self, client_id: &ClientId) -> usize {
        self.buffers.get(client_id).map_or(0, VecDeque::len)
    }

    /// Whether a buffer exists for `client_id`.
    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.buffers.contains_key(client_id)
    }

    /// Number of buffers.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// No buffers exist.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

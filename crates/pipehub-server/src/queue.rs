//! Pending event queue shared between producers and the dispatch loop.
//!
//! Producers push from any thread. The loop drains a snapshot once per tick;
//! anything pushed after the snapshot is taken waits for the next tick.

use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Multi-producer, single-consumer FIFO of raw outbound payloads.
#[derive(Debug, Default)]
pub struct EventQueue {
    pending: Mutex<VecDeque<String>>,
    wakeup: Notify,
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payload and wake the dispatch loop.
    pub fn push(&self, payload: String) {
        self.pending.lock().push_back(payload);
        self.wakeup.notify_one();
    }

    /// Take everything queued so far, in push order.
    pub fn drain(&self) -> Vec<String> {
        let mut pending = self.pending.lock();
        pending.drain(..).collect()
    }

    /// Number of queued payloads.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Nothing queued.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Resolves after the next [`push`](Self::push), or immediately if a push
    /// happened since the last wake-up was consumed.
    pub async fn notified(&self) {
        self.wakeup.notified().await;
    }
}

/// Cloneable producer handle for the pending event queue.
///
/// Safe to move to other threads; pushes made after the relay stopped are
/// accepted and never delivered.
#[derive(Debug, Clone)]
pub struct EventPusher {
    queue: Arc<EventQueue>,
}

impl EventPusher {
    pub(crate) fn new(queue: Arc<EventQueue>) -> Self {
        Self { queue }
    }

    /// Queue an outbound event for delivery on the next tick.
    pub fn push(&self, payload: impl Into<String>) {
        self.queue.push(payload.into());
    }
}

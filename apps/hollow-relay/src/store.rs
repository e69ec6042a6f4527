//! Authoritative game state fed by the datagram receiver.

use std::time::Instant;

use parking_lot::Mutex;
use relay_proto::{StateSnapshot, UpdateMessage};
use serde_json::Value;

#[derive(Debug, Default)]
struct StoreInner {
    data: StateSnapshot,
    /// Set by the first successful replace/merge and never cleared.
    connected: bool,
    last_update: Option<Instant>,
}

/// Thread-safe key/value store with full-replace and shallow-merge updates.
///
/// Every operation takes the one lock for its whole duration, so readers
/// always see the state between two updates, never in the middle of one.
#[derive(Debug, Default)]
pub struct StateStore {
    inner: Mutex<StoreInner>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard everything and install `snapshot`.
    pub fn replace(&self, snapshot: StateSnapshot) {
        let mut inner = self.inner.lock();
        inner.data = snapshot;
        inner.connected = true;
        inner.last_update = Some(Instant::now());
    }

    /// Overwrite each top-level key in `delta`. Nested values are replaced
    /// wholesale, not merged recursively.
    pub fn merge(&self, delta: StateSnapshot) {
        let mut inner = self.inner.lock();
        for (key, value) in delta {
            inner.data.insert(key, value);
        }
        inner.connected = true;
        inner.last_update = Some(Instant::now());
    }

    /// Apply a decoded message. Returns false for unknown messages, which
    /// leave the store untouched.
    pub fn apply(&self, message: UpdateMessage) -> bool {
        match message {
            UpdateMessage::Full(snapshot) => self.replace(snapshot),
            UpdateMessage::Partial(delta) => self.merge(delta),
            UpdateMessage::Unknown { .. } => return false,
        }
        true
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.inner.lock().data.clone()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().data.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().data.is_empty()
    }

    /// True once any update has been applied, even if it left the store empty.
    pub fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    pub fn last_update(&self) -> Option<Instant> {
        self.inner.lock().last_update
    }
}

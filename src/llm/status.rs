//! Broadcast channel for readiness transitions.
//!
//! Multi-consumer fan-out over `tokio::sync::broadcast`: publishing never
//! waits on a subscriber. A subscriber that falls more than `capacity`
//! events behind gets `RecvError::Lagged` and skips ahead; it never slows
//! the publisher down.

use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::trace;

use super::ReadinessState;

const DEFAULT_CAPACITY: usize = 32;

#[derive(Debug)]
pub struct StatusChannel {
    /// `None` once closed.
    tx: Mutex<Option<broadcast::Sender<ReadinessState>>>,
    current: Mutex<ReadinessState>,
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl StatusChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx: Mutex::new(Some(tx)),
            current: Mutex::new(ReadinessState::Uninitialized),
        }
    }

    /// Last published state.
    pub fn current(&self) -> ReadinessState {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record `state` and fan it out. Dropped silently with no subscribers
    /// or after [`close`](Self::close).
    pub fn publish(&self, state: ReadinessState) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = state;
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = tx.as_ref() {
            let receivers = tx.send(state).unwrap_or(0);
            trace!(%state, receivers, "status published");
        }
    }

    /// `None` after [`close`](Self::close).
    pub fn subscribe(&self) -> Option<broadcast::Receiver<ReadinessState>> {
        self.tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(broadcast::Sender::subscribe)
    }

    /// Drop the sender. Existing subscribers drain what is buffered, then see
    /// `RecvError::Closed`. Idempotent.
    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}

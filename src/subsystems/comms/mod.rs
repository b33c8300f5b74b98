//! Comms subsystem: user-facing I/O.
//!
//! Text reaches the conversation loop through an [`InputBridge`]. Any number
//! of producers hold an [`InputSender`]: the console stdin reader, a speech
//! recognizer, a test. Producers never block; the loop drains the bridge
//! in arrival order.

pub mod pty;

pub use pty::ConsoleChannel;

use tokio::sync::mpsc;
use tracing::warn;

const DEFAULT_CAPACITY: usize = 16;

/// Producer side of the input bridge.
#[derive(Debug, Clone)]
pub struct InputSender {
    tx: mpsc::Sender<String>,
}

impl InputSender {
    /// Queue `text` for the conversation loop.
    ///
    /// Non-blocking: drops the text and logs a warning if the loop is not
    /// keeping up (bridge full) or has already exited (closed). Returns
    /// whether the text was queued.
    pub fn submit(&self, text: impl Into<String>) -> bool {
        match self.tx.try_send(text.into()) {
            Ok(()) => true,
            Err(e) => {
                warn!("input dropped: {e}");
                false
            }
        }
    }
}

/// Consumer side of the input bridge. Yields `None` once every sender is gone.
#[derive(Debug)]
pub struct InputBridge {
    rx: mpsc::Receiver<String>,
}

impl InputBridge {
    pub fn new() -> (InputSender, InputBridge) {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (InputSender, InputBridge) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (InputSender { tx }, InputBridge { rx })
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order_then_closes() {
        let (tx, mut bridge) = InputBridge::new();
        let tx2 = tx.clone();
        assert!(tx.submit("un"));
        assert!(tx2.submit(String::from("deux")));
        drop(tx);
        drop(tx2);
        assert_eq!(bridge.recv().await.as_deref(), Some("un"));
        assert_eq!(bridge.recv().await.as_deref(), Some("deux"));
        assert_eq!(bridge.recv().await, None);
    }

    #[tokio::test]
    async fn full_bridge_drops_instead_of_blocking() {
        let (tx, mut bridge) = InputBridge::with_capacity(1);
        assert!(tx.submit("premier"));
        assert!(!tx.submit("second"));
        assert_eq!(bridge.recv().await.as_deref(), Some("premier"));
    }

    #[test]
    fn closed_bridge_drops() {
        let (tx, bridge) = InputBridge::new();
        drop(bridge);
        assert!(!tx.submit("personne"));
    }
}

//! Readiness bookkeeping shared by every backend.

use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::debug;

use super::{BackendError, ReadinessState, StatusChannel};

#[derive(Debug, Default)]
pub struct Lifecycle {
    /// Source of truth for the state. The channel only mirrors it.
    state: Mutex<ReadinessState>,
    last_error: Mutex<Option<String>>,
    status: StatusChannel,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ReadinessState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn subscribe(&self) -> Option<broadcast::Receiver<ReadinessState>> {
        self.status.subscribe()
    }

    /// Only `Uninitialized` and `Error` need a (re-)probe.
    pub fn needs_init(&self) -> bool {
        matches!(self.state(), ReadinessState::Uninitialized | ReadinessState::Error)
    }

    pub fn mark_ready(&self) {
        self.last_error.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.set(ReadinessState::Ready);
    }

    /// Enter `Error`, keeping `message` for inspection.
    pub fn mark_failed(&self, message: impl Into<String>) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.into());
        self.set(ReadinessState::Error);
    }

    /// `Ready → Thinking`, atomically. The returned guard puts the state back
    /// to `Ready` when dropped, also when the generation future is abandoned.
    pub fn begin_generation(&self) -> Result<ThinkingGuard<'_>, BackendError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != ReadinessState::Ready {
                return Err(BackendError::NotReady(*state));
            }
            *state = ReadinessState::Thinking;
        }
        self.status.publish(ReadinessState::Thinking);
        Ok(ThinkingGuard { lifecycle: self })
    }

    pub fn dispose(&self) {
        if !self.status.is_closed() {
            debug!("backend status channel released");
        }
        self.status.close();
    }

    fn set(&self, next: ReadinessState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
        self.status.publish(next);
    }
}

#[must_use = "dropping the guard ends the generation immediately"]
pub struct ThinkingGuard<'a> {
    lifecycle: &'a Lifecycle,
}

impl Drop for ThinkingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lifecycle.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == ReadinessState::Thinking {
            *state = ReadinessState::Ready;
            drop(state);
            self.lifecycle.status.publish(ReadinessState::Ready);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uninitialized() {
        let l = Lifecycle::new();
        assert_eq!(l.state(), ReadinessState::Uninitialized);
        assert!(l.needs_init());
        assert!(l.last_error().is_none());
    }

    #[test]
    fn generation_requires_ready() {
        let l = Lifecycle::new();
        let err = l.begin_generation().err().unwrap();
        assert!(matches!(err, BackendError::NotReady(ReadinessState::Uninitialized)));
    }

    #[test]
    fn guard_returns_to_ready() {
        let l = Lifecycle::new();
        l.mark_ready();
        let mut rx = l.subscribe().unwrap();
        {
            let _g = l.begin_generation().unwrap();
            assert_eq!(l.state(), ReadinessState::Thinking);
            assert!(l.begin_generation().is_err());
        }
        assert_eq!(l.state(), ReadinessState::Ready);
        assert_eq!(rx.try_recv().unwrap(), ReadinessState::Thinking);
        assert_eq!(rx.try_recv().unwrap(), ReadinessState::Ready);
    }

    #[test]
    fn failure_keeps_message_until_recovered() {
        let l = Lifecycle::new();
        l.mark_failed("HTTP 503");
        assert_eq!(l.state(), ReadinessState::Error);
        assert_eq!(l.last_error().as_deref(), Some("HTTP 503"));
        assert!(l.needs_init());
        l.mark_ready();
        assert!(l.last_error().is_none());
        assert!(!l.needs_init());
    }

    #[test]
    fn dispose_twice() {
        let l = Lifecycle::new();
        l.dispose();
        l.dispose();
        assert!(l.subscribe().is_none());
    }
}

//! Conversation orchestrator.
//!
//! Owns the active backend, the live [`ConversationSession`] and the
//! assistant-level status channel. Callers talk to it through
//! [`Orchestrator::generate`] / [`Orchestrator::generate_stream`]; every
//! other component is reached through it.
//!
//! ```text
//! text ─▶ IntentRouter::rewrite ─▶ LlmBackend::generate ─▶ reply
//!                                                          │
//!            live session ◀─ append(user, assistant) ◀─────┘ (+ compaction)
//! ```
//!
//! One generation runs at a time. The slot is an owned `tokio` mutex guard
//! so a stream keeps it until drained. Status events flow from the adapter's
//! channel to the orchestrator's through a forwarding task, so observers
//! keep a single subscription across backend switches.

use std::sync::{Arc, Mutex, RwLock};

use futures_util::stream::{self, StreamExt};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::language::Language;
use crate::llm::providers::{self, PromptStyle};
use crate::llm::{BackendDescriptor, BackendError, LlmBackend, ReadinessState, StatusChannel, TextStream};
use crate::subsystems::agents::IntentRouter;
use crate::subsystems::memory::{ConversationSession, MemoryPolicy, Turn};
use crate::subsystems::tools::Mailbox;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message is empty")]
    EmptyMessage,
    /// The backend was switched while this reply was being generated; the
    /// reply was discarded.
    #[error("backend changed during generation")]
    BackendChanged,
    /// The generation task ended without producing a result.
    #[error("generation interrupted: {0}")]
    Interrupted(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ChatError {
    pub fn is_not_ready(&self) -> bool {
        matches!(self, ChatError::Backend(e) if e.is_not_ready())
    }
}

/// Cheap to clone; all clones share one conversation.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    /// Consumed by the next build; replaced by `switch_backend`.
    descriptor: Mutex<BackendDescriptor>,
    router: IntentRouter,
    memory: MemoryPolicy,
    style: PromptStyle,
    backend: RwLock<Option<Arc<LlmBackend>>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    session: Mutex<ConversationSession>,
    status: Arc<StatusChannel>,
    /// One generation at a time.
    generation: Arc<tokio::sync::Mutex<()>>,
    /// Serializes `initialize` and `switch_backend`.
    setup: tokio::sync::Mutex<()>,
    last_error: Mutex<Option<String>>,
}

impl Orchestrator {
    pub fn new(descriptor: BackendDescriptor, router: IntentRouter, memory: MemoryPolicy) -> Self {
        let style = PromptStyle { language: router.language(), context_turns: memory.context_turns };
        Self {
            inner: Arc::new(Inner {
                descriptor: Mutex::new(descriptor),
                router,
                memory,
                style,
                backend: RwLock::new(None),
                forwarder: Mutex::new(None),
                session: Mutex::new(ConversationSession::new()),
                status: Arc::new(StatusChannel::default()),
                generation: Arc::new(tokio::sync::Mutex::new(())),
                setup: tokio::sync::Mutex::new(()),
                last_error: Mutex::new(None),
            }),
        }
    }

    /// Wire an orchestrator from resolved config.
    pub fn from_config(config: &Config, mailbox: Arc<dyn Mailbox>) -> Result<Self, AppError> {
        let descriptor = BackendDescriptor::from_config(&config.llm)?;
        let language = Language::from_preference(config.language.as_deref());
        let router = match &config.mailbox.entities {
            Some(entities) => IntentRouter::with_entities(mailbox, language, entities),
            None => IntentRouter::new(mailbox, language),
        };
        Ok(Self::new(descriptor, router, MemoryPolicy::from(&config.memory)))
    }

    pub fn language(&self) -> Language {
        self.inner.style.language
    }

    // ── Status ───────────────────────────────────────────────────────────

    /// Current readiness, derived from the active backend.
    pub fn status(&self) -> ReadinessState {
        match self.inner.active() {
            Some(b) if b.state() != ReadinessState::Uninitialized => b.state(),
            _ => self.inner.status.current(),
        }
    }

    /// Subscribe to readiness transitions. `None` after [`dispose`](Self::dispose).
    pub fn subscribe(&self) -> Option<broadcast::Receiver<ReadinessState>> {
        self.inner.status.subscribe()
    }

    /// Cause of the last failed initialization or generation.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner.last_error).clone()
    }

    /// Best-effort probe of the active backend. `false` without one.
    pub async fn check_availability(&self) -> bool {
        match self.inner.active() {
            Some(b) => b.check_availability().await,
            None => false,
        }
    }

    // ── Backend lifecycle ────────────────────────────────────────────────

    /// Build the backend from the current descriptor and probe it.
    ///
    /// No-op when the backend is already `Ready` or `Thinking`. A backend
    /// left in `Error` is probed again.
    pub async fn initialize(&self) -> Result<(), ChatError> {
        let _setup = self.inner.setup.lock().await;
        let backend = match self.inner.active() {
            Some(b) if matches!(b.state(), ReadinessState::Ready | ReadinessState::Thinking) => {
                debug!("orchestrator already initialized");
                return Ok(());
            }
            Some(b) => {
                self.inner.status.publish(ReadinessState::Loading);
                b
            }
            None => {
                self.inner.status.publish(ReadinessState::Loading);
                let descriptor = lock(&self.inner.descriptor).clone();
                self.inner.install(&descriptor)?
            }
        };
        self.inner.start(&backend).await
    }

    /// Dispose the current backend, then build and initialize one from
    /// `descriptor`.
    ///
    /// A generation already running against the old backend finishes on its
    /// own; its reply is discarded ([`ChatError::BackendChanged`]).
    pub async fn switch_backend(&self, descriptor: BackendDescriptor) -> Result<(), ChatError> {
        let _setup = self.inner.setup.lock().await;
        if let Some(old) = self.inner.uninstall() {
            info!(from = %old.kind(), to = %descriptor.kind, "switching backend");
            old.dispose();
        }
        *lock(&self.inner.descriptor) = descriptor.clone();
        self.inner.status.publish(ReadinessState::Loading);
        let backend = self.inner.install(&descriptor)?;
        self.inner.start(&backend).await
    }

    /// Release the backend and close the status channel. Safe to repeat.
    pub fn dispose(&self) {
        if let Some(old) = self.inner.uninstall() {
            old.dispose();
        }
        self.inner.status.close();
    }

    // ── Session ──────────────────────────────────────────────────────────

    /// Snapshot of the live session.
    pub fn session(&self) -> ConversationSession {
        lock(&self.inner.session).clone()
    }

    /// Replace the live session with a fresh one (new id, new start time).
    pub fn start_new_session(&self) {
        let fresh = ConversationSession::new();
        let mut session = lock(&self.inner.session);
        info!(old = %session.id(), new = %fresh.id(), turns = session.len(), "new session");
        *session = fresh;
    }

    // ── Generation ───────────────────────────────────────────────────────

    /// Generate a reply to `text`.
    ///
    /// `history`, when non-empty, is the context sent to the backend in
    /// place of the live session. Either way, the original `text` and the
    /// reply are appended to the live session, then the memory policy runs.
    /// The backend call runs on its own task, so an abandoned call still
    /// records its turns.
    pub async fn generate(&self, text: &str, history: &[Turn]) -> Result<String, ChatError> {
        let ticket = self.prepare(text, history).await?;
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let result = ticket.backend.generate(&ticket.prompt, &ticket.context).await;
            inner.commit(ticket, result)
        });
        match task.await {
            Ok(result) => result,
            Err(e) => Err(ChatError::Interrupted(e.to_string())),
        }
    }

    /// Streaming variant of [`generate`](Self::generate).
    ///
    /// Chunks arrive in the backend's order. The turns are recorded once the
    /// stream is drained; a stream dropped early records nothing. The
    /// generation slot is held until then.
    pub async fn generate_stream(&self, text: &str, history: &[Turn]) -> Result<TextStream, ChatError> {
        let ticket = self.prepare(text, history).await?;
        let chunks = match ticket.backend.generate_stream(&ticket.prompt, &ticket.context).await {
            Ok(chunks) => chunks,
            Err(e) => {
                self.inner.generation_failed(&e);
                return Err(e.into());
            }
        };

        let pending = PendingStream { inner: Arc::clone(&self.inner), ticket, collected: Vec::new() };
        let out = stream::unfold((chunks, Some(pending)), |(mut chunks, mut pending)| async move {
            match chunks.next().await {
                Some(chunk) => {
                    if let Some(p) = pending.as_mut() {
                        p.collected.push(chunk.clone());
                    }
                    Some((chunk, (chunks, pending)))
                }
                None => {
                    if let Some(p) = pending.take() {
                        p.finish();
                    }
                    None
                }
            }
        });
        Ok(out.boxed())
    }

    /// Validate, take the generation slot, pick the backend and the context.
    async fn prepare(&self, text: &str, history: &[Turn]) -> Result<Ticket, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let slot = Arc::clone(&self.inner.generation).lock_owned().await;

        let backend = match self.inner.active() {
            Some(b) if b.state() == ReadinessState::Ready => b,
            Some(b) => return Err(BackendError::NotReady(b.state()).into()),
            None => return Err(BackendError::NotReady(self.status()).into()),
        };

        let live = self.session();
        let context = if history.is_empty() {
            live.clone()
        } else {
            ConversationSession::from_turns(history.iter().cloned())
        };
        let prompt = self.inner.router.rewrite(text);
        debug!(
            session_id = %live.id(),
            context_turns = context.len(),
            rewritten = prompt != text,
            "generation requested"
        );

        Ok(Ticket {
            backend,
            session_id: live.id().to_string(),
            user_text: text.to_string(),
            prompt,
            context,
            _slot: slot,
        })
    }
}

/// Everything one generation needs to run and be recorded.
struct Ticket {
    backend: Arc<LlmBackend>,
    /// Live session that issued the request.
    session_id: String,
    user_text: String,
    prompt: String,
    context: ConversationSession,
    _slot: OwnedMutexGuard<()>,
}

/// State carried by a stream until it is drained.
struct PendingStream {
    inner: Arc<Inner>,
    ticket: Ticket,
    collected: Vec<String>,
}

impl PendingStream {
    fn finish(self) {
        let reply = self.collected.concat();
        if let Err(e) = self.inner.commit(self.ticket, Ok(reply)) {
            warn!(error = %e, "streamed reply not recorded");
        }
    }
}

impl Inner {
    fn active(&self) -> Option<Arc<LlmBackend>> {
        self.backend.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record_error(&self, message: String) {
        *lock(&self.last_error) = Some(message);
    }

    /// Build a backend for `descriptor`, make it active and start forwarding
    /// its status events.
    fn install(&self, descriptor: &BackendDescriptor) -> Result<Arc<LlmBackend>, ChatError> {
        let backend = match providers::build(descriptor, self.style) {
            Ok(b) => Arc::new(b),
            Err(e) => {
                warn!(kind = %descriptor.kind, error = %e, "backend construction failed");
                self.record_error(e.to_string());
                self.status.publish(ReadinessState::Error);
                return Err(e.into());
            }
        };

        // Subscribe before initialize so no transition is missed.
        if let Some(rx) = backend.subscribe() {
            let handle = tokio::spawn(forward(rx, Arc::clone(&self.status)));
            if let Some(old) = lock(&self.forwarder).replace(handle) {
                old.abort();
            }
        }
        *self.backend.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&backend));
        debug!(kind = %descriptor.kind, endpoint = %descriptor.endpoint, "backend installed");
        Ok(backend)
    }

    fn uninstall(&self) -> Option<Arc<LlmBackend>> {
        if let Some(handle) = lock(&self.forwarder).take() {
            handle.abort();
        }
        self.backend.write().unwrap_or_else(|e| e.into_inner()).take()
    }

    async fn start(&self, backend: &Arc<LlmBackend>) -> Result<(), ChatError> {
        match backend.initialize().await {
            Ok(()) => {
                lock(&self.last_error).take();
                info!(kind = %backend.kind(), "backend ready");
                Ok(())
            }
            Err(e) => {
                let message = backend.last_error().unwrap_or_else(|| e.to_string());
                warn!(kind = %backend.kind(), error = %message, "backend initialization failed");
                self.record_error(message);
                Err(e.into())
            }
        }
    }

    fn generation_failed(&self, e: &BackendError) {
        warn!(error = %e, "generation failed");
        self.record_error(e.cause().to_string());
    }

    /// Record a finished generation against the live session.
    fn commit(&self, ticket: Ticket, result: Result<String, BackendError>) -> Result<String, ChatError> {
        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                self.generation_failed(&e);
                return Err(e.into());
            }
        };

        let still_active = self.active().is_some_and(|b| Arc::ptr_eq(&b, &ticket.backend));
        if !still_active {
            warn!(kind = %ticket.backend.kind(), "backend switched during generation, reply discarded");
            return Err(ChatError::BackendChanged);
        }

        let mut session = lock(&self.session);
        if session.id() != ticket.session_id {
            debug!(issued_by = %ticket.session_id, live = %session.id(), "session replaced, turns not recorded");
            return Ok(reply);
        }
        let next = session
            .append(Turn::user(ticket.user_text))
            .append(Turn::assistant(reply.clone()));
        *session = self.memory.apply(next);
        debug!(turns = session.len(), tokens = session.estimated_tokens(), "turns recorded");
        Ok(reply)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.forwarder).take() {
            handle.abort();
        }
    }
}

/// Re-publish adapter events on the orchestrator channel until the adapter
/// channel closes.
async fn forward(mut rx: broadcast::Receiver<ReadinessState>, status: Arc<StatusChannel>) {
    loop {
        match rx.recv().await {
            Ok(state) => status.publish(state),
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "status forwarder lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::BackendKind;
    use crate::subsystems::memory::Speaker;
    use crate::subsystems::tools::mailbox::fixtures;
    use std::time::Duration;

    fn echo_orchestrator() -> Orchestrator {
        let router = IntentRouter::new(Arc::new(fixtures::sample()), Language::French);
        let mut d = BackendDescriptor::echo();
        d.timing.chunk_delay = Duration::ZERO;
        Orchestrator::new(d, router, MemoryPolicy::default())
    }

    async fn ready_orchestrator() -> Orchestrator {
        let o = echo_orchestrator();
        o.initialize().await.unwrap();
        o
    }

    #[tokio::test]
    async fn generate_before_initialize_is_not_ready() {
        let o = echo_orchestrator();
        assert_eq!(o.status(), ReadinessState::Uninitialized);
        let err = o.generate("Bonjour", &[]).await.unwrap_err();
        assert!(err.is_not_ready());
        assert!(o.session().is_empty());
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let o = ready_orchestrator().await;
        assert_eq!(o.status(), ReadinessState::Ready);
        o.initialize().await.unwrap();
        assert_eq!(o.status(), ReadinessState::Ready);
        assert!(o.last_error().is_none());
        assert!(o.check_availability().await);
    }

    #[tokio::test]
    async fn empty_message_rejected() {
        let o = ready_orchestrator().await;
        assert!(matches!(o.generate("   ", &[]).await, Err(ChatError::EmptyMessage)));
    }

    #[tokio::test]
    async fn records_original_text_not_rewrite() {
        let o = ready_orchestrator().await;
        let reply = o.generate("combien de mails non lus ?", &[]).await.unwrap();
        assert!(reply.starts_with("[echo] "));
        assert_ne!(reply, "[echo] combien de mails non lus ?");

        let session = o.session();
        let turns: Vec<_> = session.turns().collect();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].speaker(), Speaker::User);
        assert_eq!(turns[0].text(), "combien de mails non lus ?");
        assert_eq!(turns[1].speaker(), Speaker::Assistant);
        assert_eq!(turns[1].text(), reply);
    }

    #[tokio::test]
    async fn explicit_history_still_appends_to_live_session() {
        let o = ready_orchestrator().await;
        let history = vec![Turn::user("avant"), Turn::assistant("oui")];
        o.generate("Bonjour", &history).await.unwrap();
        assert_eq!(o.session().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_generations_do_not_interleave() {
        let o = ready_orchestrator().await;
        let calls = (0..8).map(|i| {
            let o = o.clone();
            async move { o.generate(&format!("phrase {i}"), &[]).await }
        });
        let replies = futures_util::future::join_all(calls).await;
        assert!(replies.iter().all(Result::is_ok));

        let session = o.session();
        let turns: Vec<_> = session.turns().collect();
        assert_eq!(turns.len(), 16);
        for pair in turns.chunks(2) {
            assert_eq!(pair[0].speaker(), Speaker::User);
            assert_eq!(pair[1].text(), format!("[echo] {}", pair[0].text()));
        }
    }

    #[tokio::test]
    async fn stream_records_turns_once_drained() {
        let o = ready_orchestrator().await;
        let chunks: Vec<String> = o.generate_stream("salut toi", &[]).await.unwrap().collect().await;
        assert_eq!(chunks, vec!["[echo] ", "salut ", "toi"]);
        let session = o.session();
        let turns: Vec<_> = session.turns().collect();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].text(), "[echo] salut toi");
    }

    #[tokio::test]
    async fn dropped_stream_records_nothing_and_frees_slot() {
        let o = ready_orchestrator().await;
        let mut s = o.generate_stream("un deux trois", &[]).await.unwrap();
        assert_eq!(s.next().await.as_deref(), Some("[echo] "));
        drop(s);
        assert!(o.session().is_empty());
        o.generate("encore", &[]).await.unwrap();
        assert_eq!(o.session().len(), 2);
    }

    #[tokio::test]
    async fn new_session_has_new_identity() {
        let o = ready_orchestrator().await;
        o.generate("Bonjour", &[]).await.unwrap();
        let before = o.session();
        o.start_new_session();
        let after = o.session();
        assert_ne!(before.id(), after.id());
        assert!(after.is_empty());
    }

    #[tokio::test]
    async fn unsupported_kind_surfaces_and_recovers_by_switch() {
        let o = ready_orchestrator().await;
        let mut on_device = BackendDescriptor::echo();
        on_device.kind = BackendKind::OnDevice;

        let err = o.switch_backend(on_device).await.unwrap_err();
        assert!(matches!(err, ChatError::Backend(BackendError::Unsupported(_))));
        assert_eq!(o.status(), ReadinessState::Error);
        assert!(o.last_error().unwrap().contains("on-device"));
        assert!(o.generate("Bonjour", &[]).await.unwrap_err().is_not_ready());

        o.switch_backend(BackendDescriptor::echo()).await.unwrap();
        assert_eq!(o.status(), ReadinessState::Ready);
        assert!(o.last_error().is_none());
    }

    async fn next(rx: &mut broadcast::Receiver<ReadinessState>) -> ReadinessState {
        tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn status_events_reach_subscribers() {
        let o = echo_orchestrator();
        let mut rx = o.subscribe().unwrap();
        o.initialize().await.unwrap();
        assert_eq!(next(&mut rx).await, ReadinessState::Loading);
        assert_eq!(next(&mut rx).await, ReadinessState::Ready);

        o.generate("Bonjour", &[]).await.unwrap();
        assert_eq!(next(&mut rx).await, ReadinessState::Thinking);
        assert_eq!(next(&mut rx).await, ReadinessState::Ready);
    }

    #[tokio::test]
    async fn dispose_closes_status() {
        let o = ready_orchestrator().await;
        o.dispose();
        o.dispose();
        assert!(o.subscribe().is_none());
        assert!(!o.check_availability().await);
    }
}

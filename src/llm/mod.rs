//! LLM backend abstraction.
//!
//! [`LlmBackend`] is an enum over concrete backend implementations. Adding a
//! backend = new module in `providers/` + new [`BackendKind`] + new variant,
//! and the compiler points at every `match` that needs an arm.
//!
//! Every backend carries a [`Lifecycle`](lifecycle::Lifecycle) that owns its
//! [`ReadinessState`] and publishes transitions on a broadcast
//! [`StatusChannel`]:
//!
//! ```text
//! Uninitialized ──initialize ok──▶ Ready ──generate──▶ Thinking ──▶ Ready
//!       │                            ▲                    │ (ok or error)
//!       └──initialize err──▶ Error ──┘ (re-initialize)    ▼
//! ```

pub mod lifecycle;
pub mod providers;
pub mod status;
pub mod stream;

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use reqwest::Url;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::LlmConfig;
use crate::subsystems::memory::ConversationSession;

pub use status::StatusChannel;
pub use stream::TextStream;

// ── Readiness ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReadinessState {
    #[default]
    Uninitialized,
    Loading,
    Ready,
    Thinking,
    Error,
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReadinessState::Uninitialized => "uninitialized",
            ReadinessState::Loading => "loading",
            ReadinessState::Ready => "ready",
            ReadinessState::Thinking => "thinking",
            ReadinessState::Error => "error",
        };
        f.write_str(s)
    }
}

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BackendError {
    /// Endpoint unreachable, or the request timed out.
    #[error("cannot reach inference server: {0}")]
    Connectivity(String),
    /// Unexpected status code, or a malformed/missing response field.
    #[error("inference protocol error: {0}")]
    Protocol(String),
    /// Generation attempted outside `Ready`. No network call was made.
    #[error("backend not ready (state: {0})")]
    NotReady(ReadinessState),
    #[error("unsupported backend: {0}")]
    Unsupported(String),
    /// A single generation failed; the backend went back to `Ready`.
    #[error("generation failed: {source}")]
    Generation {
        #[source]
        source: Box<BackendError>,
    },
}

impl BackendError {
    pub fn generation(cause: BackendError) -> Self {
        match cause {
            already @ BackendError::Generation { .. } => already,
            other => BackendError::Generation { source: Box::new(other) },
        }
    }

    /// The innermost cause, unwrapping a generation failure.
    pub fn cause(&self) -> &BackendError {
        match self {
            BackendError::Generation { source } => source.cause(),
            other => other,
        }
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, BackendError::NotReady(_))
    }
}

// ── Descriptor ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Ollama-style HTTP inference server.
    HttpInference,
    /// Local echo backend, no I/O.
    Echo,
    /// In-process inference runtime. Not available on this platform.
    OnDevice,
}

impl BackendKind {
    /// Map a config string (`[llm] default = "..."`) to a kind.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ollama" | "http" | "http-inference" => Some(BackendKind::HttpInference),
            "echo" | "dummy" => Some(BackendKind::Echo),
            "on-device" | "ondevice" | "local" => Some(BackendKind::OnDevice),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::HttpInference => f.write_str("http-inference"),
            BackendKind::Echo => f.write_str("echo"),
            BackendKind::OnDevice => f.write_str("on-device"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self { temperature: 0.7, top_p: 0.9, top_k: 40 }
    }
}

/// Timeouts and pacing for one backend instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendTiming {
    /// Bound on the liveness probe.
    pub probe_timeout: Duration,
    /// Bound on one generation round trip.
    pub generate_timeout: Duration,
    /// Pause between chunks of an emulated stream.
    pub chunk_delay: Duration,
}

impl Default for BackendTiming {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            generate_timeout: Duration::from_secs(30),
            chunk_delay: Duration::from_millis(50),
        }
    }
}

/// Everything needed to construct one backend. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendDescriptor {
    pub kind: BackendKind,
    pub endpoint: Url,
    pub model_id: String,
    pub sampling: SamplingParams,
    /// Extra sampling options merged into the request's `options` object.
    pub extra: HashMap<String, Value>,
    pub timing: BackendTiming,
}

static ECHO_ENDPOINT: LazyLock<Url> =
    LazyLock::new(|| Url::parse("http://localhost/").expect("valid echo endpoint"));

impl BackendDescriptor {
    pub fn new(kind: BackendKind, endpoint: Url, model_id: impl Into<String>) -> Self {
        Self {
            kind,
            endpoint,
            model_id: model_id.into(),
            sampling: SamplingParams::default(),
            extra: HashMap::new(),
            timing: BackendTiming::default(),
        }
    }

    /// Descriptor for the offline echo backend.
    pub fn echo() -> Self {
        Self::new(BackendKind::Echo, ECHO_ENDPOINT.clone(), "echo")
    }

    /// Resolve the active backend from `[llm]` config.
    pub fn from_config(config: &LlmConfig) -> Result<Self, BackendError> {
        let kind = BackendKind::parse(&config.provider)
            .ok_or_else(|| BackendError::Unsupported(format!("unknown backend '{}'", config.provider)))?;
        let o = &config.ollama;
        let endpoint = Url::parse(&o.endpoint)
            .map_err(|e| BackendError::Unsupported(format!("invalid endpoint '{}': {e}", o.endpoint)))?;
        Ok(Self {
            kind,
            endpoint,
            model_id: o.model.clone(),
            sampling: SamplingParams { temperature: o.temperature, top_p: o.top_p, top_k: o.top_k },
            extra: o.extra.clone(),
            timing: BackendTiming {
                probe_timeout: Duration::from_secs(o.probe_timeout_seconds),
                generate_timeout: Duration::from_secs(o.generate_timeout_seconds),
                chunk_delay: Duration::from_millis(config.chunk_delay_ms),
            },
        })
    }
}

// ── Backend enum ──────────────────────────────────────────────────────────────

/// All available backends.
///
/// Enum dispatch keeps callers free of trait objects; each method is a
/// `match` over the variants.
#[derive(Debug)]
pub enum LlmBackend {
    Http(providers::http_inference::HttpInferenceBackend),
    Echo(providers::echo::EchoBackend),
}

impl LlmBackend {
    pub fn kind(&self) -> BackendKind {
        match self {
            LlmBackend::Http(_) => BackendKind::HttpInference,
            LlmBackend::Echo(_) => BackendKind::Echo,
        }
    }

    fn lifecycle(&self) -> &lifecycle::Lifecycle {
        match self {
            LlmBackend::Http(b) => b.lifecycle(),
            LlmBackend::Echo(b) => b.lifecycle(),
        }
    }

    pub fn state(&self) -> ReadinessState {
        self.lifecycle().state()
    }

    /// Message retained from the last failed initialization.
    pub fn last_error(&self) -> Option<String> {
        self.lifecycle().last_error()
    }

    /// `None` once disposed.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<ReadinessState>> {
        self.lifecycle().subscribe()
    }

    /// Probe the endpoint. No-op when already `Ready` or `Thinking`.
    pub async fn initialize(&self) -> Result<(), BackendError> {
        match self {
            LlmBackend::Http(b) => b.initialize().await,
            LlmBackend::Echo(b) => b.initialize().await,
        }
    }

    /// One round trip. Requires `Ready`; failures come back as
    /// [`BackendError::Generation`] (or `NotReady`) and leave the backend `Ready`.
    pub async fn generate(&self, message: &str, context: &ConversationSession) -> Result<String, BackendError> {
        match self {
            LlmBackend::Http(b) => b.generate(message, context).await,
            LlmBackend::Echo(b) => b.generate(message, context).await,
        }
    }

    /// Lazy, ordered, finite chunk sequence.
    ///
    /// Neither backend streams natively yet: both run a full `generate` and
    /// replay the reply word by word with a fixed pause
    /// ([`stream::emulated`]). The pause is pacing for the UI, not a timing
    /// guarantee. A backend with true incremental decoding gets its own arm here.
    pub async fn generate_stream(
        &self,
        message: &str,
        context: &ConversationSession,
    ) -> Result<TextStream, BackendError> {
        match self {
            LlmBackend::Http(_) | LlmBackend::Echo(_) => {
                let text = self.generate(message, context).await?;
                Ok(stream::emulated(text, self.chunk_delay()))
            }
        }
    }

    /// Best-effort probe. Never errors.
    pub async fn check_availability(&self) -> bool {
        match self {
            LlmBackend::Http(b) => b.check_availability().await,
            LlmBackend::Echo(_) => true,
        }
    }

    /// Release the status channel. Safe to call repeatedly.
    pub fn dispose(&self) {
        self.lifecycle().dispose();
    }

    fn chunk_delay(&self) -> std::time::Duration {
        match self {
            LlmBackend::Http(b) => b.chunk_delay(),
            LlmBackend::Echo(b) => b.chunk_delay(),
        }
    }
}

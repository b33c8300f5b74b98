//! HTTP inference-server backend (Ollama wire protocol).
//!
//! ```text
//! GET  {endpoint}/api/tags       liveness, expect 200
//! POST {endpoint}/api/generate   {model, prompt, stream: false, options} → {"response": "..."}
//! ```
//!
//! The whole exchange is a single prompt string in ChatML markup, built here
//! from the persona, the last few turns and the new message. All wire types
//! are private to this module.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, trace, warn};

use super::PromptStyle;
use crate::language::Language;
use crate::llm::lifecycle::Lifecycle;
use crate::llm::{BackendDescriptor, BackendError, SamplingParams};
use crate::subsystems::memory::{ConversationSession, Speaker};

const IM_START: &str = "<|im_start|>";
const IM_END: &str = "<|im_end|>";
const ASSISTANT_MARKER: &str = "<|im_start|>assistant";

/// `<|...|>` control tokens and stray `<s>`/`</s>`.
static MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\|[^<>|]*\|>|</?s>").expect("markup regex"));

/// Real line breaks and their escaped (`\n`, `\r\n`) spellings, with the
/// whitespace around them.
static NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\s*(?:\\r\\n|\\n|\r?\n))+\s*").expect("newline regex"));

#[derive(Debug)]
pub struct HttpInferenceBackend {
    /// Carries the generation timeout. The probe sets its own per request.
    client: Client,
    endpoint: Url,
    model: String,
    sampling: SamplingParams,
    extra: Map<String, Value>,
    probe_timeout: Duration,
    chunk_delay: Duration,
    style: PromptStyle,
    lifecycle: Lifecycle,
}

impl HttpInferenceBackend {
    pub fn new(descriptor: &BackendDescriptor, style: PromptStyle) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(descriptor.timing.generate_timeout)
            .build()
            .map_err(|e| BackendError::Connectivity(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: descriptor.endpoint.clone(),
            model: descriptor.model_id.clone(),
            sampling: descriptor.sampling,
            extra: descriptor.extra.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            probe_timeout: descriptor.timing.probe_timeout,
            chunk_delay: descriptor.timing.chunk_delay,
            style,
            lifecycle: Lifecycle::new(),
        })
    }

    pub(crate) fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub(crate) fn chunk_delay(&self) -> Duration {
        self.chunk_delay
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.endpoint.as_str().trim_end_matches('/'))
    }

    pub async fn initialize(&self) -> Result<(), BackendError> {
        if !self.lifecycle.needs_init() {
            debug!(state = %self.lifecycle.state(), "backend already initialized");
            return Ok(());
        }
        match self.probe().await {
            Ok(()) => {
                info!(endpoint = %self.endpoint, model = %self.model, "inference server ready");
                self.lifecycle.mark_ready();
                Ok(())
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "inference server probe failed");
                self.lifecycle.mark_failed(e.to_string());
                Err(e)
            }
        }
    }

    pub async fn check_availability(&self) -> bool {
        self.probe().await.is_ok()
    }

    async fn probe(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .get(self.url("api/tags"))
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| BackendError::Connectivity(e.to_string()))?;
        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(BackendError::Protocol(format!("liveness probe returned HTTP {status}"))),
        }
    }

    pub async fn generate(&self, message: &str, context: &ConversationSession) -> Result<String, BackendError> {
        let _thinking = self.lifecycle.begin_generation()?;
        self.round_trip(message, context).await.map_err(|e| {
            error!(error = %e, "generation failed");
            BackendError::generation(e)
        })
    }

    async fn round_trip(&self, message: &str, context: &ConversationSession) -> Result<String, BackendError> {
        let mut options = Map::new();
        options.insert("temperature".into(), Value::from(self.sampling.temperature));
        options.insert("top_p".into(), Value::from(self.sampling.top_p));
        options.insert("top_k".into(), Value::from(self.sampling.top_k));
        for (k, v) in &self.extra {
            options.insert(k.clone(), v.clone());
        }

        let payload = GenerateRequest {
            model: &self.model,
            prompt: build_prompt(self.style, context, message),
            stream: false,
            options,
        };

        debug!(
            model = %payload.model,
            prompt_len = payload.prompt.len(),
            context_turns = context.len().min(self.style.context_turns),
            "sending generate request"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(&payload)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "full generate payload");
        }

        let response = self
            .client
            .post(self.url("api/generate"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!(endpoint = %self.endpoint, error = %e, timeout = e.is_timeout(), "generate request failed (transport)");
                BackendError::Connectivity(e.to_string())
            })?;

        let response = check_status(response).await?;

        let parsed = response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| BackendError::Protocol(format!("failed to parse response body: {e}")))?;

        let raw = parsed
            .response
            .ok_or_else(|| BackendError::Protocol("response body has no `response` field".into()))?;
        trace!(raw = %raw, "raw model output");

        Ok(clean_response(&raw, self.style.language))
    }
}

/// ChatML prompt: system persona, the last `context_turns` turns, the new
/// user message, then an open assistant segment for the model to complete.
pub fn build_prompt(style: PromptStyle, context: &ConversationSession, message: &str) -> String {
    let mut prompt = format!("{IM_START}system\n{}{IM_END}\n", style.language.persona());
    for turn in context.recent(style.context_turns) {
        let role = match turn.speaker() {
            Speaker::User => "user",
            Speaker::Assistant => "assistant",
        };
        prompt.push_str(&format!("{IM_START}{role}\n{}{IM_END}\n", turn.text().trim()));
    }
    prompt.push_str(&format!("{IM_START}user\n{}{IM_END}\n{ASSISTANT_MARKER}\n", message.trim()));
    prompt
}

/// Keep only what follows the last assistant marker, drop leftover markup,
/// fold newlines (real or escaped) into single spaces, trim. An empty result
/// becomes the language's fallback sentence.
pub fn clean_response(raw: &str, language: Language) -> String {
    let tail = match raw.rfind(ASSISTANT_MARKER) {
        Some(i) => &raw[i + ASSISTANT_MARKER.len()..],
        None => raw,
    };
    let no_markup = MARKUP.replace_all(tail, "");
    let one_line = NEWLINES.replace_all(&no_markup, " ");
    let cleaned = one_line.trim();
    if cleaned.is_empty() {
        language.empty_reply_fallback().to_string()
    } else {
        cleaned.to_string()
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Return the response if it is a 200, or a protocol error carrying the
/// server's message.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(b) => format!("HTTP {status}: {}", b.error),
        Err(_) => format!("HTTP {status}: {body}"),
    };

    error!(%status, %message, "generate request returned HTTP error");
    Err(BackendError::Protocol(message))
}

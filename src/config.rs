//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `ORCHID_LOG_LEVEL`, `ORCHID_LANGUAGE` and
//! `ORCHID_LLM_ENDPOINT` env overrides.

use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Ollama-style inference server settings (`[llm.ollama]`).
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Base URL; `/api/tags` and `/api/generate` are joined onto it.
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    /// Free-form options merged into the request's `options` object.
    pub extra: HashMap<String, Value>,
    pub probe_timeout_seconds: u64,
    pub generate_timeout_seconds: u64,
}

/// LLM subsystem configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which backend is active (`"ollama"`, `"echo"`, `"on-device"`).
    /// Maps to `default` in `[llm]`.
    pub provider: String,
    pub ollama: OllamaConfig,
    /// Pause between emulated stream chunks (`[stream] chunk_delay_ms`).
    pub chunk_delay_ms: u64,
}

/// `[memory]`: prompt window and compaction.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub context_turns: usize,
    pub compaction_threshold_tokens: usize,
    pub keep_turns: usize,
}

/// `[mailbox]`: where the demo mailbox comes from.
#[derive(Debug, Clone, Default)]
pub struct MailboxConfig {
    /// JSON array of mailbox records. Empty mailbox when `None`.
    pub fixture: Option<PathBuf>,
    /// Sender names recognized by the entity rule. Built-in list when `None`.
    pub entities: Option<Vec<String>>,
}

/// `[voice]`: text-to-speech of replies.
#[derive(Debug, Clone, Default)]
pub struct VoiceConfig {
    pub speak_replies: bool,
    /// Program invoked with the reply text as its only argument.
    pub speech_command: Option<String>,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub log_level: String,
    /// Raw language preference (`"fr"`, `"en-US"`, ...).
    pub language: Option<String>,
    pub llm: LlmConfig,
    pub memory: MemoryConfig,
    pub mailbox: MailboxConfig,
    pub voice: VoiceConfig,
}

/// Env-var overrides, passed explicitly so tests don't mutate the process env.
#[derive(Debug, Clone, Default)]
pub struct Overrides<'a> {
    pub log_level: Option<&'a str>,
    pub language: Option<&'a str>,
    pub llm_endpoint: Option<&'a str>,
}

/// Raw TOML shape, the `serde` target before resolution.
#[derive(Deserialize)]
struct RawConfig {
    assistant: RawAssistant,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    memory: RawMemory,
    #[serde(default)]
    stream: RawStream,
    #[serde(default)]
    mailbox: RawMailbox,
    #[serde(default)]
    voice: RawVoice,
}

#[derive(Deserialize)]
struct RawAssistant {
    #[serde(default = "default_name")]
    name: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Deserialize)]
struct RawLlm {
    /// Maps to `default = "..."` in `[llm]`.
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default)]
    ollama: RawOllama,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self { provider: default_llm_provider(), ollama: RawOllama::default() }
    }
}

#[derive(Deserialize)]
struct RawOllama {
    #[serde(default = "default_ollama_endpoint")]
    endpoint: String,
    #[serde(default = "default_ollama_model")]
    model: String,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_top_p")]
    top_p: f32,
    #[serde(default = "default_top_k")]
    top_k: u32,
    #[serde(default)]
    extra: HashMap<String, Value>,
    #[serde(default = "default_probe_timeout")]
    probe_timeout_seconds: u64,
    #[serde(default = "default_generate_timeout")]
    generate_timeout_seconds: u64,
}

impl Default for RawOllama {
    fn default() -> Self {
        Self {
            endpoint: default_ollama_endpoint(),
            model: default_ollama_model(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            extra: HashMap::new(),
            probe_timeout_seconds: default_probe_timeout(),
            generate_timeout_seconds: default_generate_timeout(),
        }
    }
}

#[derive(Deserialize)]
struct RawMemory {
    #[serde(default = "default_context_turns")]
    context_turns: usize,
    #[serde(default = "default_compaction_threshold")]
    compaction_threshold_tokens: usize,
    #[serde(default = "default_keep_turns")]
    keep_turns: usize,
}

impl Default for RawMemory {
    fn default() -> Self {
        Self {
            context_turns: default_context_turns(),
            compaction_threshold_tokens: default_compaction_threshold(),
            keep_turns: default_keep_turns(),
        }
    }
}

#[derive(Deserialize)]
struct RawStream {
    #[serde(default = "default_chunk_delay")]
    chunk_delay_ms: u64,
}

impl Default for RawStream {
    fn default() -> Self {
        Self { chunk_delay_ms: default_chunk_delay() }
    }
}

#[derive(Deserialize, Default)]
struct RawMailbox {
    #[serde(default)]
    fixture: Option<String>,
    #[serde(default)]
    entities: Option<Vec<String>>,
}

#[derive(Deserialize, Default)]
struct RawVoice {
    #[serde(default)]
    speak_replies: bool,
    #[serde(default)]
    speech_command: Option<String>,
}

fn default_name() -> String { "orchid".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_llm_provider() -> String { "ollama".to_string() }
fn default_ollama_endpoint() -> String { "http://localhost:11434".to_string() }
fn default_ollama_model() -> String { "qwen2.5:3b".to_string() }
fn default_temperature() -> f32 { 0.7 }
fn default_top_p() -> f32 { 0.9 }
fn default_top_k() -> u32 { 40 }
fn default_probe_timeout() -> u64 { 5 }
fn default_generate_timeout() -> u64 { 30 }
fn default_context_turns() -> usize { 3 }
fn default_compaction_threshold() -> usize { crate::subsystems::memory::session::DEFAULT_COMPACTION_THRESHOLD }
fn default_keep_turns() -> usize { crate::subsystems::memory::session::DEFAULT_KEEP_TURNS }
fn default_chunk_delay() -> u64 { 50 }

/// Load config from `path` (default `config/default.toml`), then apply
/// env-var overrides.
pub fn load(path: Option<&str>) -> Result<Config, AppError> {
    let log_level = env::var("ORCHID_LOG_LEVEL").ok();
    let language = env::var("ORCHID_LANGUAGE").ok();
    let llm_endpoint = env::var("ORCHID_LLM_ENDPOINT").ok();
    load_from(
        Path::new(path.unwrap_or(DEFAULT_CONFIG_PATH)),
        Overrides {
            log_level: log_level.as_deref(),
            language: language.as_deref(),
            llm_endpoint: llm_endpoint.as_deref(),
        },
    )
}

/// Load from an explicit path with explicit overrides.
pub fn load_from(path: &Path, overrides: Overrides<'_>) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let a = parsed.assistant;
    let o = parsed.llm.ollama;

    if parsed.memory.keep_turns == 0 {
        return Err(AppError::Config("memory.keep_turns must be at least 1".into()));
    }

    let log_level = overrides.log_level.map(str::to_string).unwrap_or(a.log_level);
    crate::logger::filter_for(&log_level)
        .map_err(|e| AppError::Config(format!("assistant.log_level: {e}")))?;

    // A relative fixture path is resolved against the config file's directory.
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let fixture = parsed.mailbox.fixture.map(|f| {
        let p = expand_home(&f);
        if p.is_absolute() { p } else { base.join(p) }
    });

    Ok(Config {
        name: a.name,
        log_level,
        language: overrides.language.map(str::to_string).or(a.language),
        llm: LlmConfig {
            provider: parsed.llm.provider,
            ollama: OllamaConfig {
                endpoint: overrides.llm_endpoint.map(str::to_string).unwrap_or(o.endpoint),
                model: o.model,
                temperature: o.temperature,
                top_p: o.top_p,
                top_k: o.top_k,
                extra: o.extra,
                probe_timeout_seconds: o.probe_timeout_seconds,
                generate_timeout_seconds: o.generate_timeout_seconds,
            },
            chunk_delay_ms: parsed.stream.chunk_delay_ms,
        },
        memory: MemoryConfig {
            context_turns: parsed.memory.context_turns,
            compaction_threshold_tokens: parsed.memory.compaction_threshold_tokens,
            keep_turns: parsed.memory.keep_turns,
        },
        mailbox: MailboxConfig { fixture, entities: parsed.mailbox.entities },
        voice: VoiceConfig {
            speak_replies: parsed.voice.speak_replies,
            speech_command: parsed.voice.speech_command.filter(|c| !c.trim().is_empty()),
        },
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// Echo backend, French, no mailbox fixture, no speech.
#[cfg(test)]
impl Config {
    pub fn test_default() -> Self {
        Self {
            name: "test".into(),
            log_level: "info".into(),
            language: Some("fr".into()),
            llm: LlmConfig {
                provider: "echo".into(),
                ollama: OllamaConfig {
                    endpoint: "http://localhost:0".into(),
                    model: "test-model".into(),
                    temperature: 0.0,
                    top_p: 1.0,
                    top_k: 1,
                    extra: HashMap::new(),
                    probe_timeout_seconds: 1,
                    generate_timeout_seconds: 1,
                },
                chunk_delay_ms: 0,
            },
            memory: MemoryConfig { context_turns: 3, compaction_threshold_tokens: 1500, keep_turns: 6 },
            mailbox: MailboxConfig::default(),
            voice: VoiceConfig::default(),
        }
    }
}

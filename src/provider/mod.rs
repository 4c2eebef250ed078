//! Model providers — uniform request/result shapes over interchangeable
//! generation backends.
//!
//! Supports:
//! - **Gemini**: primary family, vision-capable, history-aware
//! - **Groq**: fallback family, text-only (OpenAI-compatible API)
//!
//! Every provider call resolves to a classified [`ModelResult`]; providers
//! never surface transport errors to the caller.

pub mod chain;
pub mod gemini;
pub mod groq;

pub use chain::ProviderChain;
pub use gemini::GeminiProvider;
pub use groq::GroqProvider;

use async_trait::async_trait;

/// Role of a history turn handed to a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

/// One prior turn of conversation context.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

/// Kind of a single inbound media attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
}

/// An inbound media payload with its declared kind.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub kind: MediaKind,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// A generation request, constructed fresh per pipeline run.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: String,
    pub history: Vec<ChatTurn>,
    pub user_text: String,
    pub attachment: Option<Attachment>,
}

impl ModelRequest {
    /// The degraded-capability shape used for the fallback provider:
    /// system instructions plus user text only — no media, no history.
    pub fn degraded(&self) -> ModelRequest {
        ModelRequest {
            system: self.system.clone(),
            history: Vec::new(),
            user_text: self.user_text.clone(),
            attachment: None,
        }
    }
}

/// Classified outcome of a single provider invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelResult {
    Success { text: String },
    RateLimited,
    TransientError,
    FatalError { detail: String },
}

/// An interchangeable generation backend.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider identifier used in chain ordering and logs.
    fn name(&self) -> &str;

    /// Run one generation attempt, classifying the outcome.
    async fn generate(&self, request: &ModelRequest) -> ModelResult;
}

// ── Outcome classification ──────────────────────────────────────────

/// Classify an HTTP error status from a provider API.
///
/// 429 means quota/rate-limit exhaustion; 408 and 5xx are transient server
/// failures. Both advance the chain immediately — a person may be waiting on
/// the other end, so there is no backoff against the same provider.
pub(crate) fn classify_status(provider: &str, status: u16, body: &str) -> ModelResult {
    match status {
        429 => ModelResult::RateLimited,
        408 | 500 | 502 | 503 | 504 => ModelResult::TransientError,
        _ => ModelResult::FatalError {
            detail: format!("{provider}: HTTP {status}: {}", truncate(body, 300)),
        },
    }
}

/// Classify a transport-level failure (no HTTP response).
pub(crate) fn classify_transport(provider: &str, err: &reqwest::Error) -> ModelResult {
    if err.is_timeout() || err.is_connect() {
        ModelResult::TransientError
    } else {
        ModelResult::FatalError {
            detail: format!("{provider}: request failed: {err}"),
        }
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}

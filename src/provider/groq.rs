//! Groq provider — OpenAI-compatible chat completions, text-only.
//!
//! This is the degraded-capability fallback family: attachments are ignored
//! and the chain hands it a request without history.

use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::provider::{
    ChatRole, ModelProvider, ModelRequest, ModelResult, classify_status, classify_transport,
};

const API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

pub struct GroqProvider {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
}

impl GroqProvider {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: model.into(),
        }
    }
}

/// Build the chat-completions body. Any history present in the request is
/// mapped through; attachments are not representable here and are dropped.
fn request_body(model: &str, request: &ModelRequest) -> serde_json::Value {
    let mut messages = vec![serde_json::json!({
        "role": "system",
        "content": request.system,
    })];

    for turn in &request.history {
        let role = match turn.role {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        messages.push(serde_json::json!({ "role": role, "content": turn.content }));
    }

    messages.push(serde_json::json!({
        "role": "user",
        "content": request.user_text,
    }));

    serde_json::json!({
        "model": model,
        "messages": messages,
        "temperature": 0.7,
        "max_tokens": 1024,
    })
}

/// Pull the reply text out of a chat-completions response.
fn extract_text(response: &serde_json::Value) -> Option<String> {
    let text = response
        .get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?
        .as_str()?;

    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

#[async_trait::async_trait]
impl ModelProvider for GroqProvider {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ModelRequest) -> ModelResult {
        if request.attachment.is_some() {
            debug!(provider = %self.model, "Attachment dropped (text-only backend)");
        }

        let response = self
            .client
            .post(API_URL)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&request_body(&self.model, request))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => return classify_transport(&self.model, &e),
        };

        let status = response.status();
        let raw = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return classify_status(&self.model, status.as_u16(), &raw);
        }

        let parsed: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                return ModelResult::FatalError {
                    detail: format!("{}: response decode failed: {e}", self.model),
                };
            }
        };

        match extract_text(&parsed) {
            Some(text) => ModelResult::Success { text },
            None => ModelResult::FatalError {
                detail: format!("{}: no message content in response", self.model),
            },
        }
    }
}

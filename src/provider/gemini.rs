//! Gemini provider — `generateContent` over the Generative Language API.
//!
//! Text turns go out history-aware with a `system_instruction` block; a media
//! attachment switches to a single-shot call carrying the payload as inline
//! base64 data (no history).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::provider::{
    ChatRole, ModelProvider, ModelRequest, ModelResult, classify_status, classify_transport,
};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// One Gemini model behind the uniform provider contract.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
}

impl GeminiProvider {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: model.into(),
        }
    }

    fn url(&self) -> String {
        format!("{API_BASE}/{}:generateContent", self.model)
    }
}

/// Build the JSON body for a generation request.
fn request_body(request: &ModelRequest) -> serde_json::Value {
    let mut contents: Vec<serde_json::Value> = Vec::new();

    if let Some(ref attachment) = request.attachment {
        // Single-shot media call: attachment plus user text, no history.
        contents.push(serde_json::json!({
            "role": "user",
            "parts": [
                {
                    "inline_data": {
                        "mime_type": attachment.mime_type,
                        "data": BASE64.encode(&attachment.data),
                    }
                },
                { "text": request.user_text },
            ]
        }));
    } else {
        for turn in &request.history {
            let role = match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "model",
            };
            contents.push(serde_json::json!({
                "role": role,
                "parts": [{ "text": turn.content }]
            }));
        }
        contents.push(serde_json::json!({
            "role": "user",
            "parts": [{ "text": request.user_text }]
        }));
    }

    serde_json::json!({
        "system_instruction": { "parts": [{ "text": request.system }] },
        "contents": contents,
    })
}

/// Pull the reply text out of a `generateContent` response.
fn extract_text(response: &serde_json::Value) -> Option<String> {
    let parts = response
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(serde_json::Value::as_str))
        .collect::<Vec<_>>()
        .join("\n");

    if text.is_empty() { None } else { Some(text) }
}

#[async_trait::async_trait]
impl ModelProvider for GeminiProvider {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ModelRequest) -> ModelResult {
        let body = request_body(request);
        debug!(
            provider = %self.model,
            media = request.attachment.is_some(),
            history_turns = request.history.len(),
            "Gemini request"
        );

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
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
            // A 200 with no candidate text (e.g. safety block) is not worth
            // retrying on the same provider either.
            None => ModelResult::FatalError {
                detail: format!("{}: no candidate text in response", self.model),
            },
        }
    }
}

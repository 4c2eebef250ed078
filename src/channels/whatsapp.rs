//! WhatsApp Cloud API channel (Meta Graph API).
//!
//! Covers outbound text sends, media downloads (two-step: resolve the media
//! id to a CDN URL, then fetch the bytes), startup credential validation,
//! and parsing of inbound webhook payloads.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{error, warn};

use crate::channels::{FetchedMedia, InboundMedia, InboundMessage, MediaSource, OutboundSender};
use crate::error::ChannelError;
use crate::provider::MediaKind;

const GRAPH_BASE: &str = "https://graph.facebook.com/v18.0";
const CHANNEL: &str = "whatsapp";

pub struct WhatsAppChannel {
    client: reqwest::Client,
    access_token: SecretString,
    phone_number_id: String,
}

impl WhatsAppChannel {
    pub fn new(access_token: SecretString, phone_number_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token,
            phone_number_id: phone_number_id.into(),
        }
    }

    fn messages_url(&self) -> String {
        format!("{GRAPH_BASE}/{}/messages", self.phone_number_id)
    }

    fn media_url(media_id: &str) -> String {
        format!("{GRAPH_BASE}/{media_id}")
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.expose_secret())
    }

    /// Verify the access token against the business phone number object.
    /// Called once at startup so a dead token fails loudly instead of
    /// silently dropping every outbound send.
    pub async fn validate_token(&self) -> Result<(), ChannelError> {
        let response = self
            .client
            .get(format!("{GRAPH_BASE}/{}", self.phone_number_id))
            .header("Authorization", self.bearer())
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                channel: CHANNEL.into(),
                reason: e.to_string(),
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::AuthFailed {
                channel: CHANNEL.into(),
            })
        }
    }
}

#[async_trait]
impl OutboundSender for WhatsAppChannel {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), ChannelError> {
        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": body },
        });

        let response = self
            .client
            .post(self.messages_url())
            .header("Authorization", self.bearer())
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                channel: CHANNEL.into(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        if status.as_u16() == 401 || status.as_u16() == 403 {
            error!("WhatsApp rejected the access token on send");
            return Err(ChannelError::AuthFailed {
                channel: CHANNEL.into(),
            });
        }

        let detail = response.text().await.unwrap_or_default();
        Err(ChannelError::SendFailed {
            channel: CHANNEL.into(),
            reason: format!("HTTP {status}: {}", crate::provider::truncate(&detail, 300)),
        })
    }
}

#[derive(Deserialize)]
struct MediaDescriptor {
    url: String,
    #[serde(default)]
    mime_type: Option<String>,
}

#[async_trait]
impl MediaSource for WhatsAppChannel {
    async fn fetch_media(&self, media_id: &str) -> Result<FetchedMedia, ChannelError> {
        let fetch_err = |reason: String| ChannelError::MediaFetch { reason };

        // Step one: resolve the media id into a short-lived CDN URL.
        let descriptor = self
            .client
            .get(Self::media_url(media_id))
            .header("Authorization", self.bearer())
            .send()
            .await
            .map_err(|e| fetch_err(format!("media lookup failed: {e}")))?;

        if !descriptor.status().is_success() {
            return Err(fetch_err(format!(
                "media lookup returned HTTP {}",
                descriptor.status()
            )));
        }

        let descriptor: MediaDescriptor = descriptor
            .json()
            .await
            .map_err(|e| fetch_err(format!("media descriptor decode failed: {e}")))?;

        // Step two: the CDN URL itself also requires the bearer token.
        let download = self
            .client
            .get(&descriptor.url)
            .header("Authorization", self.bearer())
            .send()
            .await
            .map_err(|e| fetch_err(format!("media download failed: {e}")))?;

        if !download.status().is_success() {
            return Err(fetch_err(format!(
                "media download returned HTTP {}",
                download.status()
            )));
        }

        let mime_type = descriptor
            .mime_type
            .unwrap_or_else(|| "application/octet-stream".into());
        let data = download
            .bytes()
            .await
            .map_err(|e| fetch_err(format!("media body read failed: {e}")))?
            .to_vec();

        Ok(FetchedMedia { mime_type, data })
    }
}

/// Extract the inbound messages from a webhook delivery.
///
/// A delivery can carry several entries and changes; statuses and unsupported
/// message types are skipped. Returns an empty vec for deliveries that carry
/// no user messages (read receipts etc.), which is normal traffic.
pub fn parse_webhook(payload: &serde_json::Value) -> Vec<InboundMessage> {
    let mut inbound = Vec::new();

    let entries = payload
        .get("entry")
        .and_then(serde_json::Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for entry in entries {
        let changes = entry
            .get("changes")
            .and_then(serde_json::Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for change in changes {
            let messages = change
                .pointer("/value/messages")
                .and_then(serde_json::Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();

            for message in messages {
                match parse_message(message) {
                    Some(m) => inbound.push(m),
                    None => {
                        warn!(
                            kind = message.get("type").and_then(|t| t.as_str()).unwrap_or("?"),
                            "Skipping unsupported inbound message"
                        );
                    }
                }
            }
        }
    }

    inbound
}

fn parse_message(message: &serde_json::Value) -> Option<InboundMessage> {
    let from = message.get("from")?.as_str()?.to_string();
    let kind = message.get("type")?.as_str()?;

    let text_at = |pointer: &str| {
        message
            .pointer(pointer)
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let id_at = |pointer: &str| {
        message
            .pointer(pointer)
            .and_then(serde_json::Value::as_str)
            .map(String::from)
    };

    match kind {
        "text" => Some(InboundMessage {
            from,
            text: text_at("/text/body"),
            media: None,
        }),
        "image" => Some(InboundMessage {
            from,
            text: text_at("/image/caption"),
            media: id_at("/image/id").map(|id| InboundMedia {
                kind: MediaKind::Image,
                id,
            }),
        }),
        "audio" => Some(InboundMessage {
            from,
            text: String::new(),
            media: id_at("/audio/id").map(|id| InboundMedia {
                kind: MediaKind::Audio,
                id,
            }),
        }),
        _ => None,
    }
}

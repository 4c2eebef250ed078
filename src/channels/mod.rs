//! Messaging channels: inbound webhook payloads in, replies out.

pub mod whatsapp;

pub use whatsapp::WhatsAppChannel;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::provider::MediaKind;

/// One normalized inbound message from a channel webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Sender phone number in international digits form.
    pub from: String,
    /// Message text, or the caption of a media message (may be empty).
    pub text: String,
    /// Channel-side id of an attached image or audio clip.
    pub media: Option<InboundMedia>,
}

/// Reference to a media object still living on the channel's servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMedia {
    pub kind: MediaKind,
    pub id: String,
}

/// Downloaded media bytes with their declared MIME type.
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Sends text messages back out over a channel.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), ChannelError>;
}

/// Resolves media ids into downloaded bytes.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn fetch_media(&self, media_id: &str) -> Result<FetchedMedia, ChannelError>;
}

//! Arogya — a WhatsApp health-assistant backend.
//!
//! Inbound messages arrive on a Meta webhook, flow through a per-user
//! conversation state machine, get answered by an ordered chain of AI
//! providers, and come back out over the WhatsApp Cloud API. A background
//! sweep delivers scheduled medicine reminders.

pub mod channels;
pub mod config;
pub mod directive;
pub mod error;
pub mod pipeline;
pub mod provider;
pub mod server;
pub mod store;
pub mod sweep;

pub use error::{Error, Result};

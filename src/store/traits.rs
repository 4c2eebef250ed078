//! `ConversationStore` — the narrow async interface over persistence.
//!
//! The pipeline and the sweep only ever talk to this trait; the libSQL
//! backend is the one production implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::store::model::{ProfilePatch, Reminder, Role, Turn, User};

/// Backend-agnostic store covering users, conversation history, and reminders.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    // ── Users ───────────────────────────────────────────────────────

    /// Look up a user by phone number.
    async fn get_user(&self, phone: &str) -> Result<Option<User>, StoreError>;

    /// Create a user with the given display name.
    async fn create_user(&self, phone: &str, name: &str) -> Result<(), StoreError>;

    /// Set a user's display name.
    async fn set_user_name(&self, phone: &str, name: &str) -> Result<(), StoreError>;

    /// Merge a partial profile update into the stored profile.
    /// Fields absent from the patch are left untouched.
    async fn update_profile(&self, phone: &str, patch: &ProfilePatch) -> Result<(), StoreError>;

    // ── Conversation history ────────────────────────────────────────

    /// The most recent `limit` turns for a user, in chronological order.
    async fn recent_turns(&self, phone: &str, limit: usize) -> Result<Vec<Turn>, StoreError>;

    /// Append one turn to a user's history.
    async fn append_turn(&self, phone: &str, role: Role, content: &str)
    -> Result<(), StoreError>;

    // ── Reminders ───────────────────────────────────────────────────

    /// Persist a new pending reminder.
    async fn create_reminder(
        &self,
        phone: &str,
        remind_at: DateTime<Utc>,
        message: &str,
    ) -> Result<(), StoreError>;

    /// All pending reminders scheduled at or before `now`.
    async fn due_pending_reminders(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>, StoreError>;

    /// Transition a reminder to sent. The transition is one-way.
    async fn mark_reminder_sent(&self, id: &str) -> Result<(), StoreError>;
}

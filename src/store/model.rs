//! Domain model: users, conversation turns, reminders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Sentinel name for users that have not completed onboarding.
///
/// Deliberately not a plausible human name: state derivation keys off this
/// exact value, so a user actually named "Pending" must not be misclassified.
pub const NAME_PENDING: &str = "__pending__";

/// A registered user, keyed by phone number.
#[derive(Debug, Clone)]
pub struct User {
    pub phone: String,
    pub name: String,
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub blood_group: Option<String>,
    pub allergies: Option<String>,
    pub medical_history: Option<String>,
    pub emergency_contact: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Conversation state, derived from stored fields at load time.
///
/// This derivation is the single source of truth — no state column is
/// persisted, so a crash mid-turn simply re-derives the same state on the
/// next inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    /// No stored user yet: first contact.
    Onboarding,
    /// User exists but the name field still holds the onboarding sentinel.
    NameCapture,
    /// Onboarding complete; normal pipeline flow.
    Active,
}

impl UserState {
    /// Derive the conversation state from a (possibly absent) stored user.
    pub fn of(user: Option<&User>) -> Self {
        match user {
            None => UserState::Onboarding,
            Some(u) if u.name == NAME_PENDING => UserState::NameCapture,
            Some(_) => UserState::Active,
        }
    }
}

/// Who authored a stored turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

/// One stored message in a conversation history. Immutable once persisted.
#[derive(Debug, Clone)]
pub struct Turn {
    pub id: String,
    pub phone: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Delivery status of a reminder. Transitions Pending → Sent only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderStatus {
    Pending,
    Sent,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Pending => "pending",
            ReminderStatus::Sent => "sent",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => ReminderStatus::Sent,
            _ => ReminderStatus::Pending,
        }
    }
}

/// A scheduled reminder owned by a user.
#[derive(Debug, Clone)]
pub struct Reminder {
    pub id: String,
    pub phone: String,
    pub remind_at: DateTime<Utc>,
    pub message: String,
    pub status: ReminderStatus,
    pub created_at: DateTime<Utc>,
}

/// Partial profile update: only present fields are written.
///
/// This is the payload schema of the profile-update directive; unknown keys
/// in the payload are ignored.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ProfilePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub age: Option<i64>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub blood_group: Option<String>,
    #[serde(default)]
    pub allergies: Option<String>,
    #[serde(default)]
    pub medical_history: Option<String>,
    #[serde(default)]
    pub emergency_contact: Option<String>,
}

impl ProfilePatch {
    /// True if no field is set (nothing to write).
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.age.is_none()
            && self.gender.is_none()
            && self.blood_group.is_none()
            && self.allergies.is_none()
            && self.medical_history.is_none()
            && self.emergency_contact.is_none()
    }
}

/// Models sometimes emit ages as strings ("32"); accept both.
fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> User {
        User {
            phone: "919876543210".into(),
            name: name.into(),
            age: None,
            gender: None,
            blood_group: None,
            allergies: None,
            medical_history: None,
            emergency_contact: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn state_onboarding_when_no_user() {
        assert_eq!(UserState::of(None), UserState::Onboarding);
    }

    #[test]
    fn state_name_capture_on_sentinel() {
        let u = user(NAME_PENDING);
        assert_eq!(UserState::of(Some(&u)), UserState::NameCapture);
    }

    #[test]
    fn state_active_on_real_name() {
        let u = user("Asha");
        assert_eq!(UserState::of(Some(&u)), UserState::Active);
    }

    #[test]
    fn role_round_trip() {
        assert_eq!(Role::parse(Role::User.as_str()), Role::User);
        assert_eq!(Role::parse(Role::Assistant.as_str()), Role::Assistant);
        // Unknown role strings default to user rather than failing the read.
        assert_eq!(Role::parse("model"), Role::User);
    }

    #[test]
    fn reminder_status_round_trip() {
        assert_eq!(
            ReminderStatus::parse(ReminderStatus::Sent.as_str()),
            ReminderStatus::Sent
        );
        assert_eq!(ReminderStatus::parse("garbage"), ReminderStatus::Pending);
    }

    #[test]
    fn profile_patch_ignores_unknown_keys() {
        let patch: ProfilePatch =
            serde_json::from_str(r#"{"age": 34, "favourite_color": "blue"}"#).unwrap();
        assert_eq!(patch.age, Some(34));
        assert!(patch.gender.is_none());
    }

    #[test]
    fn profile_patch_age_accepts_string() {
        let patch: ProfilePatch = serde_json::from_str(r#"{"age": "41"}"#).unwrap();
        assert_eq!(patch.age, Some(41));
    }

    #[test]
    fn profile_patch_empty() {
        let patch: ProfilePatch = serde_json::from_str("{}").unwrap();
        assert!(patch.is_empty());
        let patch: ProfilePatch =
            serde_json::from_str(r#"{"emergency_contact": "919900112233"}"#).unwrap();
        assert!(!patch.is_empty());
    }
}

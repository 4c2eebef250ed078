//! libSQL backend — async `ConversationStore` implementation.
//!
//! Supports local file and in-memory databases. Timestamps are stored as
//! RFC 3339 TEXT; ids are uuid v4 TEXT.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::model::{ProfilePatch, Reminder, ReminderStatus, Role, Turn, User};
use crate::store::traits::ConversationStore;

/// libSQL conversation store.
///
/// Stores a single connection reused for all operations; `libsql::Connection`
/// is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and initialize the schema.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Open(format!("Failed to create database directory: {e}")))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    phone TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    age INTEGER,
                    gender TEXT,
                    blood_group TEXT,
                    allergies TEXT,
                    medical_history TEXT,
                    emergency_contact TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS turns (
                    id TEXT PRIMARY KEY,
                    phone TEXT NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_turns_phone ON turns(phone, created_at);

                CREATE TABLE IF NOT EXISTS reminders (
                    id TEXT PRIMARY KEY,
                    phone TEXT NOT NULL,
                    remind_at TEXT NOT NULL,
                    message TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_reminders_status ON reminders(status, remind_at);",
            )
            .await
            .map_err(|e| StoreError::Query(format!("Schema init failed: {e}")))?;
        Ok(())
    }
}

// ── Row mapping helpers ─────────────────────────────────────────────

/// Parse an RFC 3339 timestamp written by this store.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::MIN_UTC)
}

fn query_err(e: libsql::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

fn row_to_user(row: &libsql::Row) -> Result<User, libsql::Error> {
    let created_str: String = row.get(8)?;
    Ok(User {
        phone: row.get(0)?,
        name: row.get(1)?,
        age: row.get::<i64>(2).ok(),
        gender: row.get::<String>(3).ok(),
        blood_group: row.get::<String>(4).ok(),
        allergies: row.get::<String>(5).ok(),
        medical_history: row.get::<String>(6).ok(),
        emergency_contact: row.get::<String>(7).ok(),
        created_at: parse_datetime(&created_str),
    })
}

fn opt_text(value: &Option<String>) -> libsql::Value {
    match value {
        Some(s) => libsql::Value::Text(s.clone()),
        None => libsql::Value::Null,
    }
}

fn row_to_turn(row: &libsql::Row) -> Result<Turn, libsql::Error> {
    let role_str: String = row.get(2)?;
    let created_str: String = row.get(4)?;
    Ok(Turn {
        id: row.get(0)?,
        phone: row.get(1)?,
        role: Role::parse(&role_str),
        content: row.get(3)?,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_reminder(row: &libsql::Row) -> Result<Reminder, libsql::Error> {
    let remind_str: String = row.get(2)?;
    let status_str: String = row.get(4)?;
    let created_str: String = row.get(5)?;
    Ok(Reminder {
        id: row.get(0)?,
        phone: row.get(1)?,
        remind_at: parse_datetime(&remind_str),
        message: row.get(3)?,
        status: ReminderStatus::parse(&status_str),
        created_at: parse_datetime(&created_str),
    })
}

const USER_COLUMNS: &str = "phone, name, age, gender, blood_group, allergies, \
                            medical_history, emergency_contact, created_at";

#[async_trait]
impl ConversationStore for LibSqlStore {
    async fn get_user(&self, phone: &str) -> Result<Option<User>, StoreError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE phone = ?1"),
                params![phone],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_user(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn create_user(&self, phone: &str, name: &str) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO users (phone, name, created_at) VALUES (?1, ?2, ?3)",
                params![phone, name, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(query_err)?;
        debug!(phone = phone, "User created");
        Ok(())
    }

    async fn set_user_name(&self, phone: &str, name: &str) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE users SET name = ?1 WHERE phone = ?2",
                params![name, phone],
            )
            .await
            .map_err(query_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "user".into(),
                id: phone.into(),
            });
        }
        Ok(())
    }

    async fn update_profile(&self, phone: &str, patch: &ProfilePatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }

        let age: libsql::Value = match patch.age {
            Some(a) => libsql::Value::Integer(a),
            None => libsql::Value::Null,
        };

        // COALESCE keeps existing values for fields absent from the patch.
        let changed = self
            .conn
            .execute(
                "UPDATE users SET
                    name = COALESCE(?1, name),
                    age = COALESCE(?2, age),
                    gender = COALESCE(?3, gender),
                    blood_group = COALESCE(?4, blood_group),
                    allergies = COALESCE(?5, allergies),
                    medical_history = COALESCE(?6, medical_history),
                    emergency_contact = COALESCE(?7, emergency_contact)
                 WHERE phone = ?8",
                params![
                    opt_text(&patch.name),
                    age,
                    opt_text(&patch.gender),
                    opt_text(&patch.blood_group),
                    opt_text(&patch.allergies),
                    opt_text(&patch.medical_history),
                    opt_text(&patch.emergency_contact),
                    phone,
                ],
            )
            .await
            .map_err(query_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "user".into(),
                id: phone.into(),
            });
        }
        debug!(phone = phone, "Profile updated");
        Ok(())
    }

    async fn recent_turns(&self, phone: &str, limit: usize) -> Result<Vec<Turn>, StoreError> {
        // Most recent N, then reversed to chronological order. rowid breaks
        // ties between turns written within the same timestamp.
        let mut rows = self
            .conn
            .query(
                "SELECT id, phone, role, content, created_at FROM turns
                 WHERE phone = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
                params![phone, limit as i64],
            )
            .await
            .map_err(query_err)?;

        let mut turns = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            turns.push(row_to_turn(&row).map_err(query_err)?);
        }
        turns.reverse();
        Ok(turns)
    }

    async fn append_turn(
        &self,
        phone: &str,
        role: Role,
        content: &str,
    ) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO turns (id, phone, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    phone,
                    role.as_str(),
                    content,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn create_reminder(
        &self,
        phone: &str,
        remind_at: DateTime<Utc>,
        message: &str,
    ) -> Result<(), StoreError> {
        let id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO reminders (id, phone, remind_at, message, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
                params![
                    id.clone(),
                    phone,
                    remind_at.to_rfc3339(),
                    message,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        debug!(id = %id, phone = phone, remind_at = %remind_at, "Reminder created");
        Ok(())
    }

    async fn due_pending_reminders(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reminder>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, phone, remind_at, message, status, created_at FROM reminders
                 WHERE status = 'pending' AND remind_at <= ?1
                 ORDER BY remind_at ASC",
                params![now.to_rfc3339()],
            )
            .await
            .map_err(query_err)?;

        let mut reminders = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            reminders.push(row_to_reminder(&row).map_err(query_err)?);
        }
        Ok(reminders)
    }

    async fn mark_reminder_sent(&self, id: &str) -> Result<(), StoreError> {
        // Guarded on status so the transition stays one-way.
        let changed = self
            .conn
            .execute(
                "UPDATE reminders SET status = 'sent' WHERE id = ?1 AND status = 'pending'",
                params![id],
            )
            .await
            .map_err(query_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "pending reminder".into(),
                id: id.into(),
            });
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

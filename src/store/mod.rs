//! Persistence layer — conversation store trait and libSQL backend.

pub mod libsql;
pub mod model;
pub mod traits;

pub use libsql::LibSqlStore;
pub use model::{
    NAME_PENDING, ProfilePatch, Reminder, ReminderStatus, Role, Turn, User, UserState,
};
pub use traits::ConversationStore;

//! Background reminder sweep.
//!
//! A fixed-interval task that drains due pending reminders and delivers
//! them. A reminder is marked sent only after a successful delivery, so a
//! send failure leaves it pending for the next pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::channels::OutboundSender;
use crate::store::ConversationStore;

pub struct ReminderSweep {
    store: Arc<dyn ConversationStore>,
    sender: Arc<dyn OutboundSender>,
}

impl ReminderSweep {
    pub fn new(store: Arc<dyn ConversationStore>, sender: Arc<dyn OutboundSender>) -> Self {
        Self { store, sender }
    }

    /// One sweep pass: deliver everything due at `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) {
        let due = match self.store.due_pending_reminders(now).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Reminder query failed, skipping pass");
                return;
            }
        };

        for reminder in due {
            // The owning user must still exist; an orphan stays pending and
            // keeps being logged rather than silently disappearing.
            match self.store.get_user(&reminder.phone).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!(id = %reminder.id, phone = %reminder.phone, "Reminder owner not found");
                    continue;
                }
                Err(e) => {
                    error!(id = %reminder.id, error = %e, "Owner lookup failed");
                    continue;
                }
            }

            let body = format!("⏰ Reminder: {}", reminder.message);
            if let Err(e) = self.sender.send_text(&reminder.phone, &body).await {
                warn!(id = %reminder.id, error = %e, "Reminder delivery failed, will retry");
                continue;
            }

            match self.store.mark_reminder_sent(&reminder.id).await {
                Ok(()) => info!(id = %reminder.id, phone = %reminder.phone, "Reminder delivered"),
                Err(e) => error!(id = %reminder.id, error = %e, "Failed to mark reminder sent"),
            }
        }
    }
}

/// Spawn the periodic sweep loop. The first tick fires immediately.
pub fn spawn_sweep_task(sweep: Arc<ReminderSweep>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            sweep.sweep(Utc::now()).await;
        }
    })
}

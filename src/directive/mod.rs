//! Directive extraction from model output.
//!
//! The model is instructed to embed structured directives in its reply using
//! double-bracket markers. This module strips them out of the user-visible
//! text and parses their payloads:
//!
//! - `[[UPDATE_PROFILE: {json object}]]`
//! - `[[SCHEDULE_REMINDERS: [json array]]]`
//! - `[[SOS]]`

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::store::ProfilePatch;

const UPDATE_PROFILE_OPEN: &str = "[[UPDATE_PROFILE:";
const SCHEDULE_REMINDERS_OPEN: &str = "[[SCHEDULE_REMINDERS:";
const SOS_MARKER: &str = "[[SOS]]";

/// One reminder the model asked to schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderSpec {
    pub remind_at: DateTime<Utc>,
    pub message: String,
}

/// A parsed directive lifted out of model output.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    ProfileUpdate(ProfilePatch),
    ReminderBatch(Vec<ReminderSpec>),
    Sos,
}

/// Model output split into user-visible text and extracted directives.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub text: String,
    pub directives: Vec<Directive>,
}

#[derive(Debug, Deserialize)]
struct RawReminder {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    time: Option<String>,
}

/// Parse a directive timestamp. Accepts RFC 3339, or a naive
/// `YYYY-MM-DDTHH:MM:SS` which is taken to be UTC.
fn parse_remind_at(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Find the closing `]]` of a payload marker, starting at `from`.
///
/// The close is the first `]]` that is not followed by another `]`. This
/// keeps a JSON array payload intact: in `[[SCHEDULE_REMINDERS: [..]]]` the
/// first two closing brackets belong to the JSON, not the marker.
fn find_close(text: &str, from: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = from;
    while let Some(offset) = text[i..].find("]]") {
        let pos = i + offset;
        if bytes.get(pos + 2) != Some(&b']') {
            return Some(pos);
        }
        i = pos + 1;
    }
    None
}

/// Strip and parse all directives out of model output.
///
/// Malformed payloads are stripped from the text but produce no directive.
/// When the same directive kind appears more than once, the first parseable
/// occurrence wins; every occurrence is stripped. A marker with no closing
/// `]]` is left in the text verbatim.
pub fn extract(output: &str) -> Extraction {
    let mut text = output.to_string();
    let mut directives: Vec<Directive> = Vec::new();
    let mut profile: Option<ProfilePatch> = None;
    let mut reminders: Option<Vec<ReminderSpec>> = None;
    let mut sos = false;

    loop {
        let Some((open, start)) = [UPDATE_PROFILE_OPEN, SCHEDULE_REMINDERS_OPEN]
            .iter()
            .filter_map(|open| text.find(open).map(|at| (*open, at)))
            .min_by_key(|&(_, at)| at)
        else {
            break;
        };

        let payload_start = start + open.len();
        let Some(close) = find_close(&text, payload_start) else {
            // Unclosed marker: leave the tail as-is and stop scanning.
            break;
        };

        let payload = text[payload_start..close].trim().to_string();
        text.replace_range(start..close + 2, "");

        match open {
            UPDATE_PROFILE_OPEN => match serde_json::from_str::<ProfilePatch>(&payload) {
                Ok(patch) if profile.is_none() => profile = Some(patch),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Dropping malformed profile directive"),
            },
            SCHEDULE_REMINDERS_OPEN => match serde_json::from_str::<Vec<RawReminder>>(&payload) {
                Ok(raw) => {
                    if reminders.is_none() {
                        reminders = Some(parse_reminder_entries(raw));
                    }
                }
                Err(e) => warn!(error = %e, "Dropping malformed reminder directive"),
            },
            _ => unreachable!(),
        }
    }

    while let Some(at) = text.find(SOS_MARKER) {
        text.replace_range(at..at + SOS_MARKER.len(), "");
        sos = true;
    }

    if let Some(patch) = profile {
        directives.push(Directive::ProfileUpdate(patch));
    }
    if let Some(specs) = reminders {
        directives.push(Directive::ReminderBatch(specs));
    }
    if sos {
        directives.push(Directive::Sos);
    }

    Extraction {
        text: text.trim().to_string(),
        directives,
    }
}

/// Validate each entry independently. Entries missing a message or carrying
/// an unparseable time are skipped; the rest go through.
fn parse_reminder_entries(raw: Vec<RawReminder>) -> Vec<ReminderSpec> {
    raw.into_iter()
        .filter_map(|entry| {
            let message = match entry.message {
                Some(m) if !m.trim().is_empty() => m,
                _ => {
                    warn!("Skipping reminder entry without a message");
                    return None;
                }
            };
            let time = entry.time?;
            match parse_remind_at(&time) {
                Some(remind_at) => Some(ReminderSpec { remind_at, message }),
                None => {
                    warn!(time = %time, "Skipping reminder entry with unparseable time");
                    None
                }
            }
        })
        .collect()
}

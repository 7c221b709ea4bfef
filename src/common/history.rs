//! History log parsing: one latest-activity record per session id.

use crate::common::tail::{read_tail_window, TailWindow};
use crate::common::types::{dedup_key, truncate_chars};
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Preview length kept from a user message
pub const PREVIEW_CHARS: usize = 120;

/// Numeric timestamps above this are already milliseconds
const MILLIS_THRESHOLD: f64 = 1e12;

/// Latest known activity of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub session_id: String,
    pub project_path: String,
    /// unix ms
    pub first_activity_at: i64,
    /// unix ms
    pub last_activity_at: i64,
    pub last_user_message: String,
}

impl HistoryRecord {
    pub fn dedup_key(&self) -> &str {
        dedup_key(&self.project_path, &self.session_id)
    }
}

/// One line of `history.jsonl`. Producers disagree on field names, so every
/// field is optional and resolved through a fallback chain.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryLine {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    project_path: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    display: Option<String>,
    #[serde(default)]
    message: Option<HistoryMessage>,
}

#[derive(Debug, Deserialize)]
struct HistoryMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<Value>,
}

impl HistoryLine {
    fn project(&self) -> &str {
        [&self.project, &self.project_path, &self.cwd]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .find(|p| !p.is_empty())
            .unwrap_or("")
    }

    fn preview(&self) -> Option<String> {
        if let Some(display) = self.display.as_deref().filter(|d| !d.is_empty()) {
            return Some(truncate_chars(display, PREVIEW_CHARS));
        }
        let message = self.message.as_ref()?;
        if message.role.as_deref() != Some("user") {
            return None;
        }
        let text = match message.content.as_ref()? {
            Value::String(s) => s.as_str(),
            Value::Array(blocks) => blocks.iter().find_map(|b| {
                (b.get("type").and_then(Value::as_str) == Some("text"))
                    .then(|| b.get("text").and_then(Value::as_str))
                    .flatten()
            })?,
            _ => return None,
        };
        (!text.is_empty()).then(|| truncate_chars(text, PREVIEW_CHARS))
    }
}

/// Convert a history timestamp to unix ms.
///
/// Numbers are disambiguated by magnitude (seconds vs milliseconds); strings
/// are parsed as RFC 3339, or as a naive UTC date-time.
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    let ms = match value {
        Value::Number(n) => {
            let raw = n.as_f64()?;
            if raw > MILLIS_THRESHOLD {
                raw as i64
            } else {
                (raw * 1000.0) as i64
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                dt.timestamp_millis()
            } else {
                ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                    .iter()
                    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())?
                    .and_utc()
                    .timestamp_millis()
            }
        }
        _ => return None,
    };
    (ms > 0).then_some(ms)
}

/// Fold one record into the per-session map.
///
/// Log order is not monotonic: the newest timestamp wins `last_activity_at`,
/// the oldest wins `first_activity_at`. A record at or after the current
/// latest also replaces the preview and project path when it has them; an
/// older one only fills gaps.
fn fold_record(
    map: &mut HashMap<String, HistoryRecord>,
    session_id: &str,
    project: &str,
    timestamp: i64,
    preview: Option<String>,
) {
    let Some(existing) = map.get_mut(session_id) else {
        map.insert(
            session_id.to_string(),
            HistoryRecord {
                session_id: session_id.to_string(),
                project_path: project.to_string(),
                first_activity_at: timestamp,
                last_activity_at: timestamp,
                last_user_message: preview.unwrap_or_default(),
            },
        );
        return;
    };

    if timestamp >= existing.last_activity_at {
        existing.last_activity_at = timestamp;
        if !project.is_empty() {
            existing.project_path = project.to_string();
        }
        if let Some(preview) = preview {
            existing.last_user_message = preview;
        }
    } else {
        if existing.project_path.is_empty() && !project.is_empty() {
            existing.project_path = project.to_string();
        }
        if existing.last_user_message.is_empty() {
            if let Some(preview) = preview {
                existing.last_user_message = preview;
            }
        }
    }
    existing.first_activity_at = existing.first_activity_at.min(timestamp);
}

/// Parse a tail window of the history log
pub fn parse_history(window: &TailWindow) -> HashMap<String, HistoryRecord> {
    let mut sessions = HashMap::new();
    let mut skipped = 0usize;

    for line in window.complete_lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(entry) = serde_json::from_str::<HistoryLine>(line) else {
            skipped += 1;
            continue;
        };
        let Some(session_id) = entry.session_id.as_deref().filter(|s| !s.is_empty()) else {
            skipped += 1;
            continue;
        };
        let Some(timestamp) = entry.timestamp.as_ref().and_then(parse_timestamp) else {
            skipped += 1;
            continue;
        };
        fold_record(&mut sessions, session_id, entry.project(), timestamp, entry.preview());
    }

    if skipped > 0 {
        debug!(skipped, sessions = sessions.len(), "history lines skipped");
    }
    sessions
}

/// Read and parse the history log. Missing file means no sessions.
pub fn read_history(path: &Path, budget: u64) -> HashMap<String, HistoryRecord> {
    parse_history(&read_tail_window(path, budget))
}

//! Core types used throughout the application.

use serde::{Deserialize, Deserializer, Serialize};

/// Tri-state progress marker shared by todos and tasks.
///
/// Producers have shipped other spellings over time; anything unrecognised
/// lands in `Unknown` instead of failing the whole file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Something with a status and an optional display label.
pub trait WorkItem {
    fn status(&self) -> TodoStatus;

    /// First non-empty of activeForm, subject, content, description.
    fn label(&self) -> Option<&str>;

    fn is_in_progress(&self) -> bool {
        self.status() == TodoStatus::InProgress
    }

    fn is_completed(&self) -> bool {
        self.status() == TodoStatus::Completed
    }
}

fn first_label<'a>(candidates: [&'a Option<String>; 4]) -> Option<&'a str> {
    candidates
        .into_iter()
        .filter_map(|c| c.as_deref())
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// One entry of a `todos/{sessionId}-agent-*.json` array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItem {
    #[serde(default)]
    pub status: TodoStatus,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub active_form: Option<String>,
}

impl WorkItem for TodoItem {
    fn status(&self) -> TodoStatus {
        self.status
    }

    fn label(&self) -> Option<&str> {
        first_label([
            &self.active_form,
            &self.subject,
            &self.content,
            &self.description,
        ])
    }
}

/// One `tasks/{sessionId}/{N}.json` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEntry {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub status: TodoStatus,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub active_form: Option<String>,
}

impl WorkItem for TaskEntry {
    fn status(&self) -> TodoStatus {
        self.status
    }

    fn label(&self) -> Option<&str> {
        first_label([
            &self.active_form,
            &self.subject,
            &self.content,
            &self.description,
        ])
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    })
}

/// Derived session state shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Transcript is being written or the agent holds work in flight
    Working,
    /// Turn finished, the user is expected to answer
    Waiting,
    /// Open but quiet
    Idle,
    /// Every tracked item completed
    Done,
    /// Last conversational entry carried an error
    Error,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Working => write!(f, "working"),
            SessionStatus::Waiting => write!(f, "waiting"),
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Done => write!(f, "done"),
            SessionStatus::Error => write!(f, "error"),
        }
    }
}

/// What the agent was last seen doing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentAction {
    pub tool: Option<String>,
    pub file: Option<String>,
    pub summary: Option<String>,
}

impl CurrentAction {
    pub fn new(tool: Option<String>, file: Option<String>) -> Self {
        let summary = match (&tool, &file) {
            (Some(tool), Some(file)) => Some(format!("Using {} on {}", tool, extract_filename(file))),
            (Some(tool), None) => Some(format!("Using {}", tool)),
            _ => None,
        };
        Self { tool, file, summary }
    }
}

/// The externally visible unit: one row of the session list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub project_name: String,
    pub project_path: String,
    /// unix ms
    pub last_activity_at: i64,
    pub started_at: i64,
    /// 0 when no transcript exists
    pub transcript_mtime_ms: i64,
    pub status: SessionStatus,
    pub current_action: CurrentAction,
    pub current_task: Option<String>,
    pub last_user_message: String,
    pub todos: Vec<TodoItem>,
    pub tasks: Vec<TaskEntry>,
    pub completed_count: usize,
    pub total_count: usize,
    pub has_lock: bool,
}

/// Key used to collapse several sessions of one project into one row:
/// the project path, or the session id when the path is unknown
pub fn dedup_key<'a>(project_path: &'a str, session_id: &'a str) -> &'a str {
    if project_path.is_empty() {
        session_id
    } else {
        project_path
    }
}

/// Truncate to at most `max_chars` characters, never splitting a code point
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Truncate a command string for display
pub fn truncate_command(cmd: &str, max_len: usize) -> String {
    if cmd.chars().count() <= max_len {
        cmd.to_string()
    } else {
        format!("{}...", truncate_chars(cmd, max_len.saturating_sub(3)))
    }
}

/// Extract filename from a full path (either separator)
pub fn extract_filename(path: &str) -> String {
    path.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(path)
        .to_string()
}

/// Last path component of a project path
pub fn project_name(project_path: &str) -> String {
    project_path
        .replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty())
        .last()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "Unknown Project".to_string())
}

/// Format an age as "just now", "Xm ago", "Xh ago" or "Xd ago"
pub fn format_relative_time(now_ms: i64, timestamp_ms: i64) -> String {
    let secs = (now_ms - timestamp_ms).max(0) / 1000;
    let mins = secs / 60;
    let hours = mins / 60;

    if secs < 60 {
        "just now".to_string()
    } else if mins < 60 {
        format!("{}m ago", mins)
    } else if hours < 24 {
        format!("{}h ago", hours)
    } else {
        format!("{}d ago", hours / 24)
    }
}

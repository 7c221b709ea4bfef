//! Transcript tail classification.
//!
//! A session's transcript lives at
//! `projects/{encoded project path}/{sessionId}.jsonl`. Only a small tail is
//! read; lines are scanned newest-first, skipping bookkeeping entries, and the
//! first conversational entry decides the turn state.

use crate::common::tail::read_tail_window;
use crate::common::types::{truncate_chars, CurrentAction};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::trace;

/// Tools that hand the turn back to the user
pub const AWAITING_INPUT_TOOLS: &[&str] = &["AskUserQuestion", "ExitPlanMode"];

/// Entry types that never describe a turn
const BOOKKEEPING_TYPES: &[&str] = &[
    "progress",
    "system",
    "summary",
    "file-history-snapshot",
    "queue-operation",
];

/// System error subtypes the runtime retries on its own
const RETRYABLE_ERROR_SUBTYPES: &[&str] = &["api_error"];

/// Command arguments are cut to this many characters when used as the target
const COMMAND_PREVIEW_CHARS: usize = 80;

/// Partial structure for parsing transcript entries - we only need specific fields
#[derive(Debug, Deserialize)]
pub struct TranscriptEntry {
    #[serde(rename = "type", default)]
    pub entry_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub message: Option<TranscriptMessage>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(rename = "isApiErrorMessage", default)]
    pub is_api_error_message: bool,
}

#[derive(Debug, Deserialize)]
pub struct TranscriptMessage {
    #[serde(default)]
    pub content: Option<Value>,
}

/// One block of an assistant/user message. Unknown block types map to `Other`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        input: Option<Value>,
    },
    Thinking {},
    RedactedThinking {},
    #[serde(other)]
    Other,
}

impl ContentBlock {
    fn is_thinking(&self) -> bool {
        matches!(self, ContentBlock::Thinking {} | ContentBlock::RedactedThinking {})
    }
}

impl TranscriptEntry {
    pub fn is_conversational(&self) -> bool {
        matches!(self.entry_type.as_str(), "assistant" | "user")
    }

    /// Heartbeats, snapshots and self-retried system errors
    pub fn is_bookkeeping(&self) -> bool {
        BOOKKEEPING_TYPES.contains(&self.entry_type.as_str())
            || self
                .subtype
                .as_deref()
                .is_some_and(|s| RETRYABLE_ERROR_SUBTYPES.contains(&s))
    }

    /// Truthy `error` field or an API error message
    pub fn has_error_flag(&self) -> bool {
        if self.is_api_error_message {
            return true;
        }
        match &self.error {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Some(Value::Array(_)) | Some(Value::Object(_)) => true,
        }
    }

    /// Message content as blocks. A bare string becomes one text block.
    pub fn content_blocks(&self) -> Vec<ContentBlock> {
        match self.message.as_ref().and_then(|m| m.content.as_ref()) {
            Some(Value::String(text)) => vec![ContentBlock::Text { text: text.clone() }],
            Some(Value::Array(blocks)) => blocks
                .iter()
                .map(|b| serde_json::from_value(b.clone()).unwrap_or(ContentBlock::Other))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Shape of the newest conversational entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastTurn {
    /// User spoke last; the assistant has not answered yet
    UserPending,
    /// Assistant replied with text only; turn complete
    AssistantText,
    /// Assistant's only tool calls ask the user something
    AwaitingUserInput,
    /// Assistant is running tools
    ToolUse,
    /// Assistant emitted reasoning only, more is coming
    Thinking,
}

/// Everything the status deriver needs from a transcript
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptSignals {
    /// `None` when the tail holds no conversational entry
    pub last_turn: Option<LastTurn>,
    pub has_error: bool,
    pub current_action: CurrentAction,
}

impl TranscriptSignals {
    /// Turn handed back to the user
    pub fn is_waiting(&self) -> bool {
        matches!(
            self.last_turn,
            Some(LastTurn::AssistantText) | Some(LastTurn::AwaitingUserInput)
        )
    }

    /// Narrower than waiting: a question or plan is pending
    pub fn is_blocked_on_input(&self) -> bool {
        self.last_turn == Some(LastTurn::AwaitingUserInput)
    }
}

/// Replace path separators and drive colons with `-`
pub fn encode_project_path(project_path: &str) -> String {
    project_path
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '-' } else { c })
        .collect()
}

/// Where a session's transcript would live. `None` without a project path.
pub fn transcript_path(projects_dir: &Path, project_path: &str, session_id: &str) -> Option<PathBuf> {
    if project_path.is_empty() {
        return None;
    }
    Some(
        projects_dir
            .join(encode_project_path(project_path))
            .join(format!("{}.jsonl", session_id)),
    )
}

fn mtime_ms(path: &Path) -> Option<i64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).ok()?;
    Some(since_epoch.as_millis() as i64)
}

/// Parse transcript lines, oldest first, dropping blank and malformed ones
pub fn parse_entries<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<TranscriptEntry> {
    lines
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect()
}

/// Newest conversational entry, unless an unrecognised entry type ends the scan first
fn last_conversational(entries: &[TranscriptEntry]) -> Option<&TranscriptEntry> {
    entries
        .iter()
        .rev()
        .find(|e| !e.is_bookkeeping())
        .filter(|e| e.is_conversational())
}

fn classify_turn(entry: &TranscriptEntry) -> LastTurn {
    if entry.entry_type == "user" {
        return LastTurn::UserPending;
    }

    let blocks = entry.content_blocks();
    let tool_names: Vec<&str> = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolUse { name, .. } => Some(name.as_deref().unwrap_or("")),
            _ => None,
        })
        .collect();

    if !tool_names.is_empty() {
        if tool_names.iter().all(|n| AWAITING_INPUT_TOOLS.contains(n)) {
            LastTurn::AwaitingUserInput
        } else {
            LastTurn::ToolUse
        }
    } else if !blocks.is_empty() && blocks.iter().all(ContentBlock::is_thinking) {
        LastTurn::Thinking
    } else {
        LastTurn::AssistantText
    }
}

/// Best-effort target of a tool call: file path, then path, then command
fn tool_target(input: Option<&Value>) -> Option<String> {
    let input = input?;
    let non_empty = |key: &str| input.get(key).and_then(Value::as_str).filter(|s| !s.is_empty());

    non_empty("file_path")
        .or_else(|| non_empty("path"))
        .map(str::to_string)
        .or_else(|| non_empty("command").map(|c| truncate_chars(c, COMMAND_PREVIEW_CHARS)))
}

/// Last tool call of the newest assistant entry that made one
pub fn extract_current_action(entries: &[TranscriptEntry]) -> CurrentAction {
    entries
        .iter()
        .rev()
        .filter(|e| e.entry_type == "assistant")
        .find_map(|e| {
            e.content_blocks().into_iter().rev().find_map(|b| match b {
                ContentBlock::ToolUse { name, input } => {
                    let file = tool_target(input.as_ref());
                    Some(CurrentAction::new(name, file))
                }
                _ => None,
            })
        })
        .unwrap_or_default()
}

/// Classify a parsed tail (pure, testable)
pub fn classify_entries(entries: &[TranscriptEntry]) -> TranscriptSignals {
    let last = last_conversational(entries);
    TranscriptSignals {
        last_turn: last.map(classify_turn),
        has_error: last.is_some_and(TranscriptEntry::has_error_flag),
        current_action: extract_current_action(entries),
    }
}

/// Read and classify a transcript file. Missing or empty files give no signal.
pub fn inspect_transcript(path: &Path, budget: u64) -> TranscriptSignals {
    let window = read_tail_window(path, budget);
    let entries = parse_entries(window.complete_lines());
    let signals = classify_entries(&entries);

    trace!(
        path = %path.display(),
        entries = entries.len(),
        last_turn = ?signals.last_turn,
        has_error = signals.has_error,
        "transcript classified"
    );
    signals
}

/// Transcript facts for one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptProbe {
    /// `None` when no transcript file exists
    pub mtime_ms: Option<i64>,
    pub signals: TranscriptSignals,
}

/// Locate, stat and classify a session's transcript
pub fn probe_transcript(
    projects_dir: &Path,
    project_path: &str,
    session_id: &str,
    budget: u64,
) -> TranscriptProbe {
    let Some(path) = transcript_path(projects_dir, project_path, session_id) else {
        return TranscriptProbe::default();
    };
    let Some(mtime_ms) = mtime_ms(&path) else {
        return TranscriptProbe::default();
    };
    TranscriptProbe {
        mtime_ms: Some(mtime_ms),
        signals: inspect_transcript(&path, budget),
    }
}

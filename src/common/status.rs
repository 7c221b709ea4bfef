//! Session status derivation.
//!
//! The state machine is an ordered rule table: the first rule whose
//! condition holds decides the status. Rule order is part of the contract.

use crate::common::tasks::TaskDir;
use crate::common::transcript::TranscriptSignals;
use crate::common::types::{SessionStatus, TodoItem, WorkItem};
use tracing::debug;

/// Transcript written this recently means the agent is mid-turn
pub const WORKING_THRESHOLD_MS: i64 = 30 * 1000;

/// Past this, a quiet transcript no longer counts as an open conversation
pub const STILL_OPEN_MS: i64 = 10 * 60 * 1000;

/// How long a pending question keeps a stale session in `waiting`
pub const ASSUME_OPEN_MS: i64 = 60 * 60 * 1000;

/// Everything the status of one session depends on
#[derive(Debug, Clone, Copy)]
pub struct StatusInputs<'a> {
    /// `None` when the session has no transcript file
    pub transcript_age_ms: Option<i64>,
    /// Age of the newest history record
    pub activity_age_ms: i64,
    pub todos: &'a [TodoItem],
    pub tasks: Option<&'a TaskDir>,
    pub signals: &'a TranscriptSignals,
}

impl StatusInputs<'_> {
    fn items(&self) -> impl Iterator<Item = &dyn WorkItem> + '_ {
        let tasks = self.tasks.map(|d| d.tasks.as_slice()).unwrap_or_default();
        tasks
            .iter()
            .map(|t| t as &dyn WorkItem)
            .chain(self.todos.iter().map(|t| t as &dyn WorkItem))
    }

    fn any_in_progress(&self) -> bool {
        self.items().any(|i| i.is_in_progress())
    }

    /// At least one item, and every item completed
    fn all_completed(&self) -> bool {
        let mut items = self.items().peekable();
        items.peek().is_some() && items.all(|i| i.is_completed())
    }

    fn has_lock(&self) -> bool {
        self.tasks.is_some_and(|d| d.has_lock)
    }

    fn transcript_age_in(&self, from_ms: i64, to_ms: i64) -> bool {
        self.transcript_age_ms
            .is_some_and(|age| age >= from_ms && age < to_ms)
    }

    fn transcript_stale(&self) -> bool {
        self.transcript_age_ms.is_some_and(|age| age >= STILL_OPEN_MS)
    }
}

/// One row of the status table
pub struct StatusRule {
    pub name: &'static str,
    pub applies: fn(&StatusInputs<'_>) -> bool,
    pub status: SessionStatus,
}

fn has_error(i: &StatusInputs<'_>) -> bool {
    i.signals.has_error
}

fn actively_writing(i: &StatusInputs<'_>) -> bool {
    i.transcript_age_ms.is_some_and(|age| age < WORKING_THRESHOLD_MS)
}

fn recent(i: &StatusInputs<'_>) -> bool {
    i.transcript_age_in(WORKING_THRESHOLD_MS, STILL_OPEN_MS)
}

fn recent_turn_handed_back(i: &StatusInputs<'_>) -> bool {
    recent(i) && i.signals.is_waiting()
}

fn recent_locked(i: &StatusInputs<'_>) -> bool {
    recent(i) && i.has_lock()
}

fn recent_in_progress(i: &StatusInputs<'_>) -> bool {
    recent(i) && i.any_in_progress()
}

fn stale_blocked_on_input(i: &StatusInputs<'_>) -> bool {
    i.transcript_age_in(STILL_OPEN_MS, ASSUME_OPEN_MS) && i.signals.is_blocked_on_input()
}

// in_progress is not consulted here: task files outlive the agent process
fn stale_all_completed(i: &StatusInputs<'_>) -> bool {
    i.transcript_stale() && i.all_completed()
}

fn stale(i: &StatusInputs<'_>) -> bool {
    i.transcript_stale()
}

fn no_transcript_recent_activity(i: &StatusInputs<'_>) -> bool {
    i.transcript_age_ms.is_none() && i.activity_age_ms < STILL_OPEN_MS
}

fn always(_: &StatusInputs<'_>) -> bool {
    true
}

/// Evaluated top to bottom, first match wins
pub static STATUS_RULES: &[StatusRule] = &[
    StatusRule { name: "transcript-error", applies: has_error, status: SessionStatus::Error },
    StatusRule { name: "actively-writing", applies: actively_writing, status: SessionStatus::Working },
    StatusRule { name: "recent-turn-handed-back", applies: recent_turn_handed_back, status: SessionStatus::Waiting },
    StatusRule { name: "recent-task-lock", applies: recent_locked, status: SessionStatus::Working },
    StatusRule { name: "recent-in-progress", applies: recent_in_progress, status: SessionStatus::Working },
    StatusRule { name: "recent-ambiguous", applies: recent, status: SessionStatus::Waiting },
    StatusRule { name: "stale-blocked-on-input", applies: stale_blocked_on_input, status: SessionStatus::Waiting },
    StatusRule { name: "stale-all-completed", applies: stale_all_completed, status: SessionStatus::Done },
    StatusRule { name: "stale", applies: stale, status: SessionStatus::Idle },
    StatusRule { name: "history-recent", applies: no_transcript_recent_activity, status: SessionStatus::Waiting },
    StatusRule { name: "history-stale", applies: always, status: SessionStatus::Idle },
];

/// The first rule that applies
pub fn matching_rule(inputs: &StatusInputs<'_>) -> Option<&'static StatusRule> {
    STATUS_RULES.iter().find(|rule| (rule.applies)(inputs))
}

pub fn derive_status(inputs: &StatusInputs<'_>) -> SessionStatus {
    match matching_rule(inputs) {
        Some(rule) => {
            debug!(rule = rule.name, status = %rule.status, "status derived");
            rule.status
        }
        None => SessionStatus::Idle,
    }
}

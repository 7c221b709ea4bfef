//! Reader for per-session task directories: `tasks/{sessionId}/{N}.json`
//! plus an optional lock marker.

use crate::common::paths::LOCK_FILE_NAME;
use crate::common::types::{TaskEntry, WorkItem};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Contents of one session's task directory
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDir {
    /// A worker currently holds this session's task queue
    pub has_lock: bool,
    /// Ordered by numeric file name
    pub tasks: Vec<TaskEntry>,
}

impl TaskDir {
    pub fn any_in_progress(&self) -> bool {
        self.tasks.iter().any(|t| t.is_in_progress())
    }
}

/// `N.json` with N all digits
fn task_number(file_name: &str) -> Option<u64> {
    let stem = file_name.strip_suffix(".json")?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Read a session's task directory.
///
/// `None` means the directory does not exist (no task data), as opposed to
/// `Some` with zero tasks.
pub fn read_task_dir(dir: &Path) -> Option<TaskDir> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            if dir.exists() {
                debug!(dir = %dir.display(), error = %e, "task dir unreadable");
            }
            return None;
        }
    };

    let has_lock = dir.join(LOCK_FILE_NAME).exists();

    let mut numbered: Vec<(u64, String)> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter_map(|name| task_number(&name).map(|n| (n, name)))
        .collect();
    numbered.sort();

    let tasks = numbered
        .into_iter()
        .filter_map(|(n, name)| {
            let raw = fs::read_to_string(dir.join(&name)).ok()?;
            match serde_json::from_str::<TaskEntry>(&raw) {
                Ok(mut task) => {
                    if task.id.is_empty() {
                        task.id = n.to_string();
                    }
                    Some(task)
                }
                Err(e) => {
                    debug!(file = %name, error = %e, "task file skipped");
                    None
                }
            }
        })
        .collect();

    Some(TaskDir { has_lock, tasks })
}

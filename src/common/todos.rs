//! Reader for `todos/{sessionId}-agent-*.json` files.

use crate::common::types::TodoItem;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

fn todo_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(.+?)-agent-[^.]+\.json$").expect("valid todo file regex"))
}

/// Session id encoded in a todo file name, if the name matches the pattern
pub fn session_id_from_todo_file(file_name: &str) -> Option<&str> {
    todo_file_pattern()
        .captures(file_name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Parse one todo file. Granularity is the whole file: anything but a
/// non-empty JSON array of todos is rejected.
pub fn parse_todo_file(content: &str) -> Option<Vec<TodoItem>> {
    let todos: Vec<TodoItem> = serde_json::from_str(content).ok()?;
    (!todos.is_empty()).then_some(todos)
}

/// Read every todo file, concatenating the lists of sessions split across
/// several agent files. A missing directory yields an empty map.
pub fn read_todos(todos_dir: &Path) -> HashMap<String, Vec<TodoItem>> {
    let mut todo_map: HashMap<String, Vec<TodoItem>> = HashMap::new();
    let Ok(entries) = fs::read_dir(todos_dir) else {
        return todo_map;
    };

    let mut files: Vec<_> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    // read_dir order is platform dependent; keep concatenation stable
    files.sort();

    for file_name in files {
        let Some(session_id) = session_id_from_todo_file(&file_name) else {
            continue;
        };
        let todos = fs::read_to_string(todos_dir.join(&file_name))
            .ok()
            .and_then(|raw| parse_todo_file(&raw));
        match todos {
            Some(todos) => todo_map.entry(session_id.to_string()).or_default().extend(todos),
            None => debug!(file = %file_name, "todo file skipped"),
        }
    }

    todo_map
}

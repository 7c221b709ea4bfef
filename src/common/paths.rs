//! Locations of the agent's on-disk artifacts and refresh tunables.

use crate::common::error::GardenError;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Env var the agent runtime honours for relocating its data directory
pub const CLAUDE_CONFIG_DIR_ENV: &str = "CLAUDE_CONFIG_DIR";

/// Marker file inside a task directory signalling a held queue
pub const LOCK_FILE_NAME: &str = ".lock";

/// Paths of everything the pipeline reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GardenPaths {
    pub claude_dir: PathBuf,
    pub history_file: PathBuf,
    pub todos_dir: PathBuf,
    pub tasks_dir: PathBuf,
    pub projects_dir: PathBuf,
}

impl GardenPaths {
    /// Lay out the standard tree under a data directory
    pub fn from_claude_dir(claude_dir: impl Into<PathBuf>) -> Self {
        let claude_dir = claude_dir.into();
        Self {
            history_file: claude_dir.join("history.jsonl"),
            todos_dir: claude_dir.join("todos"),
            tasks_dir: claude_dir.join("tasks"),
            projects_dir: claude_dir.join("projects"),
            claude_dir,
        }
    }

    /// Resolve the data directory: explicit override, then `CLAUDE_CONFIG_DIR`,
    /// then `~/.claude`.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, GardenError> {
        if let Some(dir) = explicit {
            return Ok(Self::from_claude_dir(dir));
        }
        if let Some(dir) = std::env::var_os(CLAUDE_CONFIG_DIR_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::from_claude_dir(PathBuf::from(dir)));
        }
        let home = dirs::home_dir().ok_or(GardenError::NoHomeDir)?;
        Ok(Self::from_claude_dir(home.join(".claude")))
    }

    /// Paths whose changes should trigger a refresh. The data directory
    /// itself covers the history log and subdirectories created later.
    pub fn watch_targets(&self) -> [&Path; 4] {
        [
            &self.claude_dir,
            &self.todos_dir,
            &self.tasks_dir,
            &self.projects_dir,
        ]
    }

    /// Directory holding one session's task files
    pub fn task_dir(&self, session_id: &str) -> PathBuf {
        self.tasks_dir.join(session_id)
    }
}

/// Refresh tunables
#[derive(Debug, Clone)]
pub struct GardenConfig {
    pub paths: GardenPaths,
    /// Upper bound on rows returned per tick
    pub max_sessions: usize,
    /// Sessions quieter than this are dropped before status is computed
    pub max_age: Duration,
    pub history_tail_bytes: u64,
    pub transcript_tail_bytes: u64,
    pub debounce: Duration,
    pub poll_interval: Duration,
    pub process_cache_ttl: Duration,
    pub process_query_timeout: Duration,
    /// Restrict output to sessions with a live agent process
    pub liveness: bool,
}

impl GardenConfig {
    pub fn new(paths: GardenPaths) -> Self {
        Self {
            paths,
            max_sessions: 6,
            max_age: Duration::from_secs(24 * 60 * 60),
            history_tail_bytes: 128 * 1024,
            transcript_tail_bytes: 4 * 1024,
            debounce: Duration::from_millis(300),
            poll_interval: Duration::from_secs(3),
            process_cache_ttl: Duration::from_secs(5),
            process_query_timeout: Duration::from_secs(2),
            liveness: true,
        }
    }

    pub fn with_liveness(mut self, liveness: bool) -> Self {
        self.liveness = liveness;
        self
    }
}

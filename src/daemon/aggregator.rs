//! Session aggregation: one refresh tick from raw files to ordered snapshots.

use crate::common::history::{read_history, HistoryRecord};
use crate::common::paths::GardenConfig;
use crate::common::process::{LiveProcessDetector, LiveSessions};
use crate::common::status::{derive_status, StatusInputs, STILL_OPEN_MS};
use crate::common::tasks::{read_task_dir, TaskDir};
use crate::common::todos::read_todos;
use crate::common::transcript::probe_transcript;
use crate::common::types::{project_name, SessionSnapshot, TodoItem, WorkItem};
use chrono::Utc;
use std::collections::HashMap;
use tracing::debug;

/// Current wall clock in unix ms
pub fn unix_now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Label of what the session is doing: in-progress task, then in-progress
/// todo, then the last user message.
pub fn current_task(
    tasks: Option<&TaskDir>,
    todos: &[TodoItem],
    last_user_message: &str,
) -> Option<String> {
    let task_label = tasks
        .and_then(|d| d.tasks.iter().find(|t| t.is_in_progress()))
        .and_then(|t| t.label());
    let todo_label = todos
        .iter()
        .find(|t| t.is_in_progress())
        .and_then(|t| t.label());

    task_label
        .or(todo_label)
        .or(Some(last_user_message.trim()).filter(|s| !s.is_empty()))
        .map(str::to_string)
}

/// (completed, total), preferring the task directory when it has entries
pub fn progress_counts(tasks: Option<&TaskDir>, todos: &[TodoItem]) -> (usize, usize) {
    match tasks.filter(|d| !d.tasks.is_empty()) {
        Some(dir) => (
            dir.tasks.iter().filter(|t| t.is_completed()).count(),
            dir.tasks.len(),
        ),
        None => (todos.iter().filter(|t| t.is_completed()).count(), todos.len()),
    }
}

/// Keep sessions with a live agent. Empty liveness data keeps everything;
/// an unattached agent keeps anything active within the still-open window.
fn is_live(record: &HistoryRecord, live: &LiveSessions, now_ms: i64) -> bool {
    if live.is_empty() || live.contains(&record.session_id) {
        return true;
    }
    live.has_fresh && now_ms - record.last_activity_at < STILL_OPEN_MS
}

/// Newest record per project path (per session id when the path is empty),
/// newest first, at most `limit`.
pub fn select_records(records: Vec<HistoryRecord>, limit: usize) -> Vec<HistoryRecord> {
    let mut by_key: HashMap<String, HistoryRecord> = HashMap::new();
    for record in records {
        let key = record.dedup_key().to_string();
        match by_key.get(&key) {
            Some(kept) if !newer(&record, kept) => {}
            _ => {
                by_key.insert(key, record);
            }
        }
    }

    let mut selected: Vec<HistoryRecord> = by_key.into_values().collect();
    selected.sort_by(|a, b| {
        b.last_activity_at
            .cmp(&a.last_activity_at)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
    selected.truncate(limit);
    selected
}

/// Ties go to the larger session id so output does not depend on map order
fn newer(a: &HistoryRecord, b: &HistoryRecord) -> bool {
    (a.last_activity_at, &a.session_id) > (b.last_activity_at, &b.session_id)
}

/// Runs the read, derive, aggregate pipeline
pub struct SessionReader {
    config: GardenConfig,
    detector: Option<LiveProcessDetector>,
}

impl SessionReader {
    /// Reader using the OS process table when liveness is enabled
    pub fn new(config: GardenConfig) -> Self {
        let detector = config.liveness.then(|| {
            LiveProcessDetector::system(config.process_cache_ttl, config.process_query_timeout)
        });
        Self { config, detector }
    }

    pub fn with_detector(config: GardenConfig, detector: Option<LiveProcessDetector>) -> Self {
        Self { config, detector }
    }

    pub fn config(&self) -> &GardenConfig {
        &self.config
    }

    /// Sessions worth showing at `now_ms`, newest first. Never fails;
    /// unreadable sources contribute nothing.
    pub fn read_sessions(&self, now_ms: i64) -> Vec<SessionSnapshot> {
        let paths = &self.config.paths;
        let history = read_history(&paths.history_file, self.config.history_tail_bytes);
        let total = history.len();

        let max_age_ms = self.config.max_age.as_millis() as i64;
        let live = match &self.detector {
            Some(detector) => detector.live_sessions(),
            None => LiveSessions::default(),
        };

        let candidates: Vec<HistoryRecord> = history
            .into_values()
            .filter(|r| now_ms - r.last_activity_at <= max_age_ms)
            .filter(|r| is_live(r, &live, now_ms))
            .collect();
        let selected = select_records(candidates, self.config.max_sessions);

        let todos = if selected.is_empty() {
            HashMap::new()
        } else {
            read_todos(&paths.todos_dir)
        };

        let snapshots: Vec<SessionSnapshot> = selected
            .into_iter()
            .map(|record| {
                let session_todos = todos.get(&record.session_id).cloned().unwrap_or_default();
                self.build_snapshot(record, session_todos, now_ms)
            })
            .collect();

        debug!(
            history = total,
            shown = snapshots.len(),
            live_ids = live.ids.len(),
            "sessions aggregated"
        );
        snapshots
    }

    /// Sessions at the current wall clock
    pub fn read_sessions_now(&self) -> Vec<SessionSnapshot> {
        self.read_sessions(unix_now_ms())
    }

    fn build_snapshot(
        &self,
        record: HistoryRecord,
        todos: Vec<TodoItem>,
        now_ms: i64,
    ) -> SessionSnapshot {
        let paths = &self.config.paths;
        let task_dir = read_task_dir(&paths.task_dir(&record.session_id));
        let probe = probe_transcript(
            &paths.projects_dir,
            &record.project_path,
            &record.session_id,
            self.config.transcript_tail_bytes,
        );

        let status = derive_status(&StatusInputs {
            transcript_age_ms: probe.mtime_ms.map(|mtime| now_ms - mtime),
            activity_age_ms: now_ms - record.last_activity_at,
            todos: &todos,
            tasks: task_dir.as_ref(),
            signals: &probe.signals,
        });
        let current_task = current_task(task_dir.as_ref(), &todos, &record.last_user_message);
        let (completed_count, total_count) = progress_counts(task_dir.as_ref(), &todos);
        let (has_lock, tasks) = match task_dir {
            Some(dir) => (dir.has_lock, dir.tasks),
            None => (false, Vec::new()),
        };

        SessionSnapshot {
            project_name: project_name(&record.project_path),
            session_id: record.session_id,
            project_path: record.project_path,
            last_activity_at: record.last_activity_at,
            started_at: record.first_activity_at,
            transcript_mtime_ms: probe.mtime_ms.unwrap_or(0),
            status,
            current_action: probe.signals.current_action,
            current_task,
            last_user_message: record.last_user_message,
            todos,
            tasks,
            completed_count,
            total_count,
            has_lock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::ProcessQueryError;
    use crate::common::paths::GardenPaths;
    use crate::common::process::{ProcessInfo, ProcessSource};
    use crate::common::transcript::encode_project_path;
    use crate::common::types::{dedup_key, SessionStatus, TaskEntry, TodoStatus};
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    const MIN: i64 = 60 * 1000;
    const HOUR: i64 = 60 * MIN;

    struct Fixture {
        dir: tempfile::TempDir,
        now: i64,
        history: Vec<String>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                now: unix_now_ms(),
                history: Vec::new(),
            }
        }

        fn paths(&self) -> GardenPaths {
            GardenPaths::from_claude_dir(self.dir.path())
        }

        fn history(&mut self, session: &str, project: &str, age_ms: i64, display: &str) {
            self.history.push(format!(
                r#"{{"sessionId":"{}","project":"{}","timestamp":{},"display":"{}"}}"#,
                session,
                project,
                self.now - age_ms,
                display
            ));
        }

        fn todos(&self, session: &str, json: &str) {
            let dir = self.dir.path().join("todos");
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(format!("{}-agent-{}.json", session, session)), json).unwrap();
        }

        fn task(&self, session: &str, n: u32, json: &str) {
            let dir = self.dir.path().join("tasks").join(session);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(format!("{}.json", n)), json).unwrap();
        }

        fn transcript(&self, session: &str, project: &str, lines: &[&str], age_ms: i64) {
            let dir = self
                .dir
                .path()
                .join("projects")
                .join(encode_project_path(project));
            fs::create_dir_all(&dir).unwrap();
            let path = dir.join(format!("{}.jsonl", session));
            fs::write(&path, lines.join("\n") + "\n").unwrap();
            set_age(&path, age_ms);
        }

        fn reader(&self) -> SessionReader {
            fs::write(self.dir.path().join("history.jsonl"), self.history.join("\n") + "\n").unwrap();
            SessionReader::new(GardenConfig::new(self.paths()).with_liveness(false))
        }

        fn reader_with(&self, source: impl ProcessSource + 'static) -> SessionReader {
            let reader = self.reader();
            let detector = LiveProcessDetector::new(
                Arc::new(source),
                Duration::from_secs(60),
                Duration::from_secs(5),
            );
            SessionReader::with_detector(reader.config().clone(), Some(detector))
        }

        fn read(&self) -> Vec<SessionSnapshot> {
            self.reader().read_sessions(self.now)
        }
    }

    fn set_age(path: &Path, age_ms: i64) {
        let mtime = SystemTime::now() - Duration::from_millis(age_ms as u64);
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    struct FixedProcesses(Vec<&'static str>);

    impl ProcessSource for FixedProcesses {
        fn list_processes(&self) -> Result<Vec<ProcessInfo>, ProcessQueryError> {
            Ok(self
                .0
                .iter()
                .map(|cmd| ProcessInfo {
                    pid: 7,
                    name: cmd.split_whitespace().next().unwrap_or_default().to_string(),
                    command: cmd.to_string(),
                })
                .collect())
        }
    }

    mod end_to_end {
        use super::*;

        #[test]
        fn test_history_only_session_is_waiting() {
            let mut fx = Fixture::new();
            fx.history("abc", "/home/u/app", 0, "hello");
            let sessions = fx.read();

            assert_eq!(sessions.len(), 1);
            let s = &sessions[0];
            assert_eq!(s.session_id, "abc");
            assert_eq!(s.project_name, "app");
            assert_eq!(s.status, SessionStatus::Waiting);
            assert_eq!(s.total_count, 0);
            assert!(!s.has_lock);
            assert_eq!(s.transcript_mtime_ms, 0);
            assert_eq!(s.current_task.as_deref(), Some("hello"));
        }

        #[test]
        fn test_fresh_tool_use_is_working() {
            let mut fx = Fixture::new();
            fx.history("abc", "/home/u/app", 0, "hello");
            fx.transcript(
                "abc",
                "/home/u/app",
                &[r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Edit","input":{"file_path":"/home/u/app/x.go"}}]}}"#],
                2_000,
            );
            let sessions = fx.read();

            assert_eq!(sessions[0].status, SessionStatus::Working);
            assert_eq!(
                sessions[0].current_action.summary.as_deref(),
                Some("Using Edit on x.go")
            );
            assert!(sessions[0].transcript_mtime_ms > 0);
        }

        #[test]
        fn test_error_beats_completed_tasks() {
            let mut fx = Fixture::new();
            fx.history("abc", "/home/u/app", 20 * MIN, "go");
            fx.task("abc", 1, r#"{"subject":"a","status":"completed"}"#);
            fx.transcript(
                "abc",
                "/home/u/app",
                &[r#"{"type":"assistant","error":"overloaded","message":{"content":[{"type":"text","text":"failed"}]}}"#],
                20 * MIN,
            );
            assert_eq!(fx.read()[0].status, SessionStatus::Error);
        }

        #[test]
        fn test_stale_done_and_idle() {
            let mut fx = Fixture::new();
            let reply = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"All set"}]}}"#;
            fx.history("done", "/p/done", 20 * MIN, "a");
            fx.task("done", 1, r#"{"subject":"a","status":"completed"}"#);
            fx.transcript("done", "/p/done", &[reply], 20 * MIN);
            fx.history("idle", "/p/idle", 21 * MIN, "b");
            fx.task("idle", 1, r#"{"subject":"a","status":"completed"}"#);
            fx.task("idle", 2, r#"{"subject":"b","status":"pending"}"#);
            fx.transcript("idle", "/p/idle", &[reply], 20 * MIN);

            let sessions = fx.read();
            let by_id: HashMap<_, _> = sessions.iter().map(|s| (s.session_id.as_str(), s)).collect();
            assert_eq!(by_id["done"].status, SessionStatus::Done);
            assert_eq!(by_id["idle"].status, SessionStatus::Idle);
            assert_eq!((by_id["idle"].completed_count, by_id["idle"].total_count), (1, 2));
        }

        #[test]
        fn test_missing_data_dir_is_empty() {
            let fx = Fixture::new();
            let reader = SessionReader::new(
                GardenConfig::new(GardenPaths::from_claude_dir(fx.dir.path().join("nope")))
                    .with_liveness(false),
            );
            assert!(reader.read_sessions(fx.now).is_empty());
        }
    }

    mod selection {
        use super::*;

        #[test]
        fn test_dedup_keeps_newest_per_project() {
            let mut fx = Fixture::new();
            fx.history("old", "/home/u/app", 5 * MIN, "old");
            fx.history("new", "/home/u/app", MIN, "new");
            fx.history("other", "/home/u/api", 2 * MIN, "other");
            let sessions = fx.read();

            let ids: Vec<_> = sessions.iter().map(|s| s.session_id.as_str()).collect();
            assert_eq!(ids, vec!["new", "other"]);
        }

        #[test]
        fn test_empty_project_dedups_by_session() {
            let mut fx = Fixture::new();
            fx.history("a", "", MIN, "x");
            fx.history("b", "", 2 * MIN, "y");
            let sessions = fx.read();
            assert_eq!(sessions.len(), 2);
            assert_eq!(sessions[0].project_name, "Unknown Project");
        }

        #[test]
        fn test_output_keys_are_unique() {
            let mut fx = Fixture::new();
            fx.history("a1", "/home/u/app", MIN, "x");
            fx.history("a2", "/home/u/app", 2 * MIN, "x");
            fx.history("n1", "", 3 * MIN, "x");
            fx.history("n2", "", 4 * MIN, "x");
            fx.history("b1", "/home/u/api", 5 * MIN, "x");
            let sessions = fx.read();

            let keys: Vec<&str> = sessions
                .iter()
                .map(|s| dedup_key(&s.project_path, &s.session_id))
                .collect();
            assert_eq!(keys, vec!["/home/u/app", "n1", "n2", "/home/u/api"]);
        }

        #[test]
        fn test_cap_keeps_newest_six() {
            let mut fx = Fixture::new();
            for i in 0..10 {
                fx.history(&format!("s{}", i), &format!("/p/{}", i), i * MIN, "x");
            }
            let sessions = fx.read();

            let ids: Vec<_> = sessions.iter().map(|s| s.session_id.clone()).collect();
            assert_eq!(ids, vec!["s0", "s1", "s2", "s3", "s4", "s5"]);
            assert!(sessions
                .windows(2)
                .all(|w| w[0].last_activity_at >= w[1].last_activity_at));
        }

        #[test]
        fn test_age_filter() {
            let mut fx = Fixture::new();
            fx.history("recent", "/p/a", 23 * HOUR, "x");
            fx.history("ancient", "/p/b", 25 * HOUR, "y");
            let ids: Vec<_> = fx.read().into_iter().map(|s| s.session_id).collect();
            assert_eq!(ids, vec!["recent"]);
        }

        #[test]
        fn test_select_records_tie_is_deterministic() {
            let record = |id: &str| HistoryRecord {
                session_id: id.to_string(),
                project_path: "/p".to_string(),
                first_activity_at: 1,
                last_activity_at: 10,
                last_user_message: String::new(),
            };
            let picked = select_records(vec![record("b"), record("a")], 6);
            assert_eq!(picked[0].session_id, "b");
            let picked = select_records(vec![record("a"), record("b")], 6);
            assert_eq!(picked[0].session_id, "b");
        }
    }

    mod liveness {
        use super::*;

        const LIVE: &str = "0a1b2c3d-4e5f-6789-abcd-ef0123456789";

        #[test]
        fn test_only_resumed_sessions_shown() {
            let mut fx = Fixture::new();
            fx.history(LIVE, "/p/live", 30 * MIN, "x");
            fx.history("dead", "/p/dead", MIN, "y");
            let reader =
                fx.reader_with(FixedProcesses(vec!["claude --resume 0a1b2c3d-4e5f-6789-abcd-ef0123456789"]));
            let ids: Vec<_> = reader.read_sessions(fx.now).into_iter().map(|s| s.session_id).collect();
            assert_eq!(ids, vec![LIVE.to_string()]);
        }

        #[test]
        fn test_fresh_agent_keeps_recent_sessions() {
            let mut fx = Fixture::new();
            fx.history("recent", "/p/a", 2 * MIN, "x");
            fx.history("stale", "/p/b", 30 * MIN, "y");
            let reader = fx.reader_with(FixedProcesses(vec!["claude"]));
            let ids: Vec<_> = reader.read_sessions(fx.now).into_iter().map(|s| s.session_id).collect();
            assert_eq!(ids, vec!["recent"]);
        }

        #[test]
        fn test_no_agents_shows_everything() {
            let mut fx = Fixture::new();
            fx.history("a", "/p/a", 2 * MIN, "x");
            fx.history("b", "/p/b", 30 * MIN, "y");
            let reader = fx.reader_with(FixedProcesses(vec!["vim notes.txt"]));
            assert_eq!(reader.read_sessions(fx.now).len(), 2);
        }
    }

    mod joins {
        use super::*;

        fn todo(status: TodoStatus, active_form: &str) -> TodoItem {
            TodoItem {
                status,
                active_form: Some(active_form.to_string()),
                ..Default::default()
            }
        }

        #[test]
        fn test_current_task_preference() {
            let todos = vec![todo(TodoStatus::InProgress, "Writing docs")];
            let tasks = TaskDir {
                has_lock: false,
                tasks: vec![TaskEntry {
                    id: "1".to_string(),
                    status: TodoStatus::InProgress,
                    subject: Some("Refactor".to_string()),
                    ..Default::default()
                }],
            };
            assert_eq!(current_task(Some(&tasks), &todos, "msg").as_deref(), Some("Refactor"));
            assert_eq!(current_task(None, &todos, "msg").as_deref(), Some("Writing docs"));
            assert_eq!(current_task(None, &[], "msg").as_deref(), Some("msg"));
            assert_eq!(current_task(None, &[], "  "), None);
        }

        #[test]
        fn test_progress_prefers_task_dir() {
            let todos = vec![
                todo(TodoStatus::Completed, "a"),
                todo(TodoStatus::Completed, "b"),
                todo(TodoStatus::Pending, "c"),
            ];
            let tasks = TaskDir {
                has_lock: true,
                tasks: vec![TaskEntry {
                    status: TodoStatus::Pending,
                    ..Default::default()
                }],
            };
            assert_eq!(progress_counts(Some(&tasks), &todos), (0, 1));
            assert_eq!(progress_counts(Some(&TaskDir::default()), &todos), (2, 3));
            assert_eq!(progress_counts(None, &todos), (2, 3));
        }

        #[test]
        fn test_snapshot_carries_todos_tasks_and_lock() {
            let mut fx = Fixture::new();
            fx.history("abc", "/home/u/app", MIN, "hi");
            fx.todos("abc", r#"[{"content":"Write tests","status":"in_progress","activeForm":"Writing tests"}]"#);
            fs::create_dir_all(fx.dir.path().join("tasks").join("abc")).unwrap();
            fs::write(fx.dir.path().join("tasks").join("abc").join(".lock"), "").unwrap();

            let s = &fx.read()[0];
            assert!(s.has_lock);
            assert!(s.tasks.is_empty());
            assert_eq!(s.todos.len(), 1);
            assert_eq!((s.completed_count, s.total_count), (0, 1));
            assert_eq!(s.current_task.as_deref(), Some("Writing tests"));
        }

        #[test]
        fn test_snapshot_serializes_camel_case() {
            let mut fx = Fixture::new();
            fx.history("abc", "/home/u/app", 0, "hi");
            let json = serde_json::to_value(&fx.read()[0]).unwrap();
            assert_eq!(json["sessionId"], "abc");
            assert_eq!(json["projectName"], "app");
            assert_eq!(json["status"], "waiting");
            assert_eq!(json["hasLock"], false);
        }
    }
}

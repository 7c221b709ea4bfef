//! Live agent process detection.
//!
//! Scans the OS process table for agent processes and pulls resumed session
//! ids out of their command lines. The OS query sits behind [`ProcessSource`]
//! so sandboxed or unsupported platforms degrade to "no liveness data".

use crate::common::error::ProcessQueryError;
use regex::Regex;
use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};
use sysinfo::System;
use tracing::{debug, trace};

/// Substring identifying the agent in a process name or command line
pub const AGENT_MARKER: &str = "claude";

/// Our own binary, which must never count as an agent
const SELF_NAME: &str = "claude-garden";

/// One process from the OS table
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub command: String,
}

/// Check if a process is the agent based on name/command
pub fn is_agent_process(proc: &ProcessInfo) -> bool {
    let name_lower = proc.name.to_lowercase();
    let cmd_lower = proc.command.to_lowercase();

    if cmd_lower.contains(SELF_NAME) || name_lower.contains(SELF_NAME) {
        return false;
    }

    if name_lower == AGENT_MARKER {
        return true;
    }

    // Installed builds show up under their version number, e.g. "2.1.20"
    let looks_like_version = proc.name.chars().next().is_some_and(|c| c.is_ascii_digit())
        && proc.name.contains('.')
        && proc.name.chars().all(|c| c.is_ascii_digit() || c == '.');
    if looks_like_version && cmd_lower.contains(AGENT_MARKER) {
        return true;
    }

    name_lower == "node" && cmd_lower.contains(AGENT_MARKER)
}

fn session_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b")
            .expect("valid session id regex")
    })
}

/// Resumed session id in a command line, e.g. `claude --resume <id>`
pub fn extract_session_id(command: &str) -> Option<String> {
    session_id_pattern()
        .find(command)
        .map(|m| m.as_str().to_lowercase())
}

/// Sessions with an attached agent process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveSessions {
    /// Ids of resumed sessions
    pub ids: HashSet<String>,
    /// At least one agent runs without a session id (freshly started)
    pub has_fresh: bool,
}

impl LiveSessions {
    pub fn from_processes(processes: &[ProcessInfo]) -> Self {
        let mut live = Self::default();
        for proc in processes.iter().filter(|p| is_agent_process(p)) {
            match extract_session_id(&proc.command) {
                Some(id) => {
                    trace!(pid = proc.pid, session = %id, "resumed agent");
                    live.ids.insert(id);
                }
                None => {
                    trace!(pid = proc.pid, "fresh agent");
                    live.has_fresh = true;
                }
            }
        }
        live
    }

    /// No liveness data at all; callers should show everything
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && !self.has_fresh
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.ids.contains(&session_id.to_lowercase())
    }
}

/// Capability to list processes. Implementations may block.
pub trait ProcessSource: Send + Sync {
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, ProcessQueryError>;
}

/// Process table via sysinfo, command lines included
#[derive(Debug, Default)]
pub struct SysinfoSource;

impl ProcessSource for SysinfoSource {
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, ProcessQueryError> {
        // a bare process refresh leaves cmd() empty
        let sys = System::new_all();

        let processes: Vec<ProcessInfo> = sys
            .processes()
            .iter()
            .map(|(pid, p)| ProcessInfo {
                pid: pid.as_u32(),
                name: p.name().to_string_lossy().to_string(),
                command: p
                    .cmd()
                    .iter()
                    .map(|s| s.to_string_lossy().to_string())
                    .collect::<Vec<_>>()
                    .join(" "),
            })
            .collect();

        if processes.is_empty() {
            return Err(ProcessQueryError::Unavailable(
                "process table is empty".to_string(),
            ));
        }
        Ok(processes)
    }
}

/// Source for environments without process inspection
#[derive(Debug, Default)]
pub struct UnavailableSource;

impl ProcessSource for UnavailableSource {
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, ProcessQueryError> {
        Err(ProcessQueryError::Unavailable("liveness disabled".to_string()))
    }
}

type QueryResult = Result<Vec<ProcessInfo>, ProcessQueryError>;

#[derive(Default)]
struct DetectorState {
    cached: Option<(Instant, LiveSessions)>,
    /// Worker that outlived its timeout; waited on again instead of
    /// spawning another
    in_flight: Option<Receiver<QueryResult>>,
}

/// Cached, time-bounded liveness lookups. At most one worker thread queries
/// the source at a time.
pub struct LiveProcessDetector {
    source: Arc<dyn ProcessSource>,
    ttl: Duration,
    timeout: Duration,
    state: Mutex<DetectorState>,
}

impl LiveProcessDetector {
    pub fn new(source: Arc<dyn ProcessSource>, ttl: Duration, timeout: Duration) -> Self {
        Self {
            source,
            ttl,
            timeout,
            state: Mutex::new(DetectorState::default()),
        }
    }

    /// Detector backed by the OS process table
    pub fn system(ttl: Duration, timeout: Duration) -> Self {
        Self::new(Arc::new(SysinfoSource), ttl, timeout)
    }

    /// Query the source on a worker thread, giving up after the timeout.
    /// A worker still running from an earlier timeout is awaited again.
    fn query(&self, state: &mut DetectorState) -> Result<LiveSessions, ProcessQueryError> {
        let rx = match state.in_flight.take() {
            Some(rx) => {
                debug!("process query still running, waiting on it");
                rx
            }
            None => {
                let (tx, rx) = mpsc::channel();
                let source = Arc::clone(&self.source);
                thread::spawn(move || {
                    let _ = tx.send(source.list_processes());
                });
                rx
            }
        };

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result.map(|procs| LiveSessions::from_processes(&procs)),
            Err(RecvTimeoutError::Timeout) => {
                state.in_flight = Some(rx);
                Err(ProcessQueryError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(ProcessQueryError::Join),
        }
    }

    /// Current live sessions. Failures degrade to an empty set, and are
    /// cached like successes so a stuck query is not retried every tick.
    pub fn live_sessions(&self) -> LiveSessions {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((at, sessions)) = state.cached.as_ref() {
            if at.elapsed() < self.ttl {
                return sessions.clone();
            }
        }

        let sessions = match self.query(&mut state) {
            Ok(sessions) => sessions,
            Err(e) => {
                debug!(error = %e, "liveness unavailable, showing all sessions");
                LiveSessions::default()
            }
        };
        state.cached = Some((Instant::now(), sessions.clone()));
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_proc(name: &str, command: &str) -> ProcessInfo {
        ProcessInfo {
            pid: 1,
            name: name.to_string(),
            command: command.to_string(),
        }
    }

    const ID: &str = "0a1b2c3d-4e5f-6789-abcd-ef0123456789";

    mod process_detection {
        use super::*;

        #[test]
        fn test_is_agent_by_name() {
            assert!(is_agent_process(&make_proc("claude", "claude")));
            assert!(is_agent_process(&make_proc("2.1.20", "claude --resume x")));
        }

        #[test]
        fn test_is_agent_node_wrapper() {
            assert!(is_agent_process(&make_proc("node", "/usr/lib/node_modules/claude/cli.js")));
        }

        #[test]
        fn test_is_not_agent_regular_process() {
            assert!(!is_agent_process(&make_proc("bash", "ls")));
            assert!(!is_agent_process(&make_proc("vim", "vim claude.md")));
            assert!(!is_agent_process(&make_proc("2.1.20", "python3")));
        }

        #[test]
        fn test_is_not_agent_self() {
            assert!(!is_agent_process(&make_proc("claude-garden", "claude-garden --watch")));
            assert!(!is_agent_process(&make_proc("node", "claude-garden")));
        }
    }

    mod session_ids {
        use super::*;

        #[test]
        fn test_extract_resume_id() {
            let cmd = format!("claude --resume {}", ID);
            assert_eq!(extract_session_id(&cmd).as_deref(), Some(ID));
            let upper = format!("claude -r {}", ID.to_uppercase());
            assert_eq!(extract_session_id(&upper).as_deref(), Some(ID));
        }

        #[test]
        fn test_no_id() {
            assert_eq!(extract_session_id("claude"), None);
            assert_eq!(extract_session_id("claude --resume 0a1b2c3d"), None);
        }

        #[test]
        fn test_live_sessions_from_processes() {
            let procs = vec![
                make_proc("claude", &format!("claude --resume {}", ID)),
                make_proc("claude", "claude"),
                make_proc("bash", "bash -c 'echo 11111111-2222-3333-4444-555555555555'"),
            ];
            let live = LiveSessions::from_processes(&procs);
            assert!(live.contains(ID));
            assert!(!live.contains("11111111-2222-3333-4444-555555555555"));
            assert!(live.has_fresh);
            assert!(!live.is_empty());
            assert!(LiveSessions::default().is_empty());
        }
    }

    mod detector {
        use super::*;

        struct CountingSource {
            calls: AtomicUsize,
            delay: Duration,
        }

        impl ProcessSource for CountingSource {
            fn list_processes(&self) -> Result<Vec<ProcessInfo>, ProcessQueryError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                thread::sleep(self.delay);
                Ok(vec![make_proc("claude", &format!("claude --resume {}", ID))])
            }
        }

        #[test]
        fn test_results_cached_within_ttl() {
            let source = Arc::new(CountingSource {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            });
            let detector =
                LiveProcessDetector::new(source.clone(), Duration::from_secs(60), Duration::from_secs(5));
            assert!(detector.live_sessions().contains(ID));
            assert!(detector.live_sessions().contains(ID));
            assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn test_expired_cache_requeries() {
            let source = Arc::new(CountingSource {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            });
            let detector = LiveProcessDetector::new(source.clone(), Duration::ZERO, Duration::from_secs(5));
            detector.live_sessions();
            detector.live_sessions();
            thread::sleep(Duration::from_millis(50));
            assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        }

        #[test]
        fn test_timeout_degrades_to_empty() {
            let source = Arc::new(CountingSource {
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(500),
            });
            let detector =
                LiveProcessDetector::new(source, Duration::from_secs(60), Duration::from_millis(20));
            let started = Instant::now();
            assert!(detector.live_sessions().is_empty());
            assert!(started.elapsed() < Duration::from_millis(400));
        }

        #[test]
        fn test_stuck_query_is_not_respawned() {
            let source = Arc::new(CountingSource {
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(300),
            });
            let detector = LiveProcessDetector::new(source.clone(), Duration::ZERO, Duration::from_millis(20));
            assert!(detector.live_sessions().is_empty());
            assert!(detector.live_sessions().is_empty());
            assert_eq!(source.calls.load(Ordering::SeqCst), 1);

            // the late result of the same worker is picked up
            thread::sleep(Duration::from_millis(400));
            assert!(detector.live_sessions().contains(ID));
            assert_eq!(source.calls.load(Ordering::SeqCst), 1);

            detector.live_sessions();
            thread::sleep(Duration::from_millis(50));
            assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        }

        #[test]
        fn test_unavailable_source_degrades_to_empty() {
            let detector = LiveProcessDetector::new(
                Arc::new(UnavailableSource),
                Duration::from_secs(5),
                Duration::from_secs(1),
            );
            assert!(detector.live_sessions().is_empty());
        }
    }

    #[cfg(target_os = "linux")]
    mod system_source {
        use super::*;
        use std::process::{Child, Command};

        /// A shell started under the name `claude`, resuming `ID`. None when
        /// the shell dispatches on its own name (busybox).
        fn spawn_agent(dir: &std::path::Path) -> Option<Child> {
            let shell = std::fs::canonicalize("/bin/sh").ok()?;
            if shell.file_name().is_some_and(|n| n == "busybox") {
                return None;
            }
            let exe = dir.join("claude");
            std::os::unix::fs::symlink(&shell, &exe).unwrap();
            let child = Command::new(&exe)
                .args(["-c", "sleep 30; true", "--resume", ID])
                .spawn()
                .unwrap();
            thread::sleep(Duration::from_millis(200));
            Some(child)
        }

        #[test]
        fn test_command_lines_are_loaded() {
            let dir = tempfile::tempdir().unwrap();
            let Some(mut child) = spawn_agent(dir.path()) else {
                return;
            };

            let procs = SysinfoSource.list_processes().unwrap();
            let agent = procs.iter().find(|p| p.pid == child.id()).cloned();
            let _ = child.kill();
            let _ = child.wait();

            let agent = agent.expect("spawned process listed");
            assert_eq!(agent.name, "claude");
            assert!(agent.command.contains(ID), "command: {:?}", agent.command);
            assert!(is_agent_process(&agent));
        }

        #[test]
        fn test_resumed_agent_is_live() {
            let dir = tempfile::tempdir().unwrap();
            let Some(mut child) = spawn_agent(dir.path()) else {
                return;
            };

            let live = LiveProcessDetector::system(Duration::ZERO, Duration::from_secs(5)).live_sessions();
            let _ = child.kill();
            let _ = child.wait();

            assert!(live.contains(ID), "{:?}", live);
        }
    }
}

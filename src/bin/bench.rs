//! Benchmark tool for measuring claude-garden refresh performance.
//!
//! Run with: cargo run --release --bin bench
//!
//! Measures the stages of each refresh tick:
//! - history: tail-reading and folding the history log
//! - todos: scanning the todo directory
//! - sessions: task directories and transcripts of the shown sessions
//! - process: one uncached OS process table query
//! - tick: the full pipeline as the scheduler runs it
//!
//! Mock mode (--mock) generates a throwaway data directory so results do not
//! depend on local agent history. Use --sessions to control its size.

use anyhow::{Context, Result};
use clap::Parser;
use claude_garden::common::history::read_history;
use claude_garden::common::process::LiveProcessDetector;
use claude_garden::common::tasks::read_task_dir;
use claude_garden::common::todos::read_todos;
use claude_garden::common::transcript::{encode_project_path, probe_transcript};
use claude_garden::daemon::aggregator::{select_records, unix_now_ms, SessionReader};
use claude_garden::{GardenConfig, GardenPaths};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "bench")]
#[command(about = "Benchmark claude-garden refresh performance")]
struct Args {
    /// Use a generated data directory instead of the real one
    #[arg(long)]
    mock: bool,

    /// Number of mock sessions (with --mock)
    #[arg(long, default_value = "40")]
    sessions: usize,

    /// Number of iterations
    #[arg(short, long, default_value = "50")]
    iterations: usize,

    /// Claude data directory for live runs
    #[arg(long, env = "CLAUDE_GARDEN_DIR")]
    claude_dir: Option<PathBuf>,
}

struct Metrics {
    total_ms: f64,
    history_ms: f64,
    todos_ms: f64,
    sessions_ms: f64,
    process_ms: f64,
    tick_ms: f64,
    session_count: usize,
}

struct Stat {
    mean: f64,
    stddev: f64,
}

impl Stat {
    fn of(metrics: &[Metrics], field: impl Fn(&Metrics) -> f64) -> Self {
        let n = metrics.len().max(1) as f64;
        let mean = metrics.iter().map(&field).sum::<f64>() / n;
        let stddev = (metrics
            .iter()
            .map(|m| (field(m) - mean).powi(2))
            .sum::<f64>()
            / n)
            .sqrt();
        Self { mean, stddev }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Mock transcript tail representing a typical mid-turn session
fn mock_transcript_lines(project: &str) -> Vec<String> {
    vec![
        r#"{"type":"user","message":{"role":"user","content":"Run the tests"}}"#.to_string(),
        r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Running them now."}]}}"#.to_string(),
        format!(
            r#"{{"type":"assistant","message":{{"content":[{{"type":"tool_use","name":"Edit","input":{{"file_path":"{}/src/lib.rs"}}}}]}}}}"#,
            project
        ),
        r#"{"type":"progress","data":{"hookEvent":"PreToolUse"},"timestamp":"2026-01-29T10:00:00Z"}"#.to_string(),
    ]
}

/// Populate a data directory with `count` sessions across `count / 2` projects
fn generate_mock_dir(root: &Path, count: usize) -> Result<()> {
    let paths = GardenPaths::from_claude_dir(root);
    fs::create_dir_all(&paths.todos_dir)?;
    fs::create_dir_all(&paths.tasks_dir)?;
    fs::create_dir_all(&paths.projects_dir)?;

    let now = unix_now_ms();
    let mut history = String::new();
    for i in 0..count {
        let session = format!("00000000-0000-0000-0000-{:012}", i);
        let project = format!("/home/bench/project-{}", i / 2);
        for turn in 0..20 {
            history.push_str(&format!(
                "{{\"sessionId\":\"{}\",\"project\":\"{}\",\"timestamp\":{},\"display\":\"message {}\"}}\n",
                session,
                project,
                now - (i as i64 * 60_000) - turn * 1000,
                turn
            ));
        }

        fs::write(
            paths.todos_dir.join(format!("{}-agent-{}.json", session, session)),
            r#"[{"content":"Write code","status":"completed"},{"content":"Test","status":"in_progress","activeForm":"Testing"}]"#,
        )?;

        let task_dir = paths.task_dir(&session);
        fs::create_dir_all(&task_dir)?;
        for n in 1..=3 {
            fs::write(
                task_dir.join(format!("{}.json", n)),
                format!(r#"{{"id":"{}","subject":"Task {}","status":"pending"}}"#, n, n),
            )?;
        }

        let transcript_dir = paths.projects_dir.join(encode_project_path(&project));
        fs::create_dir_all(&transcript_dir)?;
        fs::write(
            transcript_dir.join(format!("{}.jsonl", session)),
            mock_transcript_lines(&project).join("\n") + "\n",
        )?;
    }
    fs::write(&paths.history_file, history)?;
    Ok(())
}

fn run_cycle(config: &GardenConfig, reader: &SessionReader) -> Metrics {
    let total_start = Instant::now();
    let paths = &config.paths;
    let now = unix_now_ms();

    let start = Instant::now();
    let history = read_history(&paths.history_file, config.history_tail_bytes);
    let history_ms = elapsed_ms(start);

    let start = Instant::now();
    let _todos = read_todos(&paths.todos_dir);
    let todos_ms = elapsed_ms(start);

    let start = Instant::now();
    let selected = select_records(history.into_values().collect(), config.max_sessions);
    for record in &selected {
        let _tasks = read_task_dir(&paths.task_dir(&record.session_id));
        let _probe = probe_transcript(
            &paths.projects_dir,
            &record.project_path,
            &record.session_id,
            config.transcript_tail_bytes,
        );
    }
    let sessions_ms = elapsed_ms(start);

    // zero TTL: measure a real query every cycle
    let start = Instant::now();
    let _live = LiveProcessDetector::system(Duration::ZERO, config.process_query_timeout).live_sessions();
    let process_ms = elapsed_ms(start);

    let start = Instant::now();
    let shown = reader.read_sessions(now);
    let tick_ms = elapsed_ms(start);

    Metrics {
        total_ms: elapsed_ms(total_start),
        history_ms,
        todos_ms,
        sessions_ms,
        process_ms,
        tick_ms,
        session_count: shown.len(),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    println!("claude-garden refresh benchmark");
    println!("===============================\n");

    let mock_root = std::env::temp_dir().join(format!("claude-garden-bench-{}", std::process::id()));
    let paths = if args.mock {
        generate_mock_dir(&mock_root, args.sessions).context("Failed to generate mock data")?;
        println!(
            "Running {} mock refresh cycles ({} sessions)...\n",
            args.iterations, args.sessions
        );
        GardenPaths::from_claude_dir(&mock_root)
    } else {
        println!("Running {} refresh cycles...\n", args.iterations);
        GardenPaths::discover(args.claude_dir.as_deref())?
    };

    // mock sessions have no agent process; liveness would hide them all
    let config = GardenConfig::new(paths).with_liveness(!args.mock);
    let reader = SessionReader::new(config.clone());

    let mut all_metrics: Vec<Metrics> = Vec::with_capacity(args.iterations);
    for i in 1..=args.iterations {
        let metrics = run_cycle(&config, &reader);

        // Print progress every 10 iterations
        if i % 10 == 0 || i == 1 {
            println!(
                "[{:>2}] total={:>6.2}ms | history={:>5.2}ms | todos={:>5.2}ms | sessions={:>5.2}ms | process={:>6.2}ms | tick={:>6.2}ms",
                i,
                metrics.total_ms,
                metrics.history_ms,
                metrics.todos_ms,
                metrics.sessions_ms,
                metrics.process_ms,
                metrics.tick_ms,
            );
        }
        all_metrics.push(metrics);
    }

    if args.mock {
        let _ = fs::remove_dir_all(&mock_root);
    }

    let mode = if args.mock { "mock" } else { "live" };
    let shown = all_metrics.first().map(|m| m.session_count).unwrap_or(0);
    println!(
        "\n--- Results over {} {} cycles ({} sessions shown) ---",
        args.iterations, mode, shown
    );

    let total = Stat::of(&all_metrics, |m| m.total_ms);
    println!("total:    {:>6.2}ms ± {:>5.2}ms", total.mean, total.stddev);
    let stages: [(&str, fn(&Metrics) -> f64); 5] = [
        ("history", |m| m.history_ms),
        ("todos", |m| m.todos_ms),
        ("sessions", |m| m.sessions_ms),
        ("process", |m| m.process_ms),
        ("tick", |m| m.tick_ms),
    ];
    for (name, field) in stages {
        let stat = Stat::of(&all_metrics, field);
        let share = if total.mean > 0.0 {
            stat.mean / total.mean * 100.0
        } else {
            0.0
        };
        println!(
            "{:<9} {:>6.2}ms ± {:>5.2}ms ({:>4.1}%)",
            format!("{}:", name),
            stat.mean,
            stat.stddev,
            share
        );
    }

    Ok(())
}

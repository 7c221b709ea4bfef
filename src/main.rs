use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use crossterm::event::{poll, read, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use claude_garden::common::logging;
use claude_garden::common::types::{format_relative_time, truncate_command, SessionSnapshot, SessionStatus};
use claude_garden::daemon::aggregator::{unix_now_ms, SessionReader};
use claude_garden::{GardenConfig, GardenPaths, GardenService, Snapshot};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "claude-garden")]
#[command(about = "Live status of recent Claude Code sessions")]
struct Args {
    /// Claude data directory (default: $CLAUDE_CONFIG_DIR or ~/.claude)
    #[arg(long, env = "CLAUDE_GARDEN_DIR")]
    claude_dir: Option<PathBuf>,

    /// Print sessions as JSON and exit
    #[arg(short, long, conflicts_with_all = ["stream", "watch"])]
    json: bool,

    /// Print one JSON line per refresh until Ctrl+C
    #[arg(short, long, conflicts_with = "watch")]
    stream: bool,

    /// Redraw on every refresh ([R]efresh, [Q]uit)
    #[arg(short, long)]
    watch: bool,

    /// Show sessions even when no agent process is attached
    #[arg(long)]
    no_liveness: bool,

    /// Write debug logs to the cache directory
    #[arg(short, long)]
    debug: bool,
}

const TASK_WIDTH: usize = 60;

fn colorize_status(status: SessionStatus) -> ColoredString {
    let label = format!("{:<7}", status.to_string());
    match status {
        SessionStatus::Working => label.green(),
        SessionStatus::Waiting => label.on_cyan().black(),
        SessionStatus::Idle => label.dimmed(),
        SessionStatus::Done => label.blue(),
        SessionStatus::Error => label.red().bold(),
    }
}

fn format_progress(completed: usize, total: usize) -> String {
    if total == 0 {
        String::new()
    } else {
        format!("[{}/{}]", completed, total)
    }
}

fn display_sessions(sessions: &[SessionSnapshot], now_ms: i64) {
    if sessions.is_empty() {
        println!("{}", "No active sessions".dimmed());
        return;
    }

    for (i, session) in sessions.iter().enumerate() {
        let lock = if session.has_lock { " *" } else { "" };
        println!(
            "{} {}{} {} {} {}",
            format!("{}.", i + 1).bold(),
            session.project_name.bold(),
            lock,
            colorize_status(session.status),
            format_progress(session.completed_count, session.total_count),
            format_relative_time(now_ms, session.last_activity_at).dimmed()
        );

        if let Some(summary) = &session.current_action.summary {
            println!("{}", format!("   → {}", summary).dimmed());
        }
        if let Some(task) = &session.current_task {
            println!("{}", format!("   {}", truncate_command(task, TASK_WIDTH)).dimmed());
        }
    }
}

fn render_screen(sessions: &[SessionSnapshot]) {
    print!("\x1B[2J\x1B[1;1H"); // Clear screen
    println!(
        "claude-garden - {} - {} sessions - [R]efresh [Q]uit",
        chrono::Local::now().format("%H:%M:%S").to_string().dimmed(),
        sessions.len()
    );
    println!();
    display_sessions(sessions, unix_now_ms());
    let _ = io::stdout().flush();
}

/// Start the service inside the runtime's context
fn start_service(rt: &Runtime, config: GardenConfig) -> GardenService {
    let _enter = rt.enter();
    let service = GardenService::start(config);
    // the first tick may have run before our subscription
    service.refresh_now();
    service
}

fn run_stream(config: GardenConfig) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))
        .context("Failed to set Ctrl+C handler")?;

    let rt = Runtime::new().context("Failed to start async runtime")?;
    let service = start_service(&rt, config);
    let mut rx = service.subscribe();
    let mut stdout = io::stdout().lock();

    while running.load(Ordering::SeqCst) {
        match rx.try_recv() {
            Ok(snapshot) => {
                serde_json::to_writer(&mut stdout, snapshot.as_slice())?;
                writeln!(stdout)?;
                stdout.flush()?;
            }
            Err(TryRecvError::Empty) => thread::sleep(Duration::from_millis(100)),
            Err(TryRecvError::Lagged(skipped)) => debug!(skipped, "stream lagged"),
            Err(TryRecvError::Closed) => break,
        }
    }

    rt.block_on(service.shutdown());
    Ok(())
}

fn run_watch(config: GardenConfig) -> Result<()> {
    let rt = Runtime::new().context("Failed to start async runtime")?;
    let service = start_service(&rt, config);
    let mut rx = service.subscribe();

    let mut current: Snapshot = service.latest();
    render_screen(&current);

    enable_raw_mode().context("Failed to enable raw mode")?;
    let raw_mode = scopeguard::guard((), |_| {
        let _ = disable_raw_mode();
    });

    'outer: loop {
        let mut updated = false;
        loop {
            match rx.try_recv() {
                Ok(snapshot) => {
                    current = snapshot;
                    updated = true;
                }
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => break 'outer,
            }
        }

        if updated {
            // Raw mode off while printing so newlines behave
            let _ = disable_raw_mode();
            render_screen(&current);
            enable_raw_mode().context("Failed to enable raw mode")?;
        }

        if poll(Duration::from_millis(100))? {
            if let Event::Key(KeyEvent { code, modifiers, .. }) = read()? {
                match code {
                    KeyCode::Char('r') | KeyCode::Char('R') => service.refresh_now(),
                    KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => break,
                    KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => break,
                    _ => {}
                }
            }
        }
    }

    drop(raw_mode);
    rt.block_on(service.shutdown());
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(path) = logging::init(args.debug) {
        eprintln!("Debug log: {}", path.display());
    }

    let paths = GardenPaths::discover(args.claude_dir.as_deref())
        .context("Failed to locate the Claude data directory")?;
    debug!(dir = %paths.claude_dir.display(), "data directory");
    let config = GardenConfig::new(paths).with_liveness(!args.no_liveness);

    if args.stream {
        return run_stream(config);
    }
    if args.watch {
        return run_watch(config);
    }

    let sessions = SessionReader::new(config).read_sessions_now();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
    } else {
        display_sessions(&sessions, unix_now_ms());
    }

    Ok(())
}

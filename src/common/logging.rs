//! Logging setup.

use chrono::Utc;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Get the path to the debug log file
pub fn debug_log_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|c| c.join("claude-garden").join("debug.log"))
}

/// Create (truncate) the debug log and stamp a header line
fn open_debug_log(path: &PathBuf) -> io::Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(path)?;
    writeln!(file, "=== claude-garden debug log started at {} ===", Utc::now())?;
    Ok(file)
}

/// Install the global subscriber. `RUST_LOG` overrides the default level.
///
/// Without `debug`, warnings go to stderr. With it, everything at debug and
/// above goes to the debug log file, whose path is returned.
pub fn init(debug: bool) -> Option<PathBuf> {
    let level = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if debug {
        if let Some(path) = debug_log_path() {
            match open_debug_log(&path) {
                Ok(file) => {
                    let installed = tracing_subscriber::fmt()
                        .with_env_filter(filter)
                        .with_ansi(false)
                        .with_writer(Mutex::new(file))
                        .try_init()
                        .is_ok();
                    return installed.then_some(path);
                }
                Err(e) => eprintln!("debug log unavailable at {}: {}", path.display(), e),
            }
        }
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
    None
}

//! Error types.
//!
//! The read pipeline itself never fails: missing or malformed inputs become
//! "no data". Only startup concerns (locating the data directory, arming the
//! file watcher) report errors to a caller.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GardenError {
    #[error("Could not determine home directory; pass --claude-dir")]
    NoHomeDir,

    #[error("Failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("Failed to create file watcher: {0}")]
    Watcher(#[from] notify::Error),
}

/// Why the OS process table could not be read. Always degraded to an empty
/// liveness set by the detector.
#[derive(Debug, Error)]
pub enum ProcessQueryError {
    #[error("Process query timed out after {0:?}")]
    Timeout(Duration),

    #[error("Process table unavailable: {0}")]
    Unavailable(String),

    #[error("Process query worker died")]
    Join,
}

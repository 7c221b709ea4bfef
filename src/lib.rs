//! Session status inference for Claude Code data directories.
//!
//! Reads the agent's history log, todo files, task directories, transcripts
//! and the OS process table, and derives one status row per active project.

pub mod common;
pub mod daemon;

pub use common::error::GardenError;
pub use common::paths::{GardenConfig, GardenPaths};
pub use common::types::{SessionSnapshot, SessionStatus};
pub use daemon::service::{GardenService, Snapshot};

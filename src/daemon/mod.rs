//! Background refresh loop: aggregation, scheduling and the snapshot feed.

pub mod aggregator;
pub mod scheduler;
pub mod service;
pub mod watcher;

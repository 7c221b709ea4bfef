//! Readers and pure logic shared by the refresh loop and the binaries.

pub mod error;
pub mod history;
pub mod logging;
pub mod paths;
pub mod process;
pub mod status;
pub mod tail;
pub mod tasks;
pub mod todos;
pub mod transcript;
pub mod types;

//! The transaction log: configuration, buffers, file set, writer, reader.

pub mod buffer;
pub mod config;
mod files;
mod group_commit;
pub mod reader;
pub mod writer;

pub use buffer::{BlockBuffer, BufferKind, LogBuffer};
pub use config::{log_file_path, ConfigError, LogConfig, LOCK_FILE};
pub use group_commit::LogStats;
pub use reader::{LogFileInfo, LogReadResult, LogReader, LogTail, ReadStopReason};
pub use writer::TransactionLogWriter;

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

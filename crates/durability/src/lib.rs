//! Durability layer for xalog
//!
//! This crate handles everything that touches disk:
//!
//! - Log format: checksummed blocks carrying prepare and done records
//! - Log writer: buffer pool, group commit, circular file set, flush thread
//! - Recovery: replay that rebuilds the in-doubt transaction set
//! - Migration: carrying a log over to a changed configuration

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod format;
pub mod log;
pub mod migration;
pub mod recovery;

pub use error::{LogError, MigrationError, ReplayError};
pub use format::{ChecksumKind, LogRecord, Outcome, RecordError};
pub use log::{
    BufferKind, ConfigError, LogConfig, LogFileInfo, LogReadResult, LogReader, LogStats, LogTail,
    ReadStopReason, TransactionLogWriter,
};
pub use migration::{LogMigrator, LogSource};
pub use recovery::{RecoveryReplayer, ReplayResult, ReplayStats};

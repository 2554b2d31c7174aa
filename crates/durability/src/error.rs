//! Error taxonomy for the transaction log
//!
//! Writer failures surface synchronously to the caller of
//! prepare/commit/rollback as [`LogError`]. Replay only fails when the file
//! set cannot be opened at all; damaged data ends the scan instead.

use std::path::PathBuf;

use xalog_core::{LogMark, XidError};

use crate::log::config::ConfigError;

/// Errors returned by the log writer.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The log has been closed.
    #[error("transaction log is closed")]
    Closed,

    /// A record does not fit in one block.
    #[error("record of {size} bytes exceeds the maximum of {max} bytes")]
    RecordTooLarge {
        /// Encoded record size
        size: usize,
        /// Largest record a block can hold
        max: usize,
    },

    /// Rotation would overwrite a file holding unresolved prepare records.
    ///
    /// The failure is sticky: the writer rejects every later record,
    /// completions included, until the process restarts and recovery
    /// resolves the transactions still in the log. Raise `max_log_files`
    /// or `max_blocks_per_file` before restarting.
    #[error("log file overflow: {} still holds unresolved transactions", file.display())]
    FileOverflow {
        /// File that could not be recycled
        file: PathBuf,
    },

    /// The log was closed while the caller waited for its force.
    #[error("interrupted while waiting for the log to be forced")]
    Interrupted,

    /// The transaction behind this mark has already been completed.
    #[error("transaction at mark {mark:?} is already completed")]
    AlreadyCompleted {
        /// Mark passed to commit or rollback
        mark: LogMark,
    },

    /// The mark belongs to a different transaction.
    #[error("mark {mark:?} does not belong to the given transaction")]
    MarkMismatch {
        /// Mark passed to commit or rollback
        mark: LogMark,
    },

    /// A previous force failed; the log no longer accepts records.
    #[error("log force failed: {0}")]
    ForceFailed(String),

    /// The log on disk was written with a different binary configuration.
    #[error("incompatible log on disk: {0}")]
    Incompatible(String),

    /// Another writer owns the log directory.
    #[error("log directory {} is locked by another writer", .0.display())]
    Locked(PathBuf),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Replay of the existing log failed.
    #[error("replay failed: {0}")]
    Replay(#[from] ReplayError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that prevent a replay from starting.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// I/O error while listing or opening log files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

/// Errors from log migration. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// I/O error while moving, renaming or backing up files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Writing the new log failed.
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// Reading the old log failed.
    #[error("replay error: {0}")]
    Replay(#[from] ReplayError),

    /// A coordinator identity could not seed an Xid generator.
    #[error("invalid coordinator identity: {0}")]
    Identity(#[from] XidError),

    /// Migration failed and the backup could not be put back.
    #[error("migration failed ({cause}); restoring backup {} failed: {restore}", backup.display())]
    RestoreFailed {
        /// Backup directory left on disk
        backup: PathBuf,
        /// Original failure
        cause: String,
        /// Restore failure
        restore: String,
    },
}

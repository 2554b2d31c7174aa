//! Coordinator errors

use xalog_core::XidError;
use xalog_durability::{ConfigError, LogError, MigrationError};

/// Errors surfaced by the transaction coordinator.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// `transaction_timeout_secs` must be positive.
    #[error("transaction timeout must be greater than zero")]
    TransactionTimeoutZero,

    /// Invalid `[log]` settings.
    #[error("log configuration error: {0}")]
    LogConfig(#[from] ConfigError),

    /// Invalid coordinator identity.
    #[error("identity error: {0}")]
    Identity(#[from] XidError),

    /// The log could not be migrated; the coordinator must not start.
    #[error("log migration failed: {0}")]
    Migration(#[from] MigrationError),

    /// A log write failed; the transaction outcome is unknown.
    #[error("transaction log error: {0}")]
    Log(#[from] LogError),
}

/// Result type for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

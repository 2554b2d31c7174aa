//! Transaction coordinator for xalog
//!
//! This crate sits on top of the durability layer:
//! - Coordinator: begin, prepare, commit, rollback, recover
//! - Log modes: recoverable (on-disk) and unrecoverable (no-op)
//! - Configuration: `xalog.toml` with a `[log]` table
//!
//! The coordinator is the only component that knows about:
//! - Coordinator identity and Xid allocation
//! - Startup order (migrate, open, replay, report)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod durability;
pub mod error;

pub use config::{CoordinatorConfig, CONFIG_FILE_NAME, DEFAULT_TMID};
pub use coordinator::{TransactionCoordinator, TransactionMetrics};
pub use durability::{RecoverableLog, TransactionLog, UnrecoverableLog};
pub use error::{CoordinatorError, CoordinatorResult};

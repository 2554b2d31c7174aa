//! xalog: durable decision log for two-phase commit coordinators
//!
//! Re-exports the public API of the member crates:
//!
//! - `xalog-core`: transaction ids and recovery aggregates
//! - `xalog-durability`: on-disk log, replay and migration
//! - `xalog-engine`: the coordinator and its configuration
//!
//! # Example
//!
//! ```ignore
//! use xalog::{CoordinatorConfig, TransactionCoordinator};
//!
//! let config = CoordinatorConfig::from_file(path)?;
//! let coordinator = TransactionCoordinator::open(config, None)?;
//! for pair in coordinator.recover() {
//!     // ask each resource manager in pair.branches() for its outcome
//! }
//! let xid = coordinator.begin();
//! ```

pub use xalog_core::{BranchInfo, LogMark, Xid, XidBranchesPair, XidError, XidGenerator};
pub use xalog_durability::{
    LogConfig, LogError, LogMigrator, LogSource, MigrationError, RecoveryReplayer, ReplayResult,
};
pub use xalog_engine::{
    CoordinatorConfig, CoordinatorError, TransactionCoordinator, TransactionLog,
    TransactionMetrics,
};

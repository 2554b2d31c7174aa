//! Transaction log modes
//!
//! | Mode | Files | Recovery | Use Case |
//! |------|-------|----------|----------|
//! | Recoverable | Circular log set | In-doubt set rebuilt at startup | Production |
//! | Unrecoverable | None | Nothing survives a crash | Tests, volatile resources |
//!
//! # Architecture
//!
//! ```text
//! Two-phase commit:
//!   1. Prepare every branch
//!   2. TransactionLog::prepare()   <- forced before any commit is sent
//!   3. Commit every branch
//!   4. TransactionLog::commit()    <- marks the prepare resolved
//! ```

mod recoverable;
mod traits;
mod unrecoverable;

pub use recoverable::RecoverableLog;
pub use traits::TransactionLog;
pub use unrecoverable::UnrecoverableLog;

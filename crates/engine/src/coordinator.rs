//! Transaction coordinator for two-phase commit
//!
//! The TransactionCoordinator owns the Xid generator and the decision log
//! and adds:
//! - Startup sequence: migrate the log, open it, replay it, report in-doubt
//!   transactions
//! - Bookkeeping of recovered transactions until they are resolved
//! - Transaction metrics (started, committed, rolled back)

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use xalog_core::{BranchInfo, LogMark, Xid, XidBranchesPair, XidGenerator};
use xalog_durability::{LogMigrator, LogSource};

use crate::config::CoordinatorConfig;
use crate::durability::{RecoverableLog, TransactionLog, UnrecoverableLog};
use crate::error::{CoordinatorError, CoordinatorResult};

/// Two-phase commit coordinator.
///
/// # Memory Ordering
///
/// The metric counters use Relaxed ordering; they are purely observational
/// and synchronize nothing else.
pub struct TransactionCoordinator {
    config: CoordinatorConfig,
    generator: XidGenerator,
    log: Box<dyn TransactionLog>,
    /// Transactions found in doubt at startup and not yet resolved
    recovered: Mutex<HashMap<Xid, XidBranchesPair>>,
    active_count: AtomicU64,
    total_started: AtomicU64,
    total_committed: AtomicU64,
    total_rolled_back: AtomicU64,
}

impl TransactionCoordinator {
    /// Start a coordinator.
    ///
    /// `previous` is the configuration the coordinator last ran with, if
    /// known; a changed log configuration is migrated before the log is
    /// opened.
    pub fn open(
        config: CoordinatorConfig,
        previous: Option<&CoordinatorConfig>,
    ) -> CoordinatorResult<Self> {
        Self::open_with(config, previous, |_, _| {})
    }

    /// Start a coordinator, reporting each recovered transaction.
    ///
    /// `on_recovered` receives every in-doubt transaction in log order and
    /// whether its Xid was created under this coordinator's identity.
    pub fn open_with<F>(
        config: CoordinatorConfig,
        previous: Option<&CoordinatorConfig>,
        mut on_recovered: F,
    ) -> CoordinatorResult<Self>
    where
        F: FnMut(&XidBranchesPair, bool),
    {
        config.validate()?;
        let generator = XidGenerator::new(config.identity())?;

        let log: Box<dyn TransactionLog> = if config.recoverable {
            let log_config = config.log_config()?;
            migrate_log(&config, previous)?;
            Box::new(RecoverableLog::open(log_config, &generator)?)
        } else {
            Box::new(UnrecoverableLog::new())
        };

        let mut recovered = HashMap::new();
        for pair in log.recover() {
            let ours = generator.matches_global_id(pair.xid().global_transaction_id());
            if !ours {
                warn!(
                    target: "xalog::coordinator",
                    xid = %pair.xid(),
                    "Recovered transaction was not created by this coordinator identity"
                );
            }
            on_recovered(&pair, ours);
            recovered.insert(pair.xid().clone(), pair);
        }

        info!(
            target: "xalog::coordinator",
            mode = log.mode_name(),
            in_doubt = recovered.len(),
            "Transaction coordinator started"
        );

        Ok(TransactionCoordinator {
            config,
            generator,
            log,
            recovered: Mutex::new(recovered),
            active_count: AtomicU64::new(0),
            total_started: AtomicU64::new(0),
            total_committed: AtomicU64::new(0),
            total_rolled_back: AtomicU64::new(0),
        })
    }

    /// Start a new global transaction.
    pub fn begin(&self) -> Xid {
        let xid = self.generator.create_transaction_id();
        self.active_count.fetch_add(1, Ordering::Relaxed);
        self.total_started.fetch_add(1, Ordering::Relaxed);
        debug!(target: "xalog::coordinator", xid = %xid, "Transaction started");
        xid
    }

    /// Xid for branch `branch_seq` of `xid`.
    pub fn create_branch(&self, xid: &Xid, branch_seq: i32) -> Xid {
        self.generator.create_branch(xid, branch_seq)
    }

    /// Log the prepare decision. Every branch must already be prepared.
    pub fn prepare(&self, xid: &Xid, branches: &[BranchInfo]) -> CoordinatorResult<LogMark> {
        self.log.prepare(xid, branches).map_err(|e| {
            warn!(target: "xalog::coordinator", xid = %xid, error = %e, "Failed to log prepare");
            CoordinatorError::from(e)
        })
    }

    /// Log the commit of a prepared transaction.
    pub fn commit(&self, xid: &Xid, mark: LogMark) -> CoordinatorResult<()> {
        match self.log.commit(xid, mark) {
            Ok(()) => {
                self.resolved(xid);
                self.total_committed.fetch_add(1, Ordering::Relaxed);
                debug!(target: "xalog::coordinator", xid = %xid, "Transaction committed");
                Ok(())
            }
            Err(e) => {
                warn!(target: "xalog::coordinator", xid = %xid, error = %e, "Failed to log commit; outcome unknown");
                Err(e.into())
            }
        }
    }

    /// Log the rollback of a prepared transaction.
    pub fn rollback(&self, xid: &Xid, mark: LogMark) -> CoordinatorResult<()> {
        match self.log.rollback(xid, mark) {
            Ok(()) => {
                self.resolved(xid);
                self.total_rolled_back.fetch_add(1, Ordering::Relaxed);
                debug!(target: "xalog::coordinator", xid = %xid, "Transaction rolled back");
                Ok(())
            }
            Err(e) => {
                warn!(target: "xalog::coordinator", xid = %xid, error = %e, "Failed to log rollback; outcome unknown");
                Err(e.into())
            }
        }
    }

    /// Recovered transactions that are still unresolved, oldest first.
    pub fn recover(&self) -> Vec<XidBranchesPair> {
        let mut pairs: Vec<_> = self.recovered.lock().values().cloned().collect();
        pairs.sort_by_key(|p| p.mark());
        pairs
    }

    /// Close the log. Later prepare, commit and rollback calls fail.
    pub fn close(&self) -> CoordinatorResult<()> {
        self.log.close()?;
        info!(target: "xalog::coordinator", "Transaction coordinator stopped");
        Ok(())
    }

    /// Configured transaction timeout.
    pub fn transaction_timeout(&self) -> Duration {
        self.config.transaction_timeout()
    }

    /// Whether decisions survive a crash.
    pub fn is_persistent(&self) -> bool {
        self.log.is_persistent()
    }

    /// Name of the log mode in use.
    pub fn mode_name(&self) -> &'static str {
        self.log.mode_name()
    }

    /// Xid generator of this coordinator.
    pub fn generator(&self) -> &XidGenerator {
        &self.generator
    }

    /// Configuration in use.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Get transaction metrics
    pub fn metrics(&self) -> TransactionMetrics {
        TransactionMetrics {
            active_count: self.active_count.load(Ordering::Relaxed),
            total_started: self.total_started.load(Ordering::Relaxed),
            total_committed: self.total_committed.load(Ordering::Relaxed),
            total_rolled_back: self.total_rolled_back.load(Ordering::Relaxed),
            in_doubt: self.recovered.lock().len(),
        }
    }

    fn resolved(&self, xid: &Xid) {
        if self.recovered.lock().remove(xid).is_some() {
            info!(target: "xalog::coordinator", xid = %xid, "Recovered transaction resolved");
            return;
        }
        // Saturating decrement
        let _ = self
            .active_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
    }
}

/// Move the log left by `previous` to where `config` expects it.
fn migrate_log(
    config: &CoordinatorConfig,
    previous: Option<&CoordinatorConfig>,
) -> CoordinatorResult<()> {
    let target = config.log_config()?;
    // A previous unrecoverable run left no log behind.
    let previous = previous.filter(|p| p.recoverable);
    let previous_log = previous.map(|p| {
        let mut log = p.log.clone();
        if log.log_file_dir.as_os_str().is_empty() {
            log.log_file_dir = target.log_file_dir.clone();
        }
        log
    });
    let source = match (previous, previous_log.as_ref()) {
        (Some(p), Some(log)) => Some(LogSource::new(log, p.identity())),
        _ => None,
    };

    let migrator = LogMigrator::new(LogSource::new(&target, config.identity()));
    if migrator.migrate(source)? {
        info!(
            target: "xalog::coordinator",
            dir = ?target.log_file_dir,
            "Carried existing transaction log over to the new configuration"
        );
    }
    Ok(())
}

/// Transaction metrics snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionMetrics {
    /// Transactions begun and not yet resolved
    pub active_count: u64,
    /// Transactions begun since startup
    pub total_started: u64,
    /// Commits logged since startup
    pub total_committed: u64,
    /// Rollbacks logged since startup
    pub total_rolled_back: u64,
    /// Recovered transactions still unresolved
    pub in_doubt: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecoverable_coordinator_lifecycle() {
        let coordinator = TransactionCoordinator::open(CoordinatorConfig::default(), None).unwrap();
        assert!(!coordinator.is_persistent());
        assert_eq!(coordinator.mode_name(), "Unrecoverable");

        let xid = coordinator.begin();
        let branch = BranchInfo::new(coordinator.create_branch(&xid, 1), "rm-a");
        let mark = coordinator.prepare(&xid, &[branch]).unwrap();
        coordinator.commit(&xid, mark).unwrap();

        let metrics = coordinator.metrics();
        assert_eq!(metrics.total_started, 1);
        assert_eq!(metrics.total_committed, 1);
        assert_eq!(metrics.active_count, 0);
        assert!(coordinator.recover().is_empty());
    }

    #[test]
    fn test_begin_creates_distinct_xids() {
        let coordinator = TransactionCoordinator::open(CoordinatorConfig::default(), None).unwrap();
        let a = coordinator.begin();
        let b = coordinator.begin();
        assert_ne!(a, b);
        assert!(a.same_transaction(&coordinator.create_branch(&a, 1)));
        assert_eq!(coordinator.metrics().active_count, 2);
    }

    #[test]
    fn test_invalid_config_refuses_to_start() {
        let config = CoordinatorConfig {
            transaction_timeout_secs: 0,
            ..CoordinatorConfig::default()
        };
        assert!(matches!(
            TransactionCoordinator::open(config, None),
            Err(CoordinatorError::TransactionTimeoutZero)
        ));
    }
}

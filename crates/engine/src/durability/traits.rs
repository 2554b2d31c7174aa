//! Transaction log abstraction
//!
//! The coordinator records its decisions through this trait so that the
//! recoverable and unrecoverable modes are interchangeable.

use xalog_core::{BranchInfo, LogMark, Xid, XidBranchesPair};
use xalog_durability::LogError;

/// Decision log behind a transaction coordinator.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; every in-flight transaction calls
/// into the log from its own thread.
///
/// # Example
///
/// ```ignore
/// fn two_phase<L: TransactionLog>(log: &L, xid: &Xid, branches: &[BranchInfo]) -> Result<(), LogError> {
///     let mark = log.prepare(xid, branches)?;
///     // ... commit every branch
///     log.commit(xid, mark)
/// }
/// ```
pub trait TransactionLog: Send + Sync {
    /// Durably record that `xid` is prepared with `branches`.
    ///
    /// Returns the mark that later identifies the prepare record.
    fn prepare(&self, xid: &Xid, branches: &[BranchInfo]) -> Result<LogMark, LogError>;

    /// Durably record the commit of the transaction prepared at `mark`.
    fn commit(&self, xid: &Xid, mark: LogMark) -> Result<(), LogError>;

    /// Durably record the rollback of the transaction prepared at `mark`.
    fn rollback(&self, xid: &Xid, mark: LogMark) -> Result<(), LogError>;

    /// Transactions found in doubt when the log was opened, oldest first.
    fn recover(&self) -> Vec<XidBranchesPair>;

    /// Flush and release the log. Later records fail.
    fn close(&self) -> Result<(), LogError>;

    /// Whether decisions survive a process crash.
    fn is_persistent(&self) -> bool;

    /// Human-readable mode name for logging.
    fn mode_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use xalog_core::XidGenerator;

    // Counts calls and hands out increasing marks.
    #[derive(Default)]
    struct MockLog {
        prepared: Mutex<Vec<LogMark>>,
    }

    impl TransactionLog for MockLog {
        fn prepare(&self, _xid: &Xid, _branches: &[BranchInfo]) -> Result<LogMark, LogError> {
            let mut prepared = self.prepared.lock();
            let mark = LogMark::new(prepared.len() as u32 + 1, 32);
            prepared.push(mark);
            Ok(mark)
        }

        fn commit(&self, _xid: &Xid, mark: LogMark) -> Result<(), LogError> {
            let mut prepared = self.prepared.lock();
            match prepared.iter().position(|m| *m == mark) {
                Some(i) => {
                    prepared.remove(i);
                    Ok(())
                }
                None => Err(LogError::AlreadyCompleted { mark }),
            }
        }

        fn rollback(&self, xid: &Xid, mark: LogMark) -> Result<(), LogError> {
            self.commit(xid, mark)
        }

        fn recover(&self) -> Vec<XidBranchesPair> {
            Vec::new()
        }

        fn close(&self) -> Result<(), LogError> {
            Ok(())
        }

        fn is_persistent(&self) -> bool {
            false
        }

        fn mode_name(&self) -> &'static str {
            "Mock"
        }
    }

    #[test]
    fn test_log_is_object_safe() {
        let log: Box<dyn TransactionLog> = Box::new(MockLog::default());
        let gen = XidGenerator::with_start(b"mock", 1).unwrap();
        let xid = gen.create_transaction_id();

        let mark = log.prepare(&xid, &[]).unwrap();
        log.commit(&xid, mark).unwrap();
        assert!(matches!(
            log.rollback(&xid, mark),
            Err(LogError::AlreadyCompleted { .. })
        ));
        assert_eq!(log.mode_name(), "Mock");
    }
}

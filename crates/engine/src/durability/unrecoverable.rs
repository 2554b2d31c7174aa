//! Unrecoverable mode
//!
//! No files, no forces. Every decision is lost on crash and recovery
//! always finds nothing.

use std::sync::atomic::{AtomicBool, Ordering};

use super::TransactionLog;
use xalog_core::{BranchInfo, LogMark, Xid, XidBranchesPair};
use xalog_durability::LogError;

/// Transaction log that records nothing.
///
/// The only state is the closed flag. After `close`, prepare, commit and
/// rollback fail with [`LogError::Closed`].
#[derive(Debug, Default)]
pub struct UnrecoverableLog {
    closed: AtomicBool,
}

impl UnrecoverableLog {
    /// Create the log.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn check_open(&self) -> Result<(), LogError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LogError::Closed);
        }
        Ok(())
    }
}

impl TransactionLog for UnrecoverableLog {
    #[inline]
    fn prepare(&self, _xid: &Xid, _branches: &[BranchInfo]) -> Result<LogMark, LogError> {
        self.check_open()?;
        Ok(LogMark::NONE)
    }

    #[inline]
    fn commit(&self, _xid: &Xid, _mark: LogMark) -> Result<(), LogError> {
        self.check_open()
    }

    #[inline]
    fn rollback(&self, _xid: &Xid, _mark: LogMark) -> Result<(), LogError> {
        self.check_open()
    }

    fn recover(&self) -> Vec<XidBranchesPair> {
        Vec::new()
    }

    fn close(&self) -> Result<(), LogError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        false
    }

    fn mode_name(&self) -> &'static str {
        "Unrecoverable"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xalog_core::XidGenerator;

    #[test]
    fn test_unrecoverable_is_noop() {
        let log = UnrecoverableLog::new();
        let gen = XidGenerator::with_start(b"volatile", 1).unwrap();
        let xid = gen.create_transaction_id();

        let mark = log.prepare(&xid, &[]).unwrap();
        assert!(mark.is_none());
        log.commit(&xid, mark).unwrap();
        log.rollback(&xid, mark).unwrap();
        assert!(log.recover().is_empty());
        log.close().unwrap();
    }

    #[test]
    fn test_unrecoverable_rejects_calls_after_close() {
        let log = UnrecoverableLog::new();
        let gen = XidGenerator::with_start(b"volatile", 1).unwrap();
        let xid = gen.create_transaction_id();
        let mark = log.prepare(&xid, &[]).unwrap();

        log.close().unwrap();
        assert!(matches!(log.prepare(&xid, &[]), Err(LogError::Closed)));
        assert!(matches!(log.commit(&xid, mark), Err(LogError::Closed)));
        assert!(matches!(log.rollback(&xid, mark), Err(LogError::Closed)));
        log.close().unwrap();
    }

    #[test]
    fn test_unrecoverable_not_persistent() {
        let log = UnrecoverableLog::default();
        assert!(!log.is_persistent());
        assert_eq!(log.mode_name(), "Unrecoverable");
    }
}

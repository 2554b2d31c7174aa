//! Recoverable mode
//!
//! Decisions go to a [`TransactionLogWriter`]; every prepare and completion
//! is forced before the call returns. The in-doubt set found when the log
//! was opened is kept for [`TransactionLog::recover`].

use super::TransactionLog;
use tracing::info;
use xalog_core::{BranchInfo, LogMark, Xid, XidBranchesPair, XidGenerator};
use xalog_durability::{LogConfig, LogError, LogStats, ReplayStats, TransactionLogWriter};

/// Transaction log backed by the on-disk file set.
pub struct RecoverableLog {
    writer: TransactionLogWriter,
    recovered: Vec<XidBranchesPair>,
    replay_stats: ReplayStats,
}

impl RecoverableLog {
    /// Open (or create) the log and replay it.
    pub fn open(config: LogConfig, generator: &XidGenerator) -> Result<Self, LogError> {
        let (writer, replay) = TransactionLogWriter::open(config, generator)?;
        let recovered: Vec<XidBranchesPair> =
            replay.in_doubt_in_log_order().into_iter().cloned().collect();
        info!(
            target: "xalog::coordinator",
            in_doubt = recovered.len(),
            clean_shutdown = replay.stats.clean_shutdown,
            "Recoverable transaction log ready"
        );
        Ok(RecoverableLog {
            writer,
            recovered,
            replay_stats: replay.stats,
        })
    }

    /// Statistics of the replay done at open.
    pub fn replay_stats(&self) -> &ReplayStats {
        &self.replay_stats
    }

    /// Cumulative writer counters.
    pub fn stats(&self) -> LogStats {
        self.writer.stats()
    }
}

impl TransactionLog for RecoverableLog {
    fn prepare(&self, xid: &Xid, branches: &[BranchInfo]) -> Result<LogMark, LogError> {
        self.writer.prepare(xid, branches)
    }

    fn commit(&self, xid: &Xid, mark: LogMark) -> Result<(), LogError> {
        self.writer.commit(xid, mark)
    }

    fn rollback(&self, xid: &Xid, mark: LogMark) -> Result<(), LogError> {
        self.writer.rollback(xid, mark)
    }

    fn recover(&self) -> Vec<XidBranchesPair> {
        self.recovered.clone()
    }

    fn close(&self) -> Result<(), LogError> {
        self.writer.close()
    }

    fn is_persistent(&self) -> bool {
        true
    }

    fn mode_name(&self) -> &'static str {
        "Recoverable"
    }
}

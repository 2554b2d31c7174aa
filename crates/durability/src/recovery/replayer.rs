//! Log replay for recovery
//!
//! Rebuilds the set of transactions that were prepared but never completed.
//!
//! # Replay Properties
//!
//! - **Ordered**: records are applied in log order, oldest file first
//! - **Tolerant**: a damaged tail ends the scan; everything before it counts
//! - **Deterministic**: the same log always yields the same in-doubt set
//!
//! # Usage
//!
//! ```ignore
//! let replayer = RecoveryReplayer::new(&generator);
//! let result = replayer.replay(&config)?;
//! for pair in result.in_doubt_in_log_order() {
//!     // resolve pair with its resource managers
//! }
//! ```

use std::collections::HashMap;

use tracing::{debug, info, warn};
use xalog_core::{BranchInfo, LogMark, Xid, XidBranchesPair, XidGenerator};

use crate::error::ReplayError;
use crate::format::{LogRecord, PrepareRecord};
use crate::log::{LogConfig, LogFileInfo, LogReader, LogTail, ReadStopReason};

/// Statistics from a replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Files holding data that were read
    pub files_read: usize,
    /// Data blocks read
    pub blocks_read: usize,
    /// Records read
    pub records_read: usize,
    /// Prepare records applied
    pub prepares: usize,
    /// Done records that resolved a prepare
    pub completions: usize,
    /// Done records with no matching prepare
    pub unmatched_completions: usize,
    /// Records of other types that were skipped
    pub records_skipped: usize,
    /// Whether the log ends with an end-of-log marker
    pub clean_shutdown: bool,
}

impl ReplayStats {
    /// Create empty stats
    pub fn new() -> Self {
        ReplayStats::default()
    }
}

/// Outcome of a replay.
#[derive(Debug)]
pub struct ReplayResult {
    /// Prepared but not completed transactions, keyed by master Xid
    pub in_doubt: HashMap<Xid, XidBranchesPair>,
    /// Files with a readable header
    pub files: Vec<LogFileInfo>,
    /// End of the readable log
    pub tail: Option<LogTail>,
    /// Why reading stopped
    pub stop_reason: ReadStopReason,
    /// Replay statistics
    pub stats: ReplayStats,
}

impl ReplayResult {
    /// In-doubt transactions ordered by the position of their prepare record.
    pub fn in_doubt_in_log_order(&self) -> Vec<&XidBranchesPair> {
        let mut pairs: Vec<_> = self.in_doubt.values().collect();
        pairs.sort_by_key(|p| p.mark());
        pairs
    }

    /// Whether the log ended without damage.
    pub fn is_clean(&self) -> bool {
        self.stop_reason.is_clean()
    }
}

/// Log replay engine.
pub struct RecoveryReplayer<'a> {
    generator: &'a XidGenerator,
}

impl<'a> RecoveryReplayer<'a> {
    /// Create a replayer that rebuilds Xids with `generator`.
    pub fn new(generator: &'a XidGenerator) -> Self {
        RecoveryReplayer { generator }
    }

    /// Replay the log described by `config`.
    ///
    /// A missing log yields an empty result. Damaged data ends the scan and
    /// is reported in `stop_reason`, never as an error.
    pub fn replay(&self, config: &LogConfig) -> Result<ReplayResult, ReplayError> {
        config.validate()?;
        let read = LogReader::new(config).read_all()?;

        let mut stats = ReplayStats {
            files_read: read.files_read,
            blocks_read: read.blocks_read,
            ..ReplayStats::default()
        };
        let in_doubt = self.apply(&read.records, &mut stats);

        if !read.stop_reason.is_clean() {
            warn!(
                target: "xalog::replay",
                reason = ?read.stop_reason,
                "Log ends with damaged data; recovered everything before it"
            );
        }
        info!(
            target: "xalog::replay",
            dir = ?config.log_file_dir,
            records = stats.records_read,
            in_doubt = in_doubt.len(),
            clean = stats.clean_shutdown,
            "Replayed transaction log"
        );

        Ok(ReplayResult {
            in_doubt,
            files: read.files,
            tail: read.tail,
            stop_reason: read.stop_reason,
            stats,
        })
    }

    /// Apply records in order and return what remains in doubt.
    pub fn apply(
        &self,
        records: &[(LogMark, LogRecord)],
        stats: &mut ReplayStats,
    ) -> HashMap<Xid, XidBranchesPair> {
        let mut in_doubt = HashMap::new();
        for (mark, record) in records {
            stats.records_read += 1;
            match record {
                LogRecord::Prepare(prepare) => {
                    let pair = self.rebuild(prepare, *mark);
                    debug!(
                        target: "xalog::replay",
                        xid = %pair.xid(),
                        ?mark,
                        branches = pair.branches().len(),
                        "Recovered prepare"
                    );
                    stats.prepares += 1;
                    in_doubt.insert(pair.xid().clone(), pair);
                }
                LogRecord::Done(done) => {
                    let xid = self.generator.recover(
                        done.format_id,
                        &done.global_id,
                        &done.branch_qualifier,
                    );
                    if in_doubt.remove(&xid).is_some() {
                        stats.completions += 1;
                    } else {
                        debug!(
                            target: "xalog::replay",
                            xid = %xid,
                            "Completion without prepare in readable log"
                        );
                        stats.unmatched_completions += 1;
                    }
                }
                LogRecord::FileHeader(_) | LogRecord::EndOfLog => {
                    stats.records_skipped += 1;
                }
                LogRecord::Unknown(tag) => {
                    warn!(target: "xalog::replay", tag, ?mark, "Skipping unknown record type");
                    stats.records_skipped += 1;
                }
            }
        }
        stats.clean_shutdown = matches!(records.last(), Some((_, LogRecord::EndOfLog)));
        in_doubt
    }

    fn rebuild(&self, prepare: &PrepareRecord, mark: LogMark) -> XidBranchesPair {
        let xid = self.generator.recover(
            prepare.format_id,
            &prepare.global_id,
            &prepare.branch_qualifier,
        );
        let mut pair = XidBranchesPair::new(xid, Vec::new(), mark);
        for branch in &prepare.branches {
            let branch_xid = self.generator.recover(
                prepare.format_id,
                &prepare.global_id,
                &branch.branch_qualifier,
            );
            pair.add_branch(BranchInfo::new(branch_xid, branch.resource_name.clone()));
        }
        pair
    }
}

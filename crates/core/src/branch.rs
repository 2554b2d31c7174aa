//! Branch bookkeeping shared by the writer and recovery

use crate::xid::{Xid, BRANCH_QUALIFIER_SIZE};

/// One resource manager's participation in a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchInfo {
    branch_xid: Xid,
    resource_name: String,
}

impl BranchInfo {
    /// Create branch info for `branch_xid` enlisted with `resource_name`.
    pub fn new(branch_xid: Xid, resource_name: impl Into<String>) -> Self {
        BranchInfo {
            branch_xid,
            resource_name: resource_name.into(),
        }
    }

    /// The branch Xid.
    pub fn branch_xid(&self) -> &Xid {
        &self.branch_xid
    }

    /// The branch qualifier of the branch Xid.
    pub fn branch_qualifier(&self) -> &[u8; BRANCH_QUALIFIER_SIZE] {
        self.branch_xid.branch_qualifier()
    }

    /// Name of the resource manager owning this branch.
    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }
}

/// Opaque position of a prepare record in the log.
///
/// Encodes the block sequence number in the high 32 bits and the record
/// offset within the block in the low 32 bits. Block sequence numbers start
/// at 1, so [`LogMark::NONE`] never names a real record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogMark(u64);

impl LogMark {
    /// Mark returned by logs that do not persist anything.
    pub const NONE: LogMark = LogMark(0);

    /// Mark for the record at `offset` in block `bsn`.
    pub fn new(bsn: u32, offset: u32) -> Self {
        LogMark(((bsn as u64) << 32) | offset as u64)
    }

    /// Rebuild a mark from its raw value.
    pub fn from_raw(raw: u64) -> Self {
        LogMark(raw)
    }

    /// Raw 64-bit value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Block sequence number.
    pub fn bsn(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Record offset within the block.
    pub fn offset(&self) -> u32 {
        self.0 as u32
    }

    /// Whether this is [`LogMark::NONE`].
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

/// An in-doubt transaction reconstructed from the log.
///
/// `mark` is the position of the prepare record, so the outcome can be
/// logged against it after a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XidBranchesPair {
    xid: Xid,
    branches: Vec<BranchInfo>,
    mark: LogMark,
}

impl XidBranchesPair {
    /// Create a pair for `xid` prepared at `mark`.
    pub fn new(xid: Xid, branches: Vec<BranchInfo>, mark: LogMark) -> Self {
        XidBranchesPair {
            xid,
            branches,
            mark,
        }
    }

    /// The master Xid.
    pub fn xid(&self) -> &Xid {
        &self.xid
    }

    /// Branches recorded in the prepare record.
    pub fn branches(&self) -> &[BranchInfo] {
        &self.branches
    }

    /// Add a branch.
    pub fn add_branch(&mut self, branch: BranchInfo) {
        self.branches.push(branch);
    }

    /// Position of the prepare record.
    pub fn mark(&self) -> LogMark {
        self.mark
    }

    /// Names of the resource managers with a branch in this transaction.
    pub fn resource_names(&self) -> impl Iterator<Item = &str> {
        self.branches.iter().map(|b| b.resource_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::XidGenerator;

    #[test]
    fn test_log_mark_packing() {
        let mark = LogMark::new(7, 96);
        assert_eq!(mark.bsn(), 7);
        assert_eq!(mark.offset(), 96);
        assert_eq!(LogMark::from_raw(mark.as_u64()), mark);
        assert!(!mark.is_none());
        assert!(LogMark::NONE.is_none());
    }

    #[test]
    fn test_log_marks_order_by_position() {
        assert!(LogMark::new(1, 500) < LogMark::new(2, 32));
        assert!(LogMark::new(2, 32) < LogMark::new(2, 33));
    }

    #[test]
    fn test_pair_collects_branches() {
        let gen = XidGenerator::with_start(b"tm", 10).unwrap();
        let xid = gen.create_transaction_id();
        let mut pair = XidBranchesPair::new(xid.clone(), Vec::new(), LogMark::new(1, 32));

        pair.add_branch(BranchInfo::new(gen.create_branch(&xid, 1), "rm-a"));
        pair.add_branch(BranchInfo::new(gen.create_branch(&xid, 2), "rm-b"));

        assert_eq!(pair.branches().len(), 2);
        assert_eq!(pair.resource_names().collect::<Vec<_>>(), vec!["rm-a", "rm-b"]);
        assert_eq!(pair.branches()[1].branch_qualifier()[0], 2);
        assert!(pair.branches().iter().all(|b| b.branch_xid().same_transaction(&xid)));
    }
}

//! Xid allocation
//!
//! # Global id layout
//!
//! ```text
//! ┌────────────────────┬──────────────────────────────────────────┐
//! │ counter (8, LE)    │ base id: coordinator identity (56)       │
//! └────────────────────┴──────────────────────────────────────────┘
//! ```
//!
//! # Branch qualifier layout
//!
//! ```text
//! ┌──────────────┬──────────────────┬──────────────────────────────┐
//! │ seq (4, LE)  │ start (8, LE)    │ base id tail (52)            │
//! └──────────────┴──────────────────┴──────────────────────────────┘
//! ```
//!
//! The counter is seeded with the wall-clock start time in milliseconds.
//! An id is only recognised as recoverable when its counter (or, for a
//! branch, its embedded start time) is below the current start value, so a
//! restarted coordinator never confuses a fresh transaction with one found
//! in the log.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::xid::{Xid, BRANCH_QUALIFIER_SIZE, FORMAT_ID, GLOBAL_ID_SIZE};

/// Maximum length of the coordinator identity copied into the base id.
pub const MAX_IDENTITY_LEN: usize = GLOBAL_ID_SIZE - 8;

const BRANCH_TAIL_OFFSET: usize = 12;

/// Generator construction errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XidError {
    /// Coordinator identity does not fit the base id.
    #[error("coordinator identity is {len} bytes, maximum is {max}")]
    IdentityTooLong {
        /// Identity length supplied
        len: usize,
        /// Maximum accepted length
        max: usize,
    },
}

/// Per-coordinator Xid generator.
///
/// Constructed once per coordinator and shared by reference. The counter is
/// an atomic, so concurrent `create_transaction_id` calls never return the
/// same id.
#[derive(Debug)]
pub struct XidGenerator {
    base_id: [u8; GLOBAL_ID_SIZE],
    start: u64,
    counter: AtomicU64,
}

impl XidGenerator {
    /// Create a generator seeded from the current wall-clock time.
    pub fn new(identity: &[u8]) -> Result<Self, XidError> {
        Self::with_start(identity, now_millis())
    }

    /// Create a generator with an explicit start value.
    pub fn with_start(identity: &[u8], start: u64) -> Result<Self, XidError> {
        if identity.len() > MAX_IDENTITY_LEN {
            return Err(XidError::IdentityTooLong {
                len: identity.len(),
                max: MAX_IDENTITY_LEN,
            });
        }
        let mut base_id = [0u8; GLOBAL_ID_SIZE];
        base_id[8..8 + identity.len()].copy_from_slice(identity);

        Ok(XidGenerator {
            base_id,
            start,
            counter: AtomicU64::new(start),
        })
    }

    /// Start value of this generator (milliseconds since epoch for `new`).
    pub fn start(&self) -> u64 {
        self.start
    }

    /// The base id template (counter bytes zeroed).
    pub fn base_id(&self) -> &[u8; GLOBAL_ID_SIZE] {
        &self.base_id
    }

    /// Allocate a new global Xid.
    pub fn create_transaction_id(&self) -> Xid {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let mut global_id = self.base_id;
        global_id[0..8].copy_from_slice(&id.to_le_bytes());
        Xid::new(FORMAT_ID, global_id, [0u8; BRANCH_QUALIFIER_SIZE])
    }

    /// Derive the Xid of branch `branch_seq` of `global`.
    pub fn create_branch(&self, global: &Xid, branch_seq: i32) -> Xid {
        let mut branch = [0u8; BRANCH_QUALIFIER_SIZE];
        branch.copy_from_slice(&self.base_id[..BRANCH_QUALIFIER_SIZE]);
        branch[0..4].copy_from_slice(&branch_seq.to_le_bytes());
        branch[4..12].copy_from_slice(&self.start.to_le_bytes());
        Xid::new(global.format_id(), *global.global_transaction_id(), branch)
    }

    /// Whether `global_id` was produced by a generator with this identity
    /// that started before this one.
    pub fn matches_global_id(&self, global_id: &[u8]) -> bool {
        if global_id.len() != GLOBAL_ID_SIZE || global_id[8..] != self.base_id[8..] {
            return false;
        }
        read_u64(&global_id[0..8]) < self.start
    }

    /// Whether `branch_qualifier` was produced by a generator with this
    /// identity that started before this one.
    pub fn matches_branch_id(&self, branch_qualifier: &[u8]) -> bool {
        if branch_qualifier.len() != BRANCH_QUALIFIER_SIZE
            || branch_qualifier[BRANCH_TAIL_OFFSET..]
                != self.base_id[BRANCH_TAIL_OFFSET..BRANCH_QUALIFIER_SIZE]
        {
            return false;
        }
        read_u64(&branch_qualifier[4..12]) < self.start
    }

    /// Rebuild an Xid from logged bytes without validation.
    pub fn recover(&self, format_id: i32, global_id: &[u8], branch_qualifier: &[u8]) -> Xid {
        Xid::from_slices(format_id, global_id, branch_qualifier)
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_identity_too_long_is_rejected() {
        let result = XidGenerator::new(&[b'x'; MAX_IDENTITY_LEN + 1]);
        assert!(matches!(
            result,
            Err(XidError::IdentityTooLong { len: 57, max: 56 })
        ));
        assert!(XidGenerator::new(&[b'x'; MAX_IDENTITY_LEN]).is_ok());
    }

    #[test]
    fn test_global_id_layout() {
        let gen = XidGenerator::with_start(b"tm-1", 5_000).unwrap();
        let xid = gen.create_transaction_id();

        assert_eq!(xid.format_id(), FORMAT_ID);
        assert_eq!(xid.counter(), 5_000);
        assert_eq!(&xid.global_transaction_id()[8..12], b"tm-1");
        assert!(xid.is_global());
    }

    #[test]
    fn test_branch_layout() {
        let gen = XidGenerator::with_start(b"tm-1", 5_000).unwrap();
        let global = gen.create_transaction_id();
        let branch = gen.create_branch(&global, 3);

        assert!(branch.same_transaction(&global));
        let bq = branch.branch_qualifier();
        assert_eq!(bq[0], 3);
        assert_eq!(read_u64(&bq[4..12]), 5_000);
    }

    #[test]
    fn test_own_ids_do_not_match_as_recoverable() {
        let gen = XidGenerator::with_start(b"tm-1", 5_000).unwrap();
        let global = gen.create_transaction_id();
        let branch = gen.create_branch(&global, 1);

        assert!(!gen.matches_global_id(global.global_transaction_id()));
        assert!(!gen.matches_branch_id(branch.branch_qualifier()));
    }

    #[test]
    fn test_restart_recognises_previous_ids() {
        let before = XidGenerator::with_start(b"tm-1", 1_000).unwrap();
        let after = XidGenerator::with_start(b"tm-1", 2_000).unwrap();

        let old = before.create_transaction_id();
        let old_branch = before.create_branch(&old, 1);
        assert!(after.matches_global_id(old.global_transaction_id()));
        assert!(after.matches_branch_id(old_branch.branch_qualifier()));

        let new = after.create_transaction_id();
        let new_branch = after.create_branch(&new, 1);
        assert!(!before.matches_global_id(new.global_transaction_id()));
        assert!(!before.matches_branch_id(new_branch.branch_qualifier()));
    }

    #[test]
    fn test_other_identity_does_not_match() {
        let a = XidGenerator::with_start(b"tm-a", 1_000).unwrap();
        let b = XidGenerator::with_start(b"tm-b", 2_000).unwrap();
        let xid = a.create_transaction_id();
        assert!(!b.matches_global_id(xid.global_transaction_id()));
        assert!(!b.matches_global_id(&xid.global_transaction_id()[..10]));
    }

    #[test]
    fn test_recover_reconstructs_exact_xid() {
        let gen = XidGenerator::with_start(b"tm-1", 1).unwrap();
        let global = gen.create_transaction_id();
        let branch = gen.create_branch(&global, 2);

        let recovered = gen.recover(
            branch.format_id(),
            branch.global_transaction_id(),
            branch.branch_qualifier(),
        );
        assert_eq!(recovered, branch);
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let gen = Arc::new(XidGenerator::new(b"tm-concurrent").unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gen = Arc::clone(&gen);
                std::thread::spawn(move || {
                    (0..500)
                        .map(|_| gen.create_transaction_id())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for xid in handle.join().unwrap() {
                assert!(seen.insert(xid), "duplicate xid allocated");
            }
        }
        assert_eq!(seen.len(), 4_000);
    }

    proptest! {
        #[test]
        fn prop_sequential_ids_are_distinct(n in 1usize..512, start in 0u64..1_000_000) {
            let gen = XidGenerator::with_start(b"prop", start).unwrap();
            let ids: HashSet<Xid> = (0..n).map(|_| gen.create_transaction_id()).collect();
            prop_assert_eq!(ids.len(), n);
        }
    }
}

//! X/Open transaction identifiers
//!
//! An [`Xid`] has three parts:
//! - `format_id`: tag identifying the generator that produced the id
//! - `global_transaction_id`: 64 bytes shared by every branch of one transaction
//! - `branch_qualifier`: 64 bytes distinguishing the branches
//!
//! Both byte arrays are fixed-size and owned. Multi-byte integers embedded in
//! them are always little-endian, independent of the host.

use std::fmt;

/// Size of the global transaction id in bytes.
pub const GLOBAL_ID_SIZE: usize = 64;

/// Size of the branch qualifier in bytes.
pub const BRANCH_QUALIFIER_SIZE: usize = 64;

/// Format id stamped on every Xid produced by [`crate::XidGenerator`] ("Gero").
pub const FORMAT_ID: i32 = 0x4765_726f;

/// Transaction identifier.
///
/// Two Xids with equal global ids are branches of the same distributed
/// transaction. A master (global) Xid has an all-zero branch qualifier.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Xid {
    format_id: i32,
    global_id: [u8; GLOBAL_ID_SIZE],
    branch_qualifier: [u8; BRANCH_QUALIFIER_SIZE],
}

impl Xid {
    /// Create an Xid from its fixed-size parts.
    pub fn new(
        format_id: i32,
        global_id: [u8; GLOBAL_ID_SIZE],
        branch_qualifier: [u8; BRANCH_QUALIFIER_SIZE],
    ) -> Self {
        Xid {
            format_id,
            global_id,
            branch_qualifier,
        }
    }

    /// Create an Xid from raw slices.
    ///
    /// Shorter slices are zero-padded, longer ones are truncated.
    pub fn from_slices(format_id: i32, global_id: &[u8], branch_qualifier: &[u8]) -> Self {
        let mut gid = [0u8; GLOBAL_ID_SIZE];
        let n = global_id.len().min(GLOBAL_ID_SIZE);
        gid[..n].copy_from_slice(&global_id[..n]);

        let mut bq = [0u8; BRANCH_QUALIFIER_SIZE];
        let n = branch_qualifier.len().min(BRANCH_QUALIFIER_SIZE);
        bq[..n].copy_from_slice(&branch_qualifier[..n]);

        Xid::new(format_id, gid, bq)
    }

    /// Format id of the generator that produced this Xid.
    pub fn format_id(&self) -> i32 {
        self.format_id
    }

    /// Global transaction id bytes.
    pub fn global_transaction_id(&self) -> &[u8; GLOBAL_ID_SIZE] {
        &self.global_id
    }

    /// Branch qualifier bytes.
    pub fn branch_qualifier(&self) -> &[u8; BRANCH_QUALIFIER_SIZE] {
        &self.branch_qualifier
    }

    /// The 64-bit counter held in bytes 0..8 of the global id.
    pub fn counter(&self) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.global_id[0..8]);
        u64::from_le_bytes(raw)
    }

    /// Whether this is a master Xid (no branch qualifier).
    pub fn is_global(&self) -> bool {
        self.branch_qualifier.iter().all(|b| *b == 0)
    }

    /// Whether both Xids belong to the same distributed transaction.
    pub fn same_transaction(&self, other: &Xid) -> bool {
        self.global_id == other.global_id
    }

    /// The master Xid of this branch.
    pub fn master(&self) -> Xid {
        Xid::new(self.format_id, self.global_id, [0u8; BRANCH_QUALIFIER_SIZE])
    }
}

/// Hex of `bytes` with trailing zero bytes elided.
fn write_trimmed_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    let end = bytes
        .iter()
        .rposition(|b| *b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    for b in &bytes[..end] {
        write!(f, "{:02x}", b)?;
    }
    Ok(())
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}:", self.format_id)?;
        write_trimmed_hex(f, &self.global_id)?;
        write!(f, ":")?;
        write_trimmed_hex(f, &self.branch_qualifier)
    }
}

impl fmt::Debug for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Xid({})", self)
    }
}

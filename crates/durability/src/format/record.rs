//! Log record format.
//!
//! # Record Layout
//!
//! ```text
//! ┌──────────────┬────────────────┬─────────────────────────┐
//! │ Type (2)     │ Length (2)     │ Payload (Length bytes)  │
//! └──────────────┴────────────────┴─────────────────────────┘
//! ```
//!
//! # Prepare Payload
//!
//! ```text
//! ┌──────────────┬───────────┬───────────┬───────────┬──────────────────────────────────────┐
//! │ Format (4)   │ Gtrid (64)│ Bqual (64)│ Count (2) │ Count × [Bqual (64) │ Len (2) │ Name] │
//! └──────────────┴───────────┴───────────┴───────────┴──────────────────────────────────────┘
//! ```
//!
//! # Done Payload
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────┬───────────┬───────────┐
//! │ Outcome (1)  │ Mark (8)     │ Format (4)   │ Gtrid (64)│ Bqual (64)│
//! └──────────────┴──────────────┴──────────────┴───────────┴───────────┘
//! ```
//!
//! All integers are little-endian. Records never span blocks.

use xalog_core::{BranchInfo, LogMark, Xid, BRANCH_QUALIFIER_SIZE, GLOBAL_ID_SIZE};

use super::block::{read_u16, read_u32, read_u64};
use super::file_header::FileHeader;

/// Size of the record header (type + length)
pub const RECORD_HEADER_SIZE: usize = 4;

const XID_SIZE: usize = 4 + GLOBAL_ID_SIZE + BRANCH_QUALIFIER_SIZE;

/// Record type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RecordType {
    /// File header, first record of every file
    FileHeader = 1,
    /// Prepare decision with the branch list
    Prepare = 2,
    /// Commit or rollback of a prepared transaction
    Done = 3,
    /// Clean shutdown marker
    EndOfLog = 4,
}

impl RecordType {
    /// Parse a type tag.
    pub fn from_u16(tag: u16) -> Option<Self> {
        match tag {
            1 => Some(RecordType::FileHeader),
            2 => Some(RecordType::Prepare),
            3 => Some(RecordType::Done),
            4 => Some(RecordType::EndOfLog),
            _ => None,
        }
    }
}

/// Final outcome of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Committed
    Commit,
    /// Rolled back
    Rollback,
}

impl Outcome {
    fn as_u8(&self) -> u8 {
        match self {
            Outcome::Commit => 2,
            Outcome::Rollback => 3,
        }
    }

    fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            2 => Some(Outcome::Commit),
            3 => Some(Outcome::Rollback),
            _ => None,
        }
    }
}

/// A branch as stored in a prepare record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedBranch {
    /// Branch qualifier of the branch Xid
    pub branch_qualifier: [u8; BRANCH_QUALIFIER_SIZE],
    /// Resource manager name
    pub resource_name: String,
}

/// Prepare record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareRecord {
    /// Xid format id
    pub format_id: i32,
    /// Global transaction id
    pub global_id: [u8; GLOBAL_ID_SIZE],
    /// Branch qualifier of the prepared Xid
    pub branch_qualifier: [u8; BRANCH_QUALIFIER_SIZE],
    /// Branches in enlistment order
    pub branches: Vec<LoggedBranch>,
}

impl PrepareRecord {
    /// Build the record for `xid` and its branches.
    pub fn new(xid: &Xid, branches: &[BranchInfo]) -> Self {
        PrepareRecord {
            format_id: xid.format_id(),
            global_id: *xid.global_transaction_id(),
            branch_qualifier: *xid.branch_qualifier(),
            branches: branches
                .iter()
                .map(|b| LoggedBranch {
                    branch_qualifier: *b.branch_qualifier(),
                    resource_name: b.resource_name().to_string(),
                })
                .collect(),
        }
    }

    /// Encoded payload size.
    pub fn encoded_len(&self) -> usize {
        XID_SIZE
            + 2
            + self
                .branches
                .iter()
                .map(|b| BRANCH_QUALIFIER_SIZE + 2 + b.resource_name.len())
                .sum::<usize>()
    }

    /// Serialize the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        put_xid(
            &mut out,
            self.format_id,
            &self.global_id,
            &self.branch_qualifier,
        );
        out.extend_from_slice(&(self.branches.len() as u16).to_le_bytes());
        for branch in &self.branches {
            out.extend_from_slice(&branch.branch_qualifier);
            out.extend_from_slice(&(branch.resource_name.len() as u16).to_le_bytes());
            out.extend_from_slice(branch.resource_name.as_bytes());
        }
        out
    }

    /// Deserialize the payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        let mut cursor = Cursor::new(bytes);
        let (format_id, global_id, branch_qualifier) = cursor.xid()?;
        let count = cursor.u16()? as usize;
        let mut branches = Vec::with_capacity(count);
        for _ in 0..count {
            let mut bq = [0u8; BRANCH_QUALIFIER_SIZE];
            bq.copy_from_slice(cursor.take(BRANCH_QUALIFIER_SIZE)?);
            let len = cursor.u16()? as usize;
            let name = std::str::from_utf8(cursor.take(len)?)
                .map_err(|e| RecordError::InvalidFormat(format!("resource name: {}", e)))?;
            branches.push(LoggedBranch {
                branch_qualifier: bq,
                resource_name: name.to_string(),
            });
        }
        cursor.finish()?;
        Ok(PrepareRecord {
            format_id,
            global_id,
            branch_qualifier,
            branches,
        })
    }
}

/// Commit or rollback record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoneRecord {
    /// Outcome
    pub outcome: Outcome,
    /// Mark of the prepare record being completed
    pub prepare_mark: LogMark,
    /// Xid format id
    pub format_id: i32,
    /// Global transaction id
    pub global_id: [u8; GLOBAL_ID_SIZE],
    /// Branch qualifier
    pub branch_qualifier: [u8; BRANCH_QUALIFIER_SIZE],
}

impl DoneRecord {
    /// Encoded payload size.
    pub const ENCODED_LEN: usize = 1 + 8 + XID_SIZE;

    /// Build the record completing `xid` prepared at `mark`.
    pub fn new(outcome: Outcome, xid: &Xid, mark: LogMark) -> Self {
        DoneRecord {
            outcome,
            prepare_mark: mark,
            format_id: xid.format_id(),
            global_id: *xid.global_transaction_id(),
            branch_qualifier: *xid.branch_qualifier(),
        }
    }

    /// Serialize the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.push(self.outcome.as_u8());
        out.extend_from_slice(&self.prepare_mark.as_u64().to_le_bytes());
        put_xid(
            &mut out,
            self.format_id,
            &self.global_id,
            &self.branch_qualifier,
        );
        out
    }

    /// Deserialize the payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        let mut cursor = Cursor::new(bytes);
        let tag = cursor.take(1)?[0];
        let outcome = Outcome::from_u8(tag)
            .ok_or_else(|| RecordError::InvalidFormat(format!("unknown outcome {}", tag)))?;
        let prepare_mark = LogMark::from_raw(read_u64(cursor.take(8)?));
        let (format_id, global_id, branch_qualifier) = cursor.xid()?;
        cursor.finish()?;
        Ok(DoneRecord {
            outcome,
            prepare_mark,
            format_id,
            global_id,
            branch_qualifier,
        })
    }
}

/// A decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// File header
    FileHeader(FileHeader),
    /// Prepare
    Prepare(PrepareRecord),
    /// Commit or rollback
    Done(DoneRecord),
    /// Clean shutdown marker
    EndOfLog,
    /// Record with a type tag this version does not know
    Unknown(u16),
}

impl LogRecord {
    /// Decode a record payload of type `tag`.
    pub fn decode(tag: u16, payload: &[u8]) -> Result<Self, RecordError> {
        match RecordType::from_u16(tag) {
            Some(RecordType::FileHeader) => FileHeader::from_bytes(payload).map(LogRecord::FileHeader),
            Some(RecordType::Prepare) => PrepareRecord::from_bytes(payload).map(LogRecord::Prepare),
            Some(RecordType::Done) => DoneRecord::from_bytes(payload).map(LogRecord::Done),
            Some(RecordType::EndOfLog) => Ok(LogRecord::EndOfLog),
            None => Ok(LogRecord::Unknown(tag)),
        }
    }

    /// Type tag and payload for this record.
    pub fn encode(&self) -> (u16, Vec<u8>) {
        match self {
            LogRecord::FileHeader(h) => (RecordType::FileHeader as u16, h.to_bytes().to_vec()),
            LogRecord::Prepare(p) => (RecordType::Prepare as u16, p.to_bytes()),
            LogRecord::Done(d) => (RecordType::Done as u16, d.to_bytes()),
            LogRecord::EndOfLog => (RecordType::EndOfLog as u16, Vec::new()),
            LogRecord::Unknown(tag) => (*tag, Vec::new()),
        }
    }
}

/// Iterator over the raw records of one block's data area.
///
/// Yields `(offset, tag, payload)` where `offset` is relative to the start
/// of the block (header included), matching the offset in a [`LogMark`].
pub struct RecordIter<'a> {
    data: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> RecordIter<'a> {
    /// Iterate the records in `data` (the bytes after the block header).
    pub fn new(data: &'a [u8]) -> Self {
        RecordIter {
            data,
            pos: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<(u32, u16, &'a [u8]), RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.data.len() {
            return None;
        }
        let remaining = &self.data[self.pos..];
        if remaining.len() < RECORD_HEADER_SIZE {
            self.failed = true;
            return Some(Err(RecordError::InsufficientData));
        }
        let tag = read_u16(&remaining[0..2]);
        let len = read_u16(&remaining[2..4]) as usize;
        if remaining.len() < RECORD_HEADER_SIZE + len {
            self.failed = true;
            return Some(Err(RecordError::InsufficientData));
        }
        let offset = (super::block::BLOCK_HEADER_SIZE + self.pos) as u32;
        let payload = &remaining[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + len];
        self.pos += RECORD_HEADER_SIZE + len;
        Some(Ok((offset, tag, payload)))
    }
}

/// Record decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// Not enough data to parse
    #[error("insufficient data to parse record")]
    InsufficientData,

    /// Structurally invalid content
    #[error("invalid record format: {0}")]
    InvalidFormat(String),

    /// Block checksum verification failed
    #[error("checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the block header
        expected: u32,
        /// Checksum of the data read
        computed: u32,
    },

    /// Block does not start with the block magic
    #[error("bad block magic")]
    BadMagic,
}

fn put_xid(out: &mut Vec<u8>, format_id: i32, global_id: &[u8], branch_qualifier: &[u8]) {
    out.extend_from_slice(&format_id.to_le_bytes());
    out.extend_from_slice(global_id);
    out.extend_from_slice(branch_qualifier);
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], RecordError> {
        if self.bytes.len() - self.pos < n {
            return Err(RecordError::InsufficientData);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, RecordError> {
        self.take(2).map(read_u16)
    }

    #[allow(clippy::type_complexity)]
    fn xid(
        &mut self,
    ) -> Result<(i32, [u8; GLOBAL_ID_SIZE], [u8; BRANCH_QUALIFIER_SIZE]), RecordError> {
        let format_id = read_u32(self.take(4)?) as i32;
        let mut gid = [0u8; GLOBAL_ID_SIZE];
        gid.copy_from_slice(self.take(GLOBAL_ID_SIZE)?);
        let mut bq = [0u8; BRANCH_QUALIFIER_SIZE];
        bq.copy_from_slice(self.take(BRANCH_QUALIFIER_SIZE)?);
        Ok((format_id, gid, bq))
    }

    fn finish(&self) -> Result<(), RecordError> {
        if self.pos != self.bytes.len() {
            return Err(RecordError::InvalidFormat(format!(
                "{} trailing bytes",
                self.bytes.len() - self.pos
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xalog_core::XidGenerator;

    fn sample_prepare() -> (Xid, Vec<BranchInfo>) {
        let gen = XidGenerator::with_start(b"tm-test", 100).unwrap();
        let xid = gen.create_transaction_id();
        let branches = vec![
            BranchInfo::new(gen.create_branch(&xid, 1), "rm-a"),
            BranchInfo::new(gen.create_branch(&xid, 2), "rm-b"),
        ];
        (xid, branches)
    }

    #[test]
    fn test_prepare_roundtrip_keeps_branch_order() {
        let (xid, branches) = sample_prepare();
        let record = PrepareRecord::new(&xid, &branches);
        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), record.encoded_len());

        let decoded = PrepareRecord::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.branches[0].resource_name, "rm-a");
        assert_eq!(decoded.branches[1].resource_name, "rm-b");
        assert_eq!(decoded.branches[1].branch_qualifier[0], 2);
    }

    #[test]
    fn test_done_roundtrip() {
        let (xid, _) = sample_prepare();
        let record = DoneRecord::new(Outcome::Rollback, &xid, LogMark::new(3, 64));
        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), DoneRecord::ENCODED_LEN);
        assert_eq!(DoneRecord::from_bytes(&bytes).unwrap(), record);
    }

    #[test]
    fn test_truncated_prepare_is_insufficient() {
        let (xid, branches) = sample_prepare();
        let bytes = PrepareRecord::new(&xid, &branches).to_bytes();
        assert_eq!(
            PrepareRecord::from_bytes(&bytes[..bytes.len() - 1]),
            Err(RecordError::InsufficientData)
        );
    }

    #[test]
    fn test_bad_outcome_rejected() {
        let (xid, _) = sample_prepare();
        let mut bytes = DoneRecord::new(Outcome::Commit, &xid, LogMark::NONE).to_bytes();
        bytes[0] = 9;
        assert!(matches!(
            DoneRecord::from_bytes(&bytes),
            Err(RecordError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_unknown_tag_decodes_as_unknown() {
        assert_eq!(LogRecord::decode(77, b"xyz"), Ok(LogRecord::Unknown(77)));
    }

    #[test]
    fn test_record_iter_offsets_and_partial_tail() {
        let mut data = Vec::new();
        data.extend_from_slice(&(RecordType::EndOfLog as u16).to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&(RecordType::Prepare as u16).to_le_bytes());
        data.extend_from_slice(&10u16.to_le_bytes());
        data.extend_from_slice(&[1, 2, 3]);

        let mut iter = RecordIter::new(&data);
        let (offset, tag, payload) = iter.next().unwrap().unwrap();
        assert_eq!(offset, 32);
        assert_eq!(tag, RecordType::EndOfLog as u16);
        assert!(payload.is_empty());

        assert_eq!(iter.next(), Some(Err(RecordError::InsufficientData)));
        assert_eq!(iter.next(), None);
    }
}

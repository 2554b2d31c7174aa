//! On-disk byte formats for the transaction log.
//!
//! Keeping serialization separate from operational logic (buffering,
//! rotation, replay) keeps format evolution in one place.
//!
//! # Module Structure
//!
//! - `block`: block header, checksum algorithms
//! - `record`: prepare / done / end-of-log records
//! - `file_header`: header record at the start of every file

pub mod block;
pub mod file_header;
pub mod record;

pub use block::{decode_block, BlockHeader, ChecksumKind, BLOCK_HEADER_SIZE, BLOCK_MAGIC};
pub use file_header::{FileHeader, FILE_HEADER_PAYLOAD_SIZE, UNLIMITED_BLOCKS};
pub use record::{
    DoneRecord, LogRecord, LoggedBranch, Outcome, PrepareRecord, RecordError, RecordIter,
    RecordType, RECORD_HEADER_SIZE,
};

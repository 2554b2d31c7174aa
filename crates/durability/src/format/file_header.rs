//! Log file header.
//!
//! Block 0 of every log file is a header block (BSN 0) holding a single
//! `FILE_HEADER` record:
//!
//! ```text
//! ┌────────────────┬──────────────────┬─────────────┬───────────────┬────────────────┬──────────────┐
//! │ Max files (4)  │ Max blocks (4)   │ File no (4) │ First BSN (4) │ Generation (8) │ Created (8)  │
//! └────────────────┴──────────────────┴─────────────┴───────────────┴────────────────┴──────────────┘
//! ```
//!
//! Generation 0 marks a pre-allocated file that has never held data.
//! Together with the block size from the header block, `max_log_files`
//! and `max_blocks_per_file` form the binary configuration that decides
//! whether an existing log can be reused as is.

use super::block::{read_u32, read_u64};
use super::record::RecordError;

/// Size of the FILE_HEADER payload in bytes
pub const FILE_HEADER_PAYLOAD_SIZE: usize = 32;

/// Stored in `max_blocks_per_file` when files grow without limit
pub const UNLIMITED_BLOCKS: u32 = u32::MAX;

/// Header record of a log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Number of files in the circular set
    pub max_log_files: u32,
    /// Blocks per file including the header block, or [`UNLIMITED_BLOCKS`]
    pub max_blocks_per_file: u32,
    /// 1-based position of this file in the set
    pub file_number: u32,
    /// BSN of the first data block in this file
    pub first_bsn: u32,
    /// Rotation generation, 0 when unused
    pub generation: u64,
    /// Milliseconds since the epoch when the file was (re)initialised
    pub created: u64,
}

impl FileHeader {
    /// Whether the file has never held data.
    pub fn is_unused(&self) -> bool {
        self.generation == 0
    }

    /// `max_blocks_per_file` as an option.
    pub fn max_blocks(&self) -> Option<u32> {
        if self.max_blocks_per_file == UNLIMITED_BLOCKS {
            None
        } else {
            Some(self.max_blocks_per_file)
        }
    }

    /// Serialize the payload.
    pub fn to_bytes(&self) -> [u8; FILE_HEADER_PAYLOAD_SIZE] {
        let mut bytes = [0u8; FILE_HEADER_PAYLOAD_SIZE];
        bytes[0..4].copy_from_slice(&self.max_log_files.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.max_blocks_per_file.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.file_number.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.first_bsn.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.generation.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.created.to_le_bytes());
        bytes
    }

    /// Deserialize the payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() < FILE_HEADER_PAYLOAD_SIZE {
            return Err(RecordError::InsufficientData);
        }
        if bytes.len() > FILE_HEADER_PAYLOAD_SIZE {
            return Err(RecordError::InvalidFormat(format!(
                "file header payload is {} bytes",
                bytes.len()
            )));
        }
        Ok(FileHeader {
            max_log_files: read_u32(&bytes[0..4]),
            max_blocks_per_file: read_u32(&bytes[4..8]),
            file_number: read_u32(&bytes[8..12]),
            first_bsn: read_u32(&bytes[12..16]),
            generation: read_u64(&bytes[16..24]),
            created: read_u64(&bytes[24..32]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_header_roundtrip() {
        let header = FileHeader {
            max_log_files: 2,
            max_blocks_per_file: UNLIMITED_BLOCKS,
            file_number: 1,
            first_bsn: 1,
            generation: 1,
            created: 1_700_000_000_000,
        };
        let parsed = FileHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.max_blocks(), None);
        assert!(!parsed.is_unused());
    }

    #[test]
    fn test_short_payload() {
        assert_eq!(
            FileHeader::from_bytes(&[0u8; 10]),
            Err(RecordError::InsufficientData)
        );
    }
}

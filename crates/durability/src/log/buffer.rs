//! In-memory log buffers.
//!
//! A buffer accumulates records for exactly one block. Once sealed it is
//! written whole, header and zero padding included.

use serde::{Deserialize, Serialize};

use crate::format::{
    BlockHeader, ChecksumKind, FileHeader, LogRecord, RecordType, BLOCK_HEADER_SIZE,
    FILE_HEADER_PAYLOAD_SIZE, RECORD_HEADER_SIZE,
};

/// Smallest configurable block.
const MIN_BLOCK_SIZE: usize = 1024;

const _: () =
    assert!(BLOCK_HEADER_SIZE + RECORD_HEADER_SIZE + FILE_HEADER_PAYLOAD_SIZE <= MIN_BLOCK_SIZE);

/// Buffer implementation selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferKind {
    /// Fixed-size block buffer
    #[default]
    Block,
}

impl BufferKind {
    /// Allocate an empty buffer of `block_size` bytes.
    pub fn allocate(&self, block_size: usize) -> Box<dyn LogBuffer> {
        match self {
            BufferKind::Block => Box::new(BlockBuffer::new(block_size)),
        }
    }
}

/// Append and seal operations shared by buffer implementations.
pub trait LogBuffer: Send {
    /// Block sequence number assigned to this buffer.
    fn bsn(&self) -> u32;

    /// Reset to an empty buffer for block `bsn`.
    fn reset(&mut self, bsn: u32);

    /// Append a record. Returns its offset within the block, or `None` if
    /// it does not fit in the space left.
    fn append(&mut self, record_type: u16, payload: &[u8]) -> Option<u32>;

    /// Whether no record has been appended since the last reset.
    fn is_empty(&self) -> bool;

    /// Finalise the block header.
    fn seal(&mut self, checksum: ChecksumKind, timestamp: u64);

    /// The complete block, valid after `seal`.
    fn block(&self) -> &[u8];
}

/// Largest record payload a block of `block_size` bytes can hold.
pub fn max_payload(block_size: usize) -> usize {
    block_size - BLOCK_HEADER_SIZE - RECORD_HEADER_SIZE
}

/// Fixed-size block buffer.
pub struct BlockBuffer {
    bsn: u32,
    data: Vec<u8>,
    used: usize,
}

impl BlockBuffer {
    /// Create an empty buffer of `block_size` bytes.
    pub fn new(block_size: usize) -> Self {
        BlockBuffer {
            bsn: 0,
            data: vec![0u8; block_size],
            used: 0,
        }
    }

    /// Build the header block of a log file.
    pub fn header_block(
        block_size: usize,
        header: FileHeader,
        checksum: ChecksumKind,
        timestamp: u64,
    ) -> Vec<u8> {
        let mut buffer = BlockBuffer::new(block_size);
        let (tag, payload) = LogRecord::FileHeader(header).encode();
        let appended = buffer.append(tag, &payload);
        debug_assert!(
            appended.is_some(),
            "file header does not fit a {} byte block",
            block_size
        );
        buffer.seal(checksum, timestamp);
        buffer.data
    }
}

impl LogBuffer for BlockBuffer {
    fn bsn(&self) -> u32 {
        self.bsn
    }

    fn reset(&mut self, bsn: u32) {
        self.bsn = bsn;
        let end = BLOCK_HEADER_SIZE + self.used;
        self.data[..end].fill(0);
        self.used = 0;
    }

    fn append(&mut self, record_type: u16, payload: &[u8]) -> Option<u32> {
        let start = BLOCK_HEADER_SIZE + self.used;
        let end = start + RECORD_HEADER_SIZE + payload.len();
        if end > self.data.len() {
            return None;
        }
        self.data[start..start + 2].copy_from_slice(&record_type.to_le_bytes());
        self.data[start + 2..start + 4].copy_from_slice(&(payload.len() as u16).to_le_bytes());
        self.data[start + RECORD_HEADER_SIZE..end].copy_from_slice(payload);
        self.used = end - BLOCK_HEADER_SIZE;
        Some(start as u32)
    }

    fn is_empty(&self) -> bool {
        self.used == 0
    }

    fn seal(&mut self, checksum: ChecksumKind, timestamp: u64) {
        let records = &self.data[BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + self.used];
        let header = BlockHeader {
            bsn: self.bsn,
            block_size: self.data.len() as u32,
            used: self.used as u32,
            checksum: checksum.compute(records),
            timestamp,
            checksum_kind: checksum,
        };
        self.data[..BLOCK_HEADER_SIZE].copy_from_slice(&header.to_bytes());
    }

    fn block(&self) -> &[u8] {
        &self.data
    }
}

/// Type tag for an end-of-log marker.
pub(crate) const END_OF_LOG: u16 = RecordType::EndOfLog as u16;

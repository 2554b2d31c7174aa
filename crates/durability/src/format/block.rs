//! Log block format.
//!
//! Every log file is a sequence of fixed-size blocks. Blocks are always
//! written whole; unused space after the last record is zero.
//!
//! # Block Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Block Header (32 bytes)                      │
//! ├──────────────────────────────────────────────┤
//! │ Record 1                                     │
//! ├──────────────────────────────────────────────┤
//! │ ...                                          │
//! ├──────────────────────────────────────────────┤
//! │ Zero padding up to block_size                │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Header Layout
//!
//! ```text
//! ┌──────────┬─────────┬────────────────┬──────────┬──────────────┬──────────────┬──────────┬──────────────┐
//! │ Magic (4)│ BSN (4) │ Block size (4) │ Used (4) │ Checksum (4) │ Timestamp (8)│ Kind (1) │ Reserved (3) │
//! └──────────┴─────────┴────────────────┴──────────┴──────────────┴──────────────┴──────────┴──────────────┘
//! ```
//!
//! `used` counts record bytes after the header. The checksum covers those
//! bytes only and is computed with the algorithm named by `kind`.

use serde::{Deserialize, Serialize};

use super::record::RecordError;

/// Magic bytes identifying a log block: "XALB"
pub const BLOCK_MAGIC: [u8; 4] = *b"XALB";

/// Size of the block header in bytes
pub const BLOCK_HEADER_SIZE: usize = 32;

/// Block checksum algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumKind {
    /// No checksum; torn blocks are only caught by record parsing.
    None,
    /// CRC32.
    ///
    /// The configuration value `plain` selects this kind. It names the
    /// non-Adler option of older configuration files; the block is still
    /// checked with CRC32, not a simple byte sum.
    #[serde(alias = "plain")]
    Crc32,
    /// Adler-32.
    #[default]
    Adler32,
}

impl ChecksumKind {
    /// Checksum of `data` (0 for [`ChecksumKind::None`]).
    pub fn compute(&self, data: &[u8]) -> u32 {
        match self {
            ChecksumKind::None => 0,
            ChecksumKind::Crc32 => crc32fast::hash(data),
            ChecksumKind::Adler32 => adler::adler32_slice(data),
        }
    }

    /// On-disk tag.
    pub fn as_u8(&self) -> u8 {
        match self {
            ChecksumKind::None => 0,
            ChecksumKind::Crc32 => 1,
            ChecksumKind::Adler32 => 2,
        }
    }

    /// Parse an on-disk tag.
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ChecksumKind::None),
            1 => Some(ChecksumKind::Crc32),
            2 => Some(ChecksumKind::Adler32),
            _ => None,
        }
    }
}

/// Block header (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block sequence number. 0 for file header blocks, data blocks start at 1.
    pub bsn: u32,
    /// Total block size in bytes, header included
    pub block_size: u32,
    /// Record bytes following the header
    pub used: u32,
    /// Checksum of the record bytes
    pub checksum: u32,
    /// Milliseconds since the epoch when the block was sealed
    pub timestamp: u64,
    /// Checksum algorithm
    pub checksum_kind: ChecksumKind,
}

impl BlockHeader {
    /// Serialize header to bytes.
    pub fn to_bytes(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut bytes = [0u8; BLOCK_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&BLOCK_MAGIC);
        bytes[4..8].copy_from_slice(&self.bsn.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.block_size.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.used.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.checksum.to_le_bytes());
        bytes[20..28].copy_from_slice(&self.timestamp.to_le_bytes());
        bytes[28] = self.checksum_kind.as_u8();
        bytes
    }

    /// Deserialize header from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() < BLOCK_HEADER_SIZE {
            return Err(RecordError::InsufficientData);
        }
        if bytes[0..4] != BLOCK_MAGIC {
            return Err(RecordError::BadMagic);
        }
        let checksum_kind = ChecksumKind::from_u8(bytes[28]).ok_or_else(|| {
            RecordError::InvalidFormat(format!("unknown checksum kind {}", bytes[28]))
        })?;
        Ok(BlockHeader {
            bsn: read_u32(&bytes[4..8]),
            block_size: read_u32(&bytes[8..12]),
            used: read_u32(&bytes[12..16]),
            checksum: read_u32(&bytes[16..20]),
            timestamp: read_u64(&bytes[20..28]),
            checksum_kind,
        })
    }
}

/// Validate a whole block and return its header and record bytes.
///
/// `block` must be exactly one block long.
pub fn decode_block(block: &[u8]) -> Result<(BlockHeader, &[u8]), RecordError> {
    let header = BlockHeader::from_bytes(block)?;
    if header.block_size as usize != block.len() {
        return Err(RecordError::InvalidFormat(format!(
            "block size {} does not match {}",
            header.block_size,
            block.len()
        )));
    }
    let end = BLOCK_HEADER_SIZE + header.used as usize;
    if end > block.len() {
        return Err(RecordError::InvalidFormat(format!(
            "used length {} overruns block",
            header.used
        )));
    }
    let data = &block[BLOCK_HEADER_SIZE..end];
    if header.checksum_kind != ChecksumKind::None {
        let computed = header.checksum_kind.compute(data);
        if computed != header.checksum {
            return Err(RecordError::ChecksumMismatch {
                expected: header.checksum,
                computed,
            });
        }
    }
    Ok((header, data))
}

pub(crate) fn read_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

pub(crate) fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

pub(crate) fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[0..8]);
    u64::from_le_bytes(raw)
}

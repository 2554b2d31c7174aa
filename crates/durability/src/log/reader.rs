//! Log reader for recovery and migration.
//!
//! Files are read in generation order, block by block. The scan stops at
//! the first block that is incomplete, fails validation, or breaks the BSN
//! sequence; everything read before that point is returned.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use tracing::{debug, warn};
use xalog_core::LogMark;

use super::config::{log_file_path, LogConfig};
use crate::error::ReplayError;
use crate::format::{
    decode_block, BlockHeader, FileHeader, LogRecord, RecordError, RecordIter, BLOCK_HEADER_SIZE,
};

/// A log file with a readable header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileInfo {
    /// 1-based position in the set
    pub number: u32,
    /// File path
    pub path: PathBuf,
    /// Header record
    pub header: FileHeader,
    /// Block size from the header block
    pub block_size: u32,
    /// File length in bytes
    pub len: u64,
}

/// Where the readable log ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogTail {
    /// File holding the last valid block
    pub file_number: u32,
    /// Generation of that file
    pub generation: u64,
    /// End of the last valid block
    pub valid_end: u64,
    /// File length found on disk
    pub original_size: u64,
    /// BSN the next block must carry
    pub next_bsn: u32,
}

impl LogTail {
    /// Bytes after the last valid block.
    pub fn bytes_to_truncate(&self) -> u64 {
        self.original_size.saturating_sub(self.valid_end)
    }
}

/// Why reading stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStopReason {
    /// All files read to the end
    EndOfData,
    /// A block was cut short (expected after a crash)
    PartialBlock {
        /// File number
        file: u32,
        /// Offset of the incomplete block
        offset: u64,
    },
    /// A block failed validation (magic, size or checksum)
    CorruptBlock {
        /// File number
        file: u32,
        /// Offset of the block
        offset: u64,
        /// Validation failure
        detail: String,
    },
    /// A block or file did not continue the BSN sequence
    BsnMismatch {
        /// File number
        file: u32,
        /// BSN expected
        expected: u32,
        /// BSN found
        found: u32,
    },
}

impl ReadStopReason {
    /// Whether the log ended without damage.
    pub fn is_clean(&self) -> bool {
        matches!(self, ReadStopReason::EndOfData)
    }
}

/// Result of reading a whole log.
#[derive(Debug)]
pub struct LogReadResult {
    /// Files with a readable header, by file number
    pub files: Vec<LogFileInfo>,
    /// Records in log order with their marks
    pub records: Vec<(LogMark, LogRecord)>,
    /// End of the readable log, `None` if no file holds data
    pub tail: Option<LogTail>,
    /// Why reading stopped
    pub stop_reason: ReadStopReason,
    /// Files that held data and were read
    pub files_read: usize,
    /// Data blocks read
    pub blocks_read: usize,
}

/// Reader over the file set named by a [`LogConfig`].
pub struct LogReader {
    config: LogConfig,
}

impl LogReader {
    /// Create a reader for the files described by `config`.
    pub fn new(config: &LogConfig) -> Self {
        LogReader {
            config: config.clone(),
        }
    }

    /// Numbers of the files present on disk, contiguous from 1.
    pub fn list_files(&self) -> Vec<u32> {
        let mut numbers = Vec::new();
        let mut n = 1;
        while self.path(n).is_file() {
            numbers.push(n);
            n += 1;
        }
        numbers
    }

    /// Read the header block of file `n`.
    ///
    /// Returns `None` if the file is missing or its header is unreadable.
    pub fn read_file_info(&self, n: u32) -> Result<Option<LogFileInfo>, ReplayError> {
        let path = self.path(n);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();

        let mut head = [0u8; BLOCK_HEADER_SIZE];
        if file.read_exact(&mut head).is_err() {
            warn!(target: "xalog::replay", path = ?path, "Log file too short for a header");
            return Ok(None);
        }
        let block_size = match BlockHeader::from_bytes(&head) {
            Ok(h) => h.block_size as usize,
            Err(e) => {
                warn!(target: "xalog::replay", path = ?path, error = %e, "Unreadable log file header");
                return Ok(None);
            }
        };
        if block_size < BLOCK_HEADER_SIZE || len < block_size as u64 {
            warn!(target: "xalog::replay", path = ?path, block_size, "Truncated log file header");
            return Ok(None);
        }

        let mut block = vec![0u8; block_size];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut block)?;

        match parse_header_block(&block) {
            Ok(header) => Ok(Some(LogFileInfo {
                number: n,
                path,
                header,
                block_size: block_size as u32,
                len,
            })),
            Err(e) => {
                warn!(target: "xalog::replay", path = ?path, error = %e, "Invalid log file header block");
                Ok(None)
            }
        }
    }

    /// Header info of every readable file, by file number.
    pub fn read_file_infos(&self) -> Result<Vec<LogFileInfo>, ReplayError> {
        let mut infos = Vec::new();
        for n in self.list_files() {
            if let Some(info) = self.read_file_info(n)? {
                infos.push(info);
            }
        }
        Ok(infos)
    }

    /// Read every valid record of the log.
    pub fn read_all(&self) -> Result<LogReadResult, ReplayError> {
        let files = self.read_file_infos()?;

        let mut used: Vec<&LogFileInfo> = files.iter().filter(|f| !f.header.is_unused()).collect();
        used.sort_by_key(|f| f.header.generation);

        let mut records = Vec::new();
        let mut tail = None;
        let mut stop_reason = ReadStopReason::EndOfData;
        let mut files_read = 0;
        let mut blocks_read = 0;
        let mut expected_bsn = used.first().map(|f| f.header.first_bsn).unwrap_or(1);

        'files: for info in used {
            if info.header.first_bsn != expected_bsn {
                warn!(
                    target: "xalog::replay",
                    file = info.number,
                    expected = expected_bsn,
                    found = info.header.first_bsn,
                    "Log file does not continue the block sequence"
                );
                stop_reason = ReadStopReason::BsnMismatch {
                    file: info.number,
                    expected: expected_bsn,
                    found: info.header.first_bsn,
                };
                break;
            }
            files_read += 1;

            let block_size = info.block_size as u64;
            let mut file = File::open(&info.path)?;
            file.seek(SeekFrom::Start(block_size))?;
            let mut offset = block_size;
            let mut block = vec![0u8; info.block_size as usize];

            loop {
                let remaining = info.len - offset;
                if remaining == 0 {
                    break;
                }
                if remaining < block_size {
                    warn!(target: "xalog::replay", file = info.number, offset, "Partial block at end of log");
                    stop_reason = ReadStopReason::PartialBlock {
                        file: info.number,
                        offset,
                    };
                    tail = Some(tail_at(info, offset, expected_bsn));
                    break 'files;
                }
                file.read_exact(&mut block)?;

                let decoded = decode_block(&block).and_then(|(header, data)| {
                    if header.bsn != expected_bsn {
                        return Ok(Err(header.bsn));
                    }
                    collect_records(header.bsn, data).map(Ok)
                });
                match decoded {
                    Ok(Ok(block_records)) => {
                        debug!(
                            target: "xalog::replay",
                            bsn = expected_bsn,
                            records = block_records.len(),
                            "Read block"
                        );
                        records.extend(block_records);
                    }
                    Ok(Err(found)) => {
                        warn!(
                            target: "xalog::replay",
                            file = info.number,
                            offset,
                            expected = expected_bsn,
                            found,
                            "Stale block after end of log"
                        );
                        stop_reason = ReadStopReason::BsnMismatch {
                            file: info.number,
                            expected: expected_bsn,
                            found,
                        };
                        tail = Some(tail_at(info, offset, expected_bsn));
                        break 'files;
                    }
                    Err(e) => {
                        warn!(
                            target: "xalog::replay",
                            file = info.number,
                            offset,
                            error = %e,
                            "Corrupt block, treating as end of log"
                        );
                        stop_reason = ReadStopReason::CorruptBlock {
                            file: info.number,
                            offset,
                            detail: e.to_string(),
                        };
                        tail = Some(tail_at(info, offset, expected_bsn));
                        break 'files;
                    }
                }

                blocks_read += 1;
                expected_bsn += 1;
                offset += block_size;
            }

            tail = Some(tail_at(info, offset, expected_bsn));
        }

        Ok(LogReadResult {
            files,
            records,
            tail,
            stop_reason,
            files_read,
            blocks_read,
        })
    }

    fn path(&self, n: u32) -> PathBuf {
        log_file_path(
            &self.config.log_file_dir,
            &self.config.log_file_name,
            &self.config.log_file_ext,
            n,
        )
    }
}

fn tail_at(info: &LogFileInfo, valid_end: u64, next_bsn: u32) -> LogTail {
    LogTail {
        file_number: info.number,
        generation: info.header.generation,
        valid_end,
        original_size: info.len,
        next_bsn,
    }
}

/// Decode a header block into its FILE_HEADER record.
pub(crate) fn parse_header_block(block: &[u8]) -> Result<FileHeader, RecordError> {
    let (_, data) = decode_block(block)?;
    match RecordIter::new(data).next() {
        Some(Ok((_, tag, payload))) => match LogRecord::decode(tag, payload)? {
            LogRecord::FileHeader(header) => Ok(header),
            other => Err(RecordError::InvalidFormat(format!(
                "expected file header, found {:?}",
                other
            ))),
        },
        Some(Err(e)) => Err(e),
        None => Err(RecordError::InvalidFormat("empty header block".to_string())),
    }
}

/// Decode all records of a block, or none if any is damaged.
fn collect_records(bsn: u32, data: &[u8]) -> Result<Vec<(LogMark, LogRecord)>, RecordError> {
    RecordIter::new(data)
        .map(|item| {
            let (offset, tag, payload) = item?;
            Ok((LogMark::new(bsn, offset), LogRecord::decode(tag, payload)?))
        })
        .collect()
}

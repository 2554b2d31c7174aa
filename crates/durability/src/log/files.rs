//! The circular set of pre-allocated log files.
//!
//! Every file in the set exists from the moment the log is created. A file
//! that has never held data carries generation 0. Rotation moves to the
//! next file in the circle, truncates it and stamps it with the next
//! generation, unless it still holds an unresolved prepare record.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};

use tracing::{info, warn};

use super::buffer::BlockBuffer;
use super::config::LogConfig;
use super::reader::{LogFileInfo, LogTail};
use crate::error::LogError;
use crate::format::FileHeader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    generation: u64,
    first_bsn: u32,
}

const UNUSED: Slot = Slot {
    generation: 0,
    first_bsn: 0,
};

/// Open file set positioned at the write point.
pub(crate) struct LogFileSet {
    config: LogConfig,
    slots: Vec<Slot>,
    current: usize,
    file: File,
    blocks_in_current: u32,
}

impl LogFileSet {
    /// Create every file of a fresh log. File 1 becomes the current file.
    pub(crate) fn create(config: &LogConfig) -> Result<Self, LogError> {
        let n = config.max_log_files as usize;
        let mut slots = vec![UNUSED; n];
        for i in 1..n {
            write_header_file(config, i, UNUSED)?;
        }
        slots[0] = Slot {
            generation: 1,
            first_bsn: 1,
        };
        let file = write_header_file(config, 0, slots[0])?;

        info!(
            target: "xalog::log",
            dir = ?config.log_file_dir,
            files = n,
            "Created log file set"
        );
        Ok(LogFileSet {
            config: config.clone(),
            slots,
            current: 0,
            file,
            blocks_in_current: 1,
        })
    }

    /// Reopen an existing log after replay, continuing after `tail`.
    pub(crate) fn resume(
        config: &LogConfig,
        infos: &[LogFileInfo],
        tail: Option<&LogTail>,
    ) -> Result<Self, LogError> {
        let n = config.max_log_files as usize;
        let mut slots = vec![None; n];
        for info in infos {
            let idx = info.number as usize - 1;
            if idx < n {
                slots[idx] = Some(Slot {
                    generation: info.header.generation,
                    first_bsn: info.header.first_bsn,
                });
            }
        }

        let (current, tail_generation) = match tail {
            Some(t) => (t.file_number as usize - 1, t.generation),
            None => (0, 0),
        };

        // Files newer than the tail hold nothing reachable; missing files are recreated.
        let mut resolved = Vec::with_capacity(n);
        for (i, slot) in slots.into_iter().enumerate() {
            let keep = match slot {
                Some(s) if i == current => tail.map(|_| s),
                Some(s) if s.generation <= tail_generation => Some(s),
                _ => None,
            };
            match keep {
                Some(s) => resolved.push(s),
                None => {
                    let fresh = if i == current {
                        Slot {
                            generation: 1,
                            first_bsn: 1,
                        }
                    } else {
                        UNUSED
                    };
                    write_header_file(config, i, fresh)?;
                    resolved.push(fresh);
                }
            }
        }

        let path = config.file_path(current as u32 + 1);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let block_size = config.block_size() as u64;
        let blocks_in_current = match tail {
            Some(t) => {
                if t.bytes_to_truncate() > 0 {
                    warn!(
                        target: "xalog::log",
                        path = ?path,
                        valid_end = t.valid_end,
                        original_size = t.original_size,
                        "Truncating torn log tail"
                    );
                    file.set_len(t.valid_end)?;
                    file.sync_all()?;
                }
                (t.valid_end / block_size) as u32
            }
            None => 1,
        };

        info!(
            target: "xalog::log",
            dir = ?config.log_file_dir,
            file = current + 1,
            blocks = blocks_in_current,
            "Resumed log file set"
        );
        Ok(LogFileSet {
            config: config.clone(),
            slots: resolved,
            current,
            file,
            blocks_in_current,
        })
    }

    /// Append consecutive blocks, rotating as needed, then force them.
    ///
    /// `holds_unresolved(lo, hi)` reports whether an unresolved prepare
    /// lives in a block with BSN in `lo..hi`. Rotation into a file holding
    /// one fails with [`LogError::FileOverflow`] before anything is written.
    /// Returns the number of rotations performed.
    pub(crate) fn write_blocks(
        &mut self,
        blocks: &[&[u8]],
        first_bsn: u32,
        holds_unresolved: impl Fn(u32, u32) -> bool,
    ) -> Result<usize, LogError> {
        self.check_rotations(blocks.len(), first_bsn, &holds_unresolved)?;

        let block_size = self.config.block_size() as u64;
        let mut rotations = 0;
        for (i, block) in blocks.iter().enumerate() {
            if self.is_full() {
                self.file.sync_data()?;
                self.rotate(first_bsn + i as u32)?;
                rotations += 1;
            }
            self.file
                .seek(SeekFrom::Start(self.blocks_in_current as u64 * block_size))?;
            self.file.write_all(block)?;
            self.blocks_in_current += 1;
        }
        self.file.sync_data()?;
        Ok(rotations)
    }

    fn is_full(&self) -> bool {
        match self.config.max_blocks_per_file {
            Some(max) => self.blocks_in_current >= max,
            None => false,
        }
    }

    fn check_rotations(
        &self,
        count: usize,
        first_bsn: u32,
        holds_unresolved: &impl Fn(u32, u32) -> bool,
    ) -> Result<(), LogError> {
        let max = match self.config.max_blocks_per_file {
            Some(max) => max,
            None => return Ok(()),
        };
        let n = self.slots.len();
        let mut slots = self.slots.clone();
        let mut current = self.current;
        let mut blocks = self.blocks_in_current;

        for i in 0..count {
            let bsn = first_bsn + i as u32;
            if blocks >= max {
                let target = (current + 1) % n;
                let slot = slots[target];
                if slot.generation != 0 {
                    let next = slots[(target + 1) % n];
                    let hi = if n == 1 || next.generation == 0 {
                        bsn
                    } else {
                        next.first_bsn
                    };
                    if holds_unresolved(slot.first_bsn, hi) {
                        return Err(LogError::FileOverflow {
                            file: self.config.file_path(target as u32 + 1),
                        });
                    }
                }
                slots[target] = Slot {
                    generation: slots[current].generation + 1,
                    first_bsn: bsn,
                };
                current = target;
                blocks = 1;
            }
            blocks += 1;
        }
        Ok(())
    }

    fn rotate(&mut self, first_bsn: u32) -> Result<(), LogError> {
        let target = (self.current + 1) % self.slots.len();
        let slot = Slot {
            generation: self.slots[self.current].generation + 1,
            first_bsn,
        };
        self.file = write_header_file(&self.config, target, slot)?;
        self.slots[target] = slot;
        self.current = target;
        self.blocks_in_current = 1;
        info!(
            target: "xalog::log",
            file = target + 1,
            generation = slot.generation,
            first_bsn,
            "Rotated to next log file"
        );
        Ok(())
    }
}

/// Truncate file `idx` (0-based) and write its header block.
fn write_header_file(config: &LogConfig, idx: usize, slot: Slot) -> Result<File, LogError> {
    let header = FileHeader {
        max_log_files: config.max_log_files,
        max_blocks_per_file: config.max_blocks_on_disk(),
        file_number: idx as u32 + 1,
        first_bsn: slot.first_bsn,
        generation: slot.generation,
        created: super::now_millis(),
    };
    let block = BlockBuffer::header_block(
        config.block_size(),
        header,
        config.checksum,
        header.created,
    );

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(config.file_path(idx as u32 + 1))?;
    file.write_all(&block)?;
    file.sync_all()?;
    Ok(file)
}

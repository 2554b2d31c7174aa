//! Transaction log configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::buffer::BufferKind;
use crate::format::{ChecksumKind, UNLIMITED_BLOCKS};

/// Smallest accepted buffer (block) size in KB.
pub const MIN_BUFFER_SIZE_KB: u32 = 1;

/// Largest accepted buffer (block) size in KB.
pub const MAX_BUFFER_SIZE_KB: u32 = 32;

/// Transaction log configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Directory holding the log files. Must be absolute.
    pub log_file_dir: PathBuf,

    /// File name prefix (default: "transaction").
    ///
    /// Files are named `{log_file_name}_{n}.{log_file_ext}`.
    pub log_file_name: String,

    /// File extension (default: "log").
    pub log_file_ext: String,

    /// Buffer and block size in KB, 1 to 32 (default: 4).
    pub buffer_size_kb: u32,

    /// Block checksum algorithm (default: Adler-32).
    pub checksum: ChecksumKind,

    /// Interval of the background flush thread in ms (default: 50).
    pub flush_sleep_time_ms: u64,

    /// Blocks per file including the header block; `None` grows files
    /// without limit (default: `None`).
    pub max_blocks_per_file: Option<u32>,

    /// Files in the circular set (default: 2).
    pub max_log_files: u32,

    /// Buffers allocated up front (default: 4).
    pub min_buffers: usize,

    /// Upper bound on buffers, 0 for no bound (default: 0).
    pub max_buffers: usize,

    /// Waiters on one buffer that trigger an immediate force; `None` leaves
    /// forcing to callers and the flush thread (default: `None`).
    pub threads_waiting_force_threshold: Option<usize>,

    /// Whether the flush thread forces partially filled buffers (default: true).
    pub flush_partial_buffers: bool,

    /// Buffer implementation (default: `Block`).
    pub buffer_kind: BufferKind,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            log_file_dir: PathBuf::new(),
            log_file_name: "transaction".to_string(),
            log_file_ext: "log".to_string(),
            buffer_size_kb: 4,
            checksum: ChecksumKind::Adler32,
            flush_sleep_time_ms: 50,
            max_blocks_per_file: None,
            max_log_files: 2,
            min_buffers: 4,
            max_buffers: 0,
            threads_waiting_force_threshold: None,
            flush_partial_buffers: true,
            buffer_kind: BufferKind::Block,
        }
    }
}

impl LogConfig {
    /// Create a configuration with default values for `log_file_dir`.
    pub fn new(log_file_dir: impl Into<PathBuf>) -> Self {
        LogConfig {
            log_file_dir: log_file_dir.into(),
            ..Self::default()
        }
    }

    /// Set the file name prefix (builder pattern).
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.log_file_name = name.into();
        self
    }

    /// Set the file extension (builder pattern).
    pub fn with_file_ext(mut self, ext: impl Into<String>) -> Self {
        self.log_file_ext = ext.into();
        self
    }

    /// Set the buffer size in KB (builder pattern).
    pub fn with_buffer_size_kb(mut self, kb: u32) -> Self {
        self.buffer_size_kb = kb;
        self
    }

    /// Set the checksum algorithm (builder pattern).
    pub fn with_checksum(mut self, checksum: ChecksumKind) -> Self {
        self.checksum = checksum;
        self
    }

    /// Set the flush interval (builder pattern).
    pub fn with_flush_sleep_time_ms(mut self, ms: u64) -> Self {
        self.flush_sleep_time_ms = ms;
        self
    }

    /// Set blocks per file (builder pattern).
    pub fn with_max_blocks_per_file(mut self, blocks: Option<u32>) -> Self {
        self.max_blocks_per_file = blocks;
        self
    }

    /// Set the number of files (builder pattern).
    pub fn with_max_log_files(mut self, files: u32) -> Self {
        self.max_log_files = files;
        self
    }

    /// Set the buffer pool bounds (builder pattern).
    pub fn with_buffers(mut self, min: usize, max: usize) -> Self {
        self.min_buffers = min;
        self.max_buffers = max;
        self
    }

    /// Set the group commit threshold (builder pattern).
    pub fn with_threads_waiting_force_threshold(mut self, threshold: Option<usize>) -> Self {
        self.threads_waiting_force_threshold = threshold;
        self
    }

    /// Set whether partial buffers are flushed by the timer (builder pattern).
    pub fn with_flush_partial_buffers(mut self, flush: bool) -> Self {
        self.flush_partial_buffers = flush;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_BUFFER_SIZE_KB..=MAX_BUFFER_SIZE_KB).contains(&self.buffer_size_kb) {
            return Err(ConfigError::BufferSizeOutOfRange(self.buffer_size_kb));
        }
        if self.log_file_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyLogDir);
        }
        if !self.log_file_dir.is_absolute() {
            return Err(ConfigError::RelativeLogDir(self.log_file_dir.clone()));
        }
        if self.log_file_name.is_empty() {
            return Err(ConfigError::EmptyFileName);
        }
        if self.min_buffers == 0 {
            return Err(ConfigError::MinBuffersZero);
        }
        if self.max_buffers != 0 && self.max_buffers < self.min_buffers {
            return Err(ConfigError::MaxBuffersBelowMin {
                min: self.min_buffers,
                max: self.max_buffers,
            });
        }
        if self.max_log_files == 0 {
            return Err(ConfigError::MaxLogFilesZero);
        }
        if let Some(blocks) = self.max_blocks_per_file {
            if blocks < 2 || blocks == UNLIMITED_BLOCKS {
                return Err(ConfigError::MaxBlocksTooSmall(blocks));
            }
        }
        if self.flush_sleep_time_ms == 0 {
            return Err(ConfigError::FlushSleepZero);
        }
        Ok(())
    }

    /// Create a configuration optimized for testing (small blocks and files).
    pub fn for_testing(log_file_dir: impl Into<PathBuf>) -> Self {
        LogConfig {
            log_file_dir: log_file_dir.into(),
            buffer_size_kb: 1,
            flush_sleep_time_ms: 10,
            max_blocks_per_file: Some(16),
            max_log_files: 3,
            min_buffers: 2,
            ..Self::default()
        }
    }

    /// Block size in bytes.
    pub fn block_size(&self) -> usize {
        self.buffer_size_kb as usize * 1024
    }

    /// `max_blocks_per_file` as stored in file headers.
    pub fn max_blocks_on_disk(&self) -> u32 {
        self.max_blocks_per_file.unwrap_or(UNLIMITED_BLOCKS)
    }

    /// Flush thread interval.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_sleep_time_ms)
    }

    /// Path of file `n` (1-based) in the set.
    pub fn file_path(&self, n: u32) -> PathBuf {
        log_file_path(
            &self.log_file_dir,
            &self.log_file_name,
            &self.log_file_ext,
            n,
        )
    }

    /// Path of the writer's lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.log_file_dir.join(LOCK_FILE)
    }

    /// Whether the on-disk binary layout of `self` and `other` is the same.
    pub fn is_compatible_with(&self, other: &LogConfig) -> bool {
        self.buffer_size_kb == other.buffer_size_kb
            && self.max_log_files == other.max_log_files
            && self.max_blocks_on_disk() == other.max_blocks_on_disk()
    }
}

/// Name of the lock file held by a writer inside the log directory.
pub const LOCK_FILE: &str = ".lock";

/// `{dir}/{name}_{n}.{ext}`
pub fn log_file_path(dir: &Path, name: &str, ext: &str, n: u32) -> PathBuf {
    if ext.is_empty() {
        dir.join(format!("{}_{}", name, n))
    } else {
        dir.join(format!("{}_{}.{}", name, n, ext))
    }
}

/// Log configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Buffer size outside 1..=32 KB.
    #[error("buffer size must be between 1 and 32 KB, got {0}")]
    BufferSizeOutOfRange(u32),

    /// Log directory is not absolute.
    #[error("log directory must be absolute: {}", .0.display())]
    RelativeLogDir(PathBuf),

    /// Log directory not set.
    #[error("log directory must be set")]
    EmptyLogDir,

    /// `min_buffers` is zero.
    #[error("min_buffers must be at least 1")]
    MinBuffersZero,

    /// `max_buffers` is set below `min_buffers`.
    #[error("max_buffers ({max}) must not be below min_buffers ({min})")]
    MaxBuffersBelowMin {
        /// Configured minimum
        min: usize,
        /// Configured maximum
        max: usize,
    },

    /// `max_log_files` is zero.
    #[error("max_log_files must be at least 1")]
    MaxLogFilesZero,

    /// `max_blocks_per_file` cannot hold a header and a data block.
    #[error("max_blocks_per_file must be at least 2, got {0}")]
    MaxBlocksTooSmall(u32),

    /// Flush interval is zero.
    #[error("flush_sleep_time_ms must be positive")]
    FlushSleepZero,

    /// File name prefix is empty.
    #[error("log file name must not be empty")]
    EmptyFileName,
}

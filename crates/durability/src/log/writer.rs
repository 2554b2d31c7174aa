//! Transaction log writer.
//!
//! The writer persists prepare, commit and rollback decisions. Every call
//! returns only after its record has been forced to stable storage; calls
//! that arrive while a force is running share the next one.
//!
//! # Thread Lifecycle
//!
//! A background thread wakes every `flush_sleep_time_ms` and forces
//! buffered records when `flush_partial_buffers` is set:
//! - `shutdown_flag: AtomicBool` signals the thread to stop
//! - `flush_thread: JoinHandle` is joined by `close()`
//! - `Drop` closes the log if `close()` was not called

use std::fs::{File, OpenOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};
use xalog_core::{BranchInfo, LogMark, Xid, XidGenerator};

use super::buffer::END_OF_LOG;
use super::config::LogConfig;
use super::files::LogFileSet;
use super::group_commit::{ActiveMarks, GroupCommit, LogStats, PendingPrepare};
use crate::error::LogError;
use crate::format::{DoneRecord, Outcome, PrepareRecord, RecordType, RECORD_HEADER_SIZE};
use crate::recovery::{RecoveryReplayer, ReplayResult};

/// Durable, append-only transaction log.
///
/// Exclusively owns its directory for its lifetime through a lock file.
pub struct TransactionLogWriter {
    config: LogConfig,
    inner: Arc<GroupCommit>,
    shutdown_flag: Arc<AtomicBool>,
    flush_signal: Arc<(Mutex<bool>, Condvar)>,
    flush_thread: Mutex<Option<JoinHandle<()>>>,
    lock_file: File,
}

impl TransactionLogWriter {
    /// Open the log described by `config`, creating it if absent.
    ///
    /// An existing log is replayed first: the torn tail, if any, is cut off
    /// and writing resumes after the last valid block. The replay result is
    /// returned so the caller can resolve in-doubt transactions; their marks
    /// remain valid for [`commit`](Self::commit) and
    /// [`rollback`](Self::rollback).
    pub fn open(
        config: LogConfig,
        generator: &XidGenerator,
    ) -> Result<(Self, ReplayResult), LogError> {
        config.validate()?;
        std::fs::create_dir_all(&config.log_file_dir)?;
        let lock_file = acquire_lock(&config)?;

        let replay = RecoveryReplayer::new(generator).replay(&config)?;

        let files = if replay.files.is_empty() {
            LogFileSet::create(&config)?
        } else {
            check_compatible(&config, &replay)?;
            LogFileSet::resume(&config, &replay.files, replay.tail.as_ref())?
        };
        let next_bsn = replay.tail.map(|t| t.next_bsn).unwrap_or(1);

        let marks: ActiveMarks = replay
            .in_doubt
            .values()
            .map(|pair| {
                (
                    pair.mark(),
                    PendingPrepare {
                        xid: pair.xid().clone(),
                        completing: false,
                    },
                )
            })
            .collect();

        info!(
            target: "xalog::log",
            dir = ?config.log_file_dir,
            next_bsn,
            in_doubt = marks.len(),
            "Opened transaction log"
        );

        let writer = TransactionLogWriter {
            inner: Arc::new(GroupCommit::new(&config, files, next_bsn, marks)),
            config,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            flush_signal: Arc::new((Mutex::new(false), Condvar::new())),
            flush_thread: Mutex::new(None),
            lock_file,
        };
        writer.start_flush_thread();
        Ok((writer, replay))
    }

    /// Log the prepare decision for `xid` and its branches.
    ///
    /// Returns the mark required to complete the transaction.
    pub fn prepare(&self, xid: &Xid, branches: &[BranchInfo]) -> Result<LogMark, LogError> {
        let record = PrepareRecord::new(xid, branches);
        if record.encoded_len() > self.inner.max_payload() {
            return Err(LogError::RecordTooLarge {
                size: record.encoded_len() + RECORD_HEADER_SIZE,
                max: self.inner.max_payload() + RECORD_HEADER_SIZE,
            });
        }
        let payload = record.to_bytes();
        let mark = self
            .inner
            .append_forced(RecordType::Prepare as u16, &payload, |mark| {
                self.inner.marks().lock().insert(
                    mark,
                    PendingPrepare {
                        xid: xid.clone(),
                        completing: false,
                    },
                );
            })?;
        debug!(target: "xalog::log", xid = %xid, ?mark, branches = branches.len(), "Logged prepare");
        Ok(mark)
    }

    /// Log the commit of the transaction prepared at `mark`.
    pub fn commit(&self, xid: &Xid, mark: LogMark) -> Result<(), LogError> {
        self.complete(Outcome::Commit, xid, mark)
    }

    /// Log the rollback of the transaction prepared at `mark`.
    pub fn rollback(&self, xid: &Xid, mark: LogMark) -> Result<(), LogError> {
        self.complete(Outcome::Rollback, xid, mark)
    }

    fn complete(&self, outcome: Outcome, xid: &Xid, mark: LogMark) -> Result<(), LogError> {
        if self.inner.is_closed() {
            return Err(LogError::Closed);
        }
        {
            let mut marks = self.inner.marks().lock();
            match marks.get_mut(&mark) {
                None => return Err(LogError::AlreadyCompleted { mark }),
                Some(pending) if pending.completing => {
                    return Err(LogError::AlreadyCompleted { mark })
                }
                Some(pending) if pending.xid != *xid => {
                    return Err(LogError::MarkMismatch { mark })
                }
                Some(pending) => pending.completing = true,
            }
        }

        let payload = DoneRecord::new(outcome, xid, mark).to_bytes();
        match self
            .inner
            .append_forced(RecordType::Done as u16, &payload, |_| {})
        {
            Ok(_) => {
                self.inner.marks().lock().remove(&mark);
                debug!(target: "xalog::log", xid = %xid, ?mark, ?outcome, "Logged completion");
                Ok(())
            }
            Err(e) => {
                if let Some(pending) = self.inner.marks().lock().get_mut(&mark) {
                    pending.completing = false;
                }
                Err(e)
            }
        }
    }

    /// Write the end-of-log marker, force it and stop the flush thread.
    ///
    /// Later calls to prepare, commit or rollback fail with
    /// [`LogError::Closed`]. Closing twice is a no-op.
    pub fn close(&self) -> Result<(), LogError> {
        let result = self.inner.close(END_OF_LOG);
        self.stop_flush_thread();
        if let Err(e) = fs2::FileExt::unlock(&self.lock_file) {
            warn!(target: "xalog::log", error = %e, "Failed to release log lock");
        }
        info!(target: "xalog::log", dir = ?self.config.log_file_dir, "Closed transaction log");
        result
    }

    /// Whether the log has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Cumulative counters.
    pub fn stats(&self) -> LogStats {
        self.inner.stats()
    }

    /// Number of prepared transactions not yet completed.
    pub fn unresolved_count(&self) -> usize {
        self.inner.marks().lock().len()
    }

    /// Configuration in use.
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    fn start_flush_thread(&self) {
        let inner = Arc::clone(&self.inner);
        let shutdown = Arc::clone(&self.shutdown_flag);
        let signal = Arc::clone(&self.flush_signal);
        let interval = self.config.flush_interval();
        let partial = self.config.flush_partial_buffers;

        let handle = thread::Builder::new()
            .name("xalog-flush".to_string())
            .spawn(move || loop {
                {
                    let (lock, cvar) = &*signal;
                    let mut signaled = lock.lock();
                    if !*signaled {
                        cvar.wait_for(&mut signaled, interval);
                    }
                    *signaled = false;
                }
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                inner.flush(partial);
            });

        match handle {
            Ok(handle) => *self.flush_thread.lock() = Some(handle),
            Err(e) => warn!(target: "xalog::log", error = %e, "Failed to start flush thread"),
        }
    }

    fn stop_flush_thread(&self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        {
            let (lock, cvar) = &*self.flush_signal;
            *lock.lock() = true;
            cvar.notify_one();
        }
        if let Some(handle) = self.flush_thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TransactionLogWriter {
    fn drop(&mut self) {
        if !self.inner.is_closed() {
            if let Err(e) = self.close() {
                warn!(target: "xalog::log", error = %e, "Error closing log on drop");
            }
        } else {
            self.stop_flush_thread();
        }
    }
}

fn acquire_lock(config: &LogConfig) -> Result<File, LogError> {
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(config.lock_path())?;
    fs2::FileExt::try_lock_exclusive(&lock_file)
        .map_err(|_| LogError::Locked(config.log_file_dir.clone()))?;
    Ok(lock_file)
}

fn check_compatible(config: &LogConfig, replay: &ReplayResult) -> Result<(), LogError> {
    for info in &replay.files {
        if info.block_size as usize != config.block_size()
            || info.header.max_log_files != config.max_log_files
            || info.header.max_blocks_per_file != config.max_blocks_on_disk()
        {
            return Err(LogError::Incompatible(format!(
                "{} has block size {}, {} files, {} blocks per file",
                info.path.display(),
                info.block_size,
                info.header.max_log_files,
                info.header.max_blocks_per_file
            )));
        }
    }
    Ok(())
}

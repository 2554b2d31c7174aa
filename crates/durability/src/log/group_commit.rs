//! Group commit over the buffer pool.
//!
//! Records are appended to the current buffer under one mutex, which fixes
//! their order in the log. A caller that needs its record durable waits
//! until the BSN of its buffer has been forced.
//!
//! # Protocol
//!
//! ```text
//! append ──► current buffer ──(full / threshold)──► sealed queue
//!                   │                                   │
//!                   └────────── leader takes both ──────┘
//!                                      │
//!                          write + fsync (state unlocked)
//!                                      │
//!                     durable_bsn advanced, waiters woken
//! ```
//!
//! At most one force runs at a time (`forcing`). A waiter that finds no
//! force in progress becomes the leader and forces everything appended so
//! far, including records of other waiters; those return without doing any
//! I/O. The background flush thread uses the same entry point, so it can
//! never force a buffer generation a second time.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, trace};
use xalog_core::{LogMark, Xid};

use super::buffer::{max_payload, BufferKind, LogBuffer};
use super::config::LogConfig;
use super::files::LogFileSet;
use crate::error::LogError;
use crate::format::{ChecksumKind, RECORD_HEADER_SIZE};

/// Cumulative log counters.
///
/// These counters accumulate over the lifetime of the writer and are never
/// reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogStats {
    /// Records appended
    pub records: u64,
    /// Physical forces (write + fsync batches)
    pub forces: u64,
    /// Blocks written
    pub blocks_written: u64,
    /// Bytes written
    pub bytes_written: u64,
    /// Nanoseconds spent writing and syncing
    pub force_nanos: u64,
    /// File rotations
    pub files_rotated: u64,
    /// Callers whose record was forced by another caller's force
    pub grouped_waiters: u64,
}

#[derive(Default)]
struct Counters {
    records: AtomicU64,
    forces: AtomicU64,
    blocks_written: AtomicU64,
    bytes_written: AtomicU64,
    force_nanos: AtomicU64,
    files_rotated: AtomicU64,
    grouped_waiters: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> LogStats {
        LogStats {
            records: self.records.load(Ordering::Relaxed),
            forces: self.forces.load(Ordering::Relaxed),
            blocks_written: self.blocks_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            force_nanos: self.force_nanos.load(Ordering::Relaxed),
            files_rotated: self.files_rotated.load(Ordering::Relaxed),
            grouped_waiters: self.grouped_waiters.load(Ordering::Relaxed),
        }
    }
}

/// Sticky failure after which the log accepts nothing.
#[derive(Debug, Clone)]
enum Failure {
    Force(String),
    Overflow(PathBuf),
}

impl Failure {
    fn from_error(err: &LogError) -> Self {
        match err {
            LogError::FileOverflow { file } => Failure::Overflow(file.clone()),
            other => Failure::Force(other.to_string()),
        }
    }

    fn to_error(&self) -> LogError {
        match self {
            Failure::Force(msg) => LogError::ForceFailed(msg.clone()),
            Failure::Overflow(file) => LogError::FileOverflow { file: file.clone() },
        }
    }
}

/// A prepare record that has not been completed yet.
#[derive(Debug, Clone)]
pub(crate) struct PendingPrepare {
    pub(crate) xid: Xid,
    pub(crate) completing: bool,
}

/// Unresolved prepares keyed by mark.
pub(crate) type ActiveMarks = HashMap<LogMark, PendingPrepare>;

struct PoolState {
    current: Option<Box<dyn LogBuffer>>,
    current_waiters: usize,
    sealed: VecDeque<Box<dyn LogBuffer>>,
    free: Vec<Box<dyn LogBuffer>>,
    allocated: usize,
    next_bsn: u32,
    durable_bsn: u32,
    forcing: bool,
    closing: bool,
    closed: bool,
    failure: Option<Failure>,
}

impl PoolState {
    fn seal_current(&mut self) {
        if let Some(buffer) = self.current.take() {
            if buffer.is_empty() {
                self.current = Some(buffer);
            } else {
                self.sealed.push_back(buffer);
                self.current_waiters = 0;
            }
        }
    }
}

/// Buffer pool, file set and unresolved marks of one open log.
pub(crate) struct GroupCommit {
    state: Mutex<PoolState>,
    cond: Condvar,
    files: Mutex<LogFileSet>,
    marks: Mutex<ActiveMarks>,
    counters: Counters,
    buffer_kind: BufferKind,
    block_size: usize,
    checksum: ChecksumKind,
    max_buffers: usize,
    threshold: usize,
}

impl GroupCommit {
    pub(crate) fn new(
        config: &LogConfig,
        files: LogFileSet,
        next_bsn: u32,
        marks: ActiveMarks,
    ) -> Self {
        let free: Vec<_> = (0..config.min_buffers)
            .map(|_| config.buffer_kind.allocate(config.block_size()))
            .collect();
        GroupCommit {
            state: Mutex::new(PoolState {
                current: None,
                current_waiters: 0,
                sealed: VecDeque::new(),
                allocated: free.len(),
                free,
                next_bsn,
                durable_bsn: next_bsn.saturating_sub(1),
                forcing: false,
                closing: false,
                closed: false,
                failure: None,
            }),
            cond: Condvar::new(),
            files: Mutex::new(files),
            marks: Mutex::new(marks),
            counters: Counters::default(),
            buffer_kind: config.buffer_kind,
            block_size: config.block_size(),
            checksum: config.checksum,
            max_buffers: config.max_buffers,
            threshold: config.threads_waiting_force_threshold.unwrap_or(usize::MAX),
        }
    }

    /// Largest payload a single record may carry.
    pub(crate) fn max_payload(&self) -> usize {
        max_payload(self.block_size)
    }

    /// Unresolved prepares.
    pub(crate) fn marks(&self) -> &Mutex<ActiveMarks> {
        &self.marks
    }

    pub(crate) fn stats(&self) -> LogStats {
        self.counters.snapshot()
    }

    pub(crate) fn is_closed(&self) -> bool {
        let state = self.state.lock();
        state.closed || state.closing
    }

    /// Append a record and wait until it is durable.
    ///
    /// `on_append` runs under the pool lock once the record's mark is
    /// known, before any force can cover it.
    pub(crate) fn append_forced(
        &self,
        record_type: u16,
        payload: &[u8],
        on_append: impl FnOnce(LogMark),
    ) -> Result<LogMark, LogError> {
        self.append_inner(record_type, payload, false, on_append)
    }

    fn append_inner(
        &self,
        record_type: u16,
        payload: &[u8],
        closing_ok: bool,
        on_append: impl FnOnce(LogMark),
    ) -> Result<LogMark, LogError> {
        if payload.len() > self.max_payload() {
            return Err(LogError::RecordTooLarge {
                size: payload.len() + RECORD_HEADER_SIZE,
                max: self.max_payload() + RECORD_HEADER_SIZE,
            });
        }

        let mut state = self.state.lock();
        let mark = self.place(&mut state, record_type, payload, closing_ok)?;

        on_append(mark);
        self.counters.records.fetch_add(1, Ordering::Relaxed);

        state.current_waiters += 1;
        if state.current_waiters >= self.threshold {
            trace!(
                target: "xalog::log",
                waiters = state.current_waiters,
                "Force threshold reached"
            );
            state.seal_current();
        }

        let mut led = false;
        loop {
            if state.durable_bsn >= mark.bsn() {
                if !led {
                    self.counters.grouped_waiters.fetch_add(1, Ordering::Relaxed);
                }
                return Ok(mark);
            }
            if let Some(failure) = &state.failure {
                return Err(failure.to_error());
            }
            if state.closed {
                return Err(LogError::Interrupted);
            }
            if !state.forcing {
                self.lead_force(&mut state, true);
                led = true;
                continue;
            }
            self.cond.wait(&mut state);
        }
    }

    /// Put a record into the current buffer, taking a new buffer when it
    /// is full. Blocks while the pool is exhausted and a force is running.
    fn place(
        &self,
        state: &mut MutexGuard<'_, PoolState>,
        record_type: u16,
        payload: &[u8],
        closing_ok: bool,
    ) -> Result<LogMark, LogError> {
        loop {
            if state.closed || (state.closing && !closing_ok) {
                return Err(LogError::Closed);
            }
            if let Some(failure) = &state.failure {
                return Err(failure.to_error());
            }

            if state.current.is_none() {
                match self.take_free_buffer(state) {
                    Some(mut buffer) => {
                        buffer.reset(state.next_bsn);
                        state.next_bsn += 1;
                        state.current = Some(buffer);
                        state.current_waiters = 0;
                    }
                    None if !state.forcing && !state.sealed.is_empty() => {
                        self.lead_force(state, false);
                        continue;
                    }
                    None => {
                        self.cond.wait(state);
                        continue;
                    }
                }
            }

            if let Some(buffer) = state.current.as_mut() {
                if let Some(offset) = buffer.append(record_type, payload) {
                    return Ok(LogMark::new(buffer.bsn(), offset));
                }
            }
            state.seal_current();
        }
    }

    /// Append a record without waiting for it to become durable.
    #[cfg(test)]
    pub(crate) fn append_buffered(
        &self,
        record_type: u16,
        payload: &[u8],
    ) -> Result<LogMark, LogError> {
        let mut state = self.state.lock();
        let mark = self.place(&mut state, record_type, payload, false)?;
        self.counters.records.fetch_add(1, Ordering::Relaxed);
        Ok(mark)
    }

    /// Force buffered records from the flush thread.
    ///
    /// Skips the cycle if a force is already running. With `partial` set,
    /// the partially filled current buffer is forced as well.
    pub(crate) fn flush(&self, partial: bool) {
        let mut state = self.state.lock();
        if state.forcing || state.closed || state.failure.is_some() {
            return;
        }
        let pending = !state.sealed.is_empty()
            || (partial && state.current.as_ref().is_some_and(|b| !b.is_empty()));
        if pending {
            self.lead_force(&mut state, partial);
        }
    }

    /// Append the end-of-log marker, force everything and refuse new records.
    pub(crate) fn close(&self, end_of_log: u16) -> Result<(), LogError> {
        {
            let mut state = self.state.lock();
            if state.closed || state.closing {
                return Ok(());
            }
            state.closing = true;
        }

        let result = self.append_inner(end_of_log, &[], true, |_| {});

        let mut state = self.state.lock();
        state.closed = true;
        self.cond.notify_all();
        result.map(|_| ())
    }

    fn take_free_buffer(&self, state: &mut PoolState) -> Option<Box<dyn LogBuffer>> {
        if let Some(buffer) = state.free.pop() {
            return Some(buffer);
        }
        if self.max_buffers == 0 || state.allocated < self.max_buffers {
            state.allocated += 1;
            return Some(self.buffer_kind.allocate(self.block_size));
        }
        None
    }

    /// Write and fsync every sealed buffer (and the current one when
    /// `include_current`), with the pool unlocked during I/O.
    fn lead_force(&self, state: &mut MutexGuard<'_, PoolState>, include_current: bool) {
        if include_current {
            state.seal_current();
        }
        if state.sealed.is_empty() {
            return;
        }
        let batch: Vec<Box<dyn LogBuffer>> = state.sealed.drain(..).collect();
        state.forcing = true;

        let (batch, result) = MutexGuard::unlocked(state, || self.write_batch(batch));

        state.forcing = false;
        match result {
            Ok(last_bsn) => state.durable_bsn = last_bsn,
            Err(e) => {
                error!(target: "xalog::log", error = %e, "Log force failed");
                state.failure = Some(Failure::from_error(&e));
            }
        }
        state.free.extend(batch);
        self.cond.notify_all();
    }

    fn write_batch(
        &self,
        mut batch: Vec<Box<dyn LogBuffer>>,
    ) -> (Vec<Box<dyn LogBuffer>>, Result<u32, LogError>) {
        let started = Instant::now();
        let timestamp = super::now_millis();
        for buffer in batch.iter_mut() {
            buffer.seal(self.checksum, timestamp);
        }
        let first_bsn = batch[0].bsn();
        let last_bsn = batch[batch.len() - 1].bsn();

        let result = {
            let blocks: Vec<&[u8]> = batch.iter().map(|b| b.block()).collect();
            let mut files = self.files.lock();
            files.write_blocks(&blocks, first_bsn, |lo, hi| {
                self.marks
                    .lock()
                    .keys()
                    .any(|m| m.bsn() >= lo && m.bsn() < hi)
            })
        };

        let result = result.map(|rotations| {
            let bytes = (batch.len() * self.block_size) as u64;
            self.counters.forces.fetch_add(1, Ordering::Relaxed);
            self.counters
                .blocks_written
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
            self.counters.bytes_written.fetch_add(bytes, Ordering::Relaxed);
            self.counters
                .files_rotated
                .fetch_add(rotations as u64, Ordering::Relaxed);
            self.counters
                .force_nanos
                .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
            debug!(
                target: "xalog::log",
                first_bsn,
                last_bsn,
                blocks = batch.len(),
                "Forced log blocks"
            );
            last_bsn
        });
        (batch, result)
    }
}

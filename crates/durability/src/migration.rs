//! Log migration between configurations
//!
//! Runs once at startup, before the writer is opened, when the log
//! configuration may have changed since the log on disk was written.
//!
//! - Same binary layout, different directory: the directory is moved.
//! - Same binary layout, different file name: every file is renamed.
//! - Different block size, file count or blocks per file: the old log is
//!   replayed and each in-doubt transaction is prepared again in a freshly
//!   created log. When old and new directory coincide, the old directory is
//!   first moved to a timestamped backup, which is deleted on success and
//!   put back on failure.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};
use xalog_core::{XidGenerator, MAX_IDENTITY_LEN};

use crate::error::{MigrationError, ReplayError};
use crate::log::{LogConfig, LogFileInfo, LogReader, TransactionLogWriter};
use crate::recovery::RecoveryReplayer;

/// A log configuration together with the coordinator identity that wrote it.
#[derive(Debug, Clone, Copy)]
pub struct LogSource<'a> {
    /// Log configuration
    pub config: &'a LogConfig,
    /// Coordinator identity used to seed the Xid generator
    pub identity: &'a [u8],
}

impl<'a> LogSource<'a> {
    /// Pair a configuration with an identity.
    pub fn new(config: &'a LogConfig, identity: &'a [u8]) -> Self {
        LogSource { config, identity }
    }

    fn generator(&self) -> Result<XidGenerator, MigrationError> {
        let len = self.identity.len().min(MAX_IDENTITY_LEN);
        Ok(XidGenerator::new(&self.identity[..len])?)
    }
}

/// Carries a log over to a new configuration.
pub struct LogMigrator<'a> {
    target: LogSource<'a>,
}

impl<'a> LogMigrator<'a> {
    /// Create a migrator towards `target`.
    pub fn new(target: LogSource<'a>) -> Self {
        LogMigrator { target }
    }

    /// Bring the log described by `previous` in line with the target.
    ///
    /// With no previous configuration the target directory is examined as
    /// if it held a log written with the target's file naming. Returns
    /// whether any content was carried over. A log that cannot be moved,
    /// backed up or rewritten is an error; it is never silently left behind.
    pub fn migrate(&self, previous: Option<LogSource<'_>>) -> Result<bool, MigrationError> {
        let target = self.target.config;
        target.validate().map_err(ReplayError::from)?;

        let mut old_config = previous.map(|p| p.config.clone()).unwrap_or_else(|| target.clone());
        let old_identity = previous.map(|p| p.identity).unwrap_or(self.target.identity);
        let same_dir = same_path(&old_config.log_file_dir, &target.log_file_dir);

        if same_dir && !has_content(&old_config.file_path(1)) {
            old_config.log_file_name = target.log_file_name.clone();
            old_config.log_file_ext = target.log_file_ext.clone();
        }
        let first = old_config.file_path(1);
        if !has_content(&first) {
            info!(target: "xalog::migrate", path = ?first, "No existing log to migrate");
            return Ok(false);
        }
        if !same_dir && target.log_file_dir.exists() {
            warn!(
                target: "xalog::migrate",
                dir = ?target.log_file_dir,
                "Removing stale log directory in favor of the existing log"
            );
            fs::remove_dir_all(&target.log_file_dir)?;
        }

        let info = match LogReader::new(&old_config).read_file_info(1)? {
            Some(info) => info,
            None => {
                warn!(target: "xalog::migrate", path = ?first, "Unreadable log header, leaving files in place");
                return self.relocate(&old_config, same_dir);
            }
        };
        let on_disk = config_from_header(&old_config, &info);
        if on_disk.is_compatible_with(target) {
            return self.relocate(&old_config, same_dir);
        }

        self.rewrite(on_disk, old_identity, same_dir)
    }

    /// Move and rename files of a compatible log.
    fn relocate(&self, old: &LogConfig, same_dir: bool) -> Result<bool, MigrationError> {
        let target = self.target.config;
        if !same_dir {
            if let Err(e) = fs::rename(&old.log_file_dir, &target.log_file_dir) {
                error!(
                    target: "xalog::migrate",
                    from = ?old.log_file_dir,
                    to = ?target.log_file_dir,
                    error = %e,
                    "Problem moving log directory"
                );
                return Err(e.into());
            }
            info!(
                target: "xalog::migrate",
                from = ?old.log_file_dir,
                to = ?target.log_file_dir,
                "Moved log directory"
            );
        }

        if old.log_file_name == target.log_file_name && old.log_file_ext == target.log_file_ext {
            return Ok(false);
        }
        let mut renamed = 0;
        for entry in fs::read_dir(&target.log_file_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let number = match name
                .to_str()
                .and_then(|n| file_number(n, &old.log_file_name, &old.log_file_ext))
            {
                Some(number) => number,
                None => continue,
            };
            fs::rename(entry.path(), target.file_path(number))?;
            renamed += 1;
        }
        info!(
            target: "xalog::migrate",
            dir = ?target.log_file_dir,
            from = %old.log_file_name,
            to = %target.log_file_name,
            files = renamed,
            "Renamed log files"
        );
        Ok(true)
    }

    /// Replay the old log into a freshly created one.
    fn rewrite(
        &self,
        mut old: LogConfig,
        old_identity: &[u8],
        same_dir: bool,
    ) -> Result<bool, MigrationError> {
        let target = self.target.config;
        let original_dir = old.log_file_dir.clone();
        let backup = if same_dir {
            let backup = backup_path(&original_dir);
            if let Err(e) = fs::rename(&original_dir, &backup) {
                error!(
                    target: "xalog::migrate",
                    dir = ?original_dir,
                    error = %e,
                    "Problem moving log directory to backup"
                );
                return Err(e.into());
            }
            old.log_file_dir = backup.clone();
            Some(backup)
        } else {
            None
        };

        info!(
            target: "xalog::migrate",
            from = ?original_dir,
            to = ?target.log_file_dir,
            "Converting transaction log"
        );
        match self.copy_in_doubt(&old, old_identity) {
            Ok(carried) => {
                if let Some(backup) = backup {
                    fs::remove_dir_all(&backup)?;
                }
                info!(target: "xalog::migrate", transactions = carried, "Log migration complete");
                Ok(carried > 0)
            }
            Err(e) => {
                error!(target: "xalog::migrate", error = %e, "Log migration failed");
                match backup {
                    Some(backup) => restore(&backup, &original_dir, e),
                    None => {
                        discard_partial(&target.log_file_dir);
                        Err(e)
                    }
                }
            }
        }
    }

    fn copy_in_doubt(&self, old: &LogConfig, old_identity: &[u8]) -> Result<usize, MigrationError> {
        let old_generator = LogSource::new(old, old_identity).generator()?;
        let new_generator = self.target.generator()?;

        let replay = RecoveryReplayer::new(&old_generator).replay(old)?;
        let (writer, _) = TransactionLogWriter::open(self.target.config.clone(), &new_generator)?;

        let pairs = replay.in_doubt_in_log_order();
        for pair in &pairs {
            info!(target: "xalog::migrate", xid = %pair.xid(), "Migrating in-doubt transaction");
            for branch in pair.branches() {
                info!(
                    target: "xalog::migrate",
                    branch = %branch.branch_xid(),
                    resource = branch.resource_name(),
                    "Migrating branch"
                );
            }
            writer.prepare(pair.xid(), pair.branches())?;
        }
        writer.close()?;
        Ok(pairs.len())
    }
}

/// Put the backup back in place of a half-written directory.
fn restore(backup: &Path, dir: &Path, cause: MigrationError) -> Result<bool, MigrationError> {
    let result = if dir.exists() {
        fs::remove_dir_all(dir).and_then(|_| fs::rename(backup, dir))
    } else {
        fs::rename(backup, dir)
    };
    match result {
        Ok(()) => {
            info!(target: "xalog::migrate", dir = ?dir, "Restored log from backup");
            Err(cause)
        }
        Err(e) => Err(MigrationError::RestoreFailed {
            backup: backup.to_path_buf(),
            cause: cause.to_string(),
            restore: e.to_string(),
        }),
    }
}

/// Remove a half-written target log; the old log is left where it was.
fn discard_partial(dir: &Path) {
    if !dir.exists() {
        return;
    }
    match fs::remove_dir_all(dir) {
        Ok(()) => info!(target: "xalog::migrate", dir = ?dir, "Removed partially migrated log"),
        Err(e) => warn!(
            target: "xalog::migrate",
            dir = ?dir,
            error = %e,
            "Problem removing partially migrated log"
        ),
    }
}

/// Old configuration with the binary layout found in its header.
fn config_from_header(old: &LogConfig, info: &LogFileInfo) -> LogConfig {
    let mut config = old.clone();
    config.buffer_size_kb = info.block_size / 1024;
    config.max_log_files = info.header.max_log_files;
    config.max_blocks_per_file = info.header.max_blocks();
    config
}

/// `{dir}-{millis:016x}`
fn backup_path(dir: &Path) -> PathBuf {
    let mut name = dir.as_os_str().to_os_string();
    name.push(format!("-{:016x}", crate::log::now_millis()));
    PathBuf::from(name)
}

fn has_content(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Number `n` of a file named `{name}_{n}.{ext}`.
fn file_number(file_name: &str, name: &str, ext: &str) -> Option<u32> {
    let rest = file_name.strip_prefix(name)?.strip_prefix('_')?;
    let digits = if ext.is_empty() {
        rest
    } else {
        rest.strip_suffix(ext)?.strip_suffix('.')?
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

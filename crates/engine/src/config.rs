//! Coordinator configuration via `xalog.toml`
//!
//! A default file is written on first start. To change settings, edit the
//! file and restart; a changed `[log]` table is migrated at startup.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use xalog_core::MAX_IDENTITY_LEN;
use xalog_durability::LogConfig;

use crate::error::{CoordinatorError, CoordinatorResult};

/// Config file name.
pub const CONFIG_FILE_NAME: &str = "xalog.toml";

/// Identity used when `tmid` is not configured.
pub const DEFAULT_TMID: &str = "xalog.coordinator";

/// Coordinator configuration loaded from `xalog.toml`.
///
/// # Example
///
/// ```toml
/// transaction_timeout_secs = 600
/// recoverable = true
/// tmid = "orders-service"
///
/// [log]
/// log_file_dir = "/var/lib/xalog/txlog"
/// buffer_size_kb = 4
/// max_log_files = 2
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Transaction timeout in seconds. Must be positive.
    #[serde(default = "default_timeout_secs")]
    pub transaction_timeout_secs: u64,
    /// Whether decisions go to the on-disk log.
    #[serde(default)]
    pub recoverable: bool,
    /// Coordinator identity seeding every Xid.
    #[serde(default = "default_tmid")]
    pub tmid: String,
    /// Log settings, used when `recoverable` is set.
    #[serde(default)]
    pub log: LogConfig,
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_tmid() -> String {
    DEFAULT_TMID.to_string()
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            transaction_timeout_secs: default_timeout_secs(),
            recoverable: false,
            tmid: default_tmid(),
            log: LogConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Recoverable configuration with the given log settings.
    pub fn recoverable(log: LogConfig) -> Self {
        Self {
            recoverable: true,
            log,
            ..Self::default()
        }
    }

    /// Check every setting that applies to the selected mode.
    pub fn validate(&self) -> CoordinatorResult<()> {
        if self.transaction_timeout_secs == 0 {
            return Err(CoordinatorError::TransactionTimeoutZero);
        }
        if self.recoverable {
            self.log.validate()?;
        }
        Ok(())
    }

    /// Transaction timeout.
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_timeout_secs)
    }

    /// Identity bytes, cut to what the Xid base id can hold.
    pub fn identity(&self) -> &[u8] {
        let bytes = self.tmid.as_bytes();
        &bytes[..bytes.len().min(MAX_IDENTITY_LEN)]
    }

    /// Validated log configuration.
    pub fn log_config(&self) -> CoordinatorResult<LogConfig> {
        self.log.validate()?;
        Ok(self.log.clone())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# xalog transaction coordinator configuration
#
# Seconds before an unfinished transaction is rolled back (must be > 0)
transaction_timeout_secs = 600

# Write prepare/commit decisions to a durable log (default: false)
# Without it every in-flight transaction is lost on crash.
recoverable = false

# Coordinator identity, embedded in every transaction id (max 56 bytes).
# Changing it makes transactions logged under the old identity foreign.
tmid = "xalog.coordinator"

[log]
# Absolute directory for the log files; required when recoverable = true
# log_file_dir = "/var/lib/xalog/txlog"
log_file_name = "transaction"
log_file_ext = "log"
# Block size in KB, 1 to 32
buffer_size_kb = 4
# "adler32", "crc32" or "none"
checksum = "adler32"
flush_sleep_time_ms = 50
# Blocks per file including the header block; unset grows files without limit
# max_blocks_per_file = 512
max_log_files = 2
min_buffers = 4
# 0 = no limit
max_buffers = 0
# Waiting threads that trigger an immediate force; unset = no threshold
# threads_waiting_force_threshold = 8
flush_partial_buffers = true
buffer_kind = "block"
"#
    }

    /// Read and parse config from a file path.
    pub fn from_file(path: &Path) -> CoordinatorResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoordinatorError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: CoordinatorConfig = toml::from_str(&content).map_err(|e| {
            CoordinatorError::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> CoordinatorResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                CoordinatorError::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> CoordinatorResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CoordinatorError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            CoordinatorError::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

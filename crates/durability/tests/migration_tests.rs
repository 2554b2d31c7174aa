//! Log migration tests
//!
//! Each test writes a log holding one prepared transaction, changes the
//! configuration, migrates, and checks what ended up on disk.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use xalog_core::{BranchInfo, Xid, XidGenerator};
use xalog_durability::{
    LogConfig, LogError, LogMigrator, LogSource, MigrationError, RecoveryReplayer,
    TransactionLogWriter,
};

const IDENTITY: &[u8] = b"xalog.migration.test";

fn base_config(dir: &Path) -> LogConfig {
    LogConfig::new(dir)
        .with_buffer_size_kb(1)
        .with_max_log_files(2)
        .with_buffers(1, 0)
        .with_flush_sleep_time_ms(10)
}

/// Write a log holding one prepared transaction with `branch_count` branches.
fn prepared_log(config: &LogConfig, branch_count: usize) -> Xid {
    let gen = XidGenerator::new(IDENTITY).unwrap();
    let xid = gen.create_transaction_id();
    let branches: Vec<BranchInfo> = (1..=branch_count)
        .map(|b| BranchInfo::new(gen.create_branch(&xid, b as i32), format!("res-{:02}", b)))
        .collect();
    let (writer, _) = TransactionLogWriter::open(config.clone(), &gen).unwrap();
    writer.prepare(&xid, &branches).unwrap();
    writer.close().unwrap();
    xid
}

fn migrate(previous: Option<&LogConfig>, target: &LogConfig) -> Result<bool, MigrationError> {
    LogMigrator::new(LogSource::new(target, IDENTITY))
        .migrate(previous.map(|c| LogSource::new(c, IDENTITY)))
}

fn in_doubt(config: &LogConfig) -> Vec<Xid> {
    let gen = XidGenerator::new(IDENTITY).unwrap();
    let result = RecoveryReplayer::new(&gen).replay(config).unwrap();
    result
        .in_doubt_in_log_order()
        .into_iter()
        .map(|p| p.xid().clone())
        .collect()
}

fn backups(dir: &Path) -> Vec<PathBuf> {
    let prefix = format!("{}-", dir.file_name().unwrap().to_string_lossy());
    fs::read_dir(dir.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with(&prefix))
                .unwrap_or(false)
        })
        .collect()
}

#[test]
fn test_initial_configuration_without_log() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("txlog");
    fs::create_dir_all(&dir).unwrap();

    assert!(!migrate(None, &base_config(&dir)).unwrap());
}

#[test]
fn test_initial_configuration_with_empty_files() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("txlog");
    fs::create_dir_all(&dir).unwrap();
    let config = base_config(&dir);
    fs::File::create(config.file_path(1)).unwrap();
    fs::File::create(config.file_path(2)).unwrap();

    assert!(!migrate(None, &config).unwrap());
    assert_eq!(fs::metadata(config.file_path(1)).unwrap().len(), 0);
}

#[test]
fn test_unchanged_configuration_leaves_log_untouched() {
    let root = TempDir::new().unwrap();
    let config = base_config(&root.path().join("txlog"));
    let xid = prepared_log(&config, 1);
    let before = fs::read(config.file_path(1)).unwrap();

    assert!(!migrate(None, &config).unwrap());
    assert!(!migrate(Some(&config), &config).unwrap());
    assert_eq!(fs::read(config.file_path(1)).unwrap(), before);
    assert_eq!(in_doubt(&config), vec![xid]);
}

#[test]
fn test_changed_directory_moves_log() {
    let root = TempDir::new().unwrap();
    let old = base_config(&root.path().join("txlog"));
    let new = base_config(&root.path().join("txlog-new"));
    let xid = prepared_log(&old, 1);
    let before = fs::read(old.file_path(1)).unwrap();

    assert!(!migrate(Some(&old), &new).unwrap());
    assert!(!old.log_file_dir.exists(), "old directory should be moved");
    assert_eq!(fs::read(new.file_path(1)).unwrap(), before);
    assert_eq!(in_doubt(&new), vec![xid]);
}

#[test]
fn test_unknown_previous_directory_is_ignored() {
    let root = TempDir::new().unwrap();
    let old = base_config(&root.path().join("txlog"));
    let new = base_config(&root.path().join("txlog-new"));
    prepared_log(&old, 1);

    assert!(!migrate(None, &new).unwrap());
    assert!(old.file_path(1).exists(), "old log should not be removed");
    assert!(!new.log_file_dir.exists(), "new log is created by the writer");
}

#[test]
fn test_changed_number_of_files_rewrites_log() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("txlog");
    let old = base_config(&dir);
    let new = base_config(&dir).with_max_log_files(20);
    let xid = prepared_log(&old, 1);

    assert!(migrate(Some(&old), &new).unwrap());
    assert!(new.file_path(1).exists());
    assert!(new.file_path(20).exists(), "there should be 20 log files");
    assert_eq!(in_doubt(&new), vec![xid]);
    assert!(backups(&dir).is_empty(), "backup should be deleted");
}

#[test]
fn test_changed_max_blocks_per_file_rewrites_log() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("txlog");
    let old = base_config(&dir).with_max_log_files(3);
    let new = old.clone().with_max_blocks_per_file(Some(20));
    let xid = prepared_log(&old, 1);

    assert!(migrate(Some(&old), &new).unwrap());
    assert!(new.file_path(3).exists());
    assert!(!new.file_path(4).exists(), "there should be 3 log files");
    assert_eq!(in_doubt(&new), vec![xid]);
}

#[test]
fn test_changed_block_size_rewrites_log() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("txlog");
    let old = base_config(&dir);
    let new = base_config(&dir).with_buffer_size_kb(32);
    let xid = prepared_log(&old, 3);

    assert!(migrate(Some(&old), &new).unwrap());
    assert_eq!(
        fs::metadata(new.file_path(1)).unwrap().len() % (32 * 1024),
        0
    );
    let gen = XidGenerator::new(IDENTITY).unwrap();
    let result = RecoveryReplayer::new(&gen).replay(&new).unwrap();
    let pair = &result.in_doubt[&xid];
    assert_eq!(
        pair.resource_names().collect::<Vec<_>>(),
        vec!["res-01", "res-02", "res-03"]
    );
    assert!(backups(&dir).is_empty());
}

#[test]
fn test_initial_configuration_rewrites_incompatible_log() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("txlog");
    let old = base_config(&dir);
    let new = base_config(&dir).with_buffer_size_kb(4);
    let xid = prepared_log(&old, 1);

    assert!(migrate(None, &new).unwrap());
    assert_eq!(in_doubt(&new), vec![xid]);
}

#[test]
fn test_changed_parameters_and_directory_keep_old_log() {
    let root = TempDir::new().unwrap();
    let old = base_config(&root.path().join("txlog")).with_max_log_files(3);
    let new = base_config(&root.path().join("txlog-new"))
        .with_max_log_files(4)
        .with_max_blocks_per_file(Some(4))
        .with_buffer_size_kb(4);
    let xid = prepared_log(&old, 1);

    assert!(migrate(Some(&old), &new).unwrap());
    assert!(old.file_path(1).exists(), "old log should remain");
    assert!(new.file_path(1).exists(), "new log should exist");
    assert_eq!(in_doubt(&new), vec![xid]);
}

#[test]
fn test_changed_file_name_renames_files() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("txlog");
    let old = base_config(&dir);
    let new = base_config(&dir).with_file_name("megatransaction");
    let xid = prepared_log(&old, 1);

    assert!(migrate(Some(&old), &new).unwrap());
    assert!(!old.file_path(1).exists(), "old file name should be gone");
    assert!(!old.file_path(2).exists());
    assert!(new.file_path(1).exists());
    assert!(new.file_path(2).exists());
    assert_eq!(in_doubt(&new), vec![xid]);
}

#[test]
fn test_changed_file_name_and_directory() {
    let root = TempDir::new().unwrap();
    let old = base_config(&root.path().join("txlog"));
    let new = base_config(&root.path().join("txlog-new")).with_file_name("megatransaction");
    let xid = prepared_log(&old, 1);

    assert!(migrate(Some(&old), &new).unwrap());
    assert!(!old.file_path(1).exists());
    assert!(new.file_path(1).exists());
    assert_eq!(in_doubt(&new), vec![xid]);
}

#[test]
fn test_changed_file_name_and_block_size() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("txlog");
    let old = base_config(&dir);
    let new = base_config(&dir)
        .with_file_name("megatransaction")
        .with_buffer_size_kb(4);
    let xid = prepared_log(&old, 1);

    assert!(migrate(Some(&old), &new).unwrap());
    assert!(new.file_path(1).exists());
    assert_eq!(in_doubt(&new), vec![xid]);
    assert!(backups(&dir).is_empty());
}

#[test]
fn test_failed_rewrite_restores_backup() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("txlog");
    let old = base_config(&dir).with_buffer_size_kb(32);
    let new = base_config(&dir);
    // Far more than a 1 KB block can hold.
    let xid = prepared_log(&old, 40);
    let before = fs::read(old.file_path(1)).unwrap();

    let result = migrate(Some(&old), &new);
    assert!(matches!(
        result,
        Err(MigrationError::Log(LogError::RecordTooLarge { .. }))
    ));
    assert_eq!(fs::read(old.file_path(1)).unwrap(), before);
    assert!(backups(&dir).is_empty(), "backup should be moved back");
    assert_eq!(in_doubt(&old), vec![xid]);
}

#[test]
fn test_failed_directory_move_is_an_error() {
    let root = TempDir::new().unwrap();
    let old = base_config(&root.path().join("txlog"));
    // The parent of the new directory does not exist, so the move fails.
    let new = base_config(&root.path().join("missing").join("txlog"));
    let xid = prepared_log(&old, 1);

    let result = migrate(Some(&old), &new);
    assert!(matches!(result, Err(MigrationError::Io(_))));
    assert!(!new.log_file_dir.exists());
    assert_eq!(in_doubt(&old), vec![xid]);
}

#[test]
fn test_failed_rewrite_into_new_directory_leaves_no_partial_log() {
    let root = TempDir::new().unwrap();
    let old = base_config(&root.path().join("txlog")).with_buffer_size_kb(32);
    let new = base_config(&root.path().join("txlog-new"));
    let xid = prepared_log(&old, 40);

    let result = migrate(Some(&old), &new);
    assert!(matches!(
        result,
        Err(MigrationError::Log(LogError::RecordTooLarge { .. }))
    ));
    assert!(!new.log_file_dir.exists(), "partial log should be removed");
    assert_eq!(in_doubt(&old), vec![xid]);
}

//! Recovery tests
//!
//! Logs are written through the real writer, optionally damaged on disk,
//! and replayed from scratch:
//! - prepared but uncompleted transactions come back with their branches
//! - completed transactions do not
//! - a torn or corrupt tail hides only what follows it
//! - a reopened writer can complete recovered transactions

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use proptest::prelude::*;
use tempfile::TempDir;
use xalog_core::{BranchInfo, Xid, XidGenerator};
use xalog_durability::{
    LogConfig, ReadStopReason, RecoveryReplayer, ReplayError, ReplayResult, TransactionLogWriter,
};

const BLOCK: u64 = 1024;

fn generator() -> XidGenerator {
    XidGenerator::with_start(b"recovery-tests", 7).unwrap()
}

fn branches(gen: &XidGenerator, xid: &Xid, names: &[&str]) -> Vec<BranchInfo> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| BranchInfo::new(gen.create_branch(xid, i as i32 + 1), *name))
        .collect()
}

fn replay(config: &LogConfig, gen: &XidGenerator) -> ReplayResult {
    RecoveryReplayer::new(gen).replay(config).unwrap()
}

fn truncate(path: &Path, len: u64) {
    let file = OpenOptions::new().write(true).open(path).unwrap();
    file.set_len(len).unwrap();
    file.sync_all().unwrap();
}

fn flip_byte(path: &Path, offset: u64) {
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let mut buf = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.read_exact(&mut buf).unwrap();
    buf[0] ^= 0xFF;
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&buf).unwrap();
    file.sync_all().unwrap();
}

/// Two prepares (blocks 1 and 2) followed by the end-of-log marker (block 3).
fn two_prepares(config: &LogConfig, gen: &XidGenerator) -> (Xid, Xid) {
    let (writer, _) = TransactionLogWriter::open(config.clone(), gen).unwrap();
    let a = gen.create_transaction_id();
    let b = gen.create_transaction_id();
    writer.prepare(&a, &branches(gen, &a, &["rm-a"])).unwrap();
    writer.prepare(&b, &branches(gen, &b, &["rm-b"])).unwrap();
    writer.close().unwrap();
    (a, b)
}

#[test]
fn test_prepared_transaction_is_in_doubt_with_branches() {
    let dir = TempDir::new().unwrap();
    let config = LogConfig::for_testing(dir.path());
    let gen = generator();

    let xid = gen.create_transaction_id();
    let logged = vec![
        BranchInfo::new(gen.create_branch(&xid, 1), "rm-a"),
        BranchInfo::new(gen.create_branch(&xid, 2), "rm-b"),
    ];
    let mark = {
        let (writer, _) = TransactionLogWriter::open(config.clone(), &gen).unwrap();
        let mark = writer.prepare(&xid, &logged).unwrap();
        writer.close().unwrap();
        mark
    };

    let result = replay(&config, &gen);
    assert_eq!(result.in_doubt.len(), 1);
    let pair = &result.in_doubt[&xid];
    assert_eq!(pair.xid(), &xid);
    assert_eq!(pair.mark(), mark);
    assert_eq!(pair.branches(), logged.as_slice());
    assert_eq!(
        pair.resource_names().collect::<Vec<_>>(),
        vec!["rm-a", "rm-b"]
    );
    assert!(result.is_clean());
    assert!(result.stats.clean_shutdown);
}

#[test]
fn test_completed_transactions_are_not_in_doubt() {
    let dir = TempDir::new().unwrap();
    let config = LogConfig::for_testing(dir.path());
    let gen = generator();

    let (committed, rolled_back, pending) = {
        let (writer, _) = TransactionLogWriter::open(config.clone(), &gen).unwrap();
        let a = gen.create_transaction_id();
        let b = gen.create_transaction_id();
        let c = gen.create_transaction_id();
        let mark_a = writer.prepare(&a, &branches(&gen, &a, &["rm-a"])).unwrap();
        let mark_b = writer.prepare(&b, &branches(&gen, &b, &["rm-b"])).unwrap();
        writer.prepare(&c, &branches(&gen, &c, &["rm-c"])).unwrap();
        writer.commit(&a, mark_a).unwrap();
        writer.rollback(&b, mark_b).unwrap();
        writer.close().unwrap();
        (a, b, c)
    };

    let result = replay(&config, &gen);
    assert!(!result.in_doubt.contains_key(&committed));
    assert!(!result.in_doubt.contains_key(&rolled_back));
    assert!(result.in_doubt.contains_key(&pending));
    assert_eq!(result.stats.prepares, 3);
    assert_eq!(result.stats.completions, 2);
    assert_eq!(result.stats.unmatched_completions, 0);
}

#[test]
fn test_missing_log_replays_empty() {
    let dir = TempDir::new().unwrap();
    let config = LogConfig::for_testing(dir.path().join("never-created"));

    let result = replay(&config, &generator());
    assert!(result.in_doubt.is_empty());
    assert!(result.files.is_empty());
    assert!(result.tail.is_none());
    assert_eq!(result.stop_reason, ReadStopReason::EndOfData);
}

#[test]
fn test_relative_directory_is_rejected() {
    let config = LogConfig::for_testing("relative/txlog");
    let result = RecoveryReplayer::new(&generator()).replay(&config);
    assert!(matches!(result, Err(ReplayError::Configuration(_))));
}

#[test]
fn test_torn_end_of_log_keeps_prepares() {
    let dir = TempDir::new().unwrap();
    let config = LogConfig::for_testing(dir.path());
    let gen = generator();
    let (a, b) = two_prepares(&config, &gen);

    truncate(&config.file_path(1), 3 * BLOCK + 100);

    let result = replay(&config, &gen);
    assert!(result.in_doubt.contains_key(&a));
    assert!(result.in_doubt.contains_key(&b));
    assert!(!result.stats.clean_shutdown);
    assert_eq!(
        result.stop_reason,
        ReadStopReason::PartialBlock {
            file: 1,
            offset: 3 * BLOCK
        }
    );
    let tail = result.tail.unwrap();
    assert_eq!(tail.valid_end, 3 * BLOCK);
    assert_eq!(tail.bytes_to_truncate(), 100);
}

#[test]
fn test_corrupt_block_hides_everything_after_it() {
    let dir = TempDir::new().unwrap();
    let config = LogConfig::for_testing(dir.path());
    let gen = generator();
    let (a, b) = two_prepares(&config, &gen);

    flip_byte(&config.file_path(1), 2 * BLOCK + 40);

    let result = replay(&config, &gen);
    assert!(result.in_doubt.contains_key(&a));
    assert!(!result.in_doubt.contains_key(&b));
    assert!(matches!(
        result.stop_reason,
        ReadStopReason::CorruptBlock { file: 1, offset, .. } if offset == 2 * BLOCK
    ));
}

#[test]
fn test_reopened_writer_completes_recovered_transaction() {
    let dir = TempDir::new().unwrap();
    let config = LogConfig::for_testing(dir.path());
    let gen = generator();
    let (a, b) = two_prepares(&config, &gen);

    // Crash while forcing the end-of-log block.
    truncate(&config.file_path(1), 3 * BLOCK + 10);

    let restarted = XidGenerator::with_start(b"recovery-tests", 8).unwrap();
    {
        let (writer, recovered) = TransactionLogWriter::open(config.clone(), &restarted).unwrap();
        assert_eq!(recovered.in_doubt.len(), 2);
        assert_eq!(writer.unresolved_count(), 2);

        let pair = &recovered.in_doubt[&a];
        writer.commit(pair.xid(), pair.mark()).unwrap();
        assert_eq!(writer.unresolved_count(), 1);
        writer.close().unwrap();
    }

    let result = replay(&config, &restarted);
    assert_eq!(result.in_doubt.keys().collect::<Vec<_>>(), vec![&b]);
    assert!(result.is_clean());
    assert!(result.stats.clean_shutdown);
}

#[test]
fn test_recovery_across_rotated_files() {
    let dir = TempDir::new().unwrap();
    let config = LogConfig::for_testing(dir.path());
    let gen = generator();

    let mut expected = Vec::new();
    {
        let (writer, _) = TransactionLogWriter::open(config.clone(), &gen).unwrap();
        let prepared: Vec<_> = (0..20)
            .map(|i| {
                let xid = gen.create_transaction_id();
                let names = [format!("rm-{}", i)];
                let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
                let mark = writer.prepare(&xid, &branches(&gen, &xid, &refs)).unwrap();
                (xid, mark)
            })
            .collect();
        for (i, (xid, mark)) in prepared.into_iter().enumerate() {
            if i == 3 || i == 17 {
                expected.push(xid);
            } else {
                writer.commit(&xid, mark).unwrap();
            }
        }
        assert!(writer.stats().files_rotated >= 2);
        writer.close().unwrap();
    }

    let result = replay(&config, &gen);
    assert_eq!(result.in_doubt.len(), 2);
    let ordered: Vec<&Xid> = result
        .in_doubt_in_log_order()
        .into_iter()
        .map(|p| p.xid())
        .collect();
    assert_eq!(ordered, expected.iter().collect::<Vec<_>>());
    assert_eq!(result.stats.files_read, 3);
    assert!(result.is_clean());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Cutting the log anywhere keeps exactly the prepares whose block
    /// survived in full.
    #[test]
    fn prop_truncated_log_keeps_complete_blocks(cut in BLOCK..=4 * BLOCK) {
        let dir = TempDir::new().unwrap();
        let config = LogConfig::for_testing(dir.path());
        let gen = generator();
        let (a, b) = two_prepares(&config, &gen);

        truncate(&config.file_path(1), cut);

        let result = replay(&config, &gen);
        prop_assert_eq!(result.in_doubt.contains_key(&a), cut >= 2 * BLOCK);
        prop_assert_eq!(result.in_doubt.contains_key(&b), cut >= 3 * BLOCK);
        prop_assert_eq!(result.stats.clean_shutdown, cut == 4 * BLOCK);
        prop_assert_eq!(result.is_clean(), cut % BLOCK == 0);
    }
}

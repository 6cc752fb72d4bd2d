//! # Index Scale Tests
//!
//! Pushes enough keys through the B+ tree to force leaf splits, root lifts
//! and multi-leaf range scans, through both the raw tree API and the SQL
//! surface.

use std::sync::Arc;

use larkdb::btree::{BPlusTree, MAX_KEY};
use larkdb::config::DEFAULT_MEM;
use larkdb::dm::DataManager;
use larkdb::tm::TransactionManager;
use larkdb::Database;
use tempfile::tempdir;

#[test]
fn thousands_of_keys_stay_sorted_and_complete() {
    let dir = tempdir().unwrap();
    let prefix = dir.path().join("db");
    let tm = Arc::new(TransactionManager::create(&prefix).unwrap());
    let dm = Arc::new(DataManager::create(&prefix, DEFAULT_MEM, tm.clone()).unwrap());
    let boot = BPlusTree::create(&dm).unwrap();
    let tree = BPlusTree::load(boot, dm.clone()).unwrap();

    // Interleaved insert order, 4000 keys: several levels of splits.
    for key in (0..4000u64).step_by(2) {
        tree.insert(key, key + 1).unwrap();
    }
    for key in (1..4000u64).step_by(2) {
        tree.insert(key, key + 1).unwrap();
    }

    let all = tree.search_range(0, MAX_KEY).unwrap();
    assert_eq!(all.len(), 4000);
    assert_eq!(all, (1..=4000u64).collect::<Vec<_>>(), "leaf chain is in key order");

    let window = tree.search_range(1500, 1999).unwrap();
    assert_eq!(window, (1501..=2000u64).collect::<Vec<_>>());

    assert_eq!(tree.search(3999).unwrap(), vec![4000]);
    assert!(tree.search_range(4000, MAX_KEY - 1).unwrap().is_empty());

    tree.close().unwrap();
    dm.close().unwrap();
    tm.close().unwrap();
}

#[test]
fn duplicate_heavy_workload() {
    let dir = tempdir().unwrap();
    let prefix = dir.path().join("db");
    let tm = Arc::new(TransactionManager::create(&prefix).unwrap());
    let dm = Arc::new(DataManager::create(&prefix, DEFAULT_MEM, tm.clone()).unwrap());
    let boot = BPlusTree::create(&dm).unwrap();
    let tree = BPlusTree::load(boot, dm.clone()).unwrap();

    // 100 distinct keys, 20 values each.
    for round in 0..20u64 {
        for key in 0..100u64 {
            tree.insert(key, key * 1000 + round).unwrap();
        }
    }

    for key in [0u64, 37, 99] {
        let mut values = tree.search(key).unwrap();
        values.sort_unstable();
        let expected: Vec<u64> = (0..20u64).map(|round| key * 1000 + round).collect();
        assert_eq!(values, expected);
    }

    assert_eq!(tree.search_range(0, MAX_KEY).unwrap().len(), 2000);

    tree.close().unwrap();
    dm.close().unwrap();
    tm.close().unwrap();
}

#[test]
fn sql_range_scan_over_many_rows() {
    let dir = tempdir().unwrap();
    let db = Database::create(&dir.path().join("db")).unwrap();
    let mut session = db.session();

    session
        .execute("create table nums (n int32, negated int32) (n)")
        .unwrap();

    session.execute("begin").unwrap();
    for n in 0..300 {
        session
            .execute(&format!("insert into nums values {} {}", n, -n))
            .unwrap();
    }
    session.execute("commit").unwrap();

    let out = session
        .execute("select negated from nums where n > 249 and n < 260")
        .unwrap();
    let mut rows: Vec<i32> = out
        .lines()
        .map(|line| line.trim_matches(|c| c == '[' || c == ']').parse().unwrap())
        .collect();
    rows.sort_unstable();
    assert_eq!(rows, (-259..=-250).collect::<Vec<_>>());

    let all = session.execute("select n from nums").unwrap();
    assert_eq!(all.lines().count(), 300);

    drop(session);
    db.close().unwrap();
}

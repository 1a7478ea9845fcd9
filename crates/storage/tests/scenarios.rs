//! Concrete scenarios S1-S6 (`spec.md` §8), named after their spec ids.

use std::sync::{Arc, Barrier};
use std::thread;

use composite_core::IndexId;
use composite_storage::config::TableConfig;
use composite_storage::testing::KeyedRowSchema;
use composite_storage::CompositeTable;

#[test]
fn s1_insert_and_scan_both_directions() {
    let dir = tempfile::tempdir().unwrap();
    let table = CompositeTable::create(
        dir.path(),
        Arc::new(KeyedRowSchema::without_index()),
        TableConfig::default(),
    )
    .unwrap();

    let ids: Vec<i64> = ["a", "b", "c"]
        .iter()
        .map(|r| table.insert_row(r.as_bytes()).unwrap().get())
        .collect();
    assert_eq!(ids, vec![0, 1, 2]);

    let forward: Vec<Vec<u8>> = table.iter_forward().map(|(_, r)| r).collect();
    assert_eq!(forward, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

    let backward: Vec<Vec<u8>> = table.iter_backward().map(|(_, r)| r).collect();
    assert_eq!(backward, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
}

#[test]
fn s2_duplicate_unique_key_rejected_state_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let table = CompositeTable::create(
        dir.path(),
        Arc::new(KeyedRowSchema::with_unique_key()),
        TableConfig::default(),
    )
    .unwrap();

    table.insert_row(b"x:1").unwrap();
    let err = table.insert_row(b"x:2").unwrap_err();
    assert!(matches!(err, composite_core::Error::DuplicateKey { .. }));
    assert_eq!(table.num_data_rows(), 1);
}

#[test]
fn s3_rollover_at_threshold_then_more_inserts() {
    let dir = tempfile::tempdir().unwrap();
    let config = TableConfig {
        max_writable_rows: 512,
        max_writable_bytes: u64::MAX,
        max_compaction_batch: 8,
    };
    let table = CompositeTable::create(dir.path(), Arc::new(KeyedRowSchema::without_index()), config).unwrap();

    let mut expected = Vec::new();
    for i in 0..1500 {
        let row = format!("row-{i}").into_bytes();
        table.insert_row(&row).unwrap();
        expected.push(row);
    }

    assert!(table.segment_count() >= 2);
    assert_eq!(table.num_data_rows(), 1500);
    for (i, row) in expected.iter().enumerate() {
        let mut out = Vec::new();
        table.get_value(composite_core::RowId(i as i64), &mut out).unwrap();
        assert_eq!(&out, row);
    }
}

#[test]
fn s4_compact_writable_into_readonly_preserves_rows() {
    let dir = tempfile::tempdir().unwrap();
    let config = TableConfig {
        max_writable_rows: 100,
        max_writable_bytes: u64::MAX,
        max_compaction_batch: 8,
    };
    let table = CompositeTable::create(dir.path(), Arc::new(KeyedRowSchema::without_index()), config).unwrap();

    let mut ids = Vec::new();
    let mut rows = Vec::new();
    for i in 0..100 {
        let row = format!("row-{i}").into_bytes();
        ids.push(table.insert_row(&row).unwrap());
        rows.push(row);
    }
    // force rollover so segment A is frozen
    table.insert_row(b"trigger").unwrap();
    assert!(table.compact().unwrap());

    for (id, row) in ids.iter().zip(rows.iter()) {
        let mut out = Vec::new();
        table.get_value(*id, &mut out).unwrap();
        assert_eq!(&out, row);
    }
}

#[test]
fn s5_concurrent_inserts_from_two_threads_stay_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let table = CompositeTable::create(
        dir.path(),
        Arc::new(KeyedRowSchema::with_unique_key()),
        TableConfig::for_testing(),
    )
    .unwrap();

    let per_thread = 2_000;
    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for t in 0..2 {
        let table = Arc::clone(&table);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            let mut ids = Vec::with_capacity(per_thread);
            for i in 0..per_thread {
                let row = format!("t{t}-{i}:{t}-{i}").into_bytes();
                ids.push(table.insert_row(&row).unwrap());
            }
            ids
        }));
    }

    let mut all_ids = Vec::new();
    for h in handles {
        all_ids.extend(h.join().unwrap());
    }

    assert_eq!(table.num_data_rows(), per_thread * 2);
    let mut sorted = all_ids.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted.len(), all_ids.len(), "all returned ids must be distinct");

    for id in &all_ids {
        let mut out = Vec::new();
        table.get_value(*id, &mut out).unwrap();
        let key_end = out.iter().position(|&b| b == b':').unwrap();
        let key = &out[..key_end];
        let hits = table.find_by_index(IndexId(0), key);
        assert_eq!(hits, vec![*id]);
    }
}

#[test]
fn s6_open_iterator_is_unaffected_by_later_inserts_and_refcount_resets() {
    let dir = tempfile::tempdir().unwrap();
    let table = CompositeTable::create(
        dir.path(),
        Arc::new(KeyedRowSchema::without_index()),
        TableConfig::default(),
    )
    .unwrap();

    for i in 0..5 {
        table.insert_row(format!("row-{i}").as_bytes()).unwrap();
    }

    let before_refcount = table.scanning_ref_count();
    let iter = table.iter_forward();
    assert_eq!(table.scanning_ref_count(), before_refcount + 1);

    for i in 5..15 {
        table.insert_row(format!("row-{i}").as_bytes()).unwrap();
    }

    let seen: Vec<_> = iter.collect();
    assert_eq!(seen.len(), 5);
    assert_eq!(table.scanning_ref_count(), before_refcount);
}

//! Invariant 8: save/load round-trip.
//!
//! For any segment S, `save(p); loadFresh(p)` yields a segment S' such that
//! for all live ids `S.getValue(id) == S'.getValue(id)` and every index's
//! key-set matches.

use std::sync::Arc;

use composite_core::{IndexDecl, IndexId, Schema};
use composite_storage::segment::{ReadonlySegment, WritableSegment};

struct TwoColumnSchema;

impl Schema for TwoColumnSchema {
    fn indices(&self) -> &[IndexDecl] {
        static DECLS: [IndexDecl; 1] = [IndexDecl { id: IndexId(0), unique: false }];
        &DECLS
    }

    fn project(&self, row: &[u8], _index: IndexId) -> Vec<u8> {
        match row.iter().position(|&b| b == b':') {
            Some(pos) => row[..pos].to_vec(),
            None => row.to_vec(),
        }
    }
}

#[test]
fn writable_segment_round_trips_values_and_indices() {
    let dir = tempfile::tempdir().unwrap();
    let schema = TwoColumnSchema;
    let seg = WritableSegment::create(dir.path(), &schema).unwrap();
    let ids: Vec<_> = ["a:1", "b:2", "a:3"]
        .iter()
        .map(|row| seg.insert(row.as_bytes(), &schema).unwrap())
        .collect();
    seg.flush().unwrap();

    let reopened = WritableSegment::open(dir.path()).unwrap();
    for id in &ids {
        let mut a = Vec::new();
        let mut b = Vec::new();
        seg.get_value(*id, &mut a).unwrap();
        reopened.get_value(*id, &mut b).unwrap();
        assert_eq!(a, b);
    }

    let mut before = seg.index_search_exact(IndexId(0), b"a");
    let mut after = reopened.index_search_exact(IndexId(0), b"a");
    before.sort();
    after.sort();
    assert_eq!(before, after);
}

#[test]
fn readonly_segment_round_trips_through_build_and_open() {
    let dir = tempfile::tempdir().unwrap();
    let schema = TwoColumnSchema;
    let rows: Vec<Vec<u8>> = vec![b"a:1".to_vec(), b"b:2".to_vec(), b"a:3".to_vec()];

    let value_store: Arc<dyn composite_storage::store::ReadableStore> =
        Arc::new(composite_storage::store::frozen::FrozenValueStore::from_rows(rows.clone()));
    let mut indices = std::collections::HashMap::new();
    let pairs: Vec<(Vec<u8>, composite_core::SubId)> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| (schema.project(row, IndexId(0)), composite_core::SubId(i as u32)))
        .collect();
    indices.insert(
        IndexId(0),
        Arc::new(composite_storage::store::btree_index::BTreeIndexStore::from_pairs(pairs))
            as Arc<dyn composite_storage::store::ReadableStore>,
    );

    let built = ReadonlySegment::build(
        dir.path(),
        value_store,
        indices,
        &[(IndexId(0), "col0".to_string(), false)],
        "values.rovec",
    )
    .unwrap();

    let reopened = ReadonlySegment::open(dir.path()).unwrap();
    for i in 0..rows.len() {
        let sub = composite_core::SubId(i as u32);
        let mut a = Vec::new();
        let mut b = Vec::new();
        built.get_value(sub, &mut a).unwrap();
        reopened.get_value(sub, &mut b).unwrap();
        assert_eq!(a, b);
    }

    let mut before = built.index_search_exact(IndexId(0), b"a");
    let mut after = reopened.index_search_exact(IndexId(0), b"a");
    before.sort();
    after.sort();
    assert_eq!(before, after);
}

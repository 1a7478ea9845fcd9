//! Online compaction (`spec.md` §4.6.7)
//!
//! Turns a contiguous run of frozen writable segments into one readonly
//! segment: live rows are streamed into a [`FrozenValueStore`] and a fresh
//! [`BTreeIndexStore`] per declared index off the write lock, then the
//! catalogue is swapped in a single critical section, re-validated against
//! concurrent changes via `Arc::ptr_eq`.
//!
//! Candidate selection here is restricted to contiguous runs of frozen
//! writable segments; `spec.md` §4.6.7 also allows folding in runs of small
//! readonly segments, which this implementation does not attempt (see
//! `DESIGN.md`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use composite_core::{IndexId, Result, SubId};

use crate::segment::{ReadonlySegment, Segment};
use crate::store::btree_index::BTreeIndexStore;
use crate::store::frozen::FrozenValueStore;
use crate::table::{self, CompositeTable};

/// Find the first contiguous run of frozen writable segments, capped at
/// `max_compaction_batch`. A run of one is still worth compacting — it
/// drops tombstones and converts the segment to the immutable readonly
/// representation. Never selects the live (unfrozen) segment.
fn select_candidates(segments: &[Segment], max_batch: usize) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < segments.len() {
        if matches!(&segments[i], Segment::Writable(w) if w.frozen()) {
            let mut j = i + 1;
            while j < segments.len()
                && j - i < max_batch
                && matches!(&segments[j], Segment::Writable(w) if w.frozen())
            {
                j += 1;
            }
            return Some((i, j));
        }
        i += 1;
    }
    None
}

/// Stream the live rows of `segments[beg..end]` into a new readonly
/// segment under `dir`, rebuilding every declared index from scratch.
fn build_compacted_segment(
    table: &CompositeTable,
    segments: &[Segment],
    beg: usize,
    end: usize,
    dir: &std::path::Path,
) -> Result<(ReadonlySegment, i64)> {
    let schema = table.schema();
    let mut rows = Vec::new();
    let mut index_pairs: std::collections::HashMap<IndexId, Vec<(Vec<u8>, SubId)>> =
        std::collections::HashMap::new();
    for decl in schema.indices() {
        index_pairs.insert(decl.id, Vec::new());
    }

    for seg in &segments[beg..end] {
        let local_rows = seg.num_data_rows();
        for local in 0..local_rows {
            let sub = SubId(local as u32);
            if seg.is_deleted(sub) {
                continue;
            }
            let mut row = Vec::new();
            seg.get_value(sub, &mut row)?;
            let new_sub = SubId(rows.len() as u32);
            for decl in schema.indices() {
                let key = schema.project(&row, decl.id);
                index_pairs.get_mut(&decl.id).unwrap().push((key, new_sub));
            }
            rows.push(row);
        }
    }

    let row_count = rows.len() as i64;
    let value_store: Arc<dyn crate::store::ReadableStore> = Arc::new(FrozenValueStore::from_rows(rows));
    let mut indices: std::collections::HashMap<IndexId, Arc<dyn crate::store::ReadableStore>> =
        std::collections::HashMap::new();
    let mut index_meta = Vec::new();
    for decl in schema.indices() {
        let pairs = index_pairs.remove(&decl.id).unwrap_or_default();
        let store: Arc<dyn crate::store::ReadableStore> = Arc::new(BTreeIndexStore::from_pairs(pairs));
        indices.insert(decl.id, store);
        index_meta.push((decl.id, format!("idx{}", decl.id.0), decl.unique));
    }

    let segment = ReadonlySegment::build(dir, value_store, indices, &index_meta, "values.rovec")?;
    Ok((segment, row_count))
}

/// Run one compaction pass, if a candidate run currently exists. Returns
/// `true` if a swap happened. The caller (`CompositeTable::compact`) holds
/// `compaction_lock` for the duration, so only one build/swap is ever in
/// flight for a given table.
pub fn run_once(table: &CompositeTable) -> Result<bool> {
    let max_batch = table.max_compaction_batch();
    let candidate = table.with_read(|segments, _row_num_vec| {
        select_candidates(segments, max_batch).map(|(b, e)| (b, e, segments[b..e].to_vec()))
    });
    let (beg, end, snapshot) = match candidate {
        Some(c) => c,
        None => return Ok(false),
    };

    // Peek the next rd ordinal without holding the lock across the build.
    let next_ordinal = table.with_write(|_segments, _row_num_vec, next_rd_ordinal| {
        let ord = *next_rd_ordinal;
        *next_rd_ordinal += 1;
        ord
    });

    let seg_dir = table.dir().join(format!("rd-{:04}", next_ordinal));
    let (compacted, row_count) = build_compacted_segment(table, &snapshot, 0, snapshot.len(), &seg_dir)?;

    let swapped = table.with_write(|segments, row_num_vec, _next_rd_ordinal| {
        if !table::still_matches(segments, beg, end, &snapshot) {
            return false;
        }
        segments.splice(beg..end, [Segment::Readonly(Arc::new(compacted))]);
        let mut rebuilt = Vec::with_capacity(segments.len() + 1);
        rebuilt.push(0i64);
        let mut acc = 0i64;
        for (i, seg) in segments.iter().enumerate() {
            acc += if i == beg { row_count } else { seg.num_data_rows() as i64 };
            rebuilt.push(acc);
        }
        *row_num_vec = rebuilt;
        true
    });

    if swapped {
        tracing::info!(beg, end, rows = row_count, "compacted segment run");
        table.refresh_readonly_data_mem_size();
        table.save_manifest_locked()?;
        table.schedule_segment_deletion(snapshot.iter().map(|seg| seg.dir().to_path_buf()).collect());
    } else {
        tracing::debug!("compaction candidate stale, dropping built segment");
        let _ = std::fs::remove_dir_all(&seg_dir);
    }
    Ok(swapped)
}

/// Background compaction loop, mirroring a TTL-sweep pattern: sleep, then
/// run one pass, until told to stop.
pub struct CompactionWorker {
    table: Arc<CompositeTable>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl CompactionWorker {
    /// Build a worker that compacts `table` on `interval`, once started.
    pub fn new(table: Arc<CompositeTable>, interval: Duration) -> Self {
        CompactionWorker {
            table,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the background thread. The returned handle completes once
    /// `shutdown` is called.
    pub fn start(&self) -> JoinHandle<()> {
        let table = Arc::clone(&self.table);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        thread::spawn(move || {
            let tick = Duration::from_millis(50).min(interval);
            while !shutdown.load(Ordering::Relaxed) {
                let mut elapsed = Duration::ZERO;
                while elapsed < interval {
                    if shutdown.load(Ordering::Relaxed) {
                        return;
                    }
                    thread::sleep(tick);
                    elapsed += tick;
                }
                match table.compact() {
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "compaction pass failed"),
                }
            }
        })
    }

    /// Signal the background thread to stop on its next wakeup.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// `true` once `shutdown` has been called.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

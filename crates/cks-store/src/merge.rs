//! Span trim and merge primitives used by the write engine.
//!
//! Pure functions over ordered span lists keyed by byte offset. Input spans
//! come from one clone-chain resolution and therefore never overlap; the
//! functions preserve that invariant.

use cks_file::{ChunkFile, FileObjects, ObjectInfo};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One span tagged with its source file (`None` = zero-fill source).
pub struct FileSpan<F: ChunkFile> {
    pub file: Option<Arc<F>>,
    pub obj: ObjectInfo<F::Snap>,
}

/// A merged, file-spanning contiguous byte range fetched as one unit before
/// a copy-on-write materialization.
pub struct OffsetInfo<F: ChunkFile> {
    pub offset: u64,
    pub length: u64,
    pub objs: Vec<FileSpan<F>>,
}

/// Trim every span in `groups` to exclude `[window_off, window_off + window_len)`,
/// splitting spans that straddle the window into a before-piece and an
/// after-piece. Returns the number of bytes retained across all groups —
/// the gap bytes a backfill must fetch around the caller's own payload.
pub fn exclude_write_window<F: ChunkFile>(
    groups: &mut [FileObjects<F>],
    window_off: u64,
    window_len: u64,
) -> u64 {
    let w0 = window_off;
    let w1 = window_off + window_len;
    let mut retained = 0u64;
    for group in groups.iter_mut() {
        let old = std::mem::take(&mut group.objs);
        let mut kept = Vec::with_capacity(old.len() + 1);
        for obj in old {
            let (s0, s1) = (obj.offset, obj.end());
            if s0 < w0 {
                let head_end = s1.min(w0);
                retained += head_end - s0;
                kept.push(ObjectInfo {
                    offset: s0,
                    length: head_end - s0,
                    sn: obj.sn,
                    snap: obj.snap.clone(),
                });
            }
            if s1 > w1 {
                let tail_start = s0.max(w1);
                retained += s1 - tail_start;
                kept.push(ObjectInfo {
                    offset: tail_start,
                    length: s1 - tail_start,
                    sn: obj.sn,
                    snap: obj.snap,
                });
            }
        }
        group.objs = kept;
    }
    retained
}

/// Merge every span not served by `own` into minimal contiguous groups keyed
/// by starting offset. A span extends an existing group when byte-adjacent
/// to it, and two groups that become adjacent through a single insertion are
/// fused.
#[must_use]
pub fn merge_source_spans<F: ChunkFile>(
    groups: &[FileObjects<F>],
    own: &Arc<F>,
) -> BTreeMap<u64, OffsetInfo<F>> {
    let mut map: BTreeMap<u64, OffsetInfo<F>> = BTreeMap::new();
    for group in groups {
        if group.is_from(own) {
            continue;
        }
        for obj in &group.objs {
            insert_span(
                &mut map,
                FileSpan {
                    file: group.file.clone(),
                    obj: obj.clone(),
                },
            );
        }
    }
    map
}

fn insert_span<F: ChunkFile>(map: &mut BTreeMap<u64, OffsetInfo<F>>, span: FileSpan<F>) {
    let s0 = span.obj.offset;
    let s1 = span.obj.end();

    // Extend the predecessor group when the span is adjacent on its right.
    let pred_key = map
        .range(..=s0)
        .next_back()
        .filter(|(_, g)| g.offset + g.length == s0)
        .map(|(k, _)| *k);
    if let Some(pk) = pred_key {
        let succ_adjacent = map.contains_key(&s1);
        let pred = map.get_mut(&pk).expect("predecessor key just observed");
        pred.length += span.obj.length;
        pred.objs.push(span);
        if succ_adjacent {
            // The insertion bridged two groups; fuse the successor in.
            let succ = map.remove(&s1).expect("successor key just observed");
            let pred = map.get_mut(&pk).expect("predecessor key just observed");
            pred.length += succ.length;
            pred.objs.extend(succ.objs);
        }
        return;
    }

    // Absorb the successor group when the span is adjacent on its left.
    if map.contains_key(&s1) {
        let succ = map.remove(&s1).expect("successor key just observed");
        let mut objs = vec![span];
        let length = (s1 - s0) + succ.length;
        objs.extend(succ.objs);
        map.insert(
            s0,
            OffsetInfo {
                offset: s0,
                length,
                objs,
            },
        );
        return;
    }

    map.insert(
        s0,
        OffsetInfo {
            offset: s0,
            length: s1 - s0,
            objs: vec![span],
        },
    );
}

//! Clone-chain resolution.
//!
//! Partitions a page range into `(source file, spans)` groups by walking the
//! ancestor chain: each candidate file divides the still-unresolved ranges by
//! its own written bitmap, whatever remains climbs one generation toward the
//! root. The remainder past the root is zero-filled.

use crate::cache::{CloneCache, MetaCache};
use cks_error::{CsError, Result};
use cks_file::{ChunkFile, FileObjects, ObjectInfo};
use cks_types::{BitRange, CloneContext, CloneInfo, CloneNo, PageSize, SequenceNum};
use std::sync::Arc;
use tracing::trace;

/// Parent lookup by linear scan: the entry immediately preceding the match.
///
/// An unmatched clone number yields the last entry (the nearest recorded
/// ancestor), not an error; an empty chain yields the root. The chain walk
/// depends on these exact semantics.
pub(crate) fn parent_clone(clones: &[CloneInfo], clone_no: CloneNo) -> CloneInfo {
    let Some(first) = clones.first() else {
        return CloneInfo {
            clone_no: CloneNo::ROOT,
            clone_sn: SequenceNum::INVALID,
        };
    };
    let mut prev = *first;
    for entry in clones {
        if entry.clone_no == clone_no {
            return prev;
        }
        prev = *entry;
    }
    prev
}

/// Climb from `cur_no` until a cached ancestor file is found or the root is
/// reached. Updates `cur_no`/`cur_sn` to the generation and read version of
/// whatever was found (`cur_no` becomes root when nothing was).
///
/// A parent equal to the queried generation means the chain names no
/// ancestor below it; the walk terminates at the root with that entry's
/// `clone_sn`, which is what bounds the walk on degenerate chains.
fn climb<F: ChunkFile>(
    clones_cache: &CloneCache<F>,
    ctx: &CloneContext,
    cur_no: &mut CloneNo,
    cur_sn: &mut SequenceNum,
) -> Option<Arc<F>> {
    loop {
        let parent = parent_clone(&ctx.clones, *cur_no);
        *cur_sn = parent.clone_sn;
        if parent.clone_no.is_root() || parent.clone_no == *cur_no {
            *cur_no = CloneNo::ROOT;
            return None;
        }
        *cur_no = parent.clone_no;
        if let Some(file) = clones_cache.get(ctx.root_id, *cur_no) {
            return Some(file);
        }
    }
}

/// Resolve `range` into an ordered list of `(source file, spans)` groups
/// that exactly partitions it: no gaps, no overlaps.
pub(crate) fn resolve_range<F: ChunkFile>(
    meta: &MetaCache<F>,
    clones_cache: &CloneCache<F>,
    page: PageSize,
    sn: SequenceNum,
    range: BitRange,
    ctx: &CloneContext,
) -> Result<Vec<FileObjects<F>>> {
    let mut out = Vec::new();
    let mut ranges = vec![range];

    if !ctx.is_clone() {
        // No clone chain: the chunk's own bitmap resolves everything.
        finish_at_root(meta.get(ctx.root_id), sn, &ranges, page, &mut out)?;
        return Ok(out);
    }

    let root_file = meta.get(ctx.root_id);
    let mut cur_no = ctx.clone_no;
    let mut cur_sn = sn;
    let mut file = clones_cache.get(ctx.root_id, cur_no);
    if file.is_none() {
        file = climb(clones_cache, ctx, &mut cur_no, &mut cur_sn);
    }

    while let Some(candidate) = file {
        let mut unresolved = Vec::new();
        let mut group = FileObjects::new(Some(Arc::clone(&candidate)));
        let finished =
            candidate.divide_obj_info_by_index(cur_sn, &ranges, &mut unresolved, &mut group.objs);
        trace!(
            clone_no = cur_no.get(),
            sn = cur_sn.get(),
            served = group.objs.len(),
            unresolved = unresolved.len(),
            "clone chain divide"
        );
        if !group.objs.is_empty() {
            out.push(group);
        }
        if finished {
            return Ok(out);
        }
        ranges = unresolved;
        file = climb(clones_cache, ctx, &mut cur_no, &mut cur_sn);
    }

    finish_at_root(root_file, cur_sn, &ranges, page, &mut out)?;
    Ok(out)
}

/// Byte-range front-end: convert `[offset, offset + length)` to page indices
/// and resolve.
pub(crate) fn split_into_objects<F: ChunkFile>(
    meta: &MetaCache<F>,
    clones_cache: &CloneCache<F>,
    page: PageSize,
    sn: SequenceNum,
    offset: u64,
    length: u64,
    ctx: &CloneContext,
) -> Result<Vec<FileObjects<F>>> {
    if length == 0 {
        return Err(CsError::InvalidArg("zero-length range".into()));
    }
    let range = BitRange::new(page.page_index(offset), page.page_index(offset + length - 1));
    resolve_range(meta, clones_cache, page, sn, range, ctx)
}

fn finish_at_root<F: ChunkFile>(
    root: Option<Arc<F>>,
    sn: SequenceNum,
    ranges: &[BitRange],
    page: PageSize,
    out: &mut Vec<FileObjects<F>>,
) -> Result<()> {
    match root {
        Some(root) => {
            let mut unresolved = Vec::new();
            let mut group = FileObjects::new(Some(Arc::clone(&root)));
            let finished =
                root.divide_obj_info_by_index(sn, ranges, &mut unresolved, &mut group.objs);
            if !group.objs.is_empty() {
                out.push(group);
            }
            if !finished {
                return Err(CsError::Internal(
                    "root chunk file left ranges unresolved".into(),
                ));
            }
            Ok(())
        }
        None => {
            // Nothing anywhere in the chain: the remainder reads as zeros.
            let mut group = FileObjects::new(None);
            group
                .objs
                .extend(ranges.iter().map(|r| ObjectInfo::from_bit_range(*r, page)));
            out.push(group);
            Ok(())
        }
    }
}

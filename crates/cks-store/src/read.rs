//! Resolving spans to actual bytes.

use cks_error::Result;
use cks_file::{ChunkFile, FileObjects, ObjectInfo};
use std::sync::Arc;

/// Fill `buf` with the bytes `obj` describes. `buf.len()` must equal
/// `obj.length`. A missing source file means the span exists nowhere in the
/// chain: it reads as zeros and always succeeds.
pub(crate) fn read_by_object_info<F: ChunkFile>(
    file: Option<&Arc<F>>,
    buf: &mut [u8],
    obj: &ObjectInfo<F::Snap>,
) -> Result<()> {
    debug_assert_eq!(buf.len() as u64, obj.length);
    let Some(file) = file else {
        buf.fill(0);
        return Ok(());
    };
    match (&obj.snap, obj.sn) {
        (None, sn) if sn.is_invalid() => file.read(buf, obj.offset),
        (None, sn) => file.read_specified_chunk(sn, buf, obj.offset),
        (Some(snap), sn) => file.read_specified_snap(sn, snap, buf, obj.offset),
    }
}

/// Execute a resolved plan into `dst`, which covers
/// `[req_offset, req_offset + dst.len())`.
///
/// Spans are clamped to that window before the copy, so the page-aligned
/// spans a resolution produces cannot index outside an unaligned caller
/// buffer. The first failing read aborts the whole plan; bytes already
/// copied stay as they are.
#[expect(
    clippy::cast_possible_truncation,
    reason = "clamped span offsets are bounded by dst.len(), which is a usize"
)]
pub(crate) fn read_plan_into<F: ChunkFile>(
    groups: &[FileObjects<F>],
    dst: &mut [u8],
    req_offset: u64,
) -> Result<()> {
    let req_end = req_offset + dst.len() as u64;
    for group in groups {
        for obj in &group.objs {
            let start = obj.offset.max(req_offset);
            let end = obj.end().min(req_end);
            if start >= end {
                continue;
            }
            let clamped = ObjectInfo {
                offset: start,
                length: end - start,
                sn: obj.sn,
                snap: obj.snap.clone(),
            };
            let lo = (start - req_offset) as usize;
            let hi = (end - req_offset) as usize;
            read_by_object_info(group.file.as_ref(), &mut dst[lo..hi], &clamped)?;
        }
    }
    Ok(())
}

//! Chunk and snapshot file naming.
//!
//! `chunk_<id>` for a chunk's data file, `chunk_<id>_snap_<sn>` for one of
//! its snapshot files. Initialization classifies directory entries with
//! [`parse_file_name`]; anything else in the store directory is ignored.

use cks_types::{ChunkId, SequenceNum};

const CHUNK_PREFIX: &str = "chunk_";
const SNAP_INFIX: &str = "_snap_";

/// Classification of one store-directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Chunk(ChunkId),
    Snapshot(ChunkId, SequenceNum),
    Unknown,
}

#[must_use]
pub fn chunk_file_name(id: ChunkId) -> String {
    format!("{CHUNK_PREFIX}{id}")
}

#[must_use]
pub fn snapshot_file_name(id: ChunkId, sn: SequenceNum) -> String {
    format!("{CHUNK_PREFIX}{id}{SNAP_INFIX}{sn}")
}

#[must_use]
pub fn parse_file_name(name: &str) -> FileKind {
    let Some(rest) = name.strip_prefix(CHUNK_PREFIX) else {
        return FileKind::Unknown;
    };
    match rest.split_once(SNAP_INFIX) {
        Some((id, sn)) => match (id.parse::<u64>(), sn.parse::<u64>()) {
            (Ok(id), Ok(sn)) => FileKind::Snapshot(ChunkId(id), SequenceNum(sn)),
            _ => FileKind::Unknown,
        },
        None => rest
            .parse::<u64>()
            .map_or(FileKind::Unknown, |id| FileKind::Chunk(ChunkId(id))),
    }
}

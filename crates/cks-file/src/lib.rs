#![forbid(unsafe_code)]
//! Seams to the collaborators the ChunkStore engine consumes but does not
//! own: the physical per-chunk file, the factory that creates/opens such
//! files (standing in for the preallocated file pool), and the local
//! filesystem wrapper used to discover files at startup.
//!
//! The engine is generic over these traits; production wires in the real
//! file layer, tests wire in fakes. All trait methods take `&self` — a chunk
//! file is shared as `Arc<F>` across caches and callers, and implementations
//! use interior mutability for their own state. Operations addressed to the
//! same chunk are serialized by the caller (upstream log-apply ordering), not
//! by this layer.

use cks_error::Result;
use cks_types::{BitRange, ChunkId, ChunkInfo, CloneNo, PageSize, SequenceNum, SnapContext};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One contiguous byte span and where its bytes come from.
///
/// The source is interpreted against the owning file of the group the span
/// belongs to:
///
/// - `snap == None && sn == 0` — read the file's live data;
/// - `snap == None && sn != 0` — read the file's data as of historical `sn`;
/// - `snap == Some(_)` — read from that specific snapshot object;
/// - no owning file at all — the span is not present anywhere, read zeros.
#[derive(Debug)]
pub struct ObjectInfo<S> {
    pub offset: u64,
    pub length: u64,
    pub sn: SequenceNum,
    pub snap: Option<Arc<S>>,
}

impl<S> ObjectInfo<S> {
    /// Span reading live data at `offset`.
    #[must_use]
    pub fn live(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length,
            sn: SequenceNum::INVALID,
            snap: None,
        }
    }

    /// Span covering `range`, reading live data (or zeros when the group has
    /// no owning file).
    #[must_use]
    pub fn from_bit_range(range: BitRange, page: PageSize) -> Self {
        Self::live(range.byte_offset(page), range.byte_len(page))
    }

    /// One past the last byte covered.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

// Manual impl: `Arc<S>` clones regardless of `S: Clone`, and a derive would
// demand the stronger bound.
impl<S> Clone for ObjectInfo<S> {
    fn clone(&self) -> Self {
        Self {
            offset: self.offset,
            length: self.length,
            sn: self.sn,
            snap: self.snap.clone(),
        }
    }
}

/// A source file plus the ordered spans it supplies for one query.
///
/// `file == None` marks spans resolved nowhere in the chain: the read engine
/// zero-fills them. The span list is mutable on purpose — the write engine
/// trims and splits spans in place.
pub struct FileObjects<F: ChunkFile> {
    pub file: Option<Arc<F>>,
    pub objs: Vec<ObjectInfo<F::Snap>>,
}

impl<F: ChunkFile> FileObjects<F> {
    #[must_use]
    pub fn new(file: Option<Arc<F>>) -> Self {
        Self {
            file,
            objs: Vec::new(),
        }
    }

    /// Whether this group's source is the given file (pointer identity).
    #[must_use]
    pub fn is_from(&self, other: &Arc<F>) -> bool {
        self.file.as_ref().is_some_and(|f| Arc::ptr_eq(f, other))
    }
}

/// Construction parameters handed to the factory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkOptions {
    pub id: ChunkId,
    pub base_dir: PathBuf,
    /// Initial sequence number; zero when loading an existing file.
    pub sn: SequenceNum,
    pub corrected_sn: SequenceNum,
    pub clone_no: CloneNo,
    pub root_id: ChunkId,
    /// Clone-source provenance recorded at creation, if any.
    pub location: Option<String>,
    pub chunk_size: u32,
    pub page_size: u32,
    /// Open the data file with O_DSYNC-style synchronous writes.
    pub sync_on_open: bool,
}

/// Per-chunk primitives consumed by the engine.
///
/// Implementations own the on-disk representation: data file, written-page
/// bitmap, snapshot chain, and the snapshot-on-write policy applied inside
/// [`ChunkFile::write`]. The engine never sees bytes on disk directly.
pub trait ChunkFile: Send + Sync {
    /// Snapshot object handle produced by bitmap division and consumed by
    /// [`ChunkFile::read_specified_snap`].
    type Snap: Send + Sync;

    /// Read live data; fills all of `buf` starting at `offset`.
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<()>;

    /// Versioned write at `sn`. Applies the file's own snapshot-on-write
    /// policy against `ctx` before the bytes land.
    fn write(&self, sn: SequenceNum, buf: &[u8], offset: u64, ctx: &SnapContext) -> Result<()>;

    /// Read the chunk's data as of historical sequence `sn` (not necessarily
    /// a snapshot — may be the file's own older generation).
    fn read_specified_chunk(&self, sn: SequenceNum, buf: &mut [u8], offset: u64) -> Result<()>;

    /// Read from a specific snapshot object.
    fn read_specified_snap(
        &self,
        sn: SequenceNum,
        snap: &Arc<Self::Snap>,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<()>;

    /// Divide `ranges` by this file's written bitmap as of `sn`: spans the
    /// file can serve are appended to `objs`, pages it cannot serve are
    /// appended to `unresolved`. Returns `true` when nothing was left
    /// unresolved. A non-clone file serves every page (unwritten pages read
    /// as zeros) and therefore always finishes.
    fn divide_obj_info_by_index(
        &self,
        sn: SequenceNum,
        ranges: &[BitRange],
        unresolved: &mut Vec<BitRange>,
        objs: &mut Vec<ObjectInfo<Self::Snap>>,
    ) -> bool;

    /// Whether a write at `sn` must first preserve the pre-write content
    /// into a snapshot.
    fn need_cow(&self, sn: SequenceNum, ctx: &SnapContext) -> bool;

    /// Raw write bypassing the snapshot policy; returns bytes written.
    /// Used only to materialize ancestor data locally.
    fn write_data_direct(&self, buf: &[u8], offset: u64) -> Result<usize>;

    /// Delete the chunk file's on-disk state.
    fn delete(&self, sn: SequenceNum) -> Result<()>;

    /// Delete one snapshot, or correct the recorded base sequence when no
    /// snapshot object exists for `snap_sn`.
    fn delete_snapshot(&self, snap_sn: SequenceNum, ctx: &SnapContext) -> Result<()>;

    /// Load an on-disk snapshot file discovered at startup.
    fn load_snapshot(&self, sn: SequenceNum) -> Result<()>;

    /// Copy externally recovered data into unwritten pages only.
    fn paste(&self, buf: &[u8], offset: u64) -> Result<()>;

    fn info(&self) -> ChunkInfo;

    /// Hash of the byte range, encoded as a decimal string.
    fn hash(&self, offset: u64, length: u64) -> Result<String>;

    /// Flush dirty pages to stable storage.
    fn sync(&self) -> Result<()>;

    /// Clone generation number; zero for a non-clone chunk.
    fn clone_no(&self) -> CloneNo;
}

/// Creates and opens chunk files. Stands in for the preallocated-file pool:
/// `create` may hand back a recycled pre-formatted file.
pub trait ChunkFileFactory: Send + Sync {
    type File: ChunkFile;

    /// Create the on-disk file and return its handle.
    fn create(&self, opts: &ChunkOptions) -> Result<Arc<Self::File>>;

    /// Open an existing on-disk file.
    fn open(&self, opts: &ChunkOptions) -> Result<Arc<Self::File>>;
}

/// Local filesystem wrapper used by store initialization.
pub trait LocalFs: Send + Sync {
    fn dir_exists(&self, path: &Path) -> Result<bool>;
    fn mkdir(&self, path: &Path) -> Result<()>;
    /// Names of the directory's entries (not full paths).
    fn list_dir(&self, path: &Path) -> Result<Vec<String>>;
    fn file_exists(&self, path: &Path) -> Result<bool>;
}

/// [`LocalFs`] over `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdLocalFs;

impl LocalFs for StdLocalFs {
    fn dir_exists(&self, path: &Path) -> Result<bool> {
        Ok(path.is_dir())
    }

    fn mkdir(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)?;
        Ok(())
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort_unstable();
        Ok(names)
    }

    fn file_exists(&self, path: &Path) -> Result<bool> {
        Ok(path.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn std_local_fs_lists_created_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let fs = StdLocalFs;
        let sub = dir.path().join("store");
        assert!(!fs.dir_exists(&sub).unwrap());
        fs.mkdir(&sub).unwrap();
        assert!(fs.dir_exists(&sub).unwrap());

        std::fs::write(sub.join("chunk_1"), b"x").unwrap();
        std::fs::write(sub.join("chunk_2"), b"y").unwrap();
        assert_eq!(fs.list_dir(&sub).unwrap(), vec!["chunk_1", "chunk_2"]);
        assert!(fs.file_exists(&sub.join("chunk_1")).unwrap());
        assert!(!fs.file_exists(&sub.join("chunk_3")).unwrap());
    }

    #[test]
    fn object_info_span_math() {
        let page = PageSize::new(4096).unwrap();
        let obj: ObjectInfo<()> = ObjectInfo::from_bit_range(BitRange::new(2, 3), page);
        assert_eq!(obj.offset, 8192);
        assert_eq!(obj.length, 8192);
        assert_eq!(obj.end(), 16384);
        assert!(obj.snap.is_none());
        assert!(obj.sn.is_invalid());
    }
}

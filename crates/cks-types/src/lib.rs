#![forbid(unsafe_code)]
//! Value types shared across the ChunkStore data path.
//!
//! Identifiers and version stamps are unit-carrying newtypes so that chunk
//! ids, clone generation numbers, and sequence numbers cannot be mixed up at
//! call sites. Geometry types ([`PageSize`], [`ObjectSize`]) are validated at
//! construction; everything downstream can shift without re-checking.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Validation error for geometry types.
///
/// `cks-types` must not depend on `cks-error` (the error crate stays
/// independent of domain types); the store converts this into its own
/// invalid-argument variant at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("invalid {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

/// Stable identifier of a chunk within one local store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct ChunkId(pub u64);

impl ChunkId {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic version stamp of a chunk.
///
/// Zero is reserved: it means "no snapshot" in snapshot positions and is
/// rejected as a write version.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SequenceNum(pub u64);

impl SequenceNum {
    /// The reserved "no version" sentinel.
    pub const INVALID: Self = Self(0);

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn is_invalid(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SequenceNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Clone generation number. Zero means "not a clone" (the root itself).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct CloneNo(pub u64);

impl CloneNo {
    /// The root generation.
    pub const ROOT: Self = Self(0);

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn is_root(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for CloneNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validated page size (power of two in 512..=65536).
///
/// The page is the unit of plain I/O alignment and of the per-chunk written
/// bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSize(u32);

impl PageSize {
    pub fn new(value: u32) -> Result<Self, GeometryError> {
        if !value.is_power_of_two() || !(512..=65536).contains(&value) {
            return Err(GeometryError::InvalidField {
                field: "page_size",
                reason: "must be a power of two in 512..=65536",
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Bits to shift to convert between bytes and page indices.
    #[must_use]
    pub fn shift(self) -> u32 {
        self.0.trailing_zeros()
    }

    /// Page index holding `byte_offset`.
    #[must_use]
    pub fn page_index(self, byte_offset: u64) -> u32 {
        // Chunk-local offsets are far below 2^44, so the index fits.
        #[expect(clippy::cast_possible_truncation)]
        let idx = (byte_offset >> u64::from(self.shift())) as u32;
        idx
    }

    /// Byte offset of the first byte of page `index`.
    #[must_use]
    pub fn page_start(self, index: u32) -> u64 {
        u64::from(index) << u64::from(self.shift())
    }
}

/// Validated object size: the clone bitmap/backfill granularity.
///
/// A power of two and a multiple of the page size; clone-chunk writes are
/// rounded outward to whole objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSize(u32);

impl ObjectSize {
    pub fn new(value: u32, page: PageSize) -> Result<Self, GeometryError> {
        if !value.is_power_of_two() {
            return Err(GeometryError::InvalidField {
                field: "object_size",
                reason: "must be a power of two",
            });
        }
        if value < page.get() || value % page.get() != 0 {
            return Err(GeometryError::InvalidField {
                field: "object_size",
                reason: "must be a multiple of the page size",
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn shift(self) -> u32 {
        self.0.trailing_zeros()
    }
}

/// Inclusive `[begin, end]` page-index range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitRange {
    pub begin: u32,
    pub end: u32,
}

impl BitRange {
    #[must_use]
    pub fn new(begin: u32, end: u32) -> Self {
        debug_assert!(begin <= end, "BitRange begin must not exceed end");
        Self { begin, end }
    }

    /// Number of pages covered.
    #[must_use]
    pub fn pages(self) -> u32 {
        self.end - self.begin + 1
    }

    /// Byte offset of the range start for the given page geometry.
    #[must_use]
    pub fn byte_offset(self, page: PageSize) -> u64 {
        page.page_start(self.begin)
    }

    /// Byte length of the range for the given page geometry.
    #[must_use]
    pub fn byte_len(self, page: PageSize) -> u64 {
        u64::from(self.pages()) << u64::from(page.shift())
    }
}

/// One ancestor generation of a clone chain: which clone number produced it
/// and the sequence number at which that generation is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneInfo {
    pub clone_no: CloneNo,
    pub clone_sn: SequenceNum,
}

/// Per-request view of a clone ancestor chain.
///
/// `clones` is ordered from the root toward the current generation: the entry
/// immediately preceding the one matching a queried clone number is that
/// clone's parent, and a `clone_no` of zero anywhere terminates the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneContext {
    pub root_id: ChunkId,
    pub clone_no: CloneNo,
    pub clones: Vec<CloneInfo>,
}

impl CloneContext {
    /// Context for a chunk that is not a clone.
    #[must_use]
    pub fn plain(id: ChunkId) -> Self {
        Self {
            root_id: id,
            clone_no: CloneNo::ROOT,
            clones: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_clone(&self) -> bool {
        !self.clone_no.is_root()
    }
}

/// Ordered view of a chunk's existing snapshot sequence numbers.
///
/// Ascending, without duplicates. Queries return [`SequenceNum::INVALID`]
/// when no matching snapshot exists, mirroring the on-wire convention that
/// zero means "no snapshot".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapContext {
    snaps: Vec<SequenceNum>,
}

impl SnapContext {
    #[must_use]
    pub fn new(mut snaps: Vec<SequenceNum>) -> Self {
        snaps.sort_unstable();
        snaps.dedup();
        Self { snaps }
    }

    /// Greatest existing snapshot sn strictly less than `sn`.
    #[must_use]
    pub fn prev(&self, sn: SequenceNum) -> SequenceNum {
        let mut found = SequenceNum::INVALID;
        for &s in &self.snaps {
            if s >= sn {
                break;
            }
            found = s;
        }
        found
    }

    /// Least existing snapshot sn strictly greater than `sn`.
    #[must_use]
    pub fn next(&self, sn: SequenceNum) -> SequenceNum {
        self.snaps
            .iter()
            .copied()
            .find(|&s| s > sn)
            .unwrap_or(SequenceNum::INVALID)
    }

    /// Greatest existing snapshot sn.
    #[must_use]
    pub fn latest(&self) -> SequenceNum {
        self.snaps.last().copied().unwrap_or(SequenceNum::INVALID)
    }

    #[must_use]
    pub fn contains(&self, sn: SequenceNum) -> bool {
        self.snaps.binary_search(&sn).is_ok()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snaps.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[SequenceNum] {
        &self.snaps
    }
}

/// Per-chunk metadata snapshot returned by info queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub id: ChunkId,
    pub chunk_size: u32,
    pub page_size: u32,
    pub cur_sn: SequenceNum,
    pub snap_sn: SequenceNum,
    pub corrected_sn: SequenceNum,
    pub clone_no: CloneNo,
    pub location: Option<String>,
}

/// Process-wide store counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStoreStatus {
    pub chunk_file_count: u64,
    pub snapshot_count: u64,
    pub clone_chunk_count: u64,
}

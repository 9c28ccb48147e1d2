#![forbid(unsafe_code)]
//! Error types for ChunkStore.
//!
//! Every public store operation returns [`Result`]; results propagate, they
//! are never thrown. RPC surfaces ship a single numeric result code per
//! operation, so each variant maps to exactly one code via
//! [`CsError::code`]. The mapping is exhaustive (no wildcard arm): adding a
//! variant is a compile error until its code is assigned.
//!
//! | Variant | Code | Meaning |
//! |---------|------|---------|
//! | (success) | 0 | operation completed |
//! | `Internal` | 1 | short write / unexpected I/O size, walker contract breach |
//! | `ChunkNotExist` | 2 | target chunk absent where existence is required |
//! | `Crc` | 3 | checksum mismatch surfaced by the file layer |
//! | `InvalidArg` | 4 | zero sequence number, oversized location, bad geometry |
//! | `SnapshotExist` | 5 | delete blocked by a live snapshot |
//! | `SnapshotNotExist` | 6 | requested snapshot sn not in the snap context |
//! | `ChunkConflict` | 7 | create-clone arguments mismatch an existing chunk |
//! | `NoSpace` | 8 | underlying storage out of space |
//! | `Io` | 9 | other operating-system I/O failure |
//!
//! `cks-error` must not depend on `cks-types`; conversions from type-layer
//! validation errors happen in `cks-store` at its boundary.

use thiserror::Error;

/// Unified result type for store operations.
pub type Result<T> = std::result::Result<T, CsError>;

/// Unified error type for all ChunkStore operations.
///
/// Pass-through conditions from the underlying chunk-file abstraction (disk
/// failure, CRC mismatch, no space) reuse the `Io`/`Crc`/`NoSpace` variants
/// so the store surfaces them without translation.
#[derive(Debug, Error)]
pub enum CsError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Target chunk does not exist.
    #[error("chunk not exist")]
    ChunkNotExist,

    /// Requested snapshot sequence is not part of the snapshot chain.
    #[error("snapshot not exist: sn {sn}")]
    SnapshotNotExist { sn: u64 },

    /// Chunk deletion refused while a snapshot still exists.
    #[error("snapshot still exists for chunk {chunk}")]
    SnapshotExist { chunk: u64 },

    /// Create-clone arguments conflict with an already existing chunk.
    #[error("conflicting chunk already exists: {detail}")]
    ChunkConflict { detail: String },

    /// Invalid caller-supplied argument.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// Checksum mismatch reported by the file layer.
    #[error("crc check failed")]
    Crc,

    /// Underlying storage out of space.
    #[error("no space left on store")]
    NoSpace,

    /// Short write or another broken internal contract.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CsError {
    /// Stable numeric result code for RPC surfaces.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            CsError::Internal(_) => 1,
            CsError::ChunkNotExist => 2,
            CsError::Crc => 3,
            CsError::InvalidArg(_) => 4,
            CsError::SnapshotExist { .. } => 5,
            CsError::SnapshotNotExist { .. } => 6,
            CsError::ChunkConflict { .. } => 7,
            CsError::NoSpace => 8,
            CsError::Io(_) => 9,
        }
    }
}

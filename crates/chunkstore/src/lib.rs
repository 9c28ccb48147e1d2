#![forbid(unsafe_code)]
//! ChunkStore public API facade.
//!
//! Re-exports the store engine and its seam traits through one crate, the
//! one downstream consumers (RPC services, tooling) depend on.

pub use cks_error::{CsError, Result};
pub use cks_file::{
    ChunkFile, ChunkFileFactory, ChunkOptions, FileObjects, LocalFs, ObjectInfo, StdLocalFs,
};
pub use cks_store::{CloneCache, DataStore, DataStoreConfig, MetaCache, StoreMetrics, naming};
pub use cks_types::{
    BitRange, ChunkId, ChunkInfo, CloneContext, CloneInfo, CloneNo, DataStoreStatus, ObjectSize,
    PageSize, SequenceNum, SnapContext,
};

//! Process-wide store counters.

use cks_types::DataStoreStatus;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters surfaced by `DataStore::status`.
///
/// Maintained by the store on create/load/delete; snapshot counts track what
/// the store itself observes (snapshots loaded at startup, snapshots removed
/// through `delete_snapshot_chunk`).
#[derive(Debug, Default)]
pub struct StoreMetrics {
    chunk_files: AtomicU64,
    snapshots: AtomicU64,
    clone_chunks: AtomicU64,
}

impl StoreMetrics {
    pub fn inc_chunk_files(&self) {
        self.chunk_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_chunk_files(&self) {
        saturating_dec(&self.chunk_files);
    }

    pub fn inc_snapshots(&self) {
        self.snapshots.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_snapshots(&self) {
        saturating_dec(&self.snapshots);
    }

    pub fn inc_clone_chunks(&self) {
        self.clone_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_clone_chunks(&self) {
        saturating_dec(&self.clone_chunks);
    }

    pub fn reset(&self) {
        self.chunk_files.store(0, Ordering::Relaxed);
        self.snapshots.store(0, Ordering::Relaxed);
        self.clone_chunks.store(0, Ordering::Relaxed);
    }

    #[must_use]
    pub fn status(&self) -> DataStoreStatus {
        DataStoreStatus {
            chunk_file_count: self.chunk_files.load(Ordering::Relaxed),
            snapshot_count: self.snapshots.load(Ordering::Relaxed),
            clone_chunk_count: self.clone_chunks.load(Ordering::Relaxed),
        }
    }
}

fn saturating_dec(counter: &AtomicU64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
}

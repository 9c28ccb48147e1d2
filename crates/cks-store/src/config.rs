//! Store configuration.

use cks_error::{CsError, Result};
use cks_types::{ObjectSize, PageSize};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration of one data store instance.
///
/// Sizes are raw here so the struct deserializes from plain config files;
/// [`DataStoreConfig::layout`] validates them once at store construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStoreConfig {
    /// Directory holding chunk and snapshot files.
    pub base_dir: PathBuf,
    /// Fixed size of every chunk, bytes.
    pub chunk_size: u32,
    /// I/O alignment and bitmap granularity, bytes.
    pub page_size: u32,
    /// Clone backfill granularity, bytes. A multiple of `page_size`.
    pub object_size: u32,
    /// Longest accepted clone-source location string.
    pub location_limit: usize,
    /// Open chunk files with synchronous writes.
    pub sync_on_open: bool,
}

impl Default for DataStoreConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            chunk_size: 16 * 1024 * 1024,
            page_size: 4096,
            object_size: 64 * 1024,
            location_limit: 3000,
            sync_on_open: false,
        }
    }
}

impl DataStoreConfig {
    /// Validate the geometry and return the typed page/object sizes.
    pub fn layout(&self) -> Result<(PageSize, ObjectSize)> {
        let page =
            PageSize::new(self.page_size).map_err(|err| CsError::InvalidArg(err.to_string()))?;
        let object = ObjectSize::new(self.object_size, page)
            .map_err(|err| CsError::InvalidArg(err.to_string()))?;
        if self.chunk_size == 0 || self.chunk_size % self.object_size != 0 {
            return Err(CsError::InvalidArg(
                "chunk_size must be a non-zero multiple of object_size".into(),
            ));
        }
        Ok((page, object))
    }
}

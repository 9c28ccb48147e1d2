//! The store facade: lifecycle, chunk I/O, and the copy-on-write write
//! engine for clone chunks.

use crate::cache::{CloneCache, MetaCache};
use crate::config::DataStoreConfig;
use crate::merge;
use crate::metrics::StoreMetrics;
use crate::naming::{self, FileKind};
use crate::read;
use crate::walker;
use cks_error::{CsError, Result};
use cks_file::{ChunkFile, ChunkFileFactory, ChunkOptions, LocalFs};
use cks_types::{
    ChunkId, ChunkInfo, CloneContext, DataStoreStatus, ObjectSize, PageSize, SequenceNum,
    SnapContext,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, trace, warn};

/// The data-path engine of one chunk server.
///
/// Generic over the filesystem wrapper and the chunk-file factory; both are
/// owned fields with explicit lifecycle, constructed once per store. Public
/// operations are synchronous and blocking; operations on different chunk
/// ids may run fully in parallel, while operations on the same chunk id must
/// be serialized by the caller.
pub struct DataStore<Fs, B>
where
    Fs: LocalFs,
    B: ChunkFileFactory,
{
    config: DataStoreConfig,
    page: PageSize,
    object: ObjectSize,
    fs: Fs,
    factory: B,
    meta: MetaCache<B::File>,
    clones: CloneCache<B::File>,
    metrics: StoreMetrics,
}

impl<Fs, B> DataStore<Fs, B>
where
    Fs: LocalFs,
    B: ChunkFileFactory,
{
    /// Validate the configured geometry and build an empty store.
    /// [`DataStore::initialize`] loads what is on disk.
    pub fn new(config: DataStoreConfig, fs: Fs, factory: B) -> Result<Self> {
        let (page, object) = config.layout()?;
        Ok(Self {
            config,
            page,
            object,
            fs,
            factory,
            meta: MetaCache::new(),
            clones: CloneCache::new(),
            metrics: StoreMetrics::default(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &DataStoreConfig {
        &self.config
    }

    /// Ensure the base directory exists and load every chunk and snapshot
    /// file found in it. Reinitialization rebuilds the caches from scratch.
    /// Any load failure aborts initialization.
    pub fn initialize(&self) -> Result<()> {
        let base = self.config.base_dir.clone();
        if !self.fs.dir_exists(&base)? {
            self.fs.mkdir(&base)?;
        }
        let files = self.fs.list_dir(&base)?;

        self.meta.clear();
        self.clones.clear();
        self.metrics.reset();

        for name in &files {
            match naming::parse_file_name(name) {
                FileKind::Chunk(id) => {
                    self.load_chunk_file(id).map_err(|err| {
                        error!(file = %name, "load chunk file failed");
                        err
                    })?;
                }
                FileKind::Snapshot(id, snap_sn) => {
                    let chunk_path = base.join(naming::chunk_file_name(id));
                    if !self.fs.file_exists(&chunk_path)? {
                        warn!(file = %name, "snapshot without its chunk file, skipped");
                        continue;
                    }
                    self.load_chunk_file(id).map_err(|err| {
                        error!(file = %name, "load chunk file failed");
                        err
                    })?;
                    let file = self
                        .meta
                        .get(id)
                        .ok_or_else(|| CsError::Internal("loaded chunk vanished".into()))?;
                    file.load_snapshot(snap_sn).map_err(|err| {
                        error!(file = %name, "load snapshot failed");
                        err
                    })?;
                    self.metrics.inc_snapshots();
                }
                FileKind::Unknown => {
                    warn!(file = %name, "unknown file in store directory");
                }
            }
        }
        info!(chunks = self.meta.len(), "data store initialized");
        Ok(())
    }

    // ── Read path ───────────────────────────────────────────────────────────

    /// Read live chunk data. The chunk must exist.
    pub fn read_chunk(&self, id: ChunkId, sn: SequenceNum, buf: &mut [u8], offset: u64) -> Result<()> {
        let Some(file) = self.meta.get(id) else {
            return Err(CsError::ChunkNotExist);
        };
        file.read(buf, offset).map_err(|err| {
            warn!(chunk = id.get(), sn = sn.get(), "read chunk file failed");
            err
        })
    }

    /// Clone-aware read: resolves every sub-range through the ancestor chain
    /// and reads each span from the file that actually holds it. Falls back
    /// to [`DataStore::read_chunk`] when the context carries no clone chain.
    pub fn read_clone_chunk(
        &self,
        id: ChunkId,
        sn: SequenceNum,
        buf: &mut [u8],
        offset: u64,
        clone_ctx: &CloneContext,
    ) -> Result<()> {
        if !clone_ctx.is_clone() {
            return self.read_chunk(id, sn, buf, offset);
        }
        let groups = walker::split_into_objects(
            &self.meta,
            &self.clones,
            self.page,
            sn,
            offset,
            buf.len() as u64,
            clone_ctx,
        )?;
        read::read_plan_into(&groups, buf, offset).map_err(|err| {
            warn!(chunk = id.get(), sn = sn.get(), "clone chunk read failed");
            err
        })
    }

    /// Read a chunk's historical data as of snapshot `sn`.
    pub fn read_snapshot_chunk(
        &self,
        id: ChunkId,
        sn: SequenceNum,
        buf: &mut [u8],
        offset: u64,
        ctx: &SnapContext,
    ) -> Result<()> {
        let Some(file) = self.meta.get(id) else {
            return Err(CsError::ChunkNotExist);
        };
        if !ctx.contains(sn) {
            return Err(CsError::SnapshotNotExist { sn: sn.get() });
        }
        file.read_specified_chunk(sn, buf, offset).map_err(|err| {
            warn!(chunk = id.get(), sn = sn.get(), "read snapshot chunk failed");
            err
        })
    }

    /// Clone-aware snapshot read.
    pub fn read_clone_snapshot_chunk(
        &self,
        id: ChunkId,
        sn: SequenceNum,
        buf: &mut [u8],
        offset: u64,
        ctx: &SnapContext,
        clone_ctx: &CloneContext,
    ) -> Result<()> {
        if !ctx.contains(sn) {
            return Err(CsError::SnapshotNotExist { sn: sn.get() });
        }
        let Some(file) = self.meta.get(id) else {
            return Err(CsError::ChunkNotExist);
        };
        if !clone_ctx.is_clone() {
            return file.read_specified_chunk(sn, buf, offset).map_err(|err| {
                warn!(chunk = id.get(), sn = sn.get(), "read snapshot chunk failed");
                err
            });
        }
        let groups = walker::split_into_objects(
            &self.meta,
            &self.clones,
            self.page,
            sn,
            offset,
            buf.len() as u64,
            clone_ctx,
        )?;
        read::read_plan_into(&groups, buf, offset).map_err(|err| {
            warn!(chunk = id.get(), sn = sn.get(), "clone snapshot read failed");
            err
        })
    }

    // ── Write path ──────────────────────────────────────────────────────────

    /// Versioned write to a non-clone chunk, creating it if absent.
    pub fn write_chunk(
        &self,
        id: ChunkId,
        sn: SequenceNum,
        buf: &[u8],
        offset: u64,
        ctx: &SnapContext,
    ) -> Result<()> {
        self.write_plain(id, sn, buf, offset, ctx, None)
    }

    /// Creation-time variant recording clone-source provenance. The location
    /// does not participate in copy-on-write decisions.
    pub fn write_chunk_with_location(
        &self,
        id: ChunkId,
        sn: SequenceNum,
        buf: &[u8],
        offset: u64,
        ctx: &SnapContext,
        location: &str,
    ) -> Result<()> {
        self.write_plain(id, sn, buf, offset, ctx, Some(location))
    }

    fn write_plain(
        &self,
        id: ChunkId,
        sn: SequenceNum,
        buf: &[u8],
        offset: u64,
        ctx: &SnapContext,
        location: Option<&str>,
    ) -> Result<()> {
        // Zero is the "snapshot does not exist" sentinel and never a valid
        // write version.
        if sn.is_invalid() {
            error!(chunk = id.get(), "sequence number must not be zero");
            return Err(CsError::InvalidArg("sequence number must not be zero".into()));
        }
        let file = match self.meta.get(id) {
            Some(file) => file,
            None => {
                let mut opts = self.chunk_options(id);
                opts.sn = sn;
                opts.location = location.map(str::to_owned);
                self.create_chunk_file(&opts)?
            }
        };
        file.write(sn, buf, offset, ctx).map_err(|err| {
            warn!(chunk = id.get(), sn = sn.get(), "write chunk file failed");
            err
        })
    }

    /// Clone-aware versioned write.
    ///
    /// Resolves the object-aligned range around the caller's window through
    /// the ancestor chain, then picks one of three paths: direct write when
    /// the range is already fully materialized locally, gap backfill plus
    /// one aligned write when no snapshot must be preserved, or full
    /// copy-on-write materialization of the ancestor pre-image before the
    /// versioned write.
    pub fn write_clone_chunk(
        &self,
        id: ChunkId,
        sn: SequenceNum,
        buf: &[u8],
        offset: u64,
        ctx: &SnapContext,
        clone_ctx: &CloneContext,
    ) -> Result<()> {
        if sn.is_invalid() {
            error!(chunk = id.get(), "sequence number must not be zero");
            return Err(CsError::InvalidArg("sequence number must not be zero".into()));
        }
        if buf.is_empty() {
            return Err(CsError::InvalidArg("write length must not be zero".into()));
        }
        let file = match self.meta.get(id) {
            Some(file) => file,
            None => {
                let mut opts = self.chunk_options(id);
                opts.sn = sn;
                opts.clone_no = clone_ctx.clone_no;
                opts.root_id = clone_ctx.root_id;
                self.create_chunk_file(&opts)?
            }
        };
        if !clone_ctx.is_clone() {
            return file.write(sn, buf, offset, ctx).map_err(|err| {
                warn!(chunk = id.get(), sn = sn.get(), "write chunk file failed");
                err
            });
        }

        // Round the window outward to whole objects and resolve all of it.
        let obj_shift = self.object.shift();
        let len = buf.len() as u64;
        let begin_obj = offset >> obj_shift;
        let end_obj = (offset + len - 1) >> obj_shift;
        let aligned_off = begin_obj << obj_shift;
        let aligned_len = (end_obj - begin_obj + 1) << obj_shift;
        let mut groups = walker::split_into_objects(
            &self.meta,
            &self.clones,
            self.page,
            sn,
            aligned_off,
            aligned_len,
            clone_ctx,
        )?;

        if groups.len() == 1 && groups[0].is_from(&file) {
            // Already fully materialized locally.
            return file.write(sn, buf, offset, ctx).map_err(|err| {
                warn!(chunk = id.get(), sn = sn.get(), "write chunk file failed");
                err
            });
        }
        if file.clone_no().is_root() {
            return Err(CsError::Internal(
                "clone-context write against a non-clone chunk file".into(),
            ));
        }

        if file.need_cow(sn, ctx) {
            self.materialize_pre_image(id, &file, &groups)?;
        } else if aligned_len != len {
            return self.backfill_and_write(id, sn, buf, offset, ctx, &file, &mut groups, aligned_off, aligned_len);
        }
        file.write(sn, buf, offset, ctx).map_err(|err| {
            warn!(chunk = id.get(), sn = sn.get(), "write chunk file failed");
            err
        })
    }

    /// No snapshot to preserve, but the caller's window only partially
    /// covers the aligned object range: fetch every byte outside the window
    /// from wherever it lives and land the whole range in one versioned
    /// write, so writes always happen at object granularity.
    #[expect(
        clippy::too_many_arguments,
        reason = "private continuation of write_clone_chunk, split for readability"
    )]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "object-aligned offsets are chunk-local and fit usize"
    )]
    fn backfill_and_write(
        &self,
        id: ChunkId,
        sn: SequenceNum,
        buf: &[u8],
        offset: u64,
        ctx: &SnapContext,
        file: &Arc<B::File>,
        groups: &mut [cks_file::FileObjects<B::File>],
        aligned_off: u64,
        aligned_len: u64,
    ) -> Result<()> {
        let gap = merge::exclude_write_window(groups, offset, buf.len() as u64);
        trace!(
            chunk = id.get(),
            sn = sn.get(),
            gap,
            aligned_off,
            aligned_len,
            "clone write backfill"
        );
        let mut merged = vec![0u8; aligned_len as usize];
        for group in groups.iter() {
            for obj in &group.objs {
                let lo = (obj.offset - aligned_off) as usize;
                let hi = lo + obj.length as usize;
                read::read_by_object_info(group.file.as_ref(), &mut merged[lo..hi], obj).map_err(
                    |err| {
                        warn!(chunk = id.get(), sn = sn.get(), "backfill read failed");
                        err
                    },
                )?;
            }
        }
        let lo = (offset - aligned_off) as usize;
        merged[lo..lo + buf.len()].copy_from_slice(buf);
        file.write(sn, &merged, aligned_off, ctx).map_err(|err| {
            warn!(chunk = id.get(), sn = sn.get(), "write chunk file failed");
            err
        })
    }

    /// A snapshot boundary requires the pre-image of the whole aligned range:
    /// merge the ancestor-held spans into minimal contiguous groups, fetch
    /// each group, and land it through the snapshot-bypassing direct write.
    /// After this the chunk's own file holds the complete pre-image and the
    /// caller's versioned write snapshots it normally.
    ///
    /// The groups are written one at a time; a failure partway through
    /// leaves some of them materialized and none rolled back.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "merged group lengths are chunk-local and fit usize"
    )]
    fn materialize_pre_image(
        &self,
        id: ChunkId,
        file: &Arc<B::File>,
        groups: &[cks_file::FileObjects<B::File>],
    ) -> Result<()> {
        let object_map = merge::merge_source_spans(groups, file);
        for info in object_map.values() {
            let mut tmp = vec![0u8; info.length as usize];
            for span in &info.objs {
                let lo = (span.obj.offset - info.offset) as usize;
                let hi = lo + span.obj.length as usize;
                read::read_by_object_info(span.file.as_ref(), &mut tmp[lo..hi], &span.obj)
                    .map_err(|err| {
                        warn!(chunk = id.get(), "pre-image read failed");
                        err
                    })?;
            }
            let written = file.write_data_direct(&tmp, info.offset)?;
            if written as u64 != info.length {
                return Err(CsError::Internal(format!(
                    "short direct write: {written} of {} bytes",
                    info.length
                )));
            }
            trace!(
                chunk = id.get(),
                offset = info.offset,
                length = info.length,
                "materialized ancestor pre-image"
            );
        }
        Ok(())
    }

    // ── Lifecycle and accessors ─────────────────────────────────────────────

    /// Delete a chunk and drop it from both caches. Refused while any
    /// snapshot still exists.
    pub fn delete_chunk(&self, id: ChunkId, sn: SequenceNum, ctx: &SnapContext) -> Result<()> {
        if !ctx.is_empty() {
            warn!(chunk = id.get(), "delete chunk refused: snapshot exists");
            return Err(CsError::SnapshotExist { chunk: id.get() });
        }
        if let Some(file) = self.meta.get(id) {
            file.delete(sn).map_err(|err| {
                warn!(chunk = id.get(), "delete chunk file failed");
                err
            })?;
            self.meta.remove(id);
            self.metrics.dec_chunk_files();
            let clone_no = file.clone_no();
            if !clone_no.is_root() {
                self.clones.remove(id, clone_no);
                self.metrics.dec_clone_chunks();
            }
        }
        Ok(())
    }

    /// Delete one snapshot, or correct the chunk's recorded base sequence
    /// when no snapshot object exists for `snap_sn`. Succeeds as a no-op
    /// when the chunk is absent.
    pub fn delete_snapshot_chunk(
        &self,
        id: ChunkId,
        snap_sn: SequenceNum,
        ctx: &SnapContext,
    ) -> Result<()> {
        if let Some(file) = self.meta.get(id) {
            file.delete_snapshot(snap_sn, ctx).map_err(|err| {
                warn!(
                    chunk = id.get(),
                    snap_sn = snap_sn.get(),
                    "delete snapshot chunk or correct sn failed"
                );
                err
            })?;
            if ctx.contains(snap_sn) {
                self.metrics.dec_snapshots();
            }
        }
        Ok(())
    }

    /// Idempotent creation of a clone chunk from a recorded source location.
    /// A second call with identical arguments succeeds; differing arguments
    /// against an existing chunk fail with `ChunkConflict`.
    pub fn create_clone_chunk(
        &self,
        id: ChunkId,
        sn: SequenceNum,
        corrected_sn: SequenceNum,
        size: u32,
        location: &str,
    ) -> Result<()> {
        if size != self.config.chunk_size || sn.is_invalid() || location.is_empty() {
            error!(
                chunk = id.get(),
                sn = sn.get(),
                size,
                location,
                "invalid create clone chunk arguments"
            );
            return Err(CsError::InvalidArg("bad create clone chunk arguments".into()));
        }
        let file = match self.meta.get(id) {
            Some(file) => file,
            None => {
                let mut opts = self.chunk_options(id);
                opts.sn = sn;
                opts.corrected_sn = corrected_sn;
                opts.location = Some(location.to_owned());
                self.create_chunk_file(&opts)?
            }
        };
        // Racing creators may both reach here; judge against whatever chunk
        // actually survived, created or pre-existing.
        let info = file.info();
        if info.location.as_deref() != Some(location)
            || info.cur_sn != sn
            || info.corrected_sn != corrected_sn
        {
            warn!(
                chunk = id.get(),
                sn = sn.get(),
                corrected_sn = corrected_sn.get(),
                chunk_sn = info.cur_sn.get(),
                chunk_corrected_sn = info.corrected_sn.get(),
                "conflicting chunk already exists"
            );
            return Err(CsError::ChunkConflict {
                detail: format!(
                    "chunk {id} exists with sn {}, corrected sn {}, location {:?}",
                    info.cur_sn, info.corrected_sn, info.location
                ),
            });
        }
        Ok(())
    }

    /// Copy recovered data into unwritten pages. The chunk must exist.
    pub fn paste_chunk(&self, id: ChunkId, buf: &[u8], offset: u64) -> Result<()> {
        let Some(file) = self.meta.get(id) else {
            warn!(chunk = id.get(), "paste chunk failed: chunk not exists");
            return Err(CsError::ChunkNotExist);
        };
        file.paste(buf, offset).map_err(|err| {
            warn!(chunk = id.get(), "paste chunk failed");
            err
        })
    }

    /// Flush one chunk's dirty pages. Success when the chunk is absent.
    pub fn sync_chunk(&self, id: ChunkId) -> Result<()> {
        let Some(file) = self.meta.get(id) else {
            warn!(chunk = id.get(), "sync chunk not exist");
            return Ok(());
        };
        file.sync().map_err(|err| {
            warn!(chunk = id.get(), "sync chunk file failed");
            err
        })
    }

    pub fn chunk_info(&self, id: ChunkId) -> Result<ChunkInfo> {
        match self.meta.get(id) {
            Some(file) => Ok(file.info()),
            None => {
                info!(chunk = id.get(), "get chunk info failed: chunk not exists");
                Err(CsError::ChunkNotExist)
            }
        }
    }

    pub fn chunk_hash(&self, id: ChunkId, offset: u64, length: u64) -> Result<String> {
        match self.meta.get(id) {
            Some(file) => file.hash(offset, length),
            None => {
                info!(chunk = id.get(), "get chunk hash failed: chunk not exists");
                Err(CsError::ChunkNotExist)
            }
        }
    }

    /// Process-wide counters. Never fails.
    #[must_use]
    pub fn status(&self) -> DataStoreStatus {
        self.metrics.status()
    }

    /// Point-in-time copy of the chunk registry. Never fails.
    #[must_use]
    pub fn chunk_map(&self) -> HashMap<ChunkId, Arc<B::File>> {
        self.meta.snapshot()
    }

    /// The chunk file backing `id`, if loaded.
    #[must_use]
    pub fn chunk_file(&self, id: ChunkId) -> Option<Arc<B::File>> {
        self.meta.get(id)
    }

    // ── Internals ───────────────────────────────────────────────────────────

    fn chunk_options(&self, id: ChunkId) -> ChunkOptions {
        ChunkOptions {
            id,
            base_dir: self.config.base_dir.clone(),
            sn: SequenceNum::INVALID,
            corrected_sn: SequenceNum::INVALID,
            clone_no: cks_types::CloneNo::ROOT,
            root_id: id,
            location: None,
            chunk_size: self.config.chunk_size,
            page_size: self.config.page_size,
            sync_on_open: self.config.sync_on_open,
        }
    }

    /// Create a chunk file and register it. Under concurrent creation the
    /// first registration wins: the loser's file object is discarded and
    /// every caller gets the surviving instance.
    fn create_chunk_file(&self, opts: &ChunkOptions) -> Result<Arc<B::File>> {
        if let Some(location) = &opts.location {
            if location.len() > self.config.location_limit {
                error!(
                    chunk = opts.id.get(),
                    len = location.len(),
                    limit = self.config.location_limit,
                    "location is too long"
                );
                return Err(CsError::InvalidArg("clone source location too long".into()));
            }
        }
        let created = self.factory.create(opts).map_err(|err| {
            warn!(chunk = opts.id.get(), "create chunk file failed");
            err
        })?;
        let survivor = self.meta.set(opts.id, Arc::clone(&created));
        if Arc::ptr_eq(&survivor, &created) {
            self.metrics.inc_chunk_files();
            if !opts.clone_no.is_root() {
                self.metrics.inc_clone_chunks();
            }
        }
        if !opts.clone_no.is_root() {
            self.clones.set(opts.root_id, opts.clone_no, &survivor);
        }
        Ok(survivor)
    }

    /// Load an on-disk chunk file into the caches if not already present.
    fn load_chunk_file(&self, id: ChunkId) -> Result<()> {
        if self.meta.get(id).is_some() {
            return Ok(());
        }
        let opts = self.chunk_options(id);
        let file = self.factory.open(&opts)?;
        let file = self.meta.set(id, file);
        self.metrics.inc_chunk_files();
        let clone_no = file.clone_no();
        if !clone_no.is_root() {
            // Loaded clones are indexed under their own id; the walker
            // treats a miss as "climb further", so this only costs hops.
            self.clones.set(id, clone_no, &file);
            self.metrics.inc_clone_chunks();
        }
        Ok(())
    }
}

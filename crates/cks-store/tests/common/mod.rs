#![allow(dead_code)]
//! Shared fakes for the end-to-end tests: an in-memory chunk file with a
//! written-page bitmap and snapshot images, a factory over a fake disk, and
//! an in-memory filesystem for initialization scenarios.

use cks_error::{CsError, Result};
use cks_file::{ChunkFile, ChunkFileFactory, ChunkOptions, LocalFs, ObjectInfo};
use cks_store::DataStoreConfig;
use cks_types::{BitRange, ChunkId, ChunkInfo, CloneNo, PageSize, SequenceNum, SnapContext};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub const CHUNK_SIZE: u32 = 256 * 1024;
pub const PAGE_SIZE: u32 = 4096;
pub const OBJECT_SIZE: u32 = 64 * 1024;

/// One preserved snapshot image.
pub struct FakeSnap {
    pub sn: SequenceNum,
    pub data: Vec<u8>,
}

struct FileState {
    data: Vec<u8>,
    written: Vec<bool>,
    cur_sn: SequenceNum,
    corrected_sn: SequenceNum,
    snaps: BTreeMap<u64, Arc<FakeSnap>>,
    loaded_snaps: Vec<u64>,
}

/// In-memory chunk file with pread/pwrite semantics, a per-page written
/// bitmap, and a snapshot-on-write policy driven by an explicit flag.
pub struct FakeChunkFile {
    id: ChunkId,
    page_size: usize,
    clone_no: CloneNo,
    location: Option<String>,
    state: Mutex<FileState>,
    pub reads: Mutex<Vec<(u64, u64)>>,
    pub writes: Mutex<Vec<(u64, u64)>>,
    pub direct_writes: Mutex<Vec<(u64, u64)>>,
    pub sync_calls: AtomicUsize,
    fail_reads: AtomicBool,
    force_cow: AtomicBool,
}

impl FakeChunkFile {
    fn new(
        id: ChunkId,
        chunk_size: usize,
        page_size: usize,
        clone_no: CloneNo,
        location: Option<String>,
        cur_sn: SequenceNum,
        corrected_sn: SequenceNum,
    ) -> Self {
        Self {
            id,
            page_size,
            clone_no,
            location,
            state: Mutex::new(FileState {
                data: vec![0u8; chunk_size],
                written: vec![false; chunk_size / page_size],
                cur_sn,
                corrected_sn,
                snaps: BTreeMap::new(),
                loaded_snaps: Vec::new(),
            }),
            reads: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            direct_writes: Mutex::new(Vec::new()),
            sync_calls: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
            force_cow: AtomicBool::new(false),
        }
    }

    /// Arm the snapshot-on-write trigger for the next versioned write.
    pub fn set_need_cow(&self, value: bool) {
        self.force_cow.store(value, Ordering::SeqCst);
    }

    /// Make every subsequent read fail with an I/O error.
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    /// Bytes currently held, for assertions.
    pub fn data(&self) -> Vec<u8> {
        self.state.lock().data.clone()
    }

    /// Page indices currently marked written.
    pub fn written_pages(&self) -> Vec<u32> {
        let state = self.state.lock();
        state
            .written
            .iter()
            .enumerate()
            .filter(|(_, w)| **w)
            .map(|(i, _)| u32::try_from(i).unwrap())
            .collect()
    }

    /// Snapshot sequence numbers loaded through `load_snapshot`.
    pub fn loaded_snaps(&self) -> Vec<u64> {
        self.state.lock().loaded_snaps.clone()
    }

    pub fn snapshot_image(&self, sn: SequenceNum) -> Option<Arc<FakeSnap>> {
        self.state.lock().snaps.get(&sn.get()).cloned()
    }

    fn mark_written(state: &mut FileState, offset: usize, len: usize, page_size: usize) {
        let first = offset / page_size;
        let last = (offset + len - 1) / page_size;
        for page in first..=last {
            state.written[page] = true;
        }
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CsError::Io(std::io::Error::other("injected read failure")));
        }
        Ok(())
    }
}

impl ChunkFile for FakeChunkFile {
    type Snap = FakeSnap;

    fn read(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        self.check_read()?;
        self.reads.lock().push((offset, buf.len() as u64));
        let state = self.state.lock();
        let offset = usize::try_from(offset).unwrap();
        buf.copy_from_slice(&state.data[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&self, sn: SequenceNum, buf: &[u8], offset: u64, ctx: &SnapContext) -> Result<()> {
        self.writes.lock().push((offset, buf.len() as u64));
        let take_snapshot = self.need_cow(sn, ctx);
        let mut state = self.state.lock();
        if take_snapshot {
            let old_sn = state.cur_sn;
            let image = Arc::new(FakeSnap {
                sn: old_sn,
                data: state.data.clone(),
            });
            state.snaps.insert(old_sn.get(), image);
            self.force_cow.store(false, Ordering::SeqCst);
        }
        let offset = usize::try_from(offset).unwrap();
        state.data[offset..offset + buf.len()].copy_from_slice(buf);
        Self::mark_written(&mut state, offset, buf.len(), self.page_size);
        if sn > state.cur_sn {
            state.cur_sn = sn;
        }
        Ok(())
    }

    fn read_specified_chunk(&self, sn: SequenceNum, buf: &mut [u8], offset: u64) -> Result<()> {
        self.check_read()?;
        self.reads.lock().push((offset, buf.len() as u64));
        let state = self.state.lock();
        let offset = usize::try_from(offset).unwrap();
        // Historical reads resolve to the preserved image when one exists
        // for that version, else to live data.
        match state.snaps.get(&sn.get()) {
            Some(snap) => buf.copy_from_slice(&snap.data[offset..offset + buf.len()]),
            None => buf.copy_from_slice(&state.data[offset..offset + buf.len()]),
        }
        Ok(())
    }

    fn read_specified_snap(
        &self,
        _sn: SequenceNum,
        snap: &Arc<FakeSnap>,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<()> {
        self.check_read()?;
        let offset = usize::try_from(offset).unwrap();
        buf.copy_from_slice(&snap.data[offset..offset + buf.len()]);
        Ok(())
    }

    fn divide_obj_info_by_index(
        &self,
        _sn: SequenceNum,
        ranges: &[BitRange],
        unresolved: &mut Vec<BitRange>,
        objs: &mut Vec<ObjectInfo<FakeSnap>>,
    ) -> bool {
        let state = self.state.lock();
        let page = PageSize::new(u32::try_from(self.page_size).unwrap()).unwrap();
        let serve_all = self.clone_no.is_root();
        let mut finished = true;
        for range in ranges {
            let mut idx = range.begin;
            while idx <= range.end {
                let served = serve_all || state.written[idx as usize];
                let mut end = idx;
                while end < range.end
                    && (serve_all || state.written[(end + 1) as usize]) == served
                {
                    end += 1;
                }
                let run = BitRange::new(idx, end);
                if served {
                    objs.push(ObjectInfo::from_bit_range(run, page));
                } else {
                    finished = false;
                    unresolved.push(run);
                }
                idx = end + 1;
            }
        }
        finished
    }

    fn need_cow(&self, _sn: SequenceNum, _ctx: &SnapContext) -> bool {
        self.force_cow.load(Ordering::SeqCst)
    }

    fn write_data_direct(&self, buf: &[u8], offset: u64) -> Result<usize> {
        self.direct_writes.lock().push((offset, buf.len() as u64));
        let mut state = self.state.lock();
        let offset = usize::try_from(offset).unwrap();
        state.data[offset..offset + buf.len()].copy_from_slice(buf);
        Self::mark_written(&mut state, offset, buf.len(), self.page_size);
        Ok(buf.len())
    }

    fn delete(&self, _sn: SequenceNum) -> Result<()> {
        Ok(())
    }

    fn delete_snapshot(&self, snap_sn: SequenceNum, _ctx: &SnapContext) -> Result<()> {
        let mut state = self.state.lock();
        if state.snaps.remove(&snap_sn.get()).is_none() {
            // No snapshot object: correct the recorded base sequence.
            state.corrected_sn = snap_sn;
        }
        Ok(())
    }

    fn load_snapshot(&self, sn: SequenceNum) -> Result<()> {
        let mut state = self.state.lock();
        let image = Arc::new(FakeSnap {
            sn,
            data: state.data.clone(),
        });
        state.snaps.insert(sn.get(), image);
        state.loaded_snaps.push(sn.get());
        Ok(())
    }

    fn paste(&self, buf: &[u8], offset: u64) -> Result<()> {
        let mut state = self.state.lock();
        let offset = usize::try_from(offset).unwrap();
        let page_size = self.page_size;
        let first = offset / page_size;
        for (i, chunk) in buf.chunks(page_size).enumerate() {
            let page = first + i;
            if !state.written[page] {
                let at = page * page_size;
                state.data[at..at + chunk.len()].copy_from_slice(chunk);
                state.written[page] = true;
            }
        }
        Ok(())
    }

    fn info(&self) -> ChunkInfo {
        let state = self.state.lock();
        ChunkInfo {
            id: self.id,
            chunk_size: u32::try_from(state.data.len()).unwrap(),
            page_size: u32::try_from(self.page_size).unwrap(),
            cur_sn: state.cur_sn,
            snap_sn: state
                .snaps
                .keys()
                .next_back()
                .map_or(SequenceNum::INVALID, |&sn| SequenceNum(sn)),
            corrected_sn: state.corrected_sn,
            clone_no: self.clone_no,
            location: self.location.clone(),
        }
    }

    fn hash(&self, offset: u64, length: u64) -> Result<String> {
        let state = self.state.lock();
        let offset = usize::try_from(offset).unwrap();
        let length = usize::try_from(length).unwrap();
        Ok(crc32c::crc32c(&state.data[offset..offset + length]).to_string())
    }

    fn sync(&self) -> Result<()> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clone_no(&self) -> CloneNo {
        self.clone_no
    }
}

/// What `FakeFactory::open` finds "on disk" for one chunk id.
#[derive(Clone, Default)]
pub struct DiskImage {
    pub clone_no: CloneNo,
    pub location: Option<String>,
    pub cur_sn: SequenceNum,
    pub corrected_sn: SequenceNum,
    pub data: Vec<u8>,
    pub written_pages: Vec<u32>,
}

/// Chunk-file factory over an in-memory disk.
pub struct FakeFactory {
    chunk_size: usize,
    page_size: usize,
    pub disk: Mutex<HashMap<u64, DiskImage>>,
    pub created: Mutex<Vec<u64>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self {
            chunk_size: CHUNK_SIZE as usize,
            page_size: PAGE_SIZE as usize,
            disk: Mutex::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn with_image(self, id: ChunkId, image: DiskImage) -> Self {
        self.disk.lock().insert(id.get(), image);
        self
    }
}

impl ChunkFileFactory for FakeFactory {
    type File = FakeChunkFile;

    fn create(&self, opts: &ChunkOptions) -> Result<Arc<FakeChunkFile>> {
        self.created.lock().push(opts.id.get());
        Ok(Arc::new(FakeChunkFile::new(
            opts.id,
            self.chunk_size,
            self.page_size,
            opts.clone_no,
            opts.location.clone(),
            opts.sn,
            opts.corrected_sn,
        )))
    }

    fn open(&self, opts: &ChunkOptions) -> Result<Arc<FakeChunkFile>> {
        let disk = self.disk.lock();
        let image = disk.get(&opts.id.get()).ok_or_else(|| {
            CsError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such chunk file",
            ))
        })?;
        let file = FakeChunkFile::new(
            opts.id,
            self.chunk_size,
            self.page_size,
            image.clone_no,
            image.location.clone(),
            image.cur_sn,
            image.corrected_sn,
        );
        {
            let mut state = file.state.lock();
            if !image.data.is_empty() {
                let len = image.data.len();
                state.data[..len].copy_from_slice(&image.data);
            }
            for &page in &image.written_pages {
                state.written[page as usize] = true;
            }
        }
        Ok(Arc::new(file))
    }
}

/// In-memory [`LocalFs`].
#[derive(Default)]
pub struct MemFs {
    dirs: Mutex<HashSet<PathBuf>>,
    files: Mutex<HashSet<PathBuf>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(self, dir: &Path, names: &[&str]) -> Self {
        self.dirs.lock().insert(dir.to_path_buf());
        {
            let mut files = self.files.lock();
            for name in names {
                files.insert(dir.join(name));
            }
        }
        self
    }
}

impl LocalFs for MemFs {
    fn dir_exists(&self, path: &Path) -> Result<bool> {
        Ok(self.dirs.lock().contains(path))
    }

    fn mkdir(&self, path: &Path) -> Result<()> {
        self.dirs.lock().insert(path.to_path_buf());
        Ok(())
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let files = self.files.lock();
        let mut names: Vec<String> = files
            .iter()
            .filter(|p| p.parent() == Some(path))
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        names.sort_unstable();
        Ok(names)
    }

    fn file_exists(&self, path: &Path) -> Result<bool> {
        Ok(self.files.lock().contains(path))
    }
}

pub fn base_dir() -> PathBuf {
    PathBuf::from("/data/chunkserver0")
}

pub fn test_config() -> DataStoreConfig {
    DataStoreConfig {
        base_dir: base_dir(),
        chunk_size: CHUNK_SIZE,
        page_size: PAGE_SIZE,
        object_size: OBJECT_SIZE,
        location_limit: 3000,
        sync_on_open: false,
    }
}

/// Config whose object unit equals one page, so page-granularity writes are
/// object-aligned.
pub fn page_object_config() -> DataStoreConfig {
    DataStoreConfig {
        object_size: PAGE_SIZE,
        ..test_config()
    }
}

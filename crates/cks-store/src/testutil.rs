//! Minimal in-memory chunk file for unit tests.
//!
//! Serves a fixed fill byte and a configurable set of written pages; a
//! non-clone instance serves every page, a clone instance leaves unwritten
//! pages unresolved. Records the sequence number of every bitmap division so
//! tests can pin which version each chain hop was read at.

use cks_error::Result;
use cks_file::{ChunkFile, ObjectInfo};
use cks_types::{BitRange, ChunkInfo, CloneNo, PageSize, SequenceNum, SnapContext};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

pub(crate) struct SparseFile {
    clone_no: CloneNo,
    fill: u8,
    page: PageSize,
    written: Mutex<BTreeSet<u32>>,
    pub divide_sns: Mutex<Vec<SequenceNum>>,
}

impl SparseFile {
    pub fn non_clone(fill: u8) -> Self {
        Self::new(CloneNo::ROOT, fill)
    }

    pub fn clone_generation(clone_no: CloneNo, fill: u8) -> Self {
        Self::new(clone_no, fill)
    }

    fn new(clone_no: CloneNo, fill: u8) -> Self {
        Self {
            clone_no,
            fill,
            page: PageSize::new(4096).expect("valid test page size"),
            written: Mutex::new(BTreeSet::new()),
            divide_sns: Mutex::new(Vec::new()),
        }
    }

    pub fn with_pages(self, pages: impl IntoIterator<Item = u32>) -> Self {
        self.written.lock().extend(pages);
        self
    }
}

impl ChunkFile for SparseFile {
    type Snap = ();

    fn read(&self, buf: &mut [u8], _offset: u64) -> Result<()> {
        buf.fill(self.fill);
        Ok(())
    }

    fn write(
        &self,
        _sn: SequenceNum,
        _buf: &[u8],
        _offset: u64,
        _ctx: &SnapContext,
    ) -> Result<()> {
        Ok(())
    }

    fn read_specified_chunk(&self, _sn: SequenceNum, buf: &mut [u8], _offset: u64) -> Result<()> {
        buf.fill(self.fill);
        Ok(())
    }

    fn read_specified_snap(
        &self,
        _sn: SequenceNum,
        _snap: &Arc<()>,
        buf: &mut [u8],
        _offset: u64,
    ) -> Result<()> {
        buf.fill(self.fill);
        Ok(())
    }

    fn divide_obj_info_by_index(
        &self,
        sn: SequenceNum,
        ranges: &[BitRange],
        unresolved: &mut Vec<BitRange>,
        objs: &mut Vec<ObjectInfo<()>>,
    ) -> bool {
        self.divide_sns.lock().push(sn);
        let written = self.written.lock();
        let serve_all = self.clone_no.is_root();
        let mut finished = true;
        for range in ranges {
            let mut idx = range.begin;
            while idx <= range.end {
                let served = serve_all || written.contains(&idx);
                let mut end = idx;
                while end < range.end && (serve_all || written.contains(&(end + 1))) == served {
                    end += 1;
                }
                let run = BitRange::new(idx, end);
                if served {
                    objs.push(ObjectInfo::from_bit_range(run, self.page));
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
        false
    }

    fn write_data_direct(&self, buf: &[u8], _offset: u64) -> Result<usize> {
        Ok(buf.len())
    }

    fn delete(&self, _sn: SequenceNum) -> Result<()> {
        Ok(())
    }

    fn delete_snapshot(&self, _snap_sn: SequenceNum, _ctx: &SnapContext) -> Result<()> {
        Ok(())
    }

    fn load_snapshot(&self, _sn: SequenceNum) -> Result<()> {
        Ok(())
    }

    fn paste(&self, _buf: &[u8], _offset: u64) -> Result<()> {
        Ok(())
    }

    fn info(&self) -> ChunkInfo {
        ChunkInfo::default()
    }

    fn hash(&self, _offset: u64, _length: u64) -> Result<String> {
        Ok("0".to_owned())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn clone_no(&self) -> CloneNo {
        self.clone_no
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

use crate::buffer::LruKReplacer;
use crate::common::{DbError, FileId, Lsn, PageId, Result, INVALID_LSN, PAGE_SIZE};
use crate::log_mod::LogManager;
use crate::storage::DiskManager;

/// One page-sized frame. Latched by the surrounding `RwLock`; pin counts and
/// the page table live in the pool's side table so they can be updated
/// without the frame latch.
pub struct BufferFrame {
    page_id: PageId,
    data: Box<[u8]>,
    dirty: bool,
    /// LSN of the last log record applied to this frame while in memory;
    /// `INVALID_LSN` when the frame has no unflushed log dependency.
    lsn: Lsn,
}

impl BufferFrame {
    fn new() -> Self {
        Self {
            page_id: PageId(0),
            data: vec![0u8; PAGE_SIZE].into_boxed_slice(),
            dirty: false,
            lsn: INVALID_LSN,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

struct FrameMeta {
    pin_count: u32,
    page_id: Option<PageId>,
}

struct PoolInner {
    page_table: HashMap<PageId, usize>,
    meta: Vec<FrameMeta>,
    free_list: Vec<usize>,
    replacer: LruKReplacer,
    /// Dirty-page table for fuzzy checkpoints: page -> recovery LSN (the
    /// first record that dirtied the page since its last flush).
    dirty_pages: HashMap<PageId, Lsn>,
}

/// Fixed-frame buffer pool. All page access goes through `fetch_read` /
/// `fetch_write` / `new_page`; the returned guards unpin on drop.
pub struct BufferPool {
    frames: Vec<Arc<RwLock<BufferFrame>>>,
    inner: Mutex<PoolInner>,
    disk: Arc<DiskManager>,
    log: Arc<LogManager>,
}

impl BufferPool {
    pub fn new(capacity: usize, disk: Arc<DiskManager>, log: Arc<LogManager>) -> Self {
        let frames = (0..capacity)
            .map(|_| Arc::new(RwLock::new(BufferFrame::new())))
            .collect();
        let meta = (0..capacity)
            .map(|_| FrameMeta {
                pin_count: 0,
                page_id: None,
            })
            .collect();
        Self {
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::with_capacity(capacity),
                meta,
                free_list: (0..capacity).rev().collect(),
                replacer: LruKReplacer::new(2),
                dirty_pages: HashMap::new(),
            }),
            disk,
            log,
        }
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    /// Returns a pinned shared guard on the page.
    pub fn fetch_read(self: &Arc<Self>, page_id: PageId) -> Result<PageReadGuard> {
        let frame_idx = self.acquire_frame(page_id, true)?;
        let guard = self.frames[frame_idx].read_arc();
        Ok(PageReadGuard {
            pool: Arc::clone(self),
            frame_idx,
            guard: Some(guard),
        })
    }

    /// Returns a pinned exclusive guard on the page.
    pub fn fetch_write(self: &Arc<Self>, page_id: PageId) -> Result<PageWriteGuard> {
        let frame_idx = self.acquire_frame(page_id, true)?;
        let guard = self.frames[frame_idx].write_arc();
        Ok(PageWriteGuard {
            pool: Arc::clone(self),
            frame_idx,
            guard: Some(guard),
        })
    }

    /// Allocates a fresh page in `file_id` and returns it pinned, zeroed and
    /// exclusively latched.
    pub fn new_page(self: &Arc<Self>, file_id: FileId) -> Result<(PageWriteGuard, u32)> {
        let page_no = self.disk.allocate_page(file_id)?;
        let page_id = PageId::new(file_id, page_no);
        let frame_idx = self.acquire_frame(page_id, false)?;
        let mut guard = self.frames[frame_idx].write_arc();
        guard.data.fill(0);
        guard.dirty = true;
        Ok((
            PageWriteGuard {
                pool: Arc::clone(self),
                frame_idx,
                guard: Some(guard),
            },
            page_no,
        ))
    }

    /// Pins the page in a frame, evicting and loading as needed. The table
    /// latch is never held across disk IO.
    fn acquire_frame(&self, page_id: PageId, load: bool) -> Result<usize> {
        loop {
            let (frame_idx, old_page) = {
                let mut inner = self.inner.lock().unwrap();
                if let Some(&idx) = inner.page_table.get(&page_id) {
                    inner.meta[idx].pin_count += 1;
                    inner.replacer.record_access(idx);
                    inner.replacer.set_evictable(idx, false);
                    return Ok(idx);
                }
                let idx = if let Some(idx) = inner.free_list.pop() {
                    idx
                } else if let Some(idx) = inner.replacer.evict() {
                    idx
                } else {
                    return Err(DbError::NoFreeFrame);
                };
                let old_page = inner.meta[idx].page_id;
                // Reserve the frame so no one else can claim it.
                inner.meta[idx].pin_count = 1;
                (idx, old_page)
            };

            // Write back the previous occupant outside the table latch.
            let mut frame = self.frames[frame_idx].write();
            if let Some(old) = old_page {
                if frame.dirty {
                    if frame.lsn != INVALID_LSN {
                        self.log.flush_upto(frame.lsn)?;
                    }
                    self.disk.write_page(old, &frame.data)?;
                    frame.dirty = false;
                }
            }

            {
                let mut inner = self.inner.lock().unwrap();
                let raced_pin = inner.meta[frame_idx].pin_count != 1;
                let raced_load = inner.page_table.contains_key(&page_id);
                if raced_pin || raced_load {
                    // Either the old page was re-pinned while we wrote it
                    // back, or another thread loaded our page first. Put the
                    // frame back and retry.
                    inner.meta[frame_idx].pin_count -= 1;
                    if inner.meta[frame_idx].pin_count == 0 {
                        match old_page {
                            Some(_) => {
                                inner.replacer.record_access(frame_idx);
                                inner.replacer.set_evictable(frame_idx, true);
                            }
                            None => inner.free_list.push(frame_idx),
                        }
                    }
                    drop(inner);
                    drop(frame);
                    continue;
                }
                if let Some(old) = old_page {
                    inner.page_table.remove(&old);
                    inner.dirty_pages.remove(&old);
                }
                inner.page_table.insert(page_id, frame_idx);
                inner.meta[frame_idx].page_id = Some(page_id);
                inner.replacer.remove(frame_idx);
                inner.replacer.record_access(frame_idx);
                inner.replacer.set_evictable(frame_idx, false);
            }

            frame.page_id = page_id;
            frame.lsn = INVALID_LSN;
            if load {
                if let Err(e) = self.disk.read_page(page_id, &mut frame.data) {
                    let mut inner = self.inner.lock().unwrap();
                    inner.page_table.remove(&page_id);
                    inner.meta[frame_idx].page_id = None;
                    inner.meta[frame_idx].pin_count = 0;
                    inner.replacer.remove(frame_idx);
                    inner.free_list.push(frame_idx);
                    return Err(e);
                }
                frame.dirty = false;
            }
            return Ok(frame_idx);
        }
    }

    fn unpin(&self, frame_idx: usize) {
        let mut inner = self.inner.lock().unwrap();
        debug_assert!(inner.meta[frame_idx].pin_count > 0);
        inner.meta[frame_idx].pin_count = inner.meta[frame_idx].pin_count.saturating_sub(1);
        if inner.meta[frame_idx].pin_count == 0 {
            inner.replacer.set_evictable(frame_idx, true);
        }
    }

    fn note_dirty(&self, page_id: PageId, rec_lsn: Lsn) {
        let mut inner = self.inner.lock().unwrap();
        inner.dirty_pages.entry(page_id).or_insert(rec_lsn);
    }

    /// Writes the page back if dirty. The log is flushed through the page
    /// LSN first (WAL invariant).
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let frame_idx = {
            let mut inner = self.inner.lock().unwrap();
            match inner.page_table.get(&page_id) {
                Some(&idx) => {
                    inner.meta[idx].pin_count += 1;
                    inner.replacer.set_evictable(idx, false);
                    idx
                }
                None => return Ok(()),
            }
        };
        let mut frame = self.frames[frame_idx].write();
        if frame.dirty {
            if frame.lsn != INVALID_LSN {
                self.log.flush_upto(frame.lsn)?;
            }
            self.disk.write_page(page_id, &frame.data)?;
            frame.dirty = false;
        }
        drop(frame);
        {
            let mut inner = self.inner.lock().unwrap();
            inner.dirty_pages.remove(&page_id);
        }
        self.unpin(frame_idx);
        Ok(())
    }

    /// Flushes every resident page. Used by checkpoints and shutdown.
    pub fn flush_all(&self) -> Result<()> {
        let pages: Vec<PageId> = {
            let inner = self.inner.lock().unwrap();
            inner.page_table.keys().copied().collect()
        };
        for page_id in pages {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Snapshot of the dirty-page table for a fuzzy checkpoint.
    pub fn dirty_page_table(&self) -> Vec<(PageId, Lsn)> {
        let inner = self.inner.lock().unwrap();
        inner.dirty_pages.iter().map(|(&p, &l)| (p, l)).collect()
    }

    /// Drops all clean cached pages of a file; used when a file is deleted.
    pub fn discard_file(&self, file_id: FileId) {
        let mut inner = self.inner.lock().unwrap();
        let pages: Vec<(PageId, usize)> = inner
            .page_table
            .iter()
            .filter(|(p, _)| p.file_id() == file_id)
            .map(|(&p, &idx)| (p, idx))
            .collect();
        for (page_id, idx) in pages {
            if inner.meta[idx].pin_count == 0 {
                inner.page_table.remove(&page_id);
                inner.dirty_pages.remove(&page_id);
                inner.meta[idx].page_id = None;
                inner.replacer.remove(idx);
                inner.free_list.push(idx);
            }
        }
    }
}

/// Shared page guard; unpins on drop.
pub struct PageReadGuard {
    pool: Arc<BufferPool>,
    frame_idx: usize,
    guard: Option<ArcRwLockReadGuard<RawRwLock, BufferFrame>>,
}

impl PageReadGuard {
    pub fn page_id(&self) -> PageId {
        self.guard.as_ref().unwrap().page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.guard.as_ref().unwrap().data
    }
}

impl Drop for PageReadGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.pool.unpin(self.frame_idx);
    }
}

/// Exclusive page guard; unpins on drop. Mutators must call `set_lsn` (logged
/// pages) or `mark_dirty` (derived pages) so the write survives eviction.
pub struct PageWriteGuard {
    pool: Arc<BufferPool>,
    frame_idx: usize,
    guard: Option<ArcRwLockWriteGuard<RawRwLock, BufferFrame>>,
}

impl PageWriteGuard {
    pub fn page_id(&self) -> PageId {
        self.guard.as_ref().unwrap().page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.guard.as_ref().unwrap().data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.guard.as_mut().unwrap().data
    }

    /// Records that `lsn` modified this page: stamps the frame LSN, marks it
    /// dirty and registers the page in the dirty-page table.
    pub fn set_lsn(&mut self, lsn: Lsn) {
        let page_id = {
            let frame = self.guard.as_mut().unwrap();
            frame.lsn = lsn;
            frame.dirty = true;
            frame.page_id
        };
        self.pool.note_dirty(page_id, lsn);
    }

    /// Marks the page dirty without a log dependency (index and header pages
    /// are derived data).
    pub fn mark_dirty(&mut self) {
        let frame = self.guard.as_mut().unwrap();
        frame.dirty = true;
    }
}

impl Drop for PageWriteGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.pool.unpin(self.frame_idx);
    }
}

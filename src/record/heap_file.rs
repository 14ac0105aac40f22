use std::sync::Arc;

use crate::buffer::{BufferPool, PageWriteGuard};
use crate::common::{DbError, FileId, Lsn, PageId, Result, Rid, NO_PAGE, PAGE_SIZE};
use crate::lock::{LockManager, LockMode, LockObject};
use crate::log_mod::{LogManager, LogPayload};
use crate::record::HeapScan;
use crate::storage::DiskManager;
use crate::transaction::TxnHandle;

pub(crate) const MAGIC: &[u8; 4] = b"RMDB";
pub(crate) const VERSION: u32 = 1;

// File header page (page 0) field offsets.
const HDR_MAGIC: usize = 0;
const HDR_VERSION: usize = 4;
const HDR_TUPLE_SIZE: usize = 8;
const HDR_FIRST_FREE: usize = 12;
const HDR_TOTAL_PAGES: usize = 16;

// Data page field offsets: page LSN, free-list link, counts, bitmap, slots.
const PAGE_LSN: usize = 0;
const PAGE_NEXT_FREE: usize = 8;
const PAGE_NUM_RECORDS: usize = 12;
const PAGE_SLOT_COUNT: usize = 16;
const PAGE_BITMAP: usize = 20;

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn write_u32(data: &mut [u8], at: usize, v: u32) {
    data[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(b)
}

fn write_u64(data: &mut [u8], at: usize, v: u64) {
    data[at..at + 8].copy_from_slice(&v.to_le_bytes());
}

fn bitmap_get(data: &[u8], slot: usize) -> bool {
    data[PAGE_BITMAP + slot / 8] & (1 << (slot % 8)) != 0
}

fn bitmap_set(data: &mut [u8], slot: usize, occupied: bool) {
    if occupied {
        data[PAGE_BITMAP + slot / 8] |= 1 << (slot % 8);
    } else {
        data[PAGE_BITMAP + slot / 8] &= !(1 << (slot % 8));
    }
}

/// A heap of fixed-width tuples in slotted pages, with page 0 as the file
/// header. Mutations take locks through the caller's transaction and write a
/// log record before touching the page.
pub struct HeapFile {
    pub(crate) table: String,
    pub(crate) file_id: FileId,
    pub(crate) tuple_size: usize,
    pub(crate) slots_per_page: usize,
    pub(crate) pool: Arc<BufferPool>,
    pub(crate) log: Arc<LogManager>,
    pub(crate) locks: Arc<LockManager>,
    pub(crate) disk: Arc<DiskManager>,
}

impl HeapFile {
    /// Largest n with header + bitmap + n fixed slots within a page.
    pub fn slots_per_page_for(tuple_size: usize) -> usize {
        let budget = PAGE_SIZE - PAGE_BITMAP;
        let mut n = budget * 8 / (tuple_size * 8 + 1);
        while PAGE_BITMAP + (n + 7) / 8 + n * tuple_size > PAGE_SIZE {
            n -= 1;
        }
        n
    }

    /// Initializes a brand-new heap file: writes the header page.
    pub fn create(
        table: &str,
        file_id: FileId,
        tuple_size: usize,
        pool: Arc<BufferPool>,
        log: Arc<LogManager>,
        locks: Arc<LockManager>,
        disk: Arc<DiskManager>,
    ) -> Result<Arc<Self>> {
        let heap = Self::handle(table, file_id, tuple_size, pool, log, locks, disk);
        {
            let (mut header, page_no) = heap.pool.new_page(file_id)?;
            debug_assert_eq!(page_no, 0);
            let data = header.data_mut();
            data[HDR_MAGIC..HDR_MAGIC + 4].copy_from_slice(MAGIC);
            write_u32(data, HDR_VERSION, VERSION);
            write_u32(data, HDR_TUPLE_SIZE, tuple_size as u32);
            write_u32(data, HDR_FIRST_FREE, NO_PAGE);
            write_u32(data, HDR_TOTAL_PAGES, 1);
            header.mark_dirty();
        }
        // DDL is not transactional: the header must be durable immediately
        // so the file reopens after a crash.
        heap.pool.flush_page(PageId::new(file_id, 0))?;
        heap.disk.sync_file(file_id)?;
        Ok(heap)
    }

    /// Opens an existing heap file, validating the header page.
    pub fn open(
        table: &str,
        file_id: FileId,
        pool: Arc<BufferPool>,
        log: Arc<LogManager>,
        locks: Arc<LockManager>,
        disk: Arc<DiskManager>,
    ) -> Result<Arc<Self>> {
        let tuple_size = {
            let probe = Self::handle(table, file_id, 0, pool.clone(), log.clone(), locks.clone(), disk.clone());
            let header = probe.pool.fetch_read(PageId::new(file_id, 0))?;
            let data = header.data();
            if &data[HDR_MAGIC..HDR_MAGIC + 4] != MAGIC {
                return Err(DbError::Other(format!(
                    "Bad magic in data file for table {}",
                    table
                )));
            }
            if read_u32(data, HDR_VERSION) != VERSION {
                return Err(DbError::Other(format!(
                    "Unsupported data file version for table {}",
                    table
                )));
            }
            read_u32(data, HDR_TUPLE_SIZE) as usize
        };
        Ok(Self::handle(table, file_id, tuple_size, pool, log, locks, disk))
    }

    fn handle(
        table: &str,
        file_id: FileId,
        tuple_size: usize,
        pool: Arc<BufferPool>,
        log: Arc<LogManager>,
        locks: Arc<LockManager>,
        disk: Arc<DiskManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            table: table.to_string(),
            file_id,
            tuple_size,
            slots_per_page: Self::slots_per_page_for(tuple_size.max(1)),
            pool,
            log,
            locks,
            disk,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    fn slot_offset(&self, slot: usize) -> usize {
        PAGE_BITMAP + (self.slots_per_page + 7) / 8 + slot * self.tuple_size
    }

    fn page_is_full(&self, data: &[u8]) -> bool {
        (0..self.slots_per_page).all(|s| bitmap_get(data, s))
    }

    pub(crate) fn lock_table(&self, txn: &TxnHandle, mode: LockMode) -> Result<()> {
        txn.check_active()?;
        let object = LockObject::Table(self.file_id);
        self.locks.lock(txn.id(), &object, mode)?;
        txn.add_lock(object);
        Ok(())
    }

    fn lock_row(&self, txn: &TxnHandle, rid: Rid, mode: LockMode) -> Result<()> {
        txn.check_active()?;
        let object = LockObject::Row(self.file_id, rid);
        self.locks.lock(txn.id(), &object, mode)?;
        txn.add_lock(object);
        Ok(())
    }

    /// Inserts a tuple, returning its rid. Takes IX on the table and X on the
    /// chosen row; the row X is probed without blocking so a slot freed by a
    /// still-uncommitted delete is skipped rather than reused.
    pub fn insert(&self, txn: &TxnHandle, tuple: &[u8]) -> Result<Rid> {
        if tuple.len() != self.tuple_size {
            return Err(DbError::Other(format!(
                "Tuple size {} does not match table {} ({})",
                tuple.len(),
                self.table,
                self.tuple_size
            )));
        }
        self.lock_table(txn, LockMode::IX)?;

        let (mut guard, rid) = self.claim_slot(txn)?;

        let lsn = self.log.append(
            txn.id(),
            txn.last_lsn(),
            LogPayload::Insert {
                tuple: tuple.to_vec(),
                rid,
                table: self.table.clone(),
            },
        )?;
        txn.set_last_lsn(lsn);

        let offset = self.slot_offset(rid.slot_no as usize);
        let data = guard.data_mut();
        data[offset..offset + self.tuple_size].copy_from_slice(tuple);
        write_u64(data, PAGE_LSN, lsn);
        guard.set_lsn(lsn);
        Ok(rid)
    }

    /// Finds and claims a free slot under the header latch, extending the
    /// file when the free list is exhausted. Returns the write-latched page
    /// and the claimed rid; the bitmap bit is already set.
    fn claim_slot(&self, txn: &TxnHandle) -> Result<(PageWriteGuard, Rid)> {
        let header_id = PageId::new(self.file_id, 0);
        let mut header = self.pool.fetch_write(header_id)?;
        let head = read_u32(header.data(), HDR_FIRST_FREE);

        if head != NO_PAGE {
            let mut guard = self.pool.fetch_write(PageId::new(self.file_id, head))?;
            if let Some(slot) = self.probe_slots(txn, head, &guard)? {
                bitmap_set(guard.data_mut(), slot, true);
                let n = read_u32(guard.data(), PAGE_NUM_RECORDS) + 1;
                write_u32(guard.data_mut(), PAGE_NUM_RECORDS, n);
                if self.page_is_full(guard.data()) {
                    let next = read_u32(guard.data(), PAGE_NEXT_FREE);
                    write_u32(header.data_mut(), HDR_FIRST_FREE, next);
                    write_u32(guard.data_mut(), PAGE_NEXT_FREE, NO_PAGE);
                    header.mark_dirty();
                }
                guard.mark_dirty();
                return Ok((guard, Rid::new(head, slot as u32)));
            }
            // Head has free slots but all are held by uncommitted deleters;
            // leave it in the list and grow the file instead.
        }

        let (mut guard, page_no) = self.pool.new_page(self.file_id)?;
        self.init_data_page(guard.data_mut());
        write_u32(guard.data_mut(), PAGE_NEXT_FREE, head);
        write_u32(header.data_mut(), HDR_FIRST_FREE, page_no);
        write_u32(header.data_mut(), HDR_TOTAL_PAGES, page_no + 1);
        header.mark_dirty();

        let rid = Rid::new(page_no, 0);
        let object = LockObject::Row(self.file_id, rid);
        if !self.locks.try_lock(txn.id(), &object, LockMode::X) {
            return Err(DbError::Other("Fresh slot unexpectedly locked".to_string()));
        }
        txn.add_lock(object);
        bitmap_set(guard.data_mut(), 0, true);
        write_u32(guard.data_mut(), PAGE_NUM_RECORDS, 1);
        guard.mark_dirty();
        Ok((guard, rid))
    }

    /// First free slot whose row lock can be taken right now.
    fn probe_slots(
        &self,
        txn: &TxnHandle,
        page_no: u32,
        guard: &PageWriteGuard,
    ) -> Result<Option<usize>> {
        for slot in 0..self.slots_per_page {
            if bitmap_get(guard.data(), slot) {
                continue;
            }
            let rid = Rid::new(page_no, slot as u32);
            let object = LockObject::Row(self.file_id, rid);
            if self.locks.try_lock(txn.id(), &object, LockMode::X) {
                txn.add_lock(object);
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    /// Deletes the tuple at `rid`, logging the full old image. The slot is
    /// freed on-page but stays invisible and unreusable behind the X row
    /// lock until commit.
    pub fn delete(&self, txn: &TxnHandle, rid: Rid) -> Result<()> {
        self.lock_table(txn, LockMode::IX)?;
        self.lock_row(txn, rid, LockMode::X)?;

        let header_id = PageId::new(self.file_id, 0);
        let mut header = self.pool.fetch_write(header_id)?;
        // Bounds-check against the header already latched; re-latching it
        // through total_pages() would self-deadlock.
        if rid.page_no == 0 || rid.page_no >= read_u32(header.data(), HDR_TOTAL_PAGES) {
            return Err(DbError::RecordNotFound(rid));
        }
        let mut guard = self.pool.fetch_write(PageId::new(self.file_id, rid.page_no))?;
        let slot = rid.slot_no as usize;
        if slot >= self.slots_per_page || !bitmap_get(guard.data(), slot) {
            return Err(DbError::RecordNotFound(rid));
        }
        let offset = self.slot_offset(slot);
        let old = guard.data()[offset..offset + self.tuple_size].to_vec();
        let was_full = self.page_is_full(guard.data());

        let lsn = self.log.append(
            txn.id(),
            txn.last_lsn(),
            LogPayload::Delete {
                tuple: old,
                rid,
                table: self.table.clone(),
            },
        )?;
        txn.set_last_lsn(lsn);

        bitmap_set(guard.data_mut(), slot, false);
        let n = read_u32(guard.data(), PAGE_NUM_RECORDS).saturating_sub(1);
        write_u32(guard.data_mut(), PAGE_NUM_RECORDS, n);
        if was_full {
            let head = read_u32(header.data(), HDR_FIRST_FREE);
            write_u32(guard.data_mut(), PAGE_NEXT_FREE, head);
            write_u32(header.data_mut(), HDR_FIRST_FREE, rid.page_no);
            header.mark_dirty();
        }
        write_u64(guard.data_mut(), PAGE_LSN, lsn);
        guard.set_lsn(lsn);
        Ok(())
    }

    /// In-place update, logging both images.
    pub fn update(&self, txn: &TxnHandle, rid: Rid, new_tuple: &[u8]) -> Result<()> {
        if new_tuple.len() != self.tuple_size {
            return Err(DbError::Other(format!(
                "Tuple size {} does not match table {} ({})",
                new_tuple.len(),
                self.table,
                self.tuple_size
            )));
        }
        self.lock_table(txn, LockMode::IX)?;
        self.lock_row(txn, rid, LockMode::X)?;

        let mut guard = self.fetch_data_page(rid.page_no)?;
        let slot = rid.slot_no as usize;
        if slot >= self.slots_per_page || !bitmap_get(guard.data(), slot) {
            return Err(DbError::RecordNotFound(rid));
        }
        let offset = self.slot_offset(slot);
        let old = guard.data()[offset..offset + self.tuple_size].to_vec();

        let lsn = self.log.append(
            txn.id(),
            txn.last_lsn(),
            LogPayload::Update {
                old,
                new: new_tuple.to_vec(),
                rid,
                table: self.table.clone(),
            },
        )?;
        txn.set_last_lsn(lsn);

        let data = guard.data_mut();
        data[offset..offset + self.tuple_size].copy_from_slice(new_tuple);
        write_u64(data, PAGE_LSN, lsn);
        guard.set_lsn(lsn);
        Ok(())
    }

    /// Reads the tuple at `rid` under IS table / S row locks.
    pub fn get(&self, txn: &TxnHandle, rid: Rid) -> Result<Vec<u8>> {
        self.lock_table(txn, LockMode::IS)?;
        self.lock_row(txn, rid, LockMode::S)?;

        if rid.page_no == 0 || rid.page_no >= self.total_pages()? {
            return Err(DbError::RecordNotFound(rid));
        }
        let guard = self.pool.fetch_read(PageId::new(self.file_id, rid.page_no))?;
        let slot = rid.slot_no as usize;
        if slot >= self.slots_per_page || !bitmap_get(guard.data(), slot) {
            return Err(DbError::RecordNotFound(rid));
        }
        let offset = self.slot_offset(slot);
        Ok(guard.data()[offset..offset + self.tuple_size].to_vec())
    }

    /// Forward cursor over the whole heap under an S table lock.
    pub fn scan(self: &Arc<Self>, txn: &TxnHandle) -> Result<HeapScan> {
        HeapScan::new(Arc::clone(self), txn)
    }

    pub fn total_pages(&self) -> Result<u32> {
        let header = self.pool.fetch_read(PageId::new(self.file_id, 0))?;
        Ok(read_u32(header.data(), HDR_TOTAL_PAGES))
    }

    fn fetch_data_page(&self, page_no: u32) -> Result<PageWriteGuard> {
        if page_no == 0 || page_no >= self.total_pages()? {
            return Err(DbError::RecordNotFound(Rid::new(page_no, 0)));
        }
        self.pool.fetch_write(PageId::new(self.file_id, page_no))
    }

    fn init_data_page(&self, data: &mut [u8]) {
        data.fill(0);
        write_u64(data, PAGE_LSN, 0);
        write_u32(data, PAGE_NEXT_FREE, NO_PAGE);
        write_u32(data, PAGE_NUM_RECORDS, 0);
        write_u32(data, PAGE_SLOT_COUNT, self.slots_per_page as u32);
    }

    // Raw entry points used by recovery redo and by transaction undo. No
    // locks, no new log records; the caller decides the LSN stamped on the
    // page. Redo is gated on the page LSN for idempotence.

    /// Re-applies an insert image. Returns false when the page LSN shows the
    /// effect already on the page (gated mode only).
    pub fn apply_insert(&self, rid: Rid, tuple: &[u8], lsn: Lsn, gated: bool) -> Result<bool> {
        self.ensure_page(rid.page_no)?;
        let mut guard = self.pool.fetch_write(PageId::new(self.file_id, rid.page_no))?;
        self.ensure_initialized(&mut guard);
        if gated && read_u64(guard.data(), PAGE_LSN) >= lsn {
            return Ok(false);
        }
        let slot = rid.slot_no as usize;
        let offset = self.slot_offset(slot);
        if !bitmap_get(guard.data(), slot) {
            bitmap_set(guard.data_mut(), slot, true);
            let n = read_u32(guard.data(), PAGE_NUM_RECORDS) + 1;
            write_u32(guard.data_mut(), PAGE_NUM_RECORDS, n);
        }
        let data = guard.data_mut();
        data[offset..offset + self.tuple_size].copy_from_slice(tuple);
        write_u64(data, PAGE_LSN, lsn);
        guard.set_lsn(lsn);
        Ok(true)
    }

    /// Re-applies a delete (slot clear).
    pub fn apply_delete(&self, rid: Rid, lsn: Lsn, gated: bool) -> Result<bool> {
        self.ensure_page(rid.page_no)?;
        let mut guard = self.pool.fetch_write(PageId::new(self.file_id, rid.page_no))?;
        self.ensure_initialized(&mut guard);
        if gated && read_u64(guard.data(), PAGE_LSN) >= lsn {
            return Ok(false);
        }
        let slot = rid.slot_no as usize;
        if bitmap_get(guard.data(), slot) {
            bitmap_set(guard.data_mut(), slot, false);
            let n = read_u32(guard.data(), PAGE_NUM_RECORDS).saturating_sub(1);
            write_u32(guard.data_mut(), PAGE_NUM_RECORDS, n);
        }
        write_u64(guard.data_mut(), PAGE_LSN, lsn);
        guard.set_lsn(lsn);
        Ok(true)
    }

    /// Re-applies an update image.
    pub fn apply_update(&self, rid: Rid, tuple: &[u8], lsn: Lsn, gated: bool) -> Result<bool> {
        self.ensure_page(rid.page_no)?;
        let mut guard = self.pool.fetch_write(PageId::new(self.file_id, rid.page_no))?;
        self.ensure_initialized(&mut guard);
        if gated && read_u64(guard.data(), PAGE_LSN) >= lsn {
            return Ok(false);
        }
        let slot = rid.slot_no as usize;
        let offset = self.slot_offset(slot);
        if !bitmap_get(guard.data(), slot) {
            bitmap_set(guard.data_mut(), slot, true);
            let n = read_u32(guard.data(), PAGE_NUM_RECORDS) + 1;
            write_u32(guard.data_mut(), PAGE_NUM_RECORDS, n);
        }
        let data = guard.data_mut();
        data[offset..offset + self.tuple_size].copy_from_slice(tuple);
        write_u64(data, PAGE_LSN, lsn);
        guard.set_lsn(lsn);
        Ok(true)
    }

    fn ensure_page(&self, page_no: u32) -> Result<()> {
        while self.disk.num_pages(self.file_id)? <= page_no {
            let (mut guard, _) = self.pool.new_page(self.file_id)?;
            self.init_data_page(guard.data_mut());
        }
        Ok(())
    }

    fn ensure_initialized(&self, guard: &mut PageWriteGuard) {
        if read_u32(guard.data(), PAGE_SLOT_COUNT) == 0 {
            self.init_data_page(guard.data_mut());
        }
    }

    /// Rebuilds the header's free-page list and page count from the pages
    /// themselves. Run at the end of recovery, where redo and undo may have
    /// left the list stale.
    pub fn rebuild_free_list(&self) -> Result<()> {
        let total = self.disk.num_pages(self.file_id)?.max(1);
        let mut first_free = NO_PAGE;
        for page_no in (1..total).rev() {
            let mut guard = self.pool.fetch_write(PageId::new(self.file_id, page_no))?;
            self.ensure_initialized(&mut guard);
            let has_free = (0..self.slots_per_page).any(|s| !bitmap_get(guard.data(), s));
            if has_free {
                write_u32(guard.data_mut(), PAGE_NEXT_FREE, first_free);
                guard.mark_dirty();
                first_free = page_no;
            } else {
                write_u32(guard.data_mut(), PAGE_NEXT_FREE, NO_PAGE);
                guard.mark_dirty();
            }
        }
        let mut header = self.pool.fetch_write(PageId::new(self.file_id, 0))?;
        write_u32(header.data_mut(), HDR_FIRST_FREE, first_free);
        write_u32(header.data_mut(), HDR_TOTAL_PAGES, total);
        header.mark_dirty();
        Ok(())
    }

    /// Per-page occupancy check used by scans.
    pub(crate) fn read_page_tuples(&self, page_no: u32) -> Result<Vec<(Rid, Vec<u8>)>> {
        let guard = self.pool.fetch_read(PageId::new(self.file_id, page_no))?;
        if read_u32(guard.data(), PAGE_SLOT_COUNT) == 0 {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for slot in 0..self.slots_per_page {
            if bitmap_get(guard.data(), slot) {
                let offset = self.slot_offset(slot);
                out.push((
                    Rid::new(page_no, slot as u32),
                    guard.data()[offset..offset + self.tuple_size].to_vec(),
                ));
            }
        }
        Ok(out)
    }

    /// True when the slot at `rid` currently holds a tuple.
    pub fn slot_occupied(&self, rid: Rid) -> Result<bool> {
        if rid.page_no == 0 || rid.page_no >= self.total_pages()? {
            return Ok(false);
        }
        let guard = self.pool.fetch_read(PageId::new(self.file_id, rid.page_no))?;
        let slot = rid.slot_no as usize;
        Ok(slot < self.slots_per_page && bitmap_get(guard.data(), slot))
    }
}

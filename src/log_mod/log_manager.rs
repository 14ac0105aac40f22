use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::common::{DbError, Lsn, Result, TxnId, INVALID_LSN, INVALID_TXN_ID};
use crate::log_mod::{LogPayload, LogRecord, LOG_HEADER_SIZE};
use crate::storage::DiskManager;

/// Fixed size of the in-place HEADER record at offset 0 of the log file:
/// record header + global_lsn + checkpoint_lsn + checkpoint_count + crc.
pub const LOG_FILE_HEADER_SIZE: usize = LOG_HEADER_SIZE + 8 + 8 + 8 + 4;

struct LogState {
    /// Bounded append buffer; flushed when full, on commit and before any
    /// dirty page write-back.
    buffer: Vec<u8>,
    /// (lsn, offset-in-buffer, len) for every record still in the buffer.
    buffered: Vec<(Lsn, usize, usize)>,
    /// Durable records: lsn -> (file offset, len). Serves `read_record`.
    lsn_index: HashMap<Lsn, (u64, u32)>,
    checkpoint_lsn: Lsn,
    checkpoint_count: u64,
}

/// Allocates LSNs, buffers serialized records and owns the flush discipline:
/// the log reaches disk before any page it covers, and before any commit is
/// acknowledged.
pub struct LogManager {
    disk: Arc<DiskManager>,
    next_lsn: AtomicU64,
    flushed_lsn: AtomicU64,
    capacity: usize,
    state: Mutex<LogState>,
}

impl LogManager {
    /// Opens the log, creating the file header when the file is new. A
    /// damaged header is unrecoverable (the LSN counter would be lost).
    pub fn new(disk: Arc<DiskManager>, buffer_capacity: usize) -> Result<Self> {
        // LSN 0 is never allocated so that "flushed through 0" can mean
        // "nothing flushed yet".
        let mut manager = Self {
            disk,
            next_lsn: AtomicU64::new(1),
            flushed_lsn: AtomicU64::new(0),
            capacity: buffer_capacity,
            state: Mutex::new(LogState {
                buffer: Vec::with_capacity(buffer_capacity),
                buffered: Vec::new(),
                lsn_index: HashMap::new(),
                checkpoint_lsn: INVALID_LSN,
                checkpoint_count: 0,
            }),
        };

        let size = manager.disk.log_size()?;
        if size < LOG_FILE_HEADER_SIZE as u64 {
            manager.write_header_locked(1, INVALID_LSN, 0)?;
        } else {
            let raw = manager.disk.read_log(0, LOG_FILE_HEADER_SIZE)?;
            let (record, _) =
                LogRecord::deserialize(&raw).map_err(|_| DbError::LogUnrecoverable)?;
            match record.payload {
                LogPayload::Header {
                    global_lsn,
                    checkpoint_lsn,
                    checkpoint_count,
                } => {
                    manager.next_lsn = AtomicU64::new(global_lsn);
                    manager.flushed_lsn =
                        AtomicU64::new(global_lsn.saturating_sub(1));
                    let state = manager.state.get_mut().unwrap();
                    state.checkpoint_lsn = checkpoint_lsn;
                    state.checkpoint_count = checkpoint_count;
                }
                _ => return Err(DbError::LogUnrecoverable),
            }
        }
        Ok(manager)
    }

    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn.load(Ordering::SeqCst)
    }

    pub fn flushed_lsn(&self) -> Lsn {
        self.flushed_lsn.load(Ordering::SeqCst)
    }

    pub fn checkpoint_lsn(&self) -> Lsn {
        self.state.lock().unwrap().checkpoint_lsn
    }

    /// Appends a record, assigning its LSN. Blocks flushing when the buffer
    /// is full.
    pub fn append(&self, txn_id: TxnId, prev_lsn: Lsn, payload: LogPayload) -> Result<Lsn> {
        self.append_record(txn_id, prev_lsn, false, payload)
    }

    /// Appends a compensation record; undo skips over these.
    pub fn append_compensation(
        &self,
        txn_id: TxnId,
        prev_lsn: Lsn,
        payload: LogPayload,
    ) -> Result<Lsn> {
        self.append_record(txn_id, prev_lsn, true, payload)
    }

    fn append_record(
        &self,
        txn_id: TxnId,
        prev_lsn: Lsn,
        clr: bool,
        payload: LogPayload,
    ) -> Result<Lsn> {
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        let record = LogRecord {
            lsn,
            txn_id,
            prev_lsn,
            clr,
            payload,
        };
        let bytes = record.serialize();

        let mut state = self.state.lock().unwrap();
        if !state.buffer.is_empty() && state.buffer.len() + bytes.len() > self.capacity {
            self.flush_locked(&mut state)?;
        }
        let offset = state.buffer.len();
        state.buffer.extend_from_slice(&bytes);
        state.buffered.push((lsn, offset, bytes.len()));
        Ok(lsn)
    }

    /// Flushes the buffer through at least `lsn`. Idempotent.
    pub fn flush_upto(&self, lsn: Lsn) -> Result<()> {
        if self.flushed_lsn.load(Ordering::SeqCst) >= lsn {
            return Ok(());
        }
        let mut state = self.state.lock().unwrap();
        self.flush_locked(&mut state)
    }

    /// Flushes everything currently buffered.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.flush_locked(&mut state)
    }

    fn flush_locked(&self, state: &mut LogState) -> Result<()> {
        if state.buffer.is_empty() {
            return Ok(());
        }
        let base = self.disk.append_log(&state.buffer)?;
        self.disk.sync_log()?;
        let mut max_lsn = 0;
        for (lsn, offset, len) in state.buffered.drain(..) {
            state.lsn_index.insert(lsn, (base + offset as u64, len as u32));
            max_lsn = max_lsn.max(lsn);
        }
        state.buffer.clear();
        self.flushed_lsn.fetch_max(max_lsn, Ordering::SeqCst);
        debug!("log flushed through lsn {}", max_lsn);
        Ok(())
    }

    /// Reads a single record back, from the buffer or from disk. Used by
    /// abort-time undo walking `prev_lsn` chains.
    pub fn read_record(&self, lsn: Lsn) -> Result<LogRecord> {
        let state = self.state.lock().unwrap();
        for &(l, offset, len) in &state.buffered {
            if l == lsn {
                let (record, _) = LogRecord::deserialize(&state.buffer[offset..offset + len])?;
                return Ok(record);
            }
        }
        let (offset, len) = match state.lsn_index.get(&lsn) {
            Some(&entry) => entry,
            None => {
                return Err(DbError::Other(format!("LSN {} not found in log", lsn)));
            }
        };
        drop(state);
        let raw = self.disk.read_log(offset, len as usize)?;
        let (record, _) = LogRecord::deserialize(&raw)?;
        Ok(record)
    }

    /// Registers a durable record discovered by the recovery scan.
    pub fn register_durable(&self, lsn: Lsn, offset: u64, len: u32) {
        let mut state = self.state.lock().unwrap();
        state.lsn_index.insert(lsn, (offset, len));
        self.flushed_lsn.fetch_max(lsn, Ordering::SeqCst);
    }

    /// Advances the LSN counter past records found on disk during recovery.
    pub fn observe_lsn(&self, lsn: Lsn) {
        self.next_lsn.fetch_max(lsn + 1, Ordering::SeqCst);
    }

    /// Raw log bytes from `offset` to the end of the file, for the recovery
    /// scan.
    pub fn raw_from(&self, offset: u64) -> Result<Vec<u8>> {
        let size = self.disk.log_size()?;
        if offset >= size {
            return Ok(Vec::new());
        }
        self.disk.read_log(offset, (size - offset) as usize)
    }

    /// Durably rewrites the log file header with the current LSN high
    /// watermark and checkpoint pointer.
    pub fn write_header(&self, checkpoint_lsn: Lsn) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.checkpoint_lsn = checkpoint_lsn;
        state.checkpoint_count += 1;
        let count = state.checkpoint_count;
        drop(state);
        self.write_header_locked(self.next_lsn.load(Ordering::SeqCst), checkpoint_lsn, count)
    }

    fn write_header_locked(
        &self,
        global_lsn: Lsn,
        checkpoint_lsn: Lsn,
        checkpoint_count: u64,
    ) -> Result<()> {
        let record = LogRecord {
            lsn: INVALID_LSN,
            txn_id: INVALID_TXN_ID,
            prev_lsn: INVALID_LSN,
            clr: false,
            payload: LogPayload::Header {
                global_lsn,
                checkpoint_lsn,
                checkpoint_count,
            },
        };
        let bytes = record.serialize();
        debug_assert_eq!(bytes.len(), LOG_FILE_HEADER_SIZE);
        self.disk.write_log_header(&bytes)
    }

    /// Byte offset where scanning should start: just after the file header.
    pub fn body_offset(&self) -> u64 {
        LOG_FILE_HEADER_SIZE as u64
    }
}

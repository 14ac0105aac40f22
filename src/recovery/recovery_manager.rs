use std::collections::HashMap;
use std::sync::Arc;

use log::{info, warn};

use crate::buffer::BufferPool;
use crate::catalog::TableRegistry;
use crate::common::{DbError, Lsn, Result, TxnId, INVALID_LSN, INVALID_TXN_ID};
use crate::log_mod::{LogManager, LogPayload, LogRecord};
use crate::transaction::TransactionManager;

/// ARIES-style restart: analysis over the durable log, page-LSN-gated
/// physical redo, loser undo with compensation records, then an index rebuild
/// and a fresh checkpoint.
pub struct RecoveryManager {
    log: Arc<LogManager>,
    pool: Arc<BufferPool>,
    txns: Arc<TransactionManager>,
}

impl RecoveryManager {
    pub fn new(log: Arc<LogManager>, pool: Arc<BufferPool>, txns: Arc<TransactionManager>) -> Self {
        Self { log, pool, txns }
    }

    pub fn recover(&self, registry: &TableRegistry) -> Result<()> {
        let (records, att) = self.analysis()?;
        if records.is_empty() {
            return Ok(());
        }

        let changed = self.redo(&records, registry)?;
        let had_losers = !att.is_empty();
        self.undo(att, registry)?;

        // A clean shutdown leaves a CHECKPOINT as the last record; anything
        // else means index pages may be stale and must be rebuilt.
        let clean_tail = records
            .last()
            .map(|r| matches!(&r.payload, LogPayload::Checkpoint { .. }))
            .unwrap_or(true);
        if changed || had_losers || !clean_tail {
            self.rebuild_derived_state(registry)?;
        }
        // Make the recovered state durable before advertising a checkpoint:
        // redo skips everything at or before the checkpoint pointer.
        self.pool.flush_all()?;
        self.checkpoint(registry)?;
        Ok(())
    }

    /// Scans the log body, rebuilding the LSN index, the active-transaction
    /// table and the LSN/txn-id high watermarks. A corrupt record truncates
    /// the tail: everything after it is treated as lost.
    fn analysis(&self) -> Result<(Vec<LogRecord>, HashMap<TxnId, Lsn>)> {
        let body = self.log.body_offset();
        let raw = self.log.raw_from(body)?;
        let mut offset = 0usize;
        let mut att: HashMap<TxnId, Lsn> = HashMap::new();
        let mut records = Vec::new();

        while offset < raw.len() {
            let (record, len) = match LogRecord::deserialize(&raw[offset..]) {
                Ok(parsed) => parsed,
                Err(DbError::LogCorrupt) | Err(DbError::ChecksumMismatch) => {
                    warn!(
                        "log corrupt at offset {}; truncating tail",
                        body + offset as u64
                    );
                    break;
                }
                Err(e) => return Err(e),
            };
            self.log
                .register_durable(record.lsn, body + offset as u64, len as u32);
            self.log.observe_lsn(record.lsn);
            if record.txn_id != INVALID_TXN_ID {
                self.txns.observe_txn_id(record.txn_id);
            }

            match &record.payload {
                LogPayload::Begin => {
                    att.insert(record.txn_id, record.lsn);
                }
                LogPayload::Commit | LogPayload::Abort => {
                    att.remove(&record.txn_id);
                }
                LogPayload::Insert { .. }
                | LogPayload::Delete { .. }
                | LogPayload::Update { .. } => {
                    att.insert(record.txn_id, record.lsn);
                }
                LogPayload::Checkpoint { .. } | LogPayload::Header { .. } => {}
            }
            records.push(record);
            offset += len;
        }
        info!(
            "analysis: {} records, {} live transactions",
            records.len(),
            att.len()
        );
        Ok((records, att))
    }

    /// Physical redo: re-applies every data record whose page LSN on disk is
    /// older than the record. Idempotent; does not require the transaction to
    /// be alive. Returns whether anything was actually applied.
    fn redo(&self, records: &[LogRecord], registry: &TableRegistry) -> Result<bool> {
        let mut changed = false;
        let checkpoint_lsn = self.log.checkpoint_lsn();
        for record in records {
            // Every checkpoint writer flushes the pool first, so records at
            // or before the checkpoint pointer are already on disk.
            if checkpoint_lsn != INVALID_LSN && record.lsn <= checkpoint_lsn {
                continue;
            }
            let applied = match &record.payload {
                LogPayload::Insert { tuple, rid, table } => {
                    match registry.heap(table) {
                        Ok(heap) => heap.apply_insert(*rid, tuple, record.lsn, true)?,
                        Err(DbError::TableNotFound(_)) => false, // dropped later
                        Err(e) => return Err(e),
                    }
                }
                LogPayload::Delete { rid, table, .. } => match registry.heap(table) {
                    Ok(heap) => heap.apply_delete(*rid, record.lsn, true)?,
                    Err(DbError::TableNotFound(_)) => false,
                    Err(e) => return Err(e),
                },
                LogPayload::Update {
                    new, rid, table, ..
                } => match registry.heap(table) {
                    Ok(heap) => heap.apply_update(*rid, new, record.lsn, true)?,
                    Err(DbError::TableNotFound(_)) => false,
                    Err(e) => return Err(e),
                },
                _ => false,
            };
            changed |= applied;
        }
        Ok(changed)
    }

    /// Undoes every loser along its `prev_lsn` chain, emitting compensation
    /// records and a final ABORT, exactly as a live abort would.
    fn undo(&self, att: HashMap<TxnId, Lsn>, registry: &TableRegistry) -> Result<()> {
        for (txn_id, last_lsn) in att {
            info!("undoing loser transaction {}", txn_id);
            let mut chain_end = last_lsn;
            self.txns
                .undo_chain(txn_id, last_lsn, registry, |clr| chain_end = clr)?;
            self.log
                .append(txn_id, chain_end, LogPayload::Abort)?;
        }
        self.log.flush()?;
        Ok(())
    }

    /// Indexes and heap free lists are derived data: rebuilt from the heaps
    /// after redo/undo have settled the tuple images.
    fn rebuild_derived_state(&self, registry: &TableRegistry) -> Result<()> {
        for table in registry.tables() {
            let heap = registry.heap(&table)?;
            heap.rebuild_free_list()?;
            let indexes = registry.indexes_of(&table);
            if indexes.is_empty() {
                continue;
            }
            for index in &indexes {
                index.reset()?;
            }
            let total = heap.total_pages()?;
            for page_no in 1..total {
                for (rid, tuple) in heap.read_page_tuples(page_no)? {
                    for index in &indexes {
                        index.insert_for_tuple(&tuple, rid)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Fuzzy checkpoint: ATT + DPT snapshot in a CHECKPOINT record, log
    /// flushed, durable pointer written into the log file header.
    pub fn checkpoint(&self, _registry: &TableRegistry) -> Result<()> {
        let att = self.txns.active_transactions();
        let dpt = self.pool.dirty_page_table();
        let lsn = self.log.append(
            INVALID_TXN_ID,
            INVALID_LSN,
            LogPayload::Checkpoint { att, dpt },
        )?;
        self.log.flush()?;
        self.log.write_header(lsn)?;
        info!("checkpoint written at lsn {}", lsn);
        Ok(())
    }
}

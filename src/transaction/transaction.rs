use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info};

use crate::catalog::TableRegistry;
use crate::common::{DbError, Lsn, PageId, Result, TxnId, INVALID_LSN};
use crate::lock::{LockManager, LockObject};
use crate::log_mod::{LogManager, LogPayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

#[derive(Debug)]
struct TxnInner {
    status: TxnStatus,
    last_lsn: Lsn,
    locks: Vec<LockObject>,
    touched_pages: HashSet<PageId>,
}

/// Shared handle to a live transaction. Cloned into every operator that runs
/// under the transaction.
#[derive(Debug, Clone)]
pub struct TxnHandle {
    id: TxnId,
    inner: Arc<Mutex<TxnInner>>,
}

impl TxnHandle {
    fn new(id: TxnId, first_lsn: Lsn) -> Self {
        Self {
            id,
            inner: Arc::new(Mutex::new(TxnInner {
                status: TxnStatus::Growing,
                last_lsn: first_lsn,
                locks: Vec::new(),
                touched_pages: HashSet::new(),
            })),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn status(&self) -> TxnStatus {
        self.inner.lock().unwrap().status
    }

    /// Fails with `TransactionAborted` once the transaction has been marked
    /// aborted: the next operation of a deadlock victim lands here.
    pub fn check_active(&self) -> Result<()> {
        match self.status() {
            TxnStatus::Growing | TxnStatus::Shrinking => Ok(()),
            TxnStatus::Aborted | TxnStatus::Committed => Err(DbError::TransactionAborted),
        }
    }

    pub fn last_lsn(&self) -> Lsn {
        self.inner.lock().unwrap().last_lsn
    }

    pub fn set_last_lsn(&self, lsn: Lsn) {
        self.inner.lock().unwrap().last_lsn = lsn;
    }

    pub fn add_lock(&self, object: LockObject) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.locks.contains(&object) {
            inner.locks.push(object);
        }
    }

    pub fn touch_page(&self, page: PageId) {
        self.inner.lock().unwrap().touched_pages.insert(page);
    }

    pub fn touched_pages(&self) -> Vec<PageId> {
        self.inner
            .lock()
            .unwrap()
            .touched_pages
            .iter()
            .copied()
            .collect()
    }

    fn set_status(&self, status: TxnStatus) {
        self.inner.lock().unwrap().status = status;
    }

    fn take_locks(&self) -> Vec<LockObject> {
        std::mem::take(&mut self.inner.lock().unwrap().locks)
    }
}

/// Transaction lifecycle: begin/commit/abort, strict-2PL lock release and
/// abort-time undo along the `prev_lsn` chain.
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    active: Mutex<HashMap<TxnId, TxnHandle>>,
    log: Arc<LogManager>,
    locks: Arc<LockManager>,
}

impl TransactionManager {
    pub fn new(log: Arc<LogManager>, locks: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU64::new(0),
            active: Mutex::new(HashMap::new()),
            log,
            locks,
        }
    }

    /// Restores the transaction-id counter after recovery.
    pub fn observe_txn_id(&self, id: TxnId) {
        self.next_txn_id.fetch_max(id + 1, Ordering::SeqCst);
    }

    pub fn begin(&self) -> Result<TxnHandle> {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let lsn = self.log.append(id, INVALID_LSN, LogPayload::Begin)?;
        let txn = TxnHandle::new(id, lsn);
        self.active.lock().unwrap().insert(id, txn.clone());
        debug!("transaction {} started", id);
        Ok(txn)
    }

    /// Commits: the COMMIT record is flushed before the commit is reported
    /// (WAL invariant 2), then all locks release together.
    pub fn commit(&self, txn: &TxnHandle) -> Result<()> {
        txn.check_active()?;
        let lsn = self
            .log
            .append(txn.id(), txn.last_lsn(), LogPayload::Commit)?;
        txn.set_last_lsn(lsn);
        self.log.flush_upto(lsn)?;
        txn.set_status(TxnStatus::Committed);
        self.locks.unlock_all(txn.id(), &txn.take_locks());
        self.active.lock().unwrap().remove(&txn.id());
        debug!("transaction {} committed at lsn {}", txn.id(), lsn);
        Ok(())
    }

    /// Aborts: undoes every logged change in reverse, emitting compensation
    /// records, then releases all locks.
    pub fn abort(&self, txn: &TxnHandle, registry: &TableRegistry) -> Result<()> {
        if txn.status() == TxnStatus::Committed {
            return Err(DbError::Other(format!(
                "Transaction {} already committed",
                txn.id()
            )));
        }
        txn.set_status(TxnStatus::Aborted);
        self.undo_chain(txn.id(), txn.last_lsn(), registry, |lsn| {
            txn.set_last_lsn(lsn)
        })?;
        let lsn = self
            .log
            .append(txn.id(), txn.last_lsn(), LogPayload::Abort)?;
        txn.set_last_lsn(lsn);
        self.log.flush_upto(lsn)?;
        self.locks.unlock_all(txn.id(), &txn.take_locks());
        self.active.lock().unwrap().remove(&txn.id());
        info!("transaction {} aborted", txn.id());
        Ok(())
    }

    /// Walks the `prev_lsn` chain from `from_lsn` backwards, applying the
    /// inverse of each record and logging a compensation record whose
    /// `prev_lsn` points past the undone one. Shared by abort and by the
    /// recovery undo pass.
    pub fn undo_chain(
        &self,
        txn_id: TxnId,
        from_lsn: Lsn,
        registry: &TableRegistry,
        mut on_clr: impl FnMut(Lsn),
    ) -> Result<()> {
        let mut lsn = from_lsn;
        while lsn != INVALID_LSN {
            let record = self.log.read_record(lsn)?;
            if record.clr {
                // Compensation records are never re-undone; their prev_lsn
                // already points past the record they undid.
                lsn = record.prev_lsn;
                continue;
            }
            match &record.payload {
                LogPayload::Insert { tuple, rid, table } => {
                    let heap = registry.heap(table)?;
                    let clr = self.log.append_compensation(
                        txn_id,
                        record.prev_lsn,
                        LogPayload::Delete {
                            tuple: tuple.clone(),
                            rid: *rid,
                            table: table.clone(),
                        },
                    )?;
                    on_clr(clr);
                    heap.apply_delete(*rid, clr, false)?;
                    for index in registry.indexes_of(table) {
                        index.delete_for_tuple(tuple, *rid)?;
                    }
                }
                LogPayload::Delete { tuple, rid, table } => {
                    let heap = registry.heap(table)?;
                    let clr = self.log.append_compensation(
                        txn_id,
                        record.prev_lsn,
                        LogPayload::Insert {
                            tuple: tuple.clone(),
                            rid: *rid,
                            table: table.clone(),
                        },
                    )?;
                    on_clr(clr);
                    heap.apply_insert(*rid, tuple, clr, false)?;
                    for index in registry.indexes_of(table) {
                        index.insert_for_tuple(tuple, *rid)?;
                    }
                }
                LogPayload::Update {
                    old,
                    new,
                    rid,
                    table,
                } => {
                    let heap = registry.heap(table)?;
                    let clr = self.log.append_compensation(
                        txn_id,
                        record.prev_lsn,
                        LogPayload::Update {
                            old: new.clone(),
                            new: old.clone(),
                            rid: *rid,
                            table: table.clone(),
                        },
                    )?;
                    on_clr(clr);
                    heap.apply_update(*rid, old, clr, false)?;
                    for index in registry.indexes_of(table) {
                        index.delete_for_tuple(new, *rid)?;
                        index.insert_for_tuple(old, *rid)?;
                    }
                }
                LogPayload::Begin => break,
                _ => {}
            }
            lsn = record.prev_lsn;
        }
        Ok(())
    }

    /// Snapshot of the active-transaction table for a fuzzy checkpoint.
    pub fn active_transactions(&self) -> Vec<(TxnId, Lsn)> {
        let active = self.active.lock().unwrap();
        active.values().map(|t| (t.id(), t.last_lsn())).collect()
    }
}

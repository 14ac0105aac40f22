pub mod buffer;
pub mod catalog;
pub mod common;
pub mod execution;
pub mod index;
pub mod lock;
pub mod log_mod;
pub mod record;
pub mod recovery;
pub mod storage;
pub mod transaction;

pub use buffer::BufferPool;
pub use catalog::{Catalog, ColumnMeta, IndexMeta, Schema, TableRegistry};
pub use common::{DatabaseConfig, DbError, PageId, Result, Rid};
pub use index::BTreeIndex;
pub use lock::{LockManager, LockMode, LockObject};
pub use log_mod::LogManager;
pub use record::HeapFile;
pub use recovery::RecoveryManager;
pub use storage::{DbFiles, DiskManager};
pub use transaction::{TransactionManager, TxnHandle};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::execution::ExecContext;

/// The portal-facing database handle: owns every component, runs recovery on
/// open and exposes transactions, DDL and the executor context.
pub struct Database {
    files: DbFiles,
    config: DatabaseConfig,
    disk: Arc<DiskManager>,
    pool: Arc<BufferPool>,
    log: Arc<LogManager>,
    locks: Arc<LockManager>,
    txns: Arc<TransactionManager>,
    catalog: Arc<Catalog>,
    registry: Arc<TableRegistry>,
    recovery: RecoveryManager,
}

impl Database {
    pub fn open(db_path: &Path, config: DatabaseConfig) -> Result<Self> {
        let files = DbFiles::new(db_path)?;
        let disk = Arc::new(DiskManager::new(&files.log_file_path())?);
        let log = Arc::new(LogManager::new(Arc::clone(&disk), config.log_buffer_bytes)?);
        let pool = Arc::new(BufferPool::new(
            config.buffer_pool_pages,
            Arc::clone(&disk),
            Arc::clone(&log),
        ));
        let locks = Arc::new(LockManager::new(Duration::from_millis(
            config.lock_timeout_ms,
        )));
        let txns = Arc::new(TransactionManager::new(Arc::clone(&log), Arc::clone(&locks)));
        let catalog = Arc::new(Catalog::open(files.meta_file_path())?);
        let registry = Arc::new(TableRegistry::new());

        for meta in catalog.tables() {
            disk.open_file(meta.file_id, &files.table_file_path(&meta.name))?;
            let heap = HeapFile::open(
                &meta.name,
                meta.file_id,
                Arc::clone(&pool),
                Arc::clone(&log),
                Arc::clone(&locks),
                Arc::clone(&disk),
            )?;
            registry.register_heap(&meta.name, heap);
            let schema = meta.schema();
            for index_meta in &meta.indexes {
                disk.open_file(
                    index_meta.file_id,
                    &files.index_file_path(&meta.name, &index_meta.name),
                )?;
                let index = BTreeIndex::open(
                    &index_meta.name,
                    &meta.name,
                    index_meta.file_id,
                    index_meta.unique,
                    &schema,
                    &index_meta.columns,
                    Arc::clone(&pool),
                    Arc::clone(&locks),
                )?;
                registry.register_index(&meta.name, index);
            }
        }

        let recovery = RecoveryManager::new(Arc::clone(&log), Arc::clone(&pool), Arc::clone(&txns));
        recovery.recover(&registry)?;
        info!("database open at {}", db_path.display());

        Ok(Self {
            files,
            config,
            disk,
            pool,
            log,
            locks,
            txns,
            catalog,
            registry,
            recovery,
        })
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<TableRegistry> {
        &self.registry
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn txn_manager(&self) -> &Arc<TransactionManager> {
        &self.txns
    }

    // ---- transactions ----

    pub fn begin(&self) -> Result<TxnHandle> {
        self.txns.begin()
    }

    pub fn commit(&self, txn: &TxnHandle) -> Result<()> {
        self.txns.commit(txn)
    }

    pub fn abort(&self, txn: &TxnHandle) -> Result<()> {
        self.txns.abort(txn, &self.registry)
    }

    /// Portal error policy: concurrency errors abort the transaction inside
    /// the core; the caller sees the abort reason.
    pub fn abort_on_error(&self, txn: &TxnHandle, err: DbError) -> DbError {
        match err {
            DbError::LockTimeout | DbError::DeadlockVictim | DbError::TransactionAborted => {
                let _ = self.txns.abort(txn, &self.registry);
                err
            }
            other => other,
        }
    }

    // ---- DDL ----

    pub fn create_table(&self, name: &str, columns: Vec<ColumnMeta>) -> Result<()> {
        if self.catalog.table(name).is_ok() {
            return Err(DbError::TableExists(name.to_string()));
        }
        let tuple_size: usize = columns
            .iter()
            .map(|c| match c.ty {
                common::ColType::Int | common::ColType::Float => 4,
                common::ColType::Str => c.len,
            })
            .sum();
        let file_id = self.catalog.allocate_file_id();
        self.disk
            .open_file(file_id, &self.files.table_file_path(name))?;
        let heap = HeapFile::create(
            name,
            file_id,
            tuple_size,
            Arc::clone(&self.pool),
            Arc::clone(&self.log),
            Arc::clone(&self.locks),
            Arc::clone(&self.disk),
        )?;
        self.catalog.create_table(name, columns, file_id)?;
        self.registry.register_heap(name, heap);
        self.catalog.save()?;
        info!("created table {}", name);
        Ok(())
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        let meta = self.catalog.drop_table(name)?;
        for index_meta in &meta.indexes {
            self.pool.discard_file(index_meta.file_id);
            self.disk.delete_file(
                index_meta.file_id,
                &self.files.index_file_path(name, &index_meta.name),
            )?;
        }
        self.registry.unregister_heap(name);
        self.pool.discard_file(meta.file_id);
        self.disk
            .delete_file(meta.file_id, &self.files.table_file_path(name))?;
        self.catalog.save()?;
        info!("dropped table {}", name);
        Ok(())
    }

    /// Creates an index and bulk-loads it from a full scan of the heap.
    pub fn create_index(
        &self,
        table: &str,
        name: &str,
        columns: Vec<String>,
        unique: bool,
    ) -> Result<()> {
        let meta = self.catalog.table(table)?;
        if meta.indexes.iter().any(|i| i.name == name) {
            return Err(DbError::Other(format!("Index {} already exists", name)));
        }
        let schema = meta.schema();
        let file_id = self.catalog.allocate_file_id();
        self.disk
            .open_file(file_id, &self.files.index_file_path(table, name))?;
        let index = BTreeIndex::create(
            name,
            table,
            file_id,
            unique,
            &schema,
            &columns,
            Arc::clone(&self.pool),
            Arc::clone(&self.locks),
        )?;

        let heap = self.registry.heap(table)?;
        let total = heap.total_pages()?;
        for page_no in 1..total {
            for (rid, tuple) in heap.read_page_tuples(page_no)? {
                index.insert_for_tuple(&tuple, rid)?;
            }
        }

        self.catalog.add_index(IndexMeta {
            name: name.to_string(),
            table: table.to_string(),
            columns,
            file_id,
            unique,
        })?;
        self.registry.register_index(table, index);
        self.catalog.save()?;
        info!("created index {} on {}", name, table);
        Ok(())
    }

    pub fn drop_index(&self, table: &str, name: &str) -> Result<()> {
        let meta = self.catalog.drop_index(table, name)?;
        self.registry.unregister_index(table, name);
        self.pool.discard_file(meta.file_id);
        self.disk
            .delete_file(meta.file_id, &self.files.index_file_path(table, name))?;
        self.catalog.save()?;
        Ok(())
    }

    // ---- maintenance ----

    pub fn checkpoint(&self) -> Result<()> {
        // Pages first so the on-disk state matches the checkpoint's view;
        // the DPT in the record is then empty or tiny.
        self.pool.flush_all()?;
        self.recovery.checkpoint(&self.registry)
    }

    pub fn exec_context(&self) -> Arc<ExecContext> {
        Arc::new(ExecContext {
            catalog: Arc::clone(&self.catalog),
            registry: Arc::clone(&self.registry),
            txns: Arc::clone(&self.txns),
            config: self.config.clone(),
        })
    }

    /// Clean shutdown: all pages and the log durable, catalog persisted,
    /// checkpoint pointer written.
    pub fn close(&self) -> Result<()> {
        self.pool.flush_all()?;
        self.log.flush()?;
        self.recovery.checkpoint(&self.registry)?;
        self.catalog.save()?;
        self.disk.sync_all_files()?;
        info!("database closed cleanly");
        Ok(())
    }
}

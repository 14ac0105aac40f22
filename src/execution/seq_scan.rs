use std::sync::Arc;

use crate::catalog::Schema;
use crate::common::{DbError, Result};
use crate::execution::{Executor, Tuple};
use crate::record::{HeapFile, HeapScan};
use crate::transaction::TxnHandle;

/// Full-table scan over a heap file in page-then-slot order.
pub struct SeqScanExec {
    heap: Arc<HeapFile>,
    schema: Schema,
    txn: TxnHandle,
    cursor: Option<HeapScan>,
}

impl SeqScanExec {
    pub fn new(heap: Arc<HeapFile>, schema: Schema, txn: TxnHandle) -> Self {
        Self {
            heap,
            schema,
            txn,
            cursor: None,
        }
    }
}

impl Executor for SeqScanExec {
    fn open(&mut self) -> Result<()> {
        self.cursor = Some(self.heap.scan(&self.txn)?);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        self.txn.check_active()?;
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| DbError::Other("Scan used before open".to_string()))?;
        Ok(cursor
            .next()?
            .map(|(rid, data)| Tuple::with_rid(data, rid)))
    }

    fn close(&mut self) -> Result<()> {
        self.cursor = None;
        Ok(())
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

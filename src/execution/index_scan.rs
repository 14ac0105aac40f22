use std::sync::Arc;

use crate::catalog::Schema;
use crate::common::{DbError, Result, Value};
use crate::execution::{Executor, Tuple};
use crate::index::{BTreeIndex, BTreeScan};
use crate::record::HeapFile;
use crate::transaction::TxnHandle;

/// Ordered range scan over an index, fetching each matching tuple from the
/// heap (which takes the S row lock).
pub struct IndexScanExec {
    index: Arc<BTreeIndex>,
    heap: Arc<HeapFile>,
    schema: Schema,
    txn: TxnHandle,
    low: Option<Vec<Value>>,
    low_inclusive: bool,
    high: Option<Vec<Value>>,
    high_inclusive: bool,
    cursor: Option<BTreeScan>,
}

impl IndexScanExec {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: Arc<BTreeIndex>,
        heap: Arc<HeapFile>,
        schema: Schema,
        txn: TxnHandle,
        low: Option<Vec<Value>>,
        low_inclusive: bool,
        high: Option<Vec<Value>>,
        high_inclusive: bool,
    ) -> Self {
        Self {
            index,
            heap,
            schema,
            txn,
            low,
            low_inclusive,
            high,
            high_inclusive,
            cursor: None,
        }
    }
}

impl Executor for IndexScanExec {
    fn open(&mut self) -> Result<()> {
        self.cursor = Some(BTreeScan::open(
            Arc::clone(&self.index),
            &self.txn,
            self.low.as_deref(),
            self.low_inclusive,
            self.high.as_deref(),
            self.high_inclusive,
        )?);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        self.txn.check_active()?;
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| DbError::Other("Scan used before open".to_string()))?;
        match cursor.next()? {
            Some((_key, rid)) => {
                let data = self.heap.get(&self.txn, rid)?;
                Ok(Some(Tuple::with_rid(data, rid)))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.cursor = None;
        Ok(())
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

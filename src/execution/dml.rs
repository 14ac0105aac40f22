use std::sync::Arc;

use crate::catalog::{Schema, TableRegistry};
use crate::common::{ColType, DbError, Result, Value};
use crate::execution::{BoxedExecutor, Executor, Tuple};
use crate::index::BTreeIndex;
use crate::record::HeapFile;
use crate::transaction::TxnHandle;

fn count_schema() -> Schema {
    Schema::new(vec![("count".to_string(), ColType::Int, 4)])
}

/// Consumes its child, inserting every tuple into the heap and maintaining
/// all indexes on the table. Emits a single count row.
pub struct InsertExec {
    heap: Arc<HeapFile>,
    indexes: Vec<Arc<BTreeIndex>>,
    child: BoxedExecutor,
    txn: TxnHandle,
    schema: Schema,
    done: bool,
}

impl InsertExec {
    pub fn new(
        registry: &TableRegistry,
        table: &str,
        child: BoxedExecutor,
        txn: TxnHandle,
    ) -> Result<Self> {
        Ok(Self {
            heap: registry.heap(table)?,
            indexes: registry.indexes_of(table),
            child,
            txn,
            schema: count_schema(),
            done: false,
        })
    }
}

impl Executor for InsertExec {
    fn open(&mut self) -> Result<()> {
        self.child.open()?;
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let mut count = 0i32;
        while let Some(tuple) = self.child.next()? {
            let rid = self.heap.insert(&self.txn, &tuple.data)?;
            for index in &self.indexes {
                index.insert_with_txn(&self.txn, &tuple.data, rid)?;
            }
            count += 1;
        }
        let data = self.schema.encode_tuple(&[Value::Int(count)])?;
        Ok(Some(Tuple::new(data)))
    }

    fn close(&mut self) -> Result<()> {
        self.child.close()
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Consumes its child (which must produce tuples carrying rids), deleting
/// each from the heap and from every index.
pub struct DeleteExec {
    heap: Arc<HeapFile>,
    indexes: Vec<Arc<BTreeIndex>>,
    child: BoxedExecutor,
    txn: TxnHandle,
    schema: Schema,
    done: bool,
}

impl DeleteExec {
    pub fn new(
        registry: &TableRegistry,
        table: &str,
        child: BoxedExecutor,
        txn: TxnHandle,
    ) -> Result<Self> {
        Ok(Self {
            heap: registry.heap(table)?,
            indexes: registry.indexes_of(table),
            child,
            txn,
            schema: count_schema(),
            done: false,
        })
    }
}

impl Executor for DeleteExec {
    fn open(&mut self) -> Result<()> {
        self.child.open()?;
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let mut count = 0i32;
        while let Some(tuple) = self.child.next()? {
            let rid = tuple
                .rid
                .ok_or_else(|| DbError::Other("Delete source lost its rids".to_string()))?;
            self.heap.delete(&self.txn, rid)?;
            for index in &self.indexes {
                index.delete_for_tuple(&tuple.data, rid)?;
            }
            count += 1;
        }
        let data = self.schema.encode_tuple(&[Value::Int(count)])?;
        Ok(Some(Tuple::new(data)))
    }

    fn close(&mut self) -> Result<()> {
        self.child.close()
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// In-place update: applies SET assignments to each child tuple. For every
/// index the old entry is removed before the new one is inserted, keeping the
/// (key, rid) uniqueness invariant during the operation.
pub struct UpdateExec {
    heap: Arc<HeapFile>,
    indexes: Vec<Arc<BTreeIndex>>,
    child: BoxedExecutor,
    txn: TxnHandle,
    assignments: Vec<(usize, Value)>,
    schema: Schema,
    done: bool,
}

impl UpdateExec {
    pub fn new(
        registry: &TableRegistry,
        table: &str,
        child: BoxedExecutor,
        txn: TxnHandle,
        assignments: Vec<(usize, Value)>,
    ) -> Result<Self> {
        Ok(Self {
            heap: registry.heap(table)?,
            indexes: registry.indexes_of(table),
            child,
            txn,
            assignments,
            schema: count_schema(),
            done: false,
        })
    }
}

impl Executor for UpdateExec {
    fn open(&mut self) -> Result<()> {
        self.child.open()?;
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let mut count = 0i32;
        while let Some(tuple) = self.child.next()? {
            let rid = tuple
                .rid
                .ok_or_else(|| DbError::Other("Update source lost its rids".to_string()))?;
            let input = self.child.schema();
            let mut new_data = tuple.data.clone();
            for (col, value) in &self.assignments {
                let column = &input.columns()[*col];
                value.encode_into(&mut new_data[column.offset..column.offset + column.len])?;
            }
            self.heap.update(&self.txn, rid, &new_data)?;
            for index in &self.indexes {
                index.delete_for_tuple(&tuple.data, rid)?;
                index.insert_with_txn(&self.txn, &new_data, rid)?;
            }
            count += 1;
        }
        let data = self.schema.encode_tuple(&[Value::Int(count)])?;
        Ok(Some(Tuple::new(data)))
    }

    fn close(&mut self) -> Result<()> {
        self.child.close()
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

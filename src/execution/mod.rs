mod aggregate;
mod dml;
mod expr;
mod filter;
mod index_scan;
mod merge_join;
mod nested_loop_join;
mod projection;
mod seq_scan;
mod sort;
mod values;

pub use aggregate::{AggFunc, AggregateExec};
pub use dml::{DeleteExec, InsertExec, UpdateExec};
pub use expr::{CompOp, Condition, Operand};
pub use filter::FilterExec;
pub use index_scan::IndexScanExec;
pub use merge_join::MergeJoinExec;
pub use nested_loop_join::NestedLoopJoinExec;
pub use projection::ProjectionExec;
pub use seq_scan::SeqScanExec;
pub use sort::{SortExec, SortKey};
pub use values::ValuesExec;

use std::sync::Arc;

use crate::catalog::{Catalog, Schema, TableRegistry};
use crate::common::{DatabaseConfig, Result, Rid};
use crate::transaction::TransactionManager;

/// A materialized row moving through an operator tree, with the rid it came
/// from when it was produced by a scan (consumed by DELETE/UPDATE).
#[derive(Debug, Clone)]
pub struct Tuple {
    pub data: Vec<u8>,
    pub rid: Option<Rid>,
}

impl Tuple {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, rid: None }
    }

    pub fn with_rid(data: Vec<u8>, rid: Rid) -> Self {
        Self {
            data,
            rid: Some(rid),
        }
    }
}

/// The pull contract every operator satisfies. `close` must release pins,
/// cursors and temp files on every exit path, including errors.
pub trait Executor: Send {
    fn open(&mut self) -> Result<()>;
    fn next(&mut self) -> Result<Option<Tuple>>;
    fn close(&mut self) -> Result<()>;
    fn schema(&self) -> &Schema;

    fn tuple_len(&self) -> usize {
        self.schema().tuple_len()
    }
}

pub type BoxedExecutor = Box<dyn Executor>;

/// Everything an operator needs from the engine, bundled for the portal.
pub struct ExecContext {
    pub catalog: Arc<Catalog>,
    pub registry: Arc<TableRegistry>,
    pub txns: Arc<TransactionManager>,
    pub config: DatabaseConfig,
}

/// Drives an operator tree to completion, closing it on every exit path.
pub fn run(exec: &mut dyn Executor) -> Result<Vec<Tuple>> {
    exec.open()?;
    let mut rows = Vec::new();
    let pull = loop {
        match exec.next() {
            Ok(Some(tuple)) => rows.push(tuple),
            Ok(None) => break Ok(rows),
            Err(e) => break Err(e),
        }
    };
    let closed = exec.close();
    let rows = pull?;
    closed?;
    Ok(rows)
}

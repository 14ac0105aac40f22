use crate::catalog::Schema;
use crate::common::Result;
use crate::execution::{BoxedExecutor, Executor, Tuple};

/// Projection onto a subset of the child's columns, re-laid-out
/// contiguously.
pub struct ProjectionExec {
    child: BoxedExecutor,
    columns: Vec<usize>,
    schema: Schema,
}

impl ProjectionExec {
    pub fn new(child: BoxedExecutor, columns: Vec<usize>) -> Self {
        let schema = child.schema().project(&columns);
        Self {
            child,
            columns,
            schema,
        }
    }
}

impl Executor for ProjectionExec {
    fn open(&mut self) -> Result<()> {
        self.child.open()
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        match self.child.next()? {
            Some(tuple) => {
                let input = self.child.schema();
                let mut data = vec![0u8; self.schema.tuple_len()];
                for (out_idx, &in_idx) in self.columns.iter().enumerate() {
                    let src = &input.columns()[in_idx];
                    let dst = &self.schema.columns()[out_idx];
                    data[dst.offset..dst.offset + dst.len]
                        .copy_from_slice(&tuple.data[src.offset..src.offset + src.len]);
                }
                Ok(Some(Tuple {
                    data,
                    rid: tuple.rid,
                }))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.child.close()
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

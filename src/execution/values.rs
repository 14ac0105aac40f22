use crate::catalog::Schema;
use crate::common::{Result, Value};
use crate::execution::{Executor, Tuple};

/// Literal rows, the source below an INSERT.
pub struct ValuesExec {
    schema: Schema,
    rows: Vec<Vec<Value>>,
    pos: usize,
}

impl ValuesExec {
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        Self {
            schema,
            rows,
            pos: 0,
        }
    }
}

impl Executor for ValuesExec {
    fn open(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.pos >= self.rows.len() {
            return Ok(None);
        }
        let data = self.schema.encode_tuple(&self.rows[self.pos])?;
        self.pos += 1;
        Ok(Some(Tuple::new(data)))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

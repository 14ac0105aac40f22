use crate::catalog::Schema;
use crate::common::Result;
use crate::execution::{BoxedExecutor, Condition, Executor, Tuple};

/// Nested-loop join: the inner side is re-opened for every outer tuple. All
/// join conditions are evaluated against the concatenated tuple.
pub struct NestedLoopJoinExec {
    left: BoxedExecutor,
    right: BoxedExecutor,
    conditions: Vec<Condition>,
    schema: Schema,
    current_left: Option<Tuple>,
    right_open: bool,
}

impl NestedLoopJoinExec {
    pub fn new(left: BoxedExecutor, right: BoxedExecutor, conditions: Vec<Condition>) -> Self {
        let schema = Schema::joined(left.schema(), right.schema());
        Self {
            left,
            right,
            conditions,
            schema,
            current_left: None,
            right_open: false,
        }
    }

    fn join_tuples(&self, left: &Tuple, right: &Tuple) -> Tuple {
        let mut data = Vec::with_capacity(left.data.len() + right.data.len());
        data.extend_from_slice(&left.data);
        data.extend_from_slice(&right.data);
        Tuple::new(data)
    }
}

impl Executor for NestedLoopJoinExec {
    fn open(&mut self) -> Result<()> {
        self.left.open()?;
        self.current_left = None;
        self.right_open = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        loop {
            if self.current_left.is_none() {
                self.current_left = self.left.next()?;
                if self.current_left.is_none() {
                    return Ok(None);
                }
                if self.right_open {
                    self.right.close()?;
                }
                self.right.open()?;
                self.right_open = true;
            }

            match self.right.next()? {
                Some(right_tuple) => {
                    let left_tuple = match &self.current_left {
                        Some(t) => t,
                        None => continue,
                    };
                    let joined = self.join_tuples(left_tuple, &right_tuple);
                    if Condition::eval_all(&self.conditions, &self.schema, &joined.data)? {
                        return Ok(Some(joined));
                    }
                }
                None => {
                    // Inner side exhausted; advance the outer side.
                    self.current_left = None;
                }
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.right_open {
            self.right.close()?;
            self.right_open = false;
        }
        self.left.close()
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

use crate::catalog::Schema;
use crate::common::Result;
use crate::execution::{BoxedExecutor, Condition, Executor, Tuple};

/// Selection: passes through the child's tuples that satisfy every
/// condition.
pub struct FilterExec {
    child: BoxedExecutor,
    conditions: Vec<Condition>,
}

impl FilterExec {
    pub fn new(child: BoxedExecutor, conditions: Vec<Condition>) -> Self {
        Self { child, conditions }
    }
}

impl Executor for FilterExec {
    fn open(&mut self) -> Result<()> {
        self.child.open()
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        loop {
            match self.child.next()? {
                Some(tuple) => {
                    if Condition::eval_all(&self.conditions, self.child.schema(), &tuple.data)? {
                        return Ok(Some(tuple));
                    }
                }
                None => return Ok(None),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.child.close()
    }

    fn schema(&self) -> &Schema {
        self.child.schema()
    }
}

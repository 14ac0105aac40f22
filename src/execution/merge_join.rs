use std::cmp::Ordering;

use crate::catalog::Schema;
use crate::common::Result;
use crate::execution::{BoxedExecutor, Condition, Executor, Tuple};

/// Sort-merge join. Both inputs arrive sorted on the merge key (the first
/// column pair of the equijoin); each run of equal keys is buffered on both
/// sides so the full cross product of the group is emitted. Any remaining
/// join predicates are applied as a residual filter on each joined pair.
pub struct MergeJoinExec {
    left: BoxedExecutor,
    right: BoxedExecutor,
    /// Merge key columns in the left and right schemas.
    left_key: usize,
    right_key: usize,
    /// Residual predicates over the joined schema.
    residual: Vec<Condition>,
    schema: Schema,
    left_buffer: Vec<Tuple>,
    right_buffer: Vec<Tuple>,
    left_index: usize,
    right_index: usize,
    left_next: Option<Tuple>,
    right_next: Option<Tuple>,
    done: bool,
}

impl MergeJoinExec {
    pub fn new(
        left: BoxedExecutor,
        right: BoxedExecutor,
        left_key: usize,
        right_key: usize,
        residual: Vec<Condition>,
    ) -> Self {
        let schema = Schema::joined(left.schema(), right.schema());
        Self {
            left,
            right,
            left_key,
            right_key,
            residual,
            schema,
            left_buffer: Vec::new(),
            right_buffer: Vec::new(),
            left_index: 0,
            right_index: 0,
            left_next: None,
            right_next: None,
            done: false,
        }
    }

    /// Compares the current left and right tuples under the merge key.
    /// String comparison is lexicographic.
    fn compare_join_keys(&self, left: &Tuple, right: &Tuple) -> Result<Ordering> {
        let lv = self.left.schema().value_at(&left.data, self.left_key);
        let rv = self.right.schema().value_at(&right.data, self.right_key);
        lv.compare(&rv)
    }

    fn join_tuples(&self, left: &Tuple, right: &Tuple) -> Tuple {
        let mut data = Vec::with_capacity(left.data.len() + right.data.len());
        data.extend_from_slice(&left.data);
        data.extend_from_slice(&right.data);
        Tuple::new(data)
    }

    /// Advances the two inputs to the next pair of equal keys and buffers the
    /// full group on both sides. Returns false when an input is exhausted.
    fn buffer_next_group(&mut self) -> Result<bool> {
        self.left_buffer.clear();
        self.right_buffer.clear();
        self.left_index = 0;
        self.right_index = 0;

        loop {
            let (left, right) = match (&self.left_next, &self.right_next) {
                (Some(l), Some(r)) => (l, r),
                _ => return Ok(false),
            };
            match self.compare_join_keys(left, right)? {
                Ordering::Less => {
                    self.left_next = self.left.next()?;
                }
                Ordering::Greater => {
                    self.right_next = self.right.next()?;
                }
                Ordering::Equal => break,
            }
        }

        // Buffer every left tuple matching the current right, then every
        // right tuple matching the current left, without copying either
        // anchor tuple.
        let anchor_right = match self.right_next.clone() {
            Some(t) => t,
            None => return Ok(false),
        };
        while let Some(left) = self.left_next.take() {
            if self.compare_join_keys(&left, &anchor_right)? != Ordering::Equal {
                self.left_next = Some(left);
                break;
            }
            self.left_buffer.push(left);
            self.left_next = self.left.next()?;
        }

        let anchor_left = match self.left_buffer.first().cloned() {
            Some(t) => t,
            None => return Ok(false),
        };
        while let Some(right) = self.right_next.take() {
            if self.compare_join_keys(&anchor_left, &right)? != Ordering::Equal {
                self.right_next = Some(right);
                break;
            }
            self.right_buffer.push(right);
            self.right_next = self.right.next()?;
        }

        Ok(!self.left_buffer.is_empty() && !self.right_buffer.is_empty())
    }
}

impl Executor for MergeJoinExec {
    fn open(&mut self) -> Result<()> {
        self.left.open()?;
        self.right.open()?;
        self.left_next = self.left.next()?;
        self.right_next = self.right.next()?;
        self.left_buffer.clear();
        self.right_buffer.clear();
        self.left_index = 0;
        self.right_index = 0;
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        loop {
            if self.left_index < self.left_buffer.len() {
                let joined = self.join_tuples(
                    &self.left_buffer[self.left_index],
                    &self.right_buffer[self.right_index],
                );
                self.right_index += 1;
                if self.right_index == self.right_buffer.len() {
                    self.right_index = 0;
                    self.left_index += 1;
                }
                if Condition::eval_all(&self.residual, &self.schema, &joined.data)? {
                    return Ok(Some(joined));
                }
                continue;
            }
            if !self.buffer_next_group()? {
                self.done = true;
                return Ok(None);
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.left_buffer.clear();
        self.right_buffer.clear();
        let left = self.left.close();
        let right = self.right.close();
        left.and(right)
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

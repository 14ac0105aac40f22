use std::cmp::Ordering;

use crate::catalog::Schema;
use crate::common::{Result, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Constant-list membership; the rhs must be a `ConstList`.
    In,
}

#[derive(Debug, Clone)]
pub enum Operand {
    Col(usize),
    Const(Value),
    ConstList(Vec<Value>),
}

/// A resolved predicate over one tuple layout: column index on the left,
/// column or constant on the right.
#[derive(Debug, Clone)]
pub struct Condition {
    pub lhs: usize,
    pub op: CompOp,
    pub rhs: Operand,
}

impl Condition {
    pub fn new(lhs: usize, op: CompOp, rhs: Operand) -> Self {
        Self { lhs, op, rhs }
    }

    pub fn eval(&self, schema: &Schema, tuple: &[u8]) -> Result<bool> {
        let lhs = schema.value_at(tuple, self.lhs);
        match (&self.op, &self.rhs) {
            (CompOp::In, Operand::ConstList(values)) => {
                for v in values {
                    if lhs.compare(v)? == Ordering::Equal {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            (op, Operand::Const(v)) => Ok(op_matches(*op, lhs.compare(v)?)),
            (op, Operand::Col(i)) => {
                let rhs = schema.value_at(tuple, *i);
                Ok(op_matches(*op, lhs.compare(&rhs)?))
            }
            (_, Operand::ConstList(_)) => Ok(false),
        }
    }

    pub fn eval_all(conditions: &[Condition], schema: &Schema, tuple: &[u8]) -> Result<bool> {
        for cond in conditions {
            if !cond.eval(schema, tuple)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn op_matches(op: CompOp, ord: Ordering) -> bool {
    match op {
        CompOp::Eq => ord == Ordering::Equal,
        CompOp::Ne => ord != Ordering::Equal,
        CompOp::Lt => ord == Ordering::Less,
        CompOp::Le => ord != Ordering::Greater,
        CompOp::Gt => ord == Ordering::Greater,
        CompOp::Ge => ord != Ordering::Less,
        CompOp::In => false,
    }
}

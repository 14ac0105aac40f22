use crate::common::{ColType, DbError, Result, Value};

/// A resolved column: type, width and byte offset within the tuple.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: ColType,
    pub len: usize,
    pub offset: usize,
}

/// Fixed-width tuple layout, column by column.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
    tuple_len: usize,
}

impl Schema {
    /// Builds a schema from (name, type, declared length) triples, laying
    /// columns out at consecutive offsets. INT and FLOAT are always 4 bytes.
    pub fn new(cols: Vec<(String, ColType, usize)>) -> Self {
        let mut columns = Vec::with_capacity(cols.len());
        let mut offset = 0;
        for (name, ty, len) in cols {
            let len = match ty {
                ColType::Int | ColType::Float => 4,
                ColType::Str => len,
            };
            columns.push(Column {
                name,
                ty,
                len,
                offset,
            });
            offset += len;
        }
        Self {
            columns,
            tuple_len: offset,
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn tuple_len(&self) -> usize {
        self.tuple_len
    }

    pub fn col_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| DbError::ColumnNotFound(name.to_string()))
    }

    pub fn value_at(&self, tuple: &[u8], idx: usize) -> Value {
        let col = &self.columns[idx];
        Value::decode(col.ty, &tuple[col.offset..col.offset + col.len])
    }

    /// Encodes one value per column into a fresh tuple buffer.
    pub fn encode_tuple(&self, values: &[Value]) -> Result<Vec<u8>> {
        if values.len() != self.columns.len() {
            return Err(DbError::Other(format!(
                "Expected {} values, got {}",
                self.columns.len(),
                values.len()
            )));
        }
        let mut tuple = vec![0u8; self.tuple_len];
        for (col, value) in self.columns.iter().zip(values) {
            if value.col_type() != col.ty
                && !(col.ty == ColType::Float && value.col_type() == ColType::Int)
            {
                return Err(DbError::IncompatibleType(
                    col.ty.to_string(),
                    value.col_type().to_string(),
                ));
            }
            let widened;
            let value = if col.ty == ColType::Float && value.col_type() == ColType::Int {
                widened = match value {
                    Value::Int(v) => Value::Float(*v as f32),
                    _ => value.clone(),
                };
                &widened
            } else {
                value
            };
            value.encode_into(&mut tuple[col.offset..col.offset + col.len])?;
        }
        Ok(tuple)
    }

    pub fn decode_tuple(&self, tuple: &[u8]) -> Vec<Value> {
        (0..self.columns.len())
            .map(|i| self.value_at(tuple, i))
            .collect()
    }

    /// Concatenation for joins: right columns shifted past the left tuple.
    pub fn joined(left: &Schema, right: &Schema) -> Schema {
        let mut columns = left.columns.clone();
        for col in &right.columns {
            let mut col = col.clone();
            col.offset += left.tuple_len;
            columns.push(col);
        }
        Schema {
            columns,
            tuple_len: left.tuple_len + right.tuple_len,
        }
    }

    /// Projection onto a subset of columns, re-laid-out contiguously.
    pub fn project(&self, indexes: &[usize]) -> Schema {
        let mut columns = Vec::with_capacity(indexes.len());
        let mut offset = 0;
        for &i in indexes {
            let mut col = self.columns[i].clone();
            col.offset = offset;
            offset += col.len;
            columns.push(col);
        }
        Schema {
            columns,
            tuple_len: offset,
        }
    }
}

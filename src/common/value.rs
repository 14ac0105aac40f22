use crate::common::{DbError, Result};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Column type. Strings are fixed-length, right-padded with NUL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ColType {
    Int,
    Float,
    Str,
}

impl std::fmt::Display for ColType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColType::Int => write!(f, "INT"),
            ColType::Float => write!(f, "FLOAT"),
            ColType::Str => write!(f, "STRING"),
        }
    }
}

/// A single column value.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i32),
    Float(f32),
    Str(String),
}

impl Value {
    pub fn col_type(&self) -> ColType {
        match self {
            Value::Int(_) => ColType::Int,
            Value::Float(_) => ColType::Float,
            Value::Str(_) => ColType::Str,
        }
    }

    /// Encodes the value into a fixed-width column slot.
    pub fn encode_into(&self, out: &mut [u8]) -> Result<()> {
        match self {
            Value::Int(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
            Value::Float(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
            Value::Str(s) => {
                let bytes = s.as_bytes();
                if bytes.len() > out.len() {
                    return Err(DbError::Other(format!(
                        "String of length {} exceeds column width {}",
                        bytes.len(),
                        out.len()
                    )));
                }
                out[..bytes.len()].copy_from_slice(bytes);
                out[bytes.len()..].fill(0);
            }
        }
        Ok(())
    }

    /// Decodes a value from a fixed-width column slot.
    pub fn decode(ty: ColType, raw: &[u8]) -> Value {
        match ty {
            ColType::Int => Value::Int(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
            ColType::Float => Value::Float(f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
            ColType::Str => {
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                Value::Str(String::from_utf8_lossy(&raw[..end]).into_owned())
            }
        }
    }

    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => Ok(a.total_cmp(b)),
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            // Int/float comparisons widen to float.
            (Value::Int(a), Value::Float(b)) => Ok((*a as f32).total_cmp(b)),
            (Value::Float(a), Value::Int(b)) => Ok(a.total_cmp(&(*b as f32))),
            (a, b) => Err(DbError::IncompatibleType(
                a.col_type().to_string(),
                b.col_type().to_string(),
            )),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        // Variant-strict so that Eq stays consistent with Hash.
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b) == Ordering::Equal,
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Int(v) => {
                0u8.hash(state);
                v.hash(state);
            }
            Value::Float(v) => {
                1u8.hash(state);
                v.to_bits().hash(state);
            }
            Value::Str(s) => {
                2u8.hash(state);
                s.hash(state);
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

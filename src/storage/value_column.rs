//! Type-specialized value columns.

use serde::{Deserialize, Serialize};

use crate::data::{DataType, Value};
use crate::{Result, StrataError};

/// A dense, append-only vector of values, one variant per column data type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ValueColumn {
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    String(Vec<String>),
}

impl ValueColumn {
    /// Create an empty column of the given type with room for `capacity` rows.
    pub fn with_capacity(data_type: DataType, capacity: usize) -> Self {
        match data_type {
            DataType::Int32 => ValueColumn::Int32(Vec::with_capacity(capacity)),
            DataType::Int64 => ValueColumn::Int64(Vec::with_capacity(capacity)),
            DataType::Float => ValueColumn::Float(Vec::with_capacity(capacity)),
            DataType::Double => ValueColumn::Double(Vec::with_capacity(capacity)),
            DataType::String => ValueColumn::String(Vec::with_capacity(capacity)),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ValueColumn::Int32(_) => DataType::Int32,
            ValueColumn::Int64(_) => DataType::Int64,
            ValueColumn::Float(_) => DataType::Float,
            ValueColumn::Double(_) => DataType::Double,
            ValueColumn::String(_) => DataType::String,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            ValueColumn::Int32(v) => v.len(),
            ValueColumn::Int64(v) => v.len(),
            ValueColumn::Float(v) => v.len(),
            ValueColumn::Double(v) => v.len(),
            ValueColumn::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Read the value at `offset`. Panics if out of range, like indexing.
    pub fn get(&self, offset: usize) -> Value {
        match self {
            ValueColumn::Int32(v) => Value::Int32(v[offset]),
            ValueColumn::Int64(v) => Value::Int64(v[offset]),
            ValueColumn::Float(v) => Value::Float(v[offset]),
            ValueColumn::Double(v) => Value::Double(v[offset]),
            ValueColumn::String(v) => Value::String(v[offset].clone()),
        }
    }

    /// Append a value; the value's tag must match the column type.
    pub fn push(&mut self, value: Value) -> Result<()> {
        match (self, value) {
            (ValueColumn::Int32(v), Value::Int32(x)) => v.push(x),
            (ValueColumn::Int64(v), Value::Int64(x)) => v.push(x),
            (ValueColumn::Float(v), Value::Float(x)) => v.push(x),
            (ValueColumn::Double(v), Value::Double(x)) => v.push(x),
            (ValueColumn::String(v), Value::String(x)) => v.push(x),
            (col, value) => {
                return Err(StrataError::TypeMismatch(format!(
                    "cannot append {:?} to a {} column",
                    value,
                    col.data_type()
                )))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_get() {
        let mut col = ValueColumn::with_capacity(DataType::Int64, 4);
        col.push(Value::Int64(10)).unwrap();
        col.push(Value::Int64(20)).unwrap();

        assert_eq!(col.size(), 2);
        assert_eq!(col.get(0), Value::Int64(10));
        assert_eq!(col.get(1), Value::Int64(20));
        assert_eq!(col.data_type(), DataType::Int64);
    }

    #[test]
    fn test_push_wrong_type() {
        let mut col = ValueColumn::with_capacity(DataType::Int32, 4);
        let err = col.push(Value::String("oops".to_string()));
        assert!(matches!(err, Err(StrataError::TypeMismatch(_))));
        assert!(col.is_empty());
    }

    #[test]
    fn test_string_column() {
        let mut col = ValueColumn::with_capacity(DataType::String, 2);
        col.push(Value::from("FOO")).unwrap();
        assert_eq!(col.get(0), Value::from("FOO"));
    }
}

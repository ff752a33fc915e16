//! The unified value model.
//!
//! Statements bind [`Value`]s as parameters and produce [`MappedRow`]s of
//! `Value`s as results. The model is deliberately small: the five scalar
//! kinds every supported backend can represent, plus NULL. Conversion into
//! domain types happens through [`FromValue`] and [`FromMappedRow`].

use crate::error::{MapResult, MapperError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A database value in the mapper's unified type system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// Logical type of a non-null [`Value`]. Used by parameter specs and
/// result-shape field bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Text,
    Blob,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Bool => write!(f, "bool"),
            ValueType::Int => write!(f, "int"),
            ValueType::Float => write!(f, "float"),
            ValueType::Text => write!(f, "text"),
            ValueType::Blob => write!(f, "blob"),
        }
    }
}

impl Value {
    /// The logical type of this value, or `None` for NULL.
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ValueType::Bool),
            Value::Int(_) => Some(ValueType::Int),
            Value::Float(_) => Some(ValueType::Float),
            Value::Text(_) => Some(ValueType::Text),
            Value::Blob(_) => Some(ValueType::Blob),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Coerce this value to the given logical type.
    ///
    /// NULL passes through untouched. Lossless widenings (int to float) and
    /// the usual SQLite-isms (0/1 integers as booleans, numeric text) are
    /// accepted; anything else is an error. Callers wrap the error with the
    /// statement context.
    pub fn coerce(&self, target: ValueType) -> Result<Value, String> {
        if self.is_null() {
            return Ok(Value::Null);
        }
        match (self, target) {
            (Value::Bool(v), ValueType::Bool) => Ok(Value::Bool(*v)),
            (Value::Int(v), ValueType::Bool) if *v == 0 || *v == 1 => Ok(Value::Bool(*v == 1)),
            (Value::Bool(v), ValueType::Int) => Ok(Value::Int(i64::from(*v))),
            (Value::Int(v), ValueType::Int) => Ok(Value::Int(*v)),
            (Value::Float(v), ValueType::Int) if v.fract() == 0.0 => Ok(Value::Int(*v as i64)),
            (Value::Text(s), ValueType::Int) => s
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| format!("cannot convert text '{}' to int", s)),
            (Value::Int(v), ValueType::Float) => Ok(Value::Float(*v as f64)),
            (Value::Float(v), ValueType::Float) => Ok(Value::Float(*v)),
            (Value::Text(s), ValueType::Float) => s
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| format!("cannot convert text '{}' to float", s)),
            (Value::Text(s), ValueType::Text) => Ok(Value::Text(s.clone())),
            (Value::Int(v), ValueType::Text) => Ok(Value::Text(v.to_string())),
            (Value::Float(v), ValueType::Text) => Ok(Value::Text(v.to_string())),
            (Value::Bool(v), ValueType::Text) => Ok(Value::Text(v.to_string())),
            (Value::Blob(v), ValueType::Blob) => Ok(Value::Blob(v.clone())),
            (other, target) => Err(format!(
                "cannot convert {} to {}",
                other
                    .value_type()
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "null".to_string()),
                target
            )),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

/// Build a positional parameter list from Rust values.
///
/// ```
/// use sqlmapper::params;
/// let args = params![42i64, "title", 3.5];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        Vec::<$crate::value::Value>::new()
    };
    ($($v:expr),+ $(,)?) => {
        vec![$($crate::value::Value::from($v)),+]
    };
}

/// Conversion from a single mapped value into a Rust type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> MapResult<Self>;
}

fn conversion_error(value: &Value, target: &str) -> MapperError {
    MapperError::internal(format!("cannot read {:?} as {}", value, target))
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> MapResult<Self> {
        match value {
            Value::Int(v) => Ok(*v),
            Value::Bool(v) => Ok(i64::from(*v)),
            other => Err(conversion_error(other, "i64")),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> MapResult<Self> {
        match value {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => Err(conversion_error(other, "f64")),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> MapResult<Self> {
        match value {
            Value::Bool(v) => Ok(*v),
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            other => Err(conversion_error(other, "bool")),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> MapResult<Self> {
        match value {
            Value::Text(v) => Ok(v.clone()),
            Value::Int(v) => Ok(v.to_string()),
            Value::Float(v) => Ok(v.to_string()),
            other => Err(conversion_error(other, "String")),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> MapResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// One result row, with column order preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MappedRow {
    columns: Vec<String>,
    values: HashMap<String, Value>,
}

impl MappedRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: Vec<(String, Value)>) -> Self {
        let mut row = Self::new();
        for (name, value) in pairs {
            row.insert(name, value);
        }
        row
    }

    /// Insert a column. Later inserts with the same name overwrite the value
    /// but keep the original column position.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if !self.values.contains_key(&name) {
            self.columns.push(name.clone());
        }
        self.values.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Typed access to a column, treating a missing column as NULL.
    pub fn read<T: FromValue>(&self, name: &str) -> MapResult<T> {
        T::from_value(self.values.get(name).unwrap_or(&Value::Null))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// First column's value, if the row has any columns.
    pub fn first(&self) -> Option<&Value> {
        self.columns.first().and_then(|c| self.values.get(c))
    }

    /// Decode the row into a deserializable type via serde.
    ///
    /// This is the default object instantiation strategy; implement
    /// [`FromMappedRow`] directly for custom construction.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> MapResult<T> {
        let json = serde_json::to_value(&self.values)
            .map_err(|e| MapperError::internal(format!("row serialization failed: {}", e)))?;
        serde_json::from_value(json)
            .map_err(|e| MapperError::internal(format!("row decoding failed: {}", e)))
    }
}

/// Conversion from a mapped result row into a domain object.
pub trait FromMappedRow: Sized {
    fn from_mapped_row(row: &MappedRow) -> MapResult<Self>;
}

impl FromMappedRow for MappedRow {
    fn from_mapped_row(row: &MappedRow) -> MapResult<Self> {
        Ok(row.clone())
    }
}

//! # Records
//!
//! Typed tuples and the shape descriptor external adapters hand to the engine.
//! The engine never interprets a [`Schema`]; it travels with a
//! [`TupleCursor`] so that sinks and adapters can label columns.

use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Column type.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
  /// Missing value.
  Null,
  /// Boolean.
  Bool,
  /// Signed 64-bit integer.
  Int,
  /// 64-bit float.
  Float,
  /// UTF-8 text.
  Text,
}

/// A single column value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
  /// Missing value.
  Null,
  /// Boolean.
  Bool(bool),
  /// Signed integer.
  Int(i64),
  /// Float. NaN never equals itself.
  Float(f64),
  /// Text.
  Text(String),
}

impl Value {
  /// Type of this value.
  pub fn data_type(&self) -> DataType {
    match self {
      Value::Null => DataType::Null,
      Value::Bool(_) => DataType::Bool,
      Value::Int(_) => DataType::Int,
      Value::Float(_) => DataType::Float,
      Value::Text(_) => DataType::Text,
    }
  }

  /// Integer content, if any.
  pub fn as_int(&self) -> Option<i64> {
    match self {
      Value::Int(value) => Some(*value),
      _ => None,
    }
  }

  /// Text content, if any.
  pub fn as_text(&self) -> Option<&str> {
    match self {
      Value::Text(value) => Some(value),
      _ => None,
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Null => f.write_str("NULL"),
      Value::Bool(value) => write!(f, "{value}"),
      Value::Int(value) => write!(f, "{value}"),
      Value::Float(value) => write!(f, "{value}"),
      Value::Text(value) => f.write_str(value),
    }
  }
}

impl From<i64> for Value {
  fn from(value: i64) -> Self {
    Value::Int(value)
  }
}

impl From<bool> for Value {
  fn from(value: bool) -> Self {
    Value::Bool(value)
  }
}

impl From<f64> for Value {
  fn from(value: f64) -> Self {
    Value::Float(value)
  }
}

impl From<&str> for Value {
  fn from(value: &str) -> Self {
    Value::Text(value.to_owned())
  }
}

impl From<String> for Value {
  fn from(value: String) -> Self {
    Value::Text(value)
  }
}

/// A row of values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Tuple(Vec<Value>);

impl Tuple {
  /// Creates a tuple from its values.
  pub fn new(values: Vec<Value>) -> Self {
    Self(values)
  }

  /// Value at `column`.
  pub fn get(&self, column: usize) -> Option<&Value> {
    self.0.get(column)
  }

  /// Number of values.
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// Returns true for the empty tuple.
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// All values.
  pub fn values(&self) -> &[Value] {
    &self.0
  }

  /// Reads `column` as a timestamp: a non-negative integer.
  pub fn timestamp(&self, column: usize) -> Option<Timestamp> {
    self
      .get(column)
      .and_then(Value::as_int)
      .and_then(|value| Timestamp::try_from(value).ok())
  }
}

impl From<Vec<Value>> for Tuple {
  fn from(values: Vec<Value>) -> Self {
    Self(values)
  }
}

/// Name and type of one column.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Column {
  /// Column name.
  pub name: String,
  /// Column type.
  pub data_type: DataType,
}

impl Column {
  /// Creates a column.
  pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
    Self {
      name: name.into(),
      data_type,
    }
  }
}

/// Ordered column descriptors of a tuple shape.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Schema {
  columns: Vec<Column>,
}

impl Schema {
  /// Creates a schema.
  pub fn new(columns: Vec<Column>) -> Self {
    Self { columns }
  }

  /// Columns in order.
  pub fn columns(&self) -> &[Column] {
    &self.columns
  }

  /// Position of the column called `name`.
  pub fn index_of(&self, name: &str) -> Option<usize> {
    self.columns.iter().position(|column| column.name == name)
  }

  /// Returns true if `tuple` has one value per column, each of the declared
  /// type or null.
  pub fn conforms(&self, tuple: &Tuple) -> bool {
    tuple.len() == self.columns.len()
      && self
        .columns
        .iter()
        .zip(tuple.values())
        .all(|(column, value)| value.data_type() == column.data_type || *value == Value::Null)
  }
}

/// Pull-style iterator of tuples with their shape, used to seed sources.
pub struct TupleCursor {
  schema: Arc<Schema>,
  rows: Box<dyn Iterator<Item = Tuple> + Send>,
}

impl TupleCursor {
  /// Creates a cursor over `rows`.
  pub fn new<I>(schema: Schema, rows: I) -> Self
  where
    I: IntoIterator<Item = Tuple>,
    I::IntoIter: Send + 'static,
  {
    Self {
      schema: Arc::new(schema),
      rows: Box::new(rows.into_iter()),
    }
  }

  /// Shape of the rows.
  pub fn schema(&self) -> &Arc<Schema> {
    &self.schema
  }
}

impl Iterator for TupleCursor {
  type Item = Tuple;

  fn next(&mut self) -> Option<Tuple> {
    self.rows.next()
  }
}

impl fmt::Debug for TupleCursor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TupleCursor").field("schema", &self.schema).finish_non_exhaustive()
  }
}

//! Structured record batches.

use super::traits::{Defaults, Element, ElementKind};
use crate::defaults;
use std::fmt;
use std::sync::Arc;

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Floating point number.
    Double(f64),
    /// UTF-8 string.
    String(Arc<str>),
    /// Opaque bytes.
    Bytes(bytes::Bytes),
}

impl Value {
    fn approx_bytes(&self) -> u64 {
        match self {
            Value::Null | Value::Bool(_) => 1,
            Value::Int(_) | Value::UInt(_) | Value::Double(_) => 8,
            Value::String(s) => s.len() as u64,
            Value::Bytes(b) => b.len() as u64,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

/// A row of values, one per schema field.
pub type Row = Vec<Value>;

/// Name and field names shared by all rows of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Schema {
    name: String,
    fields: Vec<String>,
}

impl Schema {
    /// Create a schema.
    pub fn new(name: impl Into<String>, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Schema name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field names in column order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Column index of a field.
    pub fn index_of(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == field)
    }
}

/// A batch of rows sharing one schema.
///
/// Batches are views into shared row storage. Splitting and cloning never
/// copy rows.
#[derive(Clone)]
pub struct RecordBatch {
    schema: Arc<Schema>,
    rows: Arc<[Row]>,
    offset: usize,
    len: usize,
}

impl RecordBatch {
    /// Create a batch from rows.
    pub fn new(schema: Arc<Schema>, rows: Vec<Row>) -> Self {
        let len = rows.len();
        Self {
            schema,
            rows: rows.into(),
            offset: 0,
            len,
        }
    }

    /// An empty batch of the given schema.
    pub fn empty(schema: Arc<Schema>) -> Self {
        Self::new(schema, Vec::new())
    }

    /// The batch schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Number of rows.
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.len
    }

    /// Whether the batch holds no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Rows of this view.
    pub fn rows(&self) -> &[Row] {
        &self.rows[self.offset..self.offset + self.len]
    }

    /// Value of `field` in row `row`.
    pub fn value(&self, row: usize, field: &str) -> Option<&Value> {
        let column = self.schema.index_of(field)?;
        self.rows().get(row)?.get(column)
    }

    fn view(&self, offset: usize, len: usize) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            rows: Arc::clone(&self.rows),
            offset: self.offset + offset,
            len,
        }
    }
}

impl fmt::Debug for RecordBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordBatch")
            .field("schema", &self.schema.name())
            .field("rows", &self.len)
            .finish()
    }
}

impl Defaults for RecordBatch {
    const MAX_BATCH_SIZE: u64 = defaults::EVENTS_MAX_BATCH_SIZE;
    const MIN_BATCH_SIZE: u64 = defaults::EVENTS_MIN_BATCH_SIZE;
    const MAX_BUFFERED: u64 = defaults::EVENTS_MAX_BUFFERED;
}

impl Element for RecordBatch {
    const KIND: ElementKind = ElementKind::Events;

    #[inline]
    fn size(&self) -> u64 {
        self.len as u64
    }

    fn split(self, at: u64) -> (Self, Self) {
        let at = (at.min(self.len as u64)) as usize;
        (self.view(0, at), self.view(at, self.len - at))
    }

    fn approx_bytes(&self) -> u64 {
        self.rows()
            .iter()
            .flat_map(|row| row.iter())
            .map(Value::approx_bytes)
            .sum()
    }
}

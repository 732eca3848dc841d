//! StoredRecord - the closed set of value shapes the store persists.
//!
//! Every shape a value can take is a variant here, so an unexpected shape
//! cannot be serialized at all. Payloads with no fixed shape use
//! [`StoredRecord::Blob`].

use serde::{Deserialize, Serialize};

/// Pointer to a de-duplicated value held in a separate value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueStoreKey {
    /// Hash of the referenced value.
    pub value_hash: u64,
    /// Disambiguates values whose hashes collide.
    pub unique_id: u16,
}

/// A value that applies to every key in the inclusive range `from..=to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeEntry {
    pub from: i64,
    pub to: i64,
    pub value: ValueStoreKey,
}

impl RangeEntry {
    #[inline]
    pub fn contains(&self, key: i64) -> bool {
        self.from <= key && key <= self.to
    }
}

/// One field of a cached result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Long(i64),
    Double(f64),
    Text(String),
    /// Epoch millis.
    Date(i64),
    Nested(Vec<FieldValue>),
}

/// A row of a cached search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    /// Encoded group key, `None` for ungrouped rows.
    pub group_key: Option<Vec<u8>>,
    /// Nesting depth of the group.
    pub depth: u16,
    pub values: Vec<FieldValue>,
}

/// A value persisted by the store.
///
/// Encoded compactly: only the variant index is written as a tag, field
/// layout is implied by the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredRecord {
    /// A reference value held inline.
    StringValue(String),
    /// A reference value held in the value store.
    ValueRef(ValueStoreKey),
    /// A reference value for a numeric key range.
    Range(RangeEntry),
    /// A cached result row.
    Row(ResultRow),
    /// Opaque bytes.
    Blob(Vec<u8>),
}

impl StoredRecord {
    /// Short variant name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StoredRecord::StringValue(_) => "string_value",
            StoredRecord::ValueRef(_) => "value_ref",
            StoredRecord::Range(_) => "range",
            StoredRecord::Row(_) => "row",
            StoredRecord::Blob(_) => "blob",
        }
    }
}

impl From<String> for StoredRecord {
    fn from(value: String) -> Self {
        StoredRecord::StringValue(value)
    }
}

impl From<&str> for StoredRecord {
    fn from(value: &str) -> Self {
        StoredRecord::StringValue(value.to_owned())
    }
}

impl From<Vec<u8>> for StoredRecord {
    fn from(bytes: Vec<u8>) -> Self {
        StoredRecord::Blob(bytes)
    }
}

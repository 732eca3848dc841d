//! Value serialization.
//!
//! # Components
//! - [`StoredRecord`] - Sum type over every persisted value shape
//! - [`SerdePool`] - Pool of reusable record codecs
//! - [`SerdeLease`] - Scoped borrow of one codec

mod pool;
mod record;

pub use pool::{SerdeLease, SerdePool};
pub use record::{FieldValue, RangeEntry, ResultRow, StoredRecord, ValueStoreKey};

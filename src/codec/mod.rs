//! Composite key encoding for the ordered store.
//!
//! - [`TemporalKey`] - `(text, time_ms)` keys whose encoded bytes sort by
//!   text, then by time

pub mod temporal_key;

pub use temporal_key::{decode_parts, encode, encode_into, history_range, prefix_bytes, TemporalKey};

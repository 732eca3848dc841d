//! TemporalKey - a `(text, time)` composite key with byte-wise ordering.
//!
//! Encoded layout:
//! ```text
//! ┌──────────────────────┬──────┬────────────────────────┐
//! │ UTF-8 text (n bytes) │ 0x00 │ time_ms, i64 big-endian│
//! └──────────────────────┴──────┴────────────────────────┘
//!   0                    n      n+1                  n+9
//! ```
//!
//! The delimiter sorts below every byte of valid text, so encoded keys order
//! first by text. For one text, keys order by time as long as the times
//! share a sign; negative times are two's complement and sort after every
//! non-negative time.

use std::fmt;

use crate::buffer::PooledBuffer;
use crate::common::config::{TEMPORAL_KEY_DELIMITER, TEMPORAL_KEY_SUFFIX_LEN};
use crate::common::{Error, Result};

/// A logical key: a text identifier at a point in time (epoch millis).
///
/// Equality, hashing and `Ord` are over the `(text, time_ms)` pair and do
/// not depend on the encoding.
///
/// # Example
/// ```
/// use refstore::codec::TemporalKey;
///
/// let key = TemporalKey::new("metric-a", 1000).unwrap();
/// let bytes = key.encode();
/// assert_eq!(bytes.len(), "metric-a".len() + 9);
/// assert_eq!(TemporalKey::decode(&bytes).unwrap(), key);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemporalKey {
    text: String,
    time_ms: i64,
}

impl TemporalKey {
    /// Create a key.
    ///
    /// # Errors
    /// Returns `Error::InvalidKeyFormat` if `text` contains a NUL byte.
    pub fn new(text: impl Into<String>, time_ms: i64) -> Result<Self> {
        let text = text.into();
        check_text(&text)?;
        Ok(Self { text, time_ms })
    }

    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[inline]
    pub fn time_ms(&self) -> i64 {
        self.time_ms
    }

    /// Length of the encoded form.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        encoded_len(&self.text)
    }

    /// Encode into a newly allocated vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(self.text.as_bytes());
        out.push(TEMPORAL_KEY_DELIMITER);
        out.extend_from_slice(&self.time_ms.to_be_bytes());
        out
    }

    /// Append the encoded form to `buffer` without allocating.
    ///
    /// # Errors
    /// Returns `Error::BufferOverflow` if it does not fit.
    pub fn encode_into(&self, buffer: &mut PooledBuffer) -> Result<()> {
        write_parts(&self.text, self.time_ms, buffer)
    }

    /// Decode an owned key.
    ///
    /// # Errors
    /// Returns `Error::InvalidKeyFormat` for anything `encode` could not
    /// have produced.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (text, time_ms) = decode_parts(bytes)?;
        Ok(Self {
            text: text.to_owned(),
            time_ms,
        })
    }

    pub fn into_parts(self) -> (String, i64) {
        (self.text, self.time_ms)
    }
}

impl fmt::Display for TemporalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.text, self.time_ms)
    }
}

/// Encoded length for a text of this size.
#[inline]
pub fn encoded_len(text: &str) -> usize {
    text.len() + TEMPORAL_KEY_SUFFIX_LEN
}

/// Encode `(text, time_ms)` into a new vector.
///
/// # Errors
/// Returns `Error::InvalidKeyFormat` if `text` contains a NUL byte.
pub fn encode(text: &str, time_ms: i64) -> Result<Vec<u8>> {
    check_text(text)?;
    let mut out = Vec::with_capacity(encoded_len(text));
    out.extend_from_slice(text.as_bytes());
    out.push(TEMPORAL_KEY_DELIMITER);
    out.extend_from_slice(&time_ms.to_be_bytes());
    Ok(out)
}

/// Append the encoding of `(text, time_ms)` to a pooled buffer.
///
/// # Errors
/// Returns `Error::InvalidKeyFormat` if `text` contains a NUL byte, or
/// `Error::BufferOverflow` if the key does not fit. The buffer is left
/// untouched in either case.
pub fn encode_into(text: &str, time_ms: i64, buffer: &mut PooledBuffer) -> Result<()> {
    check_text(text)?;
    write_parts(text, time_ms, buffer)
}

/// Borrowing decode: the text points into `bytes`.
///
/// # Errors
/// Returns `Error::InvalidKeyFormat` if the input is shorter than the fixed
/// suffix, the delimiter is missing, or the text is not NUL-free UTF-8.
pub fn decode_parts(bytes: &[u8]) -> Result<(&str, i64)> {
    if bytes.len() < TEMPORAL_KEY_SUFFIX_LEN {
        return Err(Error::invalid_key(format!(
            "expected at least {} bytes, got {}",
            TEMPORAL_KEY_SUFFIX_LEN,
            bytes.len()
        )));
    }

    let delimiter_at = bytes.len() - TEMPORAL_KEY_SUFFIX_LEN;
    if bytes[delimiter_at] != TEMPORAL_KEY_DELIMITER {
        return Err(Error::invalid_key(format!(
            "expected delimiter 0x00 at offset {}, found {:#04x}",
            delimiter_at, bytes[delimiter_at]
        )));
    }

    let mut time = [0u8; 8];
    time.copy_from_slice(&bytes[delimiter_at + 1..]);

    let text = std::str::from_utf8(&bytes[..delimiter_at])
        .map_err(|e| Error::invalid_key(format!("text is not valid UTF-8: {}", e)))?;
    check_text(text)?;

    Ok((text, i64::from_be_bytes(time)))
}

/// Every key for `text` starts with these bytes.
pub fn prefix_bytes(text: &str) -> Result<Vec<u8>> {
    check_text(text)?;
    let mut prefix = Vec::with_capacity(text.len() + 1);
    prefix.extend_from_slice(text.as_bytes());
    prefix.push(TEMPORAL_KEY_DELIMITER);
    Ok(prefix)
}

/// Half-open `[start, end)` byte range holding every key for `text`.
///
/// Use as `start.as_slice()..end.as_slice()` for a range scan.
pub fn history_range(text: &str) -> Result<(Vec<u8>, Vec<u8>)> {
    let start = prefix_bytes(text)?;
    let mut end = start.clone();
    if let Some(last) = end.last_mut() {
        *last = TEMPORAL_KEY_DELIMITER + 1;
    }
    Ok((start, end))
}

fn check_text(text: &str) -> Result<()> {
    match text.bytes().position(|b| b == TEMPORAL_KEY_DELIMITER) {
        Some(pos) => Err(Error::invalid_key(format!(
            "text contains a NUL byte at offset {}",
            pos
        ))),
        None => Ok(()),
    }
}

fn write_parts(text: &str, time_ms: i64, buffer: &mut PooledBuffer) -> Result<()> {
    let needed = encoded_len(text);
    if needed > buffer.remaining() {
        return Err(Error::BufferOverflow {
            capacity: buffer.capacity(),
            requested: buffer.len() + needed,
        });
    }
    buffer.put_slice(text.as_bytes())?;
    buffer.put_u8(TEMPORAL_KEY_DELIMITER)?;
    buffer.put_i64_be(time_ms)
}

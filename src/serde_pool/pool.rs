//! SerdePool - reusable record codecs.
//!
//! A codec owns a scratch vector that records are encoded into. Borrowing a
//! codec instead of building a fresh vector per call keeps the scratch
//! allocation warm across operations. Each codec serves one caller at a
//! time; the pool creates more when every idle codec is taken.
//!
//! Encoded record layout:
//! ```text
//! ┌─────────────────────────┬───────────────────────────┐
//! │ CRC32(payload), u32 LE  │ postcard(StoredRecord)    │
//! └─────────────────────────┴───────────────────────────┘
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::trace;

use crate::buffer::PooledBuffer;
use crate::common::config::RECORD_HEADER_LEN;
use crate::common::{Error, Result};
use crate::serde_pool::StoredRecord;

/// A returned codec whose scratch has grown past this is shrunk.
const MAX_RETAINED_SCRATCH: usize = 64 * 1024;

/// Initial scratch capacity of a new codec.
const INITIAL_SCRATCH: usize = 256;

/// One serializer instance.
struct RecordCodec {
    scratch: Vec<u8>,
    uses: u64,
}

impl RecordCodec {
    fn new() -> Self {
        Self {
            scratch: Vec::with_capacity(INITIAL_SCRATCH),
            uses: 0,
        }
    }

    /// Encode `record` into the scratch, header included.
    fn encode(&mut self, record: &StoredRecord) -> Result<&[u8]> {
        self.uses += 1;

        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        scratch.extend_from_slice(&[0u8; RECORD_HEADER_LEN]);
        let mut scratch = postcard::to_extend(record, scratch)?;

        let checksum = crc32fast::hash(&scratch[RECORD_HEADER_LEN..]);
        scratch[..RECORD_HEADER_LEN].copy_from_slice(&checksum.to_le_bytes());

        self.scratch = scratch;
        Ok(&self.scratch)
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<StoredRecord> {
        self.uses += 1;

        if bytes.len() < RECORD_HEADER_LEN {
            return Err(Error::Serialization {
                message: format!(
                    "record of {} bytes is shorter than its {} byte header",
                    bytes.len(),
                    RECORD_HEADER_LEN
                ),
            });
        }

        let (header, payload) = bytes.split_at(RECORD_HEADER_LEN);
        let mut expected = [0u8; RECORD_HEADER_LEN];
        expected.copy_from_slice(header);
        let expected = u32::from_le_bytes(expected);
        let actual = crc32fast::hash(payload);
        if expected != actual {
            return Err(Error::ChecksumMismatch { expected, actual });
        }

        let (record, rest) = postcard::take_from_bytes::<StoredRecord>(payload)?;
        if !rest.is_empty() {
            return Err(Error::Serialization {
                message: format!("{} trailing bytes after record", rest.len()),
            });
        }
        Ok(record)
    }

    /// Soft-clear before going back on the idle list.
    fn reset(&mut self) {
        if self.scratch.capacity() > MAX_RETAINED_SCRATCH {
            self.scratch = Vec::with_capacity(INITIAL_SCRATCH);
        } else {
            self.scratch.clear();
        }
    }
}

/// Pool of record codecs.
///
/// # Thread Safety
/// The pool is `Sync` and meant to be shared behind an `Arc`. A borrowed
/// [`SerdeLease`] is used by one thread at a time.
///
/// # Example
/// ```
/// use refstore::serde_pool::{SerdePool, StoredRecord};
///
/// let pool = SerdePool::new();
/// let record = StoredRecord::StringValue("GBR".to_string());
///
/// let bytes = pool.serialize(&record).unwrap();
/// assert_eq!(pool.deserialize(&bytes).unwrap(), record);
/// assert_eq!(pool.idle_count(), 1);
/// ```
pub struct SerdePool {
    idle: Mutex<Vec<RecordCodec>>,
    /// Idle codecs beyond this are dropped on return.
    max_idle: Option<usize>,
    created: AtomicUsize,
}

impl SerdePool {
    /// An unbounded pool.
    pub fn new() -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle: None,
            created: AtomicUsize::new(0),
        }
    }

    /// A pool that keeps at most `max_idle` idle codecs.
    pub fn with_max_idle(max_idle: usize) -> Self {
        Self {
            max_idle: Some(max_idle),
            ..Self::new()
        }
    }

    /// Borrow a codec until the lease drops.
    pub fn borrow(&self) -> SerdeLease<'_> {
        let codec = self.idle.lock().pop().unwrap_or_else(|| {
            let created = self.created.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(created, "creating record codec");
            RecordCodec::new()
        });

        SerdeLease {
            pool: self,
            codec: Some(codec),
        }
    }

    /// Encode a record into a new vector.
    pub fn serialize(&self, record: &StoredRecord) -> Result<Vec<u8>> {
        self.borrow().serialize(record)
    }

    /// Encode a record and append it to a pooled buffer.
    ///
    /// # Errors
    /// `Error::BufferOverflow` if the encoded record does not fit; the buffer
    /// is left unchanged.
    pub fn serialize_into(&self, record: &StoredRecord, buffer: &mut PooledBuffer) -> Result<()> {
        self.borrow().serialize_into(record, buffer)
    }

    /// Decode a record.
    ///
    /// # Errors
    /// `Error::ChecksumMismatch` if the header does not match the payload,
    /// `Error::Serialization` if the payload is not a valid record.
    pub fn deserialize(&self, bytes: &[u8]) -> Result<StoredRecord> {
        self.borrow().deserialize(bytes)
    }

    /// Codecs waiting to be borrowed.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Codecs created over the pool's lifetime.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    fn give_back(&self, mut codec: RecordCodec) {
        codec.reset();
        let mut idle = self.idle.lock();
        if self.max_idle.is_some_and(|max| idle.len() >= max) {
            trace!(uses = codec.uses, "idle codec limit reached, dropping codec");
            return;
        }
        idle.push(codec);
    }
}

impl Default for SerdePool {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive use of one codec. Returned to the pool on drop.
pub struct SerdeLease<'a> {
    pool: &'a SerdePool,
    codec: Option<RecordCodec>,
}

impl SerdeLease<'_> {
    fn codec(&mut self) -> Result<&mut RecordCodec> {
        self.codec.as_mut().ok_or_else(|| Error::Serialization {
            message: "codec lease already returned".to_string(),
        })
    }

    pub fn serialize(&mut self, record: &StoredRecord) -> Result<Vec<u8>> {
        Ok(self.codec()?.encode(record)?.to_vec())
    }

    pub fn serialize_into(&mut self, record: &StoredRecord, buffer: &mut PooledBuffer) -> Result<()> {
        let encoded = self.codec()?.encode(record)?;
        buffer.put_slice(encoded)
    }

    /// Encode and hand the encoded bytes to `f` without copying them out.
    pub fn with_encoded<T>(
        &mut self,
        record: &StoredRecord,
        f: impl FnOnce(&[u8]) -> Result<T>,
    ) -> Result<T> {
        let encoded = self.codec()?.encode(record)?;
        f(encoded)
    }

    pub fn deserialize(&mut self, bytes: &[u8]) -> Result<StoredRecord> {
        self.codec()?.decode(bytes)
    }
}

impl Drop for SerdeLease<'_> {
    fn drop(&mut self) {
        if let Some(codec) = self.codec.take() {
            self.pool.give_back(codec);
        }
    }
}

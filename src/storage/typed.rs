//! TypedDb - temporal keys and stored records over a [`Db`].
//!
//! Keys are encoded into buffers leased from the shared
//! [`ByteBufferPool`]; records are encoded in a codec borrowed from the
//! shared [`SerdePool`]. Both go back to their pools before a call returns.

use std::sync::Arc;

use crate::buffer::ByteBufferPool;
use crate::codec::{self, TemporalKey};
use crate::common::{Error, Result};
use crate::serde_pool::{SerdePool, StoredRecord};
use crate::storage::{Db, PutOutcome, ReadTxn, WriteTxn};

/// A `(TemporalKey, StoredRecord)` view of a named database.
///
/// # Example
/// ```
/// use std::sync::Arc;
///
/// use refstore::buffer::{build_pool, PoolStrategy};
/// use refstore::codec::TemporalKey;
/// use refstore::serde_pool::{SerdePool, StoredRecord};
/// use refstore::storage::{KeyValueStore, TypedDb};
/// use refstore::ByteBufferPoolConfig;
///
/// let dir = tempfile::tempdir().unwrap();
/// let store = KeyValueStore::open(dir.path(), 1 << 30, 4).unwrap();
/// let buffers = build_pool(PoolStrategy::SizeClass, ByteBufferPoolConfig::default()).unwrap();
/// let typed = TypedDb::new(store.open_db("fx").unwrap(), buffers, Arc::new(SerdePool::new()));
///
/// let key = TemporalKey::new("GBP", 1000).unwrap();
/// typed.put(&key, &StoredRecord::from("1.27"), true).unwrap();
///
/// let latest = store.with_read_txn(|txn| typed.latest_at(txn, "GBP", 5000)).unwrap();
/// assert_eq!(latest, Some((key, StoredRecord::from("1.27"))));
/// ```
pub struct TypedDb<'env> {
    db: Db<'env>,
    buffers: Arc<dyn ByteBufferPool>,
    serde: Arc<SerdePool>,
}

impl<'env> TypedDb<'env> {
    pub fn new(db: Db<'env>, buffers: Arc<dyn ByteBufferPool>, serde: Arc<SerdePool>) -> Self {
        Self { db, buffers, serde }
    }

    /// The untyped database underneath.
    #[inline]
    pub fn raw(&self) -> &Db<'env> {
        &self.db
    }

    /// Store `record` under `key` in its own write transaction.
    pub fn put(&self, key: &TemporalKey, record: &StoredRecord, overwrite: bool) -> Result<PutOutcome> {
        self.db
            .env()
            .with_write_txn(|txn| self.put_with_txn(txn, key, record, overwrite))
    }

    /// Store `record` under `key` inside a caller-managed transaction.
    pub fn put_with_txn(
        &self,
        txn: &mut WriteTxn<'env>,
        key: &TemporalKey,
        record: &StoredRecord,
        overwrite: bool,
    ) -> Result<PutOutcome> {
        self.buffers.with_buffer(key.encoded_len(), |key_buffer| {
            key.encode_into(key_buffer)?;
            self.serde.borrow().with_encoded(record, |value| {
                self.db
                    .put_with_txn(txn, key_buffer.as_slice(), value, overwrite)
            })
        })
    }

    /// Read the record stored under exactly `key`, in its own read transaction.
    pub fn get(&self, key: &TemporalKey) -> Result<Option<StoredRecord>> {
        self.db.env().with_read_txn(|txn| self.get_with_txn(txn, key))
    }

    pub fn get_with_txn(&self, txn: &ReadTxn<'env>, key: &TemporalKey) -> Result<Option<StoredRecord>> {
        self.buffers.with_buffer(key.encoded_len(), |key_buffer| {
            key.encode_into(key_buffer)?;
            match self.db.get_with_txn(txn, key_buffer.as_slice())? {
                Some(view) => Ok(Some(self.serde.deserialize(&view)?)),
                None => Ok(None),
            }
        })
    }

    /// Every record stored for `text`, oldest first.
    pub fn history(&self, txn: &ReadTxn<'env>, text: &str) -> Result<Vec<(TemporalKey, StoredRecord)>> {
        let (start, end) = codec::history_range(text)?;
        let mut serde = self.serde.borrow();

        self.db
            .stream_range(txn, start.as_slice()..end.as_slice(), |entries| {
                entries
                    .map(|entry| -> Result<(TemporalKey, StoredRecord)> {
                        let (key, value) = entry?;
                        Ok((TemporalKey::decode(&key)?, serde.deserialize(&value)?))
                    })
                    .collect()
            })?
    }

    /// The most recent record for `text` stored at or before `time_ms`.
    ///
    /// # Errors
    /// `Error::InvalidKeyFormat` if `time_ms` is negative: negative times do
    /// not sort below non-negative ones, so the lookup is not defined for them.
    pub fn latest_at(
        &self,
        txn: &ReadTxn<'env>,
        text: &str,
        time_ms: i64,
    ) -> Result<Option<(TemporalKey, StoredRecord)>> {
        if time_ms < 0 {
            return Err(Error::invalid_key(format!(
                "point-in-time lookups need a non-negative time, got {}",
                time_ms
            )));
        }

        let start = codec::prefix_bytes(text)?;
        self.buffers.with_buffer(codec::temporal_key::encoded_len(text), |upper| {
            codec::encode_into(text, time_ms, upper)?;
            let found = self
                .db
                .stream_range(txn, start.as_slice()..=upper.as_slice(), |mut entries| {
                    entries.next_back()
                })?;

            match found {
                Some(entry) => {
                    let (key, value) = entry?;
                    Ok(Some((TemporalKey::decode(&key)?, self.serde.deserialize(&value)?)))
                }
                None => Ok(None),
            }
        })
    }
}

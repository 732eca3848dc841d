//! Db - a named sub-database of a [`KeyValueStore`].
//!
//! Keys and values are raw bytes ordered by byte-wise comparison. Bytes
//! passed in are copied into the engine before a call returns, so callers may
//! reuse their buffers immediately. Bytes read out come back as
//! [`BytesView`]s that borrow the read transaction and are read-only.

use std::marker::PhantomData;
use std::ops::{Bound, Deref, RangeBounds};

use redb::{ReadableTable, ReadableTableMetadata, TableDefinition};
use tracing::{debug, info, trace};

use crate::buffer::{BufferLease, ByteBufferPool, PooledBuffer};
use crate::common::{Error, Result};
use crate::storage::{KeyValueStore, ReadTxn, WriteTxn};

type BytesTable<'a> = TableDefinition<'a, &'static [u8], &'static [u8]>;
type EngineGuard = redb::AccessGuard<'static, &'static [u8]>;
type EngineRange = redb::Range<'static, &'static [u8], &'static [u8]>;

/// What a put did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The key was absent and has been inserted.
    NewEntry,
    /// The key existed with a different value, which has been replaced.
    ReplacedEntry,
    /// Nothing was written: the key existed and either overwriting was not
    /// allowed or the stored value was already identical.
    Unchanged,
}

impl PutOutcome {
    /// Whether the store was modified.
    #[inline]
    pub fn is_written(&self) -> bool {
        !matches!(self, PutOutcome::Unchanged)
    }
}

// ============================================================================
// BYTE VIEWS
// ============================================================================

/// Read-only bytes owned by the storage engine.
///
/// Valid for as long as the read transaction `'t` it came from. Copy with
/// `to_vec()` to keep the bytes longer.
pub struct BytesView<'t> {
    guard: EngineGuard,
    _txn: PhantomData<&'t ()>,
}

impl BytesView<'_> {
    fn new(guard: EngineGuard) -> Self {
        Self {
            guard,
            _txn: PhantomData,
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.guard.value()
    }
}

impl Deref for BytesView<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl AsRef<[u8]> for BytesView<'_> {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl std::fmt::Debug for BytesView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BytesView").field(&self.as_bytes()).finish()
    }
}

impl PartialEq<[u8]> for BytesView<'_> {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_bytes() == other
    }
}

impl PartialEq<&[u8]> for BytesView<'_> {
    fn eq(&self, other: &&[u8]) -> bool {
        self.as_bytes() == *other
    }
}

/// Lazy ascending scan over `(key, value)` pairs.
///
/// Single pass; stop early by dropping it. Reversible with `.rev()`.
pub struct EntryIter<'t> {
    range: Option<EngineRange>,
    _txn: PhantomData<&'t ()>,
}

impl EntryIter<'_> {
    fn new(range: Option<EngineRange>) -> Self {
        Self {
            range,
            _txn: PhantomData,
        }
    }
}

/// A `(key, value)` pair read from a snapshot.
pub type Entry<'t> = (BytesView<'t>, BytesView<'t>);

fn wrap_entry<'t>(
    entry: std::result::Result<(EngineGuard, EngineGuard), redb::StorageError>,
) -> Result<Entry<'t>> {
    let (key, value) = entry?;
    Ok((BytesView::new(key), BytesView::new(value)))
}

impl<'t> Iterator for EntryIter<'t> {
    type Item = Result<Entry<'t>>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.range.as_mut()?.next()?;
        Some(wrap_entry(entry))
    }
}

impl DoubleEndedIterator for EntryIter<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let entry = self.range.as_mut()?.next_back()?;
        Some(wrap_entry(entry))
    }
}

// ============================================================================
// DB
// ============================================================================

/// Handle to a named sub-database.
///
/// # Example
/// ```
/// use refstore::storage::{KeyValueStore, PutOutcome};
///
/// let dir = tempfile::tempdir().unwrap();
/// let store = KeyValueStore::open(dir.path(), 1 << 30, 4).unwrap();
/// let db = store.open_db("countries").unwrap();
///
/// assert_eq!(db.put(b"GB", b"United Kingdom", true).unwrap(), PutOutcome::NewEntry);
/// assert_eq!(db.put(b"GB", b"Britain", false).unwrap(), PutOutcome::Unchanged);
/// assert_eq!(db.get(b"GB").unwrap().as_deref(), Some(&b"United Kingdom"[..]));
/// ```
pub struct Db<'env> {
    env: &'env KeyValueStore,
    name: String,
}

impl<'env> Db<'env> {
    pub(crate) fn new(env: &'env KeyValueStore, name: String) -> Self {
        Self { env, name }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn env(&self) -> &'env KeyValueStore {
        self.env
    }

    fn definition(&self) -> BytesTable<'_> {
        TableDefinition::new(&self.name)
    }

    fn check_env(&self, env: &KeyValueStore) -> Result<()> {
        if std::ptr::eq(env, self.env) {
            Ok(())
        } else {
            Err(Error::ForeignTransaction)
        }
    }

    fn open_read(
        &self,
        txn: &ReadTxn<'env>,
    ) -> Result<Option<redb::ReadOnlyTable<&'static [u8], &'static [u8]>>> {
        self.check_env(txn.env())?;
        match txn.inner().open_table(self.definition()) {
            Ok(table) => Ok(Some(table)),
            // Created after this snapshot was taken
            Err(redb::TableError::TableDoesNotExist(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn open_write<'t>(
        &self,
        txn: &'t mut WriteTxn<'env>,
    ) -> Result<redb::Table<'t, &'static [u8], &'static [u8]>> {
        self.check_env(txn.env())?;
        Ok(txn.inner()?.open_table(self.definition())?)
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Insert or update one entry in its own write transaction.
    ///
    /// With `overwrite = false` an existing entry is left as it is and
    /// [`PutOutcome::Unchanged`] is returned; this is not an error. Use
    /// [`insert_new`](Self::insert_new) to get an error instead.
    ///
    /// With `overwrite = true` a value byte-identical to the stored one is
    /// not rewritten either: the result is `Unchanged`, not `ReplacedEntry`,
    /// and the commit carries no change for the key.
    pub fn put(&self, key: &[u8], value: &[u8], overwrite: bool) -> Result<PutOutcome> {
        self.env
            .with_write_txn(|txn| self.put_with_txn(txn, key, value, overwrite))
    }

    /// Insert or update one entry inside a caller-managed transaction.
    pub fn put_with_txn(
        &self,
        txn: &mut WriteTxn<'env>,
        key: &[u8],
        value: &[u8],
        overwrite: bool,
    ) -> Result<PutOutcome> {
        let mut table = self.open_write(txn)?;
        put_in_table(&mut table, key, value, overwrite)
    }

    /// Insert an entry that must not exist yet.
    ///
    /// # Errors
    /// `Error::KeyExists` if the key is present; nothing is written.
    pub fn insert_new(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.env.with_write_txn(|txn| {
            match self.put_with_txn(txn, key, value, false)? {
                PutOutcome::NewEntry => Ok(()),
                _ => Err(Error::KeyExists),
            }
        })
    }

    /// Put many entries (overwriting) in one transaction. All or nothing.
    ///
    /// Returns the number of entries that changed the store.
    pub fn put_batch<I, K, V>(&self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.try_put_batch(entries.into_iter().map(Ok))
    }

    /// Like [`put_batch`](Self::put_batch) for a fallible source. The first
    /// `Err` aborts the whole batch and is returned.
    pub fn try_put_batch<I, K, V>(&self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<(K, V)>>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.env.with_write_txn(|txn| {
            let mut table = self.open_write(txn)?;
            let mut written = 0;
            for entry in entries {
                let (key, value) = entry?;
                if put_in_table(&mut table, key.as_ref(), value.as_ref(), true)?.is_written() {
                    written += 1;
                }
            }
            trace!(db = %self.name, written, "put batch");
            Ok(written)
        })
    }

    /// Change a stored value in place, in its own write transaction.
    ///
    /// See [`update_value_with_txn`](Self::update_value_with_txn).
    pub fn update_value<P, F>(&self, pool: &P, key: &[u8], update: F) -> Result<PutOutcome>
    where
        P: ByteBufferPool + ?Sized,
        F: FnOnce(&mut PooledBuffer),
    {
        self.env
            .with_write_txn(|txn| self.update_value_with_txn(txn, pool, key, update))
    }

    /// Change a stored value in place.
    ///
    /// The stored bytes are copied into a buffer from `pool` and `update`
    /// edits the copy; engine memory is never handed out for writing. The
    /// buffer's capacity is the stored length rounded up to its size class.
    /// The value is written back only if the bytes changed.
    ///
    /// # Errors
    /// `Error::KeyNotFound` if `key` is absent.
    pub fn update_value_with_txn<P, F>(
        &self,
        txn: &mut WriteTxn<'env>,
        pool: &P,
        key: &[u8],
        update: F,
    ) -> Result<PutOutcome>
    where
        P: ByteBufferPool + ?Sized,
        F: FnOnce(&mut PooledBuffer),
    {
        let mut table = self.open_write(txn)?;

        let mut copy = {
            let guard = table.get(key)?.ok_or(Error::KeyNotFound)?;
            let stored = guard.value();
            let mut copy = BufferLease::new(pool, pool.acquire(stored.len())?);
            copy.put_slice(stored)?;
            copy
        };

        update(&mut *copy);

        let changed = table
            .get(key)?
            .map_or(true, |stored| stored.value() != copy.as_slice());
        if !changed {
            return Ok(PutOutcome::Unchanged);
        }

        table.insert(key, copy.as_slice())?;
        trace!(db = %self.name, value_len = copy.len(), "updated value");
        Ok(PutOutcome::ReplacedEntry)
    }

    /// Remove an entry in its own transaction. Returns whether it existed.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.env.with_write_txn(|txn| self.delete_with_txn(txn, key))
    }

    pub fn delete_with_txn(&self, txn: &mut WriteTxn<'env>, key: &[u8]) -> Result<bool> {
        let mut table = self.open_write(txn)?;
        let existed = table.remove(key)?.is_some();
        Ok(existed)
    }

    /// Remove many entries in one transaction. All or nothing.
    ///
    /// Returns the number of keys that existed.
    pub fn delete_all<I, K>(&self, keys: I) -> Result<usize>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        self.try_delete_all(keys.into_iter().map(Ok))
    }

    /// Like [`delete_all`](Self::delete_all) for a fallible source. The
    /// first `Err` aborts the whole batch and is returned.
    pub fn try_delete_all<I, K>(&self, keys: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<K>>,
        K: AsRef<[u8]>,
    {
        self.env.with_write_txn(|txn| {
            let mut table = self.open_write(txn)?;
            let mut deleted = 0;
            for key in keys {
                let key = key?;
                if table.remove(key.as_ref())?.is_some() {
                    deleted += 1;
                }
            }
            debug!(db = %self.name, deleted, "deleted batch");
            Ok(deleted)
        })
    }

    /// Remove every entry.
    pub fn clear(&self) -> Result<()> {
        self.env.with_write_txn(|txn| {
            let raw = txn.inner()?;
            raw.delete_table(self.definition())?;
            raw.open_table(self.definition())?;
            Ok(())
        })?;
        info!(db = %self.name, "cleared database");
        Ok(())
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Read one value in its own read transaction. The value is copied out.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let txn = self.env.read_txn()?;
        let value = self.get_with_txn(&txn, key)?.map(|view| view.to_vec());
        Ok(value)
    }

    /// Read one value inside a caller-managed snapshot.
    pub fn get_with_txn<'t>(&self, txn: &'t ReadTxn<'env>, key: &[u8]) -> Result<Option<BytesView<'t>>> {
        let Some(table) = self.open_read(txn)? else {
            return Ok(None);
        };
        Ok(table.get(key)?.map(BytesView::new))
    }

    /// Whether `key` is present, in its own read transaction.
    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        let txn = self.env.read_txn()?;
        let present = self.get_with_txn(&txn, key)?.is_some();
        Ok(present)
    }

    /// Number of entries in the snapshot.
    pub fn entry_count(&self, txn: &ReadTxn<'env>) -> Result<u64> {
        match self.open_read(txn)? {
            Some(table) => Ok(table.len()?),
            None => Ok(0),
        }
    }

    /// Every entry of the snapshot.
    pub fn iter<'t>(&self, txn: &'t ReadTxn<'env>) -> Result<EntryIter<'t>> {
        self.range_iter(txn, Bound::Unbounded, Bound::Unbounded)
    }

    /// Hand every entry, in ascending key order, to `f` and return its result.
    ///
    /// `f` may stop pulling at any point.
    pub fn stream_all_entries<'t, T, F>(&self, txn: &'t ReadTxn<'env>, f: F) -> Result<T>
    where
        F: FnOnce(EntryIter<'t>) -> T,
    {
        Ok(f(self.iter(txn)?))
    }

    /// Like [`stream_all_entries`](Self::stream_all_entries), restricted to
    /// keys in `range`.
    pub fn stream_range<'t, 'k, R, T, F>(&self, txn: &'t ReadTxn<'env>, range: R, f: F) -> Result<T>
    where
        R: RangeBounds<&'k [u8]>,
        F: FnOnce(EntryIter<'t>) -> T,
    {
        let iter = self.range_iter(txn, range.start_bound().cloned(), range.end_bound().cloned())?;
        Ok(f(iter))
    }

    /// The lowest entry whose key starts with `prefix`.
    pub fn first_entry_with_prefix<'t>(
        &self,
        txn: &'t ReadTxn<'env>,
        prefix: &[u8],
    ) -> Result<Option<Entry<'t>>> {
        let mut iter = self.range_iter(txn, Bound::Included(prefix), Bound::Unbounded)?;
        match iter.next() {
            Some(Ok((key, value))) if key.starts_with(prefix) => Ok(Some((key, value))),
            Some(Err(e)) => Err(e),
            _ => Ok(None),
        }
    }

    fn range_iter<'t>(
        &self,
        txn: &'t ReadTxn<'env>,
        start: Bound<&[u8]>,
        end: Bound<&[u8]>,
    ) -> Result<EntryIter<'t>> {
        let Some(table) = self.open_read(txn)? else {
            return Ok(EntryIter::new(None));
        };
        let range = table.range::<&[u8]>((start, end))?;
        Ok(EntryIter::new(Some(range)))
    }
}

impl std::fmt::Debug for Db<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").field("name", &self.name).finish()
    }
}

fn put_in_table(
    table: &mut redb::Table<'_, &'static [u8], &'static [u8]>,
    key: &[u8],
    value: &[u8],
    overwrite: bool,
) -> Result<PutOutcome> {
    let existing = table.get(key)?.map(|stored| stored.value() == value);

    let outcome = match existing {
        None => PutOutcome::NewEntry,
        Some(_) if !overwrite => PutOutcome::Unchanged,
        Some(true) => PutOutcome::Unchanged,
        Some(false) => PutOutcome::ReplacedEntry,
    };

    if outcome.is_written() {
        table.insert(key, value)?;
    }
    trace!(key_len = key.len(), value_len = value.len(), ?outcome, "put");
    Ok(outcome)
}

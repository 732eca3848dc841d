//! Transactions against a [`KeyValueStore`].
//!
//! - [`ReadTxn`] - a consistent snapshot; never blocks writers
//! - [`WriteTxn`] - the single writer; aborted on drop unless committed
//! - [`BatchingWriteTxn`] - a writer that commits every `max_batch` items
//!
//! All three borrow the store, so it cannot be closed while any of them
//! is alive.

use tracing::{debug, trace, warn};

use crate::common::{Error, Result};
use crate::storage::{Db, KeyValueStore, PutOutcome};

/// A read-only snapshot of the store.
///
/// Byte views obtained through a `ReadTxn` borrow it and cannot outlive it.
pub struct ReadTxn<'env> {
    inner: redb::ReadTransaction,
    env: &'env KeyValueStore,
}

impl<'env> ReadTxn<'env> {
    pub(crate) fn new(inner: redb::ReadTransaction, env: &'env KeyValueStore) -> Self {
        Self { inner, env }
    }

    #[inline]
    pub(crate) fn inner(&self) -> &redb::ReadTransaction {
        &self.inner
    }

    #[inline]
    pub(crate) fn env(&self) -> &'env KeyValueStore {
        self.env
    }
}

/// The store's write transaction.
///
/// Only one exists at a time per store; beginning another blocks until the
/// current one finishes. Changes become visible on [`commit`](Self::commit).
/// Dropping without committing (including by `?` or a panic) aborts.
pub struct WriteTxn<'env> {
    /// `None` only once committed or aborted.
    inner: Option<redb::WriteTransaction>,
    env: &'env KeyValueStore,
}

impl<'env> WriteTxn<'env> {
    pub(crate) fn new(inner: redb::WriteTransaction, env: &'env KeyValueStore) -> Self {
        Self {
            inner: Some(inner),
            env,
        }
    }

    #[inline]
    pub(crate) fn inner(&self) -> Result<&redb::WriteTransaction> {
        self.inner.as_ref().ok_or(Error::TransactionClosed)
    }

    #[inline]
    pub(crate) fn env(&self) -> &'env KeyValueStore {
        self.env
    }

    /// Make every change in the transaction durable and visible.
    pub fn commit(mut self) -> Result<()> {
        let inner = self.inner.take().ok_or(Error::TransactionClosed)?;
        inner.commit()?;
        trace!("committed write transaction");
        Ok(())
    }

    /// Discard every change in the transaction.
    pub fn abort(mut self) -> Result<()> {
        let inner = self.inner.take().ok_or(Error::TransactionClosed)?;
        inner.abort()?;
        trace!("aborted write transaction");
        Ok(())
    }
}

impl Drop for WriteTxn<'_> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            debug!("write transaction dropped without commit, aborting");
            if let Err(e) = inner.abort() {
                warn!(error = %e, "failed to abort write transaction");
            }
        }
    }
}

/// A write transaction that commits in batches.
///
/// Call [`process_batch_item`](Self::process_batch_item) after each unit of
/// work; once `max_batch` items have been processed the batch is committed
/// and the next item starts a new transaction. A `max_batch` of 0 never
/// commits automatically. Call [`commit`](Self::commit) to flush the final
/// partial batch: dropping aborts it.
///
/// # Example
/// ```
/// use refstore::storage::KeyValueStore;
///
/// let dir = tempfile::tempdir().unwrap();
/// let store = KeyValueStore::open(dir.path(), 1 << 30, 4).unwrap();
/// let db = store.open_db("refs").unwrap();
///
/// let mut batch = store.batching_write_txn(2).unwrap();
/// for i in 0u8..5 {
///     batch.put(&db, &[i], b"v", true).unwrap();
/// }
/// assert_eq!(batch.commits(), 2);
/// batch.commit().unwrap();
///
/// assert_eq!(store.read_txn().map(|txn| db.entry_count(&txn).unwrap()).unwrap(), 5);
/// ```
pub struct BatchingWriteTxn<'env> {
    env: &'env KeyValueStore,
    current: Option<WriteTxn<'env>>,
    max_batch: usize,
    batch_len: usize,
    commits: u64,
}

impl<'env> BatchingWriteTxn<'env> {
    pub(crate) fn new(env: &'env KeyValueStore, max_batch: usize) -> Self {
        Self {
            env,
            current: None,
            max_batch,
            batch_len: 0,
            commits: 0,
        }
    }

    /// The open transaction, beginning one if needed.
    pub fn txn(&mut self) -> Result<&mut WriteTxn<'env>> {
        let txn = match self.current.take() {
            Some(txn) => txn,
            None => self.env.write_txn()?,
        };
        Ok(self.current.insert(txn))
    }

    /// Put through the current transaction and count it as one batch item.
    pub fn put(&mut self, db: &Db<'env>, key: &[u8], value: &[u8], overwrite: bool) -> Result<PutOutcome> {
        let outcome = db.put_with_txn(self.txn()?, key, value, overwrite)?;
        self.process_batch_item()?;
        Ok(outcome)
    }

    /// Count one item; commit if the batch is now full.
    ///
    /// Returns whether a commit happened.
    pub fn process_batch_item(&mut self) -> Result<bool> {
        self.batch_len += 1;
        self.commit_if_required()
    }

    /// Commit if the batch has reached `max_batch` items.
    pub fn commit_if_required(&mut self) -> Result<bool> {
        if self.max_batch > 0 && self.batch_len >= self.max_batch {
            self.commit()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Commit the current batch, if a transaction is open.
    pub fn commit(&mut self) -> Result<()> {
        if let Some(txn) = self.current.take() {
            let items = self.batch_len;
            txn.commit()?;
            self.commits += 1;
            debug!(items, commits = self.commits, "committed batch");
        }
        self.batch_len = 0;
        Ok(())
    }

    /// Abort the current batch, if a transaction is open.
    pub fn abort(&mut self) -> Result<()> {
        if let Some(txn) = self.current.take() {
            txn.abort()?;
        }
        self.batch_len = 0;
        Ok(())
    }

    /// Items processed since the last commit.
    #[inline]
    pub fn batch_len(&self) -> usize {
        self.batch_len
    }

    /// Batches committed so far.
    #[inline]
    pub fn commits(&self) -> u64 {
        self.commits
    }
}

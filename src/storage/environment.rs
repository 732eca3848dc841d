//! KeyValueStore - one on-disk environment holding named sub-databases.
//!
//! The environment is a single data file inside the store directory. It is
//! opened once, shared by reference, and closed by value once every
//! [`Db`], [`ReadTxn`] and [`WriteTxn`] borrowing it has gone.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use redb::{Database, TableDefinition, TableHandle};
use tracing::{debug, info, warn};

use crate::common::{Error, Result, StoreConfig};
use crate::storage::{BatchingWriteTxn, Db, ReadTxn, WriteTxn};

/// An embedded, transactional, ordered key-value environment.
///
/// # Architecture
/// ```text
/// ┌─────────────────────────────────────────────────┐
/// │                 KeyValueStore                   │
/// │   <path>/data.redb                              │
/// │  ┌──────────┐ ┌──────────┐ ┌──────────┐         │
/// │  │ Db "a"   │ │ Db "b"   │ │   ...    │ <= max  │
/// │  └──────────┘ └──────────┘ └──────────┘         │
/// │                                                 │
/// │  readers: many, snapshot isolated               │
/// │  writer:  one at a time                         │
/// └─────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// `KeyValueStore` is `Sync`. Read transactions run in parallel with each
/// other and with the writer. Beginning a write transaction blocks while
/// another one is open.
pub struct KeyValueStore {
    db: Database,
    config: StoreConfig,
    /// Named databases known to exist, plus those being created.
    db_names: Mutex<DbNames>,
}

/// Name registry behind `KeyValueStore::open_db`.
///
/// The lock guarding it is never held while waiting for the writer. A name
/// being created holds a slot in `pending`, counted by the number of callers
/// creating it, so the limit stays exact.
#[derive(Debug, Default)]
struct DbNames {
    created: BTreeSet<String>,
    pending: BTreeMap<String, usize>,
}

impl DbNames {
    fn slots_used(&self) -> usize {
        self.created.len() + self.pending.len()
    }

    fn finish_pending(&mut self, name: &str) {
        if let Some(callers) = self.pending.get_mut(name) {
            *callers -= 1;
            if *callers == 0 {
                self.pending.remove(name);
            }
        }
    }
}

impl KeyValueStore {
    /// Open or create the environment in directory `path`.
    ///
    /// # Errors
    /// - `Error::Io` if the directory cannot be created
    /// - `Error::StoreCorruption` if the data file is corrupt
    /// - `Error::EnvironmentOpen` for any other failure to open the data file
    pub fn open(path: impl AsRef<Path>, max_size_bytes: u64, max_named_dbs: usize) -> Result<Self> {
        let config = StoreConfig::new(path.as_ref())
            .with_max_size_bytes(max_size_bytes)
            .with_max_named_dbs(max_named_dbs);
        Self::open_with(config)
    }

    /// Open or create the environment described by `config`.
    pub fn open_with(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.path)?;

        let file = config.data_file();
        let mut builder = Database::builder();
        if let Some(cache_size) = config.cache_size_bytes {
            builder.set_cache_size(cache_size);
        }
        let db = builder
            .create(&file)
            .map_err(|source| open_error(&file, source))?;

        let names: BTreeSet<String> = db
            .begin_read()?
            .list_tables()?
            .map(|handle| handle.name().to_string())
            .collect();

        info!(
            path = %config.path.display(),
            databases = names.len(),
            max_named_dbs = config.max_named_dbs,
            max_size_bytes = config.max_size_bytes,
            "opened key-value store"
        );

        Ok(Self {
            db,
            config,
            db_names: Mutex::new(DbNames {
                created: names,
                pending: BTreeMap::new(),
            }),
        })
    }

    #[inline]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Open the named database, creating it if needed.
    ///
    /// Opening an existing name never waits. Creating a new one runs its own
    /// write transaction, so it waits for the current writer; on the thread
    /// holding a [`WriteTxn`] only existing names may be opened.
    ///
    /// # Errors
    /// `Error::TooManyDatabases` if creating it would exceed `max_named_dbs`.
    pub fn open_db(&self, name: &str) -> Result<Db<'_>> {
        if name.is_empty() {
            return Err(Error::config("database name must not be empty"));
        }

        {
            let mut names = self.db_names.lock();
            if names.created.contains(name) {
                return Ok(Db::new(self, name.to_string()));
            }
            if !names.pending.contains_key(name) && names.slots_used() >= self.config.max_named_dbs {
                return Err(Error::TooManyDatabases {
                    max: self.config.max_named_dbs,
                });
            }
            *names.pending.entry(name.to_string()).or_insert(0) += 1;
        }

        let created = self.create_table(name);

        let mut names = self.db_names.lock();
        names.finish_pending(name);
        created?;
        if names.created.insert(name.to_string()) {
            debug!(db = name, "created database");
        }

        Ok(Db::new(self, name.to_string()))
    }

    fn create_table(&self, name: &str) -> Result<()> {
        let txn = self.write_txn()?;
        txn.inner()?
            .open_table(TableDefinition::<&[u8], &[u8]>::new(name))?;
        txn.commit()
    }

    /// Names of every database in the environment.
    pub fn db_names(&self) -> Vec<String> {
        self.db_names.lock().created.iter().cloned().collect()
    }

    // ========================================================================
    // TRANSACTIONS
    // ========================================================================

    /// Begin a read transaction on the latest committed state.
    pub fn read_txn(&self) -> Result<ReadTxn<'_>> {
        Ok(ReadTxn::new(self.db.begin_read()?, self))
    }

    /// Begin the write transaction, waiting for any current writer.
    ///
    /// # Errors
    /// `Error::StoreFull` if the data file has grown past `max_size_bytes`.
    pub fn write_txn(&self) -> Result<WriteTxn<'_>> {
        let size = self.size_on_disk()?;
        if size > self.config.max_size_bytes {
            warn!(size, max = self.config.max_size_bytes, "store is full, refusing write");
            return Err(Error::StoreFull {
                size,
                max: self.config.max_size_bytes,
            });
        }
        Ok(WriteTxn::new(self.db.begin_write()?, self))
    }

    /// Run `f` inside a read transaction.
    pub fn with_read_txn<'env, T, F>(&'env self, f: F) -> Result<T>
    where
        F: FnOnce(&ReadTxn<'env>) -> Result<T>,
    {
        let txn = self.read_txn()?;
        f(&txn)
    }

    /// Run `f` inside a write transaction, committing if it returns `Ok`.
    ///
    /// An `Err` from `f`, or a panic, aborts the transaction.
    pub fn with_write_txn<'env, T, F>(&'env self, f: F) -> Result<T>
    where
        F: FnOnce(&mut WriteTxn<'env>) -> Result<T>,
    {
        let mut txn = self.write_txn()?;
        match f(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                txn.abort()?;
                Err(e)
            }
        }
    }

    /// A write transaction that commits every `max_batch` items; 0 never
    /// commits automatically.
    pub fn batching_write_txn(&self, max_batch: usize) -> Result<BatchingWriteTxn<'_>> {
        Ok(BatchingWriteTxn::new(self, max_batch))
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Current size of the data file in bytes.
    pub fn size_on_disk(&self) -> Result<u64> {
        Ok(fs::metadata(self.config.data_file())?.len())
    }

    /// Reclaim free space in the data file. Returns whether anything was
    /// compacted.
    ///
    /// Needs exclusive access: no databases or transactions may be open.
    pub fn compact(&mut self) -> Result<bool> {
        let before = self.size_on_disk()?;
        let compacted = self
            .db
            .compact()
            .map_err(|e| Error::Storage(e.into()))?;
        info!(before, after = self.size_on_disk()?, compacted, "compacted store");
        Ok(compacted)
    }

    /// Close the environment.
    ///
    /// Consumes the store, which cannot happen while anything still borrows
    /// it. Committed data is already durable.
    pub fn close(self) {
        info!(path = %self.config.path.display(), "closing key-value store");
        drop(self.db);
    }
}

impl std::fmt::Debug for KeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueStore")
            .field("path", &self.config.path)
            .field("databases", &self.db_names.lock().created)
            .finish()
    }
}

fn open_error(file: &Path, source: redb::DatabaseError) -> Error {
    match source {
        redb::DatabaseError::Storage(redb::StorageError::Corrupted(message)) => {
            Error::StoreCorruption { message }
        }
        source => Error::EnvironmentOpen {
            path: PathBuf::from(file),
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(dir: &tempfile::TempDir) -> KeyValueStore {
        KeyValueStore::open(dir.path(), 1 << 30, 3).unwrap()
    }

    #[test]
    fn test_open_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store");
        let store = KeyValueStore::open(&path, 1 << 30, 2).unwrap();

        assert!(store.config().data_file().exists());
        assert!(store.db_names().is_empty());
    }

    #[test]
    fn test_open_db_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        store.open_db("a").unwrap();
        store.open_db("a").unwrap();
        assert_eq!(store.db_names(), vec!["a".to_string()]);
    }

    #[test]
    fn test_open_db_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        for name in ["a", "b", "c"] {
            store.open_db(name).unwrap();
        }
        assert!(matches!(
            store.open_db("d"),
            Err(Error::TooManyDatabases { max: 3 })
        ));
        // Existing names are still fine at the limit
        assert!(store.open_db("b").is_ok());
    }

    #[test]
    fn test_failed_creation_frees_its_slot() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyValueStore::open(dir.path(), 1, 1).unwrap();

        assert!(matches!(store.open_db("a"), Err(Error::StoreFull { .. })));
        // The slot reserved for "a" was given back
        assert!(matches!(store.open_db("b"), Err(Error::StoreFull { .. })));
        assert!(store.db_names().is_empty());
    }

    #[test]
    fn test_empty_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        assert!(matches!(store.open_db(""), Err(Error::Config { .. })));
    }

    #[test]
    fn test_store_full() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyValueStore::open(dir.path(), 1, 2).unwrap();

        assert!(store.size_on_disk().unwrap() > 1);
        assert!(matches!(store.write_txn(), Err(Error::StoreFull { max: 1, .. })));
        // Reads are unaffected
        assert!(store.read_txn().is_ok());
    }

    #[test]
    fn test_with_write_txn_aborts_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let db = store.open_db("a").unwrap();

        let result: Result<()> = store.with_write_txn(|txn| {
            db.put_with_txn(txn, b"k", b"v", true)?;
            Err(Error::KeyExists)
        });

        assert!(result.is_err());
        assert_eq!(db.get(b"k").unwrap(), None);
    }

    #[test]
    fn test_db_names_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_store(&dir);
            store.open_db("x").unwrap();
            store.open_db("y").unwrap();
            store.close();
        }

        let store = open_store(&dir);
        assert_eq!(store.db_names(), vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_compact() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        {
            let db = store.open_db("a").unwrap();
            db.put_batch((0u32..200).map(|i| (i.to_be_bytes(), vec![0u8; 256])))
                .unwrap();
            db.clear().unwrap();
        }

        assert!(store.compact().is_ok());
    }
}

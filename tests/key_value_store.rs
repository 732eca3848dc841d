//! Integration tests for the embedded key-value store.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use refstore::buffer::{build_pool, ByteBufferPool, PoolStrategy};
use refstore::codec::{self, TemporalKey};
use refstore::serde_pool::{SerdePool, StoredRecord};
use refstore::storage::{KeyValueStore, PutOutcome, TypedDb};
use refstore::{ByteBufferPoolConfig, Error};
use tempfile::tempdir;

fn open_store(dir: &tempfile::TempDir) -> KeyValueStore {
    KeyValueStore::open(dir.path(), 1 << 30, 4).unwrap()
}

/// put then get returns the value; repeating the put changes nothing.
#[test]
fn test_put_get_idempotent() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let db = store.open_db("refs").unwrap();

    assert_eq!(db.put(b"k", b"v", true).unwrap(), PutOutcome::NewEntry);
    assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));

    assert_eq!(db.put(b"k", b"v", true).unwrap(), PutOutcome::Unchanged);
    assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
    assert_eq!(store.with_read_txn(|txn| db.entry_count(txn)).unwrap(), 1);

    assert_eq!(db.put(b"k", b"w", true).unwrap(), PutOutcome::ReplacedEntry);
    assert_eq!(db.get(b"k").unwrap(), Some(b"w".to_vec()));
}

/// Without overwrite an existing key is a no-op, never an error.
#[test]
fn test_put_without_overwrite_is_noop() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let db = store.open_db("refs").unwrap();

    db.put(b"k", b"first", false).unwrap();
    assert_eq!(db.put(b"k", b"second", false).unwrap(), PutOutcome::Unchanged);
    assert_eq!(db.get(b"k").unwrap(), Some(b"first".to_vec()));

    assert!(matches!(db.insert_new(b"k", b"third"), Err(Error::KeyExists)));
    assert_eq!(db.get(b"k").unwrap(), Some(b"first".to_vec()));
    db.insert_new(b"j", b"fresh").unwrap();
}

/// Caller buffers may be reused as soon as put returns.
#[test]
fn test_put_copies_input() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let db = store.open_db("refs").unwrap();

    let mut key = b"key".to_vec();
    let mut value = b"value".to_vec();
    db.put(&key, &value, true).unwrap();
    key[0] = b'x';
    value[0] = b'x';

    assert_eq!(db.get(b"key").unwrap(), Some(b"value".to_vec()));
}

/// A failure part-way through a batch leaves nothing behind.
#[test]
fn test_batch_is_atomic() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let db = store.open_db("refs").unwrap();

    let entries = (0u32..100).map(|i| {
        if i == 60 {
            Err(Error::Serialization {
                message: "simulated".to_string(),
            })
        } else {
            Ok((i.to_be_bytes(), b"v".to_vec()))
        }
    });

    assert!(db.try_put_batch(entries).is_err());
    assert_eq!(store.with_read_txn(|txn| db.entry_count(txn)).unwrap(), 0);

    let written = db
        .put_batch((0u32..100).map(|i| (i.to_be_bytes(), b"v".to_vec())))
        .unwrap();
    assert_eq!(written, 100);
}

/// A full scan yields every key exactly once, in ascending byte order.
#[test]
fn test_scan_complete_and_ordered() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let db = store.open_db("metrics").unwrap();

    let mut expected = Vec::new();
    for (i, text) in ["zeta", "alpha", "mid", "alpha-2"].iter().enumerate() {
        for time in [30i64, 10, 20] {
            let key = codec::encode(text, time).unwrap();
            db.put(&key, &[i as u8], true).unwrap();
            expected.push(key);
        }
    }
    expected.sort();

    let txn = store.read_txn().unwrap();
    let keys: Vec<Vec<u8>> = db
        .stream_all_entries(&txn, |entries| {
            entries.map(|entry| entry.unwrap().0.to_vec()).collect()
        })
        .unwrap();

    assert_eq!(keys, expected);
}

/// The consumer may stop early.
#[test]
fn test_scan_early_termination() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let db = store.open_db("refs").unwrap();
    db.put_batch((0u8..50).map(|i| ([i], [i]))).unwrap();

    let txn = store.read_txn().unwrap();
    let first_three: Vec<u8> = db
        .stream_all_entries(&txn, |entries| {
            entries.take(3).map(|entry| entry.unwrap().1[0]).collect()
        })
        .unwrap();
    assert_eq!(first_three, vec![0, 1, 2]);

    let found = db
        .stream_all_entries(&txn, |mut entries| {
            entries.find(|entry| entry.as_ref().map_or(false, |(key, _)| key[0] == 42))
        })
        .unwrap();
    assert!(found.is_some());
}

/// Range scans and prefix lookups.
#[test]
fn test_range_and_prefix() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let db = store.open_db("refs").unwrap();
    for key in [&b"a1"[..], b"b1", b"b2", b"b3", b"c1"] {
        db.put(key, b"", true).unwrap();
    }

    let txn = store.read_txn().unwrap();
    let in_range: Vec<Vec<u8>> = db
        .stream_range(&txn, &b"b1"[..]..&b"b3"[..], |entries| {
            entries.map(|entry| entry.unwrap().0.to_vec()).collect()
        })
        .unwrap();
    assert_eq!(in_range, vec![b"b1".to_vec(), b"b2".to_vec()]);

    let (key, _) = db.first_entry_with_prefix(&txn, b"b").unwrap().unwrap();
    assert_eq!(key.as_bytes(), b"b1");
    assert!(db.first_entry_with_prefix(&txn, b"d").unwrap().is_none());
}

/// clear removes everything but leaves the database usable.
#[test]
fn test_clear() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let db = store.open_db("refs").unwrap();
    let other = store.open_db("other").unwrap();

    db.put_batch((0u8..10).map(|i| ([i], [i]))).unwrap();
    other.put(b"keep", b"me", true).unwrap();
    db.clear().unwrap();

    assert_eq!(store.with_read_txn(|txn| db.entry_count(txn)).unwrap(), 0);
    assert_eq!(other.get(b"keep").unwrap(), Some(b"me".to_vec()));

    db.put(b"again", b"ok", true).unwrap();
    assert!(db.exists(b"again").unwrap());
}

/// delete and exists.
#[test]
fn test_delete() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let db = store.open_db("refs").unwrap();

    db.put(b"k", b"v", true).unwrap();
    assert!(db.delete(b"k").unwrap());
    assert!(!db.delete(b"k").unwrap());
    assert!(!db.exists(b"k").unwrap());
}

/// A read transaction keeps seeing its snapshot while a writer commits.
#[test]
fn test_snapshot_isolation() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let db = store.open_db("refs").unwrap();
    db.put(b"k", b"old", true).unwrap();

    let snapshot = store.read_txn().unwrap();
    db.put(b"k", b"new", true).unwrap();
    db.put(b"added", b"x", true).unwrap();

    let view = db.get_with_txn(&snapshot, b"k").unwrap().unwrap();
    assert_eq!(view.as_bytes(), b"old");
    assert!(db.get_with_txn(&snapshot, b"added").unwrap().is_none());

    let fresh = store.read_txn().unwrap();
    assert_eq!(db.get_with_txn(&fresh, b"k").unwrap().unwrap().as_bytes(), b"new");
}

/// Readers on other threads run while a write transaction is open.
#[test]
fn test_readers_not_blocked_by_writer() {
    let dir = tempdir().unwrap();
    let store = Arc::new(open_store(&dir));
    store.open_db("refs").unwrap().put(b"k", b"v", true).unwrap();

    let writer = store.write_txn().unwrap();
    let reader_store = Arc::clone(&store);
    let value = thread::spawn(move || reader_store.open_db("refs").unwrap().get(b"k").unwrap())
        .join()
        .unwrap();
    assert_eq!(value, Some(b"v".to_vec()));
    writer.abort().unwrap();
}

/// Opening an existing database never waits behind another thread that is
/// creating a database and waiting for the writer.
#[test]
fn test_open_existing_db_while_creation_waits() {
    let dir = tempdir().unwrap();
    let store = Arc::new(open_store(&dir));
    store.open_db("existing").unwrap();

    let writer = store.write_txn().unwrap();

    let creator_store = Arc::clone(&store);
    let creator = thread::spawn(move || creator_store.open_db("new").is_ok());
    // Let the creator reach the writer wait
    thread::sleep(Duration::from_millis(200));

    let (tx, rx) = mpsc::channel();
    let opener_store = Arc::clone(&store);
    let opener = thread::spawn(move || {
        let opened = opener_store.open_db("existing").is_ok();
        tx.send(opened).unwrap();
    });

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(true));
    // The writer's own thread can still open existing names
    assert!(store.open_db("existing").is_ok());

    writer.abort().unwrap();
    assert!(creator.join().unwrap());
    opener.join().unwrap();
    assert_eq!(store.db_names(), vec!["existing".to_string(), "new".to_string()]);
}

/// Concurrent creation of distinct names respects the database limit.
#[test]
fn test_concurrent_open_db_respects_limit() {
    let dir = tempdir().unwrap();
    let store = Arc::new(open_store(&dir));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.open_db(&format!("db-{}", i)).map(|_| ()))
        })
        .collect();

    let mut opened = 0;
    for h in handles {
        match h.join().unwrap() {
            Ok(()) => opened += 1,
            Err(Error::TooManyDatabases { max: 4 }) => {}
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }

    assert_eq!(opened, 4);
    assert_eq!(store.db_names().len(), 4);
}

/// Updates edit a pooled copy and write back only when the bytes change.
#[test]
fn test_update_value() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let db = store.open_db("refs").unwrap();
    let pool = build_pool(PoolStrategy::SizeClass, ByteBufferPoolConfig::default()).unwrap();

    db.put(b"k", b"abc", true).unwrap();

    let outcome = db
        .update_value(pool.as_ref(), b"k", |value| value.as_mut_slice()[0] = b'x')
        .unwrap();
    assert_eq!(outcome, PutOutcome::ReplacedEntry);
    assert_eq!(db.get(b"k").unwrap(), Some(b"xbc".to_vec()));

    let outcome = db.update_value(pool.as_ref(), b"k", |_| {}).unwrap();
    assert_eq!(outcome, PutOutcome::Unchanged);

    db.update_value(pool.as_ref(), b"k", |value| value.set_len(1).unwrap())
        .unwrap();
    assert_eq!(db.get(b"k").unwrap(), Some(b"x".to_vec()));

    assert!(matches!(
        db.update_value(pool.as_ref(), b"missing", |_| {}),
        Err(Error::KeyNotFound)
    ));
    assert!(!db.exists(b"missing").unwrap());

    // Every copy went back to the pool
    let stats = pool.stats();
    assert_eq!(stats.acquires(), stats.releases());
}

/// An update inside a transaction that aborts leaves the stored value alone.
#[test]
fn test_update_value_rolls_back_with_txn() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let db = store.open_db("refs").unwrap();
    let pool = build_pool(PoolStrategy::Sharded { shards: 2 }, ByteBufferPoolConfig::default()).unwrap();
    db.put(b"k", b"old", true).unwrap();

    let result: refstore::Result<()> = store.with_write_txn(|txn| {
        db.update_value_with_txn(txn, pool.as_ref(), b"k", |value| value.as_mut_slice().fill(b'z'))?;
        Err(Error::KeyExists)
    });

    assert!(result.is_err());
    assert_eq!(db.get(b"k").unwrap(), Some(b"old".to_vec()));
}

/// Batched deletes are all or nothing.
#[test]
fn test_delete_all_is_atomic() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let db = store.open_db("refs").unwrap();
    db.put_batch((0u8..10).map(|i| ([i], [i]))).unwrap();

    let keys = (0u8..10).map(|i| {
        if i == 5 {
            Err(Error::Serialization {
                message: "simulated".to_string(),
            })
        } else {
            Ok([i])
        }
    });
    assert!(db.try_delete_all(keys).is_err());
    assert_eq!(store.with_read_txn(|txn| db.entry_count(txn)).unwrap(), 10);

    let deleted = db.delete_all((0u8..5).map(|i| [i]).chain([[200u8]])).unwrap();
    assert_eq!(deleted, 5);
    assert_eq!(store.with_read_txn(|txn| db.entry_count(txn)).unwrap(), 5);
    assert!(!db.exists(&[0]).unwrap());
    assert!(db.exists(&[9]).unwrap());
}

/// A panic inside a write transaction aborts it.
#[test]
fn test_panic_aborts_write() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let db = store.open_db("refs").unwrap();

    let result = catch_unwind(AssertUnwindSafe(|| {
        let _: refstore::Result<()> = store.with_write_txn(|txn| {
            db.put_with_txn(txn, b"k", b"v", true)?;
            panic!("worker failed");
        });
    }));

    assert!(result.is_err());
    assert_eq!(db.get(b"k").unwrap(), None);
    // The writer slot is free again
    db.put(b"k", b"v", true).unwrap();
}

/// Data and database names survive close and reopen.
#[test]
fn test_reopen_persists() {
    let dir = tempdir().unwrap();
    {
        let store = open_store(&dir);
        store.open_db("refs").unwrap().put(b"k", b"v", true).unwrap();
        store.close();
    }

    let store = open_store(&dir);
    assert_eq!(store.db_names(), vec!["refs".to_string()]);
    assert_eq!(store.open_db("refs").unwrap().get(b"k").unwrap(), Some(b"v".to_vec()));
}

/// A garbage data file fails to open with a fatal error.
#[test]
fn test_corrupt_file_fails_open() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("data.redb"), vec![0xAB; 8192]).unwrap();

    let err = KeyValueStore::open(dir.path(), 1 << 30, 4).unwrap_err();
    assert!(err.is_fatal(), "{:?}", err);
}

/// Transactions are bound to the store that created them.
#[test]
fn test_foreign_transaction_rejected() {
    let dir_a = tempdir().unwrap();
    let dir_b = tempdir().unwrap();
    let a = open_store(&dir_a);
    let b = open_store(&dir_b);
    let db_a = a.open_db("refs").unwrap();

    let txn_b = b.read_txn().unwrap();
    assert!(matches!(
        db_a.get_with_txn(&txn_b, b"k"),
        Err(Error::ForeignTransaction)
    ));
}

/// Batching writer commits every `max_batch` items; 0 never auto-commits.
#[test]
fn test_batching_write_txn() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let db = store.open_db("refs").unwrap();

    let mut batch = store.batching_write_txn(3).unwrap();
    for i in 0u8..7 {
        batch.put(&db, &[i], b"v", true).unwrap();
    }
    assert_eq!(batch.commits(), 2);
    assert_eq!(batch.batch_len(), 1);
    drop(batch);

    // The uncommitted seventh item was aborted
    assert_eq!(store.with_read_txn(|txn| db.entry_count(txn)).unwrap(), 6);

    let mut batch = store.batching_write_txn(0).unwrap();
    for i in 10u8..20 {
        batch.put(&db, &[i], b"v", true).unwrap();
    }
    assert_eq!(batch.commits(), 0);
    batch.commit().unwrap();
    assert_eq!(store.with_read_txn(|txn| db.entry_count(txn)).unwrap(), 16);
}

/// Typed records keyed by time support history and point-in-time lookups.
#[test]
fn test_typed_history() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let buffers = build_pool(PoolStrategy::Sharded { shards: 2 }, ByteBufferPoolConfig::default()).unwrap();
    let typed = TypedDb::new(store.open_db("fx").unwrap(), buffers.clone(), Arc::new(SerdePool::new()));

    for (time, rate) in [(3000, "1.30"), (1000, "1.27"), (2000, "1.25")] {
        let key = TemporalKey::new("GBP", time).unwrap();
        typed.put(&key, &StoredRecord::from(rate), true).unwrap();
    }
    typed
        .put(&TemporalKey::new("GBX", 1500).unwrap(), &StoredRecord::from("other"), true)
        .unwrap();

    let txn = store.read_txn().unwrap();
    let history = typed.history(&txn, "GBP").unwrap();
    let times: Vec<i64> = history.iter().map(|(key, _)| key.time_ms()).collect();
    assert_eq!(times, vec![1000, 2000, 3000]);

    let (key, record) = typed.latest_at(&txn, "GBP", 2500).unwrap().unwrap();
    assert_eq!(key.time_ms(), 2000);
    assert_eq!(record, StoredRecord::from("1.25"));

    assert!(typed.latest_at(&txn, "GBP", 999).unwrap().is_none());
    assert!(typed.latest_at(&txn, "GBP", -1).is_err());

    let exact = typed.get_with_txn(&txn, &TemporalKey::new("GBP", 3000).unwrap()).unwrap();
    assert_eq!(exact, Some(StoredRecord::from("1.30")));

    // Every staging buffer went back to the pool
    let stats = buffers.stats();
    assert_eq!(stats.acquires(), stats.releases());
}

/// Writes are refused once the data file passes the size limit.
#[test]
fn test_store_full_refuses_writes() {
    let dir = tempdir().unwrap();
    {
        let store = open_store(&dir);
        store.open_db("refs").unwrap().put(b"k", b"v", true).unwrap();
    }

    let store = KeyValueStore::open(dir.path(), 1024, 4).unwrap();
    let db = store.open_db("refs").unwrap();
    assert!(matches!(db.put(b"k2", b"v", true), Err(Error::StoreFull { .. })));
    assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
}

//! refstore - pooled buffers and embedded ordered storage for reference data lookups.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            refstore                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                 Typed Layer (storage::TypedDb)          │    │
//! │  │        TemporalKey keys  +  StoredRecord values         │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │          ↓ key bytes                    ↓ value bytes           │
//! │  ┌──────────────────────────┐   ┌──────────────────────────┐    │
//! │  │   Key Codec (codec/)     │   │  Serde Pool (serde_pool/)│    │
//! │  │ text ‖ 0x00 ‖ i64 (BE)   │   │  CRC32 ‖ postcard(record)│    │
//! │  └──────────────────────────┘   └──────────────────────────┘    │
//! │          ↓ staged in                                            │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │          Buffer Pool (buffer/)  [Strategy chosen once]  │    │
//! │  │      SizeClassPool  ←─OR─→  ShardedPool                 │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │              Storage Layer (storage/)                   │    │
//! │  │   KeyValueStore + Db + ReadTxn/WriteTxn + BytesView     │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Error, Result, constants and configuration
//! - [`buffer`] - Pooled byte buffers and pool strategies
//! - [`codec`] - Composite temporal keys
//! - [`serde_pool`] - Record schema and pooled codecs
//! - [`storage`] - The embedded key-value store
//!
//! # Quick Start
//! ```no_run
//! use refstore::storage::KeyValueStore;
//!
//! let store = KeyValueStore::open("/var/lib/refstore", 1 << 30, 8).unwrap();
//! let db = store.open_db("countries").unwrap();
//! db.put(b"GB", b"United Kingdom", true).unwrap();
//!
//! let txn = store.read_txn().unwrap();
//! let view = db.get_with_txn(&txn, b"GB").unwrap();
//! assert_eq!(view.as_deref(), Some(&b"United Kingdom"[..]));
//! ```

pub mod buffer;
pub mod codec;
pub mod common;
pub mod serde_pool;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::{ByteBufferPoolConfig, Error, Result, StoreConfig};

pub use buffer::{build_pool, BufferLease, ByteBufferPool, PoolStrategy, PooledBuffer};
pub use codec::TemporalKey;
pub use serde_pool::{SerdePool, StoredRecord};
pub use storage::{Db, KeyValueStore, PutOutcome, ReadTxn, TypedDb, WriteTxn};

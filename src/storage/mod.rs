//! Embedded ordered key-value storage.
//!
//! # Components
//! - [`KeyValueStore`] - The on-disk environment
//! - [`Db`] - A named sub-database of raw byte keys and values
//! - [`ReadTxn`] / [`WriteTxn`] / [`BatchingWriteTxn`] - Transactions
//! - [`BytesView`] / [`EntryIter`] - Read-only engine memory, scoped to a read transaction
//! - [`TypedDb`] - Temporal keys and stored records over a `Db`

mod db;
mod environment;
mod txn;
mod typed;

pub use db::{BytesView, Db, Entry, EntryIter, PutOutcome};
pub use environment::KeyValueStore;
pub use txn::{BatchingWriteTxn, ReadTxn, WriteTxn};
pub use typed::TypedDb;

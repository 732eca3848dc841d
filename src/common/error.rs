//! Error types for refstore.

use std::path::PathBuf;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in refstore.
///
/// Buffer and serializer pool errors are local to the failing operation; the
/// pools stay consistent because every borrow is scoped. Store-level errors
/// raised by `open` (corruption, unwritable paths) are fatal for the store and
/// are left to the caller to handle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Memory for a buffer could not be obtained.
    #[error("failed to allocate a buffer of {capacity} bytes")]
    AllocationFailure { capacity: usize },

    /// A write would run past the end of a fixed-capacity buffer.
    #[error("buffer overflow: capacity {capacity}, {requested} bytes requested")]
    BufferOverflow { capacity: usize, requested: usize },

    /// Bytes handed to a key decoder do not have the expected shape.
    #[error("invalid key format: {reason}")]
    InvalidKeyFormat { reason: String },

    /// A record could not be encoded or decoded.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// The checksum stored with an encoded record does not match its payload.
    #[error("record checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Strict insert found an existing entry for the key.
    #[error("key already exists")]
    KeyExists,

    /// An update targeted a key that is not in the database.
    #[error("key not found")]
    KeyNotFound,

    /// The storage environment could not be opened or created.
    #[error("failed to open environment at {}: {source}", path.display())]
    EnvironmentOpen {
        path: PathBuf,
        #[source]
        source: redb::DatabaseError,
    },

    /// The storage engine reported corrupted data.
    #[error("store corruption: {message}")]
    StoreCorruption { message: String },

    /// The data file has reached its configured maximum size.
    #[error("store is full: {size} bytes on disk, limit is {max}")]
    StoreFull { size: u64, max: u64 },

    /// Opening another named database would exceed the configured limit.
    #[error("cannot open more than {max} named databases")]
    TooManyDatabases { max: usize },

    /// A transaction was used after it was committed or aborted.
    #[error("transaction is already closed")]
    TransactionClosed,

    /// A transaction from one environment was passed to a database of another.
    #[error("transaction belongs to a different environment")]
    ForeignTransaction,

    /// Invalid configuration values.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// Any other error raised by the embedded engine.
    #[error("storage error: {0}")]
    Storage(#[from] redb::Error),

    /// I/O error from filesystem operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for building an [`Error::InvalidKeyFormat`].
    pub(crate) fn invalid_key(reason: impl Into<String>) -> Self {
        Error::InvalidKeyFormat {
            reason: reason.into(),
        }
    }

    /// Shorthand for building an [`Error::Config`].
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// Whether the error leaves the store unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::AllocationFailure { .. }
                | Error::EnvironmentOpen { .. }
                | Error::StoreCorruption { .. }
        )
    }
}

impl From<redb::StorageError> for Error {
    fn from(err: redb::StorageError) -> Self {
        match err {
            redb::StorageError::Corrupted(message) => Error::StoreCorruption { message },
            other => Error::Storage(other.into()),
        }
    }
}

impl From<redb::TransactionError> for Error {
    fn from(err: redb::TransactionError) -> Self {
        match err {
            redb::TransactionError::Storage(inner) => inner.into(),
            other => Error::Storage(other.into()),
        }
    }
}

impl From<redb::TableError> for Error {
    fn from(err: redb::TableError) -> Self {
        match err {
            redb::TableError::Storage(inner) => inner.into(),
            other => Error::Storage(other.into()),
        }
    }
}

impl From<redb::CommitError> for Error {
    fn from(err: redb::CommitError) -> Self {
        match err {
            redb::CommitError::Storage(inner) => inner.into(),
            other => Error::Storage(other.into()),
        }
    }
}

impl From<postcard::Error> for Error {
    fn from(err: postcard::Error) -> Self {
        Error::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::AllocationFailure { capacity: 1024 };
        assert_eq!(format!("{}", err), "failed to allocate a buffer of 1024 bytes");

        let err = Error::StoreFull { size: 10, max: 5 };
        assert_eq!(
            format!("{}", err),
            "store is full: 10 bytes on disk, limit is 5"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();

        match err {
            Error::Io(_) => {}
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_corrupted_storage_maps_to_store_corruption() {
        let err: Error = redb::StorageError::Corrupted("bad page".to_string()).into();
        assert!(matches!(err, Error::StoreCorruption { ref message } if message == "bad page"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_key_errors_are_recoverable() {
        assert!(!Error::invalid_key("too short").is_fatal());
        assert!(!Error::KeyExists.is_fatal());
        assert!(!Error::KeyNotFound.is_fatal());
    }

    #[test]
    fn test_result_type_alias() {
        fn might_fail() -> Result<u32> {
            Ok(42)
        }

        assert_eq!(might_fail().unwrap(), 42);
    }
}

//! Configuration for refstore.
//!
//! Constants shared across the crate live at the top of this module, followed
//! by the two user-facing configuration types:
//! - [`ByteBufferPoolConfig`] - size classes and retention limits for buffer pools
//! - [`StoreConfig`] - location and limits of an embedded key-value environment
//!
//! Both types deserialize with `serde` so they can be embedded in a host
//! application's configuration file. Call `validate()` after deserializing.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

/// Length of the fixed suffix of an encoded temporal key (`0x00` + 8 byte time).
pub const TEMPORAL_KEY_SUFFIX_LEN: usize = 9;

/// Delimiter between the text and the time of an encoded temporal key.
pub const TEMPORAL_KEY_DELIMITER: u8 = 0x00;

/// Length of the checksum header written in front of every encoded record.
pub const RECORD_HEADER_LEN: usize = 4;

/// If a class has no explicit warning threshold, warn when this share of
/// its maximum has been created.
pub const DEFAULT_WARNING_THRESHOLD_PERCENT: u8 = 90;

/// Name of the data file inside a store directory.
pub const DATA_FILE_NAME: &str = "data.redb";

/// Default upper bound on the size of the data file (10 GiB).
pub const DEFAULT_MAX_STORE_SIZE_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Default number of named databases an environment may hold.
pub const DEFAULT_MAX_NAMED_DBS: usize = 10;

/// Size classes used by [`ByteBufferPoolConfig::default`].
///
/// Small classes cover keys and short reference values and are the most
/// heavily used, so they retain more buffers.
const DEFAULT_POOLED_BUFFER_COUNTS: [(usize, usize); 15] = [
    (4, 50),
    (8, 50),
    (16, 50),
    (32, 50),
    (64, 50),
    (128, 50),
    (256, 50),
    (512, 50),
    (1024, 50),
    (2048, 20),
    (4096, 20),
    (8192, 10),
    (16384, 10),
    (32768, 5),
    (65536, 5),
];

// ============================================================================
// BUFFER POOL
// ============================================================================

/// Size classes and retention limits for a byte buffer pool.
///
/// Maps a size-class capacity (bytes) to the maximum number of idle buffers
/// the pool keeps for that class. A maximum of zero keeps the class for
/// rounding purposes but never retains released buffers. Requests larger
/// than the biggest class are served with unpooled buffers.
///
/// # Example
/// ```
/// use refstore::ByteBufferPoolConfig;
///
/// let config = ByteBufferPoolConfig::new([(4, 2), (1024, 1)]).unwrap();
/// assert_eq!(config.max_pooled(4), Some(2));
/// assert_eq!(config.max_pooled(16), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteBufferPoolConfig {
    /// Size-class capacity → maximum idle buffers retained for the class.
    #[serde(default)]
    pub pooled_buffer_counts: BTreeMap<usize, usize>,

    /// Percentage of a class maximum at which a warning is logged.
    #[serde(default = "default_warning_threshold_percent")]
    pub warning_threshold_percent: u8,
}

fn default_warning_threshold_percent() -> u8 {
    DEFAULT_WARNING_THRESHOLD_PERCENT
}

impl ByteBufferPoolConfig {
    /// Create a validated config from `(capacity, max_pooled)` pairs.
    ///
    /// # Errors
    /// Returns `Error::Config` if any capacity is zero.
    pub fn new(classes: impl IntoIterator<Item = (usize, usize)>) -> Result<Self> {
        let config = Self {
            pooled_buffer_counts: classes.into_iter().collect(),
            warning_threshold_percent: DEFAULT_WARNING_THRESHOLD_PERCENT,
        };
        config.validate()?;
        Ok(config)
    }

    /// A config with no size classes: every buffer is unpooled.
    pub fn unpooled() -> Self {
        Self {
            pooled_buffer_counts: BTreeMap::new(),
            warning_threshold_percent: DEFAULT_WARNING_THRESHOLD_PERCENT,
        }
    }

    /// Power-of-two classes from `min` (rounded up) to `max` inclusive, each
    /// retaining up to `count` buffers.
    ///
    /// # Errors
    /// Returns `Error::Config` if `min` is zero or greater than `max`.
    pub fn powers_of_two(min: usize, max: usize, count: usize) -> Result<Self> {
        if min == 0 || min > max {
            return Err(Error::config(format!(
                "power-of-two range must satisfy 0 < min <= max, got {}..={}",
                min, max
            )));
        }

        let mut classes = BTreeMap::new();
        let mut capacity = min.next_power_of_two();
        while capacity <= max {
            classes.insert(capacity, count);
            match capacity.checked_mul(2) {
                Some(next) => capacity = next,
                None => break,
            }
        }

        Ok(Self {
            pooled_buffer_counts: classes,
            warning_threshold_percent: DEFAULT_WARNING_THRESHOLD_PERCENT,
        })
    }

    /// Set the warning threshold percentage.
    pub fn with_warning_threshold_percent(mut self, percent: u8) -> Self {
        self.warning_threshold_percent = percent;
        self
    }

    /// Maximum idle buffers for an exact class capacity, if configured.
    pub fn max_pooled(&self, capacity: usize) -> Option<usize> {
        self.pooled_buffer_counts.get(&capacity).copied()
    }

    /// Total bytes the pool may hold idle when every class is full.
    pub fn max_pooled_bytes(&self) -> u64 {
        self.pooled_buffer_counts
            .iter()
            .map(|(&capacity, &count)| capacity as u64 * count as u64)
            .sum()
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    /// Returns `Error::Config` if a capacity is zero or the warning
    /// threshold is above 100.
    pub fn validate(&self) -> Result<()> {
        if self.pooled_buffer_counts.contains_key(&0) {
            return Err(Error::config("buffer capacity must be > 0"));
        }
        if self.warning_threshold_percent > 100 {
            return Err(Error::config(format!(
                "warning_threshold_percent must be <= 100, got {}",
                self.warning_threshold_percent
            )));
        }
        Ok(())
    }
}

impl Default for ByteBufferPoolConfig {
    fn default() -> Self {
        Self {
            pooled_buffer_counts: DEFAULT_POOLED_BUFFER_COUNTS.into_iter().collect(),
            warning_threshold_percent: DEFAULT_WARNING_THRESHOLD_PERCENT,
        }
    }
}

// ============================================================================
// KEY-VALUE STORE
// ============================================================================

/// Location and limits of an embedded key-value environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the environment's data file.
    pub path: PathBuf,

    /// Writes are refused once the data file grows past this size.
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,

    /// Maximum number of named databases in the environment.
    #[serde(default = "default_max_named_dbs")]
    pub max_named_dbs: usize,

    /// Page cache size for the engine; engine default when `None`.
    #[serde(default)]
    pub cache_size_bytes: Option<usize>,
}

fn default_max_size_bytes() -> u64 {
    DEFAULT_MAX_STORE_SIZE_BYTES
}

fn default_max_named_dbs() -> usize {
    DEFAULT_MAX_NAMED_DBS
}

impl StoreConfig {
    /// Config for `path` with default limits.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_size_bytes: DEFAULT_MAX_STORE_SIZE_BYTES,
            max_named_dbs: DEFAULT_MAX_NAMED_DBS,
            cache_size_bytes: None,
        }
    }

    /// Set the maximum data file size.
    pub fn with_max_size_bytes(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    /// Set the maximum number of named databases.
    pub fn with_max_named_dbs(mut self, max_named_dbs: usize) -> Self {
        self.max_named_dbs = max_named_dbs;
        self
    }

    /// Set the engine page cache size.
    pub fn with_cache_size_bytes(mut self, cache_size_bytes: usize) -> Self {
        self.cache_size_bytes = Some(cache_size_bytes);
        self
    }

    /// Path of the data file inside [`StoreConfig::path`].
    pub fn data_file(&self) -> PathBuf {
        self.path.join(DATA_FILE_NAME)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    /// Returns `Error::Config` if either limit is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_size_bytes == 0 {
            return Err(Error::config("max_size_bytes must be > 0"));
        }
        if self.max_named_dbs == 0 {
            return Err(Error::config("max_named_dbs must be > 0"));
        }
        Ok(())
    }
}

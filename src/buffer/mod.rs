//! Pooled byte buffers.
//!
//! Key and value bytes on their way into or out of the store are staged in
//! fixed-capacity buffers borrowed from a pool, so steady-state traffic does
//! not allocate.
//!
//! # Components
//! - [`PooledBuffer`] - An owned block with a write cursor
//! - [`ByteBufferPool`] - The pool contract plus scoped helpers
//! - [`BufferLease`] - RAII guard that releases on drop
//! - [`SizeClassPool`] - One free-list per size class (default strategy)
//! - [`ShardedPool`] - Size classes split across per-thread shards
//! - [`BufferPoolStats`] - Hit/miss/drop counters
//!
//! The strategy is chosen at construction with [`build_pool`]; callers only
//! see `dyn ByteBufferPool`.

mod lease;
mod pool;
mod pooled_buffer;
mod sharded_pool;
mod size_class;
mod size_class_pool;
mod stats;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::common::{ByteBufferPoolConfig, Result};

pub use lease::BufferLease;
pub use pool::ByteBufferPool;
pub use pooled_buffer::PooledBuffer;
pub use sharded_pool::ShardedPool;
pub use size_class::{CreationTracker, SizeClassBucket, SizeClassTable};
pub use size_class_pool::SizeClassPool;
pub use stats::{BufferPoolStats, SizeClassInfo, StatsSnapshot};

/// Pool implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PoolStrategy {
    /// [`SizeClassPool`].
    #[default]
    SizeClass,
    /// [`ShardedPool`] with `shards` free-lists per class.
    Sharded { shards: usize },
}

impl PoolStrategy {
    /// Sharded strategy with one shard per available CPU.
    pub fn sharded_per_cpu() -> Self {
        let shards = std::thread::available_parallelism().map_or(1, |n| n.get());
        PoolStrategy::Sharded { shards }
    }
}

/// Build a shareable pool for `strategy`.
///
/// # Errors
/// Returns `Error::Config` if the config or strategy parameters are invalid.
pub fn build_pool(
    strategy: PoolStrategy,
    config: ByteBufferPoolConfig,
) -> Result<Arc<dyn ByteBufferPool>> {
    let pool: Arc<dyn ByteBufferPool> = match strategy {
        PoolStrategy::SizeClass => Arc::new(SizeClassPool::new(config)?),
        PoolStrategy::Sharded { shards } => Arc::new(ShardedPool::new(config, shards)?),
    };
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;

    #[test]
    fn test_build_each_strategy() {
        for strategy in [PoolStrategy::SizeClass, PoolStrategy::Sharded { shards: 3 }] {
            let pool = build_pool(strategy, ByteBufferPoolConfig::default()).unwrap();
            let buffer = pool.acquire(20).unwrap();
            assert_eq!(buffer.capacity(), 32);
            pool.release(buffer);
            assert_eq!(pool.current_pool_size(), 1);
        }
    }

    #[test]
    fn test_build_rejects_zero_shards() {
        let result = build_pool(PoolStrategy::Sharded { shards: 0 }, ByteBufferPoolConfig::default());
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_arc_pool_supports_scoped_helpers() {
        let pool = build_pool(PoolStrategy::default(), ByteBufferPoolConfig::default()).unwrap();
        let len = pool
            .with_buffer(8, |buffer| {
                buffer.put_slice(b"abc")?;
                Ok(buffer.len())
            })
            .unwrap();

        assert_eq!(len, 3);
        assert_eq!(pool.available_count(8), 1);
    }

    #[test]
    fn test_per_cpu_strategy_has_shards() {
        match PoolStrategy::sharded_per_cpu() {
            PoolStrategy::Sharded { shards } => assert!(shards >= 1),
            other => panic!("unexpected strategy {:?}", other),
        }
    }
}

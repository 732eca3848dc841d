//! SizeClassPool - one free-list per size class.
//!
//! The default strategy. A request is rounded up to the smallest configured
//! class that fits; each class has its own lock, so requests for different
//! sizes never contend.

use tracing::{debug, error, info, trace};

use crate::buffer::pooled_buffer::Origin;
use crate::buffer::size_class::{CreationTracker, SizeClassBucket, SizeClassTable};
use crate::buffer::{BufferPoolStats, ByteBufferPool, PooledBuffer, SizeClassInfo, StatsSnapshot};
use crate::common::{ByteBufferPoolConfig, Result};

/// A size class: its free-list plus creation accounting.
struct ClassSlot {
    bucket: SizeClassBucket,
    tracker: CreationTracker,
}

/// Buffer pool with a single lock-protected free-list per size class.
///
/// # Architecture
/// ```text
/// ┌──────────────────────────────────────────────────────────┐
/// │                      SizeClassPool                       │
/// │  ┌──────────────┐    ┌───────────────────────────────┐   │
/// │  │    table     │    │      classes: [ClassSlot]     │   │
/// │  │ [4, 64, 1Ki] │───▶│ [Mutex<Vec>] [Mutex<Vec>] ... │   │
/// │  └──────────────┘    └───────────────────────────────┘   │
/// │  ┌──────────────┐                                        │
/// │  │    stats     │   requests > largest class: unpooled   │
/// │  └──────────────┘                                        │
/// └──────────────────────────────────────────────────────────┘
/// ```
///
/// # Usage
/// ```
/// use refstore::buffer::{ByteBufferPool, SizeClassPool};
/// use refstore::ByteBufferPoolConfig;
///
/// let pool = SizeClassPool::new(ByteBufferPoolConfig::new([(4, 2), (1024, 1)]).unwrap()).unwrap();
/// let buffer = pool.acquire(3).unwrap();
/// assert_eq!(buffer.capacity(), 4);
///
/// let big = pool.acquire(5000).unwrap();
/// assert_eq!(big.capacity(), 5000);
/// assert!(!big.is_pooled());
/// ```
pub struct SizeClassPool {
    /// Ascending class capacities, parallel to `classes`.
    table: SizeClassTable,
    classes: Box<[ClassSlot]>,
    stats: BufferPoolStats,
    config: ByteBufferPoolConfig,
}

impl SizeClassPool {
    /// Create a pool from a config. No buffers are allocated up front; see
    /// [`ByteBufferPool::warm_up`].
    ///
    /// # Errors
    /// Returns `Error::Config` if the config is invalid.
    pub fn new(config: ByteBufferPoolConfig) -> Result<Self> {
        config.validate()?;

        let table = SizeClassTable::new(config.pooled_buffer_counts.keys().copied());
        let classes: Box<[ClassSlot]> = table
            .capacities()
            .iter()
            .map(|&capacity| {
                let max_pooled = config.max_pooled(capacity).unwrap_or(0);
                debug!(capacity, max_pooled, "creating size class");
                ClassSlot {
                    bucket: SizeClassBucket::new(capacity, max_pooled),
                    tracker: CreationTracker::new(
                        capacity,
                        max_pooled,
                        config.warning_threshold_percent,
                    ),
                }
            })
            .collect();

        info!(
            strategy = "size-class",
            classes = classes.len(),
            max_pooled_bytes = config.max_pooled_bytes(),
            warning_threshold_percent = config.warning_threshold_percent,
            "initialised byte buffer pool"
        );

        Ok(Self {
            table,
            classes,
            stats: BufferPoolStats::new(),
            config,
        })
    }

    /// The config the pool was built from.
    pub fn config(&self) -> &ByteBufferPoolConfig {
        &self.config
    }

    /// Live counters.
    pub fn raw_stats(&self) -> &BufferPoolStats {
        &self.stats
    }

    fn allocate_for_class(&self, class_index: usize, slot: &ClassSlot) -> Result<PooledBuffer> {
        let buffer =
            PooledBuffer::allocate(slot.bucket.capacity(), Origin::Pooled { class_index })?;
        slot.tracker.record_creation();
        Ok(buffer)
    }
}

impl ByteBufferPool for SizeClassPool {
    fn acquire(&self, min_capacity: usize) -> Result<PooledBuffer> {
        let Some(class_index) = self.table.class_for(min_capacity) else {
            BufferPoolStats::record(&self.stats.unpooled);
            trace!(min_capacity, "allocating unpooled buffer");
            return PooledBuffer::allocate(min_capacity, Origin::Unpooled);
        };

        let slot = &self.classes[class_index];
        if let Some(mut buffer) = slot.bucket.pop() {
            buffer.clear();
            BufferPoolStats::record(&self.stats.hits);
            return Ok(buffer);
        }

        BufferPoolStats::record(&self.stats.misses);
        self.allocate_for_class(class_index, slot)
    }

    fn release(&self, buffer: PooledBuffer) {
        let class_index = match buffer.origin() {
            Origin::Unpooled => {
                BufferPoolStats::record(&self.stats.dropped);
                return;
            }
            Origin::Pooled { class_index } => class_index,
        };

        match self.classes.get(class_index) {
            Some(slot) if slot.bucket.capacity() == buffer.capacity() => {
                match slot.bucket.push(buffer) {
                    Ok(()) => BufferPoolStats::record(&self.stats.returned),
                    Err(_excess) => {
                        trace!(capacity = slot.bucket.capacity(), "free-list full, dropping buffer");
                        slot.tracker.forget(1);
                        BufferPoolStats::record(&self.stats.dropped);
                    }
                }
            }
            _ => {
                error!(
                    capacity = buffer.capacity(),
                    class_index, "released buffer does not belong to this pool, dropping it"
                );
                BufferPoolStats::record(&self.stats.dropped);
            }
        }
    }

    fn warm_up(&self) -> Result<usize> {
        let mut total = 0;
        for (class_index, slot) in self.classes.iter().enumerate() {
            total += slot
                .bucket
                .fill_with(|| self.allocate_for_class(class_index, slot))?;
        }
        debug!(buffers = total, "warmed up byte buffer pool");
        Ok(total)
    }

    fn clear(&self) {
        let mut cleared = Vec::with_capacity(self.classes.len());
        for slot in self.classes.iter() {
            let drained = slot.bucket.drain();
            slot.tracker.forget(drained);
            cleared.push((slot.bucket.capacity(), drained));
        }
        info!(cleared = ?cleared, "cleared idle buffers (capacity, count)");
    }

    fn current_pool_size(&self) -> usize {
        self.classes.iter().map(|slot| slot.bucket.len()).sum()
    }

    fn available_count(&self, min_capacity: usize) -> usize {
        self.table
            .class_for(min_capacity)
            .map_or(0, |idx| self.classes[idx].bucket.len())
    }

    fn size_classes(&self) -> Vec<SizeClassInfo> {
        self.classes
            .iter()
            .map(|slot| SizeClassInfo {
                capacity: slot.bucket.capacity(),
                max_pooled: slot.bucket.max_pooled(),
                available: slot.bucket.len(),
                created: slot.tracker.created(),
            })
            .collect()
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_pool(classes: &[(usize, usize)]) -> SizeClassPool {
        SizeClassPool::new(ByteBufferPoolConfig::new(classes.iter().copied()).unwrap()).unwrap()
    }

    #[test]
    fn test_rounds_up_to_class() {
        let pool = create_pool(&[(4, 2), (64, 2), (1024, 1)]);

        assert_eq!(pool.acquire(1).unwrap().capacity(), 4);
        assert_eq!(pool.acquire(5).unwrap().capacity(), 64);
        assert_eq!(pool.acquire(1024).unwrap().capacity(), 1024);
    }

    #[test]
    fn test_zero_request_uses_smallest_class() {
        let pool = create_pool(&[(4, 2), (64, 2)]);
        let buffer = pool.acquire(0).unwrap();
        assert_eq!(buffer.capacity(), 4);
        assert!(buffer.is_pooled());
    }

    #[test]
    fn test_oversized_request_is_unpooled() {
        let pool = create_pool(&[(4, 2)]);
        let buffer = pool.acquire(100).unwrap();

        assert_eq!(buffer.capacity(), 100);
        assert!(!buffer.is_pooled());

        pool.release(buffer);
        assert_eq!(pool.current_pool_size(), 0);
        assert_eq!(pool.stats().unpooled, 1);
        assert_eq!(pool.stats().dropped, 1);
    }

    #[test]
    fn test_reuse_after_release() {
        let pool = create_pool(&[(16, 2)]);

        let mut buffer = pool.acquire(16).unwrap();
        buffer.put_slice(b"abc").unwrap();
        pool.release(buffer);

        let buffer = pool.acquire(10).unwrap();
        assert!(buffer.is_empty());

        let stats = pool.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_zero_max_class_never_retains() {
        let pool = create_pool(&[(16, 0), (64, 1)]);

        let buffer = pool.acquire(10).unwrap();
        assert_eq!(buffer.capacity(), 16);
        pool.release(buffer);

        assert_eq!(pool.available_count(10), 0);
        assert_eq!(pool.stats().dropped, 1);
        assert_eq!(pool.size_classes()[0].created, 0);
    }

    #[test]
    fn test_excess_release_is_not_counted_on_loan() {
        let pool = create_pool(&[(4, 2)]);

        let held: Vec<_> = (0..3).map(|_| pool.acquire(4).unwrap()).collect();
        assert_eq!(pool.size_classes()[0].on_loan(), 3);
        for buffer in held {
            pool.release(buffer);
        }

        let info = pool.size_classes()[0];
        assert_eq!(info.available, 2);
        assert_eq!(info.created, 2);
        assert_eq!(info.on_loan(), 0);
    }

    #[test]
    fn test_foreign_buffer_dropped() {
        let pool = create_pool(&[(16, 2)]);
        let other = create_pool(&[(32, 2)]);

        // Same class index, different capacity
        let foreign = other.acquire(32).unwrap();
        pool.release(foreign);

        assert_eq!(pool.current_pool_size(), 0);
        assert_eq!(pool.stats().dropped, 1);
    }

    #[test]
    fn test_warm_up_and_clear() {
        let pool = create_pool(&[(4, 2), (1024, 1)]);

        assert_eq!(pool.warm_up().unwrap(), 3);
        assert_eq!(pool.current_pool_size(), 3);

        let classes = pool.size_classes();
        assert_eq!(classes[0].available, 2);
        assert_eq!(classes[0].created, 2);
        assert_eq!(classes[1].available, 1);

        pool.clear();
        assert_eq!(pool.current_pool_size(), 0);
        assert!(pool.size_classes().iter().all(|info| info.created == 0));
    }

    #[test]
    fn test_unpooled_config() {
        let pool = SizeClassPool::new(ByteBufferPoolConfig::unpooled()).unwrap();
        let buffer = pool.acquire(7).unwrap();
        assert_eq!(buffer.capacity(), 7);
        assert!(pool.size_classes().is_empty());
    }
}

//! ShardedPool - size classes split across several free-lists.
//!
//! Under heavy concurrency a single lock per class becomes the bottleneck.
//! Here every class owns `shards` buckets and each thread has a home shard
//! chosen from its thread id. A thread works on its home shard and only
//! visits siblings (without waiting on their locks) when the home shard is
//! empty on acquire or full on release.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, error, info, trace};

use crate::buffer::pooled_buffer::Origin;
use crate::buffer::size_class::{CreationTracker, SizeClassBucket, SizeClassTable};
use crate::buffer::{BufferPoolStats, ByteBufferPool, PooledBuffer, SizeClassInfo, StatsSnapshot};
use crate::common::{ByteBufferPoolConfig, Error, Result};

/// One size class, split into shards whose limits sum to the class maximum.
struct ShardedClass {
    capacity: usize,
    max_pooled: usize,
    shards: Box<[SizeClassBucket]>,
    tracker: CreationTracker,
}

impl ShardedClass {
    fn new(capacity: usize, max_pooled: usize, shard_count: usize, warning_pct: u8) -> Self {
        let base = max_pooled / shard_count;
        let extra = max_pooled % shard_count;
        let shards = (0..shard_count)
            .map(|i| SizeClassBucket::new(capacity, base + usize::from(i < extra)))
            .collect();

        Self {
            capacity,
            max_pooled,
            shards,
            tracker: CreationTracker::new(capacity, max_pooled, warning_pct),
        }
    }

    /// Shards in visiting order for a thread whose home shard is `home`.
    fn visit_order(&self, home: usize) -> impl Iterator<Item = &SizeClassBucket> {
        let n = self.shards.len();
        (0..n).map(move |step| &self.shards[(home + step) % n])
    }

    fn available(&self) -> usize {
        self.shards.iter().map(SizeClassBucket::len).sum()
    }
}

/// Buffer pool whose size classes are spread over per-thread shards.
///
/// Same contract as [`SizeClassPool`](crate::buffer::SizeClassPool): never
/// blocks, caps idle buffers per class at the configured maximum, and serves
/// oversized requests with unpooled buffers.
///
/// # Example
/// ```
/// use refstore::buffer::{ByteBufferPool, ShardedPool};
/// use refstore::ByteBufferPoolConfig;
///
/// let pool = ShardedPool::new(ByteBufferPoolConfig::default(), 4).unwrap();
/// let buffer = pool.acquire(100).unwrap();
/// assert_eq!(buffer.capacity(), 128);
/// pool.release(buffer);
/// assert_eq!(pool.available_count(100), 1);
/// ```
pub struct ShardedPool {
    table: SizeClassTable,
    classes: Box<[ShardedClass]>,
    shard_count: usize,
    stats: BufferPoolStats,
    /// Releases that landed on a sibling because the home shard was full.
    spills: AtomicU64,
}

impl ShardedPool {
    /// Create a pool with `shards` free-lists per class.
    ///
    /// # Errors
    /// Returns `Error::Config` if `shards` is zero or the config is invalid.
    pub fn new(config: ByteBufferPoolConfig, shards: usize) -> Result<Self> {
        config.validate()?;
        if shards == 0 {
            return Err(Error::config("shard count must be > 0"));
        }

        let table = SizeClassTable::new(config.pooled_buffer_counts.keys().copied());
        let classes: Box<[ShardedClass]> = table
            .capacities()
            .iter()
            .map(|&capacity| {
                let max_pooled = config.max_pooled(capacity).unwrap_or(0);
                debug!(capacity, max_pooled, shards, "creating sharded size class");
                ShardedClass::new(capacity, max_pooled, shards, config.warning_threshold_percent)
            })
            .collect();

        info!(
            strategy = "sharded",
            shards,
            classes = classes.len(),
            max_pooled_bytes = config.max_pooled_bytes(),
            "initialised byte buffer pool"
        );

        Ok(Self {
            table,
            classes,
            shard_count: shards,
            stats: BufferPoolStats::new(),
            spills: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Releases that went to a sibling shard.
    pub fn spills(&self) -> u64 {
        self.spills.load(Ordering::Relaxed)
    }

    /// Home shard of the calling thread.
    fn home_shard(&self) -> usize {
        let mut hasher = DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        (hasher.finish() % self.shard_count as u64) as usize
    }

    fn allocate_for_class(&self, class_index: usize, class: &ShardedClass) -> Result<PooledBuffer> {
        let buffer = PooledBuffer::allocate(class.capacity, Origin::Pooled { class_index })?;
        class.tracker.record_creation();
        Ok(buffer)
    }
}

impl ByteBufferPool for ShardedPool {
    fn acquire(&self, min_capacity: usize) -> Result<PooledBuffer> {
        let Some(class_index) = self.table.class_for(min_capacity) else {
            BufferPoolStats::record(&self.stats.unpooled);
            trace!(min_capacity, "allocating unpooled buffer");
            return PooledBuffer::allocate(min_capacity, Origin::Unpooled);
        };

        let class = &self.classes[class_index];
        let home = self.home_shard();
        let found = class.shards[home]
            .pop()
            .or_else(|| class.visit_order(home).skip(1).find_map(SizeClassBucket::try_pop));

        if let Some(mut buffer) = found {
            buffer.clear();
            BufferPoolStats::record(&self.stats.hits);
            return Ok(buffer);
        }

        BufferPoolStats::record(&self.stats.misses);
        self.allocate_for_class(class_index, class)
    }

    fn release(&self, buffer: PooledBuffer) {
        let class_index = match buffer.origin() {
            Origin::Unpooled => {
                BufferPoolStats::record(&self.stats.dropped);
                return;
            }
            Origin::Pooled { class_index } => class_index,
        };

        let class = match self.classes.get(class_index) {
            Some(class) if class.capacity == buffer.capacity() => class,
            _ => {
                error!(
                    capacity = buffer.capacity(),
                    class_index, "released buffer does not belong to this pool, dropping it"
                );
                BufferPoolStats::record(&self.stats.dropped);
                return;
            }
        };

        let home = self.home_shard();
        let mut buffer = match class.shards[home].push(buffer) {
            Ok(()) => {
                BufferPoolStats::record(&self.stats.returned);
                return;
            }
            Err(buffer) => buffer,
        };

        for shard in class.visit_order(home).skip(1) {
            match shard.try_push(buffer) {
                Ok(()) => {
                    self.spills.fetch_add(1, Ordering::Relaxed);
                    BufferPoolStats::record(&self.stats.returned);
                    return;
                }
                Err(back) => buffer = back,
            }
        }

        trace!(capacity = class.capacity, "all shards full, dropping buffer");
        class.tracker.forget(1);
        BufferPoolStats::record(&self.stats.dropped);
    }

    fn warm_up(&self) -> Result<usize> {
        let mut total = 0;
        for (class_index, class) in self.classes.iter().enumerate() {
            for shard in class.shards.iter() {
                total += shard.fill_with(|| self.allocate_for_class(class_index, class))?;
            }
        }
        debug!(buffers = total, "warmed up byte buffer pool");
        Ok(total)
    }

    fn clear(&self) {
        let mut total = 0;
        for class in self.classes.iter() {
            let drained: usize = class.shards.iter().map(SizeClassBucket::drain).sum();
            class.tracker.forget(drained);
            total += drained;
        }
        info!(buffers = total, "cleared idle buffers");
    }

    fn current_pool_size(&self) -> usize {
        self.classes.iter().map(ShardedClass::available).sum()
    }

    fn available_count(&self, min_capacity: usize) -> usize {
        self.table
            .class_for(min_capacity)
            .map_or(0, |idx| self.classes[idx].available())
    }

    fn size_classes(&self) -> Vec<SizeClassInfo> {
        self.classes
            .iter()
            .map(|class| SizeClassInfo {
                capacity: class.capacity,
                max_pooled: class.max_pooled,
                available: class.available(),
                created: class.tracker.created(),
            })
            .collect()
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

//! Size classes - the building blocks shared by every pool strategy.
//!
//! - [`SizeClassBucket`] - a lock-protected free-list of same-capacity buffers
//! - [`SizeClassTable`] - sorted lookup from a requested capacity to a class
//! - [`CreationTracker`] - counts buffers created for a class and logs when
//!   the count approaches the class maximum

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::warn;

use crate::buffer::PooledBuffer;

/// A lock-protected free-list of buffers that all share one capacity.
///
/// The free-list never holds more than `max_pooled` buffers. Buffers are
/// cleared before they go onto the list.
///
/// # Thread Safety
/// Each bucket has its own `Mutex`, so traffic for unrelated sizes never
/// contends on the same lock.
pub struct SizeClassBucket {
    /// Nominal capacity of every buffer in the bucket.
    capacity: usize,
    /// Maximum number of idle buffers kept.
    max_pooled: usize,
    /// Idle buffers (LIFO, most recently released first).
    free: Mutex<Vec<PooledBuffer>>,
}

impl SizeClassBucket {
    /// Create an empty bucket.
    pub fn new(capacity: usize, max_pooled: usize) -> Self {
        Self {
            capacity,
            max_pooled,
            free: Mutex::new(Vec::with_capacity(max_pooled)),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn max_pooled(&self) -> usize {
        self.max_pooled
    }

    /// Take an idle buffer, if any.
    #[inline]
    pub fn pop(&self) -> Option<PooledBuffer> {
        self.free.lock().pop()
    }

    /// Like [`pop`](Self::pop), but gives up instead of waiting for the lock.
    #[inline]
    pub fn try_pop(&self) -> Option<PooledBuffer> {
        self.free.try_lock()?.pop()
    }

    /// Put a buffer back on the free-list.
    ///
    /// Hands the buffer back as `Err` if the list is already full.
    pub fn push(&self, mut buffer: PooledBuffer) -> Result<(), PooledBuffer> {
        buffer.clear();
        let mut free = self.free.lock();
        if free.len() >= self.max_pooled {
            return Err(buffer);
        }
        free.push(buffer);
        Ok(())
    }

    /// Like [`push`](Self::push), but also hands the buffer back if the
    /// lock is contended.
    pub fn try_push(&self, mut buffer: PooledBuffer) -> Result<(), PooledBuffer> {
        buffer.clear();
        let Some(mut free) = self.free.try_lock() else {
            return Err(buffer);
        };
        if free.len() >= self.max_pooled {
            return Err(buffer);
        }
        free.push(buffer);
        Ok(())
    }

    /// Number of idle buffers.
    pub fn len(&self) -> usize {
        self.free.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every idle buffer, returning how many were dropped.
    pub fn drain(&self) -> usize {
        let drained = std::mem::take(&mut *self.free.lock());
        drained.len()
    }

    /// Fill the free-list up to its maximum using `allocate`.
    pub(crate) fn fill_with<F>(&self, mut allocate: F) -> crate::common::Result<usize>
    where
        F: FnMut() -> crate::common::Result<PooledBuffer>,
    {
        let mut free = self.free.lock();
        let mut added = 0;
        while free.len() < self.max_pooled {
            free.push(allocate()?);
            added += 1;
        }
        Ok(added)
    }
}

/// Ascending capacities of a pool's size classes.
///
/// Looking up the class for a request is a binary search with no allocation.
#[derive(Debug, Clone)]
pub struct SizeClassTable {
    capacities: Box<[usize]>,
}

impl SizeClassTable {
    /// Build from capacities in any order. Duplicates are removed.
    pub fn new(capacities: impl IntoIterator<Item = usize>) -> Self {
        let mut capacities: Vec<usize> = capacities.into_iter().collect();
        capacities.sort_unstable();
        capacities.dedup();
        Self {
            capacities: capacities.into_boxed_slice(),
        }
    }

    /// Index of the smallest class with capacity >= `min_capacity`.
    ///
    /// Returns `None` if the request is larger than every class.
    #[inline]
    pub fn class_for(&self, min_capacity: usize) -> Option<usize> {
        let idx = self.capacities.partition_point(|&c| c < min_capacity);
        (idx < self.capacities.len()).then_some(idx)
    }

    #[inline]
    pub fn capacity(&self, class_index: usize) -> Option<usize> {
        self.capacities.get(class_index).copied()
    }

    pub fn len(&self) -> usize {
        self.capacities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capacities.is_empty()
    }

    pub fn capacities(&self) -> &[usize] {
        &self.capacities
    }
}

/// Counts buffers created for one class and warns as the count nears the
/// class maximum.
///
/// The count falls whenever the pool drops one of its buffers, on a full
/// free-list at release or in `clear`, so it is the number of class buffers
/// alive: idle in the pool or on loan.
pub struct CreationTracker {
    capacity: usize,
    max_pooled: usize,
    warning_threshold: Option<usize>,
    warning_threshold_percent: u8,
    created: AtomicUsize,
}

impl CreationTracker {
    pub fn new(capacity: usize, max_pooled: usize, warning_threshold_percent: u8) -> Self {
        let warning_threshold = (max_pooled > 1).then(|| {
            let threshold = (max_pooled * warning_threshold_percent as usize).div_ceil(100);
            threshold.max(1)
        });

        Self {
            capacity,
            max_pooled,
            warning_threshold,
            warning_threshold_percent,
            created: AtomicUsize::new(0),
        }
    }

    /// Record a new buffer for the class.
    pub fn record_creation(&self) {
        let count = self.created.fetch_add(1, Ordering::Relaxed) + 1;

        if self.max_pooled == 0 {
            return;
        }
        if Some(count) == self.warning_threshold && count < self.max_pooled {
            warn!(
                capacity = self.capacity,
                created = count,
                max_pooled = self.max_pooled,
                "reached {}% of the pooled buffer limit",
                self.warning_threshold_percent
            );
        } else if count == self.max_pooled {
            warn!(
                capacity = self.capacity,
                max_pooled = self.max_pooled,
                "reached pooled buffer limit; excess buffers will be freed on release, \
                 consider raising the limit for this size"
            );
        }
    }

    /// Forget `n` buffers that have been dropped.
    pub fn forget(&self, n: usize) {
        let _ = self
            .created
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some(c.saturating_sub(n))
            });
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    pub fn warning_threshold(&self) -> Option<usize> {
        self.warning_threshold
    }
}

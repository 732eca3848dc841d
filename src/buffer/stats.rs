//! Buffer pool statistics tracking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics tracked by a buffer pool.
///
/// All fields are atomic for lock-free, thread-safe updates.
///
/// # Memory Ordering
/// We use `Ordering::Relaxed` for all operations because:
/// - We only need atomicity (no partial updates)
/// - We don't need synchronization between different counters
/// - Statistics are "eventually consistent" - exact ordering doesn't matter
///
/// # Example
/// ```
/// use refstore::buffer::BufferPoolStats;
/// use std::sync::atomic::Ordering;
///
/// let stats = BufferPoolStats::new();
/// stats.hits.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(stats.hits.load(Ordering::Relaxed), 1);
/// ```
#[derive(Debug)]
pub struct BufferPoolStats {
    /// Acquires served from a free-list.
    pub hits: AtomicU64,

    /// Acquires that allocated a new buffer for a size class.
    pub misses: AtomicU64,

    /// Acquires larger than every size class.
    pub unpooled: AtomicU64,

    /// Releases that put the buffer back on a free-list.
    pub returned: AtomicU64,

    /// Releases that dropped the buffer (full free-list or unpooled).
    pub dropped: AtomicU64,
}

impl BufferPoolStats {
    /// Create a new stats tracker with all counters at zero.
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            unpooled: AtomicU64::new(0),
            returned: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Share of pooled-size acquires served from a free-list (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        self.snapshot().hit_rate()
    }

    /// Get a snapshot of current statistics.
    ///
    /// This returns a non-atomic copy for display/logging.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            unpooled: self.unpooled.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.unpooled.store(0, Ordering::Relaxed);
        self.returned.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
    }
}

impl Default for BufferPoolStats {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of buffer pool statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub unpooled: u64,
    pub returned: u64,
    pub dropped: u64,
}

impl StatsSnapshot {
    /// Share of pooled-size acquires served from a free-list (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Total number of acquires.
    pub fn acquires(&self) -> u64 {
        self.hits + self.misses + self.unpooled
    }

    /// Total number of releases.
    pub fn releases(&self) -> u64 {
        self.returned + self.dropped
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats {{ hits: {}, misses: {}, unpooled: {}, returned: {}, dropped: {}, hit_rate: {:.2}% }}",
            self.hits,
            self.misses,
            self.unpooled,
            self.returned,
            self.dropped,
            self.hit_rate() * 100.0
        )
    }
}

/// Per-class view of a pool, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClassInfo {
    /// Capacity of every buffer in the class.
    pub capacity: usize,
    /// Configured maximum of idle buffers.
    pub max_pooled: usize,
    /// Idle buffers right now.
    pub available: usize,
    /// Buffers of the class still alive (idle or on loan).
    pub created: usize,
}

impl SizeClassInfo {
    /// Buffers currently held by callers, as far as the pool can tell.
    pub fn on_loan(&self) -> usize {
        self.created.saturating_sub(self.available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = BufferPoolStats::new();
        assert_eq!(stats.hits.load(Ordering::Relaxed), 0);
        assert_eq!(stats.misses.load(Ordering::Relaxed), 0);
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_stats_hit_rate_ignores_unpooled() {
        let stats = BufferPoolStats::new();

        stats.hits.fetch_add(7, Ordering::Relaxed);
        stats.misses.fetch_add(3, Ordering::Relaxed);
        stats.unpooled.fetch_add(100, Ordering::Relaxed);

        assert_eq!(stats.hit_rate(), 0.7);
        assert_eq!(stats.snapshot().acquires(), 110);
    }

    #[test]
    fn test_stats_reset() {
        let stats = BufferPoolStats::new();
        BufferPoolStats::record(&stats.returned);
        BufferPoolStats::record(&stats.dropped);
        assert_eq!(stats.snapshot().releases(), 2);

        stats.reset();

        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_stats_display() {
        let stats = BufferPoolStats::new();
        stats.hits.fetch_add(80, Ordering::Relaxed);
        stats.misses.fetch_add(20, Ordering::Relaxed);
        stats.dropped.fetch_add(5, Ordering::Relaxed);

        let display = format!("{}", stats.snapshot());

        assert!(display.contains("hits: 80"));
        assert!(display.contains("misses: 20"));
        assert!(display.contains("dropped: 5"));
        assert!(display.contains("80.00%"));
    }

    #[test]
    fn test_class_info_on_loan() {
        let info = SizeClassInfo {
            capacity: 16,
            max_pooled: 4,
            available: 1,
            created: 3,
        };
        assert_eq!(info.on_loan(), 2);
    }
}

//! The [`ByteBufferPool`] contract shared by every pool strategy.
//!
//! Strategies implement the small object-safe core (`acquire`, `release`
//! and diagnostics). The scoped helpers (`lease`, `with_buffer`,
//! `do_with_buffer`, `do_with_buffer_pair`) are provided on top of it and
//! guarantee the buffer goes back to the pool on every exit path, including
//! errors and panics inside the closure.

use std::sync::Arc;

use crate::buffer::{BufferLease, PooledBuffer, SizeClassInfo, StatsSnapshot};
use crate::common::Result;

/// A pool of reusable fixed-capacity byte buffers.
///
/// # Exhaustion policy
/// `acquire` never blocks. When a class's free-list is empty a new buffer of
/// the class capacity is allocated; on release, buffers beyond the class
/// maximum are dropped.
pub trait ByteBufferPool: Send + Sync {
    /// Get a buffer with capacity >= `min_capacity`.
    ///
    /// The buffer is cleared but its content is undefined.
    ///
    /// # Errors
    /// Returns `Error::AllocationFailure` if a new buffer is needed and
    /// memory cannot be obtained.
    fn acquire(&self, min_capacity: usize) -> Result<PooledBuffer>;

    /// Give a buffer back to the pool.
    ///
    /// Unpooled buffers, and buffers whose class free-list is full, are dropped.
    fn release(&self, buffer: PooledBuffer);

    /// Pre-fill every class up to its maximum, returning the number of
    /// buffers allocated.
    fn warm_up(&self) -> Result<usize>;

    /// Drop every idle buffer. Buffers on loan are unaffected.
    fn clear(&self);

    /// Total idle buffers across all classes.
    fn current_pool_size(&self) -> usize;

    /// Idle buffers in the class that would serve `min_capacity`.
    fn available_count(&self, min_capacity: usize) -> usize;

    /// Per-class diagnostics, in ascending capacity order.
    fn size_classes(&self) -> Vec<SizeClassInfo>;

    /// Counter snapshot.
    fn stats(&self) -> StatsSnapshot;

    /// Acquire a buffer that is released when the lease drops.
    fn lease(&self, min_capacity: usize) -> Result<BufferLease<'_, Self>>
    where
        Self: Sized,
    {
        let buffer = self.acquire(min_capacity)?;
        Ok(BufferLease::new(self, buffer))
    }

    /// Run `work` with a buffer and return its result.
    fn with_buffer<T, F>(&self, min_capacity: usize, work: F) -> Result<T>
    where
        Self: Sized,
        F: FnOnce(&mut PooledBuffer) -> Result<T>,
    {
        let mut lease = self.lease(min_capacity)?;
        work(&mut lease)
    }

    /// Run `work` with a buffer.
    fn do_with_buffer<F>(&self, min_capacity: usize, work: F) -> Result<()>
    where
        Self: Sized,
        F: FnOnce(&mut PooledBuffer),
    {
        let mut lease = self.lease(min_capacity)?;
        work(&mut lease);
        Ok(())
    }

    /// Run `work` with a key buffer and a value buffer.
    fn do_with_buffer_pair<T, F>(
        &self,
        min_key_capacity: usize,
        min_value_capacity: usize,
        work: F,
    ) -> Result<T>
    where
        Self: Sized,
        F: FnOnce(&mut PooledBuffer, &mut PooledBuffer) -> Result<T>,
    {
        let mut key = self.lease(min_key_capacity)?;
        let mut value = self.lease(min_value_capacity)?;
        work(&mut key, &mut value)
    }
}

impl<P: ByteBufferPool + ?Sized> ByteBufferPool for Arc<P> {
    fn acquire(&self, min_capacity: usize) -> Result<PooledBuffer> {
        (**self).acquire(min_capacity)
    }

    fn release(&self, buffer: PooledBuffer) {
        (**self).release(buffer)
    }

    fn warm_up(&self) -> Result<usize> {
        (**self).warm_up()
    }

    fn clear(&self) {
        (**self).clear()
    }

    fn current_pool_size(&self) -> usize {
        (**self).current_pool_size()
    }

    fn available_count(&self, min_capacity: usize) -> usize {
        (**self).available_count(min_capacity)
    }

    fn size_classes(&self) -> Vec<SizeClassInfo> {
        (**self).size_classes()
    }

    fn stats(&self) -> StatsSnapshot {
        (**self).stats()
    }
}

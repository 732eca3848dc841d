//! RAII guard for pooled buffers.
//!
//! A [`BufferLease`] derefs to the [`PooledBuffer`] it holds and releases
//! it back to its pool when dropped, whether the scope ends normally, by
//! `?` or by unwinding.

use std::ops::{Deref, DerefMut};

use crate::buffer::{ByteBufferPool, PooledBuffer};

/// Exclusive, scoped access to a pooled buffer.
///
/// # Example
/// ```
/// use refstore::buffer::{ByteBufferPool, SizeClassPool};
/// use refstore::ByteBufferPoolConfig;
///
/// let pool = SizeClassPool::new(ByteBufferPoolConfig::default()).unwrap();
/// {
///     let mut lease = pool.lease(32).unwrap();
///     lease.put_slice(b"key").unwrap();
///     // lease drops here, buffer goes back to the pool
/// }
/// assert_eq!(pool.available_count(32), 1);
/// ```
pub struct BufferLease<'a, P: ByteBufferPool + ?Sized> {
    /// Pool to release into on drop.
    pool: &'a P,
    /// The leased buffer.
    buffer: PooledBuffer,
}

impl<'a, P: ByteBufferPool + ?Sized> BufferLease<'a, P> {
    pub(crate) fn new(pool: &'a P, buffer: PooledBuffer) -> Self {
        Self { pool, buffer }
    }

    /// Detach the buffer from the lease. The caller becomes responsible for
    /// releasing it.
    pub fn into_inner(mut self) -> PooledBuffer {
        let buffer = std::mem::take(&mut self.buffer);
        std::mem::forget(self);
        buffer
    }
}

impl<P: ByteBufferPool + ?Sized> Deref for BufferLease<'_, P> {
    type Target = PooledBuffer;

    #[inline]
    fn deref(&self) -> &PooledBuffer {
        &self.buffer
    }
}

impl<P: ByteBufferPool + ?Sized> DerefMut for BufferLease<'_, P> {
    #[inline]
    fn deref_mut(&mut self) -> &mut PooledBuffer {
        &mut self.buffer
    }
}

impl<P: ByteBufferPool + ?Sized> Drop for BufferLease<'_, P> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buffer));
    }
}

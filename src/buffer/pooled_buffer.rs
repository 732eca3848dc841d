//! PooledBuffer - a fixed-capacity byte block handed out by a pool.
//!
//! A [`PooledBuffer`] owns its memory and carries a write cursor (`len`).
//! Bytes before the cursor are the buffer's contents; bytes after it are
//! spare capacity with undefined content. Clearing resets the cursor only,
//! the memory is not zeroed.

use std::fmt;

use crate::common::{Error, Result};

/// Where a buffer came from, and therefore where it goes on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// Allocated for the size class at this index of the owning pool.
    Pooled { class_index: usize },
    /// One-off allocation, freed on release.
    Unpooled,
}

/// An owned, mutable, fixed-capacity byte block.
///
/// Between `acquire` and `release` the caller exclusively owns the buffer.
/// It cannot be cloned, so two holders can never see the same memory.
///
/// # Example
/// ```
/// use refstore::buffer::{ByteBufferPool, SizeClassPool};
/// use refstore::ByteBufferPoolConfig;
///
/// let pool = SizeClassPool::new(ByteBufferPoolConfig::default()).unwrap();
/// let mut buffer = pool.acquire(10).unwrap();
/// buffer.put_slice(b"hello").unwrap();
/// assert_eq!(buffer.as_slice(), b"hello");
/// assert!(buffer.capacity() >= 10);
/// pool.release(buffer);
/// ```
pub struct PooledBuffer {
    data: Box<[u8]>,
    len: usize,
    origin: Origin,
}

impl PooledBuffer {
    /// Allocate a new buffer of exactly `capacity` bytes.
    ///
    /// # Errors
    /// Returns `Error::AllocationFailure` if the memory cannot be reserved.
    pub(crate) fn allocate(capacity: usize, origin: Origin) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| Error::AllocationFailure { capacity })?;
        data.resize(capacity, 0);

        Ok(Self {
            data: data.into_boxed_slice(),
            len: 0,
            origin,
        })
    }

    #[inline]
    pub(crate) fn origin(&self) -> Origin {
        self.origin
    }

    /// Total number of bytes the buffer can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes left between the cursor and the end of the buffer.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.len
    }

    /// Whether the buffer will go back to a size-class free-list on release.
    #[inline]
    pub fn is_pooled(&self) -> bool {
        matches!(self.origin, Origin::Pooled { .. })
    }

    /// Reset the write cursor. Content is left as-is.
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// The written bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The whole block, including bytes past the cursor.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The bytes past the cursor.
    #[inline]
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.len..]
    }

    /// Move the cursor to `len`.
    ///
    /// # Errors
    /// Returns `Error::BufferOverflow` if `len` exceeds the capacity.
    pub fn set_len(&mut self, len: usize) -> Result<()> {
        if len > self.data.len() {
            return Err(self.overflow(len));
        }
        self.len = len;
        Ok(())
    }

    /// Advance the cursor past `n` bytes written through [`spare_mut`](Self::spare_mut).
    pub fn advance(&mut self, n: usize) -> Result<()> {
        let end = self.end_after(n)?;
        self.set_len(end)
    }

    /// Append bytes at the cursor.
    ///
    /// # Errors
    /// Returns `Error::BufferOverflow` if the bytes don't fit; nothing is written.
    pub fn put_slice(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self.end_after(bytes.len())?;
        if end > self.data.len() {
            return Err(self.overflow(end));
        }
        self.data[self.len..end].copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }

    #[inline]
    pub fn put_u8(&mut self, byte: u8) -> Result<()> {
        self.put_slice(&[byte])
    }

    /// Append a big-endian `i64`.
    #[inline]
    pub fn put_i64_be(&mut self, value: i64) -> Result<()> {
        self.put_slice(&value.to_be_bytes())
    }

    fn end_after(&self, n: usize) -> Result<usize> {
        self.len
            .checked_add(n)
            .ok_or_else(|| self.overflow(usize::MAX))
    }

    fn overflow(&self, requested: usize) -> Error {
        Error::BufferOverflow {
            capacity: self.data.len(),
            requested,
        }
    }
}

impl Default for PooledBuffer {
    /// A zero-capacity unpooled buffer. Does not allocate.
    fn default() -> Self {
        Self {
            data: Box::default(),
            len: 0,
            origin: Origin::Unpooled,
        }
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len)
            .field("origin", &self.origin)
            .finish()
    }
}

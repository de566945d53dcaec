//! Scoped reusable byte buffers (C5, §4.5).

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

/// Pool of reusable byte buffers, capped at `max_pooled_buffers`.
///
/// Acquisition is scoped: [`BufferPool::acquire`] hands out a
/// [`PooledBuffer`] whose `Drop` impl clears and returns the underlying
/// `Vec<u8>` to the pool, so callers cannot forget to release it on any
/// exit path (including `?`-propagated errors).
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
}

impl BufferPool {
    /// Creates an empty pool capped at `max_pooled` idle buffers.
    #[must_use]
    pub fn new(max_pooled: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            max_pooled,
        }
    }

    /// Acquires an empty, writable buffer -- either recycled from the pool
    /// or freshly allocated if the pool is empty.
    #[must_use]
    pub fn acquire(self: &std::sync::Arc<Self>) -> PooledBuffer {
        let buf = self.buffers.lock().pop().unwrap_or_default();
        PooledBuffer {
            buf: Some(buf),
            pool: std::sync::Arc::clone(self),
        }
    }

    fn release(&self, mut buf: Vec<u8>) {
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.max_pooled {
            buf.clear();
            buffers.push(buf);
        }
        // Otherwise the buffer is simply dropped -- the pool is at capacity.
    }

    /// Number of idle buffers currently held by the pool. Test/diagnostic use.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.buffers.lock().len()
    }
}

/// An empty, writable byte buffer scoped to its acquisition.
///
/// Returned to the owning [`BufferPool`] when dropped.
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    pool: std::sync::Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        self.buf.as_ref().expect("buffer taken before drop")
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut().expect("buffer taken before drop")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn acquired_buffer_is_empty_and_writable() {
        let pool = Arc::new(BufferPool::new(4));
        let mut buf = pool.acquire();
        assert!(buf.is_empty());
        buf.extend_from_slice(b"hello");
        assert_eq!(&buf[..], b"hello");
    }

    #[test]
    fn released_buffer_is_recycled_and_cleared() {
        let pool = Arc::new(BufferPool::new(4));
        {
            let mut buf = pool.acquire();
            buf.extend_from_slice(b"leftover");
        }
        assert_eq!(pool.idle_count(), 1);
        let recycled = pool.acquire();
        assert!(recycled.is_empty(), "recycled buffer must be cleared");
    }

    #[test]
    fn pool_is_capped_at_max_pooled_buffers() {
        let pool = Arc::new(BufferPool::new(2));
        let bufs: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        drop(bufs);
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn buffer_is_released_even_on_early_return() {
        let pool = Arc::new(BufferPool::new(4));
        fn uses_buffer(pool: &Arc<BufferPool>) -> Option<()> {
            let _buf = pool.acquire();
            None? // early return via `?`
        }
        let _ = uses_buffer(&pool);
        assert_eq!(pool.idle_count(), 1);
    }
}

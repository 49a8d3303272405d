//! Free-list pool of reusable read buffers.
//!
//! Every upgrade binds one pooled buffer to its hijacked socket (as the read
//! buffer of the framed transport) and returns it when the connection is torn
//! down. The pool is the only mutable state shared by concurrent upgrades;
//! its lock is held only for the push/pop bookkeeping, never across I/O.

use std::sync::Mutex;

use bytes::BytesMut;

/// Shared arena of read buffers sized to the configured reader capacity.
///
/// `acquire` pops a previously released buffer or allocates a fresh one;
/// `release` clears the buffer before shelving it, so a reused buffer can
/// never replay bytes that were read from an earlier socket.
pub struct BufferPool {
    buf_size: usize,
    shelf: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    /// Creates an empty pool handing out buffers with `buf_size` capacity.
    pub fn new(buf_size: usize) -> Self {
        Self {
            buf_size,
            shelf: Mutex::new(Vec::new()),
        }
    }

    /// Takes a buffer from the pool, allocating when the shelf is empty.
    pub fn acquire(&self) -> BytesMut {
        let reused = self.shelf.lock().expect("buffer pool poisoned").pop();
        reused.unwrap_or_else(|| BytesMut::with_capacity(self.buf_size))
    }

    /// Returns a buffer to the pool after unbinding it from its connection.
    ///
    /// The buffer is cleared first; stale bytes from the previous socket must
    /// not survive into the next acquisition.
    pub fn release(&self, mut buf: BytesMut) {
        buf.clear();
        self.shelf.lock().expect("buffer pool poisoned").push(buf);
    }

    /// Number of buffers currently shelved.
    pub fn idle(&self) -> usize {
        self.shelf.lock().expect("buffer pool poisoned").len()
    }

    /// Capacity the pool reserves for fresh buffers.
    pub fn buf_size(&self) -> usize {
        self.buf_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn acquire_allocates_with_the_configured_capacity() {
        let pool = BufferPool::new(4096);
        let buf = pool.acquire();
        assert!(buf.capacity() >= 4096);
        assert!(buf.is_empty());
    }

    #[test]
    fn released_buffers_are_reused() {
        let pool = BufferPool::new(64);
        let buf = pool.acquire();
        assert_eq!(pool.idle(), 0);

        pool.release(buf);
        assert_eq!(pool.idle(), 1);

        let _again = pool.acquire();
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn no_residual_bytes_after_release() {
        let pool = BufferPool::new(64);

        let mut buf = pool.acquire();
        buf.extend_from_slice(b"bytes read from socket A");
        pool.release(buf);

        let buf = pool.acquire();
        assert!(buf.is_empty());
    }

    #[test]
    fn concurrent_acquire_release() {
        let pool = Arc::new(BufferPool::new(128));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let mut buf = pool.acquire();
                        buf.extend_from_slice(b"scratch");
                        pool.release(buf);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(pool.idle() >= 1);
        assert!(pool.acquire().is_empty());
    }
}

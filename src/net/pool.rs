//! Read-Ahead Buffer Pool
//!
//! Connections borrow a [`ReadBuffer`] while their PROXY header is being
//! resolved and hand it back once the buffered bytes are drained. The
//! pool is a bounded lock-free queue: a miss allocates, and returning a
//! buffer to a full pool drops it, so neither side ever waits.

use std::future::poll_fn;
use std::io;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use bytes::{Buf, BytesMut};
use crossbeam_queue::ArrayQueue;
use tokio::io::ReadBuf;
use tracing::trace;

use super::transport::Transport;

/// Default number of idle buffers kept for reuse
pub const DEFAULT_POOL_CAPACITY: usize = 16;

/// Default read-ahead size per buffer
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Smallest read-ahead size; a full v1 header must fit
pub const MIN_BUFFER_SIZE: usize = 256;

static GLOBAL_POOL: OnceLock<Arc<BufferPool>> = OnceLock::new();

/// Read-ahead buffer that sits in front of a transport
///
/// The buffer never holds on to the transport; callers pass it in on every
/// [`fill`](ReadBuffer::fill).
#[derive(Debug)]
pub struct ReadBuffer {
    buf: BytesMut,
    size: usize,
}

impl ReadBuffer {
    pub fn with_capacity(size: usize) -> Self {
        let size = size.max(MIN_BUFFER_SIZE);
        Self {
            buf: BytesMut::with_capacity(size),
            size,
        }
    }

    /// Bytes read from the transport but not yet consumed
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Number of residual bytes
    pub fn residual(&self) -> usize {
        self.buf.len()
    }

    /// Perform one read from the transport into the free space
    ///
    /// Returns the number of bytes added, 0 meaning end of stream.
    pub async fn fill<T: Transport + ?Sized>(&mut self, transport: &T) -> io::Result<usize> {
        poll_fn(|cx| self.poll_fill(cx, transport)).await
    }

    /// Poll form of [`fill`](ReadBuffer::fill)
    ///
    /// The buffer is back to its filled length whenever this returns, so
    /// abandoning a pending fill loses nothing.
    pub fn poll_fill<T: Transport + ?Sized>(
        &mut self,
        cx: &mut Context<'_>,
        transport: &T,
    ) -> Poll<io::Result<usize>> {
        let start = self.buf.len();
        let want = self.size.saturating_sub(start).max(1);
        self.buf.resize(start + want, 0);

        let mut spare = ReadBuf::new(&mut self.buf[start..]);
        let polled = transport.poll_read(cx, &mut spare);
        let n = match polled {
            Poll::Ready(Ok(())) => spare.filled().len(),
            _ => 0,
        };
        self.buf.truncate(start + n);
        polled.map_ok(|()| n)
    }

    /// Discard `n` buffered bytes
    pub fn consume(&mut self, n: usize) {
        self.buf.advance(n.min(self.buf.len()));
    }

    /// Split off the first `n` buffered bytes
    pub fn take(&mut self, n: usize) -> BytesMut {
        self.buf.split_to(n.min(self.buf.len()))
    }

    /// Move buffered bytes into `out`, never past its remaining space
    pub fn copy_to(&mut self, out: &mut ReadBuf<'_>) -> usize {
        let n = out.remaining().min(self.buf.len());
        out.put_slice(&self.buf[..n]);
        self.buf.advance(n);
        n
    }

    /// Drop residual bytes and restore full capacity
    fn reset(&mut self) {
        self.buf.clear();
        self.buf.reserve(self.size);
    }
}

/// Bounded pool of idle [`ReadBuffer`]s
#[derive(Debug)]
pub struct BufferPool {
    idle: ArrayQueue<ReadBuffer>,
    buffer_size: usize,
}

impl BufferPool {
    /// Create a pool holding at most `capacity` idle buffers (at least one)
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        Self {
            idle: ArrayQueue::new(capacity.max(1)),
            buffer_size: buffer_size.max(MIN_BUFFER_SIZE),
        }
    }

    /// The process-wide pool, created on first use with default sizing
    pub fn global() -> Arc<BufferPool> {
        GLOBAL_POOL
            .get_or_init(|| Arc::new(BufferPool::default()))
            .clone()
    }

    /// Borrow an empty buffer, reusing an idle one when available
    pub fn acquire(&self) -> ReadBuffer {
        match self.idle.pop() {
            Some(buffer) => {
                trace!(idle = self.idle.len(), "reusing pooled read buffer");
                buffer
            }
            None => {
                trace!(size = self.buffer_size, "allocating read buffer");
                ReadBuffer::with_capacity(self.buffer_size)
            }
        }
    }

    /// Return a buffer; its residual bytes are discarded first
    pub fn release(&self, mut buffer: ReadBuffer) {
        buffer.reset();
        if self.idle.push(buffer).is_err() {
            trace!("buffer pool full, dropping read buffer");
        }
    }

    /// Number of idle buffers currently pooled
    pub fn idle(&self) -> usize {
        self.idle.len()
    }

    pub fn capacity(&self) -> usize {
        self.idle.capacity()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY, DEFAULT_BUFFER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::testing::MockTransport;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_miss_allocates_and_release_reuses() {
        let pool = BufferPool::new(2, 1024);
        assert_eq!(pool.idle(), 0);

        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.idle(), 2);

        // Full pool drops instead of growing
        pool.release(c);
        assert_eq!(pool.idle(), 2);

        let _ = pool.acquire();
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_zero_capacity_still_pools_one() {
        let pool = BufferPool::new(0, 0);
        assert_eq!(pool.capacity(), 1);
        assert_eq!(pool.buffer_size(), MIN_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn test_release_discards_residual_bytes() {
        let pool = BufferPool::new(1, 1024);
        let transport = MockTransport::new([&b"left over from a previous connection"[..]]);

        let mut buffer = pool.acquire();
        buffer.fill(&transport).await.unwrap();
        assert!(buffer.residual() > 0);
        pool.release(buffer);

        let reused = pool.acquire();
        assert_eq!(reused.residual(), 0);
        assert_eq!(reused.buffered(), b"");
    }

    #[tokio::test]
    async fn test_copy_to_respects_requested_extent() {
        let transport = MockTransport::new([&b"0123456789"[..]]);
        let mut buffer = ReadBuffer::with_capacity(64);
        buffer.fill(&transport).await.unwrap();

        let mut out = [0xAAu8; 8];
        let mut window = ReadBuf::new(&mut out[..4]);
        assert_eq!(buffer.copy_to(&mut window), 4);
        assert_eq!(window.remaining(), 0);
        assert_eq!(&out, b"0123\xAA\xAA\xAA\xAA");
        assert_eq!(buffer.buffered(), b"456789");
    }

    #[tokio::test]
    async fn test_fill_error_leaves_buffer_unchanged() {
        let transport = MockTransport::failing(io::ErrorKind::ConnectionReset);
        let mut buffer = ReadBuffer::with_capacity(64);

        let err = buffer.fill(&transport).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(buffer.residual(), 0);
    }

    #[test]
    fn test_global_pool_is_shared() {
        assert!(Arc::ptr_eq(&BufferPool::global(), &BufferPool::global()));
    }
}

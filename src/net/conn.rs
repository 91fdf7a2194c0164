//! PROXY-Aware Connection
//!
//! Wraps an accepted transport and resolves its PROXY header lazily, on
//! the first address lookup or read. Payload that arrived together with
//! the header is served from the borrowed read-ahead buffer; once that is
//! drained the buffer goes back to the pool and reads hit the transport
//! directly.
//!
//! # Concurrency
//!
//! `remote_addr`, `read` and `close` may run concurrently on one
//! connection. The header is parsed at most once; resolution is a
//! write-once cell. The state lock only guards buffer hand-offs and is
//! never held across an await on the transport, so `close` is never stuck
//! behind a pending read.
//!
//! Resolution is cancel safe: dropping a pending `remote_addr` or `read`
//! puts the partly filled buffer back, and the next caller picks up where
//! it stopped.
//!
//! # Tokio I/O
//!
//! [`ProxyConn`] also implements `AsyncRead` and `AsyncWrite`, so it can be
//! handed to `tokio::io::copy`, a TLS acceptor or an HTTP server. Once it
//! is borrowed mutably like that, a [`CloseHandle`] can still close it
//! from another task.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::OnceCell;
use tracing::debug;

use super::pool::{BufferPool, ReadBuffer};
use super::transport::Transport;
use crate::proxy::{parser, Address, Header, ProxyError};

/// Where a connection is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Header not resolved yet (or resolution in flight)
    Unresolved,
    /// Header resolved, buffered payload still held
    Draining,
    /// Header resolved, reads go straight to the transport
    Direct,
    /// Header resolution failed; reads return the cached error
    Failed,
}

#[derive(Debug)]
struct ConnState {
    /// Borrowed from the pool until drained, failed or closed
    buffer: Option<ReadBuffer>,
    closed: bool,
}

/// State shared between a connection and its close handles
struct Shared<T> {
    transport: T,
    pool: Arc<BufferPool>,
    header_timeout: Option<Duration>,
    state: Mutex<ConnState>,
    resolution: OnceCell<Result<Header, ProxyError>>,
}

/// Read-ahead buffer taken out of the state while the header is read
///
/// Dropping the lease hands the buffer back: to the state when the read
/// succeeded or was abandoned, to the pool when it failed or the
/// connection was closed meanwhile.
struct BufferLease<'a, T> {
    shared: &'a Shared<T>,
    buffer: Option<ReadBuffer>,
    failed: bool,
}

impl<T> Drop for BufferLease<'_, T> {
    fn drop(&mut self) {
        let Some(buffer) = self.buffer.take() else {
            return;
        };
        let release = {
            let mut state = self.shared.state.lock();
            if self.failed || state.closed {
                Some(buffer)
            } else {
                state.buffer = Some(buffer);
                None
            }
        };
        if let Some(buffer) = release {
            self.shared.pool.release(buffer);
        }
    }
}

impl<T: Transport> Shared<T> {
    fn phase(&self) -> Phase {
        match self.resolution.get() {
            None => Phase::Unresolved,
            Some(Err(_)) => Phase::Failed,
            Some(Ok(_)) if self.state.lock().buffer.is_some() => Phase::Draining,
            Some(Ok(_)) => Phase::Direct,
        }
    }

    async fn resolve(&self) -> &Result<Header, ProxyError> {
        self.resolution.get_or_init(|| self.read_preamble()).await
    }

    /// Runs to completion at most once per connection; the buffer is
    /// leased out of the state so the lock is free while reading.
    async fn read_preamble(&self) -> Result<Header, ProxyError> {
        let buffer = {
            let mut state = self.state.lock();
            // Before resolution only close takes the buffer away
            state.buffer.take()
        };
        let mut lease = BufferLease {
            shared: self,
            buffer,
            failed: false,
        };

        let result = match lease.buffer.as_mut() {
            Some(buffer) => self.read_header(buffer).await,
            None => Err(ProxyError::Closed),
        };
        lease.failed = result.is_err();
        drop(lease);

        match &result {
            Ok(header) => debug!(
                source = %header.source,
                destination = %header.destination,
                "PROXY header resolved"
            ),
            Err(e) => debug!(error = %e, "PROXY header rejected"),
        }
        result
    }

    async fn read_header(&self, buffer: &mut ReadBuffer) -> Result<Header, ProxyError> {
        match self.header_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, parser::read_header(buffer, &self.transport)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(ProxyError::Timeout),
                }
            }
            None => parser::read_header(buffer, &self.transport).await,
        }
    }

    /// Serve from the read-ahead buffer while it holds residual bytes
    ///
    /// Returns `false` once the connection should read the transport
    /// directly; the buffer is released at that point.
    fn read_buffered(&self, out: &mut ReadBuf<'_>) -> bool {
        let (buffer, served) = {
            let mut state = self.state.lock();
            let Some(buffer) = state.buffer.as_mut() else {
                return false;
            };
            if buffer.residual() > 0 {
                buffer.copy_to(out);
                if buffer.residual() > 0 {
                    return true;
                }
                (state.buffer.take(), true)
            } else {
                (state.buffer.take(), false)
            }
        };

        if let Some(buffer) = buffer {
            self.pool.release(buffer);
        }
        served
    }

    fn poll_read_resolved(&self, cx: &mut Context<'_>, out: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if self.read_buffered(out) {
            return Poll::Ready(Ok(()));
        }
        self.transport.poll_read(cx, out)
    }

    async fn close(&self) -> io::Result<()> {
        let buffer = {
            let mut state = self.state.lock();
            state.closed = true;
            state.buffer.take()
        };
        if let Some(buffer) = buffer {
            self.pool.release(buffer);
        }
        self.transport.close().await
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        if let Some(buffer) = self.state.get_mut().buffer.take() {
            self.pool.release(buffer);
        }
    }
}

type Resolving = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A transport whose remote address comes from its PROXY header
pub struct ProxyConn<T> {
    shared: Arc<Shared<T>>,
    /// Resolution started from a poll-based read, kept so it can resume
    resolving: Mutex<Option<Resolving>>,
}

impl<T: Transport + 'static> ProxyConn<T> {
    /// Wrap `transport`, borrowing a read-ahead buffer from `pool`
    pub fn new(transport: T, pool: Arc<BufferPool>, header_timeout: Option<Duration>) -> Self {
        let buffer = pool.acquire();
        Self {
            shared: Arc::new(Shared {
                transport,
                pool,
                header_timeout,
                state: Mutex::new(ConnState {
                    buffer: Some(buffer),
                    closed: false,
                }),
                resolution: OnceCell::new(),
            }),
            resolving: Mutex::new(None),
        }
    }

    /// The resolved header, or the error that prevented resolving it
    pub async fn proxy_header(&self) -> Result<&Header, ProxyError> {
        self.shared.resolve().await.as_ref().map_err(Clone::clone)
    }

    pub fn phase(&self) -> Phase {
        self.shared.phase()
    }

    pub fn get_ref(&self) -> &T {
        &self.shared.transport
    }

    /// Handle that closes this connection from elsewhere
    pub fn close_handle(&self) -> CloseHandle<T> {
        CloseHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Drive resolution from a poll context
    fn poll_resolve(&self, cx: &mut Context<'_>) -> Poll<&Result<Header, ProxyError>> {
        loop {
            if let Some(resolution) = self.shared.resolution.get() {
                return Poll::Ready(resolution);
            }
            let mut resolving = self.resolving.lock();
            let future = resolving.get_or_insert_with(|| -> Resolving {
                let shared = Arc::clone(&self.shared);
                Box::pin(async move {
                    shared.resolve().await;
                })
            });
            ready!(future.as_mut().poll(cx));
            *resolving = None;
        }
    }
}

#[async_trait]
impl<T: Transport + 'static> Transport for ProxyConn<T> {
    fn poll_read(&self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if let Err(e) = ready!(self.poll_resolve(cx)) {
            return Poll::Ready(Err(e.clone().into()));
        }
        self.shared.poll_read_resolved(cx, buf)
    }

    fn poll_write(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.shared.transport.poll_write(cx, buf)
    }

    fn poll_flush(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shared.transport.poll_flush(cx)
    }

    fn poll_shutdown(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shared.transport.poll_shutdown(cx)
    }

    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if let Err(e) = self.shared.resolve().await {
            return Err(e.clone().into());
        }
        let mut buf = ReadBuf::new(buf);
        std::future::poll_fn(|cx| self.shared.poll_read_resolved(cx, &mut buf)).await?;
        Ok(buf.filled().len())
    }

    async fn close(&self) -> io::Result<()> {
        self.shared.close().await
    }

    /// Source address from the PROXY header, or the transport's own peer
    /// address when the header could not be resolved
    async fn remote_addr(&self) -> io::Result<Address> {
        match self.shared.resolve().await {
            Ok(header) => Ok(header.source.clone()),
            Err(_) => self.shared.transport.remote_addr().await,
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.shared.transport.local_addr()
    }
}

impl<T: Transport + 'static> AsyncRead for ProxyConn<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Transport::poll_read(&*self, cx, buf)
    }
}

impl<T: Transport + 'static> AsyncWrite for ProxyConn<T> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Transport::poll_write(&*self, cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Transport::poll_flush(&*self, cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Transport::poll_shutdown(&*self, cx)
    }
}

impl<T: Transport + fmt::Debug + 'static> fmt::Debug for ProxyConn<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConn")
            .field("transport", &self.shared.transport)
            .field("phase", &self.phase())
            .finish()
    }
}

/// Closes a [`ProxyConn`] from another task
pub struct CloseHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> CloseHandle<T> {
    /// Same as [`Transport::close`] on the connection
    pub async fn close(&self) -> io::Result<()> {
        self.shared.close().await
    }
}

impl<T> Clone for CloseHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for CloseHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseHandle").finish_non_exhaustive()
    }
}

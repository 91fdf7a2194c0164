//! Transport and Acceptor Abstractions
//!
//! Byte-stream and listener capabilities the PROXY wrappers consume and
//! re-expose. Every operation takes `&self` so a connection can be shared
//! between the task reading it and the task closing it. The poll methods
//! are the primitives; the async methods are built on them, and concrete
//! types also implement tokio's `AsyncRead`/`AsyncWrite` through them.

use std::future::poll_fn;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{ready, Context, Poll};

use async_trait::async_trait;
use socket2::SockRef;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Notify;

use crate::proxy::Address;

/// A connected byte stream
#[async_trait]
pub trait Transport: Send + Sync {
    /// Attempt to read into `buf`, registering `cx` for wakeup if nothing is ready
    ///
    /// Only the most recent waker is kept, so concurrent readers of one
    /// transport must serialize their reads.
    fn poll_read(&self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>>;

    /// Attempt to write from `buf`, returning the number of bytes written
    fn poll_write(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>>;

    fn poll_flush(&self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    /// Shut down the write direction
    fn poll_shutdown(&self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    /// Read into `buf`, returning the number of bytes read (0 at end of stream)
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut buf = ReadBuf::new(buf);
        poll_fn(|cx| self.poll_read(cx, &mut buf)).await?;
        Ok(buf.filled().len())
    }

    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        poll_fn(|cx| self.poll_write(cx, buf)).await
    }

    /// Write the whole of `buf`
    async fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf).await? {
                0 => return Err(io::ErrorKind::WriteZero.into()),
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }

    /// Close the stream. Pending and later operations fail; repeated calls are no-ops
    async fn close(&self) -> io::Result<()>;

    /// Address of the remote peer
    async fn remote_addr(&self) -> io::Result<Address>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Something that yields connected transports
#[async_trait]
pub trait Acceptor: Send + Sync {
    type Conn: Transport + 'static;

    async fn accept(&self) -> io::Result<Self::Conn>;

    /// Stop accepting. A pending `accept` fails with `NotConnected`, as do
    /// later ones; connections already accepted are unaffected.
    async fn close(&self) -> io::Result<()>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

fn closed_error(what: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, what)
}

/// [`Transport`] over a tokio TCP stream
///
/// Closing shuts the socket down in both directions, which wakes any
/// task blocked in `read` or `write`; the descriptor is freed on drop.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    peer: SocketAddr,
    local: SocketAddr,
    closed: AtomicBool,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        let local = stream.local_addr()?;
        Ok(Self {
            stream,
            peer,
            local,
            closed: AtomicBool::new(false),
        })
    }

    pub async fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        Self::new(TcpStream::connect(addr).await?)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.is_closed() {
            return Err(closed_error("transport closed"));
        }
        Ok(())
    }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        match SockRef::from(&self.stream).shutdown(how) {
            Ok(()) => Ok(()),
            // Peer already tore the connection down
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn poll_read(&self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        loop {
            self.ensure_open()?;
            ready!(self.stream.poll_read_ready(cx))?;
            self.ensure_open()?;
            match self.stream.try_read(buf.initialize_unfilled()) {
                Ok(n) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                // Readiness was stale; poll again to re-register
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
    }

    fn poll_write(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        loop {
            self.ensure_open()?;
            ready!(self.stream.poll_write_ready(cx))?;
            self.ensure_open()?;
            match self.stream.try_write(buf) {
                Ok(n) => return Poll::Ready(Ok(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
    }

    fn poll_shutdown(&self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.ensure_open()?;
        Poll::Ready(self.shutdown(Shutdown::Write))
    }

    async fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shutdown(Shutdown::Both)
    }

    async fn remote_addr(&self) -> io::Result<Address> {
        Ok(self.peer.into())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }
}

impl AsyncRead for TcpTransport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Transport::poll_read(&*self, cx, buf)
    }
}

impl AsyncWrite for TcpTransport {
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

/// [`Acceptor`] over a tokio TCP listener
///
/// `close` stops accepting; the listening socket itself is freed on drop.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
    closed: AtomicBool,
    shutdown: Notify,
}

impl TcpAcceptor {
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr).await?,
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    type Conn = TcpTransport;

    async fn accept(&self) -> io::Result<TcpTransport> {
        // Created before the flag check so a concurrent close is not missed
        let shutdown = self.shutdown.notified();
        if self.is_closed() {
            return Err(closed_error("listener closed"));
        }

        tokio::select! {
            accepted = self.listener.accept() => {
                let (stream, _) = accepted?;
                TcpTransport::new(stream)
            }
            _ = shutdown => Err(closed_error("listener closed")),
        }
    }

    async fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::Release);
        self.shutdown.notify_waiters();
        Ok(())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

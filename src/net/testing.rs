//! Scripted in-memory transport for unit tests

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll, Waker};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::ReadBuf;

use super::transport::Transport;
use crate::proxy::Address;

pub(crate) const PEER_ADDR: &str = "10.9.8.7:5555";
pub(crate) const LOCAL_ADDR: &str = "10.0.0.1:8080";

struct Script {
    chunks: VecDeque<Vec<u8>>,
    /// Reader parked on an exhausted hanging script
    waiting: Option<Waker>,
}

/// Serves one scripted chunk per read
///
/// Once the script runs out it either reports end of stream or, when
/// built with [`MockTransport::hanging`], stays pending until more data is
/// fed or the transport is closed.
pub(crate) struct MockTransport {
    script: Mutex<Script>,
    failure: Option<io::ErrorKind>,
    hang_when_drained: bool,
    closed: AtomicBool,
    reads: AtomicUsize,
    written: Mutex<Vec<u8>>,
}

impl MockTransport {
    pub(crate) fn new<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        Self {
            script: Mutex::new(Script {
                chunks: chunks.into_iter().map(|c| c.as_ref().to_vec()).collect(),
                waiting: None,
            }),
            failure: None,
            hang_when_drained: false,
            closed: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
            written: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn hanging<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        Self {
            hang_when_drained: true,
            ..Self::new(chunks)
        }
    }

    /// Every read fails with `kind`
    pub(crate) fn failing(kind: io::ErrorKind) -> Self {
        Self {
            failure: Some(kind),
            ..Self::new(Vec::<Vec<u8>>::new())
        }
    }

    /// Append a chunk and wake a parked reader
    pub(crate) fn feed(&self, chunk: &[u8]) {
        let waiting = {
            let mut script = self.script.lock();
            script.chunks.push_back(chunk.to_vec());
            script.waiting.take()
        };
        if let Some(waker) = waiting {
            waker.wake();
        }
    }

    /// Number of reads that completed so far
    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn poll_read(&self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let mut script = self.script.lock();
        if self.is_closed() {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::NotConnected, "mock closed")));
        }
        if let Some(kind) = self.failure {
            self.reads.fetch_add(1, Ordering::SeqCst);
            return Poll::Ready(Err(io::Error::new(kind, "mock failure")));
        }
        match script.chunks.pop_front() {
            Some(mut chunk) => {
                let n = buf.remaining().min(chunk.len());
                buf.put_slice(&chunk[..n]);
                if n < chunk.len() {
                    script.chunks.push_front(chunk.split_off(n));
                }
            }
            None if self.hang_when_drained => {
                script.waiting = Some(cx.waker().clone());
                return Poll::Pending;
            }
            None => {}
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }

    fn poll_write(&self, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if self.is_closed() {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::NotConnected, "mock closed")));
        }
        self.written.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    async fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let waiting = self.script.lock().waiting.take();
        if let Some(waker) = waiting {
            waker.wake();
        }
        Ok(())
    }

    async fn remote_addr(&self) -> io::Result<Address> {
        let peer: SocketAddr = PEER_ADDR
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        Ok(peer.into())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        LOCAL_ADDR
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }
}

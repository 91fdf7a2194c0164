//! PROXY-Aware Listener
//!
//! Wraps an [`Acceptor`] so every accepted transport comes back as a
//! [`ProxyConn`]. Accepting never reads from the connection; a slow or
//! silent peer only delays its own first read or address lookup.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::ToSocketAddrs;
use tracing::debug;

use super::conn::ProxyConn;
use super::pool::BufferPool;
use super::transport::{Acceptor, TcpAcceptor, Transport};
use crate::config::ProxyProtocolConfig;

/// Listener whose connections report their PROXY source address
#[derive(Debug)]
pub struct ProxyListener<A> {
    inner: A,
    pool: Arc<BufferPool>,
    header_timeout: Option<Duration>,
}

impl<A: Acceptor> ProxyListener<A> {
    /// Wrap `inner`, sharing the process-wide buffer pool
    pub fn new(inner: A) -> Self {
        Self::with_pool(inner, BufferPool::global())
    }

    pub fn with_pool(inner: A, pool: Arc<BufferPool>) -> Self {
        Self {
            inner,
            pool,
            header_timeout: None,
        }
    }

    /// Wrap `inner` with a dedicated pool and header deadline from `config`
    pub fn with_config(inner: A, config: &ProxyProtocolConfig) -> Self {
        Self {
            inner,
            pool: Arc::new(BufferPool::new(config.pool_capacity, config.buffer_size)),
            header_timeout: config.header_timeout_duration(),
        }
    }

    pub fn get_ref(&self) -> &A {
        &self.inner
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }
}

#[async_trait]
impl<A: Acceptor> Acceptor for ProxyListener<A> {
    type Conn = ProxyConn<A::Conn>;

    async fn accept(&self) -> io::Result<Self::Conn> {
        let raw = self.inner.accept().await?;
        debug!(
            local = ?raw.local_addr().ok(),
            idle_buffers = self.pool.idle(),
            "connection accepted, PROXY header pending"
        );
        Ok(ProxyConn::new(raw, Arc::clone(&self.pool), self.header_timeout))
    }

    async fn close(&self) -> io::Result<()> {
        self.inner.close().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

/// Bind a TCP listener that expects PROXY headers
pub async fn listen<S: ToSocketAddrs>(addr: S) -> io::Result<ProxyListener<TcpAcceptor>> {
    Ok(ProxyListener::new(TcpAcceptor::bind(addr).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::conn::Phase;
    use crate::net::transport::TcpTransport;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_accept_does_not_wait_for_header() {
        let listener = ProxyListener::with_pool(
            TcpAcceptor::bind("127.0.0.1:0").await.unwrap(),
            Arc::new(BufferPool::new(2, 1024)),
        );
        let addr = listener.local_addr().unwrap();

        // Connects and stays silent
        let _silent = TcpTransport::connect(addr).await.unwrap();
        let conn = tokio::time::timeout(Duration::from_secs(2), listener.accept())
            .await
            .expect("accept blocked on a silent peer")
            .unwrap();

        assert_eq!(conn.phase(), Phase::Unresolved);
        assert_eq!(listener.pool().idle(), 0);
        conn.close().await.unwrap();
        assert_eq!(listener.pool().idle(), 1);
    }

    #[tokio::test]
    async fn test_close_delegates_to_inner_acceptor() {
        let listener = ProxyListener::with_pool(
            TcpAcceptor::bind("127.0.0.1:0").await.unwrap(),
            Arc::new(BufferPool::new(2, 1024)),
        );

        listener.close().await.unwrap();
        assert!(listener.get_ref().is_closed());
        let err = listener.accept().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_with_config_applies_pool_sizing() {
        let config = ProxyProtocolConfig {
            pool_capacity: 3,
            buffer_size: 512,
            header_timeout: 1,
        };
        let listener =
            ProxyListener::with_config(TcpAcceptor::bind("127.0.0.1:0").await.unwrap(), &config);

        assert_eq!(listener.pool().capacity(), 3);
        assert_eq!(listener.pool().buffer_size(), 512);
        assert_eq!(listener.header_timeout, Some(Duration::from_secs(1)));
    }
}

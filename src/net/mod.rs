//! Networking Module
//!
//! Transport abstractions plus the PROXY-aware connection and listener
//! wrappers built on them.

mod conn;
mod listener;
mod pool;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use conn::{CloseHandle, Phase, ProxyConn};
pub use listener::{listen, ProxyListener};
pub use pool::{
    BufferPool, ReadBuffer, DEFAULT_BUFFER_SIZE, DEFAULT_POOL_CAPACITY, MIN_BUFFER_SIZE,
};
pub use transport::{Acceptor, TcpAcceptor, TcpTransport, Transport};

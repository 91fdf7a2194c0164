//! PROXY protocol support for tokio servers
//!
//! [`ProxyListener`] wraps any [`Acceptor`] and hands out [`ProxyConn`]s
//! whose `remote_addr` is the original client address carried in the
//! PROXY header rather than the load balancer's. The header is parsed
//! lazily on first use, so accepting never blocks on a slow peer.
//!
//! ```no_run
//! use proxyproto::net::{listen, Acceptor, Transport};
//!
//! # async fn run() -> std::io::Result<()> {
//! let listener = listen("127.0.0.1:7791").await?;
//! let conn = listener.accept().await?;
//! println!("client {}", conn.remote_addr().await?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod net;
pub mod proxy;

pub use net::{Acceptor, CloseHandle, ProxyConn, ProxyListener, Transport};
pub use proxy::{Address, Header, ProtocolFamily, ProxyError};

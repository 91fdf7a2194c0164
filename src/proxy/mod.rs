//! PROXY Protocol Module
//!
//! HAProxy PROXY protocol header types and codec. Version 1 (text) headers
//! are decoded; version 2 (binary) headers are detected and rejected as
//! unsupported.

mod error;
mod header;
pub mod parser;

pub use error::ProxyError;
pub use header::{Address, Header, ProtocolFamily, TcpAddress, UnknownAddress};
pub use parser::{parse, serialize};

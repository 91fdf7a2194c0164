//! PROXY Protocol Errors

use std::io;
use std::sync::Arc;

/// Errors that can occur while resolving a PROXY protocol header
///
/// Cloneable so a connection can hand the same cached failure to every
/// caller that touches it after the first.
#[derive(Debug, Clone)]
pub enum ProxyError {
    /// Leading bytes match neither the v1 nor the v2 signature
    BadMagic,
    /// Malformed or truncated v1 header line
    InvalidHeader,
    /// Port token is not a base-10 integer in 0..=65535
    InvalidPort,
    /// Address token is not an IP literal
    InvalidAddress,
    /// Valid v2 signature; v2 decoding is not supported
    UnsupportedVersion,
    /// Header deadline elapsed
    Timeout,
    /// Connection closed before the header was resolved
    Closed,
    /// IO error reading from the transport
    Io(Arc<io::Error>),
}

impl std::fmt::Display for ProxyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyError::BadMagic => write!(f, "not a PROXY v1 or v2 header"),
            ProxyError::InvalidHeader => write!(f, "invalid or corrupt PROXY header"),
            ProxyError::InvalidPort => write!(f, "invalid port in PROXY header"),
            ProxyError::InvalidAddress => write!(f, "invalid address for protocol in PROXY header"),
            ProxyError::UnsupportedVersion => write!(f, "unsupported PROXY protocol version"),
            ProxyError::Timeout => write!(f, "PROXY header timeout"),
            ProxyError::Closed => write!(f, "connection closed before PROXY header was resolved"),
            ProxyError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Io(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for ProxyError {
    fn from(e: io::Error) -> Self {
        ProxyError::Io(Arc::new(e))
    }
}

impl From<ProxyError> for io::Error {
    fn from(e: ProxyError) -> Self {
        let kind = match &e {
            ProxyError::Io(inner) => inner.kind(),
            ProxyError::Timeout => io::ErrorKind::TimedOut,
            ProxyError::Closed => io::ErrorKind::NotConnected,
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, e)
    }
}

impl ProxyError {
    /// Whether this error came from the header contents rather than the transport
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            ProxyError::BadMagic
                | ProxyError::InvalidHeader
                | ProxyError::InvalidPort
                | ProxyError::InvalidAddress
                | ProxyError::UnsupportedVersion
        )
    }
}

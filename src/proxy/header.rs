//! PROXY Header Types
//!
//! The decoded form of a v1 header: protocol family plus the original
//! source and destination addresses.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr, SocketAddrV6};

use bytes::BytesMut;

use super::parser;
use crate::net::Transport;

/// Protocol family announced by a v1 header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolFamily {
    Tcp4,
    Tcp6,
    /// Anything other than TCP4/TCP6, kept for forward compatibility
    Unknown,
}

impl ProtocolFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolFamily::Tcp4 => "TCP4",
            ProtocolFamily::Tcp6 => "TCP6",
            ProtocolFamily::Unknown => "UNKNOWN",
        }
    }

    /// Family for an address of this IP version
    pub fn for_ip(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => ProtocolFamily::Tcp4,
            IpAddr::V6(_) => ProtocolFamily::Tcp6,
        }
    }
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A TCP endpoint, optionally carrying an IPv6 zone
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TcpAddress {
    pub ip: IpAddr,
    pub port: u16,
    pub zone: Option<String>,
}

/// Endpoint announced under an unrecognized protocol family
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnknownAddress {
    pub ip: IpAddr,
    pub port: u16,
}

/// An endpoint from a PROXY header or from the transport itself
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    Tcp(TcpAddress),
    Unknown(UnknownAddress),
}

impl Address {
    pub fn ip(&self) -> IpAddr {
        match self {
            Address::Tcp(a) => a.ip,
            Address::Unknown(a) => a.ip,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Address::Tcp(a) => a.port,
            Address::Unknown(a) => a.port,
        }
    }

    pub fn zone(&self) -> Option<&str> {
        match self {
            Address::Tcp(a) => a.zone.as_deref(),
            Address::Unknown(_) => None,
        }
    }

    /// Network name, "tcp" or "unknown"
    pub fn network(&self) -> &'static str {
        match self {
            Address::Tcp(_) => "tcp",
            Address::Unknown(_) => "unknown",
        }
    }

    /// Convert to a std socket address.
    ///
    /// Only numeric zones survive, as the IPv6 scope id; named zones such as
    /// `en0` need an interface lookup and are dropped.
    pub fn to_socket_addr(&self) -> SocketAddr {
        match self.ip() {
            IpAddr::V6(ip) => {
                let scope_id = self.zone().and_then(|z| z.parse().ok()).unwrap_or(0);
                SocketAddr::V6(SocketAddrV6::new(ip, self.port(), 0, scope_id))
            }
            ip => SocketAddr::new(ip, self.port()),
        }
    }

    /// IP as written in a v1 header, zone included
    pub(crate) fn host(&self) -> String {
        match self.zone() {
            Some(zone) => format!("{}%{}", self.ip(), zone),
            None => self.ip().to_string(),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        let zone = match addr {
            SocketAddr::V6(v6) if v6.scope_id() != 0 => Some(v6.scope_id().to_string()),
            _ => None,
        };
        Address::Tcp(TcpAddress {
            ip: addr.ip(),
            port: addr.port(),
            zone,
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip() {
            IpAddr::V6(_) => write!(f, "[{}]:{}", self.host(), self.port()),
            IpAddr::V4(_) => write!(f, "{}:{}", self.host(), self.port()),
        }
    }
}

/// A decoded PROXY v1 header
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Header {
    pub protocol_family: ProtocolFamily,
    /// Original client address
    pub source: Address,
    /// Address the client connected to
    pub destination: Address,
}

impl Header {
    /// Build a TCP header; the family follows the source address
    pub fn new(source: SocketAddr, destination: SocketAddr) -> Self {
        Self {
            protocol_family: ProtocolFamily::for_ip(&source.ip()),
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Serialize as a v1 line, CRLF included
    pub fn to_bytes(&self) -> BytesMut {
        parser::serialize(self)
    }

    /// Write the v1 line to a transport
    pub async fn write_v1<T: Transport + ?Sized>(&self, transport: &T) -> io::Result<usize> {
        let line = self.to_bytes();
        transport.write_all(&line).await?;
        Ok(line.len())
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PROXY {} {} {} {} {}",
            parser::family_of(&self.source),
            self.source.host(),
            self.destination.host(),
            self.source.port(),
            self.destination.port()
        )
    }
}

//! PROXY Protocol Parser
//!
//! Detects v1 (text) and v2 (binary) signatures and decodes v1 headers.
//! v2 headers are recognized but rejected with
//! [`ProxyError::UnsupportedVersion`].

use std::io;
use std::net::{IpAddr, Ipv6Addr};

use bytes::BytesMut;

use super::error::ProxyError;
use super::header::{Address, Header, ProtocolFamily, TcpAddress, UnknownAddress};
use crate::net::{ReadBuffer, Transport};

/// PROXY v1 signature: "PROXY "
pub const PROXY_V1_SIGNATURE: &[u8] = b"PROXY ";

/// PROXY v2 signature (12 bytes)
pub const PROXY_V2_SIGNATURE: &[u8] = b"\r\n\r\n\x00\r\nQUIT\n";

/// Maximum v1 header size, signature and CRLF included
pub const MAX_V1_HEADER_SIZE: usize = 107;

/// Longest line allowed after the v1 signature
const MAX_V1_LINE: usize = MAX_V1_HEADER_SIZE - PROXY_V1_SIGNATURE.len();

const CRLF: &[u8] = b"\r\n";

/// Outcome of inspecting the leading bytes of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    V1,
    V2,
    /// Matches neither signature
    Unknown,
    /// Still a prefix of one of the signatures; more bytes are needed
    Incomplete,
}

/// Classify the buffered prefix of a stream without consuming it
pub fn detect(buf: &[u8]) -> Magic {
    let v1_len = buf.len().min(PROXY_V1_SIGNATURE.len());
    if PROXY_V1_SIGNATURE.starts_with(&buf[..v1_len]) {
        return if v1_len == PROXY_V1_SIGNATURE.len() {
            Magic::V1
        } else {
            Magic::Incomplete
        };
    }

    let v2_len = buf.len().min(PROXY_V2_SIGNATURE.len());
    if PROXY_V2_SIGNATURE.starts_with(&buf[..v2_len]) {
        return if v2_len == PROXY_V2_SIGNATURE.len() {
            Magic::V2
        } else {
            Magic::Incomplete
        };
    }

    Magic::Unknown
}

/// Parse a complete header from the front of `buf`
///
/// Returns the header and the number of bytes it occupies; everything
/// after that is payload. Nothing is consumed on failure.
pub fn parse(buf: &[u8]) -> Result<(Header, usize), ProxyError> {
    match detect(buf) {
        Magic::V1 => {}
        Magic::V2 => return Err(ProxyError::UnsupportedVersion),
        Magic::Unknown => return Err(ProxyError::BadMagic),
        Magic::Incomplete => return Err(ProxyError::InvalidHeader),
    }

    let rest = &buf[PROXY_V1_SIGNATURE.len()..];
    let end = find_line_end(rest)?.ok_or(ProxyError::InvalidHeader)?;
    let header = parse_v1_line(&rest[..end])?;

    Ok((header, PROXY_V1_SIGNATURE.len() + end))
}

/// Read a header from a transport through a read-ahead buffer
///
/// Bytes are only peeked until the whole header is buffered, so a stream
/// rejected with [`ProxyError::BadMagic`] or
/// [`ProxyError::UnsupportedVersion`] keeps everything buffered, and a
/// read abandoned midway can be restarted with the same buffer. On
/// success, any payload that arrived with the header stays in `rd`.
pub async fn read_header<T: Transport + ?Sized>(
    rd: &mut ReadBuffer,
    transport: &T,
) -> Result<Header, ProxyError> {
    loop {
        match detect(rd.buffered()) {
            Magic::V1 => break,
            Magic::V2 => return Err(ProxyError::UnsupportedVersion),
            Magic::Unknown => return Err(ProxyError::BadMagic),
            Magic::Incomplete => fill(rd, transport).await?,
        }
    }

    let sig = PROXY_V1_SIGNATURE.len();
    let end = loop {
        if let Some(end) = find_line_end(&rd.buffered()[sig..])? {
            break end;
        }
        fill(rd, transport).await?;
    };

    rd.consume(sig);
    let line = rd.take(end);
    parse_v1_line(&line)
}

/// Pull more bytes in; a closed stream is an unexpected EOF
async fn fill<T: Transport + ?Sized>(rd: &mut ReadBuffer, transport: &T) -> Result<(), ProxyError> {
    if rd.fill(transport).await? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before PROXY header was complete",
        )
        .into());
    }
    Ok(())
}

/// Position just past the first '\n', looking no further than the v1 limit
fn find_line_end(buf: &[u8]) -> Result<Option<usize>, ProxyError> {
    match buf.iter().take(MAX_V1_LINE).position(|&b| b == b'\n') {
        Some(pos) => Ok(Some(pos + 1)),
        None if buf.len() >= MAX_V1_LINE => Err(ProxyError::InvalidHeader),
        None => Ok(None),
    }
}

/// Parse the part of a v1 header that follows the signature, CRLF included
fn parse_v1_line(line: &[u8]) -> Result<Header, ProxyError> {
    let line = line.strip_suffix(CRLF).ok_or(ProxyError::InvalidHeader)?;
    let line = std::str::from_utf8(line).map_err(|_| ProxyError::InvalidHeader)?;

    // Tokens past the destination port are ignored
    let mut parts = line.split(' ');
    let (Some(family), Some(src_ip), Some(dst_ip), Some(src_port), Some(dst_port)) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(ProxyError::InvalidHeader);
    };

    let protocol_family = match family {
        "TCP4" => ProtocolFamily::Tcp4,
        "TCP6" => ProtocolFamily::Tcp6,
        _ => ProtocolFamily::Unknown,
    };

    Ok(Header {
        protocol_family,
        source: parse_address(protocol_family, src_ip, src_port)?,
        destination: parse_address(protocol_family, dst_ip, dst_port)?,
    })
}

fn parse_address(family: ProtocolFamily, ip: &str, port: &str) -> Result<Address, ProxyError> {
    let port: u16 = port.parse().map_err(|_| ProxyError::InvalidPort)?;
    let (ip, zone) = parse_ip(ip)?;

    Ok(match family {
        ProtocolFamily::Tcp4 | ProtocolFamily::Tcp6 => Address::Tcp(TcpAddress { ip, port, zone }),
        ProtocolFamily::Unknown => Address::Unknown(UnknownAddress { ip, port }),
    })
}

/// IP literal of either version under any family; IPv6 may carry a "%zone"
fn parse_ip(host: &str) -> Result<(IpAddr, Option<String>), ProxyError> {
    match host.split_once('%') {
        Some((ip, zone)) if !zone.is_empty() => {
            let ip: Ipv6Addr = ip.parse().map_err(|_| ProxyError::InvalidAddress)?;
            Ok((IpAddr::V6(ip), Some(zone.to_string())))
        }
        Some(_) => Err(ProxyError::InvalidAddress),
        None => host
            .parse::<IpAddr>()
            .map(|ip| (ip, None))
            .map_err(|_| ProxyError::InvalidAddress),
    }
}

/// Family token written for an address
pub(crate) fn family_of(addr: &Address) -> ProtocolFamily {
    match addr {
        Address::Tcp(a) => ProtocolFamily::for_ip(&a.ip),
        Address::Unknown(_) => ProtocolFamily::Unknown,
    }
}

/// Serialize a header as a v1 line, CRLF included
pub fn serialize(header: &Header) -> BytesMut {
    let line = header.to_string();
    let mut buf = BytesMut::with_capacity(line.len() + CRLF.len());
    buf.extend_from_slice(line.as_bytes());
    buf.extend_from_slice(CRLF);
    buf
}

use std::borrow::Cow;
use std::fmt::Formatter;
use std::io::Cursor;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::str::FromStr;

use bytes::{Buf, BufMut};
use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::parse::ParseError;
use crate::{Error, Result};

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

/// A connection endpoint: an IP socket address or a domain name with a port.
/// Domain names are carried verbatim so the proxy resolves them.
#[derive(Debug, Eq, PartialEq, Clone, DeserializeFromStr, SerializeDisplay)]
pub enum Address {
    IP(SocketAddr),
    Name { host: String, port: u16 },
}

impl Address {
    pub fn port(&self) -> u16 {
        match self {
            Self::IP(addr) => addr.port(),
            Self::Name { port, .. } => *port,
        }
    }

    pub fn host(&self) -> Cow<str> {
        match self {
            Self::IP(addr) => Cow::Owned(addr.ip().to_string()),
            Self::Name { host, .. } => Cow::Borrowed(host.as_str()),
        }
    }

    /// Parses the SOCKS5 wire form: ATYP, address, big-endian port.
    /// Returns `Ok(None)` until the whole encoding is buffered.
    pub fn parse(buf: &[u8]) -> std::result::Result<Option<(usize, Self)>, ParseError> {
        let mut buf = Cursor::new(buf);
        if !buf.has_remaining() {
            return Ok(None);
        }

        match buf.get_u8() {
            ATYP_IPV4 => {
                if buf.remaining() < 6 {
                    return Ok(None);
                }

                let mut addr = [0u8; 4];
                buf.copy_to_slice(&mut addr);
                let port = buf.get_u16();
                Ok(Some((
                    buf.position() as usize,
                    Self::IP(SocketAddr::V4(SocketAddrV4::new(
                        Ipv4Addr::from(addr),
                        port,
                    ))),
                )))
            }

            ATYP_DOMAIN => {
                if buf.remaining() < 1 {
                    return Ok(None);
                }

                let name_len = buf.get_u8() as usize;
                if name_len == 0 {
                    return Err(ParseError::unexpected("domain length", 0, "1..=255"));
                }
                if buf.remaining() < name_len + 2 {
                    return Ok(None);
                }

                let mut name_buf = vec![0; name_len];
                buf.copy_to_slice(name_buf.as_mut_slice());
                let port = buf.get_u16();

                String::from_utf8(name_buf)
                    .map_err(|_| ParseError::unexpected("domain name", "invalid utf-8", "valid utf-8"))
                    .map(|host| Some((buf.position() as usize, Self::Name { host, port })))
            }

            ATYP_IPV6 => {
                if buf.remaining() < 18 {
                    return Ok(None);
                }

                let mut addr = [0u8; 16];
                buf.copy_to_slice(&mut addr);
                let port = buf.get_u16();
                Ok(Some((
                    buf.position() as usize,
                    Self::IP(SocketAddr::V6(SocketAddrV6::new(
                        Ipv6Addr::from(addr),
                        port,
                        0,
                        0,
                    ))),
                )))
            }

            v => Err(ParseError::unexpected("address type", v, "1, 3 or 4")),
        }
    }

    pub fn write_len(&self) -> usize {
        1 + match self {
            Self::IP(SocketAddr::V4(_)) => 4,
            Self::IP(SocketAddr::V6(_)) => 16,
            Self::Name { host, .. } => 1 + host.as_bytes().len(),
        } + 2
    }

    pub fn write_to(&self, buf: &mut impl BufMut) -> Result<()> {
        match self {
            Address::IP(SocketAddr::V4(addr)) => {
                buf.put_u8(ATYP_IPV4);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            Address::IP(SocketAddr::V6(addr)) => {
                buf.put_u8(ATYP_IPV6);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            Address::Name { host, port } => {
                if host.is_empty() {
                    return Err(Error::Usage("domain name must not be empty"));
                }
                let host_len: u8 = host
                    .as_bytes()
                    .len()
                    .try_into()
                    .map_err(|_| Error::Usage("domain name longer than 255 bytes"))?;
                buf.put_u8(ATYP_DOMAIN);
                buf.put_u8(host_len);
                buf.put_slice(host.as_bytes());
                buf.put_u16(*port);
            }
        }
        Ok(())
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::IP(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)))
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(v) = SocketAddr::from_str(s) {
            return Ok(Address::IP(v));
        }

        let (host, port) = match s.rsplit_once(':') {
            Some(v) => v,
            None => return Err(Error::Usage("address must be host:port")),
        };

        let port: u16 = port
            .parse()
            .map_err(|_| Error::Usage("invalid port in address"))?;

        (host, port).try_into()
    }
}

impl TryFrom<(&str, u16)> for Address {
    type Error = Error;

    fn try_from((host, port): (&str, u16)) -> Result<Self> {
        let host = host.trim();
        if host.is_empty() {
            return Err(Error::Usage("address host must not be empty"));
        }

        match IpAddr::from_str(host) {
            Ok(ip) => Ok(Self::IP(SocketAddr::new(ip, port))),
            Err(_) => Ok(Self::Name {
                host: host.to_string(),
                port,
            }),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self::IP(addr)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IP(addr) => std::fmt::Display::fmt(addr, f),
            Self::Name { host, port } => f.write_fmt(format_args!("{host}:{port}")),
        }
    }
}

use std::fmt::Formatter;

use bytes::BufMut;

use super::SOCKS_VERSION;
use crate::addr::Address;
use crate::parse::ParseError;
use crate::Result;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Command(pub u8);

impl Command {
    pub const CONNECT: Self = Self(0x01);
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ConnStatusCode(pub u8);

impl ConnStatusCode {
    pub const GRANTED: Self = ConnStatusCode(0x00);

    pub fn is_ok(&self) -> bool {
        *self == Self::GRANTED
    }

    /// RFC 1928 reply code table.
    pub fn reason(&self) -> &'static str {
        match self.0 {
            0x00 => "succeeded",
            0x01 => "general SOCKS server failure",
            0x02 => "connection not allowed by ruleset",
            0x03 => "network unreachable",
            0x04 => "host unreachable",
            0x05 => "connection refused",
            0x06 => "TTL expired",
            0x07 => "command not supported",
            0x08 => "address type not supported",
            _ => "unassigned reply code",
        }
    }
}

impl std::fmt::Display for ConnStatusCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnRequest {
    pub cmd: Command,
    pub address: Address,
}

impl ConnRequest {
    pub fn connect(address: Address) -> Self {
        Self {
            cmd: Command::CONNECT,
            address,
        }
    }

    pub fn write_to(&self, buf: &mut impl BufMut) -> Result<()> {
        buf.put_u8(SOCKS_VERSION);
        buf.put_u8(self.cmd.0);
        buf.put_u8(0x00);
        self.address.write_to(buf)
    }

    pub fn parse(buf: &[u8]) -> std::result::Result<Option<(usize, Self)>, ParseError> {
        if buf.len() < 3 {
            return Ok(None);
        }
        if buf[0] != SOCKS_VERSION {
            return Err(ParseError::unexpected("socks version", buf[0], "0x05"));
        }
        if buf[2] != 0 {
            return Err(ParseError::unexpected("reserved byte", buf[2], "0x00"));
        }

        let cmd = Command(buf[1]);
        match Address::parse(&buf[3..])? {
            None => Ok(None),
            Some((offset, address)) => Ok(Some((3 + offset, Self { cmd, address }))),
        }
    }
}

/// Reply to a CONNECT request: same frame as the request with a status code in
/// place of the command, followed by the bound address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnReply {
    pub status: ConnStatusCode,
    pub bound: Address,
}

impl ConnReply {
    pub fn write_to(&self, buf: &mut impl BufMut) -> Result<()> {
        buf.put_u8(SOCKS_VERSION);
        buf.put_u8(self.status.0);
        buf.put_u8(0x00);
        self.bound.write_to(buf)
    }

    pub fn parse(buf: &[u8]) -> std::result::Result<Option<(usize, Self)>, ParseError> {
        if buf.len() < 3 {
            return Ok(None);
        }
        if buf[0] != SOCKS_VERSION {
            return Err(ParseError::unexpected("socks version", buf[0], "0x05"));
        }
        if buf[2] != 0 {
            return Err(ParseError::unexpected("reserved byte", buf[2], "0x00"));
        }

        let status = ConnStatusCode(buf[1]);
        match Address::parse(&buf[3..])? {
            None => Ok(None),
            Some((offset, bound)) => Ok(Some((3 + offset, Self { status, bound }))),
        }
    }
}

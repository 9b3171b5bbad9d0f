use bytes::BufMut;

use super::AUTH_VERSION;
use crate::parse::ParseError;
use crate::proxy::Credentials;
use crate::{Error, Result};

/// RFC 1929 username/password sub-negotiation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPassRequest {
    pub username: String,
    pub password: String,
}

impl From<&Credentials> for UserPassRequest {
    fn from(c: &Credentials) -> Self {
        Self {
            username: c.username.clone(),
            password: c.password.clone(),
        }
    }
}

impl UserPassRequest {
    pub fn write_to(&self, buf: &mut impl BufMut) -> Result<()> {
        let user_len: u8 = self
            .username
            .as_bytes()
            .len()
            .try_into()
            .map_err(|_| Error::Usage("username longer than 255 bytes"))?;
        let pass_len: u8 = self
            .password
            .as_bytes()
            .len()
            .try_into()
            .map_err(|_| Error::Usage("password longer than 255 bytes"))?;

        buf.put_u8(AUTH_VERSION);
        buf.put_u8(user_len);
        buf.put_slice(self.username.as_bytes());
        buf.put_u8(pass_len);
        buf.put_slice(self.password.as_bytes());
        Ok(())
    }

    pub fn parse(buf: &[u8]) -> std::result::Result<Option<(usize, Self)>, ParseError> {
        if buf.len() < 2 {
            return Ok(None);
        }
        if buf[0] != AUTH_VERSION {
            return Err(ParseError::unexpected("auth version", buf[0], "0x01"));
        }

        let user_len = buf[1] as usize;
        if buf.len() < 2 + user_len + 1 {
            return Ok(None);
        }
        let pass_len = buf[2 + user_len] as usize;
        let total = 2 + user_len + 1 + pass_len;
        if buf.len() < total {
            return Ok(None);
        }

        let username = String::from_utf8(buf[2..2 + user_len].to_vec())
            .map_err(|_| ParseError::unexpected("username", "invalid utf-8", "valid utf-8"))?;
        let password = String::from_utf8(buf[3 + user_len..total].to_vec())
            .map_err(|_| ParseError::unexpected("password", "invalid utf-8", "valid utf-8"))?;

        Ok(Some((total, Self { username, password })))
    }
}

/// RFC 1929 sub-negotiation reply: version byte then status, zero = success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthReply {
    pub status: u8,
}

impl AuthReply {
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }

    pub fn write_to(&self, buf: &mut impl BufMut) {
        buf.put_u8(AUTH_VERSION);
        buf.put_u8(self.status);
    }

    pub fn parse(buf: &[u8]) -> std::result::Result<Option<(usize, Self)>, ParseError> {
        if buf.len() < 2 {
            return Ok(None);
        }
        if buf[0] != AUTH_VERSION {
            return Err(ParseError::unexpected("auth version", buf[0], "0x01"));
        }
        Ok(Some((2, Self { status: buf[1] })))
    }
}

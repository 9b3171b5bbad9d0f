use bytes::BufMut;
use smallvec::SmallVec;

use super::{Auth, AUTH_NO_PASSWORD, AUTH_USERNAME_PASSWORD, SOCKS_VERSION};
use crate::parse::ParseError;
use crate::proxy::Credentials;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientGreeting {
    pub auths: SmallVec<[Auth; 4]>,
}

impl ClientGreeting {
    /// Offers exactly the method the descriptor can satisfy.
    pub fn new(credentials: Option<&Credentials>) -> Self {
        let mut auths = SmallVec::new();
        auths.push(match credentials {
            Some(_) => AUTH_USERNAME_PASSWORD,
            None => AUTH_NO_PASSWORD,
        });
        Self { auths }
    }

    pub fn write_to(&self, buf: &mut impl BufMut) -> Result<()> {
        if self.auths.is_empty() {
            return Err(Error::Usage("greeting must offer at least one auth method"));
        }
        let count: u8 = self
            .auths
            .len()
            .try_into()
            .map_err(|_| Error::Usage("greeting offers more than 255 auth methods"))?;
        buf.put_u8(SOCKS_VERSION);
        buf.put_u8(count);
        buf.put_slice(&self.auths);
        Ok(())
    }

    pub fn parse(buf: &[u8]) -> std::result::Result<Option<(usize, Self)>, ParseError> {
        if buf.len() < 2 {
            return Ok(None);
        }
        if buf[0] != SOCKS_VERSION {
            return Err(ParseError::unexpected("socks version", buf[0], "0x05"));
        }

        let count = buf[1] as usize;
        if count == 0 {
            return Err(ParseError::unexpected("nmethods", 0, "1..=255"));
        }
        if buf.len() < 2 + count {
            return Ok(None);
        }

        Ok(Some((
            2 + count,
            Self {
                auths: SmallVec::from_slice(&buf[2..2 + count]),
            },
        )))
    }
}

/// The server's pick out of the offered methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSelection {
    pub method: Auth,
}

impl MethodSelection {
    pub fn write_to(&self, buf: &mut impl BufMut) {
        buf.put_u8(SOCKS_VERSION);
        buf.put_u8(self.method);
    }

    pub fn parse(buf: &[u8]) -> std::result::Result<Option<(usize, Self)>, ParseError> {
        if buf.len() < 2 {
            return Ok(None);
        }
        if buf[0] != SOCKS_VERSION {
            return Err(ParseError::unexpected("socks version", buf[0], "0x05"));
        }
        Ok(Some((2, Self { method: buf[1] })))
    }
}

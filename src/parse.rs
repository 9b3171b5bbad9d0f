use std::fmt::{Debug, Display, Formatter};
use std::io::ErrorKind;

use crate::buf::RWBuffer;
use crate::socket::NbSocket;
use crate::{Error, Result};

#[derive(Debug)]
pub enum ParseError {
    Unexpected {
        name: &'static str,
        expect: &'static str,
        got: Box<dyn Debug + Send + Sync>,
    },
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        <ParseError as Debug>::fmt(self, f)
    }
}

impl ParseError {
    pub fn unexpected(
        name: &'static str,
        got: impl Debug + Sync + Send + 'static,
        expect: &'static str,
    ) -> Self {
        Self::Unexpected {
            name,
            got: Box::new(got),
            expect,
        }
    }
}

impl std::error::Error for ParseError {}

/// Accumulates bytes from a non-blocking socket until `parse` recognises a
/// whole frame. `Ok(None)` means the socket ran dry mid-frame: the bytes read
/// so far stay in `buf` and the call can be repeated once the socket is
/// readable again. Feeding the same stream in arbitrary split points yields
/// the same frames.
pub(crate) fn read_frame<T, P>(buf: &mut RWBuffer, sock: &mut NbSocket, parse: P) -> Result<Option<T>>
where
    P: Fn(&[u8]) -> std::result::Result<Option<(usize, T)>, ParseError>,
{
    loop {
        if let Some((consumed, frame)) = parse(buf.read_buf())? {
            buf.advance_read(consumed);
            return Ok(Some(frame));
        }

        // write_buf grows up to the configured cap; an empty slice after that
        // means the frame can never fit
        if buf.write_buf().is_empty() {
            return Err(ParseError::unexpected(
                "frame",
                format!("{} bytes and still incomplete", buf.remaining_read()),
                "a frame within buffer capacity",
            )
            .into());
        }

        match sock.recv(buf.write_buf()) {
            Ok(0) => return Err(Error::PeerClosed),
            Ok(n) => buf.advance_write(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

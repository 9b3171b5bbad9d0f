use std::io::{self, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};

use socket2::Socket;

use crate::addr::Address;

/// Thin layer over an owned socket: non-blocking `connect`/`recv`/`send` with
/// `WouldBlock` surfaced to the caller, never retried here.
#[derive(Debug)]
pub(crate) struct NbSocket {
    inner: Socket,
}

impl NbSocket {
    pub fn new(inner: Socket) -> Self {
        Self { inner }
    }

    /// Starts a TCP connect. `Ok(true)` means the connect is in flight and the
    /// socket must become writable before [`Self::finish_connect`].
    pub fn start_connect(&mut self, addr: &Address) -> io::Result<bool> {
        let sa = resolve(addr)?;
        match self.inner.connect(&sa.into()) {
            Ok(()) => Ok(false),
            Err(e) if connect_in_progress(&e) => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// `Ok(false)` means the connect has not settled yet (the caller polled
    /// too early); an error is the connect failure reported by the kernel.
    pub fn finish_connect(&mut self) -> io::Result<bool> {
        if let Some(e) = self.inner.take_error()? {
            return Err(e);
        }
        match self.inner.peer_addr() {
            Ok(_) => Ok(true),
            Err(e) if e.raw_os_error() == Some(libc::ENOTCONN) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.inner).read(buf)
    }

    pub fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&self.inner).write(buf)
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.inner.set_nonblocking(nonblocking)
    }

    pub fn fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }

    pub fn into_inner(self) -> Socket {
        self.inner
    }
}

fn resolve(addr: &Address) -> io::Result<SocketAddr> {
    match addr {
        Address::IP(sa) => Ok(*sa),
        Address::Name { host, port } => (host.as_str(), *port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {host}"))
            }),
    }
}

fn connect_in_progress(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock || e.raw_os_error() == Some(libc::EINPROGRESS)
}

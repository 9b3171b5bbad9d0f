mod http;
mod socks5;

pub(crate) use self::http::HttpHandshake;
pub(crate) use self::socks5::Socks5Handshake;

use crate::addr::Address;
use crate::proxy::{Proxy, ProxyProtocol};
use crate::socket::NbSocket;
use crate::Result;

/// Outcome of one reducer invocation. `Read`/`Write` mean the dialogue is
/// suspended and must be re-driven once the socket is ready in that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Done,
    Read,
    Write,
}

/// One suspended proxy dialogue. This value is the continuation: dropping it
/// abandons the handshake, stepping it resumes exactly where it left off.
#[derive(Debug)]
pub(crate) enum Handshaker {
    Socks5(Socks5Handshake),
    Http(HttpHandshake),
}

impl Handshaker {
    /// The dialogue run when a proxy becomes the current hop: SOCKS5 performs
    /// greeting, method selection and the optional sub-negotiation; HTTP
    /// proxies have no entry dialogue at all.
    pub fn greeting(proxy: &Proxy) -> Result<Option<Self>> {
        match proxy.protocol {
            ProxyProtocol::Socks5 => Ok(Some(Self::Socks5(Socks5Handshake::greeting(
                proxy.credentials.clone(),
            )?))),
            ProxyProtocol::Http | ProxyProtocol::Https => Ok(None),
        }
    }

    /// The dialogue that asks an established hop to open a tunnel to `target`
    /// (the next hop's address, or the final destination).
    pub fn connect_through(proxy: &Proxy, target: &Address) -> Result<Self> {
        match proxy.protocol {
            ProxyProtocol::Socks5 => Ok(Self::Socks5(Socks5Handshake::connect(target)?)),
            ProxyProtocol::Http | ProxyProtocol::Https => Ok(Self::Http(HttpHandshake::connect(
                target,
                proxy.credentials.as_ref(),
            )?)),
        }
    }

    pub fn step(&mut self, sock: &mut NbSocket) -> Result<Step> {
        match self {
            Self::Socks5(h) => h.step(sock),
            Self::Http(h) => h.step(sock),
        }
    }
}

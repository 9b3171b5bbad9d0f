use std::io;

use crate::parse::ParseError;

pub type Result<T> = std::result::Result<T, Error>;

/// Terminal failures of chain establishment. `NeedRead`/`NeedWrite` are not
/// errors and travel through [`crate::Status`] instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("socket is already connected to a peer")]
    AlreadyConnected,

    #[error("invalid proxy url {url:?}: {reason}")]
    InvalidProxyUrl { url: String, reason: String },

    #[error("peer closed the connection during the handshake")]
    PeerClosed,

    #[error(transparent)]
    Protocol(#[from] ParseError),

    #[error("no acceptable authentication method")]
    NoAcceptableAuth,

    #[error("proxy rejected the credentials: {0}")]
    AuthRejected(String),

    #[error("proxy rejected the connection: {0}")]
    ProxyRejected(String),

    #[error("proxy server is unreachable: {0}")]
    UpstreamUnreachable(#[source] io::Error),

    #[error("connection timed out")]
    TimedOut,

    #[error("{0}")]
    Usage(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

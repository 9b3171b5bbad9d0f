use std::io::ErrorKind;

use super::Step;
use crate::addr::Address;
use crate::buf::{RWBuffer, SendBuffer};
use crate::http::{connect_request, Response};
use crate::parse::{read_frame, ParseError};
use crate::proxy::Credentials;
use crate::socket::NbSocket;
use crate::{Error, Result};

#[derive(Debug)]
enum State {
    SendRequest,
    AwaitResponse,
    DiscardBody { remaining: usize },
    Done,
}

/// HTTP CONNECT dialogue. The whole handshake is the tunnel request itself;
/// a `Content-Length` body on the 200 is read and thrown away so the first
/// tunnelled byte is never mistaken for response payload.
#[derive(Debug)]
pub(crate) struct HttpHandshake {
    state: State,
    recv: RWBuffer,
    send: SendBuffer,
}

impl HttpHandshake {
    pub fn connect(target: &Address, credentials: Option<&Credentials>) -> Result<Self> {
        Ok(Self {
            state: State::SendRequest,
            recv: RWBuffer::new(1024, 65536),
            send: SendBuffer::new(connect_request(target, credentials)?),
        })
    }

    pub fn step(&mut self, sock: &mut NbSocket) -> Result<Step> {
        loop {
            match self.state {
                State::SendRequest => {
                    if !self.send.flush(sock)? {
                        return Ok(Step::Write);
                    }
                    self.state = State::AwaitResponse;
                }

                State::AwaitResponse => {
                    let res = match read_frame(&mut self.recv, sock, Response::parse)? {
                        None => return Ok(Step::Read),
                        Some(v) => v,
                    };

                    if res.status == 407 {
                        return Err(Error::AuthRejected(res.reject_reason()));
                    }
                    if res.status != 200 {
                        return Err(Error::ProxyRejected(res.reject_reason()));
                    }
                    if res.is_chunked() {
                        return Err(ParseError::unexpected(
                            "transfer-encoding",
                            "chunked",
                            "a content-length body or none",
                        )
                        .into());
                    }

                    log::debug!("http tunnel opened: {} {}", res.status, res.phrase);
                    self.state = match res.content_length() {
                        Some(n) if n > 0 => State::DiscardBody { remaining: n },
                        _ => State::Done,
                    };
                }

                State::DiscardBody { ref mut remaining } => {
                    // whatever arrived along with the headers counts first
                    let buffered = self.recv.remaining_read().min(*remaining);
                    self.recv.advance_read(buffered);
                    *remaining -= buffered;
                    if *remaining == 0 {
                        self.state = State::Done;
                        continue;
                    }

                    match sock.recv(self.recv.write_buf()) {
                        Ok(0) => return Err(Error::PeerClosed),
                        Ok(n) => self.recv.advance_write(n),
                        Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Step::Read),
                        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e.into()),
                    }
                }

                State::Done => return Ok(Step::Done),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::ErrorKind;

    use socket2::{Domain, Socket, Type};

    use super::*;

    fn pair() -> (NbSocket, Socket) {
        let (a, b) = Socket::pair(Domain::UNIX, Type::STREAM, None).unwrap();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        (NbSocket::new(a), b)
    }

    fn read_available(mut sock: &Socket) -> Vec<u8> {
        use std::io::Read;
        let mut out = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match sock.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => panic!("{e}"),
            }
        }
        out
    }

    fn write_all(mut sock: &Socket, bytes: &[u8]) {
        use std::io::Write;
        sock.write_all(bytes).unwrap();
    }

    fn target() -> Address {
        Address::Name {
            host: "example.com".to_string(),
            port: 443,
        }
    }

    #[test]
    fn connect_dialogue_with_split_response() {
        let (mut sock, server) = pair();
        let mut hs = HttpHandshake::connect(&target(), None).unwrap();

        assert_eq!(hs.step(&mut sock).unwrap(), Step::Read);
        assert_eq!(
            read_available(&server),
            b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n"
        );

        write_all(&server, b"HTTP/1.1 200 OK\r\n");
        assert_eq!(hs.step(&mut sock).unwrap(), Step::Read);
        write_all(&server, b"\r\n");
        assert_eq!(hs.step(&mut sock).unwrap(), Step::Done);
    }

    #[test]
    fn body_is_discarded_before_done() {
        let (mut sock, server) = pair();
        let mut hs = HttpHandshake::connect(&target(), None).unwrap();

        assert_eq!(hs.step(&mut sock).unwrap(), Step::Read);
        write_all(&server, b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhel");
        assert_eq!(hs.step(&mut sock).unwrap(), Step::Read);
        write_all(&server, b"lo");
        assert_eq!(hs.step(&mut sock).unwrap(), Step::Done);

        // the tunnel starts clean after the body
        write_all(&server, b"xyz");
        let mut buf = [0u8; 8];
        assert_eq!(sock.recv(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"xyz");
    }

    #[test]
    fn auth_required_is_auth_rejected() {
        let (mut sock, server) = pair();
        let mut hs = HttpHandshake::connect(&target(), None).unwrap();

        assert_eq!(hs.step(&mut sock).unwrap(), Step::Read);
        write_all(
            &server,
            b"HTTP/1.1 407 Proxy Auth Required\r\nContent-Length: 0\r\n\r\n",
        );
        match hs.step(&mut sock) {
            Err(Error::AuthRejected(reason)) => assert_eq!(reason, "Proxy Auth Required"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn non_200_is_proxy_rejected() {
        let (mut sock, server) = pair();
        let mut hs = HttpHandshake::connect(&target(), None).unwrap();

        assert_eq!(hs.step(&mut sock).unwrap(), Step::Read);
        write_all(&server, b"HTTP/1.1 502 Bad Gateway\r\n\r\n");
        match hs.step(&mut sock) {
            Err(Error::ProxyRejected(reason)) => assert_eq!(reason, "Bad Gateway"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn chunked_handshake_body_is_rejected() {
        let (mut sock, server) = pair();
        let mut hs = HttpHandshake::connect(&target(), None).unwrap();

        assert_eq!(hs.step(&mut sock).unwrap(), Step::Read);
        write_all(
            &server,
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n",
        );
        assert!(matches!(hs.step(&mut sock), Err(Error::Protocol(_))));
    }

    #[test]
    fn peer_closing_mid_handshake_is_peer_closed() {
        let (mut sock, server) = pair();
        let mut hs = HttpHandshake::connect(&target(), None).unwrap();

        assert_eq!(hs.step(&mut sock).unwrap(), Step::Read);
        write_all(&server, b"HTTP/1.1 200 OK");
        drop(server);
        assert!(matches!(hs.step(&mut sock), Err(Error::PeerClosed)));
    }
}

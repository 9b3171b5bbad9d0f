use super::Step;
use crate::addr::Address;
use crate::buf::{RWBuffer, SendBuffer};
use crate::parse::{read_frame, ParseError};
use crate::proxy::Credentials;
use crate::socket::NbSocket;
use crate::socks5::{
    AuthReply, ClientGreeting, ConnReply, ConnRequest, MethodSelection, UserPassRequest,
    AUTH_NOT_ACCEPTED, AUTH_NO_PASSWORD, AUTH_USERNAME_PASSWORD,
};
use crate::{Error, Result};

#[derive(Debug)]
enum State {
    SendGreeting,
    AwaitMethod,
    SendAuth,
    AwaitAuthReply,
    SendRequest,
    AwaitReply,
    Done,
}

#[derive(Debug)]
pub(crate) struct Socks5Handshake {
    credentials: Option<Credentials>,
    state: State,
    recv: RWBuffer,
    send: SendBuffer,
}

impl Socks5Handshake {
    /// Greeting phase: method negotiation and, if the server picks it,
    /// username/password sub-negotiation. Ends with the server awaiting a
    /// request.
    pub fn greeting(credentials: Option<Credentials>) -> Result<Self> {
        let mut out = Vec::new();
        ClientGreeting::new(credentials.as_ref()).write_to(&mut out)?;
        Ok(Self {
            credentials,
            state: State::SendGreeting,
            recv: RWBuffer::new(64, 512),
            send: SendBuffer::new(out),
        })
    }

    /// Connect phase: a single CONNECT request/reply exchange on a proxy whose
    /// greeting phase already completed.
    pub fn connect(target: &Address) -> Result<Self> {
        let mut out = Vec::new();
        ConnRequest::connect(target.clone()).write_to(&mut out)?;
        Ok(Self {
            credentials: None,
            state: State::SendRequest,
            recv: RWBuffer::new(64, 512),
            send: SendBuffer::new(out),
        })
    }

    pub fn step(&mut self, sock: &mut NbSocket) -> Result<Step> {
        loop {
            match self.state {
                State::SendGreeting => {
                    if !self.send.flush(sock)? {
                        return Ok(Step::Write);
                    }
                    self.state = State::AwaitMethod;
                }

                State::AwaitMethod => {
                    let sel = match read_frame(&mut self.recv, sock, MethodSelection::parse)? {
                        None => return Ok(Step::Read),
                        Some(v) => v,
                    };
                    match sel.method {
                        AUTH_NO_PASSWORD => {
                            self.state = State::Done;
                        }
                        AUTH_USERNAME_PASSWORD => match &self.credentials {
                            Some(c) => {
                                let mut out = Vec::new();
                                UserPassRequest::from(c).write_to(&mut out)?;
                                self.send = SendBuffer::new(out);
                                self.state = State::SendAuth;
                            }
                            None => return Err(Error::NoAcceptableAuth),
                        },
                        AUTH_NOT_ACCEPTED => return Err(Error::NoAcceptableAuth),
                        other => {
                            return Err(ParseError::unexpected(
                                "selected auth method",
                                other,
                                "0x00 or 0x02",
                            )
                            .into())
                        }
                    }
                }

                State::SendAuth => {
                    if !self.send.flush(sock)? {
                        return Ok(Step::Write);
                    }
                    self.state = State::AwaitAuthReply;
                }

                State::AwaitAuthReply => {
                    let reply = match read_frame(&mut self.recv, sock, AuthReply::parse)? {
                        None => return Ok(Step::Read),
                        Some(v) => v,
                    };
                    if !reply.is_ok() {
                        return Err(Error::AuthRejected(format!(
                            "sub-negotiation status {}",
                            reply.status
                        )));
                    }
                    self.state = State::Done;
                }

                State::SendRequest => {
                    if !self.send.flush(sock)? {
                        return Ok(Step::Write);
                    }
                    self.state = State::AwaitReply;
                }

                State::AwaitReply => {
                    let reply = match read_frame(&mut self.recv, sock, ConnReply::parse)? {
                        None => return Ok(Step::Read),
                        Some(v) => v,
                    };
                    if !reply.status.is_ok() {
                        return Err(Error::ProxyRejected(reply.status.to_string()));
                    }
                    log::debug!("socks5 tunnel opened, bound to {}", reply.bound);
                    self.state = State::Done;
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

    #[test]
    fn greeting_without_auth_suspends_and_resumes() {
        let (mut sock, server) = pair();
        let mut hs = Socks5Handshake::greeting(None).unwrap();

        // greeting flushed, reply not there yet
        assert_eq!(hs.step(&mut sock).unwrap(), Step::Read);
        assert_eq!(read_available(&server), [0x05, 0x01, 0x00]);

        // one byte is not a frame
        write_all(&server, &[0x05]);
        assert_eq!(hs.step(&mut sock).unwrap(), Step::Read);

        write_all(&server, &[0x00]);
        assert_eq!(hs.step(&mut sock).unwrap(), Step::Done);
    }

    #[test]
    fn greeting_with_auth_runs_subnegotiation() {
        let (mut sock, server) = pair();
        let creds = Credentials {
            username: "u".to_string(),
            password: "p".to_string(),
        };
        let mut hs = Socks5Handshake::greeting(Some(creds)).unwrap();

        assert_eq!(hs.step(&mut sock).unwrap(), Step::Read);
        assert_eq!(read_available(&server), [0x05, 0x01, 0x02]);

        write_all(&server, &[0x05, 0x02]);
        assert_eq!(hs.step(&mut sock).unwrap(), Step::Read);
        assert_eq!(read_available(&server), [0x01, 0x01, b'u', 0x01, b'p']);

        write_all(&server, &[0x01, 0x00]);
        assert_eq!(hs.step(&mut sock).unwrap(), Step::Done);
    }

    #[test]
    fn auth_rejection_is_terminal() {
        let (mut sock, server) = pair();
        let creds = Credentials {
            username: "u".to_string(),
            password: "p".to_string(),
        };
        let mut hs = Socks5Handshake::greeting(Some(creds)).unwrap();

        assert_eq!(hs.step(&mut sock).unwrap(), Step::Read);
        write_all(&server, &[0x05, 0x02]);
        assert_eq!(hs.step(&mut sock).unwrap(), Step::Read);
        write_all(&server, &[0x01, 0x01]);
        assert!(matches!(
            hs.step(&mut sock),
            Err(Error::AuthRejected(_))
        ));
    }

    #[test]
    fn server_requiring_auth_without_credentials_is_fatal() {
        let (mut sock, server) = pair();
        let mut hs = Socks5Handshake::greeting(None).unwrap();

        assert_eq!(hs.step(&mut sock).unwrap(), Step::Read);
        write_all(&server, &[0x05, 0x02]);
        assert!(matches!(hs.step(&mut sock), Err(Error::NoAcceptableAuth)));
    }

    #[test]
    fn no_acceptable_methods_is_fatal() {
        let (mut sock, server) = pair();
        let mut hs = Socks5Handshake::greeting(None).unwrap();

        assert_eq!(hs.step(&mut sock).unwrap(), Step::Read);
        write_all(&server, &[0x05, 0xFF]);
        assert!(matches!(hs.step(&mut sock), Err(Error::NoAcceptableAuth)));
    }

    #[test]
    fn connect_phase_handles_split_reply() {
        let (mut sock, server) = pair();
        let target = Address::Name {
            host: "httpbin.org".to_string(),
            port: 80,
        };
        let mut hs = Socks5Handshake::connect(&target).unwrap();

        assert_eq!(hs.step(&mut sock).unwrap(), Step::Read);
        let mut expected = vec![0x05, 0x01, 0x00, 0x03, 0x0B];
        expected.extend_from_slice(b"httpbin.org");
        expected.extend_from_slice(&[0x00, 0x50]);
        assert_eq!(read_available(&server), expected);

        let reply = [0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0x1F, 0x90];
        let mut sent = 0;
        for chunk in reply.chunks(3) {
            write_all(&server, chunk);
            sent += chunk.len();
            if sent < reply.len() {
                assert_eq!(hs.step(&mut sock).unwrap(), Step::Read);
            }
        }
        assert_eq!(hs.step(&mut sock).unwrap(), Step::Done);
    }

    #[test]
    fn connect_rejection_carries_reply_reason() {
        let (mut sock, server) = pair();
        let target = Address::IP("10.0.0.1:80".parse().unwrap());
        let mut hs = Socks5Handshake::connect(&target).unwrap();

        assert_eq!(hs.step(&mut sock).unwrap(), Step::Read);
        write_all(&server, &[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
        match hs.step(&mut sock) {
            Err(Error::ProxyRejected(reason)) => assert_eq!(reason, "connection refused"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn partial_write_suspends_with_need_write() {
        let (mut sock, server) = pair();

        // jam the outbound pipe so the request cannot flush
        let junk = [0u8; 4096];
        loop {
            match sock.send(&junk) {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => panic!("{e}"),
            }
        }

        let target = Address::IP("10.0.0.1:80".parse().unwrap());
        let mut hs = Socks5Handshake::connect(&target).unwrap();
        assert_eq!(hs.step(&mut sock).unwrap(), Step::Write);

        // drain the peer, then the request goes out and the reply is awaited
        while !read_available(&server).is_empty() {}
        assert_eq!(hs.step(&mut sock).unwrap(), Step::Read);

        write_all(&server, &[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
        assert_eq!(hs.step(&mut sock).unwrap(), Step::Done);
    }
}

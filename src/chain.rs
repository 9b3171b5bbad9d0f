use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::os::unix::io::RawFd;

use socket2::Socket;

use crate::addr::Address;
use crate::handshake::{Handshaker, Step};
use crate::proxy::Proxy;
use crate::ready::Status;
use crate::socket::NbSocket;
use crate::{Error, Result};

/// Where the wrapper stands in the chain-establishment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Wrapped, not yet connected to anything.
    Fresh,
    /// TCP connect to the first proxy in flight.
    Connecting,
    /// Asking the last established hop to tunnel to the next pending one.
    Tunneling,
    /// Running the entry dialogue of the current pending proxy.
    Greeting,
    /// Every queued proxy handshaked; awaiting the caller's target.
    Ready,
    /// Final CONNECT through the chain (or plain TCP connect) in flight.
    ConnectingTarget,
    /// Chain sealed; the wrapper is a transparent byte pipe.
    Connected,
    /// A handshake failed; only inspection and drop remain.
    Failed,
}

/// A socket wrapped with an ordered proxy chain. Proxies queue up front,
/// [`Self::perform_connection`] drives every handshake in order, and
/// [`Self::connect`] finally opens the tunnel to the caller's target.
///
/// Both entry points return [`Status`]: on `NeedRead`/`NeedWrite` the caller
/// waits for the signalled readiness and re-invokes the same entry point,
/// which resumes the suspended dialogue where it stopped. On a blocking
/// socket they simply complete in one call.
#[derive(Debug)]
pub struct ProxiedSocket {
    socket: NbSocket,
    pending: VecDeque<Proxy>,
    established: Vec<Proxy>,
    mode: Mode,
    running: Option<Handshaker>,
}

impl ProxiedSocket {
    /// Wraps a not-yet-connected socket. A socket with a peer is refused:
    /// the proxies could never precede the existing connection.
    pub fn wrap<I>(socket: Socket, proxies: I) -> Result<Self>
    where
        I: IntoIterator<Item = Proxy>,
    {
        if socket.peer_addr().is_ok() {
            return Err(Error::AlreadyConnected);
        }

        Ok(Self {
            socket: NbSocket::new(socket),
            pending: proxies.into_iter().collect(),
            established: Vec::new(),
            mode: Mode::Fresh,
            running: None,
        })
    }

    /// Appends a hop to the chain. Allowed while `Fresh` and while `Ready`
    /// (the next `perform_connection` tunnels to it through the existing
    /// chain); refused mid-handshake and once the target is connected.
    pub fn add_proxy(&mut self, proxy: Proxy) -> Result<()> {
        match self.mode {
            Mode::Fresh | Mode::Ready => {
                self.pending.push_back(proxy);
                Ok(())
            }
            Mode::Connecting | Mode::Greeting | Mode::Tunneling => {
                Err(Error::Usage("cannot add a proxy while a handshake is running"))
            }
            Mode::ConnectingTarget | Mode::Connected => {
                Err(Error::Usage("cannot add a proxy after connecting to the target"))
            }
            Mode::Failed => Err(Error::Usage("wrapper is unusable after a failed handshake")),
        }
    }

    /// Drives the chain until every queued proxy has handshaked, suspending
    /// with `NeedRead`/`NeedWrite` whenever the socket runs dry.
    pub fn perform_connection(&mut self) -> Result<Status> {
        loop {
            match self.mode {
                Mode::Connected => return Ok(Status::Done),
                Mode::ConnectingTarget => {
                    return Err(Error::Usage(
                        "target connection in progress; resume it with connect()",
                    ))
                }
                Mode::Failed => {
                    return Err(Error::Usage("wrapper is unusable after a failed handshake"))
                }
                _ => {}
            }

            // a suspended dialogue always resumes before the queue advances
            if self.running.is_some() {
                match self.step_running()? {
                    Some(status) => return Ok(status),
                    None => continue,
                }
            }

            match self.mode {
                Mode::Fresh => {
                    if self.pending.is_empty() {
                        self.mode = Mode::Ready;
                        return Ok(Status::Done);
                    }
                    self.start_proxy_connect()?;
                    if let Mode::Connecting = self.mode {
                        // connect did not settle synchronously
                        return Ok(Status::NeedWrite(self.socket.fd()));
                    }
                }

                Mode::Connecting => match self.socket.finish_connect() {
                    Ok(true) => {
                        log::debug!("connected to {}", self.current_proxy().address);
                        if let Err(e) = self.begin_greeting() {
                            return Err(self.fail(e));
                        }
                    }
                    Ok(false) => return Ok(Status::NeedWrite(self.socket.fd())),
                    Err(e) => return Err(self.fail(Error::UpstreamUnreachable(e))),
                },

                Mode::Ready => {
                    if self.pending.is_empty() {
                        return Ok(Status::Done);
                    }
                    if self.established.is_empty() {
                        // an empty chain went straight to Ready; the socket is
                        // still unconnected
                        self.mode = Mode::Fresh;
                        continue;
                    }
                    if let Err(e) = self.begin_tunnel() {
                        return Err(self.fail(e));
                    }
                }

                // handled before the slot check
                Mode::Connected | Mode::ConnectingTarget | Mode::Failed => unreachable!(),

                // these modes always carry a running dialogue
                Mode::Greeting | Mode::Tunneling => unreachable!("handshake modes without a dialogue"),
            }
        }
    }

    /// Opens the tunnel to the caller's target through the established chain,
    /// or performs a plain TCP connect when the chain is empty. Requires the
    /// chain to be fully established (or never populated). While a target
    /// connect is suspended, re-invoke with the same target to resume.
    pub fn connect(&mut self, target: &Address) -> Result<Status> {
        match self.mode {
            Mode::ConnectingTarget => {}

            Mode::Ready if !self.pending.is_empty() => {
                return Err(Error::Usage(
                    "cannot connect to the target while proxies are pending",
                ))
            }

            Mode::Ready => match self.established.last() {
                Some(via) => {
                    log::debug!("connecting to {target} via {via}");
                    match Handshaker::connect_through(via, target) {
                        Ok(hs) => {
                            self.running = Some(hs);
                            self.mode = Mode::ConnectingTarget;
                        }
                        Err(e) => return Err(self.fail(e)),
                    }
                }
                None => self.start_plain_connect(target)?,
            },

            // an empty chain may connect without a perform_connection round
            Mode::Fresh if self.pending.is_empty() => self.start_plain_connect(target)?,

            Mode::Connected => return Err(Error::Usage("already connected to the target")),
            Mode::Failed => {
                return Err(Error::Usage("wrapper is unusable after a failed handshake"))
            }
            _ => {
                return Err(Error::Usage(
                    "proxy chain not established; call perform_connection() first",
                ))
            }
        }

        loop {
            if self.running.is_some() {
                match self.step_running()? {
                    Some(status) => return Ok(status),
                    None => continue,
                }
            }

            // plain TCP path: no dialogue, just connect completion
            match self.mode {
                Mode::ConnectingTarget => match self.socket.finish_connect() {
                    Ok(true) => {
                        self.mode = Mode::Connected;
                        log::debug!("connected to target {target}");
                        return Ok(Status::Done);
                    }
                    Ok(false) => return Ok(Status::NeedWrite(self.socket.fd())),
                    Err(e) => return Err(self.fail(Error::UpstreamUnreachable(e))),
                },
                Mode::Connected => return Ok(Status::Done),
                _ => unreachable!("connect() left the target-connect modes"),
            }
        }
    }

    /// Consumes the wrapper and returns the bare socket carrying the tunnel.
    /// Only meaningful once the target is connected; the socket closes with
    /// the error otherwise.
    pub fn into_socket(self) -> Result<Socket> {
        match self.mode {
            Mode::Connected => Ok(self.socket.into_inner()),
            _ => Err(Error::Usage("target is not connected yet")),
        }
    }

    /// Hops that have completed their handshake, in chain order.
    pub fn chain(&self) -> &[Proxy] {
        &self.established
    }

    /// Hops still queued for handshaking.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn fd(&self) -> RawFd {
        self.socket.fd()
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.socket.set_nonblocking(nonblocking)?;
        Ok(())
    }

    /// Steps the suspended dialogue. `Ok(None)` means it finished and the
    /// outer loop may advance; `Ok(Some(_))` must be returned to the caller.
    fn step_running(&mut self) -> Result<Option<Status>> {
        let hs = match self.running.as_mut() {
            Some(hs) => hs,
            None => return Ok(None),
        };
        match hs.step(&mut self.socket) {
            Ok(Step::Read) => Ok(Some(Status::NeedRead(self.socket.fd()))),
            Ok(Step::Write) => Ok(Some(Status::NeedWrite(self.socket.fd()))),
            Ok(Step::Done) => {
                self.running = None;
                match self.dialogue_done() {
                    Ok(()) => Ok(None),
                    Err(e) => Err(self.fail(e)),
                }
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn dialogue_done(&mut self) -> Result<()> {
        match self.mode {
            Mode::Tunneling => self.begin_greeting(),

            Mode::Greeting => {
                let p = match self.pending.pop_front() {
                    Some(p) => p,
                    None => unreachable!("greeting finished with an empty queue"),
                };
                log::debug!("proxy {p} established");
                self.established.push(p);

                if self.pending.is_empty() {
                    self.mode = Mode::Ready;
                    Ok(())
                } else {
                    self.begin_tunnel()
                }
            }

            Mode::ConnectingTarget => {
                self.mode = Mode::Connected;
                log::debug!("target connected through {} proxies", self.established.len());
                Ok(())
            }

            _ => unreachable!("dialogue finished outside a handshake mode"),
        }
    }

    fn start_proxy_connect(&mut self) -> Result<()> {
        let addr = self.current_proxy().address.clone();
        log::debug!("connecting to first proxy {addr}");
        match self.socket.start_connect(&addr) {
            Ok(true) => {
                self.mode = Mode::Connecting;
                Ok(())
            }
            Ok(false) => {
                // settled synchronously (blocking socket or local peer)
                match self.begin_greeting() {
                    Ok(()) => Ok(()),
                    Err(e) => Err(self.fail(e)),
                }
            }
            Err(e) => Err(self.fail(Error::UpstreamUnreachable(e))),
        }
    }

    fn start_plain_connect(&mut self, target: &Address) -> Result<()> {
        log::debug!("no proxies queued, connecting straight to {target}");
        match self.socket.start_connect(target) {
            Ok(_) => {
                self.mode = Mode::ConnectingTarget;
                Ok(())
            }
            Err(e) => Err(self.fail(Error::UpstreamUnreachable(e))),
        }
    }

    /// Starts the entry dialogue of the current pending proxy. Protocols
    /// without one (HTTP CONNECT) promote immediately.
    fn begin_greeting(&mut self) -> Result<()> {
        self.mode = Mode::Greeting;
        match Handshaker::greeting(self.current_proxy())? {
            Some(hs) => {
                self.running = Some(hs);
                Ok(())
            }
            None => self.dialogue_done(),
        }
    }

    fn begin_tunnel(&mut self) -> Result<()> {
        let target = self.current_proxy().address.clone();
        let via = match self.established.last() {
            Some(via) => via,
            None => unreachable!("tunneling without an established hop"),
        };
        log::debug!("tunneling through {via} to {target}");
        self.running = Some(Handshaker::connect_through(via, &target)?);
        self.mode = Mode::Tunneling;
        Ok(())
    }

    fn current_proxy(&self) -> &Proxy {
        match self.pending.front() {
            Some(p) => p,
            None => unreachable!("no pending proxy for the current handshake"),
        }
    }

    fn fail(&mut self, e: Error) -> Error {
        self.running = None;
        self.mode = Mode::Failed;
        e
    }
}

impl Read for ProxiedSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.mode != Mode::Connected {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.socket.recv(buf)
    }
}

impl Write for ProxiedSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.mode != Mode::Connected {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.socket.send(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

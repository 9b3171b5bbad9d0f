use std::io;
use std::time::{Duration, Instant};

use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

use crate::addr::Address;
use crate::chain::ProxiedSocket;
use crate::ready::Status;
use crate::{Error, Result};

/// Establishes the whole chain synchronously, polling the signalled direction
/// between resumptions. The socket is forced non-blocking so a deadline can
/// cut in at any suspension point.
pub fn drive_blocking(sock: &mut ProxiedSocket, timeout: Option<Duration>) -> Result<()> {
    let deadline = timeout.map(|t| Instant::now() + t);
    sock.set_nonblocking(true)?;
    loop {
        match sock.perform_connection()? {
            Status::Done => return Ok(()),
            status => wait_ready(status, deadline)?,
        }
    }
}

/// Synchronous counterpart of [`ProxiedSocket::connect`].
pub fn connect_blocking(
    sock: &mut ProxiedSocket,
    target: &Address,
    timeout: Option<Duration>,
) -> Result<()> {
    let deadline = timeout.map(|t| Instant::now() + t);
    sock.set_nonblocking(true)?;
    loop {
        match sock.connect(target)? {
            Status::Done => return Ok(()),
            status => wait_ready(status, deadline)?,
        }
    }
}

/// Drives many wrappers concurrently under one poll set with a shared total
/// timeout. Returns one outcome per wrapper, in order; wrappers that are
/// still suspended when the deadline strikes report [`Error::TimedOut`].
pub fn drive_all(socks: &mut [ProxiedSocket], timeout: Option<Duration>) -> Vec<Result<()>> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut outcome: Vec<Option<Result<()>>> = Vec::with_capacity(socks.len());
    let mut waiting: Vec<Status> = Vec::with_capacity(socks.len());

    for sock in socks.iter_mut() {
        let first = sock
            .set_nonblocking(true)
            .and_then(|_| sock.perform_connection());
        match first {
            Ok(Status::Done) => {
                outcome.push(Some(Ok(())));
                waiting.push(Status::Done);
            }
            Ok(status) => {
                outcome.push(None);
                waiting.push(status);
            }
            Err(e) => {
                outcome.push(Some(Err(e)));
                waiting.push(Status::Done);
            }
        }
    }

    while outcome.iter().any(|o| o.is_none()) {
        let mut fds = Vec::new();
        let mut indexes = Vec::new();
        for (i, status) in waiting.iter().enumerate() {
            if outcome[i].is_some() {
                continue;
            }
            let (fd, events) = match status {
                Status::NeedRead(fd) => (*fd, libc::POLLIN),
                Status::NeedWrite(fd) => (*fd, libc::POLLOUT),
                Status::Done => continue,
            };
            fds.push(libc::pollfd {
                fd,
                events,
                revents: 0,
            });
            indexes.push(i);
        }

        let timeout_ms = match poll_timeout_ms(deadline) {
            Some(v) => v,
            None => {
                mark_pending(&mut outcome, || Error::TimedOut);
                break;
            }
        };

        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            let code = e.raw_os_error().unwrap_or(0);
            mark_pending(&mut outcome, move || {
                Error::Io(io::Error::from_raw_os_error(code))
            });
            break;
        }
        if rc == 0 {
            mark_pending(&mut outcome, || Error::TimedOut);
            break;
        }

        for (slot, i) in fds.iter().zip(indexes) {
            if slot.revents == 0 {
                continue;
            }
            match socks[i].perform_connection() {
                Ok(Status::Done) => outcome[i] = Some(Ok(())),
                Ok(status) => waiting[i] = status,
                Err(e) => outcome[i] = Some(Err(e)),
            }
        }
    }

    outcome
        .into_iter()
        .map(|o| o.unwrap_or(Err(Error::TimedOut)))
        .collect()
}

/// Establishes the chain from an async context. Each suspension registers a
/// one-shot readiness interest for the signalled direction and re-enters the
/// state machine when it fires.
pub async fn drive_async(sock: &mut ProxiedSocket) -> Result<()> {
    sock.set_nonblocking(true)?;
    loop {
        match sock.perform_connection()? {
            Status::Done => return Ok(()),
            status => wait_ready_async(status).await?,
        }
    }
}

/// Async counterpart of [`ProxiedSocket::connect`].
pub async fn connect_async(sock: &mut ProxiedSocket, target: &Address) -> Result<()> {
    sock.set_nonblocking(true)?;
    loop {
        match sock.connect(target)? {
            Status::Done => return Ok(()),
            status => wait_ready_async(status).await?,
        }
    }
}

fn wait_ready(status: Status, deadline: Option<Instant>) -> Result<()> {
    let (fd, events) = match status {
        Status::Done => return Ok(()),
        Status::NeedRead(fd) => (fd, libc::POLLIN),
        Status::NeedWrite(fd) => (fd, libc::POLLOUT),
    };

    loop {
        let timeout_ms = match poll_timeout_ms(deadline) {
            Some(v) => v,
            None => return Err(Error::TimedOut),
        };

        let mut pfd = libc::pollfd {
            fd,
            events,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        match rc {
            0 => return Err(Error::TimedOut),
            v if v < 0 => {
                let e = io::Error::last_os_error();
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }
            _ => return Ok(()),
        }
    }
}

async fn wait_ready_async(status: Status) -> Result<()> {
    match status {
        Status::Done => Ok(()),
        Status::NeedRead(fd) => {
            let afd = AsyncFd::with_interest(fd, Interest::READABLE)?;
            let mut guard = afd.readable().await?;
            guard.clear_ready();
            Ok(())
        }
        Status::NeedWrite(fd) => {
            let afd = AsyncFd::with_interest(fd, Interest::WRITABLE)?;
            let mut guard = afd.writable().await?;
            guard.clear_ready();
            Ok(())
        }
    }
}

/// Milliseconds still available before `deadline`; `None` once it passed.
fn poll_timeout_ms(deadline: Option<Instant>) -> Option<i32> {
    match deadline {
        None => Some(-1),
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let ms = deadline.duration_since(now).as_millis();
            Some(ms.min(i32::MAX as u128) as i32)
        }
    }
}

fn mark_pending(outcome: &mut [Option<Result<()>>], make_err: impl Fn() -> Error) {
    for slot in outcome.iter_mut() {
        if slot.is_none() {
            *slot = Some(Err(make_err()));
        }
    }
}

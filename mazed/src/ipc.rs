//! Descriptor handoff between the master and the workers.
//!
//! The master owns the listening sockets. Once a connection has said who it
//! belongs to, the master sends the descriptor to that user's worker over
//! the worker's control pipe: a native-endian `i32` kind as the body, and
//! exactly one descriptor as `SCM_RIGHTS` ancillary data.

use crate::error::Result;
use crate::net::{Ancillary, AncillaryError, Socket, SocketHandler};
use crate::proto::LineEnding;
use crate::reactor::{Reactor, TimerId};

use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd};
use tracing::{info, warn};

const KIND_LEN: usize = std::mem::size_of::<i32>();

/// What a handed-off descriptor carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandoffKind {
    /// An upgraded WebSocket connection.
    Websocket,
    /// A game connection that has used the given line terminator so far.
    Game(LineEnding),
}

impl HandoffKind {
    /// Wire value of the kind.
    pub fn to_raw(self) -> i32 {
        match self {
            HandoffKind::Websocket => 0,
            HandoffKind::Game(LineEnding::Lf) => 1,
            HandoffKind::Game(LineEnding::Crlf) => 2,
        }
    }

    /// Parses a wire value.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(HandoffKind::Websocket),
            1 => Some(HandoffKind::Game(LineEnding::Lf)),
            2 => Some(HandoffKind::Game(LineEnding::Crlf)),
            _ => None,
        }
    }
}

impl fmt::Display for HandoffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandoffKind::Websocket => f.write_str("websocket"),
            HandoffKind::Game(_) => f.write_str("game socket"),
        }
    }
}

/// The master's view of its users.
pub trait Directory {
    /// Returns `true` if `login` is a known user.
    fn user_exists(&self, login: &str) -> bool;

    /// Returns the control pipe of the user's worker, starting the worker
    /// first if none is running.
    fn worker_pipe(&mut self, reactor: &mut Reactor, login: &str) -> Option<Socket>;
}

/// Queues `fd` for sending over `pipe`.
///
/// Our copy of the descriptor is closed once the kernel has taken it, or
/// right away if it cannot be queued.
pub fn send_fd(reactor: &mut Reactor, pipe: &Socket, fd: OwnedFd, kind: HandoffKind) -> Result<()> {
    let ancillary = Ancillary::pass_fd(fd.as_raw_fd());
    let body = kind.to_raw().to_ne_bytes();

    pipe.write_with_ancillary(reactor, body.as_slice(), ancillary, Some(fd))
}

/// Moves a managed socket into the worker of `login`.
///
/// The socket stops being managed here whether or not the handoff
/// succeeds; on failure the connection is simply dropped.
pub fn send_socket(
    reactor: &mut Reactor,
    directory: &mut dyn Directory,
    login: &str,
    socket: &Socket,
    kind: HandoffKind,
) {
    let raw = socket.fd();
    socket.close(reactor);

    let Some(fd) = socket.set_unmanaged() else {
        warn!(fd = raw, "socket was already handed away");
        return;
    };

    let Some(pipe) = directory.worker_pipe(reactor, login) else {
        warn!(fd = raw, login, "unable to send {kind} to worker: no worker");
        return;
    };

    match send_fd(reactor, &pipe, fd, kind) {
        Ok(()) => info!(fd = raw, login, "sending {kind} to worker"),
        Err(e) => warn!(fd = raw, login, error = %e, "unable to send {kind} to worker"),
    }
}

/// Receives handed-off descriptors on the worker side.
pub trait HandoffTarget {
    /// Takes over a received connection.
    fn receive(&mut self, reactor: &mut Reactor, fd: OwnedFd, kind: HandoffKind) -> Result<()>;
}

/// Handler of a worker's control pipe.
pub struct ControlPipe<T> {
    target: T,
    /// Deleted once the first connection arrives.
    idle: Option<TimerId>,
}

impl<T: HandoffTarget> ControlPipe<T> {
    /// Delivers received descriptors to `target`.
    ///
    /// `idle` is the timer that ends the worker if nothing arrives in time.
    pub fn new(target: T, idle: Option<TimerId>) -> Self {
        Self { target, idle }
    }

    fn accept(&mut self, reactor: &mut Reactor, body: &[u8], ancillary: Ancillary) {
        let fd = match ancillary.into_fd() {
            Ok(fd) => fd,
            Err(AncillaryError::Unknown) => {
                info!("received unknown ancillary message");
                return;
            }
            Err(AncillaryError::UnexpectedLength) => {
                info!("received ancillary message with unexpected length");
                return;
            }
        };
        let raw = fd.as_raw_fd();

        let Ok(kind) = <[u8; KIND_LEN]>::try_from(body) else {
            info!(fd = raw, "received descriptor with no kind");
            return;
        };
        let Some(kind) = HandoffKind::from_raw(i32::from_ne_bytes(kind)) else {
            info!(fd = raw, "received descriptor of unknown kind");
            return;
        };

        info!(fd = raw, "received {kind}");
        if let Err(e) = self.target.receive(reactor, fd, kind) {
            warn!(fd = raw, error = %e, "unable to take over {kind}");
            return;
        }

        if let Some(idle) = self.idle.take() {
            reactor.timer_delete(idle);
        }
    }
}

impl<T: HandoffTarget> SocketHandler for ControlPipe<T> {
    fn readable(&mut self, reactor: &mut Reactor, socket: &Socket) {
        let mut body = [0u8; 512];

        loop {
            let (n, ancillary) = socket.read_with_ancillary(&mut body);
            match ancillary {
                Some(ancillary) => self.accept(reactor, &body[..n], ancillary),
                None if n == 0 => return,
                None => {}
            }
        }
    }
}

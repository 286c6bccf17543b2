//! Managed sockets.
//!
//! A [`Socket`] wraps one non-blocking descriptor registered with the
//! reactor. Writes go through a bounded FIFO queue drained on write
//! readiness; reads are single non-blocking attempts made from the
//! handler's [`SocketHandler::readable`] callback.
//!
//! Ownership follows `Rc`: every clone is a reference, and the descriptor
//! is closed (and the handler dropped) when the last one goes away. The
//! reactor registration holds one reference of its own, released when the
//! socket is closed, so a closing socket survives until the end of the
//! dispatch round that closed it.

use super::ancillary::{Ancillary, CONTROL_CAPACITY};

use crate::error::{Error, Result};
use crate::reactor::platform::{sys_recvmsg, sys_sendmsg};
use crate::reactor::{Dispatch, Interest, Reactor, Ready, Token, Watcher};

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::rc::{Rc, Weak};
use tracing::{debug, warn};

/// Default bound of the outbound queue.
pub const QUEUE_LIMIT: usize = 20;

/// Per-connection behavior of a managed socket.
///
/// Dropping the handler is the connection's destructor; it runs when the
/// last reference to the socket goes away.
pub trait SocketHandler {
    /// Called when the socket is readable.
    ///
    /// The handler should read until [`Socket::read`] returns 0.
    fn readable(&mut self, reactor: &mut Reactor, socket: &Socket);
}

/// One-shot callback run when the outbound queue drains.
pub type DrainedCallback = dyn FnOnce(&mut Reactor, &Socket);

/// A queued write.
struct Outbound {
    data: Vec<u8>,
    /// Start of the unsent remainder.
    cursor: usize,
    /// Sent with the first attempt only.
    ancillary: Option<Ancillary>,
    /// Closed once the ancillary payload was consumed.
    close_after: Option<OwnedFd>,
}

struct Inner {
    raw: RawFd,
    token: Option<Token>,
    /// Peer closed, errored, or the socket was closed locally.
    dead: bool,
    /// Read and write notifications suspended by [`Socket::pause`].
    paused: bool,
    /// Read interest removed for good by [`Socket::stop_reading`].
    stopped: bool,
    queue: VecDeque<Outbound>,
    queue_limit: usize,
    /// `None` while the handler runs.
    handler: Option<Box<dyn SocketHandler>>,
    drained: Option<Box<DrainedCallback>>,
    /// `None` once the descriptor was handed away.
    fd: Option<OwnedFd>,
}

impl Inner {
    fn interest(&self) -> Interest {
        Interest {
            read: !self.paused && !self.stopped,
            write: !self.paused && !self.queue.is_empty(),
        }
    }
}

/// A reference-counted, reactor-managed socket.
#[derive(Clone)]
pub struct Socket(Rc<RefCell<Inner>>);

/// A non-owning reference to a [`Socket`].
#[derive(Clone)]
pub struct WeakSocket(Weak<RefCell<Inner>>);

impl WeakSocket {
    /// Returns the socket if it is still alive.
    pub fn upgrade(&self) -> Option<Socket> {
        self.0.upgrade().map(Socket)
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.borrow();
        f.debug_struct("Socket")
            .field("fd", &inner.raw)
            .field("dead", &inner.dead)
            .field("queued", &inner.queue.len())
            .finish()
    }
}

/// The reactor's reference to a socket.
struct Registration {
    socket: Socket,
}

impl Watcher for Registration {
    fn ready(&mut self, reactor: &mut Reactor, ready: Ready) -> Result<Dispatch> {
        let socket = &self.socket;

        if ready.readable {
            socket.dispatch_readable(reactor);
        }
        if ready.error {
            debug!(fd = socket.fd(), "closed by the other side");
            socket.close(reactor);
            return Ok(Dispatch::Continue);
        }
        if ready.writable {
            socket.drain(reactor);
        }

        Ok(Dispatch::Continue)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut inner = self.socket.0.borrow_mut();
        inner.dead = true;
        inner.token = None;
    }
}

impl Socket {
    /// Takes ownership of `fd` and starts watching it for reads.
    ///
    /// Every transfer is made with `MSG_DONTWAIT`, so the descriptor's own
    /// blocking mode is left untouched.
    pub fn add<H>(reactor: &mut Reactor, fd: OwnedFd, handler: H) -> Result<Socket>
    where
        H: SocketHandler + 'static,
    {
        Self::with_limit(reactor, fd, handler, QUEUE_LIMIT)
    }

    /// Like [`add`](Self::add) with an explicit outbound queue bound.
    pub fn with_limit<H>(
        reactor: &mut Reactor,
        fd: OwnedFd,
        handler: H,
        queue_limit: usize,
    ) -> Result<Socket>
    where
        H: SocketHandler + 'static,
    {
        let raw = fd.as_raw_fd();

        let socket = Socket(Rc::new(RefCell::new(Inner {
            raw,
            token: None,
            dead: false,
            paused: false,
            stopped: false,
            queue: VecDeque::new(),
            queue_limit,
            handler: Some(Box::new(handler)),
            drained: None,
            fd: Some(fd),
        })));

        let token = reactor.watch(
            raw,
            Interest::READ,
            Registration {
                socket: socket.clone(),
            },
        )?;
        socket.0.borrow_mut().token = Some(token);

        Ok(socket)
    }

    /// Returns a non-owning reference.
    pub fn downgrade(&self) -> WeakSocket {
        WeakSocket(Rc::downgrade(&self.0))
    }

    /// The raw descriptor, for logging and for passing to another process.
    pub fn fd(&self) -> RawFd {
        self.0.borrow().raw
    }

    /// Returns `true` once the socket was closed or errored.
    pub fn is_dead(&self) -> bool {
        self.0.borrow().dead
    }

    /// Number of messages waiting in the outbound queue.
    pub fn queued(&self) -> usize {
        self.0.borrow().queue.len()
    }

    fn refresh_interest(&self, reactor: &mut Reactor) {
        let (token, interest) = {
            let inner = self.0.borrow();
            (inner.token, inner.interest())
        };

        if let Some(token) = token {
            if let Err(e) = reactor.set_interest(token, interest) {
                warn!(fd = self.fd(), error = %e, "unable to update socket interest");
            }
        }
    }

    fn dispatch_readable(&self, reactor: &mut Reactor) {
        let handler = {
            let mut inner = self.0.borrow_mut();
            if inner.dead {
                return;
            }
            inner.handler.take()
        };

        if let Some(mut handler) = handler {
            handler.readable(reactor, self);
            self.0.borrow_mut().handler.get_or_insert(handler);
        }
    }

    /// Queues `data` for sending.
    ///
    /// Passing a `Vec<u8>` hands the buffer over; a slice is copied. Writes
    /// to a dead socket are dropped. Fails with [`Error::QueueFull`] when
    /// the queue is at its bound.
    pub fn write(&self, reactor: &mut Reactor, data: impl Into<Vec<u8>>) -> Result<()> {
        self.enqueue(reactor, data.into(), None, None)
    }

    /// Queues `data` together with a control message.
    ///
    /// The control message goes out with the first bytes of `data`; once
    /// any byte was sent, `close_after` is closed.
    pub fn write_with_ancillary(
        &self,
        reactor: &mut Reactor,
        data: impl Into<Vec<u8>>,
        ancillary: Ancillary,
        close_after: Option<OwnedFd>,
    ) -> Result<()> {
        self.enqueue(reactor, data.into(), Some(ancillary), close_after)
    }

    fn enqueue(
        &self,
        reactor: &mut Reactor,
        data: Vec<u8>,
        ancillary: Option<Ancillary>,
        close_after: Option<OwnedFd>,
    ) -> Result<()> {
        let was_idle = {
            let mut inner = self.0.borrow_mut();
            if inner.dead {
                return Ok(());
            }
            if inner.queue.len() >= inner.queue_limit {
                return Err(Error::QueueFull);
            }

            let was_idle = inner.queue.is_empty();
            inner.queue.push_back(Outbound {
                data,
                cursor: 0,
                ancillary,
                close_after,
            });
            was_idle
        };

        if was_idle {
            self.refresh_interest(reactor);
        }
        Ok(())
    }

    /// Sends as much of the queue as the kernel accepts.
    fn drain(&self, reactor: &mut Reactor) {
        {
            let mut guard = self.0.borrow_mut();
            let inner = &mut *guard;
            let raw = inner.raw;

            while let Some(message) = inner.queue.front_mut() {
                let control = message.ancillary.as_ref().map(Ancillary::as_bytes);
                let result = sys_sendmsg(raw, &message.data[message.cursor..], control);

                match result {
                    Err(e)
                        if e.kind() == io::ErrorKind::WouldBlock
                            || e.kind() == io::ErrorKind::Interrupted =>
                    {
                        return;
                    }
                    Err(e) => {
                        debug!(fd = raw, error = %e, "dropping unsendable message");
                        inner.queue.pop_front();
                    }
                    Ok(sent) => {
                        message.ancillary = None;
                        message.close_after = None;
                        message.cursor += sent;

                        if message.cursor >= message.data.len() {
                            inner.queue.pop_front();
                        }
                    }
                }
            }
        }

        self.refresh_interest(reactor);

        let drained = self.0.borrow_mut().drained.take();
        if let Some(callback) = drained {
            callback(reactor, self);
        }
    }

    /// Performs one non-blocking receive.
    ///
    /// Returns 0 when nothing is available, on error, or when the socket is
    /// dead.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        self.read_with_ancillary(buf).0
    }

    /// Performs one non-blocking receive, also collecting a control
    /// message if one arrived with the data.
    pub fn read_with_ancillary(&self, buf: &mut [u8]) -> (usize, Option<Ancillary>) {
        let inner = self.0.borrow();
        if inner.dead {
            return (0, None);
        }

        let mut control = [0u8; CONTROL_CAPACITY];
        match sys_recvmsg(inner.raw, buf, &mut control) {
            Ok((n, control_len)) => (n, Ancillary::from_received(&control[..control_len])),
            Err(e) => {
                if e.kind() != io::ErrorKind::WouldBlock {
                    debug!(fd = inner.raw, error = %e, "receive failed");
                }
                (0, None)
            }
        }
    }

    /// Suspends read and write notifications.
    ///
    /// Writes still queue up while paused and go out after
    /// [`resume`](Self::resume).
    pub fn pause(&self, reactor: &mut Reactor) {
        {
            let mut inner = self.0.borrow_mut();
            if inner.dead || inner.paused {
                return;
            }
            inner.paused = true;
        }
        self.refresh_interest(reactor);
    }

    /// Continues notifications after [`pause`](Self::pause).
    pub fn resume(&self, reactor: &mut Reactor) {
        {
            let mut inner = self.0.borrow_mut();
            if inner.dead || !inner.paused {
                return;
            }
            inner.paused = false;
        }
        self.refresh_interest(reactor);
    }

    /// Removes read interest for good.
    pub fn stop_reading(&self, reactor: &mut Reactor) {
        {
            let mut inner = self.0.borrow_mut();
            if inner.dead || inner.stopped {
                return;
            }
            inner.stopped = true;
        }
        self.refresh_interest(reactor);
    }

    /// Sets the one-shot callback run when the outbound queue drains.
    pub fn set_drained_callback<F>(&self, callback: F)
    where
        F: FnOnce(&mut Reactor, &Socket) + 'static,
    {
        self.0.borrow_mut().drained = Some(Box::new(callback));
    }

    /// Closes the socket now, dropping anything still queued.
    ///
    /// The socket is dead from here on. The reactor releases its reference
    /// at the next safe point. Closing twice does nothing.
    pub fn close(&self, reactor: &mut Reactor) {
        let token = {
            let mut inner = self.0.borrow_mut();
            inner.dead = true;
            inner.queue.clear();
            inner.drained = None;
            inner.token
        };

        if let Some(token) = token {
            reactor.unwatch(token);
        }
    }

    /// Closes the socket once every queued message was sent.
    ///
    /// A paused socket stops reading and drains anyway.
    pub fn flush_and_close(&self, reactor: &mut Reactor) {
        if self.0.borrow().queue.is_empty() {
            self.close(reactor);
            return;
        }

        self.set_drained_callback(|reactor, socket| socket.close(reactor));
        let held = {
            let mut inner = self.0.borrow_mut();
            let held = inner.paused;
            if held {
                inner.paused = false;
                inner.stopped = true;
            }
            held
        };
        if held {
            self.refresh_interest(reactor);
        }
    }

    /// Hands the descriptor over to the caller.
    ///
    /// The socket will not close it. Returns `None` if it was already
    /// handed away.
    pub fn set_unmanaged(&self) -> Option<OwnedFd> {
        self.0.borrow_mut().fd.take()
    }
}

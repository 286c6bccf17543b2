//! Established WebSocket connections of one worker.

use super::frame::{CloseCode, FrameEvent, FrameParser, Opcode, encode_close, encode_frame};

use crate::error::Result;
use crate::net::{Socket, SocketHandler, WeakSocket};
use crate::reactor::Reactor;
use crate::utils::slab::{Key, Slab};

use std::cell::RefCell;
use std::os::fd::OwnedFd;
use std::rc::Rc;
use tracing::{debug, info};

const READ_CHUNK: usize = 1024;

/// Called with every complete message a spectator sends.
pub type MessageCallback = dyn FnMut(&mut Reactor, &Socket, &[u8]);

/// Called when the last spectator leaves.
pub type EmptyCallback = dyn FnMut();

struct HubInner {
    members: Slab<Option<WeakSocket>>,
    on_message: Option<Box<MessageCallback>>,
    on_empty: Option<Box<EmptyCallback>>,
}

/// The set of spectator connections.
///
/// Cloned handles share one set. Members are tracked weakly; each leaves
/// the set when its connection is destroyed.
#[derive(Clone)]
pub struct Hub(Rc<RefCell<HubInner>>);

impl Hub {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(HubInner {
            members: Slab::new(),
            on_message: None,
            on_empty: None,
        })))
    }

    /// Sets the handler of spectator messages.
    pub fn on_message<F>(&self, callback: F)
    where
        F: FnMut(&mut Reactor, &Socket, &[u8]) + 'static,
    {
        self.0.borrow_mut().on_message = Some(Box::new(callback));
    }

    /// Sets the callback run whenever the last spectator leaves.
    pub fn on_empty<F>(&self, callback: F)
    where
        F: FnMut() + 'static,
    {
        self.0.borrow_mut().on_empty = Some(Box::new(callback));
    }

    /// Adds an established WebSocket connection.
    pub fn add(&self, reactor: &mut Reactor, fd: OwnedFd) -> Result<Socket> {
        let slot = self.0.borrow_mut().members.insert(None);
        let handler = DataConnection {
            parser: FrameParser::new(),
            hub: self.clone(),
            slot,
        };

        let socket = Socket::add(reactor, fd, handler)?;
        if let Some(member) = self.0.borrow_mut().members.get_mut(slot) {
            *member = Some(socket.downgrade());
        }

        info!(fd = socket.fd(), "spectator connected");
        Ok(socket)
    }

    /// Returns `true` while at least one spectator is connected.
    pub fn connected(&self) -> bool {
        !self.0.borrow().members.is_empty()
    }

    /// Number of connected spectators.
    pub fn len(&self) -> usize {
        self.0.borrow().members.len()
    }

    /// Sends `payload` as a binary message to every spectator.
    pub fn broadcast(&self, reactor: &mut Reactor, payload: &[u8]) {
        let members: Vec<Socket> = self
            .0
            .borrow()
            .members
            .iter()
            .filter_map(|(_, member)| member.as_ref().and_then(WeakSocket::upgrade))
            .collect();

        if members.is_empty() {
            return;
        }

        let frame = encode_frame(Opcode::Binary, payload);
        for socket in members {
            if let Err(e) = socket.write(reactor, frame.as_slice()) {
                debug!(fd = socket.fd(), error = %e, "dropping spectator");
                socket.close(reactor);
            }
        }
    }

    fn deliver(&self, reactor: &mut Reactor, socket: &Socket, message: &[u8]) {
        let callback = self.0.borrow_mut().on_message.take();

        if let Some(mut callback) = callback {
            callback(reactor, socket, message);
            self.0.borrow_mut().on_message.get_or_insert(callback);
        }
    }

    fn leave(&self, slot: Key) {
        let empty = {
            let mut inner = self.0.borrow_mut();
            inner.members.remove(slot);
            inner.members.is_empty()
        };
        if !empty {
            return;
        }

        let callback = self.0.borrow_mut().on_empty.take();
        if let Some(mut callback) = callback {
            callback();
            self.0.borrow_mut().on_empty.get_or_insert(callback);
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler of one established WebSocket connection.
struct DataConnection {
    parser: FrameParser,
    hub: Hub,
    slot: Key,
}

impl DataConnection {
    fn fail(&self, reactor: &mut Reactor, socket: &Socket, code: CloseCode) {
        info!(fd = socket.fd(), code = code.code(), reason = %code, "closing websocket");

        socket.stop_reading(reactor);
        if socket.write(reactor, encode_close(code)).is_err() {
            socket.close(reactor);
            return;
        }
        socket.flush_and_close(reactor);
    }
}

impl SocketHandler for DataConnection {
    fn readable(&mut self, reactor: &mut Reactor, socket: &Socket) {
        let mut buf = [0u8; READ_CHUNK];

        loop {
            let n = socket.read(&mut buf);
            if n == 0 {
                return;
            }

            let mut events = Vec::new();
            let result = self.parser.feed(&buf[..n], |event| events.push(event));

            for event in events {
                match event {
                    FrameEvent::Ping(payload) => {
                        if socket.write(reactor, encode_frame(Opcode::Pong, &payload)).is_err() {
                            socket.close(reactor);
                            return;
                        }
                    }
                    FrameEvent::Message(message) => self.hub.deliver(reactor, socket, &message),
                }
            }

            if let Err(code) = result {
                self.fail(reactor, socket, code);
                return;
            }
        }
    }
}

impl Drop for DataConnection {
    fn drop(&mut self) {
        self.hub.leave(self.slot);
    }
}

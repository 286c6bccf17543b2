//! WebSocket engine.
//!
//! The master answers the HTTP upgrade on the WebSocket port and hands the
//! upgraded connection to the worker of the user named in the request path.
//! In the worker, the connection joins the [`Hub`] of spectators, who get
//! screen updates as binary messages and may send control bytes back.

mod channel;
mod frame;
mod handshake;

pub use channel::{EmptyCallback, Hub, MessageCallback};
pub use frame::{
    CloseCode, FrameEvent, FrameParser, MAX_CONTROL_PAYLOAD, MAX_PAYLOAD, Opcode, encode_close, encode_frame,
};
pub use handshake::{FIELD_MAX, Handshake, HandshakeConnection, HandshakeError, Request, TOKEN_MAX, accept_key};

use crate::error::Result;
use crate::ipc::Directory;
use crate::net::Listener;
use crate::reactor::Reactor;

use std::cell::RefCell;
use std::rc::Rc;

/// Accepts WebSocket upgrades on `port`.
pub fn listen(reactor: &mut Reactor, port: u16, directory: Rc<RefCell<dyn Directory>>) -> Result<Listener> {
    Listener::bind(reactor, port, move |_, _| {
        HandshakeConnection::new(Rc::clone(&directory))
    })
}

//! Text protocol engine.
//!
//! Every request is one line: a four-letter command, optionally followed by
//! a value. Every reply is one line in the same format, using the request's
//! terminator:
//!
//! - `DONE`: acknowledged.
//! - `DATA <ints>`: the answer, as space-separated integers.
//! - `NOPE <message>`: refused, the session goes on.
//! - `OVER <message>`: the connection is closed after this line.
//!
//! On the master a connection only ever sends `USER`; it is then handed to
//! the user's worker, where it joins the [`Session`] and plays the level.

mod connection;
mod fault;
mod line;
mod phase;
mod session;

pub use connection::{Exchange, GameConnection, Phase};
pub use fault::Fault;
pub use line::{COMMAND_LEN, Line, LineEnding, LineParser, VALUE_MAX, Violation};
pub use phase::Authenticate;
pub use session::{REDRAW_INTERVAL_MS, Session};

use crate::error::Result;
use crate::ipc::Directory;
use crate::net::Listener;
use crate::reactor::Reactor;

use std::cell::RefCell;
use std::rc::Rc;

/// Accepts game connections on `port` and authenticates them against
/// `directory`.
pub fn listen(reactor: &mut Reactor, port: u16, directory: Rc<RefCell<dyn Directory>>) -> Result<Listener> {
    Listener::bind(reactor, port, move |_, _| {
        GameConnection::new(
            LineParser::new(),
            Box::new(Authenticate::new(Rc::clone(&directory))),
        )
    })
}

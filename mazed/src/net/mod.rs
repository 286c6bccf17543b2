//! Managed sockets and listeners.
//!
//! - [`Socket`]: reference-counted wrapper with a bounded write queue,
//!   deferred close and descriptor passing
//! - [`Listener`]: dual-stack TCP listener producing managed sockets
//! - [`Ancillary`]: `SCM_RIGHTS` control messages

mod ancillary;
mod listener;
mod socket;

pub use ancillary::{Ancillary, AncillaryError, CONTROL_CAPACITY};
pub use listener::Listener;
pub use socket::{DrainedCallback, QUEUE_LIMIT, Socket, SocketHandler, WeakSocket};

use crate::error::Result;
use crate::reactor::platform::sys_socketpair;

use std::os::fd::OwnedFd;

/// Creates a connected pair of Unix stream sockets.
pub fn socket_pair() -> Result<(OwnedFd, OwnedFd)> {
    Ok(sys_socketpair()?)
}

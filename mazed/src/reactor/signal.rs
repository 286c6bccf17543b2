//! Signal delivery through `signalfd`.
//!
//! The watched signals are blocked for the calling thread and read from a
//! descriptor instead, so a signal is handled between two callbacks like
//! any other readiness event and never interrupts one.

use super::core::{Dispatch, Reactor};
use super::event::{Interest, Ready, Token};
use super::poller::platform::{sys_reap_child, sys_signal_read, sys_signalfd};

use crate::error::Result;

use std::os::fd::AsRawFd;

pub use libc::{SIGCHLD, SIGHUP, SIGINT, SIGTERM, SIGUSR1, SIGUSR2};

impl Reactor {
    /// Delivers `signals` to `handler` from inside the loop.
    ///
    /// Returns the registration token; unwatching it stops delivery but
    /// leaves the signals blocked.
    pub fn watch_signals<F>(&mut self, signals: &[libc::c_int], mut handler: F) -> Result<Token>
    where
        F: FnMut(&mut Reactor, libc::c_int) -> Result<()> + 'static,
    {
        let fd = sys_signalfd(signals)?;
        let raw = fd.as_raw_fd();

        let watcher = move |reactor: &mut Reactor, _: Ready| -> Result<Dispatch> {
            while let Some(signo) = sys_signal_read(&fd)? {
                handler(reactor, signo)?;
            }
            Ok(Dispatch::Continue)
        };

        self.watch(raw, Interest::READ, watcher)
    }
}

/// A child process collected by [`reap_children`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExitedChild {
    /// Process id of the child.
    pub pid: libc::pid_t,
    /// Raw wait status.
    pub status: libc::c_int,
}

/// Collects every child that has exited, without blocking.
pub fn reap_children() -> Vec<ExitedChild> {
    std::iter::from_fn(sys_reap_child)
        .map(|(pid, status)| ExitedChild { pid, status })
        .collect()
}

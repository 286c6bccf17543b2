//! Linux `epoll`-based poller.
//!
//! Responsibilities:
//! - Register descriptors with read/write interests
//! - Enable and disable registrations without forgetting them
//! - Block waiting for readiness, optionally bounded by a timeout
//!
//! The poller is level-triggered: a descriptor that stays readable keeps
//! being reported until it is drained or its read interest is removed.

use crate::reactor::event::{Event, Interest, Ready, Token};
use crate::utils::slab::Key;

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLOUT, EPOLLRDHUP, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Maximum number of events collected by one `epoll_wait` call.
const EVENT_CAPACITY: usize = 64;

/// Linux `epoll` poller.
pub(crate) struct EpollPoller {
    /// Epoll instance.
    epoll: OwnedFd,

    /// Reusable buffer for kernel events.
    events: Vec<epoll_event>,
}

/// Translates an interest into epoll flags.
///
/// Read interest also asks for `EPOLLRDHUP` so a peer shutdown is reported
/// as an error condition rather than as an endless stream of empty reads.
fn flags(interest: Interest) -> u32 {
    let mut flags = 0;

    if interest.read {
        flags |= EPOLLIN | EPOLLRDHUP;
    }
    if interest.write {
        flags |= EPOLLOUT;
    }

    flags as u32
}

impl EpollPoller {
    /// Creates a new epoll instance.
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            epoll: unsafe { OwnedFd::from_raw_fd(epoll) },
            events: Vec::with_capacity(EVENT_CAPACITY),
        })
    }

    fn ctl(&self, op: i32, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        let mut event = epoll_event {
            events: flags(interest),
            u64: token.0.to_u64(),
        };

        let rc = unsafe { epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Registers a descriptor with the poller.
    pub(crate) fn register(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        self.ctl(EPOLL_CTL_ADD, fd, token, interest)
    }

    /// Updates the interest of an already registered descriptor.
    pub(crate) fn reregister(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        self.ctl(EPOLL_CTL_MOD, fd, token, interest)
    }

    /// Removes a descriptor from the poller.
    ///
    /// Failure is ignored: the descriptor may already be gone from the
    /// epoll set because it was closed behind the reactor's back.
    pub(crate) fn deregister(&self, fd: RawFd) {
        unsafe {
            epoll_ctl(
                self.epoll.as_raw_fd(),
                EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            );
        }
    }

    /// Polls for readiness events.
    ///
    /// Blocks until at least one descriptor becomes ready or the optional
    /// timeout expires. An interrupted wait returns with no events.
    pub(crate) fn poll(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms = timeout
            .map(|t| t.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        events.clear();

        let n = unsafe {
            epoll_wait(
                self.epoll.as_raw_fd(),
                self.events.as_mut_ptr(),
                EVENT_CAPACITY as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        for ev in &self.events {
            let bits = ev.events;

            events.push(Event {
                token: Token(Key::from_u64(ev.u64)),
                ready: Ready {
                    readable: bits & EPOLLIN as u32 != 0,
                    writable: bits & EPOLLOUT as u32 != 0,
                    error: bits & (EPOLLERR | EPOLLHUP | EPOLLRDHUP) as u32 != 0,
                },
            });
        }

        Ok(())
    }
}

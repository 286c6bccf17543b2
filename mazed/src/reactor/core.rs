use super::event::{Event, Interest, Ready, Token};
use super::poller::Poller;
use super::timer::TimerEntry;

use crate::error::{Error, Result};
use crate::utils::slab::Slab;

use std::cell::Cell;
use std::collections::HashMap;
use std::mem;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;
use tracing::trace;

/// What a watcher wants after handling a readiness notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Keep delivering notifications.
    Continue,
    /// Stop delivering notifications but keep the registration; see
    /// [`Reactor::resume`].
    Disable,
}

/// Receives readiness notifications for one watched descriptor.
///
/// Dropping the watcher is its destructor. The reactor drops a removed
/// watcher only at the top of the next loop iteration, never while it may
/// still be running.
pub trait Watcher {
    /// Handles the readiness observed for the descriptor.
    ///
    /// Returning an error aborts [`Reactor::run`] with that error.
    fn ready(&mut self, reactor: &mut Reactor, ready: Ready) -> Result<Dispatch>;
}

impl<F> Watcher for F
where
    F: FnMut(&mut Reactor, Ready) -> Result<Dispatch>,
{
    fn ready(&mut self, reactor: &mut Reactor, ready: Ready) -> Result<Dispatch> {
        self(reactor, ready)
    }
}

/// Cooperative, idempotent shutdown request.
///
/// Cloned handles share one flag. The request is honored at the top of the
/// next loop iteration.
#[derive(Clone, Debug, Default)]
pub struct Shutdown(Rc<Cell<bool>>);

impl Shutdown {
    /// Asks the loop to stop. Requesting twice is the same as once.
    pub fn request(&self) {
        self.0.set(true);
    }

    /// Returns `true` once a shutdown was requested.
    pub fn is_requested(&self) -> bool {
        self.0.get()
    }
}

/// A registered descriptor.
struct Watched {
    /// Raw descriptor, owned by whoever registered it.
    fd: RawFd,

    /// Readiness the watcher wants.
    interest: Interest,

    /// Whether the descriptor is currently in the epoll set.
    enabled: bool,

    /// The watcher; `None` while it runs.
    watcher: Option<Box<dyn Watcher>>,

    /// Set when the registration is removed while its watcher runs.
    removed: bool,
}

/// Single-threaded readiness reactor.
///
/// The reactor owns every registration of its process: watched
/// descriptors, timers and the signal descriptor. Callbacks receive
/// `&mut Reactor` and may freely add, change or remove registrations,
/// including their own.
pub struct Reactor {
    /// Readiness backend.
    poller: Poller,

    /// Watched descriptors.
    watched: Slab<Watched>,

    /// One registration per descriptor.
    by_fd: HashMap<RawFd, Token>,

    /// Removed watchers, dropped at the next safe point.
    pending: Vec<Box<dyn Watcher>>,

    /// Timers, see [`Reactor::timer_new`].
    pub(super) timers: Slab<TimerEntry>,

    /// Shared shutdown flag.
    shutdown: Shutdown,

    /// Reusable event buffer.
    events: Vec<Event>,
}

impl Reactor {
    /// Creates a reactor with an empty registration table.
    pub fn new() -> Result<Self> {
        Ok(Self {
            poller: Poller::new()?,
            watched: Slab::new(),
            by_fd: HashMap::new(),
            pending: Vec::new(),
            timers: Slab::new(),
            shutdown: Shutdown::default(),
            events: Vec::new(),
        })
    }

    /// Starts watching `fd`.
    ///
    /// The descriptor stays owned by the caller and must outlive the
    /// registration. At most one registration may exist per descriptor.
    pub fn watch<W>(&mut self, fd: RawFd, interest: Interest, watcher: W) -> Result<Token>
    where
        W: Watcher + 'static,
    {
        if self.by_fd.contains_key(&fd) {
            return Err(Error::AlreadyWatched(fd));
        }

        let token = Token(self.watched.insert(Watched {
            fd,
            interest,
            enabled: true,
            watcher: Some(Box::new(watcher)),
            removed: false,
        }));

        if let Err(e) = self.poller.register(fd, token, interest) {
            self.watched.remove(token.0);
            return Err(e.into());
        }

        self.by_fd.insert(fd, token);
        trace!(fd, "watching descriptor");

        Ok(token)
    }

    fn live(&mut self, token: Token) -> Result<&mut Watched> {
        match self.watched.get_mut(token.0) {
            Some(w) if !w.removed => Ok(w),
            _ => Err(Error::UnknownToken),
        }
    }

    /// Replaces the interest of a registration.
    pub fn set_interest(&mut self, token: Token, interest: Interest) -> Result<()> {
        let watched = self.live(token)?;
        if watched.interest == interest {
            return Ok(());
        }
        watched.interest = interest;

        if watched.enabled {
            let fd = watched.fd;
            self.poller.reregister(fd, token, interest)?;
        }

        Ok(())
    }

    /// Returns the current interest of a registration.
    pub fn interest(&self, token: Token) -> Option<Interest> {
        match self.watched.get(token.0) {
            Some(w) if !w.removed => Some(w.interest),
            _ => None,
        }
    }

    /// Stops notifications for a registration without removing it.
    ///
    /// Pausing a paused registration does nothing.
    pub fn pause(&mut self, token: Token) -> Result<()> {
        let watched = self.live(token)?;
        if !watched.enabled {
            return Ok(());
        }
        watched.enabled = false;

        let fd = watched.fd;
        self.poller.deregister(fd);
        Ok(())
    }

    /// Restarts notifications for a paused registration.
    pub fn resume(&mut self, token: Token) -> Result<()> {
        let watched = self.live(token)?;
        if watched.enabled {
            return Ok(());
        }
        watched.enabled = true;

        let (fd, interest) = (watched.fd, watched.interest);
        self.poller.register(fd, token, interest)?;
        Ok(())
    }

    /// Removes a registration.
    ///
    /// The descriptor leaves the epoll set immediately; the watcher is
    /// dropped at the top of the next loop iteration. Removing a removed
    /// registration does nothing.
    pub fn unwatch(&mut self, token: Token) {
        let Some(watched) = self.watched.get_mut(token.0) else {
            return;
        };
        if watched.removed {
            return;
        }

        if watched.enabled {
            self.poller.deregister(watched.fd);
        }
        self.by_fd.remove(&watched.fd);
        trace!(fd = watched.fd, "descriptor removed");

        if watched.watcher.is_some() {
            if let Some(watched) = self.watched.remove(token.0) {
                self.pending.extend(watched.watcher);
            }
        } else {
            // Running right now; dispatch finishes the removal.
            watched.removed = true;
        }
    }

    /// Returns a handle that can request shutdown from anywhere.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Requests the loop to stop at the top of its next iteration.
    pub fn shutdown(&self) {
        self.shutdown.request();
    }

    /// Drops removed watchers, including any removed by those destructors.
    fn release_pending(&mut self) {
        while !self.pending.is_empty() {
            let batch = mem::take(&mut self.pending);
            drop(batch);
        }
    }

    fn dispatch(&mut self, event: Event) -> Result<()> {
        let token = event.token;

        let mut watcher = match self.watched.get_mut(token.0) {
            Some(w) if w.enabled && !w.removed => match w.watcher.take() {
                Some(watcher) => watcher,
                None => return Ok(()),
            },
            _ => return Ok(()),
        };

        let result = watcher.ready(self, event.ready);

        match self.watched.get_mut(token.0) {
            Some(w) if !w.removed => w.watcher = Some(watcher),
            _ => {
                self.watched.remove(token.0);
                self.pending.push(watcher);
            }
        }

        if result? == Dispatch::Disable && self.live(token).is_ok() {
            self.pause(token)?;
        }

        Ok(())
    }

    /// Runs one loop iteration.
    ///
    /// Drops removed watchers, honors a pending shutdown, then waits at
    /// most `timeout` (forever if `None`) and dispatches every ready
    /// registration once. Returns `false` when the loop should stop.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<bool> {
        self.release_pending();
        if self.shutdown.is_requested() {
            return Ok(false);
        }

        let mut events = mem::take(&mut self.events);
        self.poller.poll(&mut events, timeout)?;

        for event in &events {
            if let Err(e) = self.dispatch(*event) {
                self.events = events;
                return Err(e);
            }
        }

        self.events = events;
        Ok(true)
    }

    /// Runs the loop until shutdown is requested or a watcher fails.
    pub fn run(&mut self) -> Result<()> {
        while self.turn(None)? {}
        Ok(())
    }
}

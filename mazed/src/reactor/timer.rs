//! `timerfd`-backed timers.
//!
//! A timer is a watched descriptor like any other, so expirations are
//! dispatched in the same ordered loop as socket readiness. On top of the
//! kernel timer this module keeps the armed, repeat and paused state, plus
//! the expirations that arrived while paused so they can be replayed once
//! on resume.

use super::core::{Dispatch, Reactor};
use super::event::{Interest, Ready, Token};
use super::poller::platform::{sys_timer_read, sys_timer_remaining, sys_timer_set, sys_timerfd};

use crate::error::{Error, Result};
use crate::utils::slab::Key;

use std::os::fd::{AsRawFd, OwnedFd};
use std::time::Duration;

/// Smallest delay handed to the kernel; a zero value would disarm.
const MIN_DELAY: Duration = Duration::from_nanos(1);

/// Identifies a timer within one [`Reactor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(Key);

/// Timer callback. Receives the number of expirations being reported.
pub type TimerCallback = dyn FnMut(&mut Reactor, TimerId, u64) -> Result<()>;

pub(crate) struct TimerEntry {
    fd: OwnedFd,
    token: Option<Token>,
    armed: bool,
    repeat: bool,
    paused: bool,
    period: Duration,
    /// Time left when paused while armed.
    remaining: Duration,
    /// Expirations observed while paused.
    backlog: u64,
    /// `None` while the callback runs.
    callback: Option<Box<TimerCallback>>,
}

impl TimerEntry {
    fn start(&self, delay: Duration) -> Result<()> {
        let interval = if self.repeat { self.period } else { Duration::ZERO };
        sys_timer_set(&self.fd, delay.max(MIN_DELAY), interval)?;
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        sys_timer_set(&self.fd, Duration::ZERO, Duration::ZERO)?;
        Ok(())
    }
}

impl Reactor {
    /// Creates a disarmed timer.
    pub fn timer_new<F>(&mut self, callback: F) -> Result<TimerId>
    where
        F: FnMut(&mut Reactor, TimerId, u64) -> Result<()> + 'static,
    {
        let fd = sys_timerfd()?;
        let raw = fd.as_raw_fd();

        let id = TimerId(self.timers.insert(TimerEntry {
            fd,
            token: None,
            armed: false,
            repeat: false,
            paused: false,
            period: Duration::ZERO,
            remaining: Duration::ZERO,
            backlog: 0,
            callback: Some(Box::new(callback)),
        }));

        let watcher = move |reactor: &mut Reactor, _: Ready| -> Result<Dispatch> {
            reactor.timer_expired(id)?;
            Ok(Dispatch::Continue)
        };

        let token = match self.watch(raw, Interest::READ, watcher) {
            Ok(token) => token,
            Err(e) => {
                self.timers.remove(id.0);
                return Err(e);
            }
        };

        if let Some(entry) = self.timers.get_mut(id.0) {
            entry.token = Some(token);
        }

        Ok(id)
    }

    fn timer(&mut self, id: TimerId) -> Result<&mut TimerEntry> {
        self.timers.get_mut(id.0).ok_or(Error::UnknownTimer)
    }

    /// Arms a timer to fire after `ms` milliseconds, and then every `ms`
    /// milliseconds if `repeat` is set.
    ///
    /// Re-arming replaces the previous schedule. A paused timer keeps the
    /// new schedule until it is resumed.
    pub fn timer_arm(&mut self, id: TimerId, ms: u64, repeat: bool) -> Result<()> {
        let entry = self.timer(id)?;
        let period = Duration::from_millis(ms);

        entry.armed = true;
        entry.repeat = repeat;
        entry.period = period;
        entry.backlog = 0;

        if entry.paused {
            entry.remaining = period;
            return Ok(());
        }
        entry.start(period)
    }

    /// Disarms a timer. Its callback will not run again until it is
    /// re-armed. Disarming a disarmed timer does nothing.
    pub fn timer_disarm(&mut self, id: TimerId) -> Result<()> {
        let entry = self.timer(id)?;
        if !entry.armed {
            return Ok(());
        }

        entry.armed = false;
        entry.backlog = 0;
        entry.remaining = Duration::ZERO;
        entry.stop()
    }

    /// Freezes a timer, preserving the time left until it fires.
    ///
    /// Pausing a paused timer does nothing.
    pub fn timer_pause(&mut self, id: TimerId) -> Result<()> {
        let entry = self.timer(id)?;
        if entry.paused {
            return Ok(());
        }
        entry.paused = true;

        if entry.armed {
            entry.remaining = sys_timer_remaining(&entry.fd)?;
            entry.stop()?;
        }
        Ok(())
    }

    /// Continues a paused timer from where it was frozen.
    ///
    /// Expirations collected while paused are reported to the callback in
    /// one call. Resuming a running timer does nothing.
    pub fn timer_resume(&mut self, id: TimerId) -> Result<()> {
        let entry = self.timer(id)?;
        if !entry.paused {
            return Ok(());
        }
        entry.paused = false;

        if entry.armed {
            entry.start(entry.remaining)?;
        }

        let backlog = std::mem::take(&mut entry.backlog);
        if backlog > 0 {
            self.run_timer_callback(id, backlog)?;
        }
        Ok(())
    }

    /// Returns `true` if the timer is armed.
    pub fn timer_is_armed(&self, id: TimerId) -> bool {
        self.timers.get(id.0).is_some_and(|t| t.armed)
    }

    /// Deletes a timer, disarming it first. Deleting from inside its own
    /// callback is allowed.
    pub fn timer_delete(&mut self, id: TimerId) {
        let Some(entry) = self.timers.remove(id.0) else {
            return;
        };

        if let Some(token) = entry.token {
            self.unwatch(token);
        }
        // The descriptor is out of the epoll set already; closing it here
        // also disarms it.
        drop(entry);
    }

    fn timer_expired(&mut self, id: TimerId) -> Result<()> {
        let Some(entry) = self.timers.get_mut(id.0) else {
            return Ok(());
        };

        let count = sys_timer_read(&entry.fd)?;
        if count == 0 || !entry.armed {
            return Ok(());
        }
        if !entry.repeat {
            entry.armed = false;
        }
        if entry.paused {
            entry.backlog += count;
            return Ok(());
        }

        self.run_timer_callback(id, count)
    }

    fn run_timer_callback(&mut self, id: TimerId, count: u64) -> Result<()> {
        let Some(mut callback) = self.timers.get_mut(id.0).and_then(|t| t.callback.take()) else {
            return Ok(());
        };

        let result = callback(self, id, count);

        if let Some(entry) = self.timers.get_mut(id.0) {
            entry.callback = Some(callback);
        }

        result
    }
}

use crate::error::{Error, Result};
use crate::reactor::{Reactor, TimerId};

use tracing::warn;

/// Most timers one session's level may hold at once.
pub const MAX_LEVEL_TIMERS: usize = 16;

/// Timers owned by the running level.
///
/// They are ordinary reactor timers, tracked here so that a waiting session
/// can freeze all of them and thaw them again together.
#[derive(Clone, Debug, Default)]
pub struct LevelTimers {
    ids: Vec<TimerId>,
}

impl LevelTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a disarmed timer.
    ///
    /// Fails with [`Error::TooManyTimers`] past [`MAX_LEVEL_TIMERS`].
    pub fn create<F>(&mut self, reactor: &mut Reactor, callback: F) -> Result<TimerId>
    where
        F: FnMut(&mut Reactor, u64) -> Result<()> + 'static,
    {
        if self.ids.len() >= MAX_LEVEL_TIMERS {
            return Err(Error::TooManyTimers);
        }

        let mut callback = callback;
        let id = reactor.timer_new(move |reactor, _, count| callback(reactor, count))?;
        self.ids.push(id);
        Ok(id)
    }

    /// See [`Reactor::timer_arm`].
    pub fn arm(&self, reactor: &mut Reactor, id: TimerId, ms: u64, repeat: bool) -> Result<()> {
        reactor.timer_arm(id, ms, repeat)
    }

    /// See [`Reactor::timer_disarm`].
    pub fn disarm(&self, reactor: &mut Reactor, id: TimerId) -> Result<()> {
        reactor.timer_disarm(id)
    }

    /// Deletes a timer and stops tracking it.
    pub fn delete(&mut self, reactor: &mut Reactor, id: TimerId) {
        self.ids.retain(|&t| t != id);
        reactor.timer_delete(id);
    }

    /// Deletes every level timer.
    pub(crate) fn clear(&mut self, reactor: &mut Reactor) {
        for id in self.ids.drain(..) {
            reactor.timer_delete(id);
        }
    }

    /// Number of live level timers.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub(crate) fn pause_all(&self, reactor: &mut Reactor) {
        for &id in &self.ids {
            if let Err(e) = reactor.timer_pause(id) {
                warn!(error = %e, "unable to pause level timer");
            }
        }
    }

    pub(crate) fn resume_all(&self, reactor: &mut Reactor) {
        for &id in &self.ids {
            if let Err(e) = reactor.timer_resume(id) {
                warn!(error = %e, "unable to resume level timer");
            }
        }
    }
}

//! Single-threaded readiness reactor.
//!
//! The reactor multiplexes every descriptor of a process through one
//! `epoll` instance and dispatches callbacks one at a time:
//! - watched descriptors, with an interest mask and an enabled flag,
//! - `timerfd` timers that can be paused without losing their schedule,
//! - signals, read from a `signalfd` inside the same loop.
//!
//! Removing a registration takes it out of the epoll set at once but drops
//! its watcher only at the top of the next iteration, so a callback may
//! delete its own registration while it runs.
//!
//! ```rust,ignore
//! let mut reactor = Reactor::new()?;
//! let timer = reactor.timer_new(|reactor, _, _| {
//!     reactor.shutdown();
//!     Ok(())
//! })?;
//! reactor.timer_arm(timer, 100, false)?;
//! reactor.run()?;
//! ```

mod core;
mod event;
mod poller;
mod signal;
mod timer;

pub use self::core::{Dispatch, Reactor, Shutdown, Watcher};
pub use event::{Interest, Ready, Token};
pub use signal::{ExitedChild, SIGCHLD, SIGHUP, SIGINT, SIGTERM, SIGUSR1, SIGUSR2, reap_children};
pub use timer::{TimerCallback, TimerId};

pub(crate) use poller::platform;

//! Crate-wide error type.
//!
//! Transport and protocol failures never surface here: they are local to one
//! connection and end with that connection being closed. What remains are
//! failures the immediate caller has to act on, such as a full outbound queue
//! or a registration that the kernel refused.

use std::io;
use std::os::fd::RawFd;

/// Errors returned by the reactor, managed sockets and process plumbing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An operating system call failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The descriptor already has a registration in this reactor.
    #[error("descriptor {0} is already watched")]
    AlreadyWatched(RawFd),

    /// The token does not name a live registration.
    #[error("unknown reactor registration")]
    UnknownToken,

    /// The timer id does not name a live timer.
    #[error("unknown timer")]
    UnknownTimer,

    /// The socket's outbound queue reached its bound.
    #[error("outbound queue is full")]
    QueueFull,

    /// A level tried to register more timers than a session allows.
    #[error("too many level timers")]
    TooManyTimers,

    /// The login is not present in the user directory.
    #[error("unknown user {0:?}")]
    UnknownUser(String),

    /// The configuration file could not be used.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

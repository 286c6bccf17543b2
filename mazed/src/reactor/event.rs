use crate::utils::slab::Key;

/// Readiness a registration wants to be told about.
///
/// Error and hang-up conditions are always reported and need no interest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Interest {
    /// Wake up when the descriptor is readable.
    pub read: bool,
    /// Wake up when the descriptor is writable.
    pub write: bool,
}

impl Interest {
    /// Readable only.
    pub const READ: Interest = Interest {
        read: true,
        write: false,
    };
}

/// Readiness observed for one registration during one poll round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ready {
    /// Data can be read without blocking.
    pub readable: bool,
    /// Data can be written without blocking.
    pub writable: bool,
    /// The peer hung up or the descriptor is in an error state.
    pub error: bool,
}

/// Identifies a watched descriptor within one [`Reactor`](super::Reactor).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Token(pub(crate) Key);

/// A readiness notification produced by the poller.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Event {
    /// Registration the event belongs to.
    pub(crate) token: Token,

    /// Observed readiness bits.
    pub(crate) ready: Ready,
}

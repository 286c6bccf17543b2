//! Levels: the game rules a session plays.
//!
//! The protocol engine talks to a level only through the [`Level`] trait.
//! Every per-connection player is identified by a [`PlayerId`] the level
//! hands out in [`Level::join`] and takes back in [`Level::leave`].

mod catalog;
mod grid;
mod timers;

pub use catalog::{LevelCatalog, LevelFactory};
pub use grid::{GridLevel, ParseGridError};
pub use timers::{LevelTimers, MAX_LEVEL_TIMERS};

use crate::display::Screen;
use crate::error::Result;
use crate::reactor::Reactor;

use std::time::Duration;

/// Cell colors shared by levels and the remote display.
pub mod color {
    pub const NONE: u8 = 0;
    pub const PLAYER: u8 = 1;
    pub const WALL: u8 = 2;
    pub const TREASURE: u8 = 3;
    pub const TRAP: u8 = 4;
}

/// Messages used by the built-in levels.
pub mod messages {
    pub const WIN: &str = "Excellent! Congratulations on completing the level.";
    pub const OUT_OF_MAZE: &str = "The position is outside the playing area.";
    pub const UNKNOWN_MOVE: &str = "Unknown direction of movement.";
    pub const WALL_HIT: &str = "There is a wall in that direction.";
    pub const TRAPPED: &str = "You fell into a trap.";
}

/// Identifies one player within a level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub usize);

/// A non-fatal refusal, answered with `NOPE`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct Refusal(pub String);

impl From<&str> for Refusal {
    fn from(message: &str) -> Self {
        Refusal(message.to_string())
    }
}

/// Outcome of a move.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// The player moved.
    Moved,
    /// The move was refused; the session goes on.
    Blocked(Refusal),
    /// The level is solved. Carries the winning message.
    Won(String),
    /// The level is lost. Carries the reason.
    Lost(String),
}

/// What a level gets to set itself up with.
pub struct LevelContext<'a> {
    pub reactor: &'a mut Reactor,
    pub timers: &'a mut LevelTimers,
}

/// A level's capability set.
///
/// Query methods take the asking player, since what a player sees may
/// depend on who they are.
pub trait Level {
    /// Maximum number of concurrently bound connections.
    fn max_connections(&self) -> usize;

    /// Time available to solve the level, from the first bind.
    fn max_time(&self) -> Option<Duration>;

    /// Called once, right after the level is started.
    fn start(&mut self, _cx: &mut LevelContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Adds a player for a newly bound connection.
    fn join(&mut self) -> PlayerId;

    /// Removes a player whose connection went away.
    fn leave(&mut self, player: PlayerId);

    /// `MOVE`
    fn step(&mut self, player: PlayerId, direction: u8) -> Step;

    /// `WHAT`: the color at `x`, `y`.
    fn cell(&self, player: PlayerId, x: u32, y: u32) -> std::result::Result<i32, Refusal>;

    /// `MAZE`: the whole level, one byte per cell. `None` when the level
    /// does not expose it.
    fn maze(&self, _player: PlayerId) -> Option<std::result::Result<Vec<u8>, Refusal>> {
        None
    }

    /// `GETX`
    fn x(&self, player: PlayerId) -> std::result::Result<i32, Refusal>;

    /// `GETY`
    fn y(&self, player: PlayerId) -> std::result::Result<i32, Refusal>;

    /// `GETW`
    fn width(&self, player: PlayerId) -> std::result::Result<i32, Refusal>;

    /// `GETH`
    fn height(&self, player: PlayerId) -> std::result::Result<i32, Refusal>;

    /// Draws the level onto the remote screen.
    fn redraw(&self, screen: &mut Screen);
}

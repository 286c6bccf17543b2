use super::{Level, PlayerId, Refusal, Step, color, messages};

use crate::display::{SCREEN_HEIGHT, SCREEN_WIDTH, Screen};

use std::collections::BTreeMap;
use std::time::Duration;

/// Why a textual grid was rejected.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseGridError {
    #[error("the grid has no rows")]
    Empty,

    #[error("row {0} has a different length than the first row")]
    Ragged(usize),

    #[error("unknown cell {0:?}")]
    UnknownCell(char),

    #[error("the grid has no start cell")]
    NoStart,
}

/// A level where every object sits on a rectangular grid.
///
/// Players move with `w`/`a`/`s`/`d`. Walls block, a treasure wins, a trap
/// loses. Any number of players may share a cell.
#[derive(Clone, Debug)]
pub struct GridLevel {
    width: usize,
    height: usize,
    cells: Vec<u8>,
    start: (usize, usize),
    max_connections: usize,
    max_time: Option<Duration>,
    players: BTreeMap<PlayerId, (usize, usize)>,
    next_player: usize,
}

impl GridLevel {
    /// Builds a level from rows of text.
    ///
    /// `#` is a wall, `.` or a space is empty, `$` a treasure, `!` a trap and
    /// `@` the start position.
    pub fn parse(rows: &[&str]) -> Result<Self, ParseGridError> {
        let width = rows.first().map(|r| r.chars().count()).ok_or(ParseGridError::Empty)?;
        if width == 0 {
            return Err(ParseGridError::Empty);
        }

        let mut cells = Vec::with_capacity(width * rows.len());
        let mut start = None;

        for (y, row) in rows.iter().enumerate() {
            if row.chars().count() != width {
                return Err(ParseGridError::Ragged(y));
            }

            for (x, c) in row.chars().enumerate() {
                let cell = match c {
                    '#' => color::WALL,
                    '.' | ' ' => color::NONE,
                    '$' => color::TREASURE,
                    '!' => color::TRAP,
                    '@' => {
                        start = Some((x, y));
                        color::NONE
                    }
                    other => return Err(ParseGridError::UnknownCell(other)),
                };
                cells.push(cell);
            }
        }

        let start = start.ok_or(ParseGridError::NoStart)?;
        Ok(Self::from_cells(width, rows.len(), cells, start))
    }

    /// Generates a perfect maze of the given size with the treasure in the
    /// corner opposite to the start.
    ///
    /// Even dimensions are rounded down to the next odd number; the result
    /// is at least 3x3.
    pub fn generated(width: usize, height: usize, seed: u64) -> Self {
        let width = (width.max(3) - 1) | 1;
        let height = (height.max(3) - 1) | 1;

        let mut cells = vec![color::WALL; width * height];
        let mut rng = XorShift(seed | 1);
        let mut stack = vec![(1usize, 1usize)];
        cells[width + 1] = color::NONE;

        while let Some(&(x, y)) = stack.last() {
            let mut options = Vec::with_capacity(4);
            if x >= 3 && cells[y * width + x - 2] == color::WALL {
                options.push((x - 2, y));
            }
            if x + 2 < width && cells[y * width + x + 2] == color::WALL {
                options.push((x + 2, y));
            }
            if y >= 3 && cells[(y - 2) * width + x] == color::WALL {
                options.push((x, y - 2));
            }
            if y + 2 < height && cells[(y + 2) * width + x] == color::WALL {
                options.push((x, y + 2));
            }

            if options.is_empty() {
                stack.pop();
                continue;
            }

            let (nx, ny) = options[rng.next() as usize % options.len()];
            cells[((y + ny) / 2) * width + (x + nx) / 2] = color::NONE;
            cells[ny * width + nx] = color::NONE;
            stack.push((nx, ny));
        }

        cells[(height - 2) * width + width - 2] = color::TREASURE;
        Self::from_cells(width, height, cells, (1, 1))
    }

    fn from_cells(width: usize, height: usize, cells: Vec<u8>, start: (usize, usize)) -> Self {
        Self {
            width,
            height,
            cells,
            start,
            max_connections: 1,
            max_time: None,
            players: BTreeMap::new(),
            next_player: 0,
        }
    }

    /// Allows more concurrent connections.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Limits the time available to solve the level.
    pub fn with_max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }

    /// Number of players currently in the level.
    pub fn players(&self) -> usize {
        self.players.len()
    }

    fn position(&self, player: PlayerId) -> Result<(usize, usize), Refusal> {
        self.players
            .get(&player)
            .copied()
            .ok_or_else(|| Refusal::from(messages::OUT_OF_MAZE))
    }

    fn target(&self, (x, y): (usize, usize), direction: u8) -> Result<(usize, usize), Refusal> {
        let (dx, dy): (isize, isize) = match direction {
            b'w' => (0, -1),
            b's' => (0, 1),
            b'a' => (-1, 0),
            b'd' => (1, 0),
            _ => return Err(messages::UNKNOWN_MOVE.into()),
        };

        let nx = x.checked_add_signed(dx).filter(|&nx| nx < self.width);
        let ny = y.checked_add_signed(dy).filter(|&ny| ny < self.height);

        match (nx, ny) {
            (Some(nx), Some(ny)) => Ok((nx, ny)),
            _ => Err(messages::OUT_OF_MAZE.into()),
        }
    }

    /// Top-left visible cell, keeping the first player in view.
    fn origin(&self) -> (usize, usize) {
        let Some(&(x, y)) = self.players.values().next() else {
            return (0, 0);
        };

        let max_x = self.width.saturating_sub(SCREEN_WIDTH);
        let max_y = self.height.saturating_sub(SCREEN_HEIGHT);

        (
            x.saturating_sub(SCREEN_WIDTH / 2).min(max_x),
            y.saturating_sub(SCREEN_HEIGHT / 2).min(max_y),
        )
    }
}

impl Level for GridLevel {
    fn max_connections(&self) -> usize {
        self.max_connections
    }

    fn max_time(&self) -> Option<Duration> {
        self.max_time
    }

    fn join(&mut self) -> PlayerId {
        let id = PlayerId(self.next_player);
        self.next_player += 1;
        self.players.insert(id, self.start);
        id
    }

    fn leave(&mut self, player: PlayerId) {
        self.players.remove(&player);
    }

    fn step(&mut self, player: PlayerId, direction: u8) -> Step {
        let target = match self.position(player).and_then(|p| self.target(p, direction)) {
            Ok(target) => target,
            Err(refusal) => return Step::Blocked(refusal),
        };

        match self.cells[target.1 * self.width + target.0] {
            color::WALL => Step::Blocked(messages::WALL_HIT.into()),
            color::TREASURE => Step::Won(messages::WIN.to_string()),
            color::TRAP => Step::Lost(messages::TRAPPED.to_string()),
            _ => {
                self.players.insert(player, target);
                Step::Moved
            }
        }
    }

    fn cell(&self, _player: PlayerId, x: u32, y: u32) -> Result<i32, Refusal> {
        let (x, y) = (x as usize, y as usize);
        if x >= self.width || y >= self.height {
            return Err(messages::OUT_OF_MAZE.into());
        }

        if self.players.values().any(|&p| p == (x, y)) {
            return Ok(i32::from(color::PLAYER));
        }
        Ok(i32::from(self.cells[y * self.width + x]))
    }

    fn maze(&self, _player: PlayerId) -> Option<Result<Vec<u8>, Refusal>> {
        let mut maze = self.cells.clone();
        for &(x, y) in self.players.values() {
            maze[y * self.width + x] = color::PLAYER;
        }
        Some(Ok(maze))
    }

    fn x(&self, player: PlayerId) -> Result<i32, Refusal> {
        self.position(player).map(|(x, _)| x as i32)
    }

    fn y(&self, player: PlayerId) -> Result<i32, Refusal> {
        self.position(player).map(|(_, y)| y as i32)
    }

    fn width(&self, _player: PlayerId) -> Result<i32, Refusal> {
        Ok(self.width as i32)
    }

    fn height(&self, _player: PlayerId) -> Result<i32, Refusal> {
        Ok(self.height as i32)
    }

    fn redraw(&self, screen: &mut Screen) {
        let (ox, oy) = self.origin();
        screen.clear();

        for y in oy..self.height.min(oy + SCREEN_HEIGHT + 1) {
            for x in ox..self.width.min(ox + SCREEN_WIDTH + 1) {
                let color = self.cells[y * self.width + x];
                screen.set_cell((x - ox) as i32, (y - oy) as i32, color);
            }
        }

        for &(x, y) in self.players.values() {
            screen.set_cell(x as i32 - ox as i32, y as i32 - oy as i32, color::PLAYER);
        }
    }
}

/// Small deterministic generator for maze layouts.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walls_block_and_treasure_wins() {
        let mut level = GridLevel::parse(&["#####", "#@.$#", "#####"]).expect("Failed to parse grid");
        let player = level.join();

        assert_eq!(level.step(player, b'w'), Step::Blocked(messages::WALL_HIT.into()));
        assert_eq!(level.step(player, b'x'), Step::Blocked(messages::UNKNOWN_MOVE.into()));
        assert_eq!(level.step(player, b'd'), Step::Moved);
        assert_eq!(level.x(player), Ok(2));
        assert_eq!(level.step(player, b'd'), Step::Won(messages::WIN.to_string()));
    }

    #[test]
    fn test_generated_maze_is_solid_at_the_border() {
        let level = GridLevel::generated(33, 33, 7);
        let probe = PlayerId(0);

        assert_eq!(level.width(probe), Ok(33));
        assert_eq!(level.height(probe), Ok(33));
        for i in 0..33 {
            assert_eq!(level.cell(probe, i, 0), Ok(i32::from(color::WALL)));
            assert_eq!(level.cell(probe, 0, i), Ok(i32::from(color::WALL)));
        }
        assert_eq!(level.cell(probe, 31, 31), Ok(i32::from(color::TREASURE)));
    }
}

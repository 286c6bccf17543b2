//! Remote display sink.
//!
//! The [`Screen`] keeps what spectators should see and only produces a
//! frame when something changed since the last commit. Frames are a 4-byte
//! header followed by the run-length encoded cell grid:
//!
//! | byte | content                                          |
//! |------|--------------------------------------------------|
//! | 0    | reserved, always 0                               |
//! | 1    | bits 6-7: seconds bits 8-9, bits 0-1: buttons    |
//! | 2    | seconds bits 0-7 (`0x3ff` when there is no limit)|
//! | 3    | reserved, always 0                               |
//!
//! Each run is a color byte; with bit 7 set, the next byte is the run
//! length minus 3.

/// Visible columns.
pub const SCREEN_WIDTH: usize = 33;

/// Visible rows.
pub const SCREEN_HEIGHT: usize = 33;

/// Encoded grid stride; one spare column and row for partial scrolling.
const GRID_WIDTH: usize = SCREEN_WIDTH + 1;
const GRID_HEIGHT: usize = SCREEN_HEIGHT + 1;

const NO_SECONDS: u32 = 0x3ff;
const RUN_FLAG: u8 = 0x80;
const RUN_MIN: usize = 3;
const RUN_MAX: usize = 258;

/// Control buttons shown on the remote display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Button {
    /// Lit while the session waits for a spectator to resume it.
    Wait = 1,
    /// Lit while the worker can be ended remotely.
    Kill = 2,
}

/// Dirty-tracking screen state.
#[derive(Debug)]
pub struct Screen {
    seconds: Option<u32>,
    buttons: u8,
    cells: Vec<u8>,
    dirty: bool,
}

impl Screen {
    pub fn new() -> Self {
        Self {
            seconds: None,
            buttons: 0,
            cells: vec![0; GRID_WIDTH * GRID_HEIGHT],
            dirty: true,
        }
    }

    /// Sets the remaining seconds shown, `None` for no limit.
    pub fn set_seconds(&mut self, seconds: Option<u32>) {
        let seconds = seconds.map(|s| s.min(NO_SECONDS - 1));
        if self.seconds != seconds {
            self.seconds = seconds;
            self.dirty = true;
        }
    }

    /// Lights or clears a button.
    pub fn set_button(&mut self, button: Button, on: bool) {
        let bit = 1u8 << (button as u8 - 1);
        let buttons = if on {
            self.buttons | bit
        } else {
            self.buttons & !bit
        };

        if buttons != self.buttons {
            self.buttons = buttons;
            self.dirty = true;
        }
    }

    /// Returns `true` if the button is lit.
    pub fn button(&self, button: Button) -> bool {
        self.buttons & (1 << (button as u8 - 1)) != 0
    }

    /// Clears every cell.
    pub fn clear(&mut self) {
        self.cells.fill(0);
        self.dirty = true;
    }

    /// Paints one cell. Off-screen coordinates are ignored.
    pub fn set_cell(&mut self, x: i32, y: i32, color: u8) {
        if x < 0 || y < 0 || x as usize >= GRID_WIDTH || y as usize >= GRID_HEIGHT {
            return;
        }

        let cell = &mut self.cells[y as usize * GRID_WIDTH + x as usize];
        if *cell != color {
            *cell = color;
            self.dirty = true;
        }
    }

    /// Returns `true` if a commit would produce a frame.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Encodes a frame if anything changed since the last commit.
    pub fn commit(&mut self) -> Option<Vec<u8>> {
        self.dirty.then(|| self.force_commit())
    }

    /// Encodes a frame unconditionally.
    pub fn force_commit(&mut self) -> Vec<u8> {
        let seconds = self.seconds.unwrap_or(NO_SECONDS);

        let mut frame = vec![
            0,
            ((seconds & 0x300) >> 2) as u8 | self.buttons,
            (seconds & 0xff) as u8,
            0,
        ];

        let mut cells = self.cells.iter().copied().peekable();
        while let Some(color) = cells.next() {
            let mut count = 1;
            while cells.next_if_eq(&color).is_some() {
                count += 1;
            }
            encode_run(&mut frame, color, count);
        }

        self.dirty = false;
        frame
    }
}

impl Default for Screen {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_run(frame: &mut Vec<u8>, color: u8, mut count: usize) {
    while count > 0 {
        if count < RUN_MIN {
            frame.push(color);
            count -= 1;
            continue;
        }

        let run = count.min(RUN_MAX);
        frame.push(color | RUN_FLAG);
        frame.push((run - RUN_MIN) as u8);
        count -= run;
    }
}

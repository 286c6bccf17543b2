//! Connection phases: `USER` on the master, then `LEVL` and the game
//! commands on the worker.

use super::connection::{Exchange, Phase};
use super::fault::Fault;
use super::line::Line;
use super::session::Seat;

use crate::ipc::{self, Directory, HandoffKind};
use crate::level::{PlayerId, Refusal, Step};

use std::cell::RefCell;
use std::rc::Rc;
use tracing::info;

/// Expects `USER <login>` and hands the connection to the user's worker.
pub struct Authenticate {
    directory: Rc<RefCell<dyn Directory>>,
}

impl Authenticate {
    pub fn new(directory: Rc<RefCell<dyn Directory>>) -> Self {
        Self { directory }
    }
}

impl Phase for Authenticate {
    fn process(&mut self, cx: &mut Exchange<'_>, line: Line) -> Result<Option<Box<dyn Phase>>, Fault> {
        if &line.command != b"USER" {
            return Err(Fault::UserExpected);
        }

        let login = line.value_str().unwrap_or_default();
        if !self.directory.borrow().user_exists(login) {
            info!(login, "user not found");
            return Err(Fault::UnknownUser);
        }

        ipc::send_socket(
            cx.reactor,
            &mut *self.directory.borrow_mut(),
            login,
            cx.socket,
            HandoffKind::Game(cx.ending),
        );
        Ok(None)
    }
}

/// Expects `LEVL <code>` and binds the connection to the level.
pub(crate) struct Bind {
    seat: Option<Seat>,
}

impl Bind {
    pub(crate) fn new(seat: Seat) -> Self {
        Self { seat: Some(seat) }
    }
}

fn valid_code(code: &[u8]) -> bool {
    !code.is_empty() && code.iter().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

impl Phase for Bind {
    fn process(&mut self, cx: &mut Exchange<'_>, line: Line) -> Result<Option<Box<dyn Phase>>, Fault> {
        if &line.command != b"LEVL" {
            return Err(Fault::LevelExpected);
        }
        if !valid_code(&line.value) {
            return Err(Fault::LevelBadChars);
        }
        let code = line.value_str().unwrap_or_default();

        let Some(mut seat) = self.seat.take() else {
            return Err(Fault::Unserviceable);
        };
        let session = seat.session().clone();

        let player = match session.bind(cx.reactor, code) {
            Ok(player) => player,
            Err(fault) => {
                self.seat = Some(seat);
                return Err(fault);
            }
        };
        seat.set_player(player);
        info!(fd = cx.socket.fd(), level = code, "connection bound");

        cx.done();
        if session.is_waiting() {
            cx.socket.pause(cx.reactor);
        }

        Ok(Some(Box::new(Execute { seat })))
    }
}

/// Game commands of a bound connection.
struct Execute {
    seat: Seat,
}

impl Execute {
    fn no_value(line: &Line) -> Result<(), Fault> {
        if line.has_value {
            return Err(Fault::ExtraParam);
        }
        Ok(())
    }

    /// Parses `WHAT` coordinates: two integers in `0..=i32::MAX`.
    fn coordinates(line: &Line) -> Result<(u32, u32), Fault> {
        let parse = |s: &str| s.parse::<u32>().ok().filter(|&v| v <= i32::MAX as u32);

        let mut words = line.value_str().unwrap_or_default().split_ascii_whitespace();
        match (words.next().and_then(parse), words.next().and_then(parse), words.next()) {
            (Some(x), Some(y), None) => Ok((x, y)),
            _ => Err(Fault::TwoIntsExpected),
        }
    }

    fn reply(cx: &mut Exchange<'_>, answer: Option<Result<i32, Refusal>>) {
        match answer {
            Some(Ok(value)) => cx.data(&[value]),
            Some(Err(refusal)) => cx.nope(&refusal.0),
            None => cx.nope("No level is running."),
        }
    }

    fn step(&self, cx: &mut Exchange<'_>, player: PlayerId, line: &Line) -> Result<(), Fault> {
        let &[direction] = line.value.as_slice() else {
            return Err(Fault::CharExpected);
        };
        let session = self.seat.session();

        match session.step(player, direction) {
            Some(Step::Moved) => cx.done(),
            Some(Step::Blocked(refusal)) => cx.nope(&refusal.0),
            Some(Step::Won(message)) => {
                let message = session.report_win(message);
                cx.over(&message);
            }
            Some(Step::Lost(message)) => cx.over(&message),
            None => return Err(Fault::Unserviceable),
        }
        Ok(())
    }
}

impl Phase for Execute {
    fn process(&mut self, cx: &mut Exchange<'_>, line: Line) -> Result<Option<Box<dyn Phase>>, Fault> {
        let session = self.seat.session();
        let Some(player) = self.seat.player() else {
            return Err(Fault::Unserviceable);
        };

        if session.is_expired() {
            return Err(Fault::Timeout);
        }

        match &line.command {
            b"MOVE" => self.step(cx, player, &line)?,
            b"WHAT" => {
                let (x, y) = Self::coordinates(&line)?;
                Self::reply(cx, session.query(|level| level.cell(player, x, y)));
            }
            b"MAZE" => {
                Self::no_value(&line)?;
                match session.query(|level| level.maze(player)).flatten() {
                    Some(Ok(maze)) => {
                        let values: Vec<i32> = maze.iter().map(|&b| i32::from(b)).collect();
                        cx.data(&values);
                    }
                    Some(Err(refusal)) => cx.nope(&refusal.0),
                    None => return Err(Fault::MazeUnavailable),
                }
            }
            b"GETX" => {
                Self::no_value(&line)?;
                Self::reply(cx, session.query(|level| level.x(player)));
            }
            b"GETY" => {
                Self::no_value(&line)?;
                Self::reply(cx, session.query(|level| level.y(player)));
            }
            b"GETW" => {
                Self::no_value(&line)?;
                Self::reply(cx, session.query(|level| level.width(player)));
            }
            b"GETH" => {
                Self::no_value(&line)?;
                Self::reply(cx, session.query(|level| level.height(player)));
            }
            b"WAIT" => {
                Self::no_value(&line)?;
                // Queued now, delivered once the session resumes.
                cx.done();
                session.pause(cx.reactor);
            }
            _ => return Err(Fault::UnknownCommand),
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(command: &[u8; 4], value: &str) -> Line {
        Line {
            command: *command,
            value: value.as_bytes().to_vec(),
            has_value: !value.is_empty(),
        }
    }

    #[test]
    fn test_level_codes() {
        assert!(valid_code(b"maze"));
        assert!(valid_code(b"l33t"));
        assert!(!valid_code(b""));
        assert!(!valid_code(b"Maze"));
        assert!(!valid_code(b"a-b"));
    }

    #[test]
    fn test_what_coordinates() {
        assert_eq!(Execute::coordinates(&line(b"WHAT", "3 4")), Ok((3, 4)));
        assert_eq!(Execute::coordinates(&line(b"WHAT", "3\t 4")), Ok((3, 4)));
        assert_eq!(Execute::coordinates(&line(b"WHAT", "3")), Err(Fault::TwoIntsExpected));
        assert_eq!(Execute::coordinates(&line(b"WHAT", "-1 4")), Err(Fault::TwoIntsExpected));
        assert_eq!(Execute::coordinates(&line(b"WHAT", "1 2 3")), Err(Fault::TwoIntsExpected));
        assert_eq!(
            Execute::coordinates(&line(b"WHAT", "2147483648 0")),
            Err(Fault::TwoIntsExpected)
        );
    }
}

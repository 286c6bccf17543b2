use super::fault::Fault;
use super::line::{Line, LineEnding, LineParser};

use crate::net::{Socket, SocketHandler};
use crate::reactor::Reactor;

use tracing::{debug, info};

const READ_CHUNK: usize = 1024;

/// One stage of a game connection's life.
///
/// A phase handles every complete line until it hands over to the next
/// phase. An error ends the connection with `OVER` and the fault's text.
pub trait Phase {
    fn process(&mut self, cx: &mut Exchange<'_>, line: Line) -> Result<Option<Box<dyn Phase>>, Fault>;
}

/// Reply channel of the line being processed.
pub struct Exchange<'a> {
    pub reactor: &'a mut Reactor,
    pub socket: &'a Socket,
    /// Replies use the request's terminator.
    pub ending: LineEnding,
}

impl Exchange<'_> {
    /// Queues a status line. A connection that cannot take it is closed.
    pub fn send(&mut self, status: &str, value: Option<&str>) {
        let mut msg = Vec::with_capacity(status.len() + value.map_or(0, |v| v.len() + 1) + 2);
        msg.extend_from_slice(status.as_bytes());
        if let Some(value) = value {
            msg.push(b' ');
            msg.extend_from_slice(value.as_bytes());
        }
        msg.extend_from_slice(self.ending.as_bytes());

        if let Err(e) = self.socket.write(self.reactor, msg) {
            debug!(fd = self.socket.fd(), error = %e, "dropping game connection");
            self.socket.close(self.reactor);
        }
    }

    /// `DONE`
    pub fn done(&mut self) {
        self.send("DONE", None);
    }

    /// `DATA` with the values separated by spaces.
    pub fn data(&mut self, values: &[i32]) {
        let values = values
            .iter()
            .map(i32::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        self.send("DATA", Some(&values));
    }

    /// `NOPE`: the request was refused, the session goes on.
    pub fn nope(&mut self, message: &str) {
        self.send("NOPE", Some(message));
    }

    /// `OVER`: sends the final line and closes once it is out.
    pub fn over(&mut self, message: &str) {
        info!(fd = self.socket.fd(), "closing game connection");

        self.socket.stop_reading(self.reactor);
        self.send("OVER", Some(message));
        self.socket.flush_and_close(self.reactor);
    }
}

/// Handler of a game connection.
pub struct GameConnection {
    parser: LineParser,
    phase: Option<Box<dyn Phase>>,
}

impl GameConnection {
    pub fn new(parser: LineParser, phase: Box<dyn Phase>) -> Self {
        Self {
            parser,
            phase: Some(phase),
        }
    }

    fn exchange<'a>(&self, reactor: &'a mut Reactor, socket: &'a Socket) -> Exchange<'a> {
        Exchange {
            reactor,
            socket,
            ending: self.parser.ending().unwrap_or(LineEnding::Lf),
        }
    }

    fn fail(&self, reactor: &mut Reactor, socket: &Socket, fault: &Fault) {
        info!(fd = socket.fd(), %fault, "protocol error");
        self.exchange(reactor, socket).over(&fault.to_string());
    }
}

impl SocketHandler for GameConnection {
    fn readable(&mut self, reactor: &mut Reactor, socket: &Socket) {
        let mut buf = [0u8; READ_CHUNK];

        loop {
            let n = socket.read(&mut buf);
            if n == 0 {
                break;
            }
            if let Err(violation) = self.parser.feed(&buf[..n]) {
                self.fail(reactor, socket, &Fault::from(violation));
                return;
            }
        }

        let Some(line) = self.parser.take_line() else {
            return;
        };
        let Some(mut phase) = self.phase.take() else {
            return;
        };

        let result = phase.process(&mut self.exchange(reactor, socket), line);
        match result {
            Ok(Some(next)) => self.phase = Some(next),
            Ok(None) => self.phase = Some(phase),
            Err(fault) => {
                self.fail(reactor, socket, &fault);
                self.phase = Some(phase);
            }
        }
    }
}

//! HTTP upgrade handshake.
//!
//! The request is tokenized byte by byte. What ends the current token is
//! decided by a [`Boundary`], and line ends are resolved with one byte of
//! lookahead so that folded header lines (a line starting with a space or
//! a tab continues the previous one) are joined into a single value.

use crate::ipc::{self, Directory, HandoffKind};
use crate::net::{Socket, SocketHandler};
use crate::reactor::Reactor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{info, warn};

/// Longest token accepted, terminator included.
pub const TOKEN_MAX: usize = 1024;

/// Longest header field name kept; longer names are truncated.
pub const FIELD_MAX: usize = 32;

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const RESPONSE_HEAD: &str =
    "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: ";

/// Computes the `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(key.as_bytes());
    sha.update(GUID.as_bytes());
    STANDARD.encode(sha.finalize())
}

/// Why a handshake was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("malformed request")]
    Malformed,

    #[error("token too long")]
    TokenTooLong,

    #[error("unsupported header value")]
    Unsupported,

    #[error("repeated Sec-WebSocket-Key")]
    DuplicateKey,

    #[error("missing upgrade requirements")]
    Incomplete,

    #[error("method not implemented")]
    Method,

    #[error("HTTP version not supported")]
    Version,

    #[error("no such user")]
    NotFound,

    #[error("internal error")]
    Internal,
}

impl HandshakeError {
    /// The complete HTTP response sent for this error.
    pub fn response(self) -> &'static str {
        match self {
            HandshakeError::Malformed
            | HandshakeError::TokenTooLong
            | HandshakeError::Unsupported
            | HandshakeError::DuplicateKey
            | HandshakeError::Incomplete => "HTTP/1.1 400 Bad Request\r\n\r\n",
            HandshakeError::Method => "HTTP/1.1 501 Not Implemented\r\n\r\n",
            HandshakeError::Version => "HTTP/1.1 505 HTTP Version Not Supported\r\n\r\n",
            HandshakeError::NotFound => "HTTP/1.1 404 Not Found\r\n\r\n",
            HandshakeError::Internal => "HTTP/1.1 500 Internal Server Error\r\n\r\n",
        }
    }
}

/// What ends the current token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Boundary {
    /// A single space.
    Space,
    /// A run of spaces or tabs.
    Whitespace,
    /// A colon, with the blanks after it skipped.
    Colon,
    /// LF or CRLF; a folded next line continues the token.
    LineEnd,
    /// LF or CRLF; folding is an error.
    LineEndNoFold,
}

/// What the next byte is expected to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lookahead {
    None,
    /// Skip spaces and tabs.
    Blanks,
    /// LF after CR.
    Lf,
    /// LF after CR; the next line may not be folded.
    LfNoFold,
    /// LF after CR on an empty line: end of headers.
    LfEnd,
    /// First byte of a line, folding allowed.
    LineStart,
    /// First byte of a line, folding not allowed.
    LineStartNoFold,
}

/// Tokenizer verdict for one byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    /// Append to the token.
    Push(u8),
    /// Consume without appending.
    Skip,
    /// The token ends; the byte is consumed.
    End,
    /// The token ends; the byte starts the next token.
    EndKeep,
    /// The token ends and so do the headers.
    EndOfHeaders,
    Abort,
}

/// Which token the parser is waiting for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Method,
    Path,
    Version,
    Field,
    Value,
}

const UPGRADE: u8 = 1 << 0;
const CONNECTION: u8 = 1 << 1;
const VERSION: u8 = 1 << 2;
const REQUIRED: u8 = UPGRADE | CONNECTION | VERSION;

/// Handshake facts collected from the headers.
#[derive(Debug, Default)]
struct Collected {
    seen: u8,
    key: Option<String>,
}

/// A header the handshake cares about.
trait HeaderRule {
    /// Lowercase field name.
    fn name(&self) -> &'static str;

    /// Validates a value and records it.
    fn apply(&self, value: &str, collected: &mut Collected) -> Result<(), HandshakeError>;
}

struct UpgradeHeader;
struct ConnectionHeader;
struct VersionHeader;
struct KeyHeader;

impl HeaderRule for UpgradeHeader {
    fn name(&self) -> &'static str {
        "upgrade"
    }

    fn apply(&self, value: &str, collected: &mut Collected) -> Result<(), HandshakeError> {
        if !value.eq_ignore_ascii_case("websocket") {
            return Err(HandshakeError::Unsupported);
        }
        collected.seen |= UPGRADE;
        Ok(())
    }
}

impl HeaderRule for ConnectionHeader {
    fn name(&self) -> &'static str {
        "connection"
    }

    fn apply(&self, value: &str, collected: &mut Collected) -> Result<(), HandshakeError> {
        if !value
            .split(',')
            .any(|option| option.trim_matches([' ', '\t']).eq_ignore_ascii_case("upgrade"))
        {
            return Err(HandshakeError::Unsupported);
        }
        collected.seen |= CONNECTION;
        Ok(())
    }
}

impl HeaderRule for VersionHeader {
    fn name(&self) -> &'static str {
        "sec-websocket-version"
    }

    fn apply(&self, value: &str, collected: &mut Collected) -> Result<(), HandshakeError> {
        if value != "13" {
            return Err(HandshakeError::Unsupported);
        }
        collected.seen |= VERSION;
        Ok(())
    }
}

impl HeaderRule for KeyHeader {
    fn name(&self) -> &'static str {
        "sec-websocket-key"
    }

    fn apply(&self, value: &str, collected: &mut Collected) -> Result<(), HandshakeError> {
        if collected.key.is_some() {
            return Err(HandshakeError::DuplicateKey);
        }
        collected.key = Some(value.to_string());
        Ok(())
    }
}

const HEADERS: [&dyn HeaderRule; 4] = [&UpgradeHeader, &ConnectionHeader, &VersionHeader, &KeyHeader];

/// A successfully parsed upgrade request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    /// Request target, e.g. `/alice`.
    pub path: String,
    /// `Sec-WebSocket-Key`.
    pub key: String,
}

impl Request {
    /// The login named by the path.
    pub fn login(&self) -> Option<&str> {
        self.path.strip_prefix('/').filter(|login| !login.is_empty())
    }

    /// The `101 Switching Protocols` response.
    pub fn response(&self) -> String {
        format!("{RESPONSE_HEAD}{}\r\n\r\n", accept_key(&self.key))
    }
}

/// Incremental parser of an upgrade request.
#[derive(Debug)]
pub struct Handshake {
    boundary: Boundary,
    lookahead: Lookahead,
    stage: Stage,
    token: Vec<u8>,
    field: String,
    path: Option<String>,
    collected: Collected,
    finished: bool,
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            boundary: Boundary::Space,
            lookahead: Lookahead::None,
            stage: Stage::Method,
            token: Vec::with_capacity(64),
            field: String::new(),
            path: None,
            collected: Collected::default(),
            finished: false,
        }
    }

    /// Feeds received bytes.
    ///
    /// Returns the request once the empty line ending the headers was
    /// seen. Bytes after it are ignored.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Option<Request>, HandshakeError> {
        if self.finished {
            return Ok(None);
        }

        let mut i = 0;
        while i < bytes.len() {
            match self.classify(bytes[i]) {
                Step::Abort => return Err(HandshakeError::Malformed),
                Step::Skip => i += 1,
                Step::Push(b) => {
                    if self.token.len() >= TOKEN_MAX - 1 {
                        return Err(HandshakeError::TokenTooLong);
                    }
                    self.token.push(b);
                    i += 1;
                }
                Step::End => {
                    self.end_token()?;
                    i += 1;
                }
                Step::EndKeep => self.end_token()?,
                Step::EndOfHeaders => {
                    self.end_token()?;
                    self.finished = true;
                    return self.finish().map(Some);
                }
            }
        }

        Ok(None)
    }

    fn classify(&mut self, c: u8) -> Step {
        let blank = c == b' ' || c == b'\t';

        match self.lookahead {
            Lookahead::None => {}
            Lookahead::Blanks => {
                if blank {
                    return Step::Skip;
                }
                self.lookahead = Lookahead::None;
            }
            Lookahead::Lf | Lookahead::LfNoFold => {
                self.lookahead = if self.lookahead == Lookahead::Lf {
                    Lookahead::LineStart
                } else {
                    Lookahead::LineStartNoFold
                };
                return if c == b'\n' { Step::Skip } else { Step::Abort };
            }
            Lookahead::LfEnd => {
                self.lookahead = Lookahead::None;
                return if c == b'\n' {
                    Step::EndOfHeaders
                } else {
                    Step::Abort
                };
            }
            Lookahead::LineStart | Lookahead::LineStartNoFold => {
                if blank {
                    if self.lookahead == Lookahead::LineStartNoFold {
                        return Step::Abort;
                    }
                    self.lookahead = Lookahead::Blanks;
                    return Step::Push(b' ');
                }

                self.lookahead = Lookahead::None;
                return match c {
                    b'\n' => Step::EndOfHeaders,
                    b'\r' => {
                        self.lookahead = Lookahead::LfEnd;
                        Step::Skip
                    }
                    _ => Step::EndKeep,
                };
            }
        }

        match self.boundary {
            Boundary::Space if c == b' ' => return Step::End,
            Boundary::Whitespace if blank => {
                self.lookahead = Lookahead::Blanks;
                return Step::End;
            }
            Boundary::Colon if c == b':' => {
                self.lookahead = Lookahead::Blanks;
                return Step::End;
            }
            Boundary::LineEnd | Boundary::LineEndNoFold if c == b'\r' || c == b'\n' => {
                let fold = self.boundary == Boundary::LineEnd;
                self.lookahead = match (c, fold) {
                    (b'\r', true) => Lookahead::Lf,
                    (b'\r', false) => Lookahead::LfNoFold,
                    (_, true) => Lookahead::LineStart,
                    (_, false) => Lookahead::LineStartNoFold,
                };
                return Step::Skip;
            }
            _ => {}
        }

        if c == b'\r' || c == b'\n' {
            return Step::Abort;
        }
        Step::Push(c)
    }

    fn end_token(&mut self) -> Result<(), HandshakeError> {
        let token = String::from_utf8(std::mem::take(&mut self.token))
            .map_err(|_| HandshakeError::Malformed)?;

        match self.stage {
            Stage::Method => {
                if token != "GET" {
                    return Err(HandshakeError::Method);
                }
                self.stage = Stage::Path;
                self.boundary = Boundary::Whitespace;
            }
            Stage::Path => {
                self.path = Some(token);
                self.stage = Stage::Version;
                self.boundary = Boundary::LineEndNoFold;
            }
            Stage::Version => {
                if token != "HTTP/1.1" {
                    return Err(HandshakeError::Version);
                }
                self.stage = Stage::Field;
                self.boundary = Boundary::Colon;
            }
            Stage::Field => {
                let name = token.trim_end();
                let mut end = name.len().min(FIELD_MAX - 1);
                while !name.is_char_boundary(end) {
                    end -= 1;
                }
                self.field = name[..end].to_ascii_lowercase();
                self.stage = Stage::Value;
                self.boundary = Boundary::LineEnd;
            }
            Stage::Value => {
                if let Some(rule) = HEADERS.iter().find(|rule| rule.name() == self.field) {
                    rule.apply(token.trim_end(), &mut self.collected)?;
                }
                self.stage = Stage::Field;
                self.boundary = Boundary::Colon;
            }
        }

        Ok(())
    }

    fn finish(&mut self) -> Result<Request, HandshakeError> {
        if self.collected.seen != REQUIRED {
            return Err(HandshakeError::Incomplete);
        }

        match (self.path.take(), self.collected.key.take()) {
            (Some(path), Some(key)) => Ok(Request { path, key }),
            _ => Err(HandshakeError::Incomplete),
        }
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler of a connection on the WebSocket port, up to the handoff.
pub struct HandshakeConnection {
    handshake: Handshake,
    directory: Rc<RefCell<dyn Directory>>,
}

impl HandshakeConnection {
    pub fn new(directory: Rc<RefCell<dyn Directory>>) -> Self {
        Self {
            handshake: Handshake::new(),
            directory,
        }
    }

    fn refuse(&self, reactor: &mut Reactor, socket: &Socket, error: HandshakeError) {
        warn!(fd = socket.fd(), %error, "websocket handshake refused");

        socket.stop_reading(reactor);
        if socket.write(reactor, error.response()).is_err() {
            socket.close(reactor);
            return;
        }
        socket.flush_and_close(reactor);
    }

    fn upgrade(&self, reactor: &mut Reactor, socket: &Socket, request: Request) -> Result<(), HandshakeError> {
        let login = match request.login() {
            Some(login) if self.directory.borrow().user_exists(login) => login.to_string(),
            _ => return Err(HandshakeError::NotFound),
        };

        socket.stop_reading(reactor);
        socket
            .write(reactor, request.response())
            .map_err(|_| HandshakeError::Internal)?;

        info!(fd = socket.fd(), login = %login, "websocket handshake complete");

        let directory = Rc::clone(&self.directory);
        socket.set_drained_callback(move |reactor, socket| {
            ipc::send_socket(
                reactor,
                &mut *directory.borrow_mut(),
                &login,
                socket,
                HandoffKind::Websocket,
            );
        });

        Ok(())
    }
}

impl SocketHandler for HandshakeConnection {
    fn readable(&mut self, reactor: &mut Reactor, socket: &Socket) {
        let mut buf = [0u8; TOKEN_MAX];

        loop {
            let n = socket.read(&mut buf);
            if n == 0 {
                return;
            }

            let result = self
                .handshake
                .feed(&buf[..n])
                .and_then(|request| match request {
                    Some(request) => self.upgrade(reactor, socket, request).map(|()| true),
                    None => Ok(false),
                });

            match result {
                Ok(true) => return,
                Ok(false) => {}
                Err(error) => {
                    self.refuse(reactor, socket, error);
                    return;
                }
            }
        }
    }
}

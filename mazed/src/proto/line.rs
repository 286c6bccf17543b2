//! Byte-at-a-time tokenizer for command lines.
//!
//! A line is exactly four uppercase letters, optionally followed by spaces
//! or tabs and a value, terminated by LF or CRLF. Whichever terminator a
//! connection uses first is the one it must keep using.

/// Length of a command word.
pub const COMMAND_LEN: usize = 4;

/// Longest accepted value.
pub const VALUE_MAX: usize = 30;

/// Line terminator of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineEnding {
    /// `\n`
    Lf,
    /// `\r\n`
    Crlf,
}

impl LineEnding {
    /// Terminator bytes.
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            LineEnding::Lf => b"\n",
            LineEnding::Crlf => b"\r\n",
        }
    }
}

/// A grammar violation. The message is sent to the client verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("A message must end with LF or CRLF, used consistently.")]
    InvalidEol,

    #[error(
        "Only one message may be sent at a time. Wait for the server's reply before sending the next one, or check for characters after the end of line."
    )]
    Impatient,

    #[error("A message must start with a command of exactly 4 characters. These must be uppercase letters.")]
    NotALetter,

    #[error(
        "A message must start with a command of exactly 4 characters, followed by a space or the end of line."
    )]
    ExtraChars,

    #[error("The message contains a \\0 character, which is not allowed.")]
    NulInValue,

    #[error("The message is too long. Is an end of line missing?")]
    ValueTooLong,
}

/// One complete command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Line {
    /// The command word.
    pub command: [u8; COMMAND_LEN],

    /// Value bytes, leading separators stripped.
    pub value: Vec<u8>,

    /// A separator followed the command, even if the value is empty.
    pub has_value: bool,
}

impl Line {
    /// Returns the value as text, if it is valid UTF-8.
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scan {
    Command,
    Separator,
    Value,
    ExpectLf,
    Complete,
}

/// Incremental line parser for one connection.
#[derive(Debug)]
pub struct LineParser {
    scan: Scan,
    ending: Option<LineEnding>,
    command: [u8; COMMAND_LEN],
    command_len: usize,
    value: Vec<u8>,
    has_value: bool,
}

impl LineParser {
    /// A parser that learns the terminator from the first line.
    pub fn new() -> Self {
        Self {
            scan: Scan::Command,
            ending: None,
            command: [0; COMMAND_LEN],
            command_len: 0,
            value: Vec::with_capacity(VALUE_MAX),
            has_value: false,
        }
    }

    /// A parser bound to a terminator detected earlier on the connection.
    pub fn with_ending(ending: LineEnding) -> Self {
        Self {
            ending: Some(ending),
            ..Self::new()
        }
    }

    /// The connection's terminator, once known.
    pub fn ending(&self) -> Option<LineEnding> {
        self.ending
    }

    /// Returns `true` when a complete line is waiting in [`take_line`](Self::take_line).
    pub fn is_complete(&self) -> bool {
        self.scan == Scan::Complete
    }

    /// Feeds received bytes.
    ///
    /// Any byte after a complete line that was not taken yet is a
    /// violation: clients must wait for the reply.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), Violation> {
        bytes.iter().try_for_each(|&b| self.push(b))
    }

    fn push(&mut self, b: u8) -> Result<(), Violation> {
        match self.scan {
            Scan::Command => {
                if !b.is_ascii_uppercase() {
                    return Err(Violation::NotALetter);
                }
                self.command[self.command_len] = b;
                self.command_len += 1;
                if self.command_len == COMMAND_LEN {
                    self.scan = Scan::Separator;
                }
                Ok(())
            }
            Scan::Separator => match b {
                b' ' | b'\t' => {
                    self.has_value = true;
                    Ok(())
                }
                b'\r' => {
                    self.scan = Scan::ExpectLf;
                    Ok(())
                }
                b'\n' => self.finish(LineEnding::Lf),
                _ if !self.has_value => Err(Violation::ExtraChars),
                _ => {
                    self.scan = Scan::Value;
                    self.push_value(b)
                }
            },
            Scan::Value => match b {
                b'\r' => {
                    self.scan = Scan::ExpectLf;
                    Ok(())
                }
                b'\n' => self.finish(LineEnding::Lf),
                _ => self.push_value(b),
            },
            Scan::ExpectLf => match b {
                b'\n' => self.finish(LineEnding::Crlf),
                _ => Err(Violation::InvalidEol),
            },
            Scan::Complete => Err(Violation::Impatient),
        }
    }

    fn push_value(&mut self, b: u8) -> Result<(), Violation> {
        if b == 0 {
            return Err(Violation::NulInValue);
        }
        if self.value.len() == VALUE_MAX {
            return Err(Violation::ValueTooLong);
        }
        self.value.push(b);
        Ok(())
    }

    fn finish(&mut self, ending: LineEnding) -> Result<(), Violation> {
        match self.ending {
            Some(expected) if expected != ending => return Err(Violation::InvalidEol),
            _ => self.ending = Some(ending),
        }
        self.scan = Scan::Complete;
        Ok(())
    }

    /// Takes the complete line and gets ready for the next one.
    pub fn take_line(&mut self) -> Option<Line> {
        if self.scan != Scan::Complete {
            return None;
        }

        let line = Line {
            command: self.command,
            value: std::mem::take(&mut self.value),
            has_value: self.has_value,
        };

        self.scan = Scan::Command;
        self.command_len = 0;
        self.has_value = false;

        Some(line)
    }
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

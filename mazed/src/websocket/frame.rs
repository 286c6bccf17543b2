//! RFC 6455 framing.
//!
//! [`FrameParser`] consumes client bytes one at a time: header, extended
//! length, mask, then the payload unmasked as it arrives. Data frames are
//! reassembled across continuation frames and delivered once `FIN` is set.

/// Largest payload accepted in one frame, and in one reassembled message.
pub const MAX_PAYLOAD: usize = 4096;

/// Largest payload of a control frame.
pub const MAX_CONTROL_PAYLOAD: u8 = 125;

const FIN: u8 = 0x80;
const RESERVED: u8 = 0x70;
const OPCODE: u8 = 0x0f;
const MASKED: u8 = 0x80;
const LENGTH: u8 = 0x7f;

/// Frame opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xa,
}

impl Opcode {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xa => Some(Opcode::Pong),
            _ => None,
        }
    }

    fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// Why the connection is being closed; sent in the close frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CloseCode {
    /// The peer sent a close frame.
    #[error("normal closure")]
    Normal,

    /// Reserved bits, unknown opcode, missing mask, a stray continuation, or
    /// a fragmented or oversized control frame.
    #[error("protocol error")]
    ProtocolError,

    /// Text frames are not accepted.
    #[error("unsupported data")]
    Unsupported,

    /// Frame or message over [`MAX_PAYLOAD`].
    #[error("message too big")]
    TooBig,
}

impl CloseCode {
    /// The numeric status code.
    pub fn code(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::ProtocolError => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::TooBig => 1009,
        }
    }
}

/// Something the application has to act on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameEvent {
    /// A complete, non-empty binary message.
    Message(Vec<u8>),

    /// A ping; answer with a pong carrying the same payload.
    Ping(Vec<u8>),
}

/// Incremental frame parser for one connection.
#[derive(Debug, Default)]
pub struct FrameParser {
    /// Header bytes consumed for the frame in progress.
    offset: usize,
    fin: bool,
    opcode: Option<Opcode>,
    /// Extended length bytes: 0, 2 or 8.
    length_bytes: usize,
    length: u64,
    mask: [u8; 4],
    /// `Some` while receiving the payload.
    payload: Option<Vec<u8>>,
    /// Message being reassembled across frames.
    reassembly: Option<Vec<u8>>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes received bytes, reporting every completed event.
    ///
    /// An error means the connection must be closed with that code; the
    /// parser is not usable afterwards.
    pub fn feed<F>(&mut self, bytes: &[u8], mut on_event: F) -> Result<(), CloseCode>
    where
        F: FnMut(FrameEvent),
    {
        for &b in bytes {
            match self.payload.as_mut() {
                Some(payload) => {
                    payload.push(b ^ self.mask[payload.len() % 4]);
                    if payload.len() as u64 == self.length {
                        self.consume(&mut on_event)?;
                    }
                }
                None => self.header_byte(b, &mut on_event)?,
            }
        }
        Ok(())
    }

    fn header_byte<F>(&mut self, b: u8, on_event: &mut F) -> Result<(), CloseCode>
    where
        F: FnMut(FrameEvent),
    {
        match self.offset {
            0 => {
                if b & RESERVED != 0 {
                    return Err(CloseCode::ProtocolError);
                }
                self.fin = b & FIN != 0;
                self.opcode = Some(Opcode::from_bits(b & OPCODE).ok_or(CloseCode::ProtocolError)?);
            }
            1 => {
                if b & MASKED == 0 {
                    return Err(CloseCode::ProtocolError);
                }
                // Control frames are never fragmented and carry at most 125 bytes.
                if self.opcode.is_some_and(Opcode::is_control)
                    && (!self.fin || b & LENGTH > MAX_CONTROL_PAYLOAD)
                {
                    return Err(CloseCode::ProtocolError);
                }
                let (length_bytes, length) = match b & LENGTH {
                    126 => (2, 0),
                    127 => (8, 0),
                    n => (0, u64::from(n)),
                };
                self.length_bytes = length_bytes;
                self.length = length;
            }
            n if n < 2 + self.length_bytes => {
                self.length = (self.length << 8) | u64::from(b);
            }
            n => {
                self.mask[n - 2 - self.length_bytes] = b;
            }
        }
        self.offset += 1;

        if self.offset < 6 + self.length_bytes {
            return Ok(());
        }

        if self.length > MAX_PAYLOAD as u64 {
            return Err(CloseCode::TooBig);
        }
        if self.length == 0 {
            self.payload = Some(Vec::new());
            return self.consume(on_event);
        }
        self.payload = Some(Vec::with_capacity(self.length as usize));
        Ok(())
    }

    /// Handles a fully received frame.
    fn consume<F>(&mut self, on_event: &mut F) -> Result<(), CloseCode>
    where
        F: FnMut(FrameEvent),
    {
        let payload = self.payload.take().unwrap_or_default();
        let opcode = self.opcode.take();
        self.offset = 0;

        match opcode {
            Some(Opcode::Continuation) => {
                let Some(message) = self.reassembly.as_mut() else {
                    return Err(CloseCode::ProtocolError);
                };
                if message.len() + payload.len() > MAX_PAYLOAD {
                    self.reassembly = None;
                    return Err(CloseCode::TooBig);
                }
                message.extend_from_slice(&payload);
                self.finish_message(on_event);
            }
            Some(Opcode::Binary) => {
                // A new message discards one still in progress.
                self.reassembly = Some(payload);
                self.finish_message(on_event);
            }
            Some(Opcode::Text) => return Err(CloseCode::Unsupported),
            Some(Opcode::Close) => return Err(CloseCode::Normal),
            Some(Opcode::Ping) => on_event(FrameEvent::Ping(payload)),
            Some(Opcode::Pong) | None => {}
        }

        Ok(())
    }

    fn finish_message<F>(&mut self, on_event: &mut F)
    where
        F: FnMut(FrameEvent),
    {
        if !self.fin {
            return;
        }
        match self.reassembly.take() {
            Some(message) if !message.is_empty() => on_event(FrameEvent::Message(message)),
            _ => {}
        }
    }
}

/// Encodes an unmasked, final frame.
pub fn encode_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 10);
    frame.push(FIN | opcode as u8);

    match payload.len() {
        n if n <= 125 => frame.push(n as u8),
        n if n <= usize::from(u16::MAX) => {
            frame.push(126);
            frame.extend_from_slice(&(n as u16).to_be_bytes());
        }
        n => {
            frame.push(127);
            frame.extend_from_slice(&(n as u64).to_be_bytes());
        }
    }

    frame.extend_from_slice(payload);
    frame
}

/// Encodes a close frame carrying `code`.
pub fn encode_close(code: CloseCode) -> Vec<u8> {
    encode_frame(Opcode::Close, &code.code().to_be_bytes())
}

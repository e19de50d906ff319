// src/command.rs
// Commands from the move source and the serial framing they arrive in.
//
// Frames are ASCII: `m` followed by two squares, e.g. `me2e4`. The pseudo-move
// `mx9x9` asks the head to park off the board. Anything outside a frame
// (whitespace, promotion letters, line endings) is skipped. After a frame has
// been carried out the controller answers with a single byte, `d` or `f`.

use core::fmt;

use embedded_hal_nb::serial::{Read, Write};
use heapless::Vec;
use log::{debug, warn};

use crate::board::Square;
use crate::session::CommandSourceKind;

/// Frame start byte.
pub const FRAME_START: u8 = b'm';
/// Reply after a command completed.
pub const ACK_DONE: u8 = b'd';
/// Reply after a command failed.
pub const ACK_FAULT: u8 = b'f';

const PARK_MARKER: &[u8; 2] = b"x9";
const FRAME_BODY_LEN: usize = 4;

/// A decoded request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Carry the piece on `from` to `to`, capturing whatever is there.
    Move { from: Square, to: Square },
    /// Release the magnet and retreat to the park corner.
    Park,
}

/// A command together with the side it was issued for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SourcedCommand {
    pub command: Command,
    pub source: CommandSourceKind,
}

/// Malformed frame contents.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    BadSquare([u8; 2]),
    SameSquare(Square),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::BadSquare([a, b]) => write!(f, "bad square '{}{}'", *a as char, *b as char),
            DecodeError::SameSquare(sq) => write!(f, "move from {} to itself", sq),
        }
    }
}

/// Parses the four body bytes of a frame.
pub fn parse_frame_body(body: &[u8; FRAME_BODY_LEN]) -> Result<Command, DecodeError> {
    let (from, to) = (&body[..2], &body[2..]);
    if from == PARK_MARKER && to == PARK_MARKER {
        return Ok(Command::Park);
    }
    let from_sq = Square::from_algebraic(from).ok_or(DecodeError::BadSquare([from[0], from[1]]))?;
    let to_sq = Square::from_algebraic(to).ok_or(DecodeError::BadSquare([to[0], to[1]]))?;
    if from_sq == to_sq {
        return Err(DecodeError::SameSquare(from_sq));
    }
    Ok(Command::Move { from: from_sq, to: to_sq })
}

/// Byte-at-a-time frame decoder.
#[derive(Default)]
pub struct CommandDecoder {
    body: Vec<u8, FRAME_BODY_LEN>,
    in_frame: bool,
}

impl CommandDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one byte; returns a result once a frame is complete.
    pub fn feed(&mut self, byte: u8) -> Option<Result<Command, DecodeError>> {
        if byte == FRAME_START {
            // A new start byte always resynchronises.
            self.body.clear();
            self.in_frame = true;
            return None;
        }
        if !self.in_frame {
            return None;
        }
        // `body` is never full here: it is drained as soon as it reaches the frame length.
        let _ = self.body.push(byte.to_ascii_lowercase());
        if !self.body.is_full() {
            return None;
        }
        self.in_frame = false;
        let mut body = [0u8; FRAME_BODY_LEN];
        body.copy_from_slice(&self.body);
        self.body.clear();
        Some(parse_frame_body(&body))
    }
}

/// Where moves come from. Polled without blocking; `nb::Error::WouldBlock`
/// means nothing has arrived yet.
pub trait CommandSource {
    type Error: fmt::Debug;

    /// `expected` is the side whose turn it is; sources that cannot tell the
    /// two apart tag the command with it.
    fn poll_command(&mut self, expected: CommandSourceKind) -> nb::Result<SourcedCommand, Self::Error>;

    /// Reports how the last command ended.
    fn acknowledge(&mut self, _ok: bool) {}
}

/// Command source reading frames from a byte-oriented serial port.
pub struct SerialCommandSource<S> {
    serial: S,
    decoder: CommandDecoder,
}

impl<S> SerialCommandSource<S>
where
    S: Read<u8> + Write<u8>,
{
    pub fn new(serial: S) -> Self {
        Self { serial, decoder: CommandDecoder::new() }
    }

    pub fn serial(&self) -> &S {
        &self.serial
    }

    fn reply(&mut self, byte: u8) {
        if nb::block!(self.serial.write(byte)).is_err() || nb::block!(self.serial.flush()).is_err() {
            warn!("Failed to send '{}'", byte as char);
        }
    }
}

impl<S> CommandSource for SerialCommandSource<S>
where
    S: Read<u8> + Write<u8>,
{
    type Error = S::Error;

    fn poll_command(&mut self, expected: CommandSourceKind) -> nb::Result<SourcedCommand, Self::Error> {
        loop {
            let byte = self.serial.read()?;
            match self.decoder.feed(byte) {
                Some(Ok(command)) => {
                    debug!("Received {:?} for {:?}", command, expected);
                    return Ok(SourcedCommand { command, source: expected });
                }
                Some(Err(e)) => {
                    warn!("Dropping frame: {}", e);
                    self.reply(ACK_FAULT);
                }
                None => {}
            }
        }
    }

    fn acknowledge(&mut self, ok: bool) {
        self.reply(if ok { ACK_DONE } else { ACK_FAULT });
    }
}

// magchess_host/src/console.rs
// Command source for the simulator: a reader thread forwards raw input over a
// channel and the session decodes it on its own thread, so the board is still
// touched from one place only.

use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use magchess_mcu::command::{CommandDecoder, CommandSource, SourcedCommand, ACK_DONE, ACK_FAULT};
use magchess_mcu::CommandSourceKind;

/// The input side hung up and every byte it sent has been consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputClosed;

impl std::fmt::Display for InputClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "command input closed")
    }
}

impl std::error::Error for InputClosed {}

/// Spawns a thread that forwards `reader` line by line.
pub fn spawn_reader<R: BufRead + Send + 'static>(reader: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in reader.lines() {
            match line {
                Ok(mut text) => {
                    text.push('\n');
                    if tx.send(text.into_bytes()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Input read failed: {}", e);
                    break;
                }
            }
        }
        debug!("Input reader finished");
    });
    rx
}

/// Decodes move frames arriving on a channel and writes the one-byte replies
/// to `replies`.
pub struct ChannelSource<W> {
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
    decoder: CommandDecoder,
    replies: W,
    wait: Duration,
    closed: bool,
}

impl<W: Write> ChannelSource<W> {
    pub fn new(rx: Receiver<Vec<u8>>, replies: W) -> Self {
        Self {
            rx,
            pending: VecDeque::new(),
            decoder: CommandDecoder::new(),
            replies,
            wait: Duration::from_millis(10),
            closed: false,
        }
    }

    pub fn replies(&self) -> &W {
        &self.replies
    }

    fn reply(&mut self, byte: u8) {
        if self.replies.write_all(&[byte]).and_then(|_| self.replies.flush()).is_err() {
            warn!("Failed to write reply");
        }
    }
}

impl<W: Write> CommandSource for ChannelSource<W> {
    type Error = InputClosed;

    fn poll_command(&mut self, expected: CommandSourceKind) -> nb::Result<SourcedCommand, InputClosed> {
        loop {
            while let Some(byte) = self.pending.pop_front() {
                match self.decoder.feed(byte) {
                    Some(Ok(command)) => return Ok(SourcedCommand { command, source: expected }),
                    Some(Err(e)) => {
                        warn!("Dropping frame: {}", e);
                        self.reply(ACK_FAULT);
                    }
                    None => {}
                }
            }
            if self.closed {
                return Err(nb::Error::Other(InputClosed));
            }
            // Waiting briefly here keeps an interactive session from spinning.
            match self.rx.recv_timeout(self.wait) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => return Err(nb::Error::WouldBlock),
                Err(RecvTimeoutError::Disconnected) => self.closed = true,
            }
        }
    }

    fn acknowledge(&mut self, ok: bool) {
        self.reply(if ok { ACK_DONE } else { ACK_FAULT });
    }
}

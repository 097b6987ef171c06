//! Serial line codec.
//!
//! Wire format: one command per line, terminated by `\n` or `\r`
//! (so `\r\n` works too).  Empty lines are ignored.
//!
//! The decoder accumulates incoming bytes into a fixed buffer and yields
//! complete lines.  This handles partial reads gracefully: a single UART
//! read may return part of a line, or several lines concatenated.  A line
//! longer than [`MAX_LINE_LEN`] is discarded up to its terminator.

use heapless::Vec;
use log::warn;

use crate::config::MAX_LINE_LEN;

/// Decoder state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    /// Collecting bytes of the current line.
    Collecting,
    /// The current line overflowed; skip until the next terminator.
    Discarding,
}

/// Streaming line decoder.
pub struct LineDecoder {
    state: DecoderState,
    buf: Vec<u8, MAX_LINE_LEN>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Collecting,
            buf: Vec::new(),
        }
    }

    /// Feed bytes into the decoder, calling `on_line` for every complete,
    /// non-empty line in arrival order.
    pub fn feed(&mut self, data: &[u8], mut on_line: impl FnMut(&str)) {
        for &byte in data {
            if byte == b'\n' || byte == b'\r' {
                if self.state == DecoderState::Collecting && !self.buf.is_empty() {
                    match core::str::from_utf8(&self.buf) {
                        Ok(line) => on_line(line),
                        Err(_) => warn!("LINE: dropping non-UTF-8 line ({} bytes)", self.buf.len()),
                    }
                }
                self.reset();
                continue;
            }

            if self.state == DecoderState::Discarding {
                continue;
            }

            if self.buf.push(byte).is_err() {
                warn!("LINE: line exceeds {} bytes, discarding", MAX_LINE_LEN);
                self.buf.clear();
                self.state = DecoderState::Discarding;
            }
        }
    }

    /// Bytes of the current, unterminated line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Reset decoder state (e.g. after a UART error).
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = DecoderState::Collecting;
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

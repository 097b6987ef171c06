//! Response rendering.
//!
//! A command answers with zero or more informational lines followed by
//! exactly one terminal line: `OK`, or `ERROR: <reason>`.  Byte values are
//! shown as space-separated uppercase hex pairs (`01 02 FF`).

use core::fmt::Write as _;

use crate::error::{GatewayError, Result};

use super::ports::LineSink;
use super::registry::ConnectionHandle;

/// The complete answer to one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    lines: Vec<String>,
    outcome: Result<()>,
}

impl Reply {
    pub fn new() -> Self {
        Self {
            lines: Vec::new(),
            outcome: Ok(()),
        }
    }

    /// Queue an informational line.
    pub fn info(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Record the terminal outcome.
    pub fn finish(mut self, outcome: Result<()>) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn outcome(&self) -> &Result<()> {
        &self.outcome
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&GatewayError> {
        self.outcome.as_ref().err()
    }

    /// `OK` or `ERROR: <reason>`.
    pub fn terminal_line(&self) -> String {
        match &self.outcome {
            Ok(()) => "OK".into(),
            Err(e) => format!("ERROR: {e}"),
        }
    }

    /// Informational lines, then the terminal line.
    pub fn write_to(&self, sink: &mut impl LineSink) {
        for line in &self.lines {
            sink.write_line(line);
        }
        sink.write_line(&self.terminal_line());
    }

    /// Every line the reply puts on the wire.
    pub fn to_lines(&self) -> Vec<String> {
        let mut out = self.lines.clone();
        out.push(self.terminal_line());
        out
    }
}

impl Default for Reply {
    fn default() -> Self {
        Self::new()
    }
}

/// `[0x01, 0x02]` → `"01 02"`.
pub fn hex_bytes(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02X}");
    }
    out
}

/// Notification line: owning handle as two hex digits, then the payload.
pub fn notification_line(handle: ConnectionHandle, payload: &[u8]) -> String {
    if payload.is_empty() {
        return format!("{:02X}", handle.value());
    }
    format!("{:02X} {}", handle.value(), hex_bytes(payload))
}

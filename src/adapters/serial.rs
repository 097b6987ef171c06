//! Serial line adapter.
//!
//! Implements [`LineSink`](crate::app::ports::LineSink) on top of the
//! AT command UART.  Lines are terminated with `\r\n`, which is what terminal
//! emulators and host-side scripts expect.  Compiled for
//! `target_os = "espidf"` only; host code uses `Vec<String>` as its sink.

use esp_idf_hal::uart::UartDriver;
use log::warn;

use crate::app::ports::LineSink;

const LINE_END: &[u8] = b"\r\n";

/// Writes response lines to a UART, blocking until queued.
pub struct UartLineSink<'a, 'd> {
    uart: &'a UartDriver<'d>,
}

impl<'a, 'd> UartLineSink<'a, 'd> {
    pub fn new(uart: &'a UartDriver<'d>) -> Self {
        Self { uart }
    }

    fn write_all(&self, mut data: &[u8]) {
        while !data.is_empty() {
            match self.uart.write(data) {
                Ok(0) => return,
                Ok(n) => data = &data[n..],
                Err(e) => {
                    warn!("UART: write failed: {e}");
                    return;
                }
            }
        }
    }
}

impl LineSink for UartLineSink<'_, '_> {
    fn write_line(&mut self, line: &str) {
        self.write_all(line.as_bytes());
        self.write_all(LINE_END);
    }
}

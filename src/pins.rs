//! Pin assignments for the ESP32-S3 AT command port.
//!
//! The AT link is UART1 on its own pins.  UART0 (GPIO43/44) stays the
//! IDF console, carrying the boot ROM output and the `log` stream, so no
//! log line can land between a response and its `OK`.

// ---------------------------------------------------------------------------
// UART1: AT command port
// ---------------------------------------------------------------------------

pub const UART_TX_GPIO: i32 = 17;
pub const UART_RX_GPIO: i32 = 18;

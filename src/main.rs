//! BLE AT gateway firmware — main entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  Adapters (outer ring)                   │
//! │                                                          │
//! │  UartDriver ─▶ LineDecoder     BluedroidRadio            │
//! │  UartLineSink (LineSink)       (RadioPort)               │
//! │                                                          │
//! │  ───────────── Port Trait Boundary ─────────────         │
//! │                                                          │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │           Gateway (pure logic)                     │  │
//! │  │  Registry · Resolver · Router · Dispatcher         │  │
//! │  └────────────────────────────────────────────────────┘  │
//! │                                                          │
//! │  RADIO_EVENTS (Bluedroid task ─▶ serial task)            │
//! └──────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::Result;
use esp_idf_hal::delay::TickType;
use esp_idf_hal::gpio::AnyIOPin;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::uart::{UartDriver, config::Config};
use esp_idf_hal::units::Hertz;
use log::{info, warn};

use bleat::adapters::radio::BluedroidRadio;
use bleat::adapters::serial::UartLineSink;
use bleat::app::service::Gateway;
use bleat::channels::RADIO_EVENTS;
use bleat::codec::LineDecoder;
use bleat::config::{BAUD_RATE, GatewayConfig};
use bleat::pins;

/// How long one UART read may block before events are drained again.
const READ_TIMEOUT_MS: u64 = 20;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;
    info!("BLE AT gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = GatewayConfig::default();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("gateway config: {e}"))?;

    // ── 2. AT command UART (UART0 stays the log console) ──────
    let peripherals = Peripherals::take()?;
    let uart_config = Config::default().baudrate(Hertz(BAUD_RATE));
    // SAFETY: the AT port pins are not handed to any other driver.
    let (tx, rx) = unsafe {
        (
            AnyIOPin::new(pins::UART_TX_GPIO),
            AnyIOPin::new(pins::UART_RX_GPIO),
        )
    };
    let uart = UartDriver::new(
        peripherals.uart1,
        tx,
        rx,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &uart_config,
    )?;
    info!(
        "AT port on UART1 (TX={}, RX={}) at {} baud",
        pins::UART_TX_GPIO,
        pins::UART_RX_GPIO,
        BAUD_RATE
    );

    // ── 3. Gateway ────────────────────────────────────────────
    let mut gateway = Gateway::new(BluedroidRadio::new(), config, &RADIO_EVENTS);
    let mut sink = UartLineSink::new(&uart);
    let mut decoder = LineDecoder::new();
    let mut buf = [0u8; 64];

    info!("Ready for AT commands");

    // ── 4. Read → decode → dispatch, draining radio events ────
    loop {
        match uart.read(&mut buf, TickType::new_millis(READ_TIMEOUT_MS).ticks()) {
            Ok(0) => {}
            Ok(n) => decoder.feed(&buf[..n], |line| gateway.process_line(line, &mut sink)),
            Err(e) => {
                warn!("UART: read failed: {e}");
                decoder.reset();
            }
        }
        gateway.poll_events(&mut sink);
    }
}

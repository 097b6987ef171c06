//! Port traits — the hexagonal boundary between the gateway core and the
//! radio / serial world.
//!
//! ```text
//!   Serial line ──▶ Gateway (core) ──▶ RadioPort ──▶ BLE stack
//!        ▲                                  │
//!        └──── LineSink ◀── EventChannel ◀──┘ (callback context)
//! ```
//!
//! The radio hands out opaque arena references ([`SessionId`],
//! [`ServiceRef`], [`CharRef`]).  The core stores them but never
//! dereferences them; a stale reference is simply rejected by the radio.

use core::fmt;

use crate::channels::EventSender;
use crate::config::MAX_ATTR_LEN;
use crate::gatt::{BleUuid, PeerAddress};

// ───────────────────────────────────────────────────────────────
// Opaque radio references
// ───────────────────────────────────────────────────────────────

/// One established link, issued by [`RadioPort::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u32);

/// A discovered remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceRef(pub u32);

/// A discovered remote characteristic.  Unique across all sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CharRef(pub u32);

// ───────────────────────────────────────────────────────────────
// Value types
// ───────────────────────────────────────────────────────────────

/// One advertising report collected during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub address: PeerAddress,
    pub rssi: i16,
    pub name: Option<String>,
    pub service_uuid: Option<BleUuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteService {
    pub uuid: BleUuid,
    pub service: ServiceRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteCharacteristic {
    pub uuid: BleUuid,
    pub characteristic: CharRef,
}

/// What the radio needs to bring the stack up in peripheral mode.
#[derive(Debug, Clone)]
pub struct RadioSettings {
    pub device_name: String,
    pub service_uuid: BleUuid,
    pub characteristic_uuid: BleUuid,
    pub initial_value: Vec<u8>,
}

/// Asynchronous events raised from the radio's own execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// A subscribed characteristic changed value.
    Notification {
        characteristic: CharRef,
        payload: heapless::Vec<u8, MAX_ATTR_LEN>,
    },
    /// The peer (or the controller) dropped the link.
    LinkLost { session: SessionId },
}

// ───────────────────────────────────────────────────────────────
// Radio port (driven adapter: core → BLE stack)
// ───────────────────────────────────────────────────────────────

/// The BLE radio / GATT capability the gateway consumes.
///
/// Every call is synchronous from the caller's point of view; `scan` and
/// `connect` may block for seconds.  Implementations deliver asynchronous
/// events only through the [`EventSender`] handed to `connect`/`subscribe`.
pub trait RadioPort {
    /// Bring up the controller and host stack and register the built-in
    /// peripheral service.
    fn init(&mut self, settings: &RadioSettings) -> Result<(), RadioError>;

    /// Tear the stack down.  All sessions are released.
    fn deinit(&mut self) -> Result<(), RadioError>;

    fn start_advertising(&mut self) -> Result<(), RadioError>;

    fn stop_advertising(&mut self) -> Result<(), RadioError>;

    /// Active scan for `duration_secs`.  `name_filter` is a hint the
    /// radio may use to drop reports early.
    fn scan(
        &mut self,
        duration_secs: u32,
        name_filter: Option<&str>,
    ) -> Result<Vec<ScanResult>, RadioError>;

    /// Open a link.  Link loss is reported as [`RadioEvent::LinkLost`]
    /// through `events`.
    fn connect(&mut self, address: PeerAddress, events: EventSender)
    -> Result<SessionId, RadioError>;

    /// Close a link and release every reference issued under it.
    fn disconnect(&mut self, session: SessionId);

    fn services(&mut self, session: SessionId) -> Result<Vec<RemoteService>, RadioError>;

    fn characteristics(
        &mut self,
        service: ServiceRef,
    ) -> Result<Vec<RemoteCharacteristic>, RadioError>;

    fn read(&mut self, characteristic: CharRef) -> Result<Vec<u8>, RadioError>;

    fn write(&mut self, characteristic: CharRef, data: &[u8]) -> Result<(), RadioError>;

    /// Enable notifications; value changes arrive as
    /// [`RadioEvent::Notification`] through `events`.
    fn subscribe(&mut self, characteristic: CharRef, events: EventSender)
    -> Result<(), RadioError>;

    fn unsubscribe(&mut self, characteristic: CharRef) -> Result<(), RadioError>;
}

// ───────────────────────────────────────────────────────────────
// Line sink port (driven adapter: core → serial line)
// ───────────────────────────────────────────────────────────────

/// Destination for response and notification lines.  The sink adds the
/// line terminator.
pub trait LineSink {
    fn write_line(&mut self, line: &str);
}

impl LineSink for Vec<String> {
    fn write_line(&mut self, line: &str) {
        self.push(line.to_owned());
    }
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`RadioPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// The stack has not been initialised.
    NotInitialized,
    /// Link establishment failed or was refused.
    ConnectFailed,
    /// The session or reference belongs to a link that is gone.
    NotConnected,
    /// The stack did not answer in time.
    Timeout,
    /// A GATT operation completed with a non-zero status.
    Gatt(u16),
    /// The vendor stack rejected the call.
    Stack(&'static str),
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "stack not initialized"),
            Self::ConnectFailed => write!(f, "connection failed"),
            Self::NotConnected => write!(f, "not connected"),
            Self::Timeout => write!(f, "timeout"),
            Self::Gatt(status) => write!(f, "GATT status 0x{status:02X}"),
            Self::Stack(msg) => write!(f, "{msg}"),
        }
    }
}

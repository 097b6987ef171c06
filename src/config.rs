//! Gateway configuration parameters
//!
//! Tunables for the AT gateway and the built-in peripheral profile.
//! There is no persistence and no runtime override: the firmware boots
//! with [`GatewayConfig::default()`].

use serde::{Deserialize, Serialize};

use crate::gatt::BleUuid;

/// Serial line speed.  Fixed, never negotiated.
pub const BAUD_RATE: u32 = 115_200;

/// Longest accepted command line (bytes, excluding the terminator).
pub const MAX_LINE_LEN: usize = 256;

/// Pending radio events between two drains of the event channel.
pub const EVENT_QUEUE_DEPTH: usize = 32;

/// Largest attribute value carried by a notification (ATT maximum).
pub const MAX_ATTR_LEN: usize = 512;

/// Disconnected connections kept for `AT+BLELIST` and binding deferral.
/// Older ones are dropped; their handles still report "not connected".
pub const MAX_TOMBSTONES: usize = 8;

/// Firmware version reported by `AT+VERSION?`.
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

const MAX_DEVICE_NAME_LEN: usize = 29;

/// Core gateway configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    // --- Peripheral (server) mode ---
    /// GAP device name used when the stack is initialised
    pub device_name: String,
    /// Service exposed by `AT+BLESTART`
    pub server_service_uuid: String,
    /// Read/write characteristic inside the server service
    pub server_characteristic_uuid: String,
    /// Initial value of the server characteristic
    pub server_initial_value: String,

    // --- Central (client) mode ---
    /// Duration of one `AT+BLESCAN` (seconds)
    pub scan_duration_secs: u32,
    /// Simultaneous live peer connections
    pub max_connections: usize,
    /// Initialise the radio on demand for scan/connect
    pub auto_init_radio: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            device_name: "ESP32-AT".into(),
            server_service_uuid: "12345678-1234-1234-1234-1234567890ab".into(),
            server_characteristic_uuid: "abcdefab-cdef-abcd-efab-cdefabcdefab".into(),
            server_initial_value: "Hello World".into(),

            scan_duration_secs: 5,
            max_connections: 4,
            auto_init_radio: true,
        }
    }
}

/// Validation failure for [`GatewayConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigError(pub &'static str);

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "validation failed: {}", self.0)
    }
}

impl GatewayConfig {
    /// Range-check every field.  Invalid values are rejected, not clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_name.is_empty() || self.device_name.len() > MAX_DEVICE_NAME_LEN {
            return Err(ConfigError("device_name must be 1–29 bytes"));
        }
        if self.server_service_uuid.parse::<BleUuid>().is_err() {
            return Err(ConfigError("server_service_uuid is not a UUID"));
        }
        if self.server_characteristic_uuid.parse::<BleUuid>().is_err() {
            return Err(ConfigError("server_characteristic_uuid is not a UUID"));
        }
        if self.server_initial_value.len() > MAX_ATTR_LEN {
            return Err(ConfigError("server_initial_value exceeds attribute length"));
        }
        if !(1..=60).contains(&self.scan_duration_secs) {
            return Err(ConfigError("scan_duration_secs must be 1–60"));
        }
        if !(1..=9).contains(&self.max_connections) {
            return Err(ConfigError("max_connections must be 1–9"));
        }
        Ok(())
    }
}

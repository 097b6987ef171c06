//! Radio adapters — implementations of [`RadioPort`](crate::app::ports::RadioPort).
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: [`BluedroidRadio`], the ESP32's own
//!   controller through the Bluedroid GAP/GATTC/GATTS C API.
//! - **all targets**: [`SimRadio`], an in-memory stack with scripted peers
//!   used by host tests and host runs.

pub mod sim;

#[cfg(target_os = "espidf")]
mod esp_impl;

#[cfg(target_os = "espidf")]
pub use esp_impl::BluedroidRadio;
pub use sim::{SimPeripheral, SimRadio};

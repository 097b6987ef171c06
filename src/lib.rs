//! BLE AT gateway firmware library.
//!
//! Exposes the pure-logic gateway core and its adapters for integration
//! testing and host runs.  All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod channels;
pub mod codec;
pub mod config;
pub mod error;
pub mod gatt;
pub mod pins;

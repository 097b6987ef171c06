//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter  | Implements | Connects to                                  |
//! |----------|------------|----------------------------------------------|
//! | `radio`  | RadioPort  | Bluedroid GAP/GATTC/GATTS, or the simulation |
//! | `serial` | LineSink   | Console UART (espidf only)                   |
//! | `peer`   | —          | Demo peripheral frame format, drop counting  |

pub mod peer;
pub mod radio;
#[cfg(target_os = "espidf")]
pub mod serial;

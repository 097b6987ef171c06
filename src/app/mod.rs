//! Gateway core — connection state and command semantics, zero I/O.
//!
//! All interaction with the radio happens through the [`ports::RadioPort`]
//! trait and all output through [`ports::LineSink`], keeping this layer
//! fully testable without real hardware.
//!
//! | Module     | Role                                                     |
//! |------------|----------------------------------------------------------|
//! | `registry` | handle allocation, connection ownership, route table     |
//! | `binding`  | cached read/write GATT targets per handle (`Resolver`)   |
//! | `router`   | notification routes back to the owning handle (`Router`) |
//! | `commands` | AT grammar → typed [`commands::AtCommand`]               |
//! | `reply`    | response lines and hex rendering                         |
//! | `service`  | the dispatcher tying it all together (`Gateway`)         |

pub mod binding;
pub mod commands;
pub mod ports;
pub mod registry;
pub mod reply;
pub mod router;
pub mod service;

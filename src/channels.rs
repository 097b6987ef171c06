//! Radio event channel.
//!
//! Uses an `embassy-sync` bounded channel to bridge the radio's callback
//! context (Bluedroid task, or a simulation thread) with the single task
//! that owns the [`Gateway`](crate::app::service::Gateway).  The callback
//! side only ever `try_send`s; the gateway drains between commands.
//!
//! ```text
//! ┌──────────────┐  RadioEvent  ┌──────────────┐
//! │ BLE callback │─────────────▶│   Gateway    │
//! │  (any task)  │              │ (serial task)│
//! └──────────────┘              └──────────────┘
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Sender};
use log::warn;

use crate::app::ports::RadioEvent;
use crate::config::EVENT_QUEUE_DEPTH;

/// Bounded channel carrying [`RadioEvent`]s into the gateway.
pub type EventChannel = Channel<CriticalSectionRawMutex, RadioEvent, EVENT_QUEUE_DEPTH>;

/// Producer half handed to the radio on connect/subscribe.
pub type EventSender = Sender<'static, CriticalSectionRawMutex, RadioEvent, EVENT_QUEUE_DEPTH>;

/// Process-wide channel used by the firmware binary.
pub static RADIO_EVENTS: EventChannel = Channel::new();

/// Post an event without blocking.  A full channel drops the event.
pub fn post(events: &EventSender, event: RadioEvent) -> bool {
    if events.try_send(event).is_err() {
        warn!("EVT: radio event channel full, dropping event");
        return false;
    }
    true
}

/// Allocate a private channel for the lifetime of the process.
///
/// Host tests and simulations use this so each gateway gets its own queue.
pub fn leak_channel() -> &'static EventChannel {
    Box::leak(Box::new(Channel::new()))
}

//! Unified error types for the BLE AT gateway.
//!
//! Every command handler funnels into [`GatewayError`].  All variants are
//! recoverable: the dispatcher renders them as a single `ERROR: <reason>`
//! line and keeps running.  The `Display` text is the exact wire reason.

use core::fmt;

use crate::app::binding::Direction;
use crate::app::ports::RadioError;

// ---------------------------------------------------------------------------
// Top-level gateway error
// ---------------------------------------------------------------------------

/// Which half of a binding is missing when a cached access is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    /// No service reference has been resolved yet.
    Service,
    /// No characteristic reference has been resolved yet.
    Characteristic,
}

/// Every fallible gateway operation returns this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The line did not match any known command keyword.
    UnknownCommand,
    /// Wrong number or format of parameters.  Carries the usage hint.
    InvalidParameters(&'static str),
    /// No connection was ever allocated under this handle.
    UnknownHandle,
    /// The handle exists but its link is no longer live.
    NotConnected,
    /// The cached service/characteristic reference is not set.
    BindingUnresolved { direction: Direction, missing: Missing },
    /// The peer does not expose the requested service.
    ServiceNotFound(String),
    /// The resolved service does not contain the requested characteristic.
    CharacteristicNotFound(String),
    /// The radio could not establish the link.
    ConnectFailed(String),
    /// A radio operation was requested before `AT+BLESTART`.
    RadioNotInitialized,
    /// The radio reported a failure of its own (terminal for this command).
    Radio(RadioError),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCommand => write!(f, "Unknown Command"),
            Self::InvalidParameters(usage) => write!(f, "Invalid parameters. Use {usage}"),
            Self::UnknownHandle => write!(f, "Client ID not found."),
            Self::NotConnected => write!(f, "Client not connected."),
            Self::BindingUnresolved { direction, missing } => match (direction, missing) {
                (Direction::Read, Missing::Characteristic) => write!(
                    f,
                    "Characteristic pointer not set. Use AT+BLESETSERVICE and AT+BLESETCHAR first."
                ),
                (Direction::Write, Missing::Characteristic) => write!(
                    f,
                    "Write Characteristic pointer not set. Use AT+BLESETWRITESERVICE and AT+BLESETWRITECHAR first."
                ),
                (Direction::Read, Missing::Service) => {
                    write!(f, "Service pointer not set. Set service first.")
                }
                (Direction::Write, Missing::Service) => {
                    write!(f, "Write Service pointer not set. Set write service first.")
                }
            },
            Self::ServiceNotFound(uuid) => write!(f, "Service not found: {uuid}"),
            Self::CharacteristicNotFound(uuid) => write!(f, "Characteristic not found: {uuid}"),
            Self::ConnectFailed(reason) => write!(f, "Failed to connect to device: {reason}"),
            Self::RadioNotInitialized => write!(f, "BLE not initialized"),
            Self::Radio(e) => write!(f, "Radio error: {e}"),
        }
    }
}

impl From<RadioError> for GatewayError {
    fn from(e: RadioError) -> Self {
        match e {
            RadioError::NotInitialized => Self::RadioNotInitialized,
            RadioError::NotConnected => Self::NotConnected,
            other => Self::Radio(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Gateway-wide `Result` alias.
pub type Result<T> = core::result::Result<T, GatewayError>;

//! AT command grammar.
//!
//! A line is `KEYWORD` or `KEYWORD=field[,field...]`.  Keywords are
//! case-sensitive; fields are whitespace-trimmed.  Commands addressed to a
//! connection may omit the handle when exactly one link is live, in which
//! case the gateway picks it (see [`Target::Implicit`]).
//!
//! Parsing is pure: it validates arity and field formats and produces an
//! [`AtCommand`], but never looks at gateway state.

use crate::error::{GatewayError, Result};
use crate::gatt::{BleUuid, PeerAddress};

use super::binding::Direction;
use super::registry::ConnectionHandle;

/// Usage hints carried by [`GatewayError::InvalidParameters`].
pub mod usage {
    pub const ADVERTISE: &str = "AT+BLEADVERTISE=<ON|OFF>";
    pub const SET_CLIENT_NAME: &str = "AT+BLESETCLIENTNAME=<name>";
    pub const CONNECT: &str = "AT+BLECONNECT=<address>";
    pub const DISCONNECT: &str = "AT+BLEDISCONNECT=<client_id>";
    pub const DISCOVER: &str = "AT+BLEDISCOVER=<client_id>";
    pub const SET_SERVICE: &str = "AT+BLESETSERVICE=<client_id>,<service_uuid>";
    pub const SET_CHAR: &str = "AT+BLESETCHAR=<client_id>,<characteristic_uuid>";
    pub const SET_WRITE_SERVICE: &str = "AT+BLESETWRITESERVICE=<client_id>,<service_uuid>";
    pub const SET_WRITE_CHAR: &str = "AT+BLESETWRITECHAR=<client_id>,<characteristic_uuid>";
    pub const READ: &str = "AT+BLEREAD=<client_id>[,<service_uuid>,<characteristic_uuid>]";
    pub const NOTIFY: &str = "AT+BLENOTIFY=<client_id>";
    pub const NOTIFY_OFF: &str = "AT+BLENOTIFYOFF=<client_id>";
    pub const WRITE: &str = "AT+BLEWRITE=<client_id>,<data>";
}

/// The connection a command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// No handle given: the only live connection.
    Implicit,
    Handle(ConnectionHandle),
}

/// A UUID as typed by the host, plus its parsed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UuidArg {
    pub uuid: BleUuid,
    pub text: String,
}

/// Which half of a binding a setter addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingPart {
    Service,
    Characteristic,
}

/// Every command the gateway understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtCommand {
    /// `AT`
    Attention,
    /// `AT+VERSION?`
    Version,
    /// `AT+BLESTART`
    Start,
    /// `AT+BLESTOP`
    Stop,
    /// `AT+BLEADVERTISE=ON|OFF`
    Advertise(bool),
    /// `AT+BLESETCLIENTNAME=<name>`; empty clears the filter.
    SetClientName(String),
    /// `AT+BLESCAN`
    Scan,
    /// `AT+BLECONNECT=<address>`
    Connect(PeerAddress),
    /// `AT+BLEDISCONNECT[=<h>]`
    Disconnect(Target),
    /// `AT+BLELIST`
    List,
    /// `AT+BLEDISCOVER[=<h>]`
    Discover(Target),
    /// `AT+BLESETSERVICE`, `AT+BLESETCHAR` and their write twins.
    SetBinding {
        target: Target,
        direction: Direction,
        part: BindingPart,
        uuid: UuidArg,
    },
    /// `AT+BLEREAD[=<h>]`
    Read(Target),
    /// `AT+BLEREAD=[<h>,]<svc>,<char>`
    ReadExplicit {
        target: Target,
        service: UuidArg,
        characteristic: UuidArg,
    },
    /// `AT+BLENOTIFY[=<h>]` / `AT+BLENOTIFYOFF[=<h>]`
    Notify { target: Target, enable: bool },
    /// `AT+BLEWRITE=<h>,<data>`; data is the literal text after the comma.
    Write {
        handle: ConnectionHandle,
        data: Vec<u8>,
    },
}

/// Parse one command line (terminator already stripped).
pub fn parse(line: &str) -> Result<AtCommand> {
    let line = line.trim();
    let (keyword, params) = match line.split_once('=') {
        Some((keyword, params)) => (keyword.trim_end(), Some(params)),
        None => (line, None),
    };

    match keyword {
        "AT" => no_params(params, "AT", AtCommand::Attention),
        "AT+VERSION?" => no_params(params, "AT+VERSION?", AtCommand::Version),
        "AT+BLESTART" => no_params(params, "AT+BLESTART", AtCommand::Start),
        "AT+BLESTOP" => no_params(params, "AT+BLESTOP", AtCommand::Stop),
        "AT+BLESCAN" => no_params(params, "AT+BLESCAN", AtCommand::Scan),
        "AT+BLELIST" => no_params(params, "AT+BLELIST", AtCommand::List),

        "AT+BLEADVERTISE" => match params.map(str::trim) {
            Some("ON") => Ok(AtCommand::Advertise(true)),
            Some("OFF") => Ok(AtCommand::Advertise(false)),
            _ => Err(invalid(usage::ADVERTISE)),
        },

        "AT+BLESETCLIENTNAME" => params
            .map(|name| AtCommand::SetClientName(name.trim().to_owned()))
            .ok_or(invalid(usage::SET_CLIENT_NAME)),

        "AT+BLECONNECT" => {
            let address = params.ok_or(invalid(usage::CONNECT))?;
            address
                .parse()
                .map(AtCommand::Connect)
                .map_err(|_| invalid(usage::CONNECT))
        }

        "AT+BLEDISCONNECT" => target_only(params, usage::DISCONNECT).map(AtCommand::Disconnect),
        "AT+BLEDISCOVER" => target_only(params, usage::DISCOVER).map(AtCommand::Discover),

        "AT+BLESETSERVICE" => set_binding(params, Direction::Read, BindingPart::Service, usage::SET_SERVICE),
        "AT+BLESETCHAR" => set_binding(params, Direction::Read, BindingPart::Characteristic, usage::SET_CHAR),
        "AT+BLESETWRITESERVICE" => set_binding(
            params,
            Direction::Write,
            BindingPart::Service,
            usage::SET_WRITE_SERVICE,
        ),
        "AT+BLESETWRITECHAR" => set_binding(
            params,
            Direction::Write,
            BindingPart::Characteristic,
            usage::SET_WRITE_CHAR,
        ),

        "AT+BLEREAD" => read(params),

        "AT+BLENOTIFY" => target_only(params, usage::NOTIFY)
            .map(|target| AtCommand::Notify { target, enable: true }),
        "AT+BLENOTIFYOFF" => target_only(params, usage::NOTIFY_OFF)
            .map(|target| AtCommand::Notify { target, enable: false }),

        "AT+BLEWRITE" => {
            let (handle, data) = params
                .and_then(|p| p.split_once(','))
                .ok_or(invalid(usage::WRITE))?;
            Ok(AtCommand::Write {
                handle: parse_handle(handle, usage::WRITE)?,
                data: data.trim().as_bytes().to_vec(),
            })
        }

        _ => Err(GatewayError::UnknownCommand),
    }
}

fn invalid(usage: &'static str) -> GatewayError {
    GatewayError::InvalidParameters(usage)
}

fn no_params(params: Option<&str>, usage: &'static str, command: AtCommand) -> Result<AtCommand> {
    match params {
        None => Ok(command),
        Some(_) => Err(invalid(usage)),
    }
}

fn fields(params: &str) -> Vec<&str> {
    params.split(',').map(str::trim).collect()
}

fn parse_handle(field: &str, usage: &'static str) -> Result<ConnectionHandle> {
    field.parse().map_err(|_| invalid(usage))
}

fn parse_uuid(field: &str, usage: &'static str) -> Result<UuidArg> {
    let uuid = field.parse().map_err(|_| invalid(usage))?;
    Ok(UuidArg {
        uuid,
        text: field.to_owned(),
    })
}

/// `KEYWORD` or `KEYWORD=<h>`.
fn target_only(params: Option<&str>, usage: &'static str) -> Result<Target> {
    let Some(params) = params else {
        return Ok(Target::Implicit);
    };
    match fields(params).as_slice() {
        [handle] => Ok(Target::Handle(parse_handle(handle, usage)?)),
        _ => Err(invalid(usage)),
    }
}

/// `KEYWORD=<uuid>` or `KEYWORD=<h>,<uuid>`.
fn set_binding(
    params: Option<&str>,
    direction: Direction,
    part: BindingPart,
    usage: &'static str,
) -> Result<AtCommand> {
    let params = params.ok_or(invalid(usage))?;
    let (target, uuid) = match fields(params).as_slice() {
        [uuid] => (Target::Implicit, *uuid),
        [handle, uuid] => (Target::Handle(parse_handle(handle, usage)?), *uuid),
        _ => return Err(invalid(usage)),
    };
    Ok(AtCommand::SetBinding {
        target,
        direction,
        part,
        uuid: parse_uuid(uuid, usage)?,
    })
}

/// `AT+BLEREAD`, `=<h>`, `=<svc>,<char>` or `=<h>,<svc>,<char>`.
fn read(params: Option<&str>) -> Result<AtCommand> {
    let Some(params) = params else {
        return Ok(AtCommand::Read(Target::Implicit));
    };
    let (target, service, characteristic) = match fields(params).as_slice() {
        [handle] => {
            return Ok(AtCommand::Read(Target::Handle(parse_handle(handle, usage::READ)?)));
        }
        [service, characteristic] => (Target::Implicit, *service, *characteristic),
        [handle, service, characteristic] => (
            Target::Handle(parse_handle(handle, usage::READ)?),
            *service,
            *characteristic,
        ),
        _ => return Err(invalid(usage::READ)),
    };
    Ok(AtCommand::ReadExplicit {
        target,
        service: parse_uuid(service, usage::READ)?,
        characteristic: parse_uuid(characteristic, usage::READ)?,
    })
}

//! Connection registry — handle allocation and link ownership.
//!
//! The registry is the single owner of every [`Connection`] and of the
//! notification [`RouteTable`].  Keeping both in one object lets a
//! disconnect flip liveness, clear bindings and purge routes in a single
//! `&mut self` call, so nothing can observe the half-invalidated state.
//!
//! Handles start at 1, are allocated only after the radio accepts the
//! link, and are never reused within a run.  The most recent
//! [`MAX_TOMBSTONES`] disconnected connections stay behind as non-live
//! entries; older ones are dropped.  Any handle below the allocation
//! counter that is gone from the table was issued once, so it resolves to
//! [`GatewayError::NotConnected`] rather than `UnknownHandle`.

use std::collections::BTreeMap;

use core::fmt;
use core::str::FromStr;

use log::{debug, info, warn};

use crate::channels::EventSender;
use crate::config::MAX_TOMBSTONES;
use crate::error::{GatewayError, Result};
use crate::gatt::{ParseError, PeerAddress};

use super::binding::{Binding, Direction};
use super::ports::{RadioPort, SessionId};
use super::router::RouteTable;

// ───────────────────────────────────────────────────────────────
// ConnectionHandle
// ───────────────────────────────────────────────────────────────

/// Opaque identity of one peer link as seen on the serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(u32);

impl ConnectionHandle {
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decimal, strictly positive.
impl FromStr for ConnectionHandle {
    type Err = ParseError;

    fn from_str(s: &str) -> core::result::Result<Self, ParseError> {
        match s.trim().parse::<u32>() {
            Ok(0) | Err(_) => Err(ParseError),
            Ok(v) => Ok(Self(v)),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Connection
// ───────────────────────────────────────────────────────────────

/// One peer link and its cached GATT bindings.
#[derive(Debug)]
pub struct Connection {
    handle: ConnectionHandle,
    address: PeerAddress,
    session: SessionId,
    read: Binding,
    write: Binding,
    live: bool,
}

impl Connection {
    fn new(handle: ConnectionHandle, address: PeerAddress, session: SessionId) -> Self {
        Self {
            handle,
            address,
            session,
            read: Binding::default(),
            write: Binding::default(),
            live: true,
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn address(&self) -> PeerAddress {
        self.address
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn binding(&self, direction: Direction) -> &Binding {
        match direction {
            Direction::Read => &self.read,
            Direction::Write => &self.write,
        }
    }

    pub fn binding_mut(&mut self, direction: Direction) -> &mut Binding {
        match direction {
            Direction::Read => &mut self.read,
            Direction::Write => &mut self.write,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// ConnectionRegistry
// ───────────────────────────────────────────────────────────────

/// Owner of all connections and notification routes.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: BTreeMap<ConnectionHandle, Connection>,
    routes: RouteTable,
    next_handle: u32,
    max_live: usize,
}

impl ConnectionRegistry {
    /// `max_live` bounds simultaneously live links; tombstones don't count.
    pub fn new(max_live: usize) -> Self {
        Self {
            connections: BTreeMap::new(),
            routes: RouteTable::new(),
            next_handle: 1,
            max_live,
        }
    }

    /// Open a link to `address` and register it under a fresh handle.
    ///
    /// The handle counter only advances when the radio accepts the link.
    pub fn connect<R: RadioPort>(
        &mut self,
        radio: &mut R,
        address: PeerAddress,
        events: EventSender,
    ) -> Result<ConnectionHandle> {
        if self.live_count() >= self.max_live {
            warn!("REG: refusing {address}, {} links already live", self.max_live);
            return Err(GatewayError::ConnectFailed(format!(
                "{address} (connection limit reached)"
            )));
        }

        let session = radio.connect(address, events).map_err(|e| {
            warn!("REG: connect to {address} failed: {e}");
            GatewayError::ConnectFailed(address.to_string())
        })?;

        let handle = ConnectionHandle(self.next_handle);
        self.next_handle += 1;
        self.connections
            .insert(handle, Connection::new(handle, address, session));
        info!("REG: {address} connected as handle {handle} ({session:?})");
        Ok(handle)
    }

    /// A live connection or a retained tombstone.
    pub fn lookup(&self, handle: ConnectionHandle) -> Result<&Connection> {
        self.connections
            .get(&handle)
            .ok_or_else(|| self.missing(handle))
    }

    pub fn lookup_mut(&mut self, handle: ConnectionHandle) -> Result<&mut Connection> {
        let missing = self.missing(handle);
        self.connections.get_mut(&handle).ok_or(missing)
    }

    /// Whether `handle` was ever allocated in this run.
    pub fn was_issued(&self, handle: ConnectionHandle) -> bool {
        handle.0 < self.next_handle
    }

    fn missing(&self, handle: ConnectionHandle) -> GatewayError {
        if self.was_issued(handle) {
            GatewayError::NotConnected
        } else {
            GatewayError::UnknownHandle
        }
    }

    /// Like [`lookup`](Self::lookup) but also requires the link to be up.
    pub fn live(&self, handle: ConnectionHandle) -> Result<&Connection> {
        let conn = self.lookup(handle)?;
        if !conn.live {
            return Err(GatewayError::NotConnected);
        }
        Ok(conn)
    }

    pub fn live_mut(&mut self, handle: ConnectionHandle) -> Result<&mut Connection> {
        let conn = self.lookup_mut(handle)?;
        if !conn.live {
            return Err(GatewayError::NotConnected);
        }
        Ok(conn)
    }

    /// Close the link behind `handle`.
    ///
    /// Returns `true` if a live link was torn down, `false` if the handle
    /// was already disconnected (a no-op success).
    pub fn disconnect<R: RadioPort>(
        &mut self,
        radio: &mut R,
        handle: ConnectionHandle,
    ) -> Result<bool> {
        let session = match self.lookup(handle) {
            Ok(conn) if conn.live => conn.session,
            Ok(_) | Err(GatewayError::NotConnected) => return Ok(false),
            Err(e) => return Err(e),
        };
        self.invalidate(handle);
        radio.disconnect(session);
        info!("REG: handle {handle} disconnected");
        Ok(true)
    }

    /// Disconnect every live link (used by `AT+BLESTOP`).
    pub fn disconnect_all<R: RadioPort>(&mut self, radio: &mut R) -> usize {
        let handles: Vec<ConnectionHandle> = self.live_handles().collect();
        for &handle in &handles {
            // Handles come from our own table, lookup cannot fail.
            let _ = self.disconnect(radio, handle);
        }
        handles.len()
    }

    /// Radio-reported link loss.  The session is already gone on the radio
    /// side, so only local state is invalidated.
    pub fn on_link_lost(&mut self, session: SessionId) -> Option<ConnectionHandle> {
        let handle = self
            .connections
            .values()
            .find(|c| c.live && c.session == session)
            .map(|c| c.handle)?;
        self.invalidate(handle);
        info!("REG: handle {handle} lost its link");
        Some(handle)
    }

    /// Connections in allocation order.
    pub fn list(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn live_handles(&self) -> impl Iterator<Item = ConnectionHandle> + '_ {
        self.connections
            .values()
            .filter(|c| c.live)
            .map(|c| c.handle)
    }

    pub fn live_count(&self) -> usize {
        self.connections.values().filter(|c| c.live).count()
    }

    /// The handle addressed by a command that omitted it: the one and
    /// only live connection.
    pub fn implicit_handle(&self, usage: &'static str) -> Result<ConnectionHandle> {
        let mut live = self.live_handles();
        match (live.next(), live.next()) {
            (None, _) => Err(GatewayError::NotConnected),
            (Some(handle), None) => Ok(handle),
            (Some(_), Some(_)) => Err(GatewayError::InvalidParameters(usage)),
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn routes_mut(&mut self) -> &mut RouteTable {
        &mut self.routes
    }

    /// Liveness flip, binding reset and route purge in one step.
    fn invalidate(&mut self, handle: ConnectionHandle) {
        if let Some(conn) = self.connections.get_mut(&handle) {
            conn.live = false;
            conn.read.invalidate();
            conn.write.invalidate();
        }
        let purged = self.routes.purge(handle);
        if purged > 0 {
            info!("REG: purged {purged} route(s) of handle {handle}");
        }
        self.evict_tombstones();
    }

    /// Drop the oldest disconnected entries beyond [`MAX_TOMBSTONES`].
    fn evict_tombstones(&mut self) {
        let dead: Vec<ConnectionHandle> = self
            .connections
            .values()
            .filter(|c| !c.live)
            .map(|c| c.handle)
            .collect();
        let excess = dead.len().saturating_sub(MAX_TOMBSTONES);
        for handle in &dead[..excess] {
            self.connections.remove(handle);
            debug!("REG: forgot tombstone {handle}");
        }
    }
}

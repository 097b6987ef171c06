//! Notification routing.
//!
//! The radio reports value changes by characteristic reference only.  The
//! [`RouteTable`] maps each subscribed reference back to the handle that
//! enabled notifications on it, so an event can be tagged with its owner.
//! Events for references without a route are dropped: that is the normal
//! fate of a notification that was in flight when its link went away.

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::channels::EventSender;
use crate::error::{GatewayError, Missing, Result};

use super::binding::Direction;
use super::ports::{CharRef, RadioPort};
use super::registry::{ConnectionHandle, ConnectionRegistry};
use super::reply::notification_line;

// ───────────────────────────────────────────────────────────────
// RouteTable
// ───────────────────────────────────────────────────────────────

/// Characteristic reference → owning handle.  At most one route per
/// reference; inserting again replaces the previous owner.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<CharRef, ConnectionHandle>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a route, returning the handle it replaced.
    pub fn insert(
        &mut self,
        characteristic: CharRef,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        self.routes.insert(characteristic, handle)
    }

    pub fn remove(&mut self, characteristic: CharRef) -> Option<ConnectionHandle> {
        self.routes.remove(&characteristic)
    }

    pub fn owner(&self, characteristic: CharRef) -> Option<ConnectionHandle> {
        self.routes.get(&characteristic).copied()
    }

    /// Drop every route owned by `handle`.  Returns how many went.
    pub fn purge(&mut self, handle: ConnectionHandle) -> usize {
        let before = self.routes.len();
        self.routes.retain(|_, owner| *owner != handle);
        before - self.routes.len()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

// ───────────────────────────────────────────────────────────────
// Router
// ───────────────────────────────────────────────────────────────

/// Notification enable/disable and event delivery over one borrow of the
/// registry and the radio.
pub struct Router<'a, R: RadioPort> {
    registry: &'a mut ConnectionRegistry,
    radio: &'a mut R,
}

impl<'a, R: RadioPort> Router<'a, R> {
    pub fn new(registry: &'a mut ConnectionRegistry, radio: &'a mut R) -> Self {
        Self { registry, radio }
    }

    /// Subscribe to the read binding's characteristic.  The route is only
    /// installed once the radio accepted the subscription.
    pub fn enable(&mut self, handle: ConnectionHandle, events: EventSender) -> Result<CharRef> {
        let characteristic = self.read_reference(handle)?;
        self.radio.subscribe(characteristic, events)?;
        if let Some(previous) = self.registry.routes_mut().insert(characteristic, handle) {
            if previous != handle {
                warn!("ROUTER: {characteristic:?} moved from handle {previous} to {handle}");
            }
        }
        info!("ROUTER: notifications on for handle {handle} ({characteristic:?})");
        Ok(characteristic)
    }

    /// Unsubscribe.  The route is removed even if the radio refuses, so a
    /// disabled route never outlives the command.
    pub fn disable(&mut self, handle: ConnectionHandle) -> Result<()> {
        let characteristic = self.read_reference(handle)?;
        self.registry.routes_mut().remove(characteristic);
        let outcome = self.radio.unsubscribe(characteristic);
        info!("ROUTER: notifications off for handle {handle} ({characteristic:?})");
        Ok(outcome?)
    }

    /// Render one inbound notification, or `None` if nobody owns the
    /// reference any more.
    pub fn on_event(&self, characteristic: CharRef, payload: &[u8]) -> Option<String> {
        match self.registry.routes().owner(characteristic) {
            Some(handle) => Some(notification_line(handle, payload)),
            None => {
                debug!("ROUTER: dropping {} byte(s) for unrouted {characteristic:?}", payload.len());
                None
            }
        }
    }

    fn read_reference(&self, handle: ConnectionHandle) -> Result<CharRef> {
        self.registry
            .live(handle)?
            .binding(Direction::Read)
            .resolved()
            .ok_or(GatewayError::BindingUnresolved {
                direction: Direction::Read,
                missing: Missing::Characteristic,
            })
    }
}

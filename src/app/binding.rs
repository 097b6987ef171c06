//! Cached GATT bindings and their resolver.
//!
//! Each connection carries two [`Binding`]s, one per [`Direction`].  A
//! binding remembers the service and characteristic UUIDs the host asked
//! for and, once both have been looked up on a live link, the radio
//! references they resolved to.  Resolution is eager:
//!
//! * setting the service UUID looks the service up (and the characteristic
//!   too, when its UUID is already known);
//! * setting the characteristic UUID looks it up inside the already
//!   resolved service.
//!
//! A failed lookup clears the references but keeps the UUIDs.  Disconnect
//! clears the references of both bindings (see the registry).

use log::{debug, info, warn};

use crate::error::{GatewayError, Missing, Result};
use crate::gatt::BleUuid;

use super::ports::{CharRef, RadioPort, ServiceRef, SessionId};
use super::registry::{ConnectionHandle, ConnectionRegistry};

/// Which of a connection's two bindings an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

// ───────────────────────────────────────────────────────────────
// Binding
// ───────────────────────────────────────────────────────────────

/// Requested UUIDs plus the radio references they resolved to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binding {
    service_uuid: Option<BleUuid>,
    characteristic_uuid: Option<BleUuid>,
    service: Option<ServiceRef>,
    characteristic: Option<CharRef>,
}

impl Binding {
    pub fn service_uuid(&self) -> Option<BleUuid> {
        self.service_uuid
    }

    pub fn characteristic_uuid(&self) -> Option<BleUuid> {
        self.characteristic_uuid
    }

    pub fn service(&self) -> Option<ServiceRef> {
        self.service
    }

    /// The resolved characteristic, if the binding is fully resolved.
    pub fn resolved(&self) -> Option<CharRef> {
        self.characteristic
    }

    /// Drop both references, keep the UUIDs.
    pub(crate) fn invalidate(&mut self) {
        self.service = None;
        self.characteristic = None;
    }
}

/// How far a binding got after one of its UUIDs was set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The link is down; the UUID was stored for later.
    Deferred,
    /// The service resolved, the characteristic UUID is not known yet.
    ServiceOnly(ServiceRef),
    /// Service and characteristic both resolved.
    Complete(ServiceRef, CharRef),
}

// ───────────────────────────────────────────────────────────────
// Resolver
// ───────────────────────────────────────────────────────────────

/// Binding operations over one borrow of the registry and the radio.
pub struct Resolver<'a, R: RadioPort> {
    registry: &'a mut ConnectionRegistry,
    radio: &'a mut R,
}

impl<'a, R: RadioPort> Resolver<'a, R> {
    pub fn new(registry: &'a mut ConnectionRegistry, radio: &'a mut R) -> Self {
        Self { registry, radio }
    }

    /// Store the service UUID and resolve as far as possible.
    ///
    /// On lookup failure the binding's references are cleared and the
    /// error names the UUID that was not found.
    pub fn set_service_uuid(
        &mut self,
        handle: ConnectionHandle,
        direction: Direction,
        uuid: BleUuid,
    ) -> Result<Resolution> {
        let previous = self.registry.lookup(handle)?.binding(direction).resolved();
        let outcome = self.resolve_service(handle, direction, uuid);
        self.retire_route(handle, direction, previous);
        outcome
    }

    /// Store the characteristic UUID and resolve it inside the bound
    /// service.  Without a resolved service nothing is looked up.
    pub fn set_characteristic_uuid(
        &mut self,
        handle: ConnectionHandle,
        direction: Direction,
        uuid: BleUuid,
    ) -> Result<Resolution> {
        let previous = self.registry.lookup(handle)?.binding(direction).resolved();
        let outcome = self.resolve_characteristic(handle, direction, uuid);
        self.retire_route(handle, direction, previous);
        outcome
    }

    fn resolve_service(
        &mut self,
        handle: ConnectionHandle,
        direction: Direction,
        uuid: BleUuid,
    ) -> Result<Resolution> {
        let conn = self.registry.lookup_mut(handle)?;
        let live = conn.is_live();
        let session = conn.session();
        let binding = conn.binding_mut(direction);
        binding.service_uuid = Some(uuid);
        binding.invalidate();
        let characteristic_uuid = binding.characteristic_uuid;

        if !live {
            debug!("RESOLVE: handle {handle} not live, {direction:?} service deferred");
            return Ok(Resolution::Deferred);
        }

        let service = find_service(self.radio, session, uuid)?;
        self.binding_mut(handle, direction)?.service = Some(service);
        info!("RESOLVE: handle {handle} {direction:?} service {uuid} -> {service:?}");

        let Some(char_uuid) = characteristic_uuid else {
            return Ok(Resolution::ServiceOnly(service));
        };
        let characteristic = find_characteristic(self.radio, service, char_uuid)?;
        self.binding_mut(handle, direction)?.characteristic = Some(characteristic);
        info!("RESOLVE: handle {handle} {direction:?} characteristic {char_uuid} -> {characteristic:?}");
        Ok(Resolution::Complete(service, characteristic))
    }

    fn resolve_characteristic(
        &mut self,
        handle: ConnectionHandle,
        direction: Direction,
        uuid: BleUuid,
    ) -> Result<Resolution> {
        let conn = self.registry.lookup_mut(handle)?;
        let live = conn.is_live();
        let binding = conn.binding_mut(direction);
        binding.characteristic_uuid = Some(uuid);
        binding.characteristic = None;

        if !live {
            debug!("RESOLVE: handle {handle} not live, {direction:?} characteristic deferred");
            return Ok(Resolution::Deferred);
        }
        let Some(service) = binding.service else {
            return Err(GatewayError::BindingUnresolved {
                direction,
                missing: Missing::Service,
            });
        };

        let characteristic = find_characteristic(self.radio, service, uuid)?;
        self.binding_mut(handle, direction)?.characteristic = Some(characteristic);
        info!("RESOLVE: handle {handle} {direction:?} characteristic {uuid} -> {characteristic:?}");
        Ok(Resolution::Complete(service, characteristic))
    }

    /// A read binding that moved off `previous` takes its notification
    /// route with it: the route is removed and the radio unsubscribed.
    fn retire_route(
        &mut self,
        handle: ConnectionHandle,
        direction: Direction,
        previous: Option<CharRef>,
    ) {
        if direction != Direction::Read {
            return;
        }
        let Some(previous) = previous else {
            return;
        };
        let current = self
            .registry
            .lookup(handle)
            .ok()
            .and_then(|c| c.binding(Direction::Read).resolved());
        if current == Some(previous) || self.registry.routes().owner(previous) != Some(handle) {
            return;
        }
        self.registry.routes_mut().remove(previous);
        if let Err(e) = self.radio.unsubscribe(previous) {
            warn!("RESOLVE: unsubscribing stale {previous:?} of handle {handle} failed: {e}");
        }
        info!("RESOLVE: handle {handle} rebound, notifications on {previous:?} stopped");
    }

    pub fn resolved_reference(
        &self,
        handle: ConnectionHandle,
        direction: Direction,
    ) -> Result<Option<CharRef>> {
        Ok(self.registry.lookup(handle)?.binding(direction).resolved())
    }

    /// Read the characteristic cached in the read binding.
    pub fn read_via_binding(&mut self, handle: ConnectionHandle) -> Result<Vec<u8>> {
        let characteristic = self.require_resolved(handle, Direction::Read)?;
        Ok(self.radio.read(characteristic)?)
    }

    /// One-shot read that looks both UUIDs up on every call and leaves the
    /// cached read binding untouched.
    pub fn read_via_explicit_uuids(
        &mut self,
        handle: ConnectionHandle,
        service_uuid: BleUuid,
        characteristic_uuid: BleUuid,
    ) -> Result<Vec<u8>> {
        let session = self.registry.live(handle)?.session();
        let service = find_service(self.radio, session, service_uuid)?;
        let characteristic = find_characteristic(self.radio, service, characteristic_uuid)?;
        Ok(self.radio.read(characteristic)?)
    }

    /// Write through the cached write binding.  Nothing reaches the radio
    /// unless the binding is resolved.
    pub fn write_via_binding(&mut self, handle: ConnectionHandle, data: &[u8]) -> Result<()> {
        let characteristic = self.require_resolved(handle, Direction::Write)?;
        self.radio.write(characteristic, data)?;
        debug!("RESOLVE: wrote {} byte(s) via handle {handle}", data.len());
        Ok(())
    }

    fn require_resolved(&self, handle: ConnectionHandle, direction: Direction) -> Result<CharRef> {
        self.registry
            .live(handle)?
            .binding(direction)
            .resolved()
            .ok_or(GatewayError::BindingUnresolved {
                direction,
                missing: Missing::Characteristic,
            })
    }

    fn binding_mut(
        &mut self,
        handle: ConnectionHandle,
        direction: Direction,
    ) -> Result<&mut Binding> {
        Ok(self.registry.lookup_mut(handle)?.binding_mut(direction))
    }
}

fn find_service<R: RadioPort>(
    radio: &mut R,
    session: SessionId,
    uuid: BleUuid,
) -> Result<ServiceRef> {
    radio
        .services(session)?
        .into_iter()
        .find(|s| s.uuid == uuid)
        .map(|s| s.service)
        .ok_or_else(|| GatewayError::ServiceNotFound(uuid.to_string()))
}

fn find_characteristic<R: RadioPort>(
    radio: &mut R,
    service: ServiceRef,
    uuid: BleUuid,
) -> Result<CharRef> {
    radio
        .characteristics(service)?
        .into_iter()
        .find(|c| c.uuid == uuid)
        .map(|c| c.characteristic)
        .ok_or_else(|| GatewayError::CharacteristicNotFound(uuid.to_string()))
}

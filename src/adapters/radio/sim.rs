//! Deterministic in-memory BLE stack.
//!
//! [`SimRadio`] implements [`RadioPort`] against a scripted set of
//! [`SimPeripheral`]s.  It is what host tests and host runs talk to, and it
//! records enough of what the gateway asked for (reads, writes,
//! subscriptions) to assert on.  Asynchronous behaviour is driven by the
//! test: [`SimRadio::notify`], [`SimRadio::drop_link`] and
//! [`SimRadio::tick_streams`] post events exactly as a real stack's
//! callback would.
//!
//! References are handed out per connect: every service and characteristic
//! of the peer gets a fresh [`ServiceRef`]/[`CharRef`] that stays stable
//! for the life of the session and is released on disconnect.

use std::collections::{BTreeMap, HashMap};

use log::{debug, info, warn};

use crate::adapters::peer::PeerPacket;
use crate::app::ports::{
    CharRef, RadioError, RadioEvent, RadioPort, RadioSettings, RemoteCharacteristic,
    RemoteService, ScanResult, ServiceRef, SessionId,
};
use crate::channels::{EventSender, post};
use crate::config::MAX_ATTR_LEN;
use crate::gatt::{BleUuid, PeerAddress};

// ───────────────────────────────────────────────────────────────
// Scripted peers
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SimCharacteristic {
    pub uuid: BleUuid,
    pub value: Vec<u8>,
    /// Emits a [`PeerPacket`] on every [`SimRadio::tick_streams`] while
    /// subscribed.
    pub streaming: bool,
}

#[derive(Debug, Clone)]
pub struct SimService {
    pub uuid: BleUuid,
    pub characteristics: Vec<SimCharacteristic>,
}

/// A remote device the simulation can scan and connect to.
#[derive(Debug, Clone)]
pub struct SimPeripheral {
    pub address: PeerAddress,
    pub name: Option<String>,
    pub rssi: i16,
    pub connectable: bool,
    pub services: Vec<SimService>,
    /// Next sequence number for streamed frames.
    pub sequence: u32,
}

impl SimPeripheral {
    pub fn new(address: PeerAddress) -> Self {
        Self {
            address,
            name: None,
            rssi: -60,
            connectable: true,
            services: Vec::new(),
            sequence: 0,
        }
    }

    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }

    #[must_use]
    pub fn rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
        self
    }

    /// Refuse every connection attempt.
    #[must_use]
    pub fn unreachable(mut self) -> Self {
        self.connectable = false;
        self
    }

    /// Add a service with `(uuid, initial value)` characteristics.
    #[must_use]
    pub fn with_service(mut self, uuid: BleUuid, characteristics: &[(BleUuid, &[u8])]) -> Self {
        self.services.push(SimService {
            uuid,
            characteristics: characteristics
                .iter()
                .map(|(uuid, value)| SimCharacteristic {
                    uuid: *uuid,
                    value: value.to_vec(),
                    streaming: false,
                })
                .collect(),
        });
        self
    }

    /// Add a service with a single characteristic that streams demo frames.
    #[must_use]
    pub fn with_stream(mut self, service: BleUuid, characteristic: BleUuid) -> Self {
        self.services.push(SimService {
            uuid: service,
            characteristics: vec![SimCharacteristic {
                uuid: characteristic,
                value: Vec::new(),
                streaming: true,
            }],
        });
        self
    }

    /// First advertised service, as put in the advertising report.
    fn advertised_service(&self) -> Option<BleUuid> {
        self.services.first().map(|s| s.uuid)
    }
}

// ───────────────────────────────────────────────────────────────
// Session bookkeeping
// ───────────────────────────────────────────────────────────────

struct SimSession {
    peer: usize,
    events: EventSender,
    services: Vec<(ServiceRef, BleUuid)>,
    /// The peer dropped the link; bookkeeping stays until `disconnect`.
    down: bool,
}

/// Where a reference points inside `SimRadio::peers`.
#[derive(Debug, Clone, Copy)]
struct ServiceSlot {
    session: SessionId,
    peer: usize,
    service: usize,
}

#[derive(Debug, Clone, Copy)]
struct CharSlot {
    session: SessionId,
    peer: usize,
    service: usize,
    characteristic: usize,
}

/// Recorded radio write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub characteristic: CharRef,
    pub data: Vec<u8>,
}

// ───────────────────────────────────────────────────────────────
// SimRadio
// ───────────────────────────────────────────────────────────────

/// Simulated BLE radio.
#[derive(Default)]
pub struct SimRadio {
    peers: Vec<SimPeripheral>,
    initialized: bool,
    advertising: bool,
    settings: Option<RadioSettings>,
    /// Local server characteristic value (peripheral mode).
    server_value: Vec<u8>,

    sessions: BTreeMap<SessionId, SimSession>,
    service_slots: HashMap<ServiceRef, ServiceSlot>,
    char_slots: HashMap<CharRef, CharSlot>,
    subscriptions: HashMap<CharRef, EventSender>,
    next_session: u32,
    next_ref: u32,

    writes: Vec<WriteRecord>,
    reads: usize,
    connect_attempts: usize,
    last_scan_filter: Option<String>,
    fail_next: Option<RadioError>,
}

impl SimRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// A radio that is already initialised, as if `init` had run.
    pub fn initialized() -> Self {
        Self {
            initialized: true,
            ..Self::default()
        }
    }

    pub fn add_peer(&mut self, peer: SimPeripheral) {
        self.peers.push(peer);
    }

    #[must_use]
    pub fn with_peer(mut self, peer: SimPeripheral) -> Self {
        self.add_peer(peer);
        self
    }

    /// Make the next fallible radio call fail with `error`.
    pub fn fail_next(&mut self, error: RadioError) {
        self.fail_next = Some(error);
    }

    // ── Inspection ────────────────────────────────────────────

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    pub fn settings(&self) -> Option<&RadioSettings> {
        self.settings.as_ref()
    }

    pub fn server_value(&self) -> &[u8] {
        &self.server_value
    }

    pub fn writes(&self) -> &[WriteRecord] {
        &self.writes
    }

    pub fn read_count(&self) -> usize {
        self.reads
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_subscribed(&self, characteristic: CharRef) -> bool {
        self.subscriptions.contains_key(&characteristic)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn last_scan_filter(&self) -> Option<&str> {
        self.last_scan_filter.as_deref()
    }

    /// Current value of a peer characteristic, by UUID.
    pub fn peer_value(&self, address: PeerAddress, characteristic: BleUuid) -> Option<&[u8]> {
        self.peers
            .iter()
            .find(|p| p.address == address)?
            .services
            .iter()
            .flat_map(|s| &s.characteristics)
            .find(|c| c.uuid == characteristic)
            .map(|c| c.value.as_slice())
    }

    /// Live reference for a characteristic of a connected peer.
    pub fn char_ref(&self, address: PeerAddress, characteristic: BleUuid) -> Option<CharRef> {
        self.char_slots.iter().find_map(|(r, slot)| {
            let peer = &self.peers[slot.peer];
            let uuid = peer.services[slot.service].characteristics[slot.characteristic].uuid;
            (peer.address == address && uuid == characteristic).then_some(*r)
        })
    }

    // ── Event injection ───────────────────────────────────────

    /// Change a characteristic's value and notify if subscribed.  Returns
    /// whether an event was posted.
    pub fn notify(&mut self, characteristic: CharRef, payload: &[u8]) -> bool {
        if let Some(slot) = self.char_slots.get(&characteristic).copied() {
            self.peers[slot.peer].services[slot.service].characteristics[slot.characteristic]
                .value = payload.to_vec();
        }
        self.post_notification(characteristic, payload)
    }

    /// Post a notification for `characteristic` whether or not the
    /// reference is still valid, the way a late stack callback would.
    pub fn post_notification(&self, characteristic: CharRef, payload: &[u8]) -> bool {
        let Some(events) = self.subscriptions.get(&characteristic) else {
            return false;
        };
        let Ok(payload) = heapless::Vec::<u8, MAX_ATTR_LEN>::from_slice(payload) else {
            warn!("BLE(sim): notification exceeds {MAX_ATTR_LEN} bytes, dropped");
            return false;
        };
        post(
            events,
            RadioEvent::Notification {
                characteristic,
                payload,
            },
        )
    }

    /// The peer drops the link: its references stop working and a
    /// [`RadioEvent::LinkLost`] is posted.  Like a real stack, the session
    /// is only forgotten once the owner calls `disconnect`.
    pub fn drop_link(&mut self, address: PeerAddress) -> bool {
        let Some((session, sim)) = self
            .sessions
            .iter_mut()
            .find(|(_, s)| !s.down && self.peers[s.peer].address == address)
        else {
            return false;
        };
        let session = *session;
        sim.down = true;
        let events = sim.events.clone();
        self.subscriptions
            .retain(|r, _| self.char_slots.get(r).is_none_or(|slot| slot.session != session));
        post(&events, RadioEvent::LinkLost { session });
        info!("BLE(sim): {address} dropped the link");
        true
    }

    /// Emit one demo frame on every subscribed streaming characteristic.
    /// Returns the number of frames posted.
    pub fn tick_streams(&mut self) -> usize {
        let mut streaming: Vec<(CharRef, CharSlot)> = self
            .char_slots
            .iter()
            .filter(|(r, slot)| {
                self.subscriptions.contains_key(r)
                    && self.peers[slot.peer].services[slot.service].characteristics
                        [slot.characteristic]
                        .streaming
            })
            .map(|(r, slot)| (*r, *slot))
            .collect();
        streaming.sort_by_key(|(r, _)| *r);

        let mut posted = 0;
        for (characteristic, slot) in streaming {
            let peer = &mut self.peers[slot.peer];
            let packet = PeerPacket::new(peer.sequence);
            peer.sequence = peer.sequence.wrapping_add(1);
            if self.post_notification(characteristic, packet.as_bytes()) {
                posted += 1;
            }
        }
        posted
    }

    /// Skip `count` frames on a peer's stream, as if they were lost in the air.
    pub fn lose_frames(&mut self, address: PeerAddress, count: u32) {
        if let Some(peer) = self.peers.iter_mut().find(|p| p.address == address) {
            peer.sequence = peer.sequence.wrapping_add(count);
        }
    }

    // ── Internals ─────────────────────────────────────────────

    fn check(&mut self) -> Result<(), RadioError> {
        if let Some(e) = self.fail_next.take() {
            return Err(e);
        }
        if !self.initialized {
            return Err(RadioError::NotInitialized);
        }
        Ok(())
    }

    fn alloc_ref(&mut self) -> u32 {
        self.next_ref += 1;
        self.next_ref
    }

    /// Forget a session and every reference issued under it.
    fn release(&mut self, session: SessionId) -> Option<EventSender> {
        let removed = self.sessions.remove(&session)?;
        self.service_slots.retain(|_, slot| slot.session != session);
        let gone: Vec<CharRef> = self
            .char_slots
            .iter()
            .filter(|(_, slot)| slot.session == session)
            .map(|(r, _)| *r)
            .collect();
        for r in gone {
            self.char_slots.remove(&r);
            self.subscriptions.remove(&r);
        }
        Some(removed.events)
    }

    fn char_slot(&self, characteristic: CharRef) -> Result<CharSlot, RadioError> {
        let slot = self
            .char_slots
            .get(&characteristic)
            .copied()
            .ok_or(RadioError::NotConnected)?;
        if self.sessions.get(&slot.session).is_none_or(|s| s.down) {
            return Err(RadioError::NotConnected);
        }
        Ok(slot)
    }
}

impl RadioPort for SimRadio {
    fn init(&mut self, settings: &RadioSettings) -> Result<(), RadioError> {
        if let Some(e) = self.fail_next.take() {
            return Err(e);
        }
        self.initialized = true;
        self.server_value.clone_from(&settings.initial_value);
        self.settings = Some(settings.clone());
        info!(
            "BLE(sim): initialised as '{}' (service {})",
            settings.device_name, settings.service_uuid
        );
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), RadioError> {
        let sessions: Vec<SessionId> = self.sessions.keys().copied().collect();
        for session in sessions {
            self.release(session);
        }
        self.initialized = false;
        self.advertising = false;
        info!("BLE(sim): deinitialised");
        Ok(())
    }

    fn start_advertising(&mut self) -> Result<(), RadioError> {
        self.check()?;
        self.advertising = true;
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<(), RadioError> {
        self.check()?;
        self.advertising = false;
        Ok(())
    }

    fn scan(
        &mut self,
        duration_secs: u32,
        name_filter: Option<&str>,
    ) -> Result<Vec<ScanResult>, RadioError> {
        self.check()?;
        self.last_scan_filter = name_filter.map(str::to_owned);
        debug!("BLE(sim): scanning {duration_secs}s");
        Ok(self
            .peers
            .iter()
            .map(|p| ScanResult {
                address: p.address,
                rssi: p.rssi,
                name: p.name.clone(),
                service_uuid: p.advertised_service(),
            })
            .collect())
    }

    fn connect(
        &mut self,
        address: PeerAddress,
        events: EventSender,
    ) -> Result<SessionId, RadioError> {
        self.check()?;
        self.connect_attempts += 1;
        let peer = self
            .peers
            .iter()
            .position(|p| p.address == address && p.connectable)
            .ok_or(RadioError::ConnectFailed)?;
        if self.sessions.values().any(|s| s.peer == peer && !s.down) {
            return Err(RadioError::ConnectFailed);
        }

        self.next_session += 1;
        let session = SessionId(self.next_session);
        let mut services = Vec::new();
        for service in 0..self.peers[peer].services.len() {
            let service_ref = ServiceRef(self.alloc_ref());
            self.service_slots.insert(
                service_ref,
                ServiceSlot {
                    session,
                    peer,
                    service,
                },
            );
            for characteristic in 0..self.peers[peer].services[service].characteristics.len() {
                let char_ref = CharRef(self.alloc_ref());
                self.char_slots.insert(
                    char_ref,
                    CharSlot {
                        session,
                        peer,
                        service,
                        characteristic,
                    },
                );
            }
            services.push((service_ref, self.peers[peer].services[service].uuid));
        }
        self.sessions.insert(
            session,
            SimSession {
                peer,
                events,
                services,
                down: false,
            },
        );
        info!("BLE(sim): connected to {address} ({session:?})");
        Ok(session)
    }

    fn disconnect(&mut self, session: SessionId) {
        if self.release(session).is_some() {
            info!("BLE(sim): {session:?} closed");
        }
    }

    fn services(&mut self, session: SessionId) -> Result<Vec<RemoteService>, RadioError> {
        self.check()?;
        let s = self
            .sessions
            .get(&session)
            .filter(|s| !s.down)
            .ok_or(RadioError::NotConnected)?;
        Ok(s.services
            .iter()
            .map(|(service, uuid)| RemoteService {
                uuid: *uuid,
                service: *service,
            })
            .collect())
    }

    fn characteristics(
        &mut self,
        service: ServiceRef,
    ) -> Result<Vec<RemoteCharacteristic>, RadioError> {
        self.check()?;
        let slot = *self
            .service_slots
            .get(&service)
            .ok_or(RadioError::NotConnected)?;
        if self.sessions.get(&slot.session).is_none_or(|s| s.down) {
            return Err(RadioError::NotConnected);
        }
        let mut found: Vec<RemoteCharacteristic> = self
            .char_slots
            .iter()
            .filter(|(_, c)| c.session == slot.session && c.service == slot.service)
            .map(|(r, c)| RemoteCharacteristic {
                uuid: self.peers[c.peer].services[c.service].characteristics[c.characteristic]
                    .uuid,
                characteristic: *r,
            })
            .collect();
        found.sort_by_key(|c| c.characteristic);
        Ok(found)
    }

    fn read(&mut self, characteristic: CharRef) -> Result<Vec<u8>, RadioError> {
        self.check()?;
        let slot = self.char_slot(characteristic)?;
        self.reads += 1;
        Ok(self.peers[slot.peer].services[slot.service].characteristics[slot.characteristic]
            .value
            .clone())
    }

    fn write(&mut self, characteristic: CharRef, data: &[u8]) -> Result<(), RadioError> {
        self.check()?;
        let slot = self.char_slot(characteristic)?;
        self.peers[slot.peer].services[slot.service].characteristics[slot.characteristic].value =
            data.to_vec();
        self.writes.push(WriteRecord {
            characteristic,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn subscribe(
        &mut self,
        characteristic: CharRef,
        events: EventSender,
    ) -> Result<(), RadioError> {
        self.check()?;
        self.char_slot(characteristic)?;
        self.subscriptions.insert(characteristic, events);
        Ok(())
    }

    fn unsubscribe(&mut self, characteristic: CharRef) -> Result<(), RadioError> {
        self.check()?;
        self.char_slot(characteristic)?;
        self.subscriptions.remove(&characteristic);
        Ok(())
    }
}

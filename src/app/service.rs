//! Gateway service — the command dispatcher.
//!
//! [`Gateway`] owns the connection registry, the radio and the radio
//! state flags.  It is driven from a single task: every serial line goes
//! through [`Gateway::process_line`], and radio events queued by the
//! callback context are applied by [`Gateway::poll_events`] before and
//! after each command.  That single owner is the whole locking story:
//! registry, bindings and routes are only ever touched through `&mut self`.
//!
//! ```text
//!  serial line ──▶ parse ──▶ ┌───────────────────────────┐ ──▶ LineSink
//!                            │          Gateway          │
//!  EventChannel ───────────▶ │ Registry · Resolver ·     │ ──▶ RadioPort
//!                            │ Router                    │
//!                            └───────────────────────────┘
//! ```

use log::{debug, info, warn};

use crate::channels::EventChannel;
use crate::config::{FIRMWARE_VERSION, GatewayConfig};
use crate::error::{GatewayError, Result};
use crate::gatt::{BleUuid, PeerAddress};

use super::binding::{Direction, Resolution, Resolver};
use super::commands::{self, AtCommand, BindingPart, Target, UuidArg, usage};
use super::ports::{LineSink, RadioError, RadioEvent, RadioPort, RadioSettings, ScanResult};
use super::registry::{ConnectionHandle, ConnectionRegistry};
use super::reply::{Reply, hex_bytes};
use super::router::Router;

/// Radio lifecycle flags as seen by the AT layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RadioState {
    pub initialized: bool,
    pub advertising: bool,
}

// ───────────────────────────────────────────────────────────────
// Gateway
// ───────────────────────────────────────────────────────────────

/// The AT command gateway.
pub struct Gateway<R: RadioPort> {
    radio: R,
    registry: ConnectionRegistry,
    config: GatewayConfig,
    events: &'static EventChannel,
    state: RadioState,
    /// `AT+BLESETCLIENTNAME` filter; empty matches everything.
    name_filter: String,
}

impl<R: RadioPort> Gateway<R> {
    pub fn new(radio: R, config: GatewayConfig, events: &'static EventChannel) -> Self {
        let registry = ConnectionRegistry::new(config.max_connections);
        Self {
            radio,
            registry,
            config,
            events,
            state: RadioState::default(),
            name_filter: String::new(),
        }
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn radio_state(&self) -> RadioState {
        self.state
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn name_filter(&self) -> &str {
        &self.name_filter
    }

    // ── Driving ───────────────────────────────────────────────

    /// Handle one serial line end to end: drain pending events, run the
    /// command, write its reply, drain again.
    pub fn process_line(&mut self, line: &str, sink: &mut impl LineSink) {
        self.poll_events(sink);
        self.dispatch(line).write_to(sink);
        self.poll_events(sink);
    }

    /// Apply every queued radio event in arrival order.  Returns the number
    /// of notification lines written.
    pub fn poll_events(&mut self, sink: &mut impl LineSink) -> usize {
        let mut written = 0;
        while let Ok(event) = self.events.try_receive() {
            if let Some(line) = self.handle_event(event) {
                sink.write_line(&line);
                written += 1;
            }
        }
        written
    }

    /// Apply one radio event; a routed notification yields its line.
    pub fn handle_event(&mut self, event: RadioEvent) -> Option<String> {
        match event {
            RadioEvent::Notification {
                characteristic,
                payload,
            } => Router::new(&mut self.registry, &mut self.radio).on_event(characteristic, &payload),
            RadioEvent::LinkLost { session } => {
                if self.registry.on_link_lost(session).is_none() {
                    debug!("AT: link loss for unknown {session:?}");
                }
                // Same release as an explicit disconnect; idempotent.
                self.radio.disconnect(session);
                None
            }
        }
    }

    /// Parse and execute one command line.
    pub fn dispatch(&mut self, line: &str) -> Reply {
        debug!("AT: <- {}", line.trim());
        match commands::parse(line) {
            Ok(command) => self.execute(command),
            Err(e) => {
                warn!("AT: rejected {:?}: {e}", line.trim());
                Reply::new().finish(Err(e))
            }
        }
    }

    /// Execute an already parsed command.
    pub fn execute(&mut self, command: AtCommand) -> Reply {
        let mut reply = Reply::new();
        let outcome = match command {
            AtCommand::Attention => Ok(()),
            AtCommand::Version => {
                reply.info(format!("ESP32-AT Firmware Version {FIRMWARE_VERSION}"));
                Ok(())
            }
            AtCommand::Start => self.start(&mut reply),
            AtCommand::Stop => self.stop(&mut reply),
            AtCommand::Advertise(on) => self.advertise(on, &mut reply),
            AtCommand::SetClientName(name) => {
                self.set_client_name(name, &mut reply);
                Ok(())
            }
            AtCommand::Scan => self.scan(&mut reply),
            AtCommand::Connect(address) => self.connect(address, &mut reply),
            AtCommand::Disconnect(target) => self.disconnect(target, &mut reply),
            AtCommand::List => {
                self.list(&mut reply);
                Ok(())
            }
            AtCommand::Discover(target) => self.discover(target, &mut reply),
            AtCommand::SetBinding {
                target,
                direction,
                part: BindingPart::Service,
                uuid,
            } => self.set_service(target, direction, &uuid, &mut reply),
            AtCommand::SetBinding {
                target,
                direction,
                part: BindingPart::Characteristic,
                uuid,
            } => self.set_characteristic(target, direction, &uuid, &mut reply),
            AtCommand::Read(target) => self.read(target, &mut reply),
            AtCommand::ReadExplicit {
                target,
                service,
                characteristic,
            } => self.read_explicit(target, service.uuid, characteristic.uuid, &mut reply),
            AtCommand::Notify { target, enable } => self.notify(target, enable, &mut reply),
            AtCommand::Write { handle, data } => self.write(handle, &data),
        };
        if let Err(e) = &outcome {
            debug!("AT: -> ERROR: {e}");
        }
        reply.finish(outcome)
    }

    // ── Radio lifecycle ───────────────────────────────────────

    fn start(&mut self, reply: &mut Reply) -> Result<()> {
        if self.state.initialized {
            reply.info("BLE already initialized");
            return Ok(());
        }
        self.init_radio()?;
        reply.info("BLE initialized (server mode)");
        Ok(())
    }

    fn stop(&mut self, reply: &mut Reply) -> Result<()> {
        if !self.state.initialized {
            reply.info("BLE not initialized");
            return Ok(());
        }
        if self.state.advertising {
            self.radio.stop_advertising()?;
            self.state.advertising = false;
            reply.info("BLE advertising stopped");
        }
        let dropped = self.registry.disconnect_all(&mut self.radio);
        if dropped > 0 {
            info!("AT: dropped {dropped} link(s) before deinit");
        }
        self.radio.deinit()?;
        self.state.initialized = false;
        reply.info("BLE deinitialized");
        Ok(())
    }

    fn advertise(&mut self, on: bool, reply: &mut Reply) -> Result<()> {
        if !self.state.initialized {
            return Err(GatewayError::RadioNotInitialized);
        }
        match (on, self.state.advertising) {
            (true, true) => reply.info("BLE already advertising"),
            (false, false) => reply.info("BLE not advertising"),
            (true, false) => {
                self.radio.start_advertising()?;
                self.state.advertising = true;
                reply.info("BLE advertising started");
            }
            (false, true) => {
                self.radio.stop_advertising()?;
                self.state.advertising = false;
                reply.info("BLE advertising stopped");
            }
        }
        Ok(())
    }

    fn init_radio(&mut self) -> Result<()> {
        let settings = self.radio_settings()?;
        self.radio.init(&settings)?;
        self.state = RadioState {
            initialized: true,
            advertising: false,
        };
        info!("AT: radio up as {:?}", settings.device_name);
        Ok(())
    }

    /// Scan and connect bring the radio up on demand when configured to.
    fn ensure_radio(&mut self) -> Result<()> {
        if self.state.initialized {
            return Ok(());
        }
        if !self.config.auto_init_radio {
            return Err(GatewayError::RadioNotInitialized);
        }
        self.init_radio()
    }

    fn radio_settings(&self) -> Result<RadioSettings> {
        let bad_uuid = |_| GatewayError::Radio(RadioError::Stack("invalid server UUID"));
        Ok(RadioSettings {
            device_name: self.config.device_name.clone(),
            service_uuid: self.config.server_service_uuid.parse::<BleUuid>().map_err(bad_uuid)?,
            characteristic_uuid: self
                .config
                .server_characteristic_uuid
                .parse::<BleUuid>()
                .map_err(bad_uuid)?,
            initial_value: self.config.server_initial_value.as_bytes().to_vec(),
        })
    }

    // ── Scanning & links ──────────────────────────────────────

    fn set_client_name(&mut self, name: String, reply: &mut Reply) {
        if name.is_empty() {
            reply.info("Client name filter cleared");
        } else {
            reply.info(format!("Client name filter set to: {name}"));
        }
        self.name_filter = name;
    }

    fn scan(&mut self, reply: &mut Reply) -> Result<()> {
        self.ensure_radio()?;
        reply.info("Starting BLE scan...");
        let filter = (!self.name_filter.is_empty()).then_some(self.name_filter.as_str());
        let found: Vec<ScanResult> = self
            .radio
            .scan(self.config.scan_duration_secs, filter)?
            .into_iter()
            .filter(|r| name_matches(r, &self.name_filter))
            .collect();

        reply.info(format!("Devices found: {}", found.len()));
        for (i, device) in found.iter().enumerate() {
            reply.info(format!("Device {i}: {}, RSSI: {}", device.address, device.rssi));
            if let Some(name) = &device.name {
                reply.info(format!("   Name: {name}"));
            }
            if let Some(uuid) = device.service_uuid {
                reply.info(format!("   Service UUID: {uuid}"));
            }
        }
        reply.info("Scan complete");
        Ok(())
    }

    fn connect(&mut self, address: PeerAddress, reply: &mut Reply) -> Result<()> {
        self.ensure_radio()?;
        let handle = self
            .registry
            .connect(&mut self.radio, address, self.events.sender())?;
        reply.info(format!("Connected to device: {address}"));
        reply.info(format!("Client ID: {handle}"));
        Ok(())
    }

    fn disconnect(&mut self, target: Target, reply: &mut Reply) -> Result<()> {
        let handle = self.resolve_target(target, usage::DISCONNECT)?;
        if self.registry.disconnect(&mut self.radio, handle)? {
            reply.info(format!("Disconnected client {handle}"));
        } else {
            reply.info(format!("Client {handle} already disconnected"));
        }
        Ok(())
    }

    fn list(&self, reply: &mut Reply) {
        let mut any = false;
        for conn in self.registry.list() {
            any = true;
            let status = if conn.is_live() { "connected" } else { "disconnected" };
            reply.info(format!("{}: {} ({status})", conn.handle(), conn.address()));
        }
        if !any {
            reply.info("No clients.");
        }
    }

    fn discover(&mut self, target: Target, reply: &mut Reply) -> Result<()> {
        let handle = self.resolve_target(target, usage::DISCOVER)?;
        let session = self.registry.live(handle)?.session();
        let services = self.radio.services(session)?;
        if services.is_empty() {
            reply.info("No services found.");
            return Ok(());
        }
        for service in services {
            reply.info(format!("Service: {}", service.uuid));
            for characteristic in self.radio.characteristics(service.service)? {
                reply.info(format!("  Characteristic: {}", characteristic.uuid));
            }
        }
        reply.info("Service discovery complete.");
        Ok(())
    }

    // ── Bindings ──────────────────────────────────────────────

    fn set_service(
        &mut self,
        target: Target,
        direction: Direction,
        uuid: &UuidArg,
        reply: &mut Reply,
    ) -> Result<()> {
        let usage = match direction {
            Direction::Read => usage::SET_SERVICE,
            Direction::Write => usage::SET_WRITE_SERVICE,
        };
        let handle = self.resolve_target(target, usage)?;
        let prefix = direction_prefix(direction);
        reply.info(format!("{prefix}Service UUID set to: {}", uuid.text));

        let outcome = Resolver::new(&mut self.registry, &mut self.radio).set_service_uuid(
            handle,
            direction,
            uuid.uuid,
        );
        match outcome {
            Ok(Resolution::Deferred) => {
                reply.info("Client not connected. Resolution deferred.");
                Ok(())
            }
            Ok(Resolution::ServiceOnly(_)) => {
                reply.info(format!("{prefix}Service pointer acquired."));
                Ok(())
            }
            Ok(Resolution::Complete(..)) => {
                reply.info(format!("{prefix}Service pointer acquired."));
                reply.info(format!("{prefix}Characteristic pointer acquired."));
                Ok(())
            }
            Err(e @ GatewayError::CharacteristicNotFound(_)) => {
                reply.info(format!("{prefix}Service pointer acquired."));
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn set_characteristic(
        &mut self,
        target: Target,
        direction: Direction,
        uuid: &UuidArg,
        reply: &mut Reply,
    ) -> Result<()> {
        let usage = match direction {
            Direction::Read => usage::SET_CHAR,
            Direction::Write => usage::SET_WRITE_CHAR,
        };
        let handle = self.resolve_target(target, usage)?;
        let prefix = direction_prefix(direction);
        reply.info(format!("{prefix}Characteristic UUID set to: {}", uuid.text));

        let outcome = Resolver::new(&mut self.registry, &mut self.radio)
            .set_characteristic_uuid(handle, direction, uuid.uuid)?;
        if outcome == Resolution::Deferred {
            reply.info("Client not connected. Resolution deferred.");
        } else {
            reply.info(format!("{prefix}Characteristic pointer acquired."));
        }
        Ok(())
    }

    // ── Data path ─────────────────────────────────────────────

    fn read(&mut self, target: Target, reply: &mut Reply) -> Result<()> {
        let handle = self.resolve_target(target, usage::READ)?;
        let value = Resolver::new(&mut self.registry, &mut self.radio).read_via_binding(handle)?;
        if !value.is_empty() {
            reply.info(hex_bytes(&value));
        }
        Ok(())
    }

    fn read_explicit(
        &mut self,
        target: Target,
        service: BleUuid,
        characteristic: BleUuid,
        reply: &mut Reply,
    ) -> Result<()> {
        let handle = self.resolve_target(target, usage::READ)?;
        let value = Resolver::new(&mut self.registry, &mut self.radio).read_via_explicit_uuids(
            handle,
            service,
            characteristic,
        )?;
        if !value.is_empty() {
            reply.info(hex_bytes(&value));
        }
        Ok(())
    }

    fn write(&mut self, handle: ConnectionHandle, data: &[u8]) -> Result<()> {
        Resolver::new(&mut self.registry, &mut self.radio).write_via_binding(handle, data)
    }

    fn notify(&mut self, target: Target, enable: bool, reply: &mut Reply) -> Result<()> {
        let usage = if enable { usage::NOTIFY } else { usage::NOTIFY_OFF };
        let handle = self.resolve_target(target, usage)?;
        let mut router = Router::new(&mut self.registry, &mut self.radio);
        if enable {
            router.enable(handle, self.events.sender())?;
            reply.info("Notifications enabled");
        } else {
            router.disable(handle)?;
            reply.info("Notifications disabled");
        }
        Ok(())
    }

    fn resolve_target(&self, target: Target, usage: &'static str) -> Result<ConnectionHandle> {
        match target {
            Target::Handle(handle) if self.registry.was_issued(handle) => Ok(handle),
            Target::Handle(_) => Err(GatewayError::UnknownHandle),
            Target::Implicit => self.registry.implicit_handle(usage),
        }
    }
}

fn direction_prefix(direction: Direction) -> &'static str {
    match direction {
        Direction::Read => "",
        Direction::Write => "Write ",
    }
}

/// Substring match on the advertised name; unnamed devices only pass an
/// empty filter.
fn name_matches(result: &ScanResult, filter: &str) -> bool {
    if filter.is_empty() {
        return true;
    }
    result.name.as_deref().is_some_and(|name| name.contains(filter))
}

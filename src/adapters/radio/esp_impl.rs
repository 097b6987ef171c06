//! Bluedroid implementation of [`RadioPort`].
//!
//! Compiled only for `target_os = "espidf"`.  Bluedroid is callback driven:
//! every GAP/GATTC/GATTS event arrives on the Bluedroid task.  The
//! callbacks only record results into [`SHARED`] and wake the caller
//! through [`SIGNAL`]; the blocking [`RadioPort`] methods issue a request
//! and wait (bounded) for the matching completion.  Notifications and link
//! loss are the exception: they are posted straight into the gateway's
//! event channel from the callback.
//!
//! Peripheral (server) mode registers one GATTS application with the
//! configured service and a read/write characteristic, as the AT firmware
//! always has.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use esp_idf_svc::sys::*;

use crate::app::ports::{
    CharRef, RadioError, RadioEvent, RadioPort, RadioSettings, RemoteCharacteristic,
    RemoteService, ScanResult, ServiceRef, SessionId,
};
use crate::channels::{EventSender, post};
use crate::config::MAX_ATTR_LEN;
use crate::gatt::{BleUuid, PeerAddress};

/// GATTC application id (the GATTS app uses 0).
const GATTC_APP_ID: u16 = 1;
const GATTS_APP_ID: u16 = 0;

/// Upper bound for one GATT round trip.
const GATT_TIMEOUT: Duration = Duration::from_secs(5);
/// Link establishment (direct connect) timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client Characteristic Configuration descriptor.
const CCCD_UUID: u16 = 0x2902;

// ───────────────────────────────────────────────────────────────
// Callback ↔ caller shared state
// ───────────────────────────────────────────────────────────────

/// One discovered primary service, as reported by `SEARCH_RES`.
#[derive(Clone, Copy)]
struct FoundService {
    uuid: BleUuid,
    start: u16,
    end: u16,
}

/// Completion slots written by the callbacks.  Each blocking call clears
/// its slot, issues the request, then waits for the slot to fill.
struct Shared {
    gattc_if: Option<esp_gatt_if_t>,
    gatts_if: Option<esp_gatt_if_t>,

    scan_params_set: bool,
    scan_done: bool,
    scan_results: Vec<ScanResult>,
    /// Address type seen while scanning, needed to open a link.
    addr_types: BTreeMap<[u8; 6], esp_ble_addr_type_t>,

    opened: Option<Result<u16, u16>>,
    search: Vec<FoundService>,
    search_done: Option<u16>,
    read: Option<Result<Vec<u8>, u16>>,
    write_done: Option<u16>,
    descr_written: Option<u16>,
    notify_registered: Option<u16>,

    /// conn_id → link owner, for link-loss reporting.
    links: BTreeMap<u16, (SessionId, EventSender)>,
    /// (conn_id, attribute handle) → subscribed characteristic.
    routes: BTreeMap<(u16, u16), (CharRef, EventSender)>,

    server_service: Option<u16>,
    server_char: Option<u16>,
    server_uuids: Option<(BleUuid, BleUuid)>,
    server_value: Vec<u8>,
}

impl Shared {
    const fn new() -> Self {
        Self {
            gattc_if: None,
            gatts_if: None,
            scan_params_set: false,
            scan_done: false,
            scan_results: Vec::new(),
            addr_types: BTreeMap::new(),
            opened: None,
            search: Vec::new(),
            search_done: None,
            read: None,
            write_done: None,
            descr_written: None,
            notify_registered: None,
            links: BTreeMap::new(),
            routes: BTreeMap::new(),
            server_service: None,
            server_char: None,
            server_uuids: None,
            server_value: Vec::new(),
        }
    }
}

// Bluedroid callbacks run on the Bluedroid task, not in ISR context, so a
// std Mutex is fine here.
static SHARED: Mutex<Shared> = Mutex::new(Shared::new());
static SIGNAL: Condvar = Condvar::new();

fn shared() -> Result<MutexGuard<'static, Shared>, RadioError> {
    SHARED.lock().map_err(|_| RadioError::Stack("radio state poisoned"))
}

/// Mutate shared state from a callback and wake any waiter.
fn update(f: impl FnOnce(&mut Shared)) {
    if let Ok(mut s) = SHARED.lock() {
        f(&mut s);
    }
    SIGNAL.notify_all();
}

/// Block until `take` yields a value or `timeout` elapses.
fn wait_for<T>(
    timeout: Duration,
    mut take: impl FnMut(&mut Shared) -> Option<T>,
) -> Result<T, RadioError> {
    let deadline = Instant::now() + timeout;
    let mut guard = shared()?;
    loop {
        if let Some(v) = take(&mut guard) {
            return Ok(v);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(RadioError::Timeout);
        }
        let (g, _) = SIGNAL
            .wait_timeout(guard, deadline - now)
            .map_err(|_| RadioError::Stack("radio state poisoned"))?;
        guard = g;
    }
}

fn esp_check(ret: esp_err_t, what: &'static str) -> Result<(), RadioError> {
    if ret == ESP_OK as esp_err_t {
        Ok(())
    } else {
        error!("BLE(espidf): {what} failed ({ret})");
        Err(RadioError::Stack(what))
    }
}

fn gatt_check(status: u16) -> Result<(), RadioError> {
    if status == esp_gatt_status_t_ESP_GATT_OK as u16 {
        Ok(())
    } else {
        Err(RadioError::Gatt(status))
    }
}

// ───────────────────────────────────────────────────────────────
// UUID conversion
// ───────────────────────────────────────────────────────────────

fn uuid_to_esp(uuid: BleUuid) -> esp_bt_uuid_t {
    let mut t: esp_bt_uuid_t = unsafe { core::mem::zeroed() };
    match uuid.as_u16() {
        Some(short) => {
            t.len = 2;
            t.uuid.uuid16 = short;
        }
        None => {
            t.len = 16;
            t.uuid.uuid128 = uuid.as_u128().to_le_bytes();
        }
    }
    t
}

fn uuid_from_esp(t: &esp_bt_uuid_t) -> BleUuid {
    // SAFETY: `len` selects the active union member.
    unsafe {
        match t.len {
            2 => BleUuid::from_u16(t.uuid.uuid16),
            4 => BleUuid::from_u32(t.uuid.uuid32),
            _ => BleUuid::from_u128(u128::from_le_bytes(t.uuid.uuid128)),
        }
    }
}

/// Pull the advertised name out of an advertising + scan-response blob.
fn adv_name(adv: &mut [u8]) -> Option<String> {
    let mut len: u8 = 0;
    for ty in [
        esp_ble_adv_data_type_ESP_BLE_AD_TYPE_NAME_CMPL,
        esp_ble_adv_data_type_ESP_BLE_AD_TYPE_NAME_SHORT,
    ] {
        // SAFETY: `adv` is the 62-byte report buffer owned by the event.
        let p = unsafe { esp_ble_resolve_adv_data(adv.as_mut_ptr(), ty as u8, &mut len) };
        if !p.is_null() && len > 0 {
            let bytes = unsafe { core::slice::from_raw_parts(p, len as usize) };
            return Some(String::from_utf8_lossy(bytes).into_owned());
        }
    }
    None
}

fn adv_service_uuid(adv: &mut [u8]) -> Option<BleUuid> {
    let mut len: u8 = 0;
    let types = [
        esp_ble_adv_data_type_ESP_BLE_AD_TYPE_128SRV_CMPL,
        esp_ble_adv_data_type_ESP_BLE_AD_TYPE_128SRV_PART,
        esp_ble_adv_data_type_ESP_BLE_AD_TYPE_16SRV_CMPL,
        esp_ble_adv_data_type_ESP_BLE_AD_TYPE_16SRV_PART,
    ];
    for ty in types {
        let p = unsafe { esp_ble_resolve_adv_data(adv.as_mut_ptr(), ty as u8, &mut len) };
        if p.is_null() {
            continue;
        }
        let bytes = unsafe { core::slice::from_raw_parts(p, len as usize) };
        match bytes.len() {
            16.. => {
                let mut raw = [0u8; 16];
                raw.copy_from_slice(&bytes[..16]);
                return Some(BleUuid::from_u128(u128::from_le_bytes(raw)));
            }
            2..=15 => return Some(BleUuid::from_u16(u16::from_le_bytes([bytes[0], bytes[1]]))),
            _ => {}
        }
    }
    None
}

// ───────────────────────────────────────────────────────────────
// Bluedroid callbacks
// ───────────────────────────────────────────────────────────────

unsafe extern "C" fn gap_event_handler(
    event: esp_gap_ble_cb_event_t,
    param: *mut esp_ble_gap_cb_param_t,
) {
    match event {
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_SCAN_PARAM_SET_COMPLETE_EVT => {
            update(|s| s.scan_params_set = true);
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_SCAN_RESULT_EVT => {
            let r = unsafe { &mut (*param).scan_rst };
            match r.search_evt {
                esp_gap_search_evt_t_ESP_GAP_SEARCH_INQ_RES_EVT => {
                    let name = adv_name(&mut r.ble_adv);
                    let service_uuid = adv_service_uuid(&mut r.ble_adv);
                    let result = ScanResult {
                        address: PeerAddress::new(r.bda),
                        rssi: r.rssi as i16,
                        name,
                        service_uuid,
                    };
                    let addr_type = r.ble_addr_type;
                    update(|s| {
                        s.addr_types.insert(r.bda, addr_type);
                        // Scan responses repeat the advertiser; keep the richest report.
                        match s.scan_results.iter_mut().find(|x| x.address == result.address) {
                            Some(existing) => {
                                if existing.name.is_none() {
                                    existing.name = result.name;
                                }
                                if existing.service_uuid.is_none() {
                                    existing.service_uuid = result.service_uuid;
                                }
                            }
                            None => s.scan_results.push(result),
                        }
                    });
                }
                esp_gap_search_evt_t_ESP_GAP_SEARCH_INQ_CMPL_EVT => {
                    update(|s| s.scan_done = true);
                }
                _ => {}
            }
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
            info!("BLE(espidf): advertising started");
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT => {
            info!("BLE(espidf): advertising stopped");
        }
        _ => {}
    }
}

unsafe extern "C" fn gattc_event_handler(
    event: esp_gattc_cb_event_t,
    gattc_if: esp_gatt_if_t,
    param: *mut esp_ble_gattc_cb_param_t,
) {
    match event {
        esp_gattc_cb_event_t_ESP_GATTC_REG_EVT => {
            info!("BLE(espidf): GATTC registered (if={gattc_if})");
            update(|s| s.gattc_if = Some(gattc_if));
        }
        esp_gattc_cb_event_t_ESP_GATTC_OPEN_EVT => {
            let p = unsafe { &(*param).open };
            let outcome = if p.status == esp_gatt_status_t_ESP_GATT_OK {
                Ok(p.conn_id)
            } else {
                Err(p.status as u16)
            };
            update(|s| s.opened = Some(outcome));
        }
        esp_gattc_cb_event_t_ESP_GATTC_DISCONNECT_EVT => {
            let p = unsafe { &(*param).disconnect };
            let conn_id = p.conn_id;
            info!("BLE(espidf): conn {conn_id} down (reason=0x{:x})", p.reason);
            update(|s| {
                s.routes.retain(|(c, _), _| *c != conn_id);
                if let Some((session, events)) = s.links.remove(&conn_id) {
                    post(&events, RadioEvent::LinkLost { session });
                }
            });
        }
        esp_gattc_cb_event_t_ESP_GATTC_SEARCH_RES_EVT => {
            let p = unsafe { &(*param).search_res };
            let found = FoundService {
                uuid: uuid_from_esp(&p.srvc_id.uuid),
                start: p.start_handle,
                end: p.end_handle,
            };
            update(|s| s.search.push(found));
        }
        esp_gattc_cb_event_t_ESP_GATTC_SEARCH_CMPL_EVT => {
            let status = unsafe { (*param).search_cmpl.status } as u16;
            update(|s| s.search_done = Some(status));
        }
        esp_gattc_cb_event_t_ESP_GATTC_READ_CHAR_EVT => {
            let p = unsafe { &(*param).read };
            let outcome = if p.status == esp_gatt_status_t_ESP_GATT_OK {
                let data = if p.value.is_null() {
                    Vec::new()
                } else {
                    unsafe { core::slice::from_raw_parts(p.value, p.value_len as usize) }.to_vec()
                };
                Ok(data)
            } else {
                Err(p.status as u16)
            };
            update(|s| s.read = Some(outcome));
        }
        esp_gattc_cb_event_t_ESP_GATTC_WRITE_CHAR_EVT => {
            let status = unsafe { (*param).write.status } as u16;
            update(|s| s.write_done = Some(status));
        }
        esp_gattc_cb_event_t_ESP_GATTC_WRITE_DESCR_EVT => {
            let status = unsafe { (*param).write.status } as u16;
            update(|s| s.descr_written = Some(status));
        }
        esp_gattc_cb_event_t_ESP_GATTC_REG_FOR_NOTIFY_EVT => {
            let status = unsafe { (*param).reg_for_notify.status } as u16;
            update(|s| s.notify_registered = Some(status));
        }
        esp_gattc_cb_event_t_ESP_GATTC_NOTIFY_EVT => {
            let p = unsafe { &(*param).notify };
            let len = (p.value_len as usize).min(MAX_ATTR_LEN);
            let data = if p.value.is_null() {
                &[][..]
            } else {
                unsafe { core::slice::from_raw_parts(p.value, len) }
            };
            let Ok(payload) = heapless::Vec::<u8, MAX_ATTR_LEN>::from_slice(data) else {
                return;
            };
            let key = (p.conn_id, p.handle);
            if let Ok(s) = SHARED.lock() {
                match s.routes.get(&key) {
                    Some((characteristic, events)) => {
                        post(
                            events,
                            RadioEvent::Notification {
                                characteristic: *characteristic,
                                payload,
                            },
                        );
                    }
                    None => debug!("BLE(espidf): notify for unsubscribed {key:?}"),
                }
            }
        }
        _ => {}
    }
}

unsafe extern "C" fn gatts_event_handler(
    event: esp_gatts_cb_event_t,
    gatts_if: esp_gatt_if_t,
    param: *mut esp_ble_gatts_cb_param_t,
) {
    match event {
        esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
            info!("BLE(espidf): GATTS registered (if={gatts_if})");
            let uuids = SHARED.lock().ok().and_then(|s| s.server_uuids);
            update(|s| s.gatts_if = Some(gatts_if));
            let Some((service, _)) = uuids else {
                return;
            };
            let mut svc_id = esp_gatt_srvc_id_t {
                id: esp_gatt_id_t {
                    uuid: uuid_to_esp(service),
                    inst_id: 0,
                },
                is_primary: true,
            };
            unsafe {
                esp_ble_gatts_create_service(gatts_if, &mut svc_id, 4);
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
            let svc_handle = unsafe { (*param).create.service_handle };
            let Ok(s) = SHARED.lock() else {
                return;
            };
            let Some((_, characteristic)) = s.server_uuids else {
                return;
            };
            let mut value = s.server_value.clone();
            drop(s);
            update(|s| s.server_service = Some(svc_handle));

            let mut char_uuid = uuid_to_esp(characteristic);
            let mut attr = esp_attr_value_t {
                attr_max_len: MAX_ATTR_LEN as u16,
                attr_len: value.len() as u16,
                attr_value: value.as_mut_ptr(),
            };
            unsafe {
                esp_ble_gatts_start_service(svc_handle);
                esp_ble_gatts_add_char(
                    svc_handle,
                    &mut char_uuid,
                    (ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE) as esp_gatt_perm_t,
                    (ESP_GATT_CHAR_PROP_BIT_READ | ESP_GATT_CHAR_PROP_BIT_WRITE)
                        as esp_gatt_char_prop_t,
                    &mut attr,
                    core::ptr::null_mut(),
                );
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
            let handle = unsafe { (*param).add_char.attr_handle };
            info!("BLE(espidf): server characteristic (handle={handle})");
            update(|s| s.server_char = Some(handle));
        }
        esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
            let p = unsafe { &(*param).write };
            let data = unsafe { core::slice::from_raw_parts(p.value, p.len as usize) }.to_vec();
            debug!("BLE(espidf): server characteristic written ({} bytes)", data.len());
            update(|s| {
                if s.server_char == Some(p.handle) {
                    s.server_value = data;
                }
            });
        }
        _ => {}
    }
}

// ───────────────────────────────────────────────────────────────
// Reference arena
// ───────────────────────────────────────────────────────────────

struct Link {
    conn_id: u16,
    address: PeerAddress,
    /// Filled by the first `services` call.
    services: Option<Vec<ServiceRef>>,
}

struct ServiceEntry {
    session: SessionId,
    uuid: BleUuid,
    start: u16,
    end: u16,
    characteristics: Option<Vec<CharRef>>,
}

struct CharEntry {
    session: SessionId,
    uuid: BleUuid,
    handle: u16,
}

// ───────────────────────────────────────────────────────────────
// BluedroidRadio
// ───────────────────────────────────────────────────────────────

/// The ESP32's own BLE controller driven through Bluedroid.
#[derive(Default)]
pub struct BluedroidRadio {
    device_name: String,
    initialized: bool,
    sessions: BTreeMap<SessionId, Link>,
    services: HashMap<ServiceRef, ServiceEntry>,
    characteristics: HashMap<CharRef, CharEntry>,
    next_session: u32,
    next_ref: u32,
}

impl BluedroidRadio {
    pub fn new() -> Self {
        Self::default()
    }

    fn gattc_if(&self) -> Result<esp_gatt_if_t, RadioError> {
        if !self.initialized {
            return Err(RadioError::NotInitialized);
        }
        shared()?.gattc_if.ok_or(RadioError::NotInitialized)
    }

    fn alloc_ref(&mut self) -> u32 {
        self.next_ref += 1;
        self.next_ref
    }

    fn link(&self, session: SessionId) -> Result<&Link, RadioError> {
        self.sessions.get(&session).ok_or(RadioError::NotConnected)
    }

    fn char_entry(&self, characteristic: CharRef) -> Result<(u16, PeerAddress, u16), RadioError> {
        let entry = self
            .characteristics
            .get(&characteristic)
            .ok_or(RadioError::NotConnected)?;
        let link = self.link(entry.session)?;
        Ok((link.conn_id, link.address, entry.handle))
    }

    /// Drop every reference issued under `session`.
    fn release(&mut self, session: SessionId) -> Option<Link> {
        let link = self.sessions.remove(&session)?;
        self.services.retain(|_, s| s.session != session);
        self.characteristics.retain(|_, c| c.session != session);
        Some(link)
    }

    fn write_cccd(
        &self,
        gattc_if: esp_gatt_if_t,
        conn_id: u16,
        char_handle: u16,
        value: [u8; 2],
    ) -> Result<(), RadioError> {
        let descr_uuid = uuid_to_esp(BleUuid::from_u16(CCCD_UUID));
        let mut descr: esp_gattc_descr_elem_t = unsafe { core::mem::zeroed() };
        let mut count: u16 = 1;
        let status = unsafe {
            esp_ble_gattc_get_descr_by_char_handle(
                gattc_if,
                conn_id,
                char_handle,
                descr_uuid,
                &mut descr,
                &mut count,
            )
        };
        if status != esp_gatt_status_t_ESP_GATT_OK || count == 0 {
            // Some peers notify without a CCCD; registration alone suffices.
            debug!("BLE(espidf): no CCCD for handle {char_handle}");
            return Ok(());
        }

        shared()?.descr_written = None;
        let mut value = value;
        esp_check(
            unsafe {
                esp_ble_gattc_write_char_descr(
                    gattc_if,
                    conn_id,
                    descr.handle,
                    value.len() as u16,
                    value.as_mut_ptr(),
                    esp_gatt_write_type_t_ESP_GATT_WRITE_TYPE_RSP,
                    esp_gatt_auth_req_t_ESP_GATT_AUTH_REQ_NONE,
                )
            },
            "gattc_write_char_descr",
        )?;
        gatt_check(wait_for(GATT_TIMEOUT, |s| s.descr_written.take())?)
    }
}

impl RadioPort for BluedroidRadio {
    fn init(&mut self, settings: &RadioSettings) -> Result<(), RadioError> {
        {
            let mut s = shared()?;
            *s = Shared::new();
            s.server_uuids = Some((settings.service_uuid, settings.characteristic_uuid));
            s.server_value.clone_from(&settings.initial_value);
        }
        self.device_name.clone_from(&settings.device_name);

        unsafe {
            // BLE only; classic BT memory goes back to the heap.
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

            let mut bt_cfg = esp_bt_controller_config_t::default();
            esp_check(esp_bt_controller_init(&mut bt_cfg), "bt_controller_init")?;
            esp_check(
                esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE),
                "bt_controller_enable",
            )?;
            esp_check(esp_bluedroid_init(), "bluedroid_init")?;
            esp_check(esp_bluedroid_enable(), "bluedroid_enable")?;

            esp_check(
                esp_ble_gap_register_callback(Some(gap_event_handler)),
                "gap_register_callback",
            )?;
            esp_check(
                esp_ble_gattc_register_callback(Some(gattc_event_handler)),
                "gattc_register_callback",
            )?;
            esp_check(
                esp_ble_gatts_register_callback(Some(gatts_event_handler)),
                "gatts_register_callback",
            )?;
            esp_check(esp_ble_gattc_app_register(GATTC_APP_ID), "gattc_app_register")?;
            esp_check(esp_ble_gatts_app_register(GATTS_APP_ID), "gatts_app_register")?;

            let mut name = self.device_name.clone().into_bytes();
            name.push(0);
            esp_ble_gap_set_device_name(name.as_ptr() as *const _);
        }

        wait_for(GATT_TIMEOUT, |s| s.gattc_if)?;
        self.initialized = true;
        info!("BLE(espidf): Bluedroid up as '{}'", self.device_name);
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), RadioError> {
        let sessions: Vec<SessionId> = self.sessions.keys().copied().collect();
        for session in sessions {
            self.disconnect(session);
        }
        unsafe {
            esp_ble_gap_stop_advertising();
            esp_bluedroid_disable();
            esp_bluedroid_deinit();
            esp_bt_controller_disable();
            esp_bt_controller_deinit();
        }
        update(|s| *s = Shared::new());
        self.initialized = false;
        info!("BLE(espidf): stack shut down");
        Ok(())
    }

    fn start_advertising(&mut self) -> Result<(), RadioError> {
        if !self.initialized {
            return Err(RadioError::NotInitialized);
        }
        let mut adv_params = esp_ble_adv_params_t {
            adv_int_min: 0x20,
            adv_int_max: 0x40,
            adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
            own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
            channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
            adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
            ..unsafe { core::mem::zeroed() }
        };
        esp_check(
            unsafe { esp_ble_gap_start_advertising(&mut adv_params) },
            "gap_start_advertising",
        )
    }

    fn stop_advertising(&mut self) -> Result<(), RadioError> {
        if !self.initialized {
            return Err(RadioError::NotInitialized);
        }
        esp_check(unsafe { esp_ble_gap_stop_advertising() }, "gap_stop_advertising")
    }

    fn scan(
        &mut self,
        duration_secs: u32,
        name_filter: Option<&str>,
    ) -> Result<Vec<ScanResult>, RadioError> {
        self.gattc_if()?;
        {
            let mut s = shared()?;
            s.scan_params_set = false;
            s.scan_done = false;
            s.scan_results.clear();
        }

        let mut params = esp_ble_scan_params_t {
            scan_type: esp_ble_scan_type_t_BLE_SCAN_TYPE_ACTIVE,
            own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
            scan_filter_policy: esp_ble_scan_filter_t_BLE_SCAN_FILTER_ALLOW_ALL,
            scan_interval: 0x50,
            scan_window: 0x30,
            scan_duplicate: esp_ble_scan_duplicate_t_BLE_SCAN_DUPLICATE_DISABLE,
        };
        esp_check(
            unsafe { esp_ble_gap_set_scan_params(&mut params) },
            "gap_set_scan_params",
        )?;
        wait_for(GATT_TIMEOUT, |s| s.scan_params_set.then_some(()))?;

        esp_check(
            unsafe { esp_ble_gap_start_scanning(duration_secs) },
            "gap_start_scanning",
        )?;
        let limit = Duration::from_secs(u64::from(duration_secs)) + GATT_TIMEOUT;
        wait_for(limit, |s| s.scan_done.then_some(()))?;

        let mut results = core::mem::take(&mut shared()?.scan_results);
        if let Some(filter) = name_filter {
            results.retain(|r| r.name.as_deref().is_some_and(|n| n.contains(filter)));
        }
        debug!("BLE(espidf): scan found {} device(s)", results.len());
        Ok(results)
    }

    fn connect(
        &mut self,
        address: PeerAddress,
        events: EventSender,
    ) -> Result<SessionId, RadioError> {
        let gattc_if = self.gattc_if()?;
        let mut bda = address.bytes();
        let addr_type = {
            let mut s = shared()?;
            s.opened = None;
            s.addr_types
                .get(&bda)
                .copied()
                .unwrap_or(esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC)
        };

        esp_check(
            unsafe { esp_ble_gattc_open(gattc_if, bda.as_mut_ptr(), addr_type, true) },
            "gattc_open",
        )?;
        let conn_id = match wait_for(CONNECT_TIMEOUT, |s| s.opened.take()) {
            Ok(Ok(conn_id)) => conn_id,
            Ok(Err(status)) => {
                warn!("BLE(espidf): open {address} failed (status 0x{status:x})");
                return Err(RadioError::ConnectFailed);
            }
            Err(RadioError::Timeout) => return Err(RadioError::ConnectFailed),
            Err(e) => return Err(e),
        };

        self.next_session += 1;
        let session = SessionId(self.next_session);
        shared()?.links.insert(conn_id, (session, events));
        self.sessions.insert(
            session,
            Link {
                conn_id,
                address,
                services: None,
            },
        );
        info!("BLE(espidf): {address} open as conn {conn_id} ({session:?})");
        Ok(session)
    }

    fn disconnect(&mut self, session: SessionId) {
        let Some(link) = self.release(session) else {
            return;
        };
        // A link the stack already reported down is only forgotten locally.
        let open = shared().is_ok_and(|mut s| {
            s.routes.retain(|(c, _), _| *c != link.conn_id);
            s.links.remove(&link.conn_id).is_some()
        });
        if open {
            if let Ok(gattc_if) = self.gattc_if() {
                unsafe {
                    esp_ble_gattc_close(gattc_if, link.conn_id);
                }
            }
        }
        info!("BLE(espidf): {session:?} closed");
    }

    fn services(&mut self, session: SessionId) -> Result<Vec<RemoteService>, RadioError> {
        let gattc_if = self.gattc_if()?;
        let link = self.link(session)?;
        if let Some(refs) = &link.services {
            return Ok(refs
                .iter()
                .filter_map(|r| {
                    self.services.get(r).map(|e| RemoteService {
                        uuid: e.uuid,
                        service: *r,
                    })
                })
                .collect());
        }

        let conn_id = link.conn_id;
        {
            let mut s = shared()?;
            s.search.clear();
            s.search_done = None;
        }
        esp_check(
            unsafe { esp_ble_gattc_search_service(gattc_if, conn_id, core::ptr::null_mut()) },
            "gattc_search_service",
        )?;
        gatt_check(wait_for(GATT_TIMEOUT, |s| s.search_done.take())?)?;
        let found = core::mem::take(&mut shared()?.search);

        let mut refs = Vec::with_capacity(found.len());
        let mut out = Vec::with_capacity(found.len());
        for f in found {
            let service = ServiceRef(self.alloc_ref());
            self.services.insert(
                service,
                ServiceEntry {
                    session,
                    uuid: f.uuid,
                    start: f.start,
                    end: f.end,
                    characteristics: None,
                },
            );
            refs.push(service);
            out.push(RemoteService {
                uuid: f.uuid,
                service,
            });
        }
        if let Some(link) = self.sessions.get_mut(&session) {
            link.services = Some(refs);
        }
        Ok(out)
    }

    fn characteristics(
        &mut self,
        service: ServiceRef,
    ) -> Result<Vec<RemoteCharacteristic>, RadioError> {
        let gattc_if = self.gattc_if()?;
        let entry = self.services.get(&service).ok_or(RadioError::NotConnected)?;
        if let Some(refs) = &entry.characteristics {
            return Ok(refs
                .iter()
                .filter_map(|r| {
                    self.characteristics.get(r).map(|c| RemoteCharacteristic {
                        uuid: c.uuid,
                        characteristic: *r,
                    })
                })
                .collect());
        }
        let (session, start, end) = (entry.session, entry.start, entry.end);
        let conn_id = self.link(session)?.conn_id;

        let mut count: u16 = 0;
        let status = unsafe {
            esp_ble_gattc_get_attr_count(
                gattc_if,
                conn_id,
                esp_gatt_db_attr_type_t_ESP_GATT_DB_CHARACTERISTIC,
                start,
                end,
                0,
                &mut count,
            )
        };
        gatt_check(status as u16)?;

        let mut elems: Vec<esp_gattc_char_elem_t> =
            vec![unsafe { core::mem::zeroed() }; count as usize];
        if count > 0 {
            let status = unsafe {
                esp_ble_gattc_get_all_char(
                    gattc_if,
                    conn_id,
                    start,
                    end,
                    elems.as_mut_ptr(),
                    &mut count,
                    0,
                )
            };
            gatt_check(status as u16)?;
            elems.truncate(count as usize);
        }

        let mut refs = Vec::with_capacity(elems.len());
        let mut out = Vec::with_capacity(elems.len());
        for e in &elems {
            let characteristic = CharRef(self.alloc_ref());
            let uuid = uuid_from_esp(&e.uuid);
            self.characteristics.insert(
                characteristic,
                CharEntry {
                    session,
                    uuid,
                    handle: e.char_handle,
                },
            );
            refs.push(characteristic);
            out.push(RemoteCharacteristic {
                uuid,
                characteristic,
            });
        }
        if let Some(entry) = self.services.get_mut(&service) {
            entry.characteristics = Some(refs);
        }
        Ok(out)
    }

    fn read(&mut self, characteristic: CharRef) -> Result<Vec<u8>, RadioError> {
        let gattc_if = self.gattc_if()?;
        let (conn_id, _, handle) = self.char_entry(characteristic)?;
        shared()?.read = None;
        esp_check(
            unsafe {
                esp_ble_gattc_read_char(
                    gattc_if,
                    conn_id,
                    handle,
                    esp_gatt_auth_req_t_ESP_GATT_AUTH_REQ_NONE,
                )
            },
            "gattc_read_char",
        )?;
        wait_for(GATT_TIMEOUT, |s| s.read.take())?.map_err(RadioError::Gatt)
    }

    fn write(&mut self, characteristic: CharRef, data: &[u8]) -> Result<(), RadioError> {
        let gattc_if = self.gattc_if()?;
        let (conn_id, _, handle) = self.char_entry(characteristic)?;
        let mut value = data.to_vec();
        shared()?.write_done = None;
        esp_check(
            unsafe {
                esp_ble_gattc_write_char(
                    gattc_if,
                    conn_id,
                    handle,
                    value.len() as u16,
                    value.as_mut_ptr(),
                    esp_gatt_write_type_t_ESP_GATT_WRITE_TYPE_RSP,
                    esp_gatt_auth_req_t_ESP_GATT_AUTH_REQ_NONE,
                )
            },
            "gattc_write_char",
        )?;
        gatt_check(wait_for(GATT_TIMEOUT, |s| s.write_done.take())?)
    }

    fn subscribe(
        &mut self,
        characteristic: CharRef,
        events: EventSender,
    ) -> Result<(), RadioError> {
        let gattc_if = self.gattc_if()?;
        let (conn_id, address, handle) = self.char_entry(characteristic)?;
        let mut bda = address.bytes();

        shared()?.notify_registered = None;
        esp_check(
            unsafe { esp_ble_gattc_register_for_notify(gattc_if, bda.as_mut_ptr(), handle) },
            "gattc_register_for_notify",
        )?;
        gatt_check(wait_for(GATT_TIMEOUT, |s| s.notify_registered.take())?)?;
        self.write_cccd(gattc_if, conn_id, handle, [0x01, 0x00])?;

        shared()?
            .routes
            .insert((conn_id, handle), (characteristic, events));
        Ok(())
    }

    fn unsubscribe(&mut self, characteristic: CharRef) -> Result<(), RadioError> {
        let gattc_if = self.gattc_if()?;
        let (conn_id, address, handle) = self.char_entry(characteristic)?;
        let mut bda = address.bytes();

        shared()?.routes.remove(&(conn_id, handle));
        esp_check(
            unsafe { esp_ble_gattc_unregister_for_notify(gattc_if, bda.as_mut_ptr(), handle) },
            "gattc_unregister_for_notify",
        )?;
        self.write_cccd(gattc_if, conn_id, handle, [0x00, 0x00])
    }
}

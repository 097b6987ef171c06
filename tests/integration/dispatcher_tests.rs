//! The AT surface end to end: grammar errors, radio lifecycle, scanning,
//! discovery and the implicit single-client forms.

use bleat::adapters::radio::{SimPeripheral, SimRadio};
use bleat::app::ports::RadioError;
use bleat::app::service::Gateway;
use bleat::channels::leak_channel;
use bleat::config::{FIRMWARE_VERSION, GatewayConfig};

use super::fixtures::{
    PEER_A, PEER_B, PEER_C, SimGateway, addr, connect_bound, gateway, gateway_with, ok, run,
    sensor_peer, uuid,
};

fn cold_gateway(config: GatewayConfig) -> SimGateway {
    let radio = SimRadio::new().with_peer(sensor_peer(PEER_A));
    Gateway::new(radio, config, leak_channel())
}

#[test]
fn attention_and_version() {
    let mut gw = gateway();
    assert_eq!(run(&mut gw, "AT"), vec!["OK"]);
    assert_eq!(
        run(&mut gw, "AT+VERSION?"),
        vec![format!("ESP32-AT Firmware Version {FIRMWARE_VERSION}"), "OK".to_owned()]
    );
}

#[test]
fn unknown_and_malformed_commands() {
    let mut gw = gateway();
    assert_eq!(run(&mut gw, "AT+FOO"), vec!["ERROR: Unknown Command"]);
    assert_eq!(run(&mut gw, "at"), vec!["ERROR: Unknown Command"]);
    assert_eq!(
        run(&mut gw, "AT+BLESETSERVICE=1,zz"),
        vec!["ERROR: Invalid parameters. Use AT+BLESETSERVICE=<client_id>,<service_uuid>"]
    );
    assert_eq!(
        run(&mut gw, "AT+BLECONNECT=nope"),
        vec!["ERROR: Invalid parameters. Use AT+BLECONNECT=<address>"]
    );
    assert_eq!(
        run(&mut gw, "AT+BLEWRITE=1"),
        vec!["ERROR: Invalid parameters. Use AT+BLEWRITE=<client_id>,<data>"]
    );
}

#[test]
fn discover_unknown_handle() {
    let mut gw = gateway();
    assert_eq!(run(&mut gw, "AT+BLEDISCOVER=99"), vec!["ERROR: Client ID not found."]);
}

#[test]
fn start_and_stop_lifecycle() {
    let mut gw = cold_gateway(GatewayConfig::default());
    assert_eq!(run(&mut gw, "AT+BLESTOP"), vec!["BLE not initialized", "OK"]);
    assert_eq!(run(&mut gw, "AT+BLESTART"), vec!["BLE initialized (server mode)", "OK"]);
    assert_eq!(run(&mut gw, "AT+BLESTART"), vec!["BLE already initialized", "OK"]);

    let settings = gw.radio().settings().expect("init ran");
    assert_eq!(settings.device_name, "ESP32-AT");
    assert_eq!(gw.radio().server_value(), b"Hello World");

    ok(&mut gw, "AT+BLEADVERTISE=ON");
    ok(&mut gw, &format!("AT+BLECONNECT={PEER_A}"));
    assert_eq!(
        run(&mut gw, "AT+BLESTOP"),
        vec!["BLE advertising stopped", "BLE deinitialized", "OK"]
    );
    assert!(!gw.radio().is_initialized());
    assert_eq!(gw.registry().live_count(), 0);
    assert_eq!(ok(&mut gw, "AT+BLELIST")[0], format!("1: {} (disconnected)", addr(PEER_A)));
}

#[test]
fn advertising_needs_the_radio() {
    let mut gw = cold_gateway(GatewayConfig::default());
    assert_eq!(run(&mut gw, "AT+BLEADVERTISE=ON"), vec!["ERROR: BLE not initialized"]);

    ok(&mut gw, "AT+BLESTART");
    assert_eq!(ok(&mut gw, "AT+BLEADVERTISE=ON")[0], "BLE advertising started");
    assert_eq!(ok(&mut gw, "AT+BLEADVERTISE=ON")[0], "BLE already advertising");
    assert!(gw.radio().is_advertising());
    assert_eq!(ok(&mut gw, "AT+BLEADVERTISE=OFF")[0], "BLE advertising stopped");
    assert_eq!(ok(&mut gw, "AT+BLEADVERTISE=OFF")[0], "BLE not advertising");
    assert!(run(&mut gw, "AT+BLEADVERTISE=MAYBE")[0].starts_with("ERROR: Invalid parameters."));
}

#[test]
fn scan_and_connect_bring_the_radio_up_on_demand() {
    let mut gw = cold_gateway(GatewayConfig::default());
    ok(&mut gw, "AT+BLESCAN");
    assert!(gw.radio_state().initialized);
    assert!(gw.radio().is_initialized());
}

#[test]
fn without_auto_init_scan_is_refused() {
    let config = GatewayConfig {
        auto_init_radio: false,
        ..GatewayConfig::default()
    };
    let mut gw = cold_gateway(config);
    assert_eq!(run(&mut gw, "AT+BLESCAN"), vec!["ERROR: BLE not initialized"]);
    assert_eq!(
        run(&mut gw, &format!("AT+BLECONNECT={PEER_A}")),
        vec!["ERROR: BLE not initialized"]
    );
    assert_eq!(gw.radio().connect_attempts(), 0);
}

#[test]
fn scan_lists_devices() {
    let mut gw = gateway_with(&[sensor_peer(PEER_A).rssi(-42)]);
    let out = ok(&mut gw, "AT+BLESCAN");
    assert_eq!(
        out,
        vec![
            "Starting BLE scan...".to_owned(),
            "Devices found: 1".to_owned(),
            format!("Device 0: {}, RSSI: -42", addr(PEER_A)),
            "   Name: Sensor".to_owned(),
            format!("   Service UUID: {}", uuid("1234")),
            "Scan complete".to_owned(),
            "OK".to_owned(),
        ]
    );
}

#[test]
fn client_name_filter_narrows_the_scan() {
    let mut gw = gateway_with(&[
        sensor_peer(PEER_A),
        SimPeripheral::new(addr(PEER_B)).named("Thermostat"),
        SimPeripheral::new(addr(PEER_C)),
    ]);
    assert_eq!(
        run(&mut gw, "AT+BLESETCLIENTNAME=Sens"),
        vec!["Client name filter set to: Sens", "OK"]
    );
    let out = ok(&mut gw, "AT+BLESCAN");
    assert_eq!(out[1], "Devices found: 1");
    assert_eq!(gw.radio().last_scan_filter(), Some("Sens"));

    assert_eq!(run(&mut gw, "AT+BLESETCLIENTNAME="), vec!["Client name filter cleared", "OK"]);
    assert_eq!(ok(&mut gw, "AT+BLESCAN")[1], "Devices found: 3");
    assert_eq!(gw.radio().last_scan_filter(), None);
}

#[test]
fn discover_lists_services_and_characteristics() {
    let mut gw = gateway_with(&[sensor_peer(PEER_A), SimPeripheral::new(addr(PEER_B))]);
    ok(&mut gw, &format!("AT+BLECONNECT={PEER_A}"));
    assert_eq!(
        run(&mut gw, "AT+BLEDISCOVER=1"),
        vec![
            format!("Service: {}", uuid("1234")),
            format!("  Characteristic: {}", uuid("abcd")),
            format!("  Characteristic: {}", uuid("beef")),
            "Service discovery complete.".to_owned(),
            "OK".to_owned(),
        ]
    );

    ok(&mut gw, &format!("AT+BLECONNECT={PEER_B}"));
    assert_eq!(run(&mut gw, "AT+BLEDISCOVER=2"), vec!["No services found.", "OK"]);
}

#[test]
fn single_client_forms_use_the_only_live_link() {
    let mut gw = gateway();
    assert_eq!(run(&mut gw, "AT+BLEREAD"), vec!["ERROR: Client not connected."]);

    ok(&mut gw, &format!("AT+BLECONNECT={PEER_A}"));
    ok(&mut gw, "AT+BLESETSERVICE=1234");
    ok(&mut gw, "AT+BLESETCHAR=abcd");
    assert_eq!(run(&mut gw, "AT+BLEREAD"), vec!["01 02", "OK"]);
    assert_eq!(run(&mut gw, "AT+BLEREAD=1234,beef"), vec!["OK"]);
    assert_eq!(ok(&mut gw, "AT+BLEDISCOVER").last().map(String::as_str), Some("OK"));
}

#[test]
fn implicit_target_is_ambiguous_with_two_links() {
    let mut gw = gateway();
    connect_bound(&mut gw, PEER_A);
    connect_bound(&mut gw, PEER_B);
    assert_eq!(
        run(&mut gw, "AT+BLEREAD"),
        vec!["ERROR: Invalid parameters. Use AT+BLEREAD=<client_id>[,<service_uuid>,<characteristic_uuid>]"]
    );
    assert_eq!(
        run(&mut gw, "AT+BLENOTIFY"),
        vec!["ERROR: Invalid parameters. Use AT+BLENOTIFY=<client_id>"]
    );

    // Once one drops, the other becomes the implicit target.
    ok(&mut gw, "AT+BLEDISCONNECT=1");
    assert_eq!(run(&mut gw, "AT+BLEREAD"), vec!["01 02", "OK"]);
}

#[test]
fn radio_errors_are_reported_and_recoverable() {
    let mut gw = gateway();
    connect_bound(&mut gw, PEER_A);
    gw.radio_mut().fail_next(RadioError::Gatt(5));
    assert_eq!(
        run(&mut gw, "AT+BLEREAD=1"),
        vec![format!("ERROR: Radio error: {}", RadioError::Gatt(5))]
    );
    assert_eq!(run(&mut gw, "AT+BLEREAD=1"), vec!["01 02", "OK"]);
}

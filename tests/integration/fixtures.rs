//! Shared fixtures: a gateway over `SimRadio` and a couple of scripted peers.

use bleat::adapters::radio::{SimPeripheral, SimRadio};
use bleat::app::ports::CharRef;
use bleat::app::service::Gateway;
use bleat::channels::leak_channel;
use bleat::config::GatewayConfig;
use bleat::gatt::{BleUuid, PeerAddress};

pub const PEER_A: &str = "AA:BB:CC:DD:EE:FF";
pub const PEER_B: &str = "11:22:33:44:55:66";
pub const PEER_C: &str = "C0:FF:EE:00:00:01";

pub type SimGateway = Gateway<SimRadio>;

pub fn addr(text: &str) -> PeerAddress {
    text.parse().expect("fixture address")
}

pub fn uuid(text: &str) -> BleUuid {
    text.parse().expect("fixture uuid")
}

/// Service `1234` with characteristic `abcd` = `[01 02]` and `beef` = `[]`.
pub fn sensor_peer(address: &str) -> SimPeripheral {
    SimPeripheral::new(addr(address))
        .named("Sensor")
        .with_service(uuid("1234"), &[(uuid("abcd"), &[0x01, 0x02]), (uuid("beef"), &[])])
}

/// A gateway with the radio already up and the given peers in range.
pub fn gateway_with(peers: &[SimPeripheral]) -> SimGateway {
    let mut radio = SimRadio::initialized();
    for peer in peers {
        radio.add_peer(peer.clone());
    }
    let mut gw = Gateway::new(radio, GatewayConfig::default(), leak_channel());
    let lines = run(&mut gw, "AT+BLESTART");
    assert_eq!(lines.last().map(String::as_str), Some("OK"));
    gw
}

pub fn gateway() -> SimGateway {
    gateway_with(&[sensor_peer(PEER_A), sensor_peer(PEER_B)])
}

/// Run one line through the gateway and collect everything it wrote.
pub fn run(gw: &mut SimGateway, line: &str) -> Vec<String> {
    let mut out = Vec::new();
    gw.process_line(line, &mut out);
    out
}

/// Run one line and assert it ended in `OK`.
pub fn ok(gw: &mut SimGateway, line: &str) -> Vec<String> {
    let out = run(gw, line);
    assert_eq!(
        out.last().map(String::as_str),
        Some("OK"),
        "{line} should succeed, got {out:?}"
    );
    out
}

/// Drain queued radio events into a fresh line buffer.
pub fn drain(gw: &mut SimGateway) -> Vec<String> {
    let mut out = Vec::new();
    gw.poll_events(&mut out);
    out
}

/// Connect and bind the read path of `address` to `1234`/`abcd`.
pub fn connect_bound(gw: &mut SimGateway, address: &str) -> u32 {
    let out = ok(gw, &format!("AT+BLECONNECT={address}"));
    let handle: u32 = out
        .iter()
        .find_map(|l| l.strip_prefix("Client ID: "))
        .and_then(|h| h.parse().ok())
        .expect("connect reports a client id");
    ok(gw, &format!("AT+BLESETSERVICE={handle},1234"));
    ok(gw, &format!("AT+BLESETCHAR={handle},abcd"));
    handle
}

pub fn char_ref(gw: &SimGateway, address: &str, characteristic: &str) -> CharRef {
    gw.radio()
        .char_ref(addr(address), uuid(characteristic))
        .expect("characteristic is connected")
}

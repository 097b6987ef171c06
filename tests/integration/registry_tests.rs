//! Connection lifecycle through the AT surface: handle allocation,
//! tombstones, link loss and `AT+BLELIST`.

use bleat::adapters::radio::SimPeripheral;
use bleat::app::ports::RadioError;
use bleat::config::MAX_TOMBSTONES;

use super::fixtures::{
    PEER_A, PEER_B, PEER_C, addr, drain, gateway, gateway_with, ok, run, sensor_peer,
};

#[test]
fn first_connect_is_handle_one() {
    let mut gw = gateway();
    let out = ok(&mut gw, &format!("AT+BLECONNECT={PEER_A}"));
    assert_eq!(
        out,
        vec![
            format!("Connected to device: {}", addr(PEER_A)),
            "Client ID: 1".to_owned(),
            "OK".to_owned(),
        ]
    );
}

#[test]
fn failed_connect_does_not_consume_a_handle() {
    let mut gw = gateway_with(&[
        sensor_peer(PEER_A),
        SimPeripheral::new(addr(PEER_C)).unreachable(),
    ]);
    let out = run(&mut gw, &format!("AT+BLECONNECT={PEER_C}"));
    assert_eq!(
        out.last().map(String::as_str),
        Some(format!("ERROR: Failed to connect to device: {}", addr(PEER_C)).as_str())
    );

    let out = ok(&mut gw, &format!("AT+BLECONNECT={PEER_A}"));
    assert!(out.contains(&"Client ID: 1".to_owned()), "{out:?}");
}

#[test]
fn handles_are_never_reused_after_disconnect() {
    let mut gw = gateway();
    ok(&mut gw, &format!("AT+BLECONNECT={PEER_A}"));
    ok(&mut gw, "AT+BLEDISCONNECT=1");

    let out = ok(&mut gw, &format!("AT+BLECONNECT={PEER_A}"));
    assert!(out.contains(&"Client ID: 2".to_owned()), "{out:?}");

    let out = ok(&mut gw, "AT+BLELIST");
    assert_eq!(
        out,
        vec![
            format!("1: {} (disconnected)", addr(PEER_A)),
            format!("2: {} (connected)", addr(PEER_A)),
            "OK".to_owned(),
        ]
    );
}

#[test]
fn repeat_disconnect_is_a_noop_success() {
    let mut gw = gateway();
    ok(&mut gw, &format!("AT+BLECONNECT={PEER_A}"));
    assert_eq!(ok(&mut gw, "AT+BLEDISCONNECT=1")[0], "Disconnected client 1");
    assert_eq!(ok(&mut gw, "AT+BLEDISCONNECT=1")[0], "Client 1 already disconnected");
    assert_eq!(gw.radio().session_count(), 0);
}

#[test]
fn commands_on_a_tombstone_report_not_connected() {
    let mut gw = gateway();
    ok(&mut gw, &format!("AT+BLECONNECT={PEER_A}"));
    ok(&mut gw, "AT+BLEDISCONNECT=1");

    for line in ["AT+BLEDISCOVER=1", "AT+BLEREAD=1", "AT+BLEREAD=1,1234,abcd", "AT+BLEWRITE=1,x"] {
        assert_eq!(
            run(&mut gw, line).last().map(String::as_str),
            Some("ERROR: Client not connected."),
            "{line}"
        );
    }
}

#[test]
fn unknown_handle_is_distinct_from_not_connected() {
    let mut gw = gateway();
    assert_eq!(run(&mut gw, "AT+BLEDISCOVER=99"), vec!["ERROR: Client ID not found."]);
    assert_eq!(run(&mut gw, "AT+BLEDISCONNECT=7"), vec!["ERROR: Client ID not found."]);
}

#[test]
fn link_loss_marks_the_connection_disconnected() {
    let mut gw = gateway();
    ok(&mut gw, &format!("AT+BLECONNECT={PEER_A}"));
    assert!(gw.radio_mut().drop_link(addr(PEER_A)));

    // The loss is applied when the next command drains the channel.
    let out = ok(&mut gw, "AT+BLELIST");
    assert_eq!(out[0], format!("1: {} (disconnected)", addr(PEER_A)));
    assert_eq!(gw.registry().live_count(), 0);
}

#[test]
fn link_loss_releases_the_radio_session() {
    let mut gw = gateway();
    ok(&mut gw, &format!("AT+BLECONNECT={PEER_A}"));
    ok(&mut gw, &format!("AT+BLECONNECT={PEER_B}"));
    assert!(gw.radio_mut().drop_link(addr(PEER_A)));
    assert_eq!(gw.radio().session_count(), 2);

    assert!(drain(&mut gw).is_empty());
    assert_eq!(gw.radio().session_count(), 1);

    // Reconnecting the dropped peer gets a fresh handle and session.
    let out = ok(&mut gw, &format!("AT+BLECONNECT={PEER_A}"));
    assert!(out.contains(&"Client ID: 3".to_owned()), "{out:?}");
    assert_eq!(gw.radio().session_count(), 2);
}

#[test]
fn old_tombstones_are_forgotten_but_still_not_connected() {
    let mut gw = gateway();
    for _ in 0..50 {
        ok(&mut gw, &format!("AT+BLECONNECT={PEER_A}"));
        ok(&mut gw, "AT+BLEDISCONNECT");
    }
    assert_eq!(gw.registry().list().count(), MAX_TOMBSTONES);
    let listed = ok(&mut gw, "AT+BLELIST");
    assert_eq!(listed.len(), MAX_TOMBSTONES + 1);
    assert_eq!(listed[0], format!("43: {} (disconnected)", addr(PEER_A)));

    assert_eq!(ok(&mut gw, "AT+BLEDISCONNECT=1")[0], "Client 1 already disconnected");
    assert_eq!(run(&mut gw, "AT+BLEREAD=1"), vec!["ERROR: Client not connected."]);
    assert_eq!(run(&mut gw, "AT+BLEREAD=51"), vec!["ERROR: Client ID not found."]);
}

#[test]
fn connection_limit_is_enforced_on_live_links_only() {
    let peers: Vec<SimPeripheral> = (1..=5u8)
        .map(|i| sensor_peer(&format!("00:00:00:00:00:0{i}")))
        .collect();
    let mut gw = gateway_with(&peers);
    for i in 1..=4u8 {
        ok(&mut gw, &format!("AT+BLECONNECT=00:00:00:00:00:0{i}"));
    }
    let out = run(&mut gw, "AT+BLECONNECT=00:00:00:00:00:05");
    assert!(
        out.last().is_some_and(|l| l.ends_with("(connection limit reached)")),
        "{out:?}"
    );

    ok(&mut gw, "AT+BLEDISCONNECT=2");
    let out = ok(&mut gw, "AT+BLECONNECT=00:00:00:00:00:05");
    assert!(out.contains(&"Client ID: 5".to_owned()), "{out:?}");
}

#[test]
fn radio_failure_during_connect_keeps_registry_clean() {
    let mut gw = gateway();
    gw.radio_mut().fail_next(RadioError::Timeout);
    let out = run(&mut gw, &format!("AT+BLECONNECT={PEER_B}"));
    assert!(out.last().is_some_and(|l| l.starts_with("ERROR: Failed to connect")));
    assert_eq!(ok(&mut gw, "AT+BLELIST"), vec!["No clients.", "OK"]);
}

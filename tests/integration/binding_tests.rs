//! Read/write bindings: resolution, deferral, explicit reads and the
//! unresolved-write guard.

use super::fixtures::{PEER_A, PEER_B, addr, connect_bound, gateway, ok, run, uuid};

#[test]
fn bound_read_renders_hex_then_ok() {
    let mut gw = gateway();
    ok(&mut gw, &format!("AT+BLECONNECT={PEER_A}"));

    let out = ok(&mut gw, "AT+BLESETSERVICE=1,1234");
    assert_eq!(out, vec!["Service UUID set to: 1234", "Service pointer acquired.", "OK"]);

    let out = ok(&mut gw, "AT+BLESETCHAR=1,abcd");
    assert_eq!(
        out,
        vec!["Characteristic UUID set to: abcd", "Characteristic pointer acquired.", "OK"]
    );

    assert_eq!(run(&mut gw, "AT+BLEREAD=1"), vec!["01 02", "OK"]);
    assert_eq!(gw.radio().read_count(), 1);
}

#[test]
fn empty_value_reads_as_bare_ok() {
    let mut gw = gateway();
    ok(&mut gw, &format!("AT+BLECONNECT={PEER_A}"));
    ok(&mut gw, "AT+BLESETSERVICE=1,1234");
    ok(&mut gw, "AT+BLESETCHAR=1,beef");
    assert_eq!(run(&mut gw, "AT+BLEREAD=1"), vec!["OK"]);
}

#[test]
fn read_before_binding_is_rejected() {
    let mut gw = gateway();
    ok(&mut gw, &format!("AT+BLECONNECT={PEER_A}"));
    assert_eq!(
        run(&mut gw, "AT+BLEREAD=1"),
        vec!["ERROR: Characteristic pointer not set. Use AT+BLESETSERVICE and AT+BLESETCHAR first."]
    );
    assert_eq!(gw.radio().read_count(), 0);
}

#[test]
fn characteristic_before_service_needs_a_service() {
    let mut gw = gateway();
    ok(&mut gw, &format!("AT+BLECONNECT={PEER_A}"));
    let out = run(&mut gw, "AT+BLESETCHAR=1,abcd");
    assert_eq!(
        out,
        vec![
            "Characteristic UUID set to: abcd",
            "ERROR: Service pointer not set. Set service first.",
        ]
    );

    // The stored characteristic UUID is picked up once the service resolves.
    let out = ok(&mut gw, "AT+BLESETSERVICE=1,1234");
    assert_eq!(
        out,
        vec![
            "Service UUID set to: 1234",
            "Service pointer acquired.",
            "Characteristic pointer acquired.",
            "OK",
        ]
    );
    assert_eq!(run(&mut gw, "AT+BLEREAD=1"), vec!["01 02", "OK"]);
}

#[test]
fn missing_service_and_characteristic_are_named() {
    let mut gw = gateway();
    ok(&mut gw, &format!("AT+BLECONNECT={PEER_A}"));
    assert_eq!(
        run(&mut gw, "AT+BLESETSERVICE=1,180f").last().map(String::as_str),
        Some(format!("ERROR: Service not found: {}", uuid("180f")).as_str())
    );
    ok(&mut gw, "AT+BLESETSERVICE=1,1234");
    assert_eq!(
        run(&mut gw, "AT+BLESETCHAR=1,2a19").last().map(String::as_str),
        Some(format!("ERROR: Characteristic not found: {}", uuid("2a19")).as_str())
    );
}

#[test]
fn rebinding_the_same_uuids_is_idempotent() {
    let mut gw = gateway();
    connect_bound(&mut gw, PEER_A);
    let first = gw.radio().char_ref(addr(PEER_A), uuid("abcd"));
    connect_bound_again(&mut gw);
    assert_eq!(gw.radio().char_ref(addr(PEER_A), uuid("abcd")), first);
    assert_eq!(run(&mut gw, "AT+BLEREAD=1"), vec!["01 02", "OK"]);
}

fn connect_bound_again(gw: &mut super::fixtures::SimGateway) {
    ok(gw, "AT+BLESETSERVICE=1,1234");
    ok(gw, "AT+BLESETCHAR=1,abcd");
}

#[test]
fn explicit_read_leaves_the_read_binding_alone() {
    let mut gw = gateway();
    ok(&mut gw, &format!("AT+BLECONNECT={PEER_A}"));

    assert_eq!(run(&mut gw, "AT+BLEREAD=1,1234,abcd"), vec!["01 02", "OK"]);
    // Still unbound afterwards.
    assert!(run(&mut gw, "AT+BLEREAD=1")[0].starts_with("ERROR: Characteristic pointer not set"));
}

#[test]
fn unresolved_write_never_reaches_the_radio() {
    let mut gw = gateway();
    ok(&mut gw, &format!("AT+BLECONNECT={PEER_A}"));
    assert_eq!(
        run(&mut gw, "AT+BLEWRITE=1,hello"),
        vec![
            "ERROR: Write Characteristic pointer not set. Use AT+BLESETWRITESERVICE and AT+BLESETWRITECHAR first."
        ]
    );
    assert!(gw.radio().writes().is_empty());
}

#[test]
fn write_binding_is_independent_of_read_binding() {
    let mut gw = gateway();
    connect_bound(&mut gw, PEER_A);
    assert!(run(&mut gw, "AT+BLEWRITE=1,hi").last().is_some_and(|l| l.starts_with("ERROR: Write")));

    let out = ok(&mut gw, "AT+BLESETWRITESERVICE=1,1234");
    assert_eq!(out[..2], ["Write Service UUID set to: 1234", "Write Service pointer acquired."]);
    ok(&mut gw, "AT+BLESETWRITECHAR=1,beef");
    ok(&mut gw, "AT+BLEWRITE=1,a,b, c");

    let writes = gw.radio().writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].data, b"a,b, c");
    assert_eq!(gw.radio().peer_value(addr(PEER_A), uuid("beef")), Some(&b"a,b, c"[..]));
    // Read path still on abcd.
    assert_eq!(run(&mut gw, "AT+BLEREAD=1"), vec!["01 02", "OK"]);
}

#[test]
fn binding_on_a_disconnected_handle_is_deferred() {
    let mut gw = gateway();
    ok(&mut gw, &format!("AT+BLECONNECT={PEER_A}"));
    ok(&mut gw, "AT+BLEDISCONNECT=1");
    let out = ok(&mut gw, "AT+BLESETSERVICE=1,1234");
    assert_eq!(out, vec!["Service UUID set to: 1234", "Client not connected. Resolution deferred.", "OK"]);

    let out = ok(&mut gw, "AT+BLESETCHAR=1,abcd");
    assert_eq!(
        out,
        vec!["Characteristic UUID set to: abcd", "Client not connected. Resolution deferred.", "OK"]
    );
    let out = ok(&mut gw, "AT+BLESETWRITECHAR=1,beef");
    assert_eq!(out[1], "Client not connected. Resolution deferred.");
}

#[test]
fn disconnect_invalidates_bindings() {
    let mut gw = gateway();
    connect_bound(&mut gw, PEER_A);
    connect_bound(&mut gw, PEER_B);
    ok(&mut gw, "AT+BLEDISCONNECT=1");

    assert_eq!(run(&mut gw, "AT+BLEREAD=1"), vec!["ERROR: Client not connected."]);
    // The other connection's binding is untouched.
    assert_eq!(run(&mut gw, "AT+BLEREAD=2"), vec!["01 02", "OK"]);
}

//! Notification routing: enable/disable, drain-time routing and purging
//! on disconnect or link loss.

use bleat::app::ports::RadioEvent;

use super::fixtures::{PEER_A, PEER_B, addr, char_ref, connect_bound, drain, gateway, ok, run};

fn notification(characteristic: bleat::app::ports::CharRef, payload: &[u8]) -> RadioEvent {
    RadioEvent::Notification {
        characteristic,
        payload: heapless::Vec::from_slice(payload).expect("payload fits"),
    }
}

#[test]
fn notification_is_prefixed_with_its_handle() {
    let mut gw = gateway();
    connect_bound(&mut gw, PEER_A);
    connect_bound(&mut gw, PEER_B);
    assert_eq!(ok(&mut gw, "AT+BLENOTIFY=2"), vec!["Notifications enabled", "OK"]);

    let ch = char_ref(&gw, PEER_B, "abcd");
    assert!(gw.radio().is_subscribed(ch));
    assert!(gw.radio_mut().notify(ch, &[0x10]));
    assert_eq!(drain(&mut gw), vec!["02 10"]);

    ok(&mut gw, "AT+BLEDISCONNECT=2");
    assert_eq!(gw.handle_event(notification(ch, &[0x10])), None);
    assert!(drain(&mut gw).is_empty());
}

#[test]
fn queued_notifications_are_dropped_after_disconnect() {
    let mut gw = gateway();
    connect_bound(&mut gw, PEER_A);
    ok(&mut gw, "AT+BLENOTIFY=1");
    let ch = char_ref(&gw, PEER_A, "abcd");
    assert!(gw.radio_mut().notify(ch, &[1, 2, 3]));

    // Dispatch without the pre-command drain: the event is still queued.
    assert!(gw.dispatch("AT+BLEDISCONNECT=1").is_ok());
    assert!(drain(&mut gw).is_empty());
}

#[test]
fn notifications_surface_before_the_next_reply() {
    let mut gw = gateway();
    connect_bound(&mut gw, PEER_A);
    ok(&mut gw, "AT+BLENOTIFY=1");
    let ch = char_ref(&gw, PEER_A, "abcd");
    gw.radio_mut().notify(ch, &[0xAB, 0xCD]);
    gw.radio_mut().notify(ch, &[]);

    assert_eq!(run(&mut gw, "AT"), vec!["01 AB CD", "01", "OK"]);
}

#[test]
fn notify_requires_a_resolved_read_binding() {
    let mut gw = gateway();
    ok(&mut gw, &format!("AT+BLECONNECT={PEER_A}"));
    assert_eq!(
        run(&mut gw, "AT+BLENOTIFY=1"),
        vec!["ERROR: Characteristic pointer not set. Use AT+BLESETSERVICE and AT+BLESETCHAR first."]
    );
    assert_eq!(gw.radio().subscription_count(), 0);
    assert!(gw.registry().routes().is_empty());
}

#[test]
fn disable_stops_delivery() {
    let mut gw = gateway();
    connect_bound(&mut gw, PEER_A);
    ok(&mut gw, "AT+BLENOTIFY");
    let ch = char_ref(&gw, PEER_A, "abcd");

    assert_eq!(ok(&mut gw, "AT+BLENOTIFYOFF"), vec!["Notifications disabled", "OK"]);
    assert!(!gw.radio().is_subscribed(ch));
    assert!(!gw.radio_mut().notify(ch, &[0x01]));
    assert_eq!(gw.handle_event(notification(ch, &[0x01])), None);
}

#[test]
fn link_loss_purges_routes() {
    let mut gw = gateway();
    connect_bound(&mut gw, PEER_A);
    connect_bound(&mut gw, PEER_B);
    ok(&mut gw, "AT+BLENOTIFY=1");
    ok(&mut gw, "AT+BLENOTIFY=2");
    let a = char_ref(&gw, PEER_A, "abcd");
    let b = char_ref(&gw, PEER_B, "abcd");
    assert_eq!(gw.registry().routes().len(), 2);

    assert!(gw.radio_mut().drop_link(addr(PEER_A)));
    assert!(drain(&mut gw).is_empty());
    assert_eq!(gw.registry().routes().len(), 1);

    assert_eq!(gw.handle_event(notification(a, &[0x55])), None);
    assert_eq!(gw.handle_event(notification(b, &[0x55])), Some("02 55".to_owned()));
}

#[test]
fn rebinding_the_read_characteristic_retires_its_route() {
    let mut gw = gateway();
    connect_bound(&mut gw, PEER_A);
    ok(&mut gw, "AT+BLENOTIFY=1");
    let old = char_ref(&gw, PEER_A, "abcd");

    ok(&mut gw, "AT+BLESETCHAR=1,beef");
    assert!(!gw.radio().is_subscribed(old));
    assert!(gw.registry().routes().is_empty());

    assert_eq!(ok(&mut gw, "AT+BLENOTIFYOFF=1"), vec!["Notifications disabled", "OK"]);
    assert!(!gw.radio_mut().notify(old, &[0x42]));
    assert_eq!(gw.handle_event(notification(old, &[0x42])), None);
    assert_eq!(gw.radio().subscription_count(), 0);
}

#[test]
fn rebinding_the_same_characteristic_keeps_notifications() {
    let mut gw = gateway();
    connect_bound(&mut gw, PEER_A);
    ok(&mut gw, "AT+BLENOTIFY=1");
    let ch = char_ref(&gw, PEER_A, "abcd");

    ok(&mut gw, "AT+BLESETSERVICE=1,1234");
    ok(&mut gw, "AT+BLESETCHAR=1,abcd");
    assert!(gw.radio().is_subscribed(ch));
    assert!(gw.radio_mut().notify(ch, &[0x07]));
    assert_eq!(drain(&mut gw), vec!["01 07"]);
}

#[test]
fn rebinding_the_service_away_retires_the_route() {
    let mut gw = gateway();
    connect_bound(&mut gw, PEER_A);
    ok(&mut gw, "AT+BLENOTIFY=1");
    let old = char_ref(&gw, PEER_A, "abcd");

    assert!(run(&mut gw, "AT+BLESETSERVICE=1,180f").last().is_some_and(|l| l.starts_with("ERROR:")));
    assert!(!gw.radio().is_subscribed(old));
    assert_eq!(gw.handle_event(notification(old, &[0x01])), None);
}

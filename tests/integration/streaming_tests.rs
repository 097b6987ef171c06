//! Demo-peripheral streaming through the gateway, counted the way the host
//! throughput script does.

use bleat::adapters::peer::SequenceMonitor;
use bleat::adapters::radio::SimPeripheral;

use super::fixtures::{SimGateway, addr, drain, gateway_with, ok, uuid};

const STREAM_A: &str = "DE:AD:BE:EF:00:01";
const STREAM_B: &str = "DE:AD:BE:EF:00:02";

fn streamer(address: &str) -> SimPeripheral {
    SimPeripheral::new(addr(address))
        .named("Streamer")
        .with_stream(uuid("fff0"), uuid("fff1"))
}

fn subscribe(gw: &mut SimGateway, address: &str, handle: u32) {
    ok(gw, &format!("AT+BLECONNECT={address}"));
    ok(gw, &format!("AT+BLESETSERVICE={handle},fff0"));
    ok(gw, &format!("AT+BLESETCHAR={handle},fff1"));
    ok(gw, &format!("AT+BLENOTIFY={handle}"));
}

fn pump(gw: &mut SimGateway, monitor: &mut SequenceMonitor, ticks: usize) {
    for _ in 0..ticks {
        gw.radio_mut().tick_streams();
        for line in drain(gw) {
            assert!(monitor.observe_line(&line).is_some(), "not a frame line: {line}");
        }
    }
}

#[test]
fn clean_stream_has_no_drops() {
    let mut gw = gateway_with(&[streamer(STREAM_A)]);
    subscribe(&mut gw, STREAM_A, 1);

    let mut monitor = SequenceMonitor::new();
    pump(&mut gw, &mut monitor, 50);

    let stats = monitor.stats(1).expect("handle 1 streamed");
    assert_eq!(stats.received, 50);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.last_sequence, 49);
}

#[test]
fn lost_frames_are_counted_per_handle() {
    let mut gw = gateway_with(&[streamer(STREAM_A), streamer(STREAM_B)]);
    subscribe(&mut gw, STREAM_A, 1);
    subscribe(&mut gw, STREAM_B, 2);

    let mut monitor = SequenceMonitor::new();
    pump(&mut gw, &mut monitor, 10);
    gw.radio_mut().lose_frames(addr(STREAM_B), 3);
    pump(&mut gw, &mut monitor, 10);

    assert_eq!(monitor.stats(1).map(|s| s.dropped), Some(0));
    assert_eq!(monitor.stats(2).map(|s| s.dropped), Some(3));
    assert_eq!(monitor.total_dropped(), 3);
}

#[test]
fn stream_stops_with_the_link() {
    let mut gw = gateway_with(&[streamer(STREAM_A)]);
    subscribe(&mut gw, STREAM_A, 1);

    let mut monitor = SequenceMonitor::new();
    pump(&mut gw, &mut monitor, 5);
    ok(&mut gw, "AT+BLEDISCONNECT=1");
    assert_eq!(gw.radio_mut().tick_streams(), 0);
    assert!(drain(&mut gw).is_empty());
    assert_eq!(monitor.stats(1).map(|s| s.received), Some(5));
}

//! Fuzz target: `commands::parse` and the full dispatcher
//!
//! Every line the decoder can produce is parsed; valid UTF-8 input is also
//! pushed through a `Gateway` over the simulated radio, which must always
//! answer with exactly one terminal `OK` or `ERROR:` line.
//!
//! cargo fuzz run fuzz_command_parser

#![no_main]

use bleat::adapters::radio::{SimPeripheral, SimRadio};
use bleat::app::commands;
use bleat::app::service::Gateway;
use bleat::channels::RADIO_EVENTS;
use bleat::config::GatewayConfig;
use bleat::gatt::{BleUuid, PeerAddress};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };

    let radio = SimRadio::new().with_peer(
        SimPeripheral::new(PeerAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF])).with_service(
            BleUuid::from_u16(0x1234),
            &[(BleUuid::from_u16(0xABCD), &[0x01, 0x02])],
        ),
    );
    while RADIO_EVENTS.try_receive().is_ok() {}
    let mut gateway = Gateway::new(radio, GatewayConfig::default(), &RADIO_EVENTS);

    for line in text.lines() {
        let _ = commands::parse(line);
        let reply = gateway.dispatch(line);
        let terminal = reply.terminal_line();
        assert!(terminal == "OK" || terminal.starts_with("ERROR: "));
    }
});

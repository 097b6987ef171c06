//! Fuzz target: `LineDecoder::feed`
//!
//! Drives arbitrary byte sequences into the serial line decoder and asserts
//! that every yielded line is bounded, non-empty and terminator-free, and
//! that the decoder is clean again after a reset.
//!
//! cargo fuzz run fuzz_line_decoder

#![no_main]

use bleat::codec::LineDecoder;
use bleat::config::MAX_LINE_LEN;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut decoder = LineDecoder::new();

    decoder.feed(data, |line| {
        assert!(!line.is_empty(), "decoder must not yield empty lines");
        assert!(line.len() <= MAX_LINE_LEN, "line exceeds MAX_LINE_LEN");
        assert!(!line.contains(['\r', '\n']), "line carries a terminator");
    });
    assert!(decoder.pending() <= MAX_LINE_LEN);

    decoder.reset();
    assert_eq!(decoder.pending(), 0);
    decoder.feed(data, |_| {});
});

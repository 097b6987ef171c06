//! Demo peripheral payload and drop accounting.
//!
//! The test peripheral used with the gateway streams fixed 80-byte frames
//! on one notify characteristic, every 10 ms:
//!
//! | Bytes   | Content                              |
//! |---------|--------------------------------------|
//! | 0..2    | header `FF FF`                       |
//! | 2..6    | sequence number, big-endian          |
//! | 6..78   | filler `00 01 02 …` (`i - 6`)        |
//! | 78..80  | footer `FE FE`                       |
//!
//! [`SequenceMonitor`] consumes the gateway's notification lines and counts
//! gaps in each handle's sequence, which is how link throughput is judged.

use std::collections::BTreeMap;

use log::{debug, warn};

/// Frame length in bytes.
pub const PACKET_LEN: usize = 80;

/// Notification period of the demo peripheral.
pub const STREAM_INTERVAL_MS: u32 = 10;

const HEADER: [u8; 2] = [0xFF, 0xFF];
const FOOTER: [u8; 2] = [0xFE, 0xFE];
const SEQ: core::ops::Range<usize> = 2..6;

/// One demo frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerPacket([u8; PACKET_LEN]);

impl PeerPacket {
    pub fn new(sequence: u32) -> Self {
        let mut frame = [0u8; PACKET_LEN];
        frame[..2].copy_from_slice(&HEADER);
        frame[SEQ].copy_from_slice(&sequence.to_be_bytes());
        for (i, byte) in frame.iter_mut().enumerate().take(PACKET_LEN - 2).skip(6) {
            *byte = (i - 6) as u8;
        }
        frame[PACKET_LEN - 2..].copy_from_slice(&FOOTER);
        Self(frame)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Sequence number of a received frame; `None` if `bytes` is not one.
    pub fn sequence(bytes: &[u8]) -> Option<u32> {
        if bytes.len() != PACKET_LEN
            || bytes[..2] != HEADER
            || bytes[PACKET_LEN - 2..] != FOOTER
        {
            return None;
        }
        let mut seq = [0u8; 4];
        seq.copy_from_slice(&bytes[SEQ]);
        Some(u32::from_be_bytes(seq))
    }
}

// ───────────────────────────────────────────────────────────────
// SequenceMonitor
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub last_sequence: u32,
    pub received: u64,
    pub dropped: u64,
}

/// Per-handle drop counter over consecutive sequence numbers.
#[derive(Debug, Default)]
pub struct SequenceMonitor {
    streams: BTreeMap<u32, StreamStats>,
}

impl SequenceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account one frame from `handle`.  Returns the number of frames
    /// missing just before it, or `None` if `payload` is not a frame.
    ///
    /// A sequence that goes backwards (peer restart) resynchronises
    /// without counting drops.
    pub fn observe(&mut self, handle: u32, payload: &[u8]) -> Option<u32> {
        let seq = PeerPacket::sequence(payload)?;
        let Some(stats) = self.streams.get_mut(&handle) else {
            debug!("SEQ: handle {handle} first frame {seq}");
            self.streams.insert(
                handle,
                StreamStats {
                    last_sequence: seq,
                    received: 1,
                    dropped: 0,
                },
            );
            return Some(0);
        };

        let expected = stats.last_sequence.wrapping_add(1);
        let gap = seq.saturating_sub(expected);
        if gap > 0 {
            warn!(
                "SEQ: handle {handle} dropped {gap} frame(s) (last {}, got {seq})",
                stats.last_sequence
            );
        }
        stats.dropped += u64::from(gap);
        stats.received += 1;
        stats.last_sequence = seq;
        Some(gap)
    }

    /// Account one gateway notification line (`"HH XX XX ..."`).
    pub fn observe_line(&mut self, line: &str) -> Option<u32> {
        let mut fields = line.split_ascii_whitespace();
        let handle = u32::from_str_radix(fields.next()?, 16).ok()?;
        let payload: Option<Vec<u8>> = fields.map(|b| u8::from_str_radix(b, 16).ok()).collect();
        self.observe(handle, &payload?)
    }

    pub fn stats(&self, handle: u32) -> Option<StreamStats> {
        self.streams.get(&handle).copied()
    }

    pub fn total_dropped(&self) -> u64 {
        self.streams.values().map(|s| s.dropped).sum()
    }
}

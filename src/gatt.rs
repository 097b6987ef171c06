//! GATT identifiers: Bluetooth UUIDs and device addresses.
//!
//! UUIDs are held as [`uuid::Uuid`].  16- and 32-bit short forms are
//! expanded onto the Bluetooth base UUID
//! (`0000xxxx-0000-1000-8000-00805f9b34fb`) so that `1234` and
//! `00001234-0000-1000-8000-00805f9b34fb` compare equal.

use core::fmt;
use core::str::FromStr;

use uuid::Uuid;

/// Bluetooth base UUID with the 32-bit alias field zeroed.
const BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Parse failure for [`BleUuid`] or [`PeerAddress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseError;

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed identifier")
    }
}

// ───────────────────────────────────────────────────────────────
// BleUuid
// ───────────────────────────────────────────────────────────────

/// A Bluetooth UUID normalised to its 128-bit form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BleUuid(Uuid);

impl BleUuid {
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Expand a 16-bit assigned number onto the base UUID.
    pub const fn from_u16(short: u16) -> Self {
        Self::from_u32(short as u32)
    }

    pub const fn from_u32(short: u32) -> Self {
        Self::from_u128(BASE_UUID | ((short as u128) << 96))
    }

    pub const fn as_u128(self) -> u128 {
        self.0.as_u128()
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// The 16-bit alias, if this UUID lives on the base UUID.
    pub fn as_u16(self) -> Option<u16> {
        let value = self.as_u128();
        let alias = (value >> 96) as u32;
        (value & !(0xffff_ffff_u128 << 96) == BASE_UUID && alias <= 0xffff).then_some(alias as u16)
    }
}

impl From<Uuid> for BleUuid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// `xxxx`, `xxxxxxxx`, or any 128-bit form [`Uuid::try_parse`] accepts.
impl FromStr for BleUuid {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, ParseError> {
        let s = s.trim();
        let short = s.bytes().all(|b| b.is_ascii_hexdigit());
        match s.len() {
            4 if short => u16::from_str_radix(s, 16)
                .map(Self::from_u16)
                .map_err(|_| ParseError),
            8 if short => u32::from_str_radix(s, 16)
                .map(Self::from_u32)
                .map_err(|_| ParseError),
            _ => Uuid::try_parse(s).map(Self).map_err(|_| ParseError),
        }
    }
}

impl fmt::Display for BleUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

// ───────────────────────────────────────────────────────────────
// PeerAddress
// ───────────────────────────────────────────────────────────────

/// A 48-bit Bluetooth device address, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddress([u8; 6]);

impl PeerAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for PeerAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, ParseError> {
        let mut bytes = [0u8; 6];
        let mut parts = s.trim().split(':');
        for byte in &mut bytes {
            let part = parts.next().ok_or(ParseError)?;
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ParseError);
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| ParseError)?;
        }
        if parts.next().is_some() {
            return Err(ParseError);
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

// Copyright 2019-2020 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

//! Factory unique-ID serial string descriptor.
//!
//! Lives here rather than in the `packets` module since it is the one
//! descriptor this crate manufactures itself instead of asking the
//! application for.

use crate::packets::StringDescriptor;

static HEX_DIGITS: [u8; 16] = [
    b'0', b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'a', b'b', b'c', b'd', b'e', b'f',
];

/// Reads the 12-byte factory-programmed unique device ID.
///
/// # Safety
/// Reads fixed MMIO addresses documented by the target chip to hold the
/// unique ID; only valid on an STM32F0x2 (or pin-compatible family member).
unsafe fn read_unique_id() -> [u8; 12] {
    let id1 = (*(0x1FFF_F7AC as *const u32)).to_le_bytes();
    let id2 = (*(0x1FFF_F7B0 as *const u32)).to_le_bytes();
    let id3 = (*(0x1FFF_F7B4 as *const u32)).to_le_bytes();
    [
        id1[0], id1[1], id1[2], id1[3], id2[0], id2[1], id2[2], id2[3], id3[0], id3[1], id3[2],
        id3[3],
    ]
}

/// Converts a 12-byte unique ID into 24 ASCII hex characters, low nibble of
/// each byte first.
fn hex_id(id: [u8; 12]) -> [u8; 24] {
    let mut out = [0u8; 24];
    for (i, byte) in id.iter().enumerate() {
        out[i * 2] = HEX_DIGITS[(byte & 0x0f) as usize];
        out[i * 2 + 1] = HEX_DIGITS[(byte >> 4) as usize];
    }
    out
}

/// Builds the serial number string descriptor from the factory unique ID.
///
/// # Safety
/// Same obligation as [`read_unique_id`].
pub unsafe fn build_serial_descriptor() -> StringDescriptor {
    let hex = hex_id(read_unique_id());
    let mut units = [0u16; 24];
    for (i, &b) in hex.iter().enumerate() {
        units[i] = b as u16;
    }
    StringDescriptor::from_utf16(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_id_encodes_nibbles_low_then_high() {
        let id = [0xABu8, 0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let hex = hex_id(id);
        assert_eq!(&hex[0..2], b"ba");
        assert_eq!(&hex[2..4], b"10");
    }
}

//! Frame integrity checksum.
//!
//! Every [`Frame`] carries a one-byte CRC over its five payload bytes
//! (destination, source, command, data-high, data-low). The CRC is the
//! Dallas/Maxim 1-Wire variant: reflected polynomial `0x8C`, initial value
//! `0x00`, no final xor. It detects all single-bit and most burst errors on a
//! noisy link and costs a few instructions per byte on an 8-bit controller.
//! It provides **no** tamper resistance.
//!
//! # Usage
//!
//! ```
//! use reflex_duel::checksum::crc8;
//!
//! // The standard CRC-8/MAXIM check value.
//! assert_eq!(crc8(b"123456789"), 0xA1);
//! ```
//!
//! [`Frame`]: crate::network::codec::Frame

/// Reflected form of the Dallas/Maxim polynomial `x^8 + x^5 + x^4 + 1`.
pub const CRC8_POLY: u8 = 0x8C;

/// Lookup table generated at compile time from [`crc8_bitwise`]'s inner loop.
const CRC8_TABLE: [u8; 256] = build_table();

const fn build_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut index = 0;
    while index < 256 {
        let mut crc = index as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x01 != 0 {
                (crc >> 1) ^ CRC8_POLY
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[index] = crc;
        index += 1;
    }
    table
}

/// Computes the CRC-8/MAXIM of `data` using the precomputed table.
#[inline]
#[must_use]
pub fn crc8(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |crc, &byte| CRC8_TABLE[usize::from(crc ^ byte)])
}

/// Computes the CRC-8/MAXIM of `data` one bit at a time.
///
/// This is the shift-register form that constrained controllers run. It is
/// kept public so firmware-side ports can be checked against [`crc8`].
#[must_use]
pub fn crc8_bitwise(data: &[u8]) -> u8 {
    let mut crc: u8 = 0x00;
    for &byte in data {
        let mut extract = byte;
        for _ in 0..8 {
            let sum = (crc ^ extract) & 0x01;
            crc >>= 1;
            if sum != 0 {
                crc ^= CRC8_POLY;
            }
            extract >>= 1;
        }
    }
    crc
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn crc8_empty_is_zero() {
        assert_eq!(crc8(&[]), 0x00);
        assert_eq!(crc8_bitwise(&[]), 0x00);
    }

    #[test]
    fn crc8_standard_check_value() {
        assert_eq!(crc8(b"123456789"), 0xA1);
        assert_eq!(crc8_bitwise(b"123456789"), 0xA1);
    }

    #[test]
    fn table_matches_bitwise_for_every_single_byte() {
        for byte in 0..=u8::MAX {
            assert_eq!(crc8(&[byte]), crc8_bitwise(&[byte]), "byte 0x{byte:02X}");
        }
    }

    #[test]
    fn crc8_of_frame_payload_is_order_sensitive() {
        let a = crc8(&[0x00, 0x01, 0x26, 0x00, 0x78]);
        let b = crc8(&[0x01, 0x00, 0x26, 0x00, 0x78]);
        assert_ne!(a, b);
    }
}

// =============================================================================
// Property-Based Tests
// =============================================================================

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: the table form and the shift-register form always agree
        #[test]
        fn prop_table_equals_bitwise(data in any::<Vec<u8>>()) {
            prop_assert_eq!(crc8(&data), crc8_bitwise(&data));
        }

        /// Property: any single-bit flip in a 5-byte payload changes the CRC
        #[test]
        fn prop_single_bit_flip_detected(
            payload in any::<[u8; 5]>(),
            bit in 0usize..40,
        ) {
            let mut corrupted = payload;
            corrupted[bit / 8] ^= 1 << (bit % 8);
            prop_assert_ne!(crc8(&payload), crc8(&corrupted));
        }

        /// Property: appending the CRC yields a zero remainder
        #[test]
        fn prop_residue_is_zero(data in any::<Vec<u8>>()) {
            let mut with_crc = data.clone();
            with_crc.push(crc8(&data));
            prop_assert_eq!(crc8(&with_crc), 0);
        }
    }
}

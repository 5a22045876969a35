//! Checksum primitives used by the wire protocols
//!
//! Handshake bursts and full-memory images carry a CRC-CCITT (0xFFFF seed,
//! polynomial 0x1021), while request/response packets end in a running XOR
//! over all preceding bytes.

use crc::{Crc, CRC_16_IBM_3740};

// CRC-16/IBM-3740 is the "CCITT-FALSE" variant the dive computers use.
const CRC_CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute the CRC-CCITT of a byte slice.
pub fn crc_ccitt_u16(data: &[u8]) -> u16 {
    CRC_CCITT.checksum(data)
}

/// Fold a byte slice into a running XOR starting from `init`.
pub fn xor_u8(data: &[u8], init: u8) -> u8 {
    data.iter().fold(init, |acc, byte| acc ^ byte)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_ccitt_check_value() {
        // Standard check value for CRC-16/IBM-3740.
        assert_eq!(crc_ccitt_u16(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_crc_ccitt_empty() {
        assert_eq!(crc_ccitt_u16(&[]), 0xFFFF);
    }

    #[test]
    fn test_xor() {
        assert_eq!(xor_u8(&[], 0x00), 0x00);
        assert_eq!(xor_u8(&[0xAA, 0x55], 0x00), 0xFF);
        assert_eq!(xor_u8(&[0x01, 0x02, 0x04], 0x00), 0x07);
        assert_eq!(xor_u8(&[0x0F], 0xF0), 0xFF);
    }

    #[test]
    fn test_xor_detects_single_bit_flip() {
        let packet = [0x05u8, 0x00, 0x03, 0x12, 0x34, 0x10];
        let crc = xor_u8(&packet, 0x00);
        let mut corrupted = packet;
        corrupted[2] ^= 0x40;
        assert_ne!(xor_u8(&corrupted, 0x00), crc);
    }
}

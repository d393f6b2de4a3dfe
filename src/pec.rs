//! PEC15 packet error code
//!
//! Every LTC6811 command and data word is followed by a 15-bit CRC
//! (polynomial 0x4599, seed 0x0010, MSB first). On the wire the 15 bits sit in
//! the top of a big-endian 16-bit word with bit 0 always zero.

use byteorder::{BigEndian, ByteOrder};
use crc::{Algorithm, Crc};

const CRC_15_LTC6811: Algorithm<u16> = Algorithm {
    width: 15,
    poly: 0x4599,
    init: 0x0010,
    refin: false,
    refout: false,
    xorout: 0x0000,
    check: 0x535f,
    residue: 0x0000,
};

const PEC: Crc<u16> = Crc::<u16>::new(&CRC_15_LTC6811);

/// Computes the PEC15 of `data` as transmitted (15-bit remainder shifted left by one)
pub fn pec15(data: &[u8]) -> u16 {
    PEC.checksum(data) << 1
}

/// PEC15 of `data` as the two bytes that follow it on the wire
pub fn pec15_bytes(data: &[u8]) -> [u8; 2] {
    let mut bytes = [0u8; 2];
    BigEndian::write_u16(&mut bytes, pec15(data));

    bytes
}

/// Checks a frame whose last two bytes are the PEC15 of the bytes before it
pub fn verify(frame: &[u8]) -> bool {
    if frame.len() < 2 {
        return false;
    }

    let (data, pec) = frame.split_at(frame.len() - 2);
    BigEndian::read_u16(pec) == pec15(data)
}

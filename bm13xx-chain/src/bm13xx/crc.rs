//! Frame checksums.
//!
//! Control frames and chip responses carry a 5-bit CRC in their last byte.
//! Job frames carry a 16-bit CRC, transmitted big-endian.

use crc_all::CrcAlgo;

const CRC5_INIT: u8 = 0x1f;

const CRC5: CrcAlgo<u8> = CrcAlgo::<u8>::new(
    0x05,      // polynomial
    5,         // width
    CRC5_INIT, // init
    0,         // xorout
    false,     // reflect
);

const CRC16_INIT: u16 = 0xffff;

const CRC16: CrcAlgo<u16> = CrcAlgo::<u16>::new(
    0x1021,     // polynomial (CCITT)
    16,         // width
    CRC16_INIT, // init
    0,          // xorout
    false,      // reflect
);

/// CRC-5 (poly 0x05, init 0x1f, unreflected, no final XOR) over `data`.
///
/// The CRC runs over the whole bit sequence of the slice, so a response
/// frame that ends in its own checksum byte yields zero.
pub fn crc5(data: &[u8]) -> u8 {
    let mut crc = CRC5_INIT;
    CRC5.update_crc(&mut crc, data);
    CRC5.finish_crc(&crc)
}

/// True if `frame`, including its trailing checksum byte, recomputes to zero.
pub fn crc5_is_valid(frame: &[u8]) -> bool {
    crc5(frame) == 0
}

/// CRC-16/CCITT-FALSE (poly 0x1021, init 0xffff) over `data`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;
    CRC16.update_crc(&mut crc, data);
    CRC16.finish_crc(&crc)
}

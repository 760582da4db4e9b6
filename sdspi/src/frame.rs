//! Serialisation of the 48-bit card command format.

use byteorder::{BigEndian, ByteOrder};

use crate::crc::crc7;

/// Bytes of a framed command on the wire, the leading synchronisation
/// byte included.
pub const FRAME_LEN: usize = 7;

const SYNCHRONISATION: u8 = 0xff;
const TRANSMISSION: u8 = 0x40;
const TERMINATION: u8 = 0x01;

/// Serialise `index` and `argument` into the wire frame.
///
/// The card sees a 0xFF synchronisation byte, the start and transmitter
/// bits with the 6-bit command index, the big-endian argument, and a
/// final byte carrying CRC7 of the five body bytes above the always-one
/// end bit.
pub fn serialise(index: u8, argument: u32) -> [u8; FRAME_LEN] {
    debug_assert!(index < 0x40);
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = SYNCHRONISATION;
    frame[1] = TRANSMISSION | index;
    BigEndian::write_u32(&mut frame[2..6], argument);
    frame[6] = (crc7(&frame[1..6]) << 1) | TERMINATION;
    frame
}

/// Command index carried by a serialised frame.
pub fn index(frame: &[u8]) -> u8 {
    frame[1] & 0x3f
}

/// Argument carried by a serialised frame.
pub fn argument(frame: &[u8]) -> u32 {
    BigEndian::read_u32(&frame[2..6])
}

/// Checksum carried by a serialised frame, without its end bit.
pub fn checksum(frame: &[u8]) -> u8 {
    frame[6] >> 1
}

//! XOR and CRC-16 checksums over 32-bit word ranges

use crc::{Crc, CRC_16_IBM_3740};

/// CRC-16 with polynomial 0x1021, no reflection, no final XOR.
/// The register is seeded by the caller (0xFFFF for B2L data).
const B2L_CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Initial register value of the B2L CRC-16
pub const CRC16_INIT: u16 = 0xFFFF;

/// Bitwise XOR of every word in the range
pub fn xor_checksum(words: &[u32]) -> u32 {
    words.iter().fold(0, |acc, &w| acc ^ w)
}

/// CRC-16 over 32-bit words, continuing from `crc16`.
///
/// Each word is fed most-significant byte first, which matches the
/// byte order the FEE firmware uses when it computes the trailer CRC.
pub fn crc16_words(crc16: u16, words: &[u32]) -> u16 {
    let mut digest = B2L_CRC16.digest_with_initial(crc16);
    for word in words {
        digest.update(&word.to_be_bytes());
    }
    digest.finalize()
}

//! Frame checksum
//!
//! The PRG260 protects request payloads (and the key returned by get-key)
//! with a single XOR-folded byte.

/// XOR-fold all bytes, starting from zero.
///
/// Callers pass exactly the payload region; the opcode and the checksum slot
/// itself are never included.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, &b| acc ^ b)
}

/// Check a payload against its trailing checksum byte
pub fn verify(bytes: &[u8], expected: u8) -> bool {
    checksum(bytes) == expected
}

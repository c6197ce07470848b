//! Page checksum utilities.

/// Value stored in a read target's checksum field before the read, so a
/// failed read cannot leave behind a checksum that happens to match.
pub const CHECKSUM_SENTINEL: u32 = u32::MAX;

/// Computes a CRC32 checksum for the given data.
#[inline]
pub fn compute_checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Verifies that the checksum matches the data.
#[inline]
pub fn verify_checksum(data: &[u8], expected: u32) -> bool {
    compute_checksum(data) == expected
}

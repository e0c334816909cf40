//! The CRC used by headers, block trailers and page trailers.
//!
//! Same polynomial and table as CRC-32/ISO-HDLC, but seeded with zero and
//! without the final inversion.  `crc32fast` inverts on entry and on exit, so
//! seeding it with all ones and inverting the result cancels both.

use crc32fast::Hasher;

/// CRC of `bytes[offset..offset + len]`, or `None` when the range is out of
/// bounds.
pub fn crc(bytes: &[u8], offset: usize, len: usize) -> Option<u32> {
    let end = offset.checked_add(len)?;
    bytes.get(offset..end).map(crc_of)
}

pub fn crc_of(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new_with_initial(0xFFFF_FFFF);
    hasher.update(bytes);
    !hasher.finalize()
}

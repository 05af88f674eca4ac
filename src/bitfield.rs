//! Bit sub-range access on 64-bit words.

/// Return the `size`-bit unsigned field starting `offset` bits above the
/// least-significant bit of `word`.
///
/// `offset + size` must not exceed 64.
#[inline]
pub fn extract(word: u64, offset: u32, size: u32) -> u64 {
    debug_assert!(offset + size <= 64);
    word.checked_shr(offset).unwrap_or(0) & mask(size)
}

/// Return `word` with the `size`-bit field at `offset` replaced by the low
/// bits of `value`.
#[inline]
pub fn insert(word: u64, offset: u32, size: u32, value: u64) -> u64 {
    debug_assert!(offset + size <= 64);
    let field = mask(size).checked_shl(offset).unwrap_or(0);
    (word & !field) | (value.checked_shl(offset).unwrap_or(0) & field)
}

#[inline]
fn mask(size: u32) -> u64 {
    u64::MAX.checked_shl(size).map_or(u64::MAX, |m| !m)
}

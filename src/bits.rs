//! Bitfield and SIMD-within-a-register helpers.
//!
//! Counters are packed into 64-bit words at three widths:
//!
//! ```none
//! nibble word   16 x 4 bits    bin b at bits 4b..4b+3
//! byte word      8 x 8 bits    bin b (mod 8) at bits 8b..8b+7
//! scan word      4 x 16 bits   bin b (mod 4) at bits 16b..16b+15
//! ```
//!
//! Widening spreads each field into a slot twice as wide with shift/mask steps, the same
//! on/off mask shuffling used to reverse packed bases.

/// Four 16-bit lanes of ones, multiplying by it sums lanes upwards
pub const LANES16_ONES: u64 = 0x0001_0001_0001_0001;

/// Extract `bits` bits starting at `offset`.
#[inline(always)]
pub fn bfe(word: u64, offset: u32, bits: u32) -> u64 {
    (word >> offset) & ((1u64 << bits) - 1)
}

/// Insert the low `bits` bits of `field` at `offset`, replacing what was there.
#[inline(always)]
pub fn bfi(word: u64, field: u64, offset: u32, bits: u32) -> u64 {
    let mask = ((1u64 << bits) - 1) << offset;
    (word & !mask) | ((field << offset) & mask)
}

/// Spread the 8 nibbles in the low 32 bits of `x` into the 8 bytes of the result.
#[inline(always)]
pub fn nibbles_to_bytes(x: u32) -> u64 {
    let mut x = x as u64;
    x = (x | (x << 16)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x << 8))  & 0x00FF_00FF_00FF_00FF;
    x = (x | (x << 4))  & 0x0F0F_0F0F_0F0F_0F0F;
    x
}

/// Widen a 16-bin nibble word into two byte words: bins 0-7, then bins 8-15.
#[inline(always)]
pub fn widen_nibbles(nibbles: u64) -> [u64; 2] {
    [nibbles_to_bytes(nibbles as u32), nibbles_to_bytes((nibbles >> 32) as u32)]
}

/// Spread the 4 bytes in the low 32 bits of `x` into the four 16-bit lanes of the result.
#[inline(always)]
pub fn bytes_to_u16(x: u32) -> u64 {
    let mut x = x as u64;
    x = (x | (x << 16)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x << 8))  & 0x00FF_00FF_00FF_00FF;
    x
}

/// Unpack a byte word into two 16-bit-lane words: bytes 0-3 (low half), bytes 4-7 (high half).
#[inline(always)]
pub fn unpack_bytes(bytes: u64) -> [u64; 2] {
    [bytes_to_u16(bytes as u32), bytes_to_u16((bytes >> 32) as u32)]
}

/// Inclusive prefix across the four 16-bit lanes of `word`.
///
/// Only valid while every partial sum fits in 16 bits.
#[inline(always)]
pub fn lanes16_inclusive(word: u64) -> u64 {
    word.wrapping_mul(LANES16_ONES)
}

/// Broadcast `value` into all four 16-bit lanes.
#[inline(always)]
pub fn lanes16_splat(value: u64) -> u64 {
    value.wrapping_mul(LANES16_ONES)
}

//! Fixed-width acknowledgement bitmap.
//!
//! Bit `i` stands for the sequence number at relative offset `i` from a
//! window base.  128 bits cover every legal window width (at most 127).

use std::fmt;

/// Number of bits tracked.
pub const BITMAP_BITS: usize = 128;

/// 128-bit set/test/shift vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckBitmap {
    bits: u128,
}

/// Index past the end of the bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("bit index {0} out of range")]
pub struct BitIndexError(pub usize);

impl AckBitmap {
    pub const fn new() -> Self {
        Self { bits: 0 }
    }

    pub fn set(&mut self, i: usize) -> Result<(), BitIndexError> {
        if i >= BITMAP_BITS {
            return Err(BitIndexError(i));
        }
        self.bits |= 1u128 << i;
        Ok(())
    }

    /// Out-of-range indexes read as unset.
    pub fn test(&self, i: usize) -> bool {
        i < BITMAP_BITS && self.bits & (1u128 << i) != 0
    }

    /// Drop the `n` lowest bits and zero-fill from the top.
    pub fn shift(&mut self, n: usize) {
        self.bits = if n >= BITMAP_BITS { 0 } else { self.bits >> n };
    }

    pub fn reset(&mut self) {
        self.bits = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Number of consecutive set bits starting at `from`, capped at `limit`.
    pub fn run_from(&self, from: usize, limit: usize) -> usize {
        let limit = limit.min(BITMAP_BITS);
        if from >= limit {
            return 0;
        }
        let ones = (self.bits >> from).trailing_ones() as usize;
        ones.min(limit - from)
    }

    /// Render the first `width` bits, lowest offset first.
    pub fn render(&self, width: usize) -> String {
        (0..width.min(BITMAP_BITS))
            .map(|i| if self.test(i) { '1' } else { '0' })
            .collect()
    }
}

impl fmt::Display for AckBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(BITMAP_BITS))
    }
}

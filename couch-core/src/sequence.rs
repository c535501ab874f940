//! Wrapping sequence numbers.
//!
//! Message sequences are 24 bits on the wire and frame ids are 32 bits.
//! Both wrap, so "newer than" uses serial-number arithmetic: `a` is newer
//! than `b` when the forward distance from `b` to `a` is non-zero and less
//! than half the number space.

use std::fmt;

/// Number of distinct 24-bit sequence values.
const SEQ_SPACE: u32 = 1 << 24;
const SEQ_MASK: u32 = SEQ_SPACE - 1;
const SEQ_HALF: u32 = SEQ_SPACE / 2;

// ── Seq24 ────────────────────────────────────────────────────────

/// A 24-bit wrapping per-stream sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Seq24(u32);

impl Seq24 {
    pub const ZERO: Seq24 = Seq24(0);
    pub const MAX: Seq24 = Seq24(SEQ_MASK);

    /// Build from any `u32`; bits above 24 are discarded.
    pub const fn new(value: u32) -> Self {
        Self(value & SEQ_MASK)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    /// The following sequence number, wrapping after `MAX`.
    pub const fn next(self) -> Self {
        self.add(1)
    }

    /// Advance by `n`, wrapping.
    pub const fn add(self, n: u32) -> Self {
        Self(self.0.wrapping_add(n) & SEQ_MASK)
    }

    /// Returns the current value and advances `self`.
    pub fn take_next(&mut self) -> Self {
        let current = *self;
        *self = self.next();
        current
    }

    /// Wrap-safe comparison: `true` when `self` comes after `other`.
    pub fn is_newer_than(self, other: Seq24) -> bool {
        let forward = self.0.wrapping_sub(other.0) & SEQ_MASK;
        forward != 0 && forward < SEQ_HALF
    }

    /// Number of sequence values skipped between `prev` and `self`.
    ///
    /// Zero for consecutive numbers; only meaningful when `self` is newer.
    pub fn gap_since(self, prev: Seq24) -> u32 {
        (self.0.wrapping_sub(prev.0) & SEQ_MASK).saturating_sub(1)
    }
}

impl fmt::Display for Seq24 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Frame ids ────────────────────────────────────────────────────

/// Wrap-safe comparison for 32-bit frame ids.
pub fn frame_is_newer(candidate: u32, current: u32) -> bool {
    (candidate.wrapping_sub(current) as i32) > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_masks_to_24_bits() {
        assert_eq!(Seq24::new(0x0123_4567).get(), 0x23_4567);
        assert_eq!(Seq24::new(SEQ_SPACE), Seq24::ZERO);
    }

    #[test]
    fn next_wraps_at_max() {
        assert_eq!(Seq24::MAX.next(), Seq24::ZERO);
        let mut s = Seq24::MAX;
        assert_eq!(s.take_next(), Seq24::MAX);
        assert_eq!(s, Seq24::ZERO);
    }

    #[test]
    fn newer_across_wraparound() {
        assert!(Seq24::new(1).is_newer_than(Seq24::ZERO));
        assert!(Seq24::ZERO.is_newer_than(Seq24::MAX));
        assert!(Seq24::new(5).is_newer_than(Seq24::new(SEQ_MASK - 5)));
        assert!(!Seq24::MAX.is_newer_than(Seq24::ZERO));
        assert!(!Seq24::new(7).is_newer_than(Seq24::new(7)));
    }

    #[test]
    fn gap_counts_missing_values() {
        assert_eq!(Seq24::new(11).gap_since(Seq24::new(10)), 0);
        assert_eq!(Seq24::new(14).gap_since(Seq24::new(10)), 3);
        assert_eq!(Seq24::new(1).gap_since(Seq24::MAX), 1);
    }

    #[test]
    fn frame_ids_wrap() {
        assert!(frame_is_newer(6, 5));
        assert!(!frame_is_newer(5, 6));
        assert!(!frame_is_newer(5, 5));
        assert!(frame_is_newer(0, u32::MAX));
        assert!(frame_is_newer(3, u32::MAX - 3));
    }
}

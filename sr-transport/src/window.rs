//! Selective-repeat sliding window over the 8-bit sequence space.
//!
//! # Sequence-number layout
//!
//! ```text
//!      pre-window              window
//!  ─────┼────────────────┼────────────────┼─────────▶ seq space (mod 256)
//!   base − width        base        base + width
//!       │ <── stale ───▶ │ <── tracked ──▶│ <── out of range ──▶
//! ```
//!
//! Bit `i` of the ack bitmap is offset `i` from `base`.  Both ends of a
//! session keep one: the sender marks acks, the receiver marks arrivals.
//! Because `width ≤ 127`, the window and the pre-window never overlap.
//!
//! This module only manages state; delivery and I/O are the caller's job.

use std::fmt;

use crate::bitmap::AckBitmap;

/// Largest legal window width.
pub const MAX_WIDTH: u8 = 127;

/// Where a sequence number sits relative to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Inside `[base, base + width)`, at the given offset.
    InWindow(usize),
    /// Inside `[base − width, base)`: already passed.
    PreWindow,
    /// Anywhere else.
    OutOfRange,
}

/// Errors from window updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("seqnum {seqnum} outside window [{base}, +{width})")]
    NotInWindow { seqnum: u8, base: u8, width: u8 },
    #[error("window width {0} outside 1..=127")]
    BadWidth(u8),
}

/// Base sequence number, width, and per-offset ack bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlidingWindow {
    base: u8,
    width: u8,
    acks: AckBitmap,
}

impl SlidingWindow {
    /// Create a window starting at sequence number 0.
    pub fn new(width: u8) -> Result<Self, WindowError> {
        Self::with_base(0, width)
    }

    pub fn with_base(base: u8, width: u8) -> Result<Self, WindowError> {
        if width == 0 || width > MAX_WIDTH {
            return Err(WindowError::BadWidth(width));
        }
        Ok(Self {
            base,
            width,
            acks: AckBitmap::new(),
        })
    }

    pub fn base(&self) -> u8 {
        self.base
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    pub fn bitmap(&self) -> &AckBitmap {
        &self.acks
    }

    /// `(seqnum − base) mod 256`.  Meaningful only for window or pre-window
    /// positions; no range check.
    pub fn distance(&self, seqnum: u8) -> usize {
        seqnum.wrapping_sub(self.base) as usize
    }

    /// `pos ∈ [base, base + width)` modulo 256.
    pub fn in_window(&self, pos: u8) -> bool {
        self.distance(pos) < self.width as usize
    }

    /// `pos ∈ [base − width, base)` modulo 256.
    pub fn in_prewindow(&self, pos: u8) -> bool {
        let behind = self.base.wrapping_sub(pos) as usize;
        (1..=self.width as usize).contains(&behind)
    }

    pub fn classify(&self, pos: u8) -> Position {
        if self.in_window(pos) {
            Position::InWindow(self.distance(pos))
        } else if self.in_prewindow(pos) {
            Position::PreWindow
        } else {
            Position::OutOfRange
        }
    }

    /// Bit already set at relative offset `rel_pos`.
    pub fn is_duplicate(&self, rel_pos: usize) -> bool {
        self.acks.test(rel_pos)
    }

    /// Mark `seqnum` as acked (sender) or arrived (receiver).  Returns its
    /// offset from base.
    pub fn mark(&mut self, seqnum: u8) -> Result<usize, WindowError> {
        if !self.in_window(seqnum) {
            return Err(self.not_in_window(seqnum));
        }
        let i = self.distance(seqnum);
        // i < width ≤ 127, always inside the bitmap
        self.acks
            .set(i)
            .map_err(|_| self.not_in_window(seqnum))?;
        Ok(i)
    }

    /// How far the window moves once base is resolved: base itself plus the
    /// run of set bits from offset 1, stopping at the first gap or at width.
    pub fn consecutive_run(&self) -> usize {
        1 + self.acks.run_from(1, self.width as usize)
    }

    /// Shift the bitmap right by `s` and move base forward by `s`.
    pub fn advance(&mut self, s: usize) {
        self.acks.shift(s);
        self.base = self.base.wrapping_add((s % 256) as u8);
    }

    /// Sender-side ack processing.
    ///
    /// An ack at base slides the window past every already-acked successor
    /// and returns the shift; an ack elsewhere in the window just sets its
    /// bit and returns 0.  Acks outside the window are ignored.
    pub fn acknowledge(&mut self, seqnum: u8) -> usize {
        match self.classify(seqnum) {
            Position::InWindow(0) => {
                let s = self.consecutive_run();
                self.advance(s);
                s
            }
            Position::InWindow(i) => {
                if let Err(e) = self.acks.set(i) {
                    log::warn!("[sr] ack seq={seqnum} base={}: {e}", self.base);
                }
                0
            }
            Position::PreWindow | Position::OutOfRange => 0,
        }
    }

    /// `true` when `seqnum` needs no more retransmission: base has slid past
    /// it, or its bit is set.
    pub fn is_resolved(&self, seqnum: u8) -> bool {
        match self.classify(seqnum) {
            Position::InWindow(i) => self.acks.test(i),
            _ => true,
        }
    }

    fn not_in_window(&self, seqnum: u8) -> WindowError {
        WindowError::NotInWindow {
            seqnum,
            base: self.base,
            width: self.width,
        }
    }
}

impl fmt::Display for SlidingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} base={}",
            self.acks.render(self.width as usize),
            self.base
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_width() {
        assert_eq!(SlidingWindow::new(0), Err(WindowError::BadWidth(0)));
        assert_eq!(SlidingWindow::new(128), Err(WindowError::BadWidth(128)));
        assert!(SlidingWindow::new(127).is_ok());
    }

    #[test]
    fn window_wraps_at_256() {
        let w = SlidingWindow::with_base(254, 4).unwrap();
        for pos in [254u8, 255, 0, 1] {
            assert!(w.in_window(pos), "{pos} should be in window");
        }
        assert!(!w.in_window(2));
        assert!(!w.in_window(253));
        assert_eq!(w.distance(1), 3);
    }

    #[test]
    fn prewindow_wraps_at_256() {
        let w = SlidingWindow::with_base(1, 4).unwrap();
        for pos in [253u8, 254, 255, 0] {
            assert!(w.in_prewindow(pos), "{pos} should be in pre-window");
        }
        assert!(!w.in_prewindow(1));
        assert!(!w.in_prewindow(252));
    }

    #[test]
    fn partitions_are_exclusive_for_every_base_and_width() {
        for width in 1..=MAX_WIDTH {
            for base in 0..=255u8 {
                let w = SlidingWindow::with_base(base, width).unwrap();
                let mut inside = 0;
                let mut before = 0;
                for pos in 0..=255u8 {
                    let a = w.in_window(pos);
                    let b = w.in_prewindow(pos);
                    assert!(!(a && b), "base={base} width={width} pos={pos}");
                    inside += a as usize;
                    before += b as usize;
                }
                assert_eq!(inside, width as usize);
                assert_eq!(before, width as usize);
            }
        }
    }

    #[test]
    fn advance_keeps_distance_consistent() {
        let mut w = SlidingWindow::with_base(250, 10).unwrap();
        let target = 250u8.wrapping_add(7);
        assert_eq!(w.distance(target), 7);
        w.advance(7);
        assert_eq!(w.base(), 1);
        assert_eq!(w.distance(target), 0);
    }

    #[test]
    fn advance_moves_marked_bits() {
        let mut w = SlidingWindow::new(8).unwrap();
        w.mark(3).unwrap();
        w.advance(2);
        assert!(w.is_duplicate(1));
        assert!(!w.is_duplicate(3));
    }

    #[test]
    fn mark_outside_window_fails() {
        let mut w = SlidingWindow::new(4).unwrap();
        assert_eq!(
            w.mark(4),
            Err(WindowError::NotInWindow {
                seqnum: 4,
                base: 0,
                width: 4
            })
        );
    }

    #[test]
    fn cumulative_ack_collapses_window() {
        let mut w = SlidingWindow::new(4).unwrap();
        assert_eq!(w.acknowledge(2), 0);
        assert_eq!(w.acknowledge(1), 0);
        assert_eq!(w.acknowledge(3), 0);
        assert!(w.is_duplicate(1) && w.is_duplicate(2) && w.is_duplicate(3));
        assert_eq!(w.consecutive_run(), 4);
        assert_eq!(w.acknowledge(0), 4);
        assert_eq!(w.base(), 4);
        assert!(w.bitmap().is_empty());
    }

    #[test]
    fn gap_stops_the_slide() {
        let mut w = SlidingWindow::new(8).unwrap();
        w.acknowledge(1);
        w.acknowledge(3);
        assert_eq!(w.acknowledge(0), 2);
        assert_eq!(w.base(), 2);
        assert!(w.is_duplicate(1)); // seq 3
    }

    #[test]
    fn width_one_is_stop_and_wait() {
        let mut w = SlidingWindow::with_base(255, 1).unwrap();
        assert_eq!(w.consecutive_run(), 1);
        assert_eq!(w.acknowledge(255), 1);
        assert_eq!(w.base(), 0);
    }

    #[test]
    fn stale_and_future_acks_ignored() {
        let mut w = SlidingWindow::with_base(10, 4).unwrap();
        assert_eq!(w.acknowledge(8), 0);
        assert_eq!(w.acknowledge(20), 0);
        assert_eq!(w.base(), 10);
        assert!(w.bitmap().is_empty());
    }

    #[test]
    fn ack_inside_window_marks_only_its_offset() {
        let mut w = SlidingWindow::with_base(250, 8).unwrap();
        assert_eq!(w.acknowledge(1), 0);
        assert!(w.bitmap().test(7));
        // repeated ack is idempotent, the one just behind base is ignored
        assert_eq!(w.acknowledge(1), 0);
        assert_eq!(w.acknowledge(249), 0);
        assert!((0..7).all(|i| !w.bitmap().test(i)));
        assert!(w.bitmap().test(7));
        assert_eq!(w.base(), 250);
    }

    #[test]
    fn resolved_after_slide_or_mark() {
        let mut w = SlidingWindow::new(4).unwrap();
        assert!(!w.is_resolved(1));
        w.acknowledge(1);
        assert!(w.is_resolved(1));
        w.acknowledge(0);
        assert!(w.is_resolved(0));
        assert!(!w.is_resolved(2));
    }

    #[test]
    fn display_shows_bits_and_base() {
        let mut w = SlidingWindow::new(4).unwrap();
        w.mark(2).unwrap();
        assert_eq!(w.to_string(), "0010 base=0");
    }
}

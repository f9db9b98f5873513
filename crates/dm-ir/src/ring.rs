//! Output ring shared between a foreground writer and the DMA drain.

use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;

use crate::frame::Frame;

/// A region handed out by [`DmaRing::reserve`] that has not been
/// published yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Reservation {
    start: usize,
    len: usize,
    /// Reserved behind the read cursor, at the secondary write cursor.
    wrapped: bool,
}

/// Ring of frames drained by hardware DMA, written with a two-phase
/// reserve/commit protocol.
///
/// Committed data lives in `[r, w)` and, once the primary cursor reached
/// the end of the buffer, in `[0, w2)` behind the read cursor. DMA always
/// needs a contiguous region, so the ring never splits a reservation
/// across the end of the buffer; instead it switches to the secondary
/// cursor and flips back once `[r, w)` is fully drained.
#[derive(Clone, Debug)]
pub struct DmaRing {
    frames: Vec<Frame>,
    r: usize,
    w: usize,
    w2: usize,
    pending: Option<Reservation>,
}

impl DmaRing {
    /// Create a zero-filled ring of `len` frames.
    pub fn new(len: usize) -> Self {
        assert!(len > 0, "dma ring: empty ring");
        Self {
            frames: vec![Frame::silence(); len],
            r: 0,
            w: 0,
            w2: 0,
            pending: None,
        }
    }

    /// Capacity in frames.
    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    /// Frames committed but not yet handed to DMA.
    pub fn buffered(&self) -> usize {
        (self.w - self.r) + self.w2
    }

    /// True if a region of `n` frames could be reserved right now.
    pub fn can_reserve(&self, n: usize) -> bool {
        let len = self.frames.len();
        if self.w2 == 0 && (self.w + n <= len || (self.r == self.w && n <= len)) {
            return true;
        }
        self.w2 + n <= self.r
    }

    /// Reserve `n` contiguous frames for writing. Returns `None` when the
    /// ring is full; the caller must wait for DMA to drain.
    pub fn reserve(&mut self, n: usize) -> Option<Range<usize>> {
        assert!(self.pending.is_none(), "dma ring: reservation already pending");
        if self.w2 == 0 && self.r == self.w && self.w + n > self.frames.len() {
            // Fully drained: restart at the front rather than wait on a
            // tail that is too short. Transfers copy their region when
            // started, so nothing still reads from it.
            self.r = 0;
            self.w = 0;
        }
        let res = if self.w2 == 0 && self.w + n <= self.frames.len() {
            Reservation { start: self.w, len: n, wrapped: false }
        } else if self.w2 + n <= self.r {
            Reservation { start: self.w2, len: n, wrapped: true }
        } else {
            return None;
        };
        self.pending = Some(res);
        Some(res.start..res.start + res.len)
    }

    /// True while a reservation is waiting to be committed.
    pub fn is_reserved(&self) -> bool {
        self.pending.is_some()
    }

    /// The currently reserved region, if any.
    pub fn reserved_mut(&mut self) -> Option<&mut [Frame]> {
        let res = self.pending?;
        Some(&mut self.frames[res.start..res.start + res.len])
    }

    /// Publish the pending reservation so that DMA may pick it up.
    pub fn commit(&mut self) {
        let Some(res) = self.pending.take() else {
            panic!("dma ring: commit without reservation");
        };
        if res.wrapped && self.w2 == res.start {
            self.w2 += res.len;
        } else {
            // Either a primary reservation, or a secondary one that became
            // primary because the drain flipped cursors in between.
            assert_eq!(self.w, res.start, "dma ring: stale reservation");
            self.w += res.len;
        }
    }

    /// Drop the pending reservation without publishing it.
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// Hand the next committed region (at most `max` frames) to DMA.
    pub fn take_dma(&mut self, max: usize) -> Option<Range<usize>> {
        if self.w == self.r {
            if self.w2 == 0 {
                return None;
            }
            self.r = 0;
            self.w = self.w2;
            self.w2 = 0;
        }
        let n = (self.w - self.r).min(max);
        if n == 0 {
            return None;
        }
        let range = self.r..self.r + n;
        self.r += n;
        Some(range)
    }

    pub fn frames(&self, range: Range<usize>) -> &[Frame] {
        &self.frames[range]
    }

    pub fn frames_mut(&mut self, range: Range<usize>) -> &mut [Frame] {
        &mut self.frames[range]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(ring: &mut DmaRing, n: usize, value: i16) -> bool {
        match ring.reserve(n) {
            Some(_) => {
                ring.reserved_mut().unwrap().fill(Frame::mono(value));
                ring.commit();
                true
            }
            None => false,
        }
    }

    #[test]
    fn fifo_order_across_wrap() {
        let mut ring = DmaRing::new(8);
        assert!(fill(&mut ring, 4, 1));
        assert!(fill(&mut ring, 4, 2));
        assert!(!fill(&mut ring, 2, 3));

        let a = ring.take_dma(4).unwrap();
        assert_eq!(ring.frames(a)[0], Frame::mono(1));

        // Primary cursor is at the end: the next write goes behind r.
        assert!(fill(&mut ring, 4, 3));
        assert_eq!(ring.buffered(), 8);

        let b = ring.take_dma(usize::MAX).unwrap();
        assert_eq!(b, 4..8);
        assert_eq!(ring.frames(b)[0], Frame::mono(2));
        let c = ring.take_dma(usize::MAX).unwrap();
        assert_eq!(c, 0..4);
        assert_eq!(ring.frames(c)[0], Frame::mono(3));
        assert!(ring.take_dma(usize::MAX).is_none());
    }

    #[test]
    fn take_dma_respects_max() {
        let mut ring = DmaRing::new(16);
        assert!(fill(&mut ring, 10, 1));
        assert_eq!(ring.take_dma(4), Some(0..4));
        assert_eq!(ring.take_dma(4), Some(4..8));
        assert_eq!(ring.take_dma(4), Some(8..10));
        assert_eq!(ring.take_dma(4), None);
    }

    #[test]
    fn uncommitted_data_is_not_drained() {
        let mut ring = DmaRing::new(8);
        ring.reserve(4).unwrap();
        assert!(ring.take_dma(usize::MAX).is_none());
        ring.commit();
        assert_eq!(ring.take_dma(usize::MAX), Some(0..4));
    }

    #[test]
    fn secondary_reservation_survives_cursor_flip() {
        let mut ring = DmaRing::new(8);
        assert!(fill(&mut ring, 6, 1));
        assert_eq!(ring.take_dma(6), Some(0..6));
        assert!(fill(&mut ring, 2, 2)); // primary at 6..8
        assert!(fill(&mut ring, 2, 3)); // secondary at 0..2
        let res = ring.reserve(2).unwrap(); // secondary at 2..4
        assert_eq!(res, 2..4);

        // Drain flips cursors while the reservation is being filled.
        assert_eq!(ring.take_dma(usize::MAX), Some(6..8));
        assert_eq!(ring.take_dma(usize::MAX), Some(0..2));
        ring.commit();
        assert_eq!(ring.take_dma(usize::MAX), Some(2..4));
    }

    #[test]
    fn drained_ring_restarts_at_front() {
        let mut ring = DmaRing::new(10);
        assert!(fill(&mut ring, 6, 1));
        assert_eq!(ring.take_dma(usize::MAX), Some(0..6));
        assert!(ring.can_reserve(6));
        assert_eq!(ring.reserve(6), Some(0..6));
    }

    #[test]
    fn cancel_releases_reservation() {
        let mut ring = DmaRing::new(4);
        ring.reserve(4).unwrap();
        ring.cancel();
        assert!(ring.can_reserve(4));
        assert!(ring.reserve(4).is_some());
    }
}

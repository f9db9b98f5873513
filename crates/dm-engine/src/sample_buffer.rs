//! Per-channel windowed cache over a waveform's sample stream.
//!
//! A sample buffer holds one contiguous window `[wpos, wpos + widx)` of the
//! (unrolled) waveform. The mix backend indexes it directly, so the window
//! always starts at index 0 of the backing memory and is never circular:
//! dropping old samples compacts the tail down to the start.

use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{fence, Ordering};

use dm_ir::SampleWidth;
use log::{debug, trace, warn};

use crate::waveform::WaveformRead;
use crate::WaveformKey;

/// Round a sample count up so that it spans a multiple of 8 bytes.
fn roundup8(nsamples: i32, shift: u32) -> i32 {
    let unit = 3 - shift;
    ((nsamples + ((8 >> shift) - 1)) >> unit) << unit
}

/// Windowed sample cache bound to one mixer channel.
#[derive(Debug, Default)]
pub struct SampleBuffer {
    /// Backing storage; `u64` words keep it 8-byte aligned.
    mem: Vec<u64>,
    width: SampleWidth,
    /// Capacity in samples of the current width.
    size: i32,
    /// Waveform position of sample index 0.
    wpos: i32,
    /// Samples held.
    widx: i32,
    /// First sample still needed by playback.
    ridx: i32,
    decoder: Option<WaveformKey>,
}

impl SampleBuffer {
    /// A closed buffer with no backing memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Give the buffer `nbytes` of zeroed backing memory (a multiple of 8)
    /// and reset it to an empty 8-bit window.
    pub fn init(&mut self, nbytes: usize) {
        assert!(nbytes % 8 == 0, "sample buffer: size {nbytes} not a multiple of 8");
        assert!(nbytes <= i32::MAX as usize, "sample buffer: size {nbytes} too large");
        *self = Self {
            mem: vec![0u64; nbytes / 8],
            width: SampleWidth::Bits8,
            size: nbytes as i32,
            ..Self::default()
        };
        // Whatever the CPU saw of this memory before is stale.
        fence(Ordering::SeqCst);
    }

    /// Release the backing memory.
    pub fn close(&mut self) {
        *self = Self::default();
    }

    pub fn is_closed(&self) -> bool {
        self.mem.is_empty()
    }

    /// Re-express the capacity for samples of `width`. Only legal on an
    /// empty buffer.
    pub fn set_bit_width(&mut self, width: SampleWidth) {
        assert!(
            self.widx == 0 && self.ridx == 0 && self.wpos == 0,
            "sample buffer: bit width change on a non-empty buffer"
        );
        let nbytes = self.size << self.width.shift();
        self.width = width;
        self.size = nbytes >> width.shift();
    }

    pub fn width(&self) -> SampleWidth {
        self.width
    }

    /// Capacity in samples.
    pub fn capacity(&self) -> i32 {
        self.size
    }

    /// Waveform position of the first cached sample.
    pub fn wpos(&self) -> i32 {
        self.wpos
    }

    /// Number of cached samples.
    pub fn widx(&self) -> i32 {
        self.widx
    }

    /// Index of the first sample still needed by playback.
    pub fn ridx(&self) -> i32 {
        self.ridx
    }

    /// Record which waveform fills this buffer. Only the identity is kept;
    /// the decoder itself is passed to [`get`](Self::get).
    pub fn bind(&mut self, decoder: Option<WaveformKey>) {
        self.decoder = decoder;
    }

    pub fn decoder(&self) -> Option<WaveformKey> {
        self.decoder
    }

    /// Backing memory as bytes.
    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.mem)
    }

    /// Cached samples, in the stored width, starting at [`wpos`](Self::wpos).
    pub fn cached(&self) -> &[u8] {
        &self.bytes()[..(self.widx << self.width.shift()) as usize]
    }

    /// Return the byte offset of waveform position `wpos`, decoding through
    /// `reader` whatever part of `[wpos, wpos + wlen)` is missing.
    ///
    /// A position outside the cached window (or an empty buffer) flushes
    /// the window and decodes from `wpos` with `seeking` set. If the decoder
    /// cannot supply everything, `wlen` is reduced to what is available.
    pub fn get<R>(&mut self, wpos: i32, wlen: &mut i32, reader: &mut R) -> usize
    where
        R: WaveformRead + ?Sized,
    {
        let shift = self.width.shift();
        trace!("sbuf: get wpos={:#x} wlen={:#x}", wpos, *wlen);

        if self.widx == 0 || wpos < self.wpos || wpos > self.wpos + self.widx {
            self.flush();
            self.wpos = wpos;
            reader.read(self, wpos, roundup8(*wlen, shift), true);
        } else {
            // Record now: the decoder may append more than asked and force
            // a compaction, which must keep everything from here on.
            self.ridx = wpos - self.wpos;

            let reuse = self.wpos + self.widx - wpos;
            if reuse < *wlen {
                reader.read(self, wpos + reuse, roundup8(*wlen - reuse, shift), false);
            }
        }

        let idx = wpos - self.wpos;
        if idx < 0 || idx >= self.widx {
            // Nothing decodable at this position: the caller plays silence.
            warn!("sbuf: no samples at {:#x} (cached {:#x}+{:#x})", wpos, self.wpos, self.widx);
            *wlen = 0;
            return 0;
        }

        let len = self.widx - idx;
        if len < *wlen {
            warn!("sbuf: decoder short by {} samples at {:#x}", *wlen - len, wpos);
            *wlen = len;
        }
        (idx << shift) as usize
    }

    /// Grow the window by `wlen` samples and return them for the decoder
    /// to fill.
    ///
    /// When the buffer is full, samples before the read cursor are dropped
    /// first (keeping 8-byte alignment). Panics if the request still does
    /// not fit: the buffer is too small for the way it is used.
    pub fn append(&mut self, wlen: i32) -> &mut [u8] {
        assert!(wlen >= 0, "sample buffer: negative append {wlen}");
        let shift = self.width.shift();

        if self.widx + wlen > self.size {
            assert!(
                self.widx >= self.ridx,
                "sample buffer: inconsistent cursors widx:{:#x} ridx:{:#x}",
                self.widx,
                self.ridx
            );
            let mut ridx = self.ridx;
            while (ridx << shift) & 7 != 0 {
                ridx -= 1;
            }
            self.discard(self.wpos + ridx);
        }

        assert!(
            self.widx + wlen <= self.size,
            "sample buffer: too small (ridx:{:#x} widx:{:#x} wlen:{:#x} size:{:#x})",
            self.ridx,
            self.widx,
            wlen,
            self.size
        );

        let start = (self.widx << shift) as usize;
        let end = start + ((wlen as usize) << shift);
        self.widx += wlen;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.mem);
        &mut bytes[start..end]
    }

    /// Append signed 8-bit samples.
    pub fn append_i8(&mut self, samples: &[i8]) {
        debug_assert_eq!(self.width, SampleWidth::Bits8);
        let dst = self.append(samples.len() as i32);
        dst.copy_from_slice(bytemuck::cast_slice(samples));
    }

    /// Append signed 16-bit samples (stored in native byte order).
    pub fn append_i16(&mut self, samples: &[i16]) {
        debug_assert_eq!(self.width, SampleWidth::Bits16);
        let dst = self.append(samples.len() as i32);
        dst.copy_from_slice(bytemuck::cast_slice(samples));
    }

    /// Drop every cached sample before waveform position `wpos`, moving
    /// the rest down to index 0. No-op if `wpos` is not past the window
    /// start.
    pub fn discard(&mut self, wpos: i32) {
        let idx = wpos - self.wpos;
        if idx <= 0 {
            return;
        }
        let idx = idx.min(self.widx);
        let shift = self.width.shift();

        trace!(
            "sbuf: discard wpos={:#x} idx={:#x} start={:#x} widx={:#x}",
            wpos,
            idx,
            self.wpos,
            self.widx
        );
        let kept = ((self.widx - idx) << shift) as usize;
        if kept > 0 {
            trace!("sbuf: compacting {:#x} bytes", kept);
            let src = (idx << shift) as usize;
            let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.mem);
            bytes.copy_within(src..src + kept, 0);
        }

        self.wpos += idx;
        self.widx -= idx;
        self.ridx = (self.ridx - idx).max(0);
    }

    /// Forget the cached window.
    pub fn flush(&mut self) {
        self.wpos = 0;
        self.widx = 0;
        self.ridx = 0;
    }

    /// Move the window to a new logical position without touching its
    /// contents (used when re-wrapping an unrolled loop).
    pub(crate) fn rebase(&mut self, wpos: i32) {
        self.wpos = wpos;
    }

    /// Buffer size in bytes for one channel.
    pub(crate) fn size_bytes(&self) -> usize {
        self.mem.len() * 8
    }
}

//! Channel descriptor uploaded to the mixing coprocessor.

use bytemuck::{Pod, Zeroable};

use crate::fixed::Fx32;

/// Mask of the sample width shift inside [`ChannelDescriptor::flags`].
pub const CH_FLAGS_BPS_SHIFT: u32 = 3;

/// Width of the signed samples a waveform produces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SampleWidth {
    Bits8,
    #[default]
    Bits16,
}

impl SampleWidth {
    /// Parse a bit count; only 8 and 16 are supported.
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(SampleWidth::Bits8),
            16 => Some(SampleWidth::Bits16),
            _ => None,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            SampleWidth::Bits8 => 8,
            SampleWidth::Bits16 => 16,
        }
    }

    /// log2 of the number of bytes per sample.
    pub fn shift(self) -> u32 {
        match self {
            SampleWidth::Bits8 => 0,
            SampleWidth::Bits16 => 1,
        }
    }

    pub fn bytes(self) -> usize {
        1 << self.shift()
    }
}

/// Per-channel state read and written by the coprocessor mix program.
///
/// The layout is the program's ABI: six 32-bit words in this exact order.
/// `pos`, `step`, `len` and `loop_len` are Q20.12 values pre-scaled by the
/// sample width shift, so their integer part counts bytes. Positions are
/// relative to the sample `ptr` addresses in the channel's sample buffer,
/// so `ptr + (pos >> 12)` addresses the current sample directly and `len`
/// counts from there.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ChannelDescriptor {
    pub pos: Fx32,
    pub step: Fx32,
    pub len: Fx32,
    pub loop_len: Fx32,
    pub ptr: u32,
    pub flags: u32,
}

const _: () = assert!(core::mem::size_of::<ChannelDescriptor>() == 6 * 4);

impl ChannelDescriptor {
    /// Sample width shift encoded in `flags`.
    pub fn bps(&self) -> u32 {
        self.flags & CH_FLAGS_BPS_SHIFT
    }

    /// Length in samples.
    pub fn len_samples(&self) -> i32 {
        self.len.whole(self.bps())
    }

    /// Loop length in samples.
    pub fn loop_len_samples(&self) -> i32 {
        self.loop_len.whole(self.bps())
    }

    /// Serialize as the coprocessor sees it (big-endian words).
    pub fn to_be_bytes(&self) -> [u8; 24] {
        let words = [
            self.pos.raw() as u32,
            self.step.raw() as u32,
            self.len.raw() as u32,
            self.loop_len.raw() as u32,
            self.ptr,
            self.flags,
        ];
        let mut out = [0u8; 24];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        out
    }
}

//! Per-channel mixer state and buffer limits.

use dm_ir::{ChannelDescriptor, Fx15, SampleWidth};

use crate::WaveformKey;

/// Polls per second a channel buffer is sized for.
pub const POLLS_PER_SECOND: u32 = 8;

/// Declared worst case for what a channel will play, used to size its
/// sample buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChannelLimits {
    /// Widest samples the channel will play: 8, 16, or 0 for "unknown"
    /// (treated as 16).
    pub max_bits: u32,
    /// Highest playback frequency in Hz; 0 means the mixer rate.
    pub max_frequency: f32,
    /// Hard cap on the buffer size in bytes (multiple of 8); 0 for none.
    pub max_buffer_bytes: usize,
}

impl ChannelLimits {
    pub fn new(max_bits: u32, max_frequency: f32, max_buffer_bytes: usize) -> Self {
        assert!(
            matches!(max_bits, 0 | 8 | 16),
            "channel limits: invalid bit width {max_bits}"
        );
        assert!(max_frequency >= 0.0, "channel limits: negative frequency {max_frequency}");
        assert!(
            max_buffer_bytes % 8 == 0,
            "channel limits: buffer size {max_buffer_bytes} not a multiple of 8"
        );
        Self { max_bits, max_frequency, max_buffer_bytes }
    }

    /// Buffer size in bytes for a mixer running at `sample_rate`: one poll
    /// worth of samples at the maximum frequency, rounded up to 8 bytes.
    pub fn buffer_bytes(&self, sample_rate: u32) -> usize {
        let mut nsamples = self.max_frequency as u32;
        if nsamples == 0 {
            nsamples = sample_rate;
        }
        let bytes_per_sample = if self.max_bits == 8 { 1 } else { 2 };
        let nbytes = (nsamples * bytes_per_sample) as f32 / POLLS_PER_SECOND as f32;
        let mut size = round_up(libm::ceilf(nbytes) as usize, 8);
        if self.max_buffer_bytes != 0 && size > self.max_buffer_bytes {
            size = self.max_buffer_bytes;
        }
        size
    }
}

impl Default for ChannelLimits {
    fn default() -> Self {
        Self { max_bits: 16, max_frequency: 0.0, max_buffer_bytes: 0 }
    }
}

pub(crate) const fn round_up(n: usize, d: usize) -> usize {
    n.div_ceil(d) * d
}

/// Mixer-side state for one channel.
#[derive(Clone, Debug)]
pub(crate) struct Channel {
    /// Coprocessor-visible state, relative to `base`. `ptr` is the byte
    /// offset in the channel's sample buffer of the run's first sample.
    pub desc: ChannelDescriptor,
    /// Waveform position, in samples, that descriptor position 0 stands for.
    pub base: i32,
    pub active: bool,
    pub lvol: Fx15,
    pub rvol: Fx15,
    /// Waveform being played; kept while playing so buffers can be
    /// re-bound after a reallocation.
    pub waveform: Option<WaveformKey>,
}

impl Channel {
    pub fn new() -> Self {
        Self {
            desc: ChannelDescriptor::default(),
            base: 0,
            active: false,
            lvol: Fx15::MAX,
            rvol: Fx15::MAX,
            waveform: None,
        }
    }

    pub fn width(&self) -> SampleWidth {
        if self.desc.bps() == 0 {
            SampleWidth::Bits8
        } else {
            SampleWidth::Bits16
        }
    }

    /// Stop producing sound. The descriptor pointer is cleared so the
    /// backend sees an inert channel.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.desc.ptr = 0;
    }
}

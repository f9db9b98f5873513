//! Channel state and per-poll execution.

use alloc::vec::Vec;

use dm_ir::{ChannelDescriptor, Frame, Fx15, Fx16, Fx32, FX32_FRAC, MAX_CHANNELS};
use log::{debug, trace};
use slotmap::SlotMap;

use crate::backend::{MixBackend, MixJob, SoftwareMixer};
use crate::channel::{Channel, ChannelLimits};
use crate::sample_buffer::SampleBuffer;
use crate::waveform::{wrap_wpos, Unrolled, Waveform, LOOP_OVERREAD};
use crate::WaveformKey;

/// Descriptor length reported for loops unrolled by the engine.
const UNROLLED_LEN: Fx32 = Fx32(0x7FFF_FFFF);

/// Mixer construction parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MixerConfig {
    pub channels: usize,
    /// Requested output rate; the hardware may only get close to it.
    pub sample_rate: u32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self { channels: MAX_CHANNELS, sample_rate: 44100 }
    }
}

/// The mixing engine: channels, their sample buffers, the waveform bank
/// and the mix backend.
///
/// Parameter setters only record state; everything takes effect on the
/// next [`exec`](Self::exec).
pub struct Engine<B: MixBackend = SoftwareMixer> {
    sample_rate: u32,
    channels: Vec<Channel>,
    buffers: Vec<SampleBuffer>,
    /// Sample buffers are allocated lazily, after limits are configured.
    buffers_ready: bool,
    limits: [ChannelLimits; MAX_CHANNELS],
    waveforms: SlotMap<WaveformKey, Waveform>,
    master_volume: f32,
    /// Descriptors as handed to the backend by the last exec.
    uploaded: [ChannelDescriptor; MAX_CHANNELS],
    backend: B,
    ticks: i64,
}

impl Engine<SoftwareMixer> {
    pub fn new(num_channels: usize, sample_rate: u32) -> Self {
        Self::with_backend(num_channels, sample_rate, SoftwareMixer::new())
    }
}

impl<B: MixBackend> Engine<B> {
    /// Create an engine mixing `num_channels` channels at `sample_rate`
    /// (the rate the output hardware actually runs at).
    pub fn with_backend(num_channels: usize, sample_rate: u32, backend: B) -> Self {
        assert!(
            (1..=MAX_CHANNELS).contains(&num_channels),
            "engine: invalid channel count {num_channels}"
        );
        assert!(sample_rate > 0, "engine: invalid sample rate");
        Self {
            sample_rate,
            channels: (0..num_channels).map(|_| Channel::new()).collect(),
            buffers: (0..num_channels).map(|_| SampleBuffer::new()).collect(),
            buffers_ready: false,
            limits: [ChannelLimits::default(); MAX_CHANNELS],
            waveforms: SlotMap::with_key(),
            master_volume: 1.0,
            uploaded: [ChannelDescriptor::default(); MAX_CHANNELS],
            backend,
            ticks: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Output samples produced since creation.
    pub fn ticks(&self) -> i64 {
        self.ticks
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn set_master_volume(&mut self, vol: f32) {
        self.master_volume = vol;
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    // --- Waveform bank ---

    pub fn add_waveform(&mut self, wave: Waveform) -> WaveformKey {
        self.waveforms.insert(wave)
    }

    /// Remove a waveform, stopping every channel that plays it.
    pub fn remove_waveform(&mut self, key: WaveformKey) -> Option<Waveform> {
        for ch in 0..self.channels.len() {
            if self.channels[ch].waveform == Some(key) || self.buffers[ch].decoder() == Some(key) {
                self.stop(ch);
            }
        }
        self.waveforms.remove(key)
    }

    pub fn waveform(&self, key: WaveformKey) -> Option<&Waveform> {
        self.waveforms.get(key)
    }

    // --- Channels ---

    fn channel_mut(&mut self, ch: usize) -> &mut Channel {
        let n = self.channels.len();
        match self.channels.get_mut(ch) {
            Some(c) => c,
            None => panic!("engine: invalid channel {ch} (have {n})"),
        }
    }

    fn channel(&self, ch: usize) -> &Channel {
        match self.channels.get(ch) {
            Some(c) => c,
            None => panic!("engine: invalid channel {ch} (have {})", self.channels.len()),
        }
    }

    /// Start playing `key` on channel `ch` from the beginning.
    ///
    /// Replaying the waveform already cached in the channel keeps the
    /// cache, so a short sound is decoded only once.
    pub fn play(&mut self, ch: usize, key: WaveformKey) {
        self.channel(ch);
        if !self.buffers_ready {
            self.init_buffers();
        }
        let Some(wave) = self.waveforms.get(key) else {
            panic!("engine: play of unknown waveform on channel {ch}");
        };

        if self.buffers[ch].decoder() != Some(key) {
            let width = wave.width();
            let bps = width.shift();
            let (len, loop_len, name, frequency) =
                (wave.len(), wave.loop_len(), wave.name(), wave.frequency());

            let sbuf = &mut self.buffers[ch];
            sbuf.flush();
            sbuf.set_bit_width(width);
            sbuf.bind(Some(key));

            let c = &mut self.channels[ch];
            c.desc.flags = bps;
            c.desc.len = Fx32::from_int(len).scaled(bps);
            c.desc.loop_len = Fx32::from_int(loop_len).scaled(bps);
            trace!(
                "engine: ch={} play {} len={:#x} loop_len={:#x}",
                ch,
                name,
                len,
                loop_len
            );
            self.set_frequency(ch, frequency);
        }

        let c = &mut self.channels[ch];
        c.waveform = Some(key);
        c.active = true;
        c.desc.ptr = 0;
        c.desc.pos = Fx32::ZERO;
        c.base = 0;
    }

    /// Stop the channel and forget its cached waveform, so that the
    /// waveform may be removed or replaced.
    pub fn stop(&mut self, ch: usize) {
        let c = self.channel_mut(ch);
        c.deactivate();
        c.waveform = None;
        self.buffers[ch].bind(None);
    }

    pub fn is_playing(&self, ch: usize) -> bool {
        self.channel(ch).active
    }

    /// Set the playback frequency in Hz.
    pub fn set_frequency(&mut self, ch: usize, frequency: f32) {
        let rate = self.sample_rate as f32;
        let c = self.channel_mut(ch);
        c.desc.step = Fx32::from_f32(frequency / rate).scaled(c.desc.bps());
    }

    /// Playback frequency in Hz.
    pub fn frequency(&self, ch: usize) -> f32 {
        let c = self.channel(ch);
        Fx32(c.desc.step.0 >> c.desc.bps()).to_f32() * self.sample_rate as f32
    }

    pub fn set_volume(&mut self, ch: usize, lvol: f32, rvol: f32) {
        let c = self.channel_mut(ch);
        c.lvol = Fx15::from_f32(lvol);
        c.rvol = Fx15::from_f32(rvol);
    }

    pub fn volume(&self, ch: usize) -> (Fx15, Fx15) {
        let c = self.channel(ch);
        (c.lvol, c.rvol)
    }

    /// Volume plus pan (0.0 = left, 0.5 = center, 1.0 = right).
    pub fn set_vol_pan(&mut self, ch: usize, vol: f32, pan: f32) {
        self.set_volume(ch, vol * (1.0 - pan), vol * pan);
    }

    /// Place the channel in a 5.0 surround field, downmixed to stereo with
    /// the Dolby Pro Logic II matrix.
    pub fn set_dolby(&mut self, ch: usize, fl: f32, fr: f32, c: f32, sl: f32, sr: f32) {
        const KF: f32 = 1.0;
        const KC: f32 = core::f32::consts::FRAC_1_SQRT_2;
        const KA: f32 = 0.866_025_4;
        const KB: f32 = 0.5;
        const KTOT: f32 = KF + KC + KA + KB;

        let (kf, kc, kb) = (KF / KTOT, KC / KTOT, KB / KTOT);
        self.set_volume(
            ch,
            fl * kf + c * kc - sl * kb - sr * kb,
            fr * kf + c * kc + sl * kb + sr * kb,
        );
    }

    /// Seek, in samples.
    pub fn set_position(&mut self, ch: usize, pos: f32) {
        let c = self.channel_mut(ch);
        let whole = libm::floorf(pos);
        c.base = whole as i32;
        c.desc.pos = Fx32::from_f32(pos - whole).scaled(c.desc.bps());
    }

    /// Current position in samples.
    pub fn position(&self, ch: usize) -> f32 {
        let c = self.channel(ch);
        c.base as f32 + Fx32(c.desc.pos.0 >> c.desc.bps()).to_f32()
    }

    /// Declare the worst case a channel will play. Frees every channel's
    /// sample buffer: they are sized together and reallocated on next use.
    pub fn set_limits(&mut self, ch: usize, limits: ChannelLimits) {
        self.channel(ch);
        self.limits[ch] = limits;
        if self.buffers_ready {
            debug!("engine: limits changed on ch={}, releasing sample buffers", ch);
            for sbuf in &mut self.buffers {
                sbuf.close();
            }
            self.buffers_ready = false;
        }
    }

    pub fn limits(&self, ch: usize) -> ChannelLimits {
        self.channel(ch);
        self.limits[ch]
    }

    pub fn sample_buffer(&self, ch: usize) -> &SampleBuffer {
        self.channel(ch);
        &self.buffers[ch]
    }

    /// The descriptor handed to the backend for `ch` by the last exec.
    pub fn uploaded_descriptor(&self, ch: usize) -> ChannelDescriptor {
        self.channel(ch);
        self.uploaded[ch]
    }

    fn init_buffers(&mut self) {
        let mut total = 0;
        for (ch, sbuf) in self.buffers.iter_mut().enumerate() {
            let size = self.limits[ch].buffer_bytes(self.sample_rate);
            sbuf.init(size);
            total += sbuf.size_bytes();

            // Channels that kept playing across a reallocation start over
            // with an empty cache in their own format.
            let c = &self.channels[ch];
            if c.active || c.waveform.is_some() {
                sbuf.set_bit_width(c.width());
                sbuf.bind(c.waveform);
            }
        }
        self.buffers_ready = true;
        debug!("engine: allocated {} bytes of sample buffers", total);
    }

    /// Mix `out.len()` frames.
    pub fn exec(&mut self, out: &mut [Frame]) {
        if !self.buffers_ready {
            self.init_buffers();
        }
        let num_samples = out.len() as i64;
        if num_samples == 0 {
            return;
        }
        trace!("engine: exec {:#x} samples", num_samples);

        let mut fake_loop: u32 = 0;
        let Self { channels, buffers, waveforms, .. } = self;

        for (i, (c, sbuf)) in channels.iter_mut().zip(buffers.iter_mut()).enumerate() {
            if !c.active {
                continue;
            }
            let Some(wave) = c.waveform.and_then(|key| waveforms.get_mut(key)) else {
                c.deactivate();
                continue;
            };

            let bps = c.desc.bps();
            let bps_fx = bps + FX32_FRAC;
            let len = wave.len();
            let loop_len = wave.loop_len();

            // The descriptor only carries the fraction plus this run's
            // advance; whole samples live in `base`.
            let whole = c.desc.pos.0 >> bps_fx;
            c.base = c.base.saturating_add(whole);
            c.desc.pos.0 -= whole << bps_fx;

            let mut wpos = c.base;
            let advance = (c.desc.pos.0 as i64 + c.desc.step.0 as i64 * (num_samples - 1)) >> bps_fx;
            let mut wlen = i32::try_from(advance + 1).unwrap_or(i32::MAX);
            assert!(wlen >= 0, "engine: ch={} position overflow", i);
            trace!(
                "engine: ch={} wpos={:#x} wlen={:#x} len={:#x} loop_len={:#x} cap={:#x}",
                i,
                wpos,
                wlen,
                len,
                loop_len,
                sbuf.capacity()
            );

            // Where the window requested from the cache starts; it differs
            // from `wpos` only while a fitting loop is resident.
            let mut window = wpos;

            if loop_len == 0 {
                if wpos >= len {
                    c.deactivate();
                    continue;
                }
                wlen = wlen.min(len - wpos);
            } else if loop_len + (LOOP_OVERREAD >> bps) <= sbuf.capacity() {
                // The whole loop fits: once inside it, keep exactly the loop
                // plus the over-read margin cached so it is decoded once.
                // Only the window wraps; the backend folds the position.
                let loop_pos = len - loop_len;
                if wpos >= len {
                    wpos = wrap_wpos(wpos, len, loop_len);
                }
                if wpos >= loop_pos {
                    trace!("engine: ch={} align loop at {:#x}", i, loop_pos);
                    sbuf.discard(loop_pos);
                    window = loop_pos;
                    wlen = loop_len;
                } else {
                    wlen = wlen.min(len - wpos);
                }
                wlen += LOOP_OVERREAD >> bps;
            } else {
                // The loop is unrolled into the buffer. Re-wrap positions
                // once both cache and channel are past the end so they do
                // not grow without bound.
                if sbuf.wpos() > len && wpos > len {
                    trace!("engine: ch={} re-wrap unrolled loop at {:#x}", i, sbuf.wpos());
                    sbuf.discard(wpos);
                    sbuf.rebase(wrap_wpos(sbuf.wpos(), len, loop_len));
                    wpos = wrap_wpos(wpos, len, loop_len);
                    c.base = wpos;
                    window = wpos;
                }
                // The backend sees a flat stream: no loop for it to follow.
                fake_loop |= 1 << i;
            }

            // Descriptor coordinates start at `wpos` for this run.
            c.desc.len = Fx32::from_int(len.saturating_sub(wpos)).scaled(bps);
            let offset = sbuf.get(window, &mut wlen, &mut Unrolled(wave));
            let skip = if wlen > 0 { (wpos - window) << bps } else { 0 };
            c.desc.ptr = offset as u32 + skip as u32;
        }

        self.run_backend(out, fake_loop);
        self.ticks += num_samples;
    }

    /// Hand the prepared channels to the backend and read positions back.
    fn run_backend(&mut self, out: &mut [Frame], fake_loop: u32) {
        let n = self.channels.len();
        self.backend.wait();

        let mut lvol = [Fx15::ZERO; MAX_CHANNELS];
        let mut rvol = [Fx15::ZERO; MAX_CHANNELS];
        let mut sources: [Option<&[u8]>; MAX_CHANNELS] = [None; MAX_CHANNELS];

        for (i, c) in self.channels.iter().enumerate() {
            let mut d = c.desc;
            if fake_loop & (1 << i) != 0 {
                d.len = UNROLLED_LEN;
                d.loop_len = Fx32::ZERO;
            }
            self.uploaded[i] = d;

            // Inactive channels get zero volume so that smoothing restarts
            // from silence when they are keyed on again.
            if c.active {
                lvol[i] = c.lvol;
                rvol[i] = c.rvol;
                // Only decoded samples: anything else reads as silence.
                sources[i] = Some(self.buffers[i].cached());
            }
        }

        let job = MixJob {
            channels: &mut self.uploaded[..n],
            sources: &sources[..n],
            lvol: &lvol[..n],
            rvol: &rvol[..n],
            master: Fx16::from_f32(self.master_volume),
        };
        let backend = &mut self.backend;
        #[cfg(feature = "alloc_check")]
        assert_no_alloc::assert_no_alloc(|| backend.run(job, out));
        #[cfg(not(feature = "alloc_check"))]
        backend.run(job, out);

        for (c, d) in self.channels.iter_mut().zip(&self.uploaded[..n]) {
            c.desc.pos = d.pos;
            // A non-looping channel that ran off its end is done.
            if c.active && c.desc.loop_len.0 == 0 && c.desc.pos.0 >= c.desc.len.0 {
                c.deactivate();
            }
        }
    }
}

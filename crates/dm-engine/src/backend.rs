//! Mix backends: the coprocessor hand-off.
//!
//! The engine prepares a [`MixJob`] (channel descriptors, volumes, sample
//! sources) and hands it to a [`MixBackend`], which resamples and mixes
//! every channel into interleaved stereo frames and advances the channel
//! positions. The engine must not touch job inputs while a job is in
//! flight, so every hand-off starts with [`MixBackend::wait`].

use dm_ir::{ChannelDescriptor, Frame, Fx15, Fx16, FX32_FRAC, MAX_CHANNELS};

/// One mix job.
pub struct MixJob<'a> {
    /// Per-channel descriptors. Positions are written back on completion.
    pub channels: &'a mut [ChannelDescriptor],
    /// Decoded samples each descriptor's `ptr` points into; `None` for
    /// inactive channels. Reads outside the slice are silence.
    pub sources: &'a [Option<&'a [u8]>],
    pub lvol: &'a [Fx15],
    pub rvol: &'a [Fx15],
    pub master: Fx16,
}

/// Executes mix jobs.
pub trait MixBackend {
    /// Block until the previous job has completed.
    fn wait(&mut self);

    /// Mix `out.len()` frames. On return the job's descriptors hold the
    /// updated positions.
    fn run(&mut self, job: MixJob<'_>, out: &mut [Frame]);
}

/// Volume smoothing: each output sample moves the current volume
/// `1/2^VOL_SMOOTH_SHIFT` of the way to its target.
const VOL_SMOOTH_SHIFT: u32 = 3;

/// Reference software implementation of the mix job.
///
/// Linear interpolation between neighbouring samples, one-pole volume
/// smoothing, saturating stereo output. Reads outside a channel's source
/// memory return silence.
#[derive(Clone, Debug)]
pub struct SoftwareMixer {
    /// Smoothed volumes, kept across jobs.
    lcur: [i32; MAX_CHANNELS],
    rcur: [i32; MAX_CHANNELS],
}

impl SoftwareMixer {
    pub fn new() -> Self {
        Self {
            lcur: [0; MAX_CHANNELS],
            rcur: [0; MAX_CHANNELS],
        }
    }

    /// Current smoothed volume of a channel, as Q1.15.
    pub fn current_volume(&self, ch: usize) -> (i32, i32) {
        (self.lcur[ch], self.rcur[ch])
    }
}

impl Default for SoftwareMixer {
    fn default() -> Self {
        Self::new()
    }
}

fn smooth(cur: &mut i32, target: i32) {
    let diff = target - *cur;
    if diff.abs() < (1 << VOL_SMOOTH_SHIFT) {
        *cur = target;
    } else {
        *cur += diff >> VOL_SMOOTH_SHIFT;
    }
}

/// Fetch sample `idx` (in samples, possibly negative) relative to `ptr`.
#[inline]
fn fetch(src: &[u8], ptr: u32, idx: i32, bps: u32) -> i32 {
    let off = ptr.wrapping_add((idx as u32) << bps) as usize;
    if bps == 0 {
        match src.get(off) {
            Some(&b) => ((b as i8) as i32) << 8,
            None => 0,
        }
    } else {
        match src.get(off..off + 2) {
            Some(b) => i16::from_ne_bytes([b[0], b[1]]) as i32,
            None => 0,
        }
    }
}

impl MixBackend for SoftwareMixer {
    fn wait(&mut self) {}

    fn run(&mut self, job: MixJob<'_>, out: &mut [Frame]) {
        let MixJob { channels, sources, lvol, rvol, master } = job;
        let n = channels.len();
        debug_assert!(sources.len() >= n && lvol.len() >= n && rvol.len() >= n);
        let master = master.raw() as i64;

        for frame in out.iter_mut() {
            let mut left: i64 = 0;
            let mut right: i64 = 0;

            for (i, desc) in channels.iter_mut().enumerate() {
                smooth(&mut self.lcur[i], lvol[i].raw() as i32);
                smooth(&mut self.rcur[i], rvol[i].raw() as i32);

                let Some(src) = sources[i] else {
                    continue;
                };
                if desc.loop_len.0 == 0 && desc.pos.0 >= desc.len.0 {
                    continue;
                }

                let bps = desc.bps();
                let whole = desc.pos.0 >> (FX32_FRAC + bps);
                let frac = (desc.pos.0 >> bps) & ((1 << FX32_FRAC) - 1);
                let s0 = fetch(src, desc.ptr, whole, bps);
                let s1 = fetch(src, desc.ptr, whole + 1, bps);
                let s = s0 + (((s1 - s0) * frac) >> FX32_FRAC);

                left += ((s * self.lcur[i]) >> 15) as i64;
                right += ((s * self.rcur[i]) >> 15) as i64;

                desc.pos.0 = desc.pos.0.saturating_add(desc.step.0);
                if desc.loop_len.0 != 0 && desc.pos.0 >= desc.len.0 {
                    desc.pos.0 -= desc.loop_len.0;
                }
            }

            *frame = Frame::saturating(
                ((left * master) >> 16) as i32,
                ((right * master) >> 16) as i32,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dm_ir::Fx32;

    fn desc16(len: i32, loop_len: i32, step: f32) -> ChannelDescriptor {
        ChannelDescriptor {
            pos: Fx32::ZERO,
            step: Fx32::from_f32(step).scaled(1),
            len: Fx32::from_int(len).scaled(1),
            loop_len: Fx32::from_int(loop_len).scaled(1),
            ptr: 0,
            flags: 1,
        }
    }

    fn bytes16(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    fn run(
        mixer: &mut SoftwareMixer,
        descs: &mut [ChannelDescriptor],
        src: &[Option<&[u8]>],
        frames: usize,
    ) -> Vec<Frame> {
        let vol = [Fx15::MAX; MAX_CHANNELS];
        let mut out = vec![Frame::silence(); frames];
        mixer.run(
            MixJob {
                channels: descs,
                sources: src,
                lvol: &vol,
                rvol: &vol,
                master: Fx16::MAX,
            },
            &mut out,
        );
        out
    }

    #[test]
    fn unit_step_reproduces_samples_after_smoothing() {
        let data = bytes16(&[1000; 64]);
        let mut descs = [desc16(64, 0, 1.0)];
        let mut mixer = SoftwareMixer::new();
        let out = run(&mut mixer, &mut descs, &[Some(data.as_slice())], 64);
        // Volume ramps up from zero, then holds.
        assert!(out[0].left < out[63].left);
        assert!((out[63].left - 998).abs() <= 4, "got {}", out[63].left);
        assert_eq!(descs[0].pos, Fx32::from_int(64).scaled(1));
    }

    #[test]
    fn half_step_interpolates() {
        let data = bytes16(&[0, 2000, 2000, 2000]);
        let mut descs = [desc16(4, 0, 0.5)];
        let mut mixer = SoftwareMixer::new();
        mixer.lcur[0] = 0x7FFF;
        mixer.rcur[0] = 0x7FFF;
        let out = run(&mut mixer, &mut descs, &[Some(data.as_slice())], 2);
        assert_eq!(out[0].left, 0);
        assert!((out[1].left - 1000).abs() <= 4);
    }

    #[test]
    fn looping_channel_wraps_position() {
        let data = bytes16(&[7; 16]);
        let mut descs = [desc16(8, 4, 1.0)];
        let mut mixer = SoftwareMixer::new();
        run(&mut mixer, &mut descs, &[Some(data.as_slice())], 10);
        // Wraps back by the loop length on reaching 8.
        assert_eq!(descs[0].pos.whole(1), 6);
    }

    #[test]
    fn out_of_range_reads_are_silent() {
        let data = bytes16(&[5000; 4]);
        let mut descs = [desc16(0x1000, 0, 1.0)];
        descs[0].ptr = 1000;
        let mut mixer = SoftwareMixer::new();
        let out = run(&mut mixer, &mut descs, &[Some(data.as_slice())], 8);
        assert!(out.iter().all(|f| f.is_silent()));
    }

    #[test]
    fn empty_source_plays_silence_and_advances() {
        let empty: &[u8] = &[];
        let mut descs = [desc16(64, 0, 1.0)];
        let mut mixer = SoftwareMixer::new();
        let out = run(&mut mixer, &mut descs, &[Some(empty)], 16);
        assert!(out.iter().all(|f| f.is_silent()));
        assert_eq!(descs[0].pos.whole(1), 16);
    }

    #[test]
    fn inactive_source_is_skipped() {
        let mut descs = [desc16(64, 0, 1.0)];
        let mut mixer = SoftwareMixer::new();
        run(&mut mixer, &mut descs, &[None], 16);
        assert_eq!(descs[0].pos, Fx32::ZERO);
    }

    #[test]
    fn past_end_without_loop_is_silent() {
        let data = bytes16(&[5000; 4]);
        let mut descs = [desc16(4, 0, 1.0)];
        descs[0].pos = Fx32::from_int(4).scaled(1);
        let mut mixer = SoftwareMixer::new();
        mixer.lcur[0] = 0x7FFF;
        let out = run(&mut mixer, &mut descs, &[Some(data.as_slice())], 4);
        assert!(out.iter().all(|f| f.left == 0));
    }

    #[test]
    fn eight_bit_samples_are_scaled() {
        let data: Vec<u8> = vec![64u8; 8];
        let mut descs = [ChannelDescriptor {
            step: Fx32::from_int(1),
            len: Fx32::from_int(8),
            ..Default::default()
        }];
        let mut mixer = SoftwareMixer::new();
        mixer.lcur[0] = 0x7FFF;
        mixer.rcur[0] = 0x7FFF;
        let out = run(&mut mixer, &mut descs, &[Some(data.as_slice())], 4);
        assert!((out[0].left as i32 - (64 << 8)).abs() <= 4);
    }
}

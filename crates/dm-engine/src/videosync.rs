//! Frame-accurate audio pacing for a fixed video frame rate.

use dm_ir::quantum_len;

/// Translates a video frame rate into per-frame sample counts.
///
/// Each frame asks for `ceil` of the samples owed so far, rounded up to an
/// even count; the excess is carried into the next frame, so the total
/// never drifts from the ideal by more than one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VideoSync {
    fps: f32,
    sample_rate: u32,
    samples_per_frame: f32,
    counter: f32,
    current_frame_samples: u32,
}

impl VideoSync {
    /// Start pacing at `fps` for an output running at `sample_rate`. The
    /// first frame is already computed.
    pub fn new(sample_rate: u32, fps: f32) -> Self {
        assert!(fps > 0.0, "videosync: invalid fps {fps}");
        let mut vs = Self {
            fps,
            sample_rate,
            samples_per_frame: sample_rate as f32 / fps,
            counter: 0.0,
            current_frame_samples: 0,
        };
        vs.next_frame();
        vs
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn samples_per_frame(&self) -> f32 {
        self.samples_per_frame
    }

    /// Running remainder carried into the next frame.
    pub fn counter(&self) -> f32 {
        self.counter
    }

    /// Output ring size that can absorb one video frame of audio: the
    /// number of output quanta per frame, plus one for phase
    /// misalignment.
    pub fn suggested_buffer_size(&self) -> u32 {
        let quantum = quantum_len(self.sample_rate) as u32;
        let irqs_per_frame = libm::floorf(self.samples_per_frame / quantum as f32) as u32 + 1;
        (irqs_per_frame * quantum).next_multiple_of(2)
    }

    /// Samples to produce for the current frame (always even).
    pub fn current_frame_samples(&self) -> u32 {
        self.current_frame_samples
    }

    /// Advance to the next video frame.
    pub fn next_frame(&mut self) {
        self.counter += self.samples_per_frame;
        if self.counter < 0.0 {
            self.current_frame_samples = 0;
            return;
        }
        let samples = (libm::ceilf(self.counter) as u32).next_multiple_of(2);
        self.current_frame_samples = samples;
        self.counter -= samples as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_rate_has_no_drift() {
        let mut vs = VideoSync::new(48000, 60.0);
        assert_eq!(vs.samples_per_frame(), 800.0);
        for _ in 0..600 {
            assert_eq!(vs.current_frame_samples(), 800);
            assert_eq!(vs.counter(), 0.0);
            vs.next_frame();
        }
    }

    /// Per-frame sample counts for `frames` frames.
    fn frame_sizes(mut vs: VideoSync, frames: usize) -> Vec<u32> {
        (0..frames)
            .map(|_| {
                let n = vs.current_frame_samples();
                vs.next_frame();
                n
            })
            .collect()
    }

    #[test]
    fn fractional_rate_tracks_ideal_total() {
        let vs = VideoSync::new(44100, 59.94);
        let spf = vs.samples_per_frame() as f64;
        let mut total: u64 = 0;
        for (n, samples) in frame_sizes(vs, 1000).into_iter().enumerate() {
            assert_eq!(samples % 2, 0);
            total += samples as u64;
            let ideal = (n + 1) as f64 * spf;
            // The carried counter stays within one even rounding.
            assert!(
                (total as f64 - ideal).abs() < 2.05,
                "frame {n}: total {total} ideal {ideal}"
            );
        }
    }

    #[test]
    fn every_window_stays_within_one_rounding() {
        // The PAL DAC gets 44099 Hz when asked for 44100.
        for (rate, fps) in [(44_099, 60.0), (44_100, 59.94), (32_000, 50.0)] {
            let vs = VideoSync::new(rate, fps);
            let spf = vs.samples_per_frame() as f64;
            let sizes = frame_sizes(vs, 2000);
            for window in [1usize, 2, 7, 60, 600] {
                for start in 0..sizes.len() - window {
                    let sum: u32 = sizes[start..start + window].iter().sum();
                    let ideal = window as f64 * spf;
                    assert!(
                        (sum as f64 - ideal).abs() < 2.05,
                        "{rate} Hz @ {fps}: frames {start}..+{window} gave {sum}, ideal {ideal}"
                    );
                }
            }
        }
    }

    #[test]
    fn odd_frame_size_alternates_around_it() {
        let vs = VideoSync::new(44100, 60.0);
        // 735 samples per frame, emitted as 736 then 734.
        assert_eq!(frame_sizes(vs, 6), vec![736, 734, 736, 734, 736, 734]);
    }

    #[test]
    fn pal_frame_rate_is_exact() {
        let vs = VideoSync::new(44100, 50.0);
        // 882 samples per frame, already even.
        assert_eq!(frame_sizes(vs, 4), vec![882; 4]);
        assert_eq!(vs.counter(), 0.0);
    }

    #[test]
    fn suggested_buffer_covers_a_frame_plus_one_quantum() {
        let vs = VideoSync::new(48000, 60.0);
        // quantum 1920 > 800: one interrupt per frame, plus one.
        assert_eq!(vs.suggested_buffer_size(), 2 * 1920);

        let vs = VideoSync::new(44100, 10.0);
        // 4410 / 1760 = 2.5 -> 3 quanta.
        assert_eq!(vs.suggested_buffer_size(), 3 * 1760);
    }
}

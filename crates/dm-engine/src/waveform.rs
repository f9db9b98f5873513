//! Pull-based audio sources.

use alloc::boxed::Box;
use alloc::vec::Vec;

use arrayvec::ArrayString;
use dm_ir::SampleWidth;
use log::{trace, warn};

use crate::sample_buffer::SampleBuffer;

/// Length marking a stream whose total length is not known in advance.
pub const WAVEFORM_UNKNOWN_LEN: i32 = 0x7FFF_FFFF;

/// Bytes a mix backend may fetch past the logical end of a loop before
/// wrapping. Looping channels keep that many bytes of the loop start
/// cached right after the loop end.
pub const LOOP_OVERREAD: i32 = 64;

/// Decoder side of a waveform.
///
/// `read` must append at least `wlen` samples starting at `wpos` to
/// `sbuf` (via [`SampleBuffer::append`] and friends), unless the stream
/// genuinely ends earlier, in which case it appends what exists.
/// `seeking` is true when `wpos` may be discontinuous from the end of the
/// previous call; otherwise decoding continues where it left off.
///
/// Positions are always inside `[0, len)`: loops are unrolled by the
/// engine, never by the decoder.
pub trait WaveformRead: Send {
    fn read(&mut self, sbuf: &mut SampleBuffer, wpos: i32, wlen: i32, seeking: bool);
}

impl<F> WaveformRead for F
where
    F: FnMut(&mut SampleBuffer, i32, i32, bool) + Send,
{
    fn read(&mut self, sbuf: &mut SampleBuffer, wpos: i32, wlen: i32, seeking: bool) {
        self(sbuf, wpos, wlen, seeking)
    }
}

/// A playable source: format description plus its decoder.
pub struct Waveform {
    name: ArrayString<32>,
    width: SampleWidth,
    frequency: f32,
    len: i32,
    loop_len: i32,
    reader: Box<dyn WaveformRead>,
}

impl Waveform {
    /// Describe a source. `loop_len == 0` means no loop; otherwise the
    /// last `loop_len` samples of `[0, len)` repeat forever.
    pub fn new(
        name: &str,
        width: SampleWidth,
        frequency: f32,
        len: i32,
        loop_len: i32,
        reader: impl WaveformRead + 'static,
    ) -> Self {
        assert!(len >= 0, "waveform {name}: negative length {len}");
        assert!(
            (0..=len).contains(&loop_len),
            "waveform {name}: loop length {loop_len} outside [0, {len}]"
        );
        assert!(frequency >= 0.0, "waveform {name}: invalid frequency {frequency}");

        let mut short = ArrayString::new();
        for c in name.chars() {
            if short.try_push(c).is_err() {
                break;
            }
        }

        Self {
            name: short,
            width,
            frequency,
            len,
            loop_len,
            reader: Box::new(reader),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> SampleWidth {
        self.width
    }

    /// Nominal playback frequency in Hz.
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn len(&self) -> i32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn loop_len(&self) -> i32 {
        self.loop_len
    }

    pub fn is_looping(&self) -> bool {
        self.loop_len != 0
    }

    /// Map an unrolled position back into `[len - loop_len, len)`.
    /// Only valid on looping waveforms, for `wpos >= len`.
    pub(crate) fn wrap(&self, wpos: i32) -> i32 {
        wrap_wpos(wpos, self.len, self.loop_len)
    }
}

impl core::fmt::Debug for Waveform {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Waveform")
            .field("name", &self.name)
            .field("width", &self.width)
            .field("frequency", &self.frequency)
            .field("len", &self.len)
            .field("loop_len", &self.loop_len)
            .finish_non_exhaustive()
    }
}

pub(crate) fn wrap_wpos(wpos: i32, len: i32, loop_len: i32) -> i32 {
    assert!(loop_len != 0, "wrap on a non-looping waveform");
    assert!(wpos >= len, "wrap of position {wpos} before end {len}");
    ((wpos - len) % loop_len) + (len - loop_len)
}

/// Reader that presents a looping waveform as an endless flat stream.
///
/// The sample buffer only ever sees growing positions. This splits each
/// request into the part before the loop end and as many re-reads of the
/// loop body as needed, so decoders only see positions inside `[0, len)`.
pub(crate) struct Unrolled<'a>(pub &'a mut Waveform);

impl WaveformRead for Unrolled<'_> {
    fn read(&mut self, sbuf: &mut SampleBuffer, wpos: i32, wlen: i32, seeking: bool) {
        let wave = &mut *self.0;
        if wave.loop_len == 0 {
            wave.reader.read(sbuf, wpos, wlen, seeking);
            return;
        }

        let wpos = if wpos >= wave.len { wave.wrap(wpos) } else { wpos };
        let len1 = if wpos + wlen > wave.len { wave.len - wpos } else { wlen };
        let mut len2 = wlen - len1;

        // A request never spans two full loops: a loop that long would
        // have been cached whole instead of unrolled.
        let margin = LOOP_OVERREAD >> sbuf.width().shift();
        assert!(
            len2 <= wave.loop_len + margin,
            "waveform {}: double loop in single read (wpos:{:#x} wlen:{:#x} len:{:#x} loop_len:{:#x})",
            wave.name,
            wpos,
            wlen,
            wave.len,
            wave.loop_len
        );

        wave.reader.read(sbuf, wpos, len1, seeking);

        let loop_start = wave.len - wave.loop_len;
        while len2 > 0 {
            let ns = len2.min(wave.loop_len);
            trace!("waveform {}: unroll loop {:#x}+{:#x}", wave.name, loop_start, ns);
            wave.reader.read(sbuf, loop_start, ns, true);
            len2 -= ns;
        }
    }
}

/// Sample data held by a [`PcmWaveform`].
#[derive(Clone, Debug)]
enum Pcm {
    S8(Vec<i8>),
    S16(Vec<i16>),
}

/// In-memory signed PCM source.
///
/// Appends exactly what was asked for, or what is left at the end of the
/// data.
#[derive(Clone, Debug)]
pub struct PcmWaveform {
    data: Pcm,
}

impl PcmWaveform {
    pub fn from_i8(data: Vec<i8>) -> Self {
        Self { data: Pcm::S8(data) }
    }

    pub fn from_i16(data: Vec<i16>) -> Self {
        Self { data: Pcm::S16(data) }
    }

    pub fn width(&self) -> SampleWidth {
        match self.data {
            Pcm::S8(_) => SampleWidth::Bits8,
            Pcm::S16(_) => SampleWidth::Bits16,
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            Pcm::S8(d) => d.len(),
            Pcm::S16(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wrap into a [`Waveform`] playing at `frequency`.
    pub fn into_waveform(self, name: &str, frequency: f32, loop_len: i32) -> Waveform {
        let width = self.width();
        let len = i32::try_from(self.len()).unwrap_or(WAVEFORM_UNKNOWN_LEN);
        Waveform::new(name, width, frequency, len, loop_len, self)
    }
}

impl WaveformRead for PcmWaveform {
    fn read(&mut self, sbuf: &mut SampleBuffer, wpos: i32, wlen: i32, _seeking: bool) {
        let start = wpos.max(0) as usize;
        let end = start.saturating_add(wlen.max(0) as usize).min(self.len());
        if end < start + wlen.max(0) as usize {
            warn!("pcm: short read at {:#x}, {} of {} samples", wpos, end.saturating_sub(start), wlen);
        }
        if end <= start {
            return;
        }
        match &self.data {
            Pcm::S8(d) => sbuf.append_i8(&d[start..end]),
            Pcm::S16(d) => sbuf.append_i16(&d[start..end]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Calls = Arc<Mutex<Vec<(i32, i32, bool)>>>;

    /// Ramp source (sample value = position) that logs every call.
    fn ramp(len: i32, loop_len: i32) -> (Waveform, Calls) {
        let calls: Calls = Arc::default();
        let log = Arc::clone(&calls);
        let wave = Waveform::new(
            "ramp",
            SampleWidth::Bits16,
            8000.0,
            len,
            loop_len,
            move |sbuf: &mut SampleBuffer, wpos: i32, wlen: i32, seeking: bool| {
                log.lock().unwrap().push((wpos, wlen, seeking));
                let data: Vec<i16> = (wpos..wpos + wlen).map(|v| v as i16).collect();
                sbuf.append_i16(&data);
            },
        );
        (wave, calls)
    }

    fn buffer(bytes: usize) -> SampleBuffer {
        let mut sbuf = SampleBuffer::new();
        sbuf.init(bytes);
        sbuf.set_bit_width(SampleWidth::Bits16);
        sbuf
    }

    #[test]
    fn wrap_maps_into_loop_region() {
        assert_eq!(wrap_wpos(2000, 2000, 500), 1500);
        assert_eq!(wrap_wpos(2499, 2000, 500), 1999);
        assert_eq!(wrap_wpos(2500, 2000, 500), 1500);
        assert_eq!(wrap_wpos(3210, 2000, 500), 1710);
    }

    #[test]
    #[should_panic(expected = "loop length")]
    fn loop_longer_than_waveform_is_rejected() {
        ramp(100, 101);
    }

    #[test]
    fn long_names_are_truncated() {
        let wave = PcmWaveform::from_i8(vec![0; 4])
            .into_waveform("a name that is much longer than thirty-two bytes", 1.0, 0);
        assert_eq!(wave.name().len(), 32);
    }

    #[test]
    fn unrolled_read_splits_at_loop_end() {
        let (mut wave, calls) = ramp(100, 40);
        let mut sbuf = buffer(1024);
        Unrolled(&mut wave).read(&mut sbuf, 90, 30, true);

        let calls = calls.lock().unwrap().clone();
        assert_eq!(calls, vec![(90, 10, true), (60, 20, true)]);
        assert_eq!(sbuf.widx(), 30);
    }

    #[test]
    fn unrolled_read_wraps_positions_past_end() {
        let (mut wave, calls) = ramp(100, 40);
        let mut sbuf = buffer(1024);
        Unrolled(&mut wave).read(&mut sbuf, 145, 10, false);
        assert_eq!(calls.lock().unwrap()[0], (65, 10, false));
    }

    #[test]
    fn unrolled_read_repeats_short_loops_for_overread() {
        let (mut wave, calls) = ramp(100, 8);
        let mut sbuf = buffer(1024);
        // 2 samples to the end, then 30 samples of an 8-sample loop.
        Unrolled(&mut wave).read(&mut sbuf, 98, 32, false);
        let calls = calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![(98, 2, false), (92, 8, true), (92, 8, true), (92, 8, true), (92, 6, true)]
        );
    }

    #[test]
    #[should_panic(expected = "double loop")]
    fn unrolled_read_rejects_double_loop() {
        let (mut wave, _) = ramp(100, 40);
        let mut sbuf = buffer(4096);
        Unrolled(&mut wave).read(&mut sbuf, 90, 200, false);
    }

    #[test]
    fn pcm_appends_what_exists() {
        let mut pcm = PcmWaveform::from_i16(vec![1, 2, 3, 4, 5]);
        let mut sbuf = buffer(64);
        pcm.read(&mut sbuf, 3, 8, true);
        assert_eq!(sbuf.widx(), 2);
        pcm.read(&mut sbuf, 5, 8, false);
        assert_eq!(sbuf.widx(), 2);
    }
}

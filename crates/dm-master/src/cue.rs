//! Sounds and the cue list that schedules them.

use dm_engine::{Engine, EventCallback, MixBackend, PcmWaveform, Waveform, WaveformKey};
use dm_ir::SampleWidth;

use crate::ControllerError;

/// Raw PCM of a [`Sound`].
#[derive(Clone, Debug, PartialEq)]
pub enum SoundData {
    Pcm8(Vec<i8>),
    Pcm16(Vec<i16>),
}

impl SoundData {
    pub fn len(&self) -> usize {
        match self {
            SoundData::Pcm8(d) => d.len(),
            SoundData::Pcm16(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn width(&self) -> SampleWidth {
        match self {
            SoundData::Pcm8(_) => SampleWidth::Bits8,
            SoundData::Pcm16(_) => SampleWidth::Bits16,
        }
    }
}

/// A mono sound at its native playback rate.
#[derive(Clone, Debug, PartialEq)]
pub struct Sound {
    pub name: String,
    pub data: SoundData,
    pub frequency: f32,
    /// Length of the loop at the end of the sound, 0 for one-shot.
    pub loop_len: i32,
}

impl Sound {
    pub fn pcm16(name: &str, data: Vec<i16>, frequency: f32, loop_len: i32) -> Self {
        Self { name: name.to_string(), data: SoundData::Pcm16(data), frequency, loop_len }
    }

    pub fn pcm8(name: &str, data: Vec<i8>, frequency: f32, loop_len: i32) -> Self {
        Self { name: name.to_string(), data: SoundData::Pcm8(data), frequency, loop_len }
    }

    /// Sine tone of `samples` samples, `cycles` periods long. Looping the
    /// whole tone is seamless.
    pub fn sine(name: &str, samples: usize, cycles: usize, frequency: f32, looping: bool) -> Self {
        let data = (0..samples)
            .map(|i| {
                let phase = i as f32 * cycles as f32 * std::f32::consts::TAU / samples as f32;
                (phase.sin() * 24000.0) as i16
            })
            .collect();
        let loop_len = if looping { samples as i32 } else { 0 };
        Self::pcm16(name, data, frequency, loop_len)
    }

    pub(crate) fn to_waveform(&self) -> Waveform {
        let pcm = match &self.data {
            SoundData::Pcm8(d) => PcmWaveform::from_i8(d.clone()),
            SoundData::Pcm16(d) => PcmWaveform::from_i16(d.clone()),
        };
        pcm.into_waveform(&self.name, self.frequency, self.loop_len)
    }
}

/// What a cue does to its channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CueAction {
    /// Start a sound (index into the controller's sounds).
    Play { sound: usize, volume: f32, pan: f32 },
    Stop,
}

/// A channel action at an absolute sample time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cue {
    pub at: u64,
    pub channel: usize,
    pub action: CueAction,
}

impl Cue {
    pub fn play(at: u64, channel: usize, sound: usize) -> Self {
        Self { at, channel, action: CueAction::Play { sound, volume: 1.0, pan: 0.5 } }
    }

    pub fn stop(at: u64, channel: usize) -> Self {
        Self { at, channel, action: CueAction::Stop }
    }
}

/// Register `sounds` with the engine and build the event that walks the
/// cue list, firing every cue at its exact sample.
///
/// A single self-rescheduling event carries the whole list, so any number
/// of cues fits in the event queue. Returns the first cue's time with the
/// callback, or `None` when there is nothing to schedule.
pub(crate) fn sequencer<B: MixBackend + 'static>(
    engine: &mut Engine<B>,
    sounds: &[Sound],
    cues: &[Cue],
) -> Result<Option<(u32, EventCallback<B>)>, ControllerError> {
    let mut timed = cues
        .iter()
        .map(|c| match u32::try_from(c.at) {
            Ok(at) => Ok((at, *c)),
            Err(_) => Err(ControllerError::CueOutOfRange(c.at)),
        })
        .collect::<Result<Vec<(u32, Cue)>, _>>()?;
    timed.sort_by_key(|&(at, _)| at);
    let Some(&(first, _)) = timed.first() else {
        return Ok(None);
    };
    let keys: Vec<WaveformKey> = sounds.iter().map(|s| engine.add_waveform(s.to_waveform())).collect();

    let mut next = 0;
    let callback: EventCallback<B> = Box::new(move |engine: &mut Engine<B>| -> u32 {
        let now = timed[next].0;
        while let Some((_, cue)) = timed.get(next).filter(|&&(at, _)| at == now) {
            match cue.action {
                CueAction::Play { sound, volume, pan } => {
                    engine.play(cue.channel, keys[sound]);
                    engine.set_vol_pan(cue.channel, volume, pan);
                }
                CueAction::Stop => engine.stop(cue.channel),
            }
            next += 1;
        }
        match timed.get(next) {
            Some(&(at, _)) => at - now,
            None => 0,
        }
    });
    Ok(Some((first, callback)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dm_engine::SoftwareMixer;

    #[test]
    fn sine_loops_whole_tone() {
        let s = Sound::sine("a", 100, 1, 8000.0, true);
        assert_eq!(s.loop_len, 100);
        assert_eq!(s.data.len(), 100);
        assert_eq!(s.data.width(), SampleWidth::Bits16);
        let SoundData::Pcm16(d) = &s.data else { unreachable!() };
        assert_eq!(d[0], 0);
        assert!(d[25] > 23000);
    }

    #[test]
    fn sequencer_fires_cues_in_time_order() {
        let mut engine: Engine<SoftwareMixer> = Engine::new(2, 44100);
        let sounds = vec![Sound::sine("a", 400, 4, 44100.0, true)];
        let cues = [Cue::stop(300, 0), Cue::play(100, 0, 0), Cue::play(100, 1, 0)];
        let (first, mut cb) = sequencer(&mut engine, &sounds, &cues).unwrap().unwrap();
        assert_eq!(first, 100);

        assert_eq!(cb(&mut engine), 200);
        assert!(engine.is_playing(0) && engine.is_playing(1));
        assert_eq!(cb(&mut engine), 0);
        assert!(!engine.is_playing(0));
        assert!(engine.is_playing(1));
    }

    #[test]
    fn empty_cue_list_schedules_nothing() {
        let mut engine: Engine<SoftwareMixer> = Engine::new(1, 44100);
        assert!(sequencer(&mut engine, &[], &[]).unwrap().is_none());
    }

    #[test]
    fn cue_beyond_32_bit_ticks_is_rejected() {
        let mut engine: Engine<SoftwareMixer> = Engine::new(1, 44100);
        let sounds = vec![Sound::sine("a", 400, 4, 44100.0, false)];
        let late = 1u64 << 32;
        let result = sequencer(&mut engine, &sounds, &[Cue::play(0, 0, 0), Cue::play(late, 0, 0)]);
        assert!(matches!(result, Err(ControllerError::CueOutOfRange(at)) if at == late));
    }
}

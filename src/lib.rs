//! dragonmix: a streaming sample mixer and AI output driver for a console
//! audio pipeline.
//!
//! This crate re-exports the workspace members:
//! - [`dm_ir`]: frames, fixed-point formats, the channel descriptor ABI and
//!   the AI hardware surface.
//! - [`dm_engine`]: sample buffer cache, mixer engine, events, VideoSync.
//! - [`dm_audio`]: the standalone output driver and hardware backends.
//! - [`dm_master`]: the headless controller used by `dm-cli`.

pub use dm_audio;
pub use dm_engine;
pub use dm_ir;
pub use dm_master;

pub use dm_audio::{AudioDriver, AudioError, SimulatedAi};
pub use dm_engine::{
    ChannelLimits, Engine, Mixer, MixerConfig, PcmWaveform, SampleBuffer, VideoSync, Waveform,
    WaveformKey,
};
pub use dm_ir::{Frame, TvType};
pub use dm_master::{frames_to_wav, read_wav, Controller, ControllerError, Cue, CueAction, Sound, SoundData};

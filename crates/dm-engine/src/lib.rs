//! Streaming sample mixer for dragonmix.
//!
//! Waveforms are decoded on demand into small per-channel caches, mixed by
//! a [`MixBackend`] and queued on the AI hardware by the [`Mixer`], with
//! sample-accurate events between mix runs.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod backend;
mod channel;
mod engine;
mod event_queue;
mod mixer;
mod sample_buffer;
mod videosync;
mod waveform;

slotmap::new_key_type! {
    /// Handle to a waveform registered with an [`Engine`].
    pub struct WaveformKey;
}

pub use backend::{MixBackend, MixJob, SoftwareMixer};
pub use channel::{ChannelLimits, POLLS_PER_SECOND};
pub use dm_ir::Frame;
pub use engine::{Engine, MixerConfig};
pub use event_queue::{EventCallback, EventId, EventQueue, MAX_EVENTS};
pub use mixer::Mixer;
pub use sample_buffer::SampleBuffer;
pub use videosync::VideoSync;
pub use waveform::{PcmWaveform, Waveform, WaveformRead, LOOP_OVERREAD, WAVEFORM_UNKNOWN_LEN};

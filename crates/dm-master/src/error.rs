//! Controller errors.

use dm_audio::AudioError;
use thiserror::Error;

/// Failures setting up or running a controller program.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Audio(#[from] AudioError),
    /// Cue times are sample ticks and must fit the event scheduler's
    /// 32-bit delays.
    #[error("cue at sample {0} is out of the schedulable range")]
    CueOutOfRange(u64),
    #[error("WAV encoding failed: {0}")]
    Wav(#[from] std::io::Error),
}

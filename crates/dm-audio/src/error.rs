//! Error types for host audio backends.

use thiserror::Error;

/// Failures opening or running a host output stream.
///
/// The console-side drivers never fail: these only come from the host
/// environment the hardware model is bridged to.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Failed to query the output device configuration
    #[error("Device init error: {0}")]
    DeviceInit(String),
    /// Failed to create audio stream
    #[error("Stream create error: {0}")]
    StreamCreate(String),
    /// Playback error
    #[error("Playback error: {0}")]
    Playback(String),
    /// No audio device available
    #[error("No audio device available")]
    NoDevice,
}

//! AI (audio interface) output for dragonmix.
//!
//! [`AudioDriver`] is the standalone multi-buffered output driver. The
//! hardware it drives is any [`dm_ir::AiHardware`]: [`SimulatedAi`] plays
//! into memory, [`CpalAi`] plays through the host sound device.

mod cpal_backend;
mod driver;
mod error;
mod sim;

pub use cpal_backend::CpalAi;
pub use driver::{AudioDriver, FillCallback, DEFAULT_BUFFERS};
pub use error::AudioError;
pub use sim::SimulatedAi;

//! Core value types for the dragonmix audio pipeline.
//!
//! This crate defines what the mixer, the output driver and the mixing
//! coprocessor agree on: the output frame, the fixed-point formats, the
//! channel descriptor ABI, and the AI hardware surface.
//!
//! Designed to be `no_std` compatible with the `alloc` crate.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod descriptor;
mod fixed;
mod frame;
pub mod hw;
mod irq;
mod ring;

pub use descriptor::{ChannelDescriptor, SampleWidth, CH_FLAGS_BPS_SHIFT};
pub use fixed::{Fx15, Fx16, Fx32, FX32_FRAC};
pub use frame::Frame;
pub use hw::{configure_dac, quantum_len, AiHardware, AiStatus, DacConfig, TvType};
pub use irq::{CriticalSection, InterruptGate};
pub use ring::DmaRing;

/// Maximum number of mixer channels.
pub const MAX_CHANNELS: usize = 32;

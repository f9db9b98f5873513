//! AI (audio interface) register surface.
//!
//! Both the standalone output driver and the mixer talk to the DMA
//! hardware only through [`AiHardware`]. Whoever owns the value owns the
//! hardware; the two drivers hand it over through their `close` methods.

use alloc::sync::Arc;

use bitflags::bitflags;

use crate::frame::Frame;
use crate::irq::InterruptGate;

bitflags! {
    /// AI status register bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AiStatus: u32 {
        /// A DMA transfer is in progress.
        const BUSY = 1 << 30;
        /// Both DMA slots are taken (one playing, one pending).
        const FULL = 1 << 31;
    }
}

/// Value written to the sample size register for 16-bit output.
pub const AI_SAMPLE_SIZE_16: u32 = 15;

/// Video region, which selects the clock the DAC divisor is derived from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TvType {
    #[default]
    Ntsc,
    Pal,
    Mpal,
}

impl TvType {
    /// DAC clock rate in Hz.
    pub const fn dac_clock(self) -> u32 {
        match self {
            TvType::Ntsc => 48_681_812,
            TvType::Pal => 49_656_530,
            TvType::Mpal => 48_628_316,
        }
    }
}

/// Result of deriving the DAC divisor for a requested frequency.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DacConfig {
    /// Value for the clock-rate register.
    pub dac_rate: u32,
    /// Frequency actually produced by that divisor.
    pub frequency: u32,
}

impl DacConfig {
    /// Nearest achievable divisor for `frequency` given a DAC clock.
    pub fn new(clock: u32, frequency: u32) -> Self {
        assert!(frequency > 0, "dac: invalid frequency {frequency}");
        let clock2 = 2 * clock as u64;
        let div = clock2 / frequency as u64 + 1;
        Self {
            dac_rate: (div / 2 - 1) as u32,
            frequency: (clock2 / div) as u32,
        }
    }
}

/// Number of frames in one output quantum at `frequency`:
/// about 1/25 s, rounded down to a multiple of 8.
pub const fn quantum_len(frequency: u32) -> usize {
    (((frequency / 25) >> 3) << 3) as usize
}

/// Register-level view of the AI DMA engine.
pub trait AiHardware {
    /// DAC input clock for the current video region.
    fn clock_rate(&self) -> u32;
    /// Write the clock-rate (divisor) register.
    fn set_dac_rate(&mut self, dac_rate: u32);
    /// Write the sample-size register.
    fn set_sample_size(&mut self, bits: u32);
    /// Read the status register.
    fn status(&mut self) -> AiStatus;
    /// Program address and length and trigger a transfer of `samples`.
    /// Must only be called when the status is not [`AiStatus::FULL`].
    fn start_dma(&mut self, samples: &[Frame]);
    /// Enable or disable the DMA-completion interrupt.
    fn set_interrupt(&mut self, enabled: bool);
    /// Acknowledge a pending DMA-completion interrupt, if any.
    fn take_interrupt(&mut self) -> bool;
    /// Block until the hardware drains at least one queued transfer.
    /// Returns immediately when nothing is queued.
    fn wait(&mut self);
    /// Interrupt gate shared with the code that owns this hardware.
    fn gate(&self) -> &Arc<InterruptGate>;
}

/// Program the DAC for `frequency` and return the frequency obtained.
pub fn configure_dac<H: AiHardware + ?Sized>(hw: &mut H, frequency: u32) -> u32 {
    let cfg = DacConfig::new(hw.clock_rate(), frequency);
    hw.set_dac_rate(cfg.dac_rate);
    hw.set_sample_size(AI_SAMPLE_SIZE_16);
    cfg.frequency
}

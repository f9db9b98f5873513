//! Deterministic software model of the AI DMA engine.

use std::sync::Arc;

use dm_ir::hw::AI_SAMPLE_SIZE_16;
use dm_ir::{AiHardware, AiStatus, Frame, InterruptGate, TvType};

/// Number of transfers the AI can hold: one playing, one pending.
const DMA_SLOTS: usize = 2;

/// An [`AiHardware`] implementation that plays into memory.
///
/// Time only advances when asked: either explicitly via [`advance`], or
/// when a driver blocks in [`AiHardware::wait`], which instantly finishes
/// the transfer currently playing. Completed transfers raise the
/// completion interrupt if it is enabled.
///
/// [`advance`]: SimulatedAi::advance
#[derive(Debug)]
pub struct SimulatedAi {
    tv: TvType,
    gate: Arc<InterruptGate>,
    dac_rate: u32,
    sample_size: u32,
    /// Transfer slots, reused so that steady-state DMA does not allocate.
    slots: [Vec<Frame>; DMA_SLOTS],
    head: usize,
    queued: usize,
    /// Frames of the head transfer already played.
    head_pos: usize,
    interrupt_enabled: bool,
    irq_pending: bool,
    transfers: usize,
    frames_played: u64,
    capture: bool,
    played: Vec<Frame>,
}

impl SimulatedAi {
    pub fn new(tv: TvType) -> Self {
        Self {
            tv,
            gate: InterruptGate::new(),
            dac_rate: 0,
            sample_size: 0,
            slots: Default::default(),
            head: 0,
            queued: 0,
            head_pos: 0,
            interrupt_enabled: false,
            irq_pending: false,
            transfers: 0,
            frames_played: 0,
            capture: true,
            played: Vec::new(),
        }
    }

    /// Stop or resume recording played frames (recording allocates).
    pub fn set_capture(&mut self, capture: bool) {
        self.capture = capture;
    }

    /// Play up to `frames` frames. Returns the number of transfers that
    /// completed.
    pub fn advance(&mut self, mut frames: usize) -> usize {
        let mut completed = 0;
        while frames > 0 && self.queued > 0 {
            let slot = &self.slots[self.head];
            let n = (slot.len() - self.head_pos).min(frames);
            if self.capture {
                self.played
                    .extend_from_slice(&slot[self.head_pos..self.head_pos + n]);
            }
            self.head_pos += n;
            self.frames_played += n as u64;
            frames -= n;
            if self.head_pos == slot.len() {
                self.head = (self.head + 1) % DMA_SLOTS;
                self.queued -= 1;
                self.head_pos = 0;
                completed += 1;
                if self.interrupt_enabled {
                    self.irq_pending = true;
                }
            }
        }
        completed
    }

    /// Play everything queued.
    pub fn drain(&mut self) -> usize {
        self.advance(usize::MAX)
    }

    /// Frames played so far (only recorded while capturing).
    pub fn played(&self) -> &[Frame] {
        &self.played
    }

    /// Take the recorded frames, leaving the record empty.
    pub fn take_played(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.played)
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played
    }

    /// Number of transfers currently queued (0..=2).
    pub fn queued(&self) -> usize {
        self.queued
    }

    /// Number of transfers started since creation.
    pub fn transfers_started(&self) -> usize {
        self.transfers
    }

    pub fn dac_rate(&self) -> u32 {
        self.dac_rate
    }

    pub fn sample_size(&self) -> u32 {
        self.sample_size
    }

    pub fn interrupt_enabled(&self) -> bool {
        self.interrupt_enabled
    }
}

impl Default for SimulatedAi {
    fn default() -> Self {
        Self::new(TvType::default())
    }
}

impl AiHardware for SimulatedAi {
    fn clock_rate(&self) -> u32 {
        self.tv.dac_clock()
    }

    fn set_dac_rate(&mut self, dac_rate: u32) {
        self.dac_rate = dac_rate;
    }

    fn set_sample_size(&mut self, bits: u32) {
        debug_assert_eq!(bits, AI_SAMPLE_SIZE_16);
        self.sample_size = bits;
    }

    fn status(&mut self) -> AiStatus {
        let mut status = AiStatus::empty();
        if self.queued > 0 {
            status |= AiStatus::BUSY;
        }
        if self.queued == DMA_SLOTS {
            status |= AiStatus::FULL;
        }
        status
    }

    fn start_dma(&mut self, samples: &[Frame]) {
        assert!(self.queued < DMA_SLOTS, "ai: DMA started while FULL");
        assert!(samples.len() % 2 == 0, "ai: odd transfer length {}", samples.len());
        let slot = &mut self.slots[(self.head + self.queued) % DMA_SLOTS];
        slot.clear();
        slot.extend_from_slice(samples);
        self.queued += 1;
        self.transfers += 1;
    }

    fn set_interrupt(&mut self, enabled: bool) {
        self.interrupt_enabled = enabled;
        if !enabled {
            self.irq_pending = false;
        }
    }

    fn take_interrupt(&mut self) -> bool {
        std::mem::take(&mut self.irq_pending)
    }

    fn wait(&mut self) {
        if self.queued > 0 {
            let remaining = self.slots[self.head].len() - self.head_pos;
            self.advance(remaining);
        }
    }

    fn gate(&self) -> &Arc<InterruptGate> {
        &self.gate
    }
}

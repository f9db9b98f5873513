//! Standalone multi-buffered AI output driver.
//!
//! Use this when the full mixer is not needed: the application either
//! pushes interleaved frames (`write_begin`/`write_end`, `write`, `push`)
//! or registers a fill callback that the interrupt handler calls each time
//! it hands a buffer to DMA. The mixer does not build on this driver; the
//! two are alternative owners of the same hardware.

use std::sync::Arc;

use dm_ir::{configure_dac, quantum_len, AiHardware, AiStatus, DmaRing, Frame, InterruptGate};
use log::{debug, trace, warn};

/// Number of output buffers used when the caller asks for fewer than one.
pub const DEFAULT_BUFFERS: usize = 4;

/// Pull-mode callback: fill the given buffer of one quantum of frames.
pub type FillCallback = Box<dyn FnMut(&mut [Frame]) + Send>;

/// Multi-buffered DMA output driver.
pub struct AudioDriver<H: AiHardware> {
    hw: H,
    gate: Arc<InterruptGate>,
    frequency: u32,
    quantum: usize,
    ring: DmaRing,
    /// Frames already written into the pending reservation by `push`.
    partial: usize,
    fill: Option<FillCallback>,
    paused: bool,
}

impl<H: AiHardware> AudioDriver<H> {
    /// Take ownership of the hardware and program it for `frequency`.
    ///
    /// The actual frequency is the closest one the DAC divisor can produce
    /// (see [`frequency`](Self::frequency)). `num_buffers == 0` selects
    /// [`DEFAULT_BUFFERS`].
    pub fn new(mut hw: H, frequency: u32, num_buffers: usize) -> Self {
        let frequency = configure_dac(&mut hw, frequency);
        let quantum = quantum_len(frequency);
        assert!(quantum > 0, "ai: frequency {frequency} too low");
        let num_buffers = if num_buffers < 1 { DEFAULT_BUFFERS } else { num_buffers };
        let gate = Arc::clone(hw.gate());
        hw.set_interrupt(true);

        debug!(
            "ai: init frequency={} quantum={} buffers={}",
            frequency, quantum, num_buffers
        );

        Self {
            hw,
            gate,
            frequency,
            quantum,
            ring: DmaRing::new(num_buffers * quantum),
            partial: 0,
            fill: None,
            paused: false,
        }
    }

    /// Actual output frequency.
    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    /// Frames per output quantum (the size of one `write_begin` region).
    pub fn buffer_length(&self) -> usize {
        self.quantum
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    /// Release the hardware so another driver can own it.
    pub fn close(mut self) -> H {
        self.flush_partial();
        self.hw.set_interrupt(false);
        debug!("ai: close");
        self.hw
    }

    /// Register (or clear) the pull-mode fill callback.
    ///
    /// With a callback registered, every quantum handed to DMA is replaced
    /// by one freshly produced by the callback, from interrupt context.
    /// Setting a callback primes the ring so that playback starts at once.
    pub fn set_fill_callback(&mut self, callback: Option<FillCallback>) {
        {
            let _cs = self.gate.disable();
            self.fill = callback;
        }
        if self.fill.is_some() {
            while !self.ring.is_reserved() && self.ring.can_reserve(self.quantum) {
                self.refill();
            }
            self.dispatch();
        }
    }

    /// Replace the fill callback's output with silence, or restore it.
    /// No effect without a registered callback.
    pub fn pause(&mut self, pause: bool) {
        if pause != self.paused && self.fill.is_some() {
            let _cs = self.gate.disable();
            self.paused = pause;
            debug!("ai: paused={}", pause);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// True if one quantum can be written without blocking.
    pub fn can_write(&self) -> bool {
        self.can_write_n(self.quantum)
    }

    /// True if `n` frames can be reserved without blocking.
    pub fn can_write_n(&self, n: usize) -> bool {
        self.ring.can_reserve(n)
    }

    /// Reserve the next output region, blocking until one is free.
    ///
    /// The caller must fill exactly one quantum and then call
    /// [`write_end`](Self::write_end).
    pub fn write_begin(&mut self) -> &mut [Frame] {
        if self.partial > 0 {
            self.flush_partial();
        }
        assert!(!self.ring.is_reserved(), "ai: write_begin twice without write_end");

        let quantum = self.quantum;
        let range = loop {
            self.service();
            {
                let _cs = self.gate.disable();
                if let Some(range) = self.ring.reserve(quantum) {
                    break range;
                }
            }
            trace!("ai: ring full, waiting for DMA");
            self.block();
        };
        self.ring.frames_mut(range)
    }

    /// Publish the region obtained from `write_begin` and start DMA on it
    /// if the hardware has a free slot.
    pub fn write_end(&mut self) {
        {
            let _cs = self.gate.disable();
            self.ring.commit();
        }
        self.dispatch();
    }

    /// Copy one quantum of frames to the output, blocking if needed.
    pub fn write(&mut self, frames: &[Frame]) {
        assert_eq!(frames.len(), self.quantum, "ai: write expects one quantum");
        self.write_begin().copy_from_slice(frames);
        self.write_end();
    }

    /// Queue one quantum of silence, blocking if needed.
    pub fn write_silence(&mut self) {
        self.write_begin().fill(Frame::silence());
        self.write_end();
    }

    /// Queue `n` frames across as many quanta as needed.
    ///
    /// `samples == None` queues silence instead. Frames that do not fill a
    /// whole quantum stay staged until more arrive; `push(None, 0, _)`
    /// pads the staged quantum with silence and queues it.
    ///
    /// When `blocking` is false the call stops at the first quantum that
    /// would need to wait, and returns how many frames were accepted.
    pub fn push(&mut self, samples: Option<&[Frame]>, n: usize, blocking: bool) -> usize {
        if let Some(src) = samples {
            assert!(src.len() >= n, "ai: push of {} frames from {}", n, src.len());
        }
        if samples.is_none() && n == 0 {
            self.flush_partial();
            return 0;
        }

        let quantum = self.quantum;
        let mut done = 0;
        while done < n {
            if !self.ring.is_reserved() {
                self.service();
                if !blocking && !self.can_write() {
                    warn!("ai: push accepted {} of {} frames", done, n);
                    break;
                }
                self.write_begin();
                self.partial = 0;
            }

            let take = (n - done).min(quantum - self.partial);
            let Some(region) = self.ring.reserved_mut() else {
                break;
            };
            let dst = &mut region[self.partial..self.partial + take];
            match samples {
                Some(src) => dst.copy_from_slice(&src[done..done + take]),
                None => dst.fill(Frame::silence()),
            }
            self.partial += take;
            done += take;

            if self.partial == quantum {
                self.partial = 0;
                self.write_end();
            }
        }
        done
    }

    /// DMA-completion interrupt handler.
    pub fn interrupt(&mut self) {
        self.hw.take_interrupt();
        self.dispatch();
    }

    /// Queue the staged partial quantum, padded with silence.
    fn flush_partial(&mut self) {
        if !self.ring.is_reserved() {
            return;
        }
        let filled = self.partial;
        if let Some(region) = self.ring.reserved_mut() {
            region[filled..].fill(Frame::silence());
        }
        self.partial = 0;
        self.write_end();
    }

    /// Run the handler if an interrupt arrived while interrupts are enabled.
    fn service(&mut self) {
        if self.gate.is_enabled() && self.hw.take_interrupt() {
            self.dispatch();
        }
    }

    /// Wait for the hardware to drain one transfer.
    fn block(&mut self) {
        if !self.hw.status().contains(AiStatus::BUSY) {
            self.dispatch();
        }
        self.hw.wait();
        self.service();
    }

    /// Commit regions to DMA while the hardware has a free slot (it holds
    /// up to two), refilling from the callback in pull mode.
    fn dispatch(&mut self) {
        let _cs = self.gate.disable();
        while !self.hw.status().contains(AiStatus::FULL) {
            let Some(range) = self.ring.take_dma(self.quantum) else {
                break;
            };
            trace!("ai: DMA {:?}", range);
            self.hw.start_dma(self.ring.frames(range));
            self.refill();
        }
    }

    /// Produce one quantum from the fill callback (or silence while paused).
    fn refill(&mut self) {
        if self.fill.is_none() || self.ring.is_reserved() {
            return;
        }
        let _cs = self.gate.disable();
        if self.ring.reserve(self.quantum).is_none() {
            return;
        }
        let Some(out) = self.ring.reserved_mut() else {
            return;
        };
        match (self.paused, self.fill.as_mut()) {
            (false, Some(fill)) => fill(out),
            _ => out.fill(Frame::silence()),
        }
        self.ring.commit();
    }
}

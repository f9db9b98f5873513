//! The mixer: engine plus events plus its own output ring on the AI.

use alloc::sync::Arc;

use dm_ir::{configure_dac, AiHardware, AiStatus, DmaRing, Frame, InterruptGate};
use log::{debug, trace};

use crate::backend::{MixBackend, SoftwareMixer};
use crate::channel::round_up;
use crate::engine::{Engine, MixerConfig};
use crate::event_queue::{EventCallback, EventId, EventQueue};
use crate::videosync::VideoSync;

/// Output ring length as a fraction of a second.
const RING_DIVISOR: u32 = 6;

/// Owns the AI hardware and feeds it from an [`Engine`].
///
/// The application calls [`poll`](Self::poll) once per frame (or tick)
/// with the number of samples to produce; the mixer renders them, firing
/// due events between sub-runs, and queues the result for DMA. The
/// interrupt handler keeps up to two transfers queued on the hardware.
pub struct Mixer<H: AiHardware, B: MixBackend = SoftwareMixer> {
    hw: H,
    gate: Arc<InterruptGate>,
    engine: Engine<B>,
    events: EventQueue<B>,
    ring: DmaRing,
}

impl<H: AiHardware> Mixer<H, SoftwareMixer> {
    pub fn new(hw: H, config: MixerConfig) -> Self {
        Self::with_backend(hw, config, SoftwareMixer::new())
    }
}

impl<H: AiHardware, B: MixBackend> Mixer<H, B> {
    /// Take the hardware, program it as close to `config.sample_rate` as
    /// the DAC allows, and mix at the rate actually obtained.
    pub fn with_backend(mut hw: H, config: MixerConfig, backend: B) -> Self {
        let sample_rate = configure_dac(&mut hw, config.sample_rate);
        let ring_len = round_up((sample_rate / RING_DIVISOR) as usize, 8);
        let gate = Arc::clone(hw.gate());
        hw.set_interrupt(true);

        debug!(
            "mixer: init channels={} frequency={} (requested {}) ring={}",
            config.channels, sample_rate, config.sample_rate, ring_len
        );

        Self {
            hw,
            gate,
            engine: Engine::with_backend(config.channels, sample_rate, backend),
            events: EventQueue::new(),
            ring: DmaRing::new(ring_len),
        }
    }

    /// Actual output rate.
    pub fn sample_rate(&self) -> u32 {
        self.engine.sample_rate()
    }

    pub fn engine(&self) -> &Engine<B> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine<B> {
        &mut self.engine
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    /// Output ring length in frames; `poll` must ask for less.
    pub fn ring_len(&self) -> usize {
        self.ring.capacity()
    }

    /// Pacing helper for a game running at `fps`.
    pub fn videosync(&self, fps: f32) -> VideoSync {
        VideoSync::new(self.sample_rate(), fps)
    }

    /// Stop feeding the hardware and hand it back. Transfers already
    /// queued keep playing.
    pub fn close(mut self) -> H {
        self.hw.set_interrupt(false);
        debug!("mixer: close");
        self.hw
    }

    /// Run `callback` `delay` samples from now. See [`EventCallback`].
    pub fn add_event(&mut self, delay: u32, callback: EventCallback<B>) -> EventId {
        let tick = self.engine.ticks() + delay as i64;
        self.events.add(tick, callback)
    }

    pub fn remove_event(&mut self, id: EventId) -> bool {
        self.events.remove(id)
    }

    pub fn num_events(&self) -> usize {
        self.events.len()
    }

    /// Produce `n` output samples and queue them for playback.
    ///
    /// Blocks while the output ring has no room for them. `n` must be
    /// even (DMA transfers are) and smaller than the ring.
    pub fn poll(&mut self, n: usize) {
        assert!(n % 2 == 0, "mixer: poll of odd sample count {n}");
        assert!(
            n < self.ring.capacity(),
            "mixer: poll of {} samples exceeds ring of {}",
            n,
            self.ring.capacity()
        );
        if n == 0 {
            return;
        }

        self.service();
        let range = loop {
            {
                let _cs = self.gate.disable();
                if let Some(range) = self.ring.reserve(n) {
                    break range;
                }
            }
            trace!("mixer: ring full, waiting for DMA");
            if !self.hw.status().contains(AiStatus::BUSY) {
                self.dispatch();
            }
            self.hw.wait();
            self.service();
        };

        let Self { engine, events, ring, .. } = self;
        render(engine, events, ring.frames_mut(range));

        // The hardware double-buffers on its own; the new block only has
        // to wait until it can accept one more transfer.
        while self.hw.status().contains(AiStatus::FULL) {
            self.hw.wait();
            self.service();
        }
        {
            let _cs = self.gate.disable();
            self.ring.commit();
        }
        self.dispatch();
    }

    /// Interrupt entry point: refill the hardware queue.
    pub fn interrupt(&mut self) {
        self.dispatch();
    }

    fn service(&mut self) {
        if self.gate.is_enabled() && self.hw.take_interrupt() {
            self.dispatch();
        }
    }

    /// Queue committed output until the hardware holds two transfers.
    fn dispatch(&mut self) {
        let _cs = self.gate.disable();
        while !self.hw.status().contains(AiStatus::FULL) {
            let Some(range) = self.ring.take_dma(usize::MAX) else {
                break;
            };
            trace!("mixer: DMA {:?}", range);
            self.hw.start_dma(self.ring.frames(range));
        }
    }
}

/// Mix into `out`, splitting at every due event.
fn render<B: MixBackend>(engine: &mut Engine<B>, events: &mut EventQueue<B>, out: &mut [Frame]) {
    let mut done = 0;
    while done < out.len() {
        let remaining = out.len() - done;
        let ns = match events.next() {
            Some((_, tick)) => (tick - engine.ticks()).clamp(0, remaining as i64) as usize,
            None => remaining,
        };
        if ns > 0 {
            engine.exec(&mut out[done..done + ns]);
            done += ns;
        }
        while let Some((index, tick)) = events.next() {
            if tick > engine.ticks() {
                break;
            }
            trace!("mixer: event at tick {:#x}", tick);
            events.fire(index, engine);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::PcmWaveform;
    use dm_audio::SimulatedAi;
    use dm_ir::TvType;
    use std::sync::{Arc, Mutex};

    fn mixer(channels: usize) -> Mixer<SimulatedAi> {
        Mixer::new(
            SimulatedAi::new(TvType::Ntsc),
            MixerConfig { channels, sample_rate: 44100 },
        )
    }

    #[test]
    fn init_resolves_rate_and_ring() {
        let m = mixer(2);
        assert_eq!(m.sample_rate(), 44095);
        assert_eq!(m.ring_len(), round_up(44095 / 6, 8));
        assert!(m.hardware().interrupt_enabled());
        assert_eq!(m.engine().num_channels(), 2);
    }

    #[test]
    fn poll_queues_output() {
        let mut m = mixer(2);
        let data: Vec<i16> = vec![4000; 4000];
        let key = m
            .engine_mut()
            .add_waveform(PcmWaveform::from_i16(data).into_waveform("dc", 44100.0, 0));
        m.engine_mut().play(0, key);
        m.poll(800);
        assert_eq!(m.hardware().queued(), 1);
        assert_eq!(m.engine().ticks(), 800);

        m.hardware_mut().drain();
        let played = m.hardware().played();
        assert_eq!(played.len(), 800);
        assert!(played[700].left > 0);
    }

    #[test]
    fn steady_polling_never_stalls() {
        let mut m = mixer(1);
        for _ in 0..200 {
            m.poll(736);
            // The hardware plays roughly as fast as the game polls.
            m.hardware_mut().advance(736);
        }
        m.hardware_mut().drain();
        m.interrupt();
        m.hardware_mut().drain();
        m.interrupt();
        m.hardware_mut().drain();
        assert_eq!(m.hardware().frames_played(), 200 * 736);
    }

    #[test]
    fn polling_faster_than_playback_blocks_until_drained() {
        let mut m = mixer(1);
        let ring = m.ring_len();
        let n = (ring / 3) & !1;
        for _ in 0..20 {
            m.poll(n);
        }
        // Every poll completed, so the hardware must have been waited on.
        assert!(m.hardware().frames_played() > 0);
        m.hardware_mut().drain();
        m.interrupt();
        m.hardware_mut().drain();
        m.interrupt();
        m.hardware_mut().drain();
        assert_eq!(m.hardware().frames_played(), 20 * n as u64);
    }

    #[test]
    #[should_panic(expected = "odd sample count")]
    fn odd_poll_panics() {
        mixer(1).poll(3);
    }

    #[test]
    #[should_panic(expected = "exceeds ring")]
    fn oversized_poll_panics() {
        let mut m = mixer(1);
        let n = m.ring_len();
        m.poll(n);
    }

    #[test]
    fn events_fire_at_exact_tick() {
        let mut m = mixer(2);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        m.add_event(
            100,
            Box::new(move |e: &mut Engine| -> u32 {
                let mut log = log.lock().unwrap();
                log.push(e.ticks());
                if log.len() < 4 { 250 } else { 0 }
            }),
        );
        m.poll(400);
        m.poll(400);
        assert_eq!(*seen.lock().unwrap(), vec![100, 350, 600]);
        assert_eq!(m.num_events(), 1);
        m.poll(400);
        assert_eq!(*seen.lock().unwrap(), vec![100, 350, 600, 850]);
        assert_eq!(m.num_events(), 0);
    }

    #[test]
    fn same_tick_events_fire_in_registration_order() {
        let mut m = mixer(1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..3u32 {
            let log = Arc::clone(&seen);
            m.add_event(
                10,
                Box::new(move |_: &mut Engine| -> u32 {
                    log.lock().unwrap().push(tag);
                    0
                }),
            );
        }
        m.poll(64);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn event_can_start_a_channel_mid_poll() {
        let mut m = mixer(1);
        let data: Vec<i16> = vec![8000; 2000];
        let key = m
            .engine_mut()
            .add_waveform(PcmWaveform::from_i16(data).into_waveform("dc", 44095.0, 0));
        m.add_event(
            200,
            Box::new(move |e: &mut Engine| -> u32 {
                e.play(0, key);
                0
            }),
        );
        m.poll(400);
        m.hardware_mut().drain();
        let played = m.hardware().played();
        assert!(played[..200].iter().all(|f| f.is_silent()));
        assert!(played[399].left > 0);
    }

    #[test]
    fn removed_event_never_fires() {
        let mut m = mixer(1);
        let fired = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&fired);
        let id = m.add_event(
            10,
            Box::new(move |_: &mut Engine| -> u32 {
                *flag.lock().unwrap() = true;
                0
            }),
        );
        assert!(m.remove_event(id));
        m.poll(64);
        assert!(!*fired.lock().unwrap());
    }

    #[test]
    fn close_returns_hardware_with_interrupt_off() {
        let mut m = mixer(1);
        m.poll(64);
        let hw = m.close();
        assert!(!hw.interrupt_enabled());
        assert_eq!(hw.queued(), 1);
    }
}

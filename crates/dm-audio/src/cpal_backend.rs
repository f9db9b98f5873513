//! AI hardware model backed by a host output stream (CPAL).
//!
//! DMA transfers are copied into a lock-free ring that the stream callback
//! drains. The callback counts consumed frames; a transfer is complete once
//! the count passes the mark recorded when it was started.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use dm_ir::hw::AI_SAMPLE_SIZE_16;
use dm_ir::{AiHardware, AiStatus, Frame, InterruptGate, TvType};
use log::{debug, warn};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::AudioError;

/// Transfers the AI can hold: one playing, one pending.
const DMA_SLOTS: usize = 2;

/// Upper bound on a single `wait`, in case the host stream stalls.
const WAIT_LIMIT: Duration = Duration::from_millis(500);

/// State shared with the stream callback.
#[derive(Default)]
struct Shared {
    consumed: AtomicU64,
    running: AtomicBool,
    lock: Mutex<()>,
    drained: Condvar,
}

/// [`AiHardware`] that plays through the default host output device.
pub struct CpalAi {
    tv: TvType,
    gate: Arc<InterruptGate>,
    dac_rate: u32,
    producer: HeapProd<Frame>,
    shared: Arc<Shared>,
    /// Consumed-frame counts at which each queued transfer ends.
    marks: [u64; DMA_SLOTS],
    queued: usize,
    pushed: u64,
    interrupt_enabled: bool,
    irq_pending: bool,
    /// Source frequency as seen by the stream callback, in Hz.
    frequency: Arc<AtomicU64>,
    stream: Stream,
}

impl CpalAi {
    /// Open the default output device for the given video region.
    ///
    /// `frequency` is only the initial guess for resampling; the real rate
    /// follows whatever the DAC divisor is later programmed to.
    pub fn open(tv: TvType, frequency: u32) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;
        let config = device
            .default_output_config()
            .map_err(|e| AudioError::DeviceInit(e.to_string()))?;
        let config: StreamConfig = config.into();
        let channels = config.channels as usize;
        let device_rate = config.sample_rate.0 as u64;

        // About one second of audio, far more than two transfers.
        let rb = HeapRb::<Frame>::new(frequency.max(device_rate as u32) as usize);
        let (producer, consumer) = rb.split();

        let shared = Arc::new(Shared::default());
        let src_rate = Arc::new(AtomicU64::new(frequency as u64));
        let mut feed = Feed {
            consumer,
            shared: Arc::clone(&shared),
            frequency: Arc::clone(&src_rate),
            device_rate,
            phase: 0,
            current: Frame::silence(),
        };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| feed.fill(data, channels),
                |err| warn!("ai: host stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::StreamCreate(e.to_string()))?;
        stream.play().map_err(|e| AudioError::Playback(e.to_string()))?;
        shared.running.store(true, Ordering::Release);

        debug!(
            "ai: host stream open, device rate {} Hz, {} channels",
            device_rate, channels
        );

        Ok(Self {
            tv,
            gate: InterruptGate::new(),
            dac_rate: 0,
            producer,
            shared,
            marks: [0; DMA_SLOTS],
            queued: 0,
            pushed: 0,
            interrupt_enabled: false,
            irq_pending: false,
            frequency: src_rate,
            stream,
        })
    }

    /// Stop or restart the host stream. Queued transfers are kept.
    pub fn set_running(&mut self, running: bool) -> Result<(), AudioError> {
        self.shared.running.store(running, Ordering::Release);
        if running {
            self.stream
                .play()
                .map_err(|e| AudioError::Playback(e.to_string()))
        } else {
            self.stream
                .pause()
                .map_err(|e| AudioError::Playback(e.to_string()))
        }
    }

    /// Last value written to the clock-rate register.
    pub fn dac_rate(&self) -> u32 {
        self.dac_rate
    }

    /// Retire transfers the callback has consumed.
    fn update(&mut self) {
        let consumed = self.shared.consumed.load(Ordering::Acquire);
        while self.queued > 0 && consumed >= self.marks[0] {
            self.marks[0] = self.marks[1];
            self.queued -= 1;
            if self.interrupt_enabled {
                self.irq_pending = true;
            }
        }
    }
}

impl AiHardware for CpalAi {
    fn clock_rate(&self) -> u32 {
        self.tv.dac_clock()
    }

    fn set_dac_rate(&mut self, dac_rate: u32) {
        self.dac_rate = dac_rate;
        let hz = self.clock_rate() as u64 / (dac_rate as u64 + 1);
        self.frequency.store(hz, Ordering::Release);
        debug!("ai: dac rate {} ({} Hz)", dac_rate, hz);
    }

    fn set_sample_size(&mut self, bits: u32) {
        debug_assert_eq!(bits, AI_SAMPLE_SIZE_16);
    }

    fn status(&mut self) -> AiStatus {
        self.update();
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
        self.update();
        assert!(self.queued < DMA_SLOTS, "ai: DMA started while FULL");
        let pushed = self.producer.push_slice(samples);
        if pushed < samples.len() {
            warn!("ai: host ring overflow, dropped {} frames", samples.len() - pushed);
        }
        self.pushed += pushed as u64;
        self.marks[self.queued] = self.pushed;
        self.queued += 1;
    }

    fn set_interrupt(&mut self, enabled: bool) {
        self.interrupt_enabled = enabled;
        if !enabled {
            self.irq_pending = false;
        }
    }

    fn take_interrupt(&mut self) -> bool {
        self.update();
        std::mem::take(&mut self.irq_pending)
    }

    fn wait(&mut self) {
        self.update();
        if self.queued == 0 || !self.shared.running.load(Ordering::Acquire) {
            return;
        }
        let target = self.marks[0];
        let deadline = Instant::now() + WAIT_LIMIT;
        let mut guard = self.shared.lock.lock().unwrap_or_else(PoisonError::into_inner);
        while self.shared.consumed.load(Ordering::Acquire) < target {
            let now = Instant::now();
            if now >= deadline {
                warn!("ai: host stream stalled");
                break;
            }
            // Short slices: the callback notifies without taking the lock.
            let slice = (deadline - now).min(Duration::from_millis(5));
            guard = self
                .shared
                .drained
                .wait_timeout(guard, slice)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        drop(guard);
        self.update();
    }

    fn gate(&self) -> &Arc<InterruptGate> {
        &self.gate
    }
}

/// Stream-callback side: pulls frames at the DAC rate and resamples them
/// to the device rate by sample-and-hold.
struct Feed {
    consumer: HeapCons<Frame>,
    shared: Arc<Shared>,
    frequency: Arc<AtomicU64>,
    device_rate: u64,
    /// Fractional source position, scaled by the device rate.
    phase: u64,
    current: Frame,
}

impl Feed {
    fn fill(&mut self, data: &mut [f32], channels: usize) {
        if !self.shared.running.load(Ordering::Acquire) {
            data.fill(0.0);
            return;
        }
        let step = self.frequency.load(Ordering::Acquire);
        let mut popped = 0u64;

        for chunk in data.chunks_mut(channels) {
            self.phase += step;
            while self.phase >= self.device_rate {
                self.phase -= self.device_rate;
                self.current = match self.consumer.try_pop() {
                    Some(frame) => {
                        popped += 1;
                        frame
                    }
                    None => Frame::silence(),
                };
            }
            let left = self.current.left as f32 / 32768.0;
            let right = self.current.right as f32 / 32768.0;
            for (i, sample) in chunk.iter_mut().enumerate() {
                *sample = match i {
                    0 => left,
                    1 => right,
                    _ => 0.0,
                };
            }
        }

        if self.consumer.is_empty() {
            self.current = Frame::silence();
        }
        if popped > 0 {
            self.shared.consumed.fetch_add(popped, Ordering::AcqRel);
            self.shared.drained.notify_all();
        }
    }
}

//! Headless controller for dragonmix.
//!
//! Owns a set of sounds and a cue list, and plays them through a
//! [`Mixer`](dm_engine::Mixer) either in real time on a host audio device
//! or offline into a buffer of frames.

mod cue;
mod error;
mod wav;

use dm_audio::{CpalAi, SimulatedAi};
use dm_engine::{Engine, MixBackend, Mixer, MixerConfig};
use dm_ir::{AiHardware, AiStatus, DacConfig, TvType};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

// Re-export common types so callers don't need dm-ir/dm-engine directly.
pub use cue::{Cue, CueAction, Sound, SoundData};
pub use dm_audio::AudioError;
pub use error::ControllerError;
pub use dm_engine::Frame;
pub use wav::{frames_to_wav, read_wav, write_wav, WavError};

/// Video frame rate the controller paces its polls at.
pub const DEFAULT_FPS: f32 = 60.0;

/// Headless controller: owns sounds and cues and manages playback.
pub struct Controller {
    config: MixerConfig,
    tv: TvType,
    fps: f32,
    sounds: Vec<Sound>,
    cues: Vec<Cue>,
    playback: Option<PlaybackHandle>,
}

struct PlaybackHandle {
    stop_signal: Arc<AtomicBool>,
    current_tick: Arc<AtomicU64>,
    finished: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Controller {
    pub fn new(config: MixerConfig) -> Self {
        Self {
            config,
            tv: TvType::default(),
            fps: DEFAULT_FPS,
            sounds: Vec::new(),
            cues: Vec::new(),
            playback: None,
        }
    }

    pub fn config(&self) -> MixerConfig {
        self.config
    }

    pub fn set_tv_type(&mut self, tv: TvType) {
        self.tv = tv;
    }

    pub fn set_fps(&mut self, fps: f32) {
        assert!(fps > 0.0, "controller: invalid fps {fps}");
        self.fps = fps;
    }

    /// Output rate the DAC will actually run at.
    pub fn sample_rate(&self) -> u32 {
        DacConfig::new(self.tv.dac_clock(), self.config.sample_rate).frequency
    }

    // --- Sounds and cues ---

    pub fn add_sound(&mut self, sound: Sound) -> usize {
        self.sounds.push(sound);
        self.sounds.len() - 1
    }

    pub fn sounds(&self) -> &[Sound] {
        &self.sounds
    }

    /// Schedule `cue`. Cue times must fit in 32-bit sample ticks.
    pub fn add_cue(&mut self, cue: Cue) -> Result<(), ControllerError> {
        if u32::try_from(cue.at).is_err() {
            return Err(ControllerError::CueOutOfRange(cue.at));
        }
        assert!(
            cue.channel < self.config.channels,
            "controller: cue on channel {} of {}",
            cue.channel,
            self.config.channels
        );
        if let CueAction::Play { sound, .. } = cue.action {
            assert!(sound < self.sounds.len(), "controller: cue of unknown sound {sound}");
        }
        self.cues.push(cue);
        Ok(())
    }

    pub fn cues(&self) -> &[Cue] {
        &self.cues
    }

    pub fn clear_cues(&mut self) {
        self.cues.clear();
    }

    fn program(&self) -> Program {
        Program {
            config: self.config,
            tv: self.tv,
            fps: self.fps,
            sounds: self.sounds.clone(),
            cues: self.cues.clone(),
        }
    }

    // --- Real-time playback ---

    /// Start playing the cue list on the default output device.
    ///
    /// The device is opened on the audio thread; an error opening it is
    /// returned here.
    pub fn play(&mut self) -> Result<(), ControllerError> {
        self.stop();

        let program = self.program();
        let stop_signal = Arc::new(AtomicBool::new(false));
        let current_tick = Arc::new(AtomicU64::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stop = stop_signal.clone();
        let tick = current_tick.clone();
        let done = finished.clone();
        let (opened_tx, opened_rx) = mpsc::channel();

        let thread = std::thread::spawn(move || {
            audio_thread(program, opened_tx, stop, tick, done);
        });

        let opened = opened_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::Playback("audio thread exited".to_string()).into()));
        if let Err(e) = opened {
            let _ = thread.join();
            return Err(e);
        }

        self.playback = Some(PlaybackHandle {
            stop_signal,
            current_tick,
            finished,
            thread: Some(thread),
        });
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(mut pb) = self.playback.take() {
            pb.stop_signal.store(true, Ordering::Relaxed);
            if let Some(handle) = pb.thread.take() {
                let _ = handle.join();
            }
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playback
            .as_ref()
            .is_some_and(|p| !p.finished.load(Ordering::Relaxed))
    }

    pub fn is_finished(&self) -> bool {
        self.playback
            .as_ref()
            .is_some_and(|p| p.finished.load(Ordering::Relaxed))
    }

    /// Samples mixed so far by the running playback.
    pub fn position(&self) -> Option<u64> {
        let pb = self.playback.as_ref()?;
        if pb.finished.load(Ordering::Relaxed) {
            return None;
        }
        Some(pb.current_tick.load(Ordering::Relaxed))
    }

    // --- Offline rendering ---

    /// Render the cue list until every cue has run and every channel has
    /// stopped, or `max_frames` frames have been produced.
    pub fn render_frames(&self, max_frames: usize) -> Result<Vec<Frame>, ControllerError> {
        let program = self.program();
        let mut mixer = program.mixer(SimulatedAi::new(self.tv))?;
        let mut vsync = mixer.videosync(self.fps);

        let mut frames = Vec::with_capacity(max_frames);
        while frames.len() < max_frames && !program_done(&mixer) {
            mixer.poll(vsync.current_frame_samples() as usize);
            vsync.next_frame();
            mixer.hardware_mut().drain();
            frames.extend(mixer.hardware_mut().take_played());
        }
        frames.truncate(max_frames);
        Ok(frames)
    }

    pub fn render_to_wav(&self, max_seconds: u32) -> Result<Vec<u8>, ControllerError> {
        let sample_rate = self.sample_rate();
        let max_frames = sample_rate as usize * max_seconds as usize;
        let frames = self.render_frames(max_frames)?;
        Ok(wav::frames_to_wav(&frames, sample_rate)?)
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new(MixerConfig::default())
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything the audio thread needs, detached from the controller.
struct Program {
    config: MixerConfig,
    tv: TvType,
    fps: f32,
    sounds: Vec<Sound>,
    cues: Vec<Cue>,
}

impl Program {
    fn mixer<H: AiHardware>(&self, hw: H) -> Result<Mixer<H>, ControllerError> {
        let mut mixer = Mixer::new(hw, self.config);
        if let Some((first, callback)) = cue::sequencer(mixer.engine_mut(), &self.sounds, &self.cues)? {
            mixer.add_event(first, callback);
        }
        // Allocate sample buffers now rather than inside the first poll.
        mixer.engine_mut().exec(&mut []);
        Ok(mixer)
    }
}

/// True once no cue is pending and every channel is idle.
fn program_done<H: AiHardware, B: MixBackend>(mixer: &Mixer<H, B>) -> bool {
    let engine: &Engine<B> = mixer.engine();
    mixer.num_events() == 0 && (0..engine.num_channels()).all(|ch| !engine.is_playing(ch))
}

fn audio_thread(
    program: Program,
    opened: mpsc::Sender<Result<(), ControllerError>>,
    stop_signal: Arc<AtomicBool>,
    current_tick: Arc<AtomicU64>,
    finished: Arc<AtomicBool>,
) {
    let mixer = CpalAi::open(program.tv, program.config.sample_rate)
        .map_err(ControllerError::from)
        .and_then(|hw| program.mixer(hw));
    let mut mixer = match mixer {
        Ok(mixer) => mixer,
        Err(e) => {
            warn!("controller: cannot start playback: {}", e);
            finished.store(true, Ordering::Relaxed);
            let _ = opened.send(Err(e));
            return;
        }
    };
    let _ = opened.send(Ok(()));

    let mut vsync = mixer.videosync(program.fps);
    debug!(
        "controller: playing {} cues at {} Hz, {} samples per frame",
        program.cues.len(),
        mixer.sample_rate(),
        vsync.samples_per_frame()
    );

    while !program_done(&mixer) && !stop_signal.load(Ordering::Relaxed) {
        let n = vsync.current_frame_samples() as usize;
        #[cfg(feature = "alloc_check")]
        assert_no_alloc::assert_no_alloc(|| mixer.poll(n));
        #[cfg(not(feature = "alloc_check"))]
        mixer.poll(n);
        vsync.next_frame();
        current_tick.store(mixer.engine().ticks() as u64, Ordering::Relaxed);
    }

    // Let the queued transfers play out.
    while mixer.hardware_mut().status().contains(AiStatus::BUSY)
        && !stop_signal.load(Ordering::Relaxed)
    {
        mixer.hardware_mut().wait();
    }

    let _ = mixer.close();
    finished.store(true, Ordering::Relaxed);
}

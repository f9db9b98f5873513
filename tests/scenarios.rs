//! End-to-end mixer scenarios against the simulated AI.

use dragonmix::dm_engine::{SampleBuffer, WaveformRead};
use dragonmix::dm_ir::{Fx32, SampleWidth};
use dragonmix::{ChannelLimits, Mixer, MixerConfig, PcmWaveform, SimulatedAi, TvType, VideoSync, Waveform};
use std::sync::{Arc, Mutex};

fn mixer(channels: usize) -> Mixer<SimulatedAi> {
    Mixer::new(
        SimulatedAi::new(TvType::Ntsc),
        MixerConfig { channels, sample_rate: 44100 },
    )
}

/// Poll `n` samples and let the hardware play them.
fn step(m: &mut Mixer<SimulatedAi>, n: usize) {
    m.poll(n);
    m.hardware_mut().drain();
}

#[test]
fn one_shot_8_bit_stops_after_its_length() {
    let mut m = mixer(2);
    let data: Vec<i8> = (0..1000).map(|i| ((i % 50) as i8 - 25) * 4).collect();
    let key = m
        .engine_mut()
        .add_waveform(PcmWaveform::from_i8(data).into_waveform("blip", 44100.0, 0));
    m.engine_mut().play(0, key);
    assert!(m.engine().is_playing(0));

    step(&mut m, 1024);
    assert!(!m.engine().is_playing(0));
    assert!(!m.engine().is_playing(1));

    // Stays stopped until played again.
    step(&mut m, 1024);
    assert!(!m.engine().is_playing(0));
    m.engine_mut().play(0, key);
    assert!(m.engine().is_playing(0));
}

#[test]
fn loop_larger_than_cache_is_presented_unrolled() {
    let mut m = mixer(1);
    // 512 bytes of 16-bit samples: 256 samples, less than the loop.
    m.engine_mut().set_limits(0, ChannelLimits::new(16, 0.0, 512));
    let data: Vec<i16> = vec![5000; 2000];
    let key = m
        .engine_mut()
        .add_waveform(PcmWaveform::from_i16(data).into_waveform("long-loop", 44100.0, 500));
    m.engine_mut().play(0, key);
    assert!(m.engine().sample_buffer(0).capacity() < 500);

    let mut played = 0;
    while played < 2600 {
        step(&mut m, 128);
        played += 128;
    }
    assert!(m.engine().is_playing(0));
    let desc = m.engine().uploaded_descriptor(0);
    assert_eq!(desc.loop_len, Fx32::ZERO);
    assert_eq!(desc.len, Fx32(0x7FFF_FFFF));

    // Still audible past the end of the waveform.
    let out = m.hardware().played();
    assert!(out[out.len() - 64..].iter().all(|f| f.left > 0));

    // The channel position keeps being folded back into the waveform.
    for _ in 0..100 {
        step(&mut m, 128);
    }
    assert!(m.engine().is_playing(0));
    assert!(m.engine().position(0) < 2000.0 + 512.0);
}

#[test]
fn short_loop_is_decoded_once() {
    let reads: Arc<Mutex<Vec<(i32, i32)>>> = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&reads);
    let mut pcm = PcmWaveform::from_i16((0..2000).map(|i| (i % 300) as i16 * 50).collect());
    let wave = Waveform::new(
        "counted",
        SampleWidth::Bits16,
        44100.0,
        2000,
        500,
        move |sbuf: &mut SampleBuffer, wpos: i32, wlen: i32, seeking: bool| {
            log.lock().unwrap().push((wpos, wlen));
            pcm.read(sbuf, wpos, wlen, seeking);
        },
    );

    let mut m = mixer(1);
    let key = m.engine_mut().add_waveform(wave);
    m.engine_mut().play(0, key);
    assert!(m.engine().sample_buffer(0).capacity() > 500);

    // Past the end once: the loop and its over-read margin are resident.
    for _ in 0..3 {
        step(&mut m, 736);
    }
    assert!(m.engine().ticks() > 2000);
    let decoded = reads.lock().unwrap().len();

    for _ in 0..20 {
        step(&mut m, 736);
    }
    assert!(m.engine().is_playing(0));
    assert_eq!(reads.lock().unwrap().len(), decoded);
    // Every request stayed inside the waveform.
    assert!(reads.lock().unwrap().iter().all(|&(wpos, _)| (0..2000).contains(&wpos)));
}

#[test]
fn videosync_at_integral_rate() {
    let mut vs = VideoSync::new(48000, 60.0);
    assert_eq!(vs.samples_per_frame(), 800.0);
    for _ in 0..120 {
        assert_eq!(vs.current_frame_samples(), 800);
        assert_eq!(vs.counter(), 0.0);
        vs.next_frame();
    }
}

#[test]
fn videosync_paces_the_mixer() {
    let mut m = mixer(1);
    let mut vs = m.videosync(60.0);
    let mut total = 0u64;
    for _ in 0..600 {
        let n = vs.current_frame_samples() as usize;
        step(&mut m, n);
        total += n as u64;
        vs.next_frame();
    }
    // Ten seconds of frames, within one frame of ten seconds of audio.
    let ideal = m.sample_rate() as u64 * 10;
    assert!(total.abs_diff(ideal) <= 736, "total {total} ideal {ideal}");
    assert_eq!(m.engine().ticks() as u64, total);
    assert_eq!(m.hardware().frames_played(), total);
}

#[test]
fn stop_silences_from_next_poll() {
    let mut m = mixer(1);
    let key = m
        .engine_mut()
        .add_waveform(PcmWaveform::from_i16(vec![6000; 400]).into_waveform("hum", 44100.0, 400));
    m.engine_mut().play(0, key);
    step(&mut m, 512);
    assert!(m.hardware().played()[400..].iter().all(|f| f.left > 0));

    m.engine_mut().stop(0);
    m.hardware_mut().take_played();
    step(&mut m, 512);
    assert!(m.hardware().played().iter().all(|f| f.is_silent()));
}

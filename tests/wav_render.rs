//! Offline rendering through the controller.

use dragonmix::{read_wav, Controller, Cue, CueAction, MixerConfig, Sound, SoundData, TvType};

fn controller() -> Controller {
    Controller::new(MixerConfig { channels: 4, sample_rate: 44100 })
}

#[test]
fn render_round_trips_through_wav() {
    let mut c = controller();
    let s = c.add_sound(Sound::sine("tone", 2205, 20, 44100.0, false));
    c.add_cue(Cue::play(0, 0, s)).unwrap();

    let frames = c.render_frames(44100).unwrap();
    let wav = c.render_to_wav(1).unwrap();
    let back = read_wav("render", &wav).unwrap();

    assert_eq!(back.frequency, c.sample_rate() as f32);
    let SoundData::Pcm16(left) = back.data else {
        panic!("expected 16-bit output");
    };
    assert_eq!(left.len(), frames.len());
    assert!(left.iter().zip(&frames).all(|(l, f)| *l == f.left));
}

#[test]
fn pan_places_sound_in_the_field() {
    let mut c = controller();
    let s = c.add_sound(Sound::sine("tone", 2000, 20, 44100.0, false));
    c.add_cue(Cue {
        at: 0,
        channel: 1,
        action: CueAction::Play { sound: s, volume: 1.0, pan: 0.0 },
    })
    .unwrap();
    let frames = c.render_frames(44100).unwrap();
    assert!(frames.iter().all(|f| f.right == 0));
    assert!(frames.iter().any(|f| f.left != 0));
}

#[test]
fn pal_output_runs_at_pal_rate() {
    let mut c = controller();
    c.set_tv_type(TvType::Pal);
    c.set_fps(50.0);
    let s = c.add_sound(Sound::sine("tone", 882, 2, 44100.0, false));
    c.add_cue(Cue::play(0, 0, s)).unwrap();
    assert_ne!(c.sample_rate(), 44095);

    let wav = c.render_to_wav(1).unwrap();
    let back = read_wav("pal", &wav).unwrap();
    assert_eq!(back.frequency, c.sample_rate() as f32);
}

#[test]
fn later_cues_stop_earlier_sounds() {
    let mut c = controller();
    let hum = c.add_sound(Sound::sine("hum", 500, 5, 44100.0, true));
    c.add_cue(Cue::play(0, 0, hum)).unwrap();
    c.add_cue(Cue::stop(3000, 0)).unwrap();

    let frames = c.render_frames(44100 * 2).unwrap();
    // The looping sound ends with the stop cue instead of running to the limit.
    assert!(frames.len() < 44100);
    assert!(frames.len() >= 3000);
    assert!(frames[1000..2000].iter().any(|f| !f.is_silent()));
    assert!(frames[3000..].iter().all(|f| f.is_silent()));
}

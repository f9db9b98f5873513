//! dragonmix CLI: headless playback and WAV export.
//!
//! Usage:
//!   cargo run --bin dm-cli
//!   cargo run --bin dm-cli -- sound.wav other.wav
//!   cargo run --bin dm-cli -- sound.wav --wav output.wav [--pal] [--fps 50]

use dragonmix::{Controller, ControllerError, Cue, CueAction, MixerConfig, Sound, TvType};
use std::io::Write;
use std::{env, fs};

/// Spacing between cued sounds, in seconds.
const CUE_SPACING: f32 = 0.5;

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    let wav_path = option_value(&args, "--wav");
    let fps = option_value(&args, "--fps").map(|v| {
        v.parse::<f32>().unwrap_or_else(|e| {
            eprintln!("Invalid --fps {}: {}", v, e);
            std::process::exit(1);
        })
    });
    let pal = args.iter().any(|a| a == "--pal");
    let inputs: Vec<&String> = args
        .iter()
        .enumerate()
        .filter(|(i, a)| !a.starts_with("--") && !is_option_value(&args, *i))
        .map(|(_, a)| a)
        .collect();

    let mut ctrl = Controller::new(MixerConfig { channels: 8, sample_rate: 44100 });
    if pal {
        ctrl.set_tv_type(TvType::Pal);
    }
    if let Some(fps) = fps {
        ctrl.set_fps(fps);
    }

    let loaded = if inputs.is_empty() {
        demo_program(&mut ctrl)
    } else {
        load_program(&mut ctrl, &inputs)
    };
    if let Err(e) = loaded {
        eprintln!("Failed to schedule cues: {}", e);
        std::process::exit(1);
    }

    println!("Sounds:   {}", ctrl.sounds().len());
    for (i, s) in ctrl.sounds().iter().enumerate() {
        println!("  {:2}: {} ({} samples @ {} Hz)", i, s.name, s.data.len(), s.frequency);
    }
    println!("Cues:     {}", ctrl.cues().len());
    println!("Rate:     {} Hz", ctrl.sample_rate());
    println!();

    match wav_path {
        Some(wav) => render_to_wav(&ctrl, &wav),
        None => play_audio(&mut ctrl),
    }
}

fn option_value(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn is_option_value(args: &[String], i: usize) -> bool {
    i > 0 && matches!(args[i - 1].as_str(), "--wav" | "--fps")
}

/// A short arpeggio over a sustained looping drone.
fn demo_program(ctrl: &mut Controller) -> Result<(), ControllerError> {
    let rate = ctrl.sample_rate() as f32;
    let drone = ctrl.add_sound(Sound::sine("drone", 1000, 5, rate, true));
    let blip = ctrl.add_sound(Sound::sine("blip", 4410, 40, rate, false));

    let step = (rate * 0.25) as u64;
    ctrl.add_cue(Cue {
        at: 0,
        channel: 0,
        action: CueAction::Play { sound: drone, volume: 0.3, pan: 0.5 },
    })?;
    for (i, pan) in [0.2f32, 0.4, 0.6, 0.8].into_iter().enumerate() {
        ctrl.add_cue(Cue {
            at: step * (i as u64 + 1),
            channel: 1 + i,
            action: CueAction::Play { sound: blip, volume: 0.6, pan },
        })?;
    }
    ctrl.add_cue(Cue::stop(step * 8, 0))
}

fn load_program(ctrl: &mut Controller, inputs: &[&String]) -> Result<(), ControllerError> {
    let channels = ctrl.config().channels;
    let spacing = (ctrl.sample_rate() as f32 * CUE_SPACING) as u64;
    for (i, path) in inputs.iter().enumerate() {
        let data = fs::read(path).unwrap_or_else(|e| {
            eprintln!("Failed to read {}: {}", path, e);
            std::process::exit(1);
        });
        let sound = dragonmix::read_wav(path, &data).unwrap_or_else(|e| {
            eprintln!("Failed to parse {}: {}", path, e);
            std::process::exit(1);
        });
        let id = ctrl.add_sound(sound);
        ctrl.add_cue(Cue::play(spacing * i as u64, i % channels, id))?;
    }
    Ok(())
}

fn play_audio(ctrl: &mut Controller) {
    if let Err(e) = ctrl.play() {
        eprintln!("Failed to start playback: {}", e);
        std::process::exit(1);
    }
    println!("Playing...");
    println!();

    let rate = ctrl.sample_rate() as f64;
    while ctrl.is_playing() {
        if let Some(pos) = ctrl.position() {
            print!("\rTime: {:7.2}s | Samples: {:9}", pos as f64 / rate, pos);
            let _ = std::io::stdout().flush();
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }

    println!("\rDone.                                  ");
}

fn render_to_wav(ctrl: &Controller, path: &str) {
    let max_seconds: u32 = 300;
    println!("Rendering to {} at {} Hz...", path, ctrl.sample_rate());

    let wav = ctrl.render_to_wav(max_seconds).unwrap_or_else(|e| {
        eprintln!("Failed to render: {}", e);
        std::process::exit(1);
    });
    println!("Rendered {} bytes", wav.len());

    fs::write(path, &wav).unwrap_or_else(|e| {
        eprintln!("Failed to write {}: {}", path, e);
        std::process::exit(1);
    });

    println!("Done.");
}

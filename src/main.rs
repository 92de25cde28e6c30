// src/main.rs
//
// Offline render of a short phrase through a two-voice subtractive patch.
//
// Usage: modsynth-render [output.wav] [sample_rate] [period]

use std::error::Error;

use log::info;

use modsynth::convert::note_to_index;
use modsynth::{
    Attributes, Builder, Engine, EngineConfig, Instrument, MidiMessage, ModuleTemplate, SubmoduleDef,
    TimedMidiEvent,
};

/// ===============================
/// Patch
/// ===============================

fn demo_builder() -> Result<Builder, Box<dyn Error>> {
    let mut builder = Builder::new();
    builder.define(
        ModuleTemplate::new("subtractive")
            .with_output("out")
            .with_submodule(SubmoduleDef::new("midiSource", "src"))
            .with_submodule(SubmoduleDef::new("vco", "osc").parameter("waveform", "def", "sawtooth"))
            // Cutoff tracks the note, two octaves up
            .with_submodule(
                SubmoduleDef::new("adder", "cutoff")
                    .with_attribute("numInputs", 1)
                    .parameter("bias", "def", 2.0),
            )
            .with_submodule(SubmoduleDef::new("vcf", "filter"))
            .with_submodule(
                SubmoduleDef::new("adsr", "env")
                    .parameter("releaseTime", "def", 0.3)
                    .parameter("sustainLevel", "def", -9.0),
            )
            .with_submodule(SubmoduleDef::new("vga", "amp"))
            .with_patch("src.cv", "osc.cv")
            .with_patch("src.cv", "cutoff.in0")
            .with_patch("src.gate", "env.gate")
            .with_patch("osc.out", "filter.in")
            .with_patch("cutoff.out", "filter.freq")
            .with_patch("filter.out", "amp.in")
            .with_patch("env.out", "amp.gain")
            .with_patch("amp.out", "out"),
    )?;
    Ok(builder)
}

/// ===============================
/// Phrase
/// ===============================

/// (start ms, length ms, note name)
const PHRASE: [(i64, i64, &str); 8] = [
    (0, 400, "A3"),
    (500, 400, "C4"),
    (1000, 400, "E4"),
    (1500, 900, "A4"),
    (1500, 900, "E4"),
    (2500, 200, "G4"),
    (2750, 200, "F4"),
    (3000, 1200, "E4"),
];

fn phrase() -> Result<Vec<TimedMidiEvent>, Box<dyn Error>> {
    let mut events = Vec::new();
    for &(start, length, name) in &PHRASE {
        let note = note_to_index(name).ok_or_else(|| format!("bad note name '{name}'"))?;
        events.push(TimedMidiEvent::new(
            start,
            MidiMessage::NoteOn {
                channel: 0,
                note,
                velocity: 100,
            },
        ));
        events.push(TimedMidiEvent::new(
            start + length,
            MidiMessage::NoteOff {
                channel: 0,
                note,
                velocity: 0,
            },
        ));
    }
    Ok(events)
}

/// ===============================
/// Main
/// ===============================

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let output = args.next().unwrap_or_else(|| "modsynth-demo.wav".to_string());
    let sample_rate = args.next().map(|a| a.parse::<f32>()).transpose()?.unwrap_or(48_000.0);
    let period = args.next().map(|a| a.parse::<usize>()).transpose()?.unwrap_or(256);

    let config = EngineConfig {
        sample_rate,
        period_frames: period,
        channels: 2,
    };

    // --------------------------------
    // Engine
    // --------------------------------

    let builder = demo_builder()?;
    let attributes = Attributes::new()
        .with("maxVoices", 2)
        .with("minSilentTime", 0.05);
    let instrument = Instrument::new("demo", "subtractive", &builder, sample_rate, period, &attributes)?;

    let mut engine = Engine::new(config);
    engine.add_instrument(instrument)?;
    for event in phrase()? {
        engine.schedule(event);
    }

    // --------------------------------
    // Render
    // --------------------------------

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: sample_rate.round() as u32,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&output, spec)?;

    let total_frames = (4.6 * sample_rate) as usize;
    let mut out = vec![0.0f32; period * 2];
    let mut rendered = 0usize;
    let mut peak = f32::NEG_INFINITY;

    while rendered < total_frames {
        let now_ms = (rendered as f64 * 1000.0 / sample_rate as f64) as i64;
        let frames = engine.process_period(now_ms, &mut out);
        peak = peak.max(engine.peak_level());

        for &sample in &out[..frames * 2] {
            writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        rendered += frames;
        if frames == 0 {
            break;
        }
    }
    writer.finalize()?;

    info!("Wrote {rendered} frames at {sample_rate} Hz to '{output}' (peak {peak:.1} dB)");
    Ok(())
}

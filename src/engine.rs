// src/engine.rs

use log::debug;

use crate::audio_buffer::AudioBuffer;
use crate::convert::lin2log;
use crate::error::{BuildError, BuildResult};
use crate::event::{ALL_SOUND_OFF, MidiEvent, MidiMessage, TimedMidiEvent};
use crate::instrument::Instrument;
use crate::scheduler::EventScheduler;

/// Audio settings shared by every instrument in an engine.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    pub sample_rate: f32,
    pub period_frames: usize,
    /// Interleaved output channels, 1 or 2.
    pub channels: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            period_frames: 256,
            channels: 2,
        }
    }
}

/// Real-time audio engine.
///
/// This struct runs exclusively on the audio thread.
/// Instruments are added before the first period; after that only their
/// parameters change.
pub struct Engine {
    config: EngineConfig,

    /// Instruments in insertion order
    instruments: Vec<Instrument>,

    scheduler: EventScheduler,

    /// Stereo sum of every instrument
    mix: AudioBuffer,

    /// Read-back of the last period
    active_voices: usize,
    peak_level: f32,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            scheduler: EventScheduler::new(config.sample_rate, config.period_frames),
            mix: AudioBuffer::stereo(config.period_frames),
            config,
            instruments: Vec::new(),
            active_voices: 0,
            peak_level: f32::NEG_INFINITY,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Add an instrument built for this engine's sample rate and period.
    pub fn add_instrument(&mut self, instrument: Instrument) -> BuildResult<()> {
        if self.instrument(instrument.name()).is_some() {
            return Err(BuildError::DuplicateSubmodule {
                module: "engine".to_string(),
                name: instrument.name().to_string(),
            });
        }
        debug!(target: "engine", "Adding instrument '{}'", instrument.name());
        self.instruments.push(instrument);
        Ok(())
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn instruments_mut(&mut self) -> &mut [Instrument] {
        &mut self.instruments
    }

    pub fn instrument(&self, name: &str) -> Option<&Instrument> {
        self.instruments.iter().find(|i| i.name() == name)
    }

    pub fn instrument_mut(&mut self, name: &str) -> Option<&mut Instrument> {
        self.instruments.iter_mut().find(|i| i.name() == name)
    }

    /// Queue a MIDI event for the period containing its timestamp.
    pub fn schedule(&mut self, event: TimedMidiEvent) {
        self.scheduler.push(event);
    }

    pub fn scheduler(&self) -> &EventScheduler {
        &self.scheduler
    }

    /// Render one period starting at `now_ms` into interleaved `out`.
    ///
    /// Called once per period from the audio callback. `out` holds
    /// `period_frames * channels` samples. Returns the frames written.
    pub fn process_period(&mut self, now_ms: i64, out: &mut [f32]) -> usize {
        let events = self.scheduler.next_period(now_ms);

        self.mix.clear();
        let mut active = 0;
        for instrument in &mut self.instruments {
            instrument.process_events(events);
            instrument.render(&mut self.mix);
            active += instrument.bound_voices().len();
        }

        self.active_voices = active;
        self.peak_level = lin2log(self.mix.peak());

        let channels = self.config.channels.max(1);
        let frames = (out.len() / channels).min(self.mix.frames());
        self.mix.interleave_into(&mut out[..frames * channels], channels);
        frames
    }

    /// Voices bound after the last period.
    pub fn active_voices(&self) -> usize {
        self.active_voices
    }

    /// Master peak of the last period in dB.
    pub fn peak_level(&self) -> f32 {
        self.peak_level
    }

    /// Silence every instrument and drop queued events.
    pub fn reset(&mut self) {
        self.scheduler.clear();
        for instrument in &mut self.instruments {
            let silence = MidiMessage::Controller {
                channel: instrument.config().midi_channel.saturating_sub(1),
                controller: ALL_SOUND_OFF,
                value: 0,
            };
            instrument.process_events(&[MidiEvent::new(0, silence)]);
        }
        self.active_voices = 0;
    }
}

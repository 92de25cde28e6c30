// src/instrument.rs
//
// A fixed pool of voices behind one MIDI channel.
//
// Note-on events bind a note to the first free voice; the binding holds
// through the release phase until the voice is silent or has played for
// too long. Controller events reach every voice so modulation is already
// in place when a voice is picked up.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, error, info, log_enabled, warn};
use smallvec::SmallVec;

use crate::audio_buffer::AudioBuffer;
use crate::builder::Builder;
use crate::error::{BuildError, BuildResult, ParameterResult, SnapshotError, SnapshotResult};
use crate::event::{ALL_NOTES_OFF, ALL_SOUND_OFF, MidiEvent, MidiMessage};
use crate::parameter::{ParamValue, Parameter, ParameterValues};
use crate::state::{Attributes, SkippedLine, format_snapshot, parse_snapshot};
use crate::voice::{Voice, VoiceId};

/// Instrument settings decoded from attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentConfig {
    pub max_voices: usize,
    /// 0 listens to every channel, 1-16 to that channel only.
    pub midi_channel: u8,
    pub min_note: u8,
    pub max_note: u8,
    /// Level in dB a voice must exceed to count as audible.
    pub min_level: f32,
    /// Seconds of silence before a voice is released.
    pub min_silent_time: f32,
    /// Seconds of audible output before a voice is forcibly released.
    pub max_play_time: f32,
    pub params_file: PathBuf,
}

impl InstrumentConfig {
    pub fn from_attributes(name: &str, attributes: &Attributes) -> BuildResult<Self> {
        let invalid = |key: &str| BuildError::InvalidAttribute {
            attribute: key.to_string(),
            value: attributes.get_or(key, "").to_string(),
        };

        let max_voices: usize = attributes.parsed("maxVoices", 1)?;
        if max_voices == 0 {
            return Err(invalid("maxVoices"));
        }
        let midi_channel: u8 = attributes.parsed("midiChannel", 0)?;
        if midi_channel > 16 {
            return Err(invalid("midiChannel"));
        }

        Ok(Self {
            max_voices,
            midi_channel,
            min_note: attributes.note("minNote", 0)?,
            max_note: attributes.note("maxNote", 127)?,
            min_level: attributes.number("minLevel", -96.0)?,
            min_silent_time: attributes.number("minSilentTime", 0.1)?,
            max_play_time: attributes.number("maxPlayTime", 60.0)?,
            params_file: PathBuf::from(attributes.get("paramsFile").map_or_else(
                || format!("{name}_params.txt"),
                str::to_string,
            )),
        })
    }

    fn accepts(&self, channel: u8) -> bool {
        self.midi_channel == 0 || channel == self.midi_channel - 1
    }

    fn in_range(&self, note: u8) -> bool {
        (self.min_note..=self.max_note).contains(&note)
    }
}

/// A named voice pool.
pub struct Instrument {
    name: String,
    log_target: String,
    config: InstrumentConfig,
    voices: Vec<Voice>,

    /// Note to voice, ordered by note.
    bindings: BTreeMap<u8, VoiceId>,
    /// Bound voices after the last `process_events`.
    bound: Vec<VoiceId>,

    min_silent_samples: u64,
    max_play_samples: u64,
}

impl Instrument {
    /// Build with the log target `instrument[<name>]`.
    pub fn new(
        name: &str,
        module_type: &str,
        builder: &Builder,
        sample_rate: f32,
        frames: usize,
        attributes: &Attributes,
    ) -> BuildResult<Self> {
        let log_target = format!("instrument[{name}]");
        Self::with_log_target(name, module_type, builder, sample_rate, frames, attributes, log_target)
    }

    /// Build `maxVoices` instances of `module_type` named `<name>#<i>`
    /// and prepare each one.
    pub fn with_log_target(
        name: &str,
        module_type: &str,
        builder: &Builder,
        sample_rate: f32,
        frames: usize,
        attributes: &Attributes,
        log_target: impl Into<String>,
    ) -> BuildResult<Self> {
        let log_target = log_target.into();
        let config = InstrumentConfig::from_attributes(name, attributes)?;

        let mut voices = Vec::with_capacity(config.max_voices);
        for i in 0..config.max_voices {
            let mut graph = builder.build(module_type, &format!("{name}#{i}"))?;
            graph.prepare(sample_rate, frames);

            if log_enabled!(target: &log_target, log::Level::Debug) {
                if let Some(root) = graph.root() {
                    debug!(target: &log_target, "Attributes:");
                    for (key, value) in graph.attributes(root).iter() {
                        debug!(target: &log_target, " '{key}' = '{value}'");
                    }
                    debug!(target: &log_target, "Parameters:");
                    for path in graph.parameters(root).keys() {
                        debug!(target: &log_target, " '{path}'");
                    }
                }
            }

            voices.push(Voice::new(graph, config.min_level)?);
        }

        let to_samples = |seconds: f32| (seconds * sample_rate).max(0.0) as u64;
        Ok(Self {
            name: name.to_string(),
            min_silent_samples: to_samples(config.min_silent_time),
            max_play_samples: to_samples(config.max_play_time),
            log_target,
            config,
            voices,
            bindings: BTreeMap::new(),
            bound: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &InstrumentConfig {
        &self.config
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    /// Voice bound to `note`, if any.
    pub fn voice_for(&self, note: u8) -> Option<VoiceId> {
        self.bindings.get(&note).copied()
    }

    /// Bound voices after the last `process_events`, ordered by note.
    pub fn bound_voices(&self) -> &[VoiceId] {
        &self.bound
    }

    // ═══════════════════════════════════════════════════════════════════
    // Events
    // ═══════════════════════════════════════════════════════════════════

    /// Dispatch one period of events, then release voices that went silent
    /// or played for too long. Returns the voices still bound.
    pub fn process_events(&mut self, events: &[MidiEvent]) -> &[VoiceId] {
        for event in events {
            match event.message {
                MidiMessage::NoteOn { channel, note, .. } => {
                    if !self.config.accepts(channel) || !self.config.in_range(note) {
                        continue;
                    }
                    let id = match self.bindings.get(&note) {
                        Some(&id) => id,
                        None => {
                            let Some(id) = self.voices.iter().position(|v| !v.is_active()) else {
                                warn!(target: &self.log_target, "No free voice for note {note}");
                                continue;
                            };
                            debug!(target: &self.log_target, "New voice {id} for note {note}");
                            self.voices[id].activate();
                            self.bindings.insert(note, id);
                            id
                        }
                    };
                    self.voices[id].push_event(event);
                }

                MidiMessage::NoteOff { channel, note, .. } => {
                    if !self.config.accepts(channel) || !self.config.in_range(note) {
                        continue;
                    }
                    match self.bindings.get(&note) {
                        Some(&id) => self.voices[id].push_event(event),
                        None => warn!(target: &self.log_target, "Note {note} was not playing"),
                    }
                }

                MidiMessage::Controller { channel, controller, .. } => {
                    if !self.config.accepts(channel) {
                        continue;
                    }
                    if controller == ALL_SOUND_OFF || controller == ALL_NOTES_OFF {
                        for &id in self.bindings.values() {
                            self.voices[id].deactivate();
                        }
                        self.bindings.clear();
                        debug!(target: &self.log_target, "All voices off");
                    } else {
                        for voice in &mut self.voices {
                            voice.push_event(event);
                        }
                    }
                }

                MidiMessage::Reset => {}
            }
        }

        self.age_voices();

        self.bound.clear();
        self.bound.extend(self.bindings.values().copied());
        &self.bound
    }

    fn age_voices(&mut self) {
        let (min_silent, max_play) = (self.min_silent_samples, self.max_play_samples);
        let voices = &mut self.voices;
        let log_target = &self.log_target;
        self.bindings.retain(|note, id| {
            let voice = &mut voices[*id];
            if voice.silent_time() > min_silent || voice.active_time() > max_play {
                debug!(target: log_target, "Deactivating note {note}");
                voice.deactivate();
                false
            } else {
                true
            }
        });
    }

    /// Render every bound voice and add it into `mix`.
    ///
    /// A voice that fails is logged, deactivated and unbound; the others
    /// keep playing. Returns the number of voices mixed.
    pub fn render(&mut self, mix: &mut AudioBuffer) -> usize {
        let mut failed: SmallVec<[VoiceId; 4]> = SmallVec::new();
        let mut rendered = 0;

        for &id in &self.bound {
            let voice = &mut self.voices[id];
            match voice.process() {
                Ok(()) => {
                    mix.mix_from(voice.buffer());
                    rendered += 1;
                }
                Err(e) => {
                    error!(target: &self.log_target, "Voice {id} failed: {e}");
                    voice.deactivate();
                    failed.push(id);
                }
            }
        }

        if !failed.is_empty() {
            self.bindings.retain(|_, id| !failed.contains(id));
            self.bound.retain(|id| !failed.contains(id));
        }
        rendered
    }

    // ═══════════════════════════════════════════════════════════════════
    // Parameters
    // ═══════════════════════════════════════════════════════════════════

    /// Parameters by dotted path. Every voice holds the same values.
    pub fn parameters(&self) -> BTreeMap<String, Parameter> {
        self.voices
            .first()
            .map(|v| v.graph().parameters(v.root()))
            .unwrap_or_default()
    }

    /// Apply `values` to every voice. Each voice update is atomic; the first
    /// error is returned after all voices were tried.
    pub fn update_parameters(&mut self, values: &ParameterValues) -> ParameterResult<()> {
        let mut first_error = None;
        for voice in &mut self.voices {
            let root = voice.root();
            if let Err(e) = voice.graph_mut().update_parameters(root, values) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn set_parameter(&mut self, path: &str, value: ParamValue) -> ParameterResult<()> {
        let mut values = ParameterValues::new();
        values.insert(path.to_string(), value);
        self.update_parameters(&values)
    }

    pub fn reset_parameters(&mut self) {
        for voice in &mut self.voices {
            let root = voice.root();
            voice.graph_mut().reset_parameters(root);
        }
    }

    /// Write unlocked parameters to `path`, or to the configured file.
    pub fn save_parameters(&self, path: Option<&Path>, append: bool) -> SnapshotResult<()> {
        let path = path.unwrap_or(self.config.params_file.as_path());
        info!(target: &self.log_target, "Saving '{}' parameters to '{}'", self.name, path.display());

        let io_error = |source| SnapshotError::Io {
            path: path.display().to_string(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .map_err(io_error)?;
        file.write_all(format_snapshot(&self.name, &self.parameters()).as_bytes())
            .map_err(io_error)
    }

    /// Restore parameters from `path`, or from the configured file.
    ///
    /// Lines for other instruments are skipped. Bad lines and values that
    /// fail to apply are logged and do not stop the load. Returns the number
    /// of values applied.
    pub fn load_parameters(&mut self, path: Option<&Path>) -> SnapshotResult<usize> {
        let path = path.unwrap_or(self.config.params_file.as_path()).to_path_buf();
        info!(target: &self.log_target, "Loading '{}' parameters from '{}'", self.name, path.display());

        let text = fs::read_to_string(&path).map_err(|source| SnapshotError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let snapshot = parse_snapshot(&self.name, &text);

        for skipped in &snapshot.skipped {
            match skipped {
                SkippedLine::Malformed(line) => error!(target: &self.log_target, "Malformed line '{line}'"),
                SkippedLine::InvalidName(name) => {
                    error!(target: &self.log_target, "Invalid parameter specification '{name}'")
                }
                SkippedLine::OtherInstrument(line) => debug!(target: &self.log_target, "skipping '{line}'"),
            }
        }

        let mut applied = 0;
        for (param, value) in snapshot.values {
            match self.set_parameter(&param, value) {
                Ok(()) => applied += 1,
                Err(e) => error!(target: &self.log_target, "Cannot restore '{param}': {e}"),
            }
        }
        Ok(applied)
    }

    /// DOT rendering of the first voice's module tree.
    pub fn dump_dot(&self) -> String {
        self.voices
            .first()
            .map(|v| crate::dot::to_dot(v.graph()))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::log2lin;
    use crate::state::{ModuleTemplate, SubmoduleDef};

    /// Voice output is the MIDI gate: 1 while a note is held.
    fn gate_builder() -> Builder {
        let mut builder = Builder::new();
        builder
            .define(
                ModuleTemplate::new("gateVoice")
                    .with_output("out")
                    .with_submodule(SubmoduleDef::new("midiSource", "src"))
                    .with_patch("src.gate", "out"),
            )
            .unwrap();
        builder
    }

    fn gate_instrument(attributes: Attributes) -> Instrument {
        Instrument::new("test", "gateVoice", &gate_builder(), 1000.0, 10, &attributes).unwrap()
    }

    #[test]
    fn test_config_defaults_and_validation() {
        let config = InstrumentConfig::from_attributes("lead", &Attributes::new()).unwrap();
        assert_eq!(config.max_voices, 1);
        assert_eq!(config.midi_channel, 0);
        assert_eq!((config.min_note, config.max_note), (0, 127));
        assert_eq!(config.min_level, -96.0);
        assert_eq!(config.params_file, PathBuf::from("lead_params.txt"));

        let config =
            InstrumentConfig::from_attributes("lead", &Attributes::new().with("minNote", "C4").with("maxNote", "C5"))
                .unwrap();
        assert_eq!((config.min_note, config.max_note), (60, 72));

        assert!(InstrumentConfig::from_attributes("x", &Attributes::new().with("maxVoices", 0)).is_err());
        assert!(InstrumentConfig::from_attributes("x", &Attributes::new().with("midiChannel", 17)).is_err());
    }

    #[test]
    fn test_extra_note_is_dropped_when_pool_is_full() {
        let mut inst = gate_instrument(Attributes::new().with("maxVoices", 2));
        let bound = inst
            .process_events(&[
                MidiEvent::note_on(0, 0, 60, 100),
                MidiEvent::note_on(1, 0, 62, 100),
                MidiEvent::note_on(2, 0, 64, 100),
            ])
            .to_vec();
        assert_eq!(bound, vec![0, 1]);
        assert_eq!(inst.voice_for(60), Some(0));
        assert_eq!(inst.voice_for(62), Some(1));
        assert_eq!(inst.voice_for(64), None);
    }

    #[test]
    fn test_retrigger_reuses_bound_voice() {
        let mut inst = gate_instrument(Attributes::new().with("maxVoices", 2));
        inst.process_events(&[MidiEvent::note_on(0, 0, 60, 100)]);
        let bound = inst.process_events(&[MidiEvent::note_on(5, 0, 60, 90)]).to_vec();
        assert_eq!(bound, vec![0]);
        assert!(!inst.voices()[1].is_active());
    }

    #[test]
    fn test_channel_and_range_filters() {
        let mut inst = gate_instrument(Attributes::new().with("midiChannel", 2).with("minNote", "C4"));
        assert!(inst.process_events(&[MidiEvent::note_on(0, 0, 60, 100)]).is_empty());
        assert!(inst.process_events(&[MidiEvent::note_on(0, 1, 59, 100)]).is_empty());
        assert_eq!(inst.process_events(&[MidiEvent::note_on(0, 1, 60, 100)]), &[0]);
    }

    #[test]
    fn test_all_sound_off_clears_bindings() {
        let mut inst = gate_instrument(Attributes::new().with("maxVoices", 3));
        inst.process_events(&[MidiEvent::note_on(0, 0, 60, 100), MidiEvent::note_on(0, 0, 64, 100)]);
        let bound = inst.process_events(&[MidiEvent::controller(0, 0, ALL_SOUND_OFF, 0)]);
        assert!(bound.is_empty());
        assert!(inst.voices().iter().all(|v| !v.is_active()));
    }

    #[test]
    fn test_silent_voice_is_released_after_note_off() {
        // 20 ms of silence at 1 kHz and 10-frame periods
        let mut inst = gate_instrument(Attributes::new().with("minSilentTime", 0.02));
        let mut mix = AudioBuffer::stereo(10);

        inst.process_events(&[MidiEvent::note_on(0, 0, 60, 100)]);
        assert_eq!(inst.render(&mut mix), 1);
        assert_eq!(mix.channel(0), &[1.0; 10]);

        inst.process_events(&[MidiEvent::note_off(0, 0, 60)]);
        inst.render(&mut mix);
        inst.process_events(&[]);
        inst.render(&mut mix);
        inst.process_events(&[]);
        inst.render(&mut mix);
        // 30 samples of silence so far
        assert!(inst.process_events(&[]).is_empty());
        assert!(!inst.voices()[0].is_active());
    }

    #[test]
    fn test_note_off_for_unbound_note_is_ignored() {
        let mut inst = gate_instrument(Attributes::new());
        assert!(inst.process_events(&[MidiEvent::note_off(0, 0, 60)]).is_empty());
    }

    #[test]
    fn test_adsr_note_is_audible_then_released() {
        let mut builder = Builder::new();
        builder
            .define(
                ModuleTemplate::new("adsrVoice")
                    .with_output("out")
                    .with_submodule(SubmoduleDef::new("midiSource", "src"))
                    .with_submodule(SubmoduleDef::new("adsr", "env"))
                    .with_submodule(SubmoduleDef::new("vco", "osc"))
                    .with_submodule(SubmoduleDef::new("vga", "amp"))
                    .with_patch("src.gate", "env.gate")
                    .with_patch("src.cv", "osc.cv")
                    .with_patch("osc.out", "amp.in")
                    .with_patch("env.out", "amp.gain")
                    .with_patch("amp.out", "out"),
            )
            .unwrap();

        const SR: usize = 48_000;
        const FRAMES: usize = 240;
        const NOTE_OFF: usize = 24_000;
        let release = (1.5 * SR as f32) as usize;
        let min_silent = SR / 10;
        let threshold = log2lin(-96.0);

        let mut inst = Instrument::new("lead", "adsrVoice", &builder, SR as f32, FRAMES, &Attributes::new()).unwrap();
        let mut mix = AudioBuffer::stereo(FRAMES);

        let mut first_audible = None;
        let mut released_at = None;
        for start in (0..NOTE_OFF + release + min_silent + 2 * FRAMES).step_by(FRAMES) {
            let events = match start {
                0 => vec![MidiEvent::note_on(0, 0, 69, 100)],
                NOTE_OFF => vec![MidiEvent::note_off(0, 0, 69)],
                _ => vec![],
            };
            if inst.process_events(&events).is_empty() && start > 0 {
                released_at = Some(start);
                break;
            }
            mix.clear();
            inst.render(&mut mix);
            if first_audible.is_none() {
                first_audible = mix.channel(0).iter().position(|x| x.abs() > threshold).map(|i| start + i);
            }
            if start == NOTE_OFF - FRAMES {
                assert!(inst.voices()[0].is_playing());
            }
        }

        assert!(first_audible.is_some_and(|n| n < 480), "attack too slow: {first_audible:?}");
        let released_at = released_at.expect("voice never released");
        assert!(released_at > NOTE_OFF);
        assert!(released_at <= NOTE_OFF + release + min_silent + FRAMES);
    }

    #[test]
    fn test_parameters_apply_to_every_voice() {
        let mut builder = Builder::new();
        builder
            .define(
                ModuleTemplate::new("constVoice")
                    .with_output("out")
                    .with_submodule(SubmoduleDef::new("constant", "c"))
                    .with_patch("c.out", "out"),
            )
            .unwrap();
        let attrs = Attributes::new().with("maxVoices", 2);
        let mut inst = Instrument::new("pad", "constVoice", &builder, 1000.0, 10, &attrs).unwrap();

        inst.set_parameter("c.value", ParamValue::Number(0.25)).unwrap();
        for voice in inst.voices() {
            assert_eq!(voice.graph().parameter(voice.root(), "c.value").unwrap().number(), 0.25);
        }
        assert!(inst.set_parameter("c.value", ParamValue::Number(2.0)).is_err());
        assert_eq!(inst.parameters()["c.value"].number(), 0.25);

        inst.reset_parameters();
        assert_eq!(inst.parameters()["c.value"].number(), 0.0);
    }

    #[test]
    fn test_save_and_load_parameters() {
        let mut builder = Builder::new();
        builder
            .define(
                ModuleTemplate::new("constVoice")
                    .with_output("out")
                    .with_submodule(SubmoduleDef::new("constant", "c"))
                    .with_patch("c.out", "out"),
            )
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("params.txt");
        let attrs = Attributes::new().with("paramsFile", file.display());

        let mut inst = Instrument::new("pad", "constVoice", &builder, 1000.0, 10, &attrs).unwrap();
        inst.set_parameter("c.value", ParamValue::Number(0.75)).unwrap();
        inst.save_parameters(None, false).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "pad.c.value=0.750\n");

        // A second instrument's lines and a bad line do not disturb the load
        fs::write(&file, "pad.c.value=0.750\nother.c.value=0.1\nbroken\npad.c.missing=1\n").unwrap();
        inst.reset_parameters();
        assert_eq!(inst.load_parameters(None).unwrap(), 1);
        assert_eq!(inst.parameters()["c.value"].number(), 0.75);

        assert!(matches!(
            inst.load_parameters(Some(&dir.path().join("nope.txt"))),
            Err(SnapshotError::Io { .. })
        ));
    }
}

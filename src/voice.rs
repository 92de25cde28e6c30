// src/voice.rs

use crate::audio_buffer::AudioBuffer;
use crate::convert::lin2log;
use crate::error::{BuildError, BuildResult, ProcessingError, ProcessingResult};
use crate::event::MidiEvent;
use crate::graph::{Graph, ModuleId, PortId};

pub type VoiceId = usize;

/// Where a voice reads its audio from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VoiceOutputs {
    Mono(PortId),
    Stereo(PortId, PortId),
}

/// One prepared module tree rendering a single note.
///
/// Responsibilities:
/// - forward MIDI events to the tree's listener modules
/// - pull the output ports once per period
/// - track how long the voice has been audible or silent
///
/// Timers count samples.
pub struct Voice {
    graph: Graph,
    root: ModuleId,
    outputs: VoiceOutputs,
    listeners: Vec<ModuleId>,

    events: Vec<MidiEvent>,
    buffer: AudioBuffer,

    min_level: f32,
    active: bool,
    playing: bool,
    peak_level: f32,
    active_time: u64,
    silent_time: u64,
}

impl Voice {
    /// Wrap a prepared graph. Its root needs `outL` and `outR`, or `out`.
    pub fn new(mut graph: Graph, min_level: f32) -> BuildResult<Self> {
        let root = graph.root().ok_or(BuildError::StaleHandle)?;
        let invalid = |graph: &Graph, reason: &'static str| {
            let (module, type_name) = graph
                .module(root)
                .map(|m| (m.name().to_string(), m.type_name().to_string()))
                .unwrap_or_default();
            BuildError::InvalidOutputs {
                module,
                type_name,
                reason,
            }
        };

        let left = graph.find_port(root, "outL");
        let right = graph.find_port(root, "outR");
        let outputs = match (left, right) {
            (Some(l), Some(r)) => VoiceOutputs::Stereo(l, r),
            (None, None) => match graph.find_port(root, "out") {
                Some(out) => VoiceOutputs::Mono(out),
                None => return Err(invalid(&graph, "needs either 'out' or 'outL' and 'outR' output ports")),
            },
            _ => return Err(invalid(&graph, "needs both 'outL' and 'outR' output ports")),
        };

        let listeners = graph.midi_listeners();
        let buffer = AudioBuffer::stereo(graph.frames());

        Ok(Self {
            graph,
            root,
            outputs,
            listeners,
            events: Vec::with_capacity(64),
            buffer,
            min_level,
            active: false,
            playing: false,
            peak_level: f32::NEG_INFINITY,
            active_time: 0,
            silent_time: 0,
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn root(&self) -> ModuleId {
        self.root
    }

    #[inline]
    pub fn is_stereo(&self) -> bool {
        matches!(self.outputs, VoiceOutputs::Stereo(..))
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Peak of the last rendered period in dB.
    pub fn peak_level(&self) -> f32 {
        self.peak_level
    }

    pub fn active_time(&self) -> u64 {
        self.active_time
    }

    pub fn silent_time(&self) -> u64 {
        self.silent_time
    }

    pub fn buffer(&self) -> &AudioBuffer {
        &self.buffer
    }

    /// Start the tree and reset activity tracking. No-op when already active.
    pub fn activate(&mut self) {
        if self.active {
            return;
        }
        self.graph.start();
        self.active = true;
        self.playing = false;
        self.active_time = 0;
        self.silent_time = 0;
        self.peak_level = f32::NEG_INFINITY;
        self.events.clear();
    }

    pub fn deactivate(&mut self) {
        if !self.active {
            return;
        }
        self.graph.stop();
        self.active = false;
        self.playing = false;
    }

    /// Inactive voices hand events straight to their listeners; active ones
    /// queue them for the next `process`.
    pub fn push_event(&mut self, event: &MidiEvent) {
        if self.active {
            self.events.push(*event);
        } else {
            for &listener in &self.listeners {
                self.graph.push_midi(listener, event);
            }
        }
    }

    /// Render one period into the voice buffer.
    pub fn process(&mut self) -> ProcessingResult<()> {
        for event in self.events.drain(..) {
            for &listener in &self.listeners {
                self.graph.push_midi(listener, &event);
            }
        }

        let (left, right) = match self.outputs {
            VoiceOutputs::Mono(out) => (out, out),
            VoiceOutputs::Stereo(l, r) => (l, r),
        };

        self.graph.process_port(left)?;
        self.graph.process_port(right)?;

        for (ch, port) in [left, right].into_iter().enumerate() {
            let src = self.graph.buffer(port);
            let dst = self.buffer.channel_mut(ch);
            if src.len() < dst.len() {
                return Err(ProcessingError::BufferSize {
                    expected: dst.len(),
                    got: src.len(),
                });
            }
            dst.copy_from_slice(&src[..dst.len()]);
        }

        self.graph.set_dirty(left, true);
        self.graph.set_dirty(right, true);

        self.update_timers();
        Ok(())
    }

    fn update_timers(&mut self) {
        self.peak_level = lin2log(self.buffer.peak());

        let period = self.buffer.frames() as u64;
        if self.peak_level > self.min_level {
            self.playing = true;
            self.silent_time = 0;
        } else {
            self.silent_time += period;
        }
        if self.playing {
            self.active_time += period;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::parameter::ParamValue;
    use crate::state::{ModuleTemplate, SubmoduleDef};

    fn constant_voice(outputs: &[&str]) -> BuildResult<Voice> {
        let mut builder = Builder::new();
        let mut template = ModuleTemplate::new("test").with_submodule(
            SubmoduleDef::new("constant", "c").parameter("value", "def", 0.5),
        );
        for out in outputs {
            template = template.with_output(*out).with_patch("c.out", *out);
        }
        builder.define(template)?;
        let mut graph = builder.build("test", "v")?;
        graph.prepare(1000.0, 10);
        Voice::new(graph, -96.0)
    }

    #[test]
    fn test_output_port_rules() {
        assert!(!constant_voice(&["out"]).unwrap().is_stereo());
        assert!(constant_voice(&["outL", "outR"]).unwrap().is_stereo());
        assert!(matches!(
            constant_voice(&["outL"]),
            Err(BuildError::InvalidOutputs { .. })
        ));
        assert!(matches!(
            constant_voice(&["left"]),
            Err(BuildError::InvalidOutputs { .. })
        ));
    }

    #[test]
    fn test_mono_output_is_duplicated_and_timed() {
        let mut voice = constant_voice(&["out"]).unwrap();
        voice.activate();
        voice.process().unwrap();
        assert_eq!(voice.buffer().channel(0), &[0.5; 10]);
        assert_eq!(voice.buffer().channel(1), &[0.5; 10]);
        assert!(voice.is_playing());
        assert_eq!(voice.active_time(), 10);
        assert_eq!(voice.silent_time(), 0);

        voice.process().unwrap();
        assert_eq!(voice.active_time(), 20);
    }

    #[test]
    fn test_short_port_buffer_is_reported() {
        let mut voice = constant_voice(&["out"]).unwrap();
        voice.buffer = AudioBuffer::stereo(20);
        voice.activate();
        assert_eq!(
            voice.process(),
            Err(ProcessingError::BufferSize { expected: 20, got: 10 })
        );
    }

    #[test]
    fn test_silent_voice_accumulates_silence() {
        let mut voice = constant_voice(&["out"]).unwrap();
        let root = voice.root();
        voice
            .graph_mut()
            .set_parameter(root, "c.value", ParamValue::Number(0.0))
            .unwrap();
        voice.activate();
        voice.process().unwrap();
        voice.process().unwrap();
        assert!(!voice.is_playing());
        assert_eq!(voice.silent_time(), 20);
        assert_eq!(voice.active_time(), 0);
        assert_eq!(voice.peak_level(), f32::NEG_INFINITY);
    }
}

// src/nodes/midi.rs
//
// MIDI listeners: note-to-CV conversion and controller mapping.
//
// Both nodes queue the events pushed during a period and render held
// state between them, so every change lands on its exact sample.

use crate::convert::note_to_cv;
use crate::error::{BuildResult, ProcessingResult};
use crate::event::{MidiEvent, MidiMessage};
use crate::node::{MidiListener, Node, NodeSpec, ProcessContext};
use crate::state::Attributes;

/// Initial queue capacity, to keep `push_event` allocation-free in practice.
const QUEUE_CAPACITY: usize = 64;

/// Sort `events` and walk the period, calling `fill` for each run of
/// samples between events and `apply` at each event.
fn render_held<F, A>(events: &mut Vec<MidiEvent>, frames: usize, mut fill: F, mut apply: A)
where
    F: FnMut(std::ops::Range<usize>),
    A: FnMut(&MidiEvent),
{
    events.sort_by_key(|e| e.time);

    let mut pos = 0;
    for event in events.iter() {
        let at = (event.time as usize).min(frames.saturating_sub(1)).max(pos);
        fill(pos..at);
        pos = at;
        apply(event);
    }
    fill(pos..frames);
    events.clear();
}

// ═══════════════════════════════════════════════════════════════════
// MIDI source
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct NoteState {
    cv: f32,
    velocity: f32,
    gate: f32,
}

/// Converts note events into `cv`, `velocity` and `gate` signals.
pub struct MidiSource {
    min_note: u8,
    max_note: u8,
    state: NoteState,
    events: Vec<MidiEvent>,
}

impl MidiSource {
    pub fn new(min_note: u8, max_note: u8) -> Self {
        Self {
            min_note,
            max_note,
            state: NoteState::default(),
            events: Vec::with_capacity(QUEUE_CAPACITY),
        }
    }

    pub fn spec(attributes: &Attributes) -> BuildResult<NodeSpec> {
        let min_note = attributes.note("minNote", 0)?;
        let max_note = attributes.note("maxNote", 127)?;
        Ok(NodeSpec::new(Self::new(min_note, max_note))
            .with_output("cv")
            .with_output("velocity")
            .with_output("gate"))
    }

    fn reset(&mut self) {
        self.events.clear();
        self.state = NoteState::default();
    }
}

impl MidiListener for MidiSource {
    /// Only in-range note events are queued; nothing else affects the outputs.
    fn push_event(&mut self, event: &MidiEvent) {
        match event.message.note() {
            Some(note) if (self.min_note..=self.max_note).contains(&note) => self.events.push(*event),
            _ => {}
        }
    }
}

impl Node for MidiSource {
    fn start(&mut self) {
        self.reset();
    }

    fn process(&mut self, ctx: &mut ProcessContext) -> ProcessingResult<()> {
        let frames = ctx.frames;
        let outputs = ctx.outputs();
        let (cv, rest) = outputs.split_at_mut(1);
        let (velocity, gate) = rest.split_at_mut(1);
        let (cv, velocity, gate) = (&mut cv[0], &mut velocity[0], &mut gate[0]);

        let held = std::cell::Cell::new(self.state);
        render_held(
            &mut self.events,
            frames,
            |range| {
                let s = held.get();
                cv[range.clone()].fill(s.cv);
                velocity[range.clone()].fill(s.velocity);
                gate[range].fill(s.gate);
            },
            |event| {
                let mut s = held.get();
                match event.message {
                    MidiMessage::NoteOn { note, velocity, .. } => {
                        s.cv = note_to_cv(note);
                        s.velocity = f32::from(velocity) / 127.0;
                        s.gate = 1.0;
                    }
                    MidiMessage::NoteOff { .. } => s.gate = 0.0,
                    _ => {}
                }
                held.set(s);
            },
        );
        self.state = held.get();
        Ok(())
    }

    fn midi_listener(&mut self) -> Option<&mut dyn MidiListener> {
        Some(self)
    }
}

// ═══════════════════════════════════════════════════════════════════
// MIDI controller
// ═══════════════════════════════════════════════════════════════════

/// Maps one controller number onto `[min, max]`.
pub struct MidiController {
    controller: u32,
    min: f32,
    max: f32,
    value: f32,
    active: bool,
    events: Vec<MidiEvent>,
}

impl MidiController {
    pub fn new(controller: u32, default: f32, min: f32, max: f32) -> Self {
        Self {
            controller,
            min,
            max,
            value: default,
            active: false,
            events: Vec::with_capacity(QUEUE_CAPACITY),
        }
    }

    pub fn spec(attributes: &Attributes) -> BuildResult<NodeSpec> {
        let node = Self::new(
            attributes.parsed("controller", 0)?,
            attributes.number("default", 0.0)?,
            attributes.number("min", 0.0)?,
            attributes.number("max", 1.0)?,
        );
        Ok(NodeSpec::new(node).with_output("out"))
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    fn map(controller: u32, min: f32, max: f32, event: &MidiEvent) -> Option<f32> {
        match event.message {
            MidiMessage::Controller {
                controller: c, value, ..
            } if c == controller => Some(min + (value as f32 / 127.0) * (max - min)),
            _ => None,
        }
    }
}

impl MidiListener for MidiController {
    fn push_event(&mut self, event: &MidiEvent) {
        let Some(v) = Self::map(self.controller, self.min, self.max, event) else {
            return;
        };
        if self.active {
            self.events.push(*event);
        } else {
            self.value = v;
        }
    }
}

impl Node for MidiController {
    fn start(&mut self) {
        self.events.clear();
        self.active = true;
    }

    fn stop(&mut self) {
        self.events.clear();
        self.active = false;
    }

    fn process(&mut self, ctx: &mut ProcessContext) -> ProcessingResult<()> {
        let frames = ctx.frames;
        let out = ctx.output(0);
        let (controller, min, max) = (self.controller, self.min, self.max);
        let value = std::cell::Cell::new(self.value);

        render_held(
            &mut self.events,
            frames,
            |range| out[range].fill(value.get()),
            |event| {
                if let Some(v) = Self::map(controller, min, max, event) {
                    value.set(v);
                }
            },
        );
        self.value = value.get();
        Ok(())
    }

    fn midi_listener(&mut self) -> Option<&mut dyn MidiListener> {
        Some(self)
    }
}

// src/event.rs

/// Controller numbers that silence every voice at once.
pub const ALL_SOUND_OFF: u32 = 120;
pub const ALL_NOTES_OFF: u32 = 123;

/// MIDI message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },

    NoteOff { channel: u8, note: u8, velocity: u8 },

    Controller { channel: u8, controller: u32, value: i32 },

    Reset,
}

impl MidiMessage {
    /// Channel (0-based) for channel messages.
    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. }
            | MidiMessage::Controller { channel, .. } => Some(channel),
            MidiMessage::Reset => None,
        }
    }

    pub fn note(&self) -> Option<u8> {
        match *self {
            MidiMessage::NoteOn { note, .. } | MidiMessage::NoteOff { note, .. } => Some(note),
            _ => None,
        }
    }
}

/// ===============================
/// Control-side timestamped events
/// ===============================

/// An event stamped in milliseconds on the shared audio clock.
///
/// These events:
/// - come from the MIDI input thread
/// - are converted into in-period sample offsets by the scheduler
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimedMidiEvent {
    pub time_ms: i64,
    pub message: MidiMessage,
}

impl TimedMidiEvent {
    pub fn new(time_ms: i64, message: MidiMessage) -> Self {
        Self { time_ms, message }
    }
}

/// ===============================
/// Engine-side period events
/// ===============================

/// An event with a sample offset inside the current period.
///
/// These events:
/// - are consumed in non-decreasing `time` order
/// - never cross a period boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MidiEvent {
    pub time: u32,
    pub message: MidiMessage,
}

impl MidiEvent {
    pub fn new(time: u32, message: MidiMessage) -> Self {
        Self { time, message }
    }

    pub fn note_on(time: u32, channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(time, MidiMessage::NoteOn { channel, note, velocity })
    }

    pub fn note_off(time: u32, channel: u8, note: u8) -> Self {
        Self::new(
            time,
            MidiMessage::NoteOff {
                channel,
                note,
                velocity: 0,
            },
        )
    }

    pub fn controller(time: u32, channel: u8, controller: u32, value: i32) -> Self {
        Self::new(
            time,
            MidiMessage::Controller {
                channel,
                controller,
                value,
            },
        )
    }
}

// src/scheduler.rs
//
// Millisecond-stamped MIDI in, per-period sample offsets out.

use std::collections::VecDeque;

use log::warn;

use crate::event::{MidiEvent, TimedMidiEvent};

/// Converts events stamped on the shared clock into in-period events.
///
/// This struct runs on the audio thread once per period.
/// Events are kept in time order; equal stamps keep their arrival order.
pub struct EventScheduler {
    sample_rate: i64,
    frames: usize,

    /// Pending events, sorted by `time_ms`
    queue: VecDeque<TimedMidiEvent>,

    /// Pre-allocated output for the current period
    period: Vec<MidiEvent>,
}

impl EventScheduler {
    pub fn new(sample_rate: f32, frames: usize) -> Self {
        Self {
            sample_rate: sample_rate.round() as i64,
            frames,
            queue: VecDeque::with_capacity(256),
            period: Vec::with_capacity(64),
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Number of events waiting for a later period.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn push(&mut self, event: TimedMidiEvent) {
        let at = self.queue.partition_point(|e| e.time_ms <= event.time_ms);
        self.queue.insert(at, event);
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = TimedMidiEvent>) {
        for event in events {
            self.push(event);
        }
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.period.clear();
    }

    /// Take the events falling into the period starting at `period_start_ms`.
    ///
    /// Offsets are `(t - start) * sample_rate / 1000`, truncated. Late events
    /// are clamped to offset 0; events at or past the period length stay
    /// queued.
    pub fn next_period(&mut self, period_start_ms: i64) -> &[MidiEvent] {
        self.period.clear();

        while let Some(front) = self.queue.front() {
            let offset = (front.time_ms - period_start_ms) * self.sample_rate / 1000;
            if offset >= self.frames as i64 {
                break;
            }
            if offset < 0 {
                warn!(
                    target: "engine",
                    "Late MIDI event {:?} by {} samples",
                    front.message, -offset
                );
            }
            let time = offset.max(0) as u32;
            self.period.push(MidiEvent::new(time, front.message));
            self.queue.pop_front();
        }

        &self.period
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MidiMessage;

    fn note_on(time_ms: i64, note: u8) -> TimedMidiEvent {
        TimedMidiEvent::new(
            time_ms,
            MidiMessage::NoteOn {
                channel: 0,
                note,
                velocity: 100,
            },
        )
    }

    #[test]
    fn test_offsets_within_period() {
        // 48 samples per millisecond, 480 frames = 10 ms
        let mut scheduler = EventScheduler::new(48000.0, 480);
        scheduler.extend([note_on(1005, 62), note_on(1000, 60)]);

        let events = scheduler.next_period(1000);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].time, 0);
        assert_eq!(events[0].message.note(), Some(60));
        assert_eq!(events[1].time, 240);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_future_events_stay_queued() {
        let mut scheduler = EventScheduler::new(48000.0, 480);
        scheduler.push(note_on(1010, 60));
        scheduler.push(note_on(1025, 61));

        assert!(scheduler.next_period(1000).is_empty());
        assert_eq!(scheduler.pending(), 2);

        let events = scheduler.next_period(1010);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].time, 0);

        let events = scheduler.next_period(1020);
        assert_eq!(events[0].time, 240);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_late_events_clamp_to_zero() {
        let mut scheduler = EventScheduler::new(1000.0, 10);
        scheduler.push(note_on(95, 60));
        scheduler.push(note_on(103, 61));

        let events = scheduler.next_period(100);
        assert_eq!(events.iter().map(|e| e.time).collect::<Vec<_>>(), vec![0, 3]);
    }

    #[test]
    fn test_equal_stamps_keep_arrival_order() {
        let mut scheduler = EventScheduler::new(1000.0, 10);
        scheduler.extend([note_on(0, 1), note_on(0, 2), note_on(0, 3)]);
        let notes: Vec<_> = scheduler
            .next_period(0)
            .iter()
            .filter_map(|e| e.message.note())
            .collect();
        assert_eq!(notes, vec![1, 2, 3]);
    }
}

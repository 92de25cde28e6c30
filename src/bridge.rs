//! Thread-safe bridge between control threads and the audio engine.
//!
//! This module provides the communication layer that lets a MIDI input
//! thread and a control thread talk to the real-time engine.
//!
//! # Architecture
//!
//! - **Control side** owns [`ControlHandle`]
//! - **Audio thread** owns [`EngineHandle`] with the [`Engine`]
//! - Communication uses crossbeam channels for events and commands, and
//!   atomics for read-back
//!
//! # Usage
//!
//! ```ignore
//! let (control, mut engine) = create_bridge(engine);
//!
//! // Control side: queue events and commands
//! control.send_midi(TimedMidiEvent::new(now_ms, note_on));
//! control.send(Command::ListParams);
//!
//! // Audio thread: once per period
//! engine.process_period(now_ms, &mut out);
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering},
};

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};

use crate::engine::Engine;
use crate::engine_controller::EngineController;
use crate::event::TimedMidiEvent;
use crate::state::{Command, CommandResult};

/// Handle for threads that feed the engine.
///
/// Cloneable; every clone talks to the same engine.
#[derive(Clone)]
pub struct ControlHandle {
    /// Timestamped MIDI events to the engine.
    midi_tx: Sender<TimedMidiEvent>,

    /// Control commands to the engine.
    command_tx: Sender<Command>,

    /// One result per command, in command order.
    result_rx: Receiver<CommandResult>,

    /// Shared read-back state (written by the engine).
    readback: Arc<SharedReadback>,
}

/// Handle for the audio thread containing the engine and its queues.
pub struct EngineHandle {
    /// The command processor owning the engine.
    controller: EngineController,

    midi_rx: Receiver<TimedMidiEvent>,
    command_rx: Receiver<Command>,
    result_tx: Sender<CommandResult>,

    readback: Arc<SharedReadback>,
}

/// Lock-free shared state for engine -> control read-back.
struct SharedReadback {
    periods: AtomicU64,
    active_voices: AtomicUsize,
    /// Master peak in dB stored as f32 bits (no AtomicF32 in std)
    peak_level_bits: AtomicU32,
}

impl SharedReadback {
    fn new() -> Self {
        Self {
            periods: AtomicU64::new(0),
            active_voices: AtomicUsize::new(0),
            peak_level_bits: AtomicU32::new(f32::NEG_INFINITY.to_bits()),
        }
    }
}

/// Create a linked pair of handles around `engine`.
///
/// The `EngineHandle` moves to the audio thread; the `ControlHandle` stays
/// with whoever produces MIDI and commands.
pub fn create_bridge(engine: Engine) -> (ControlHandle, EngineHandle) {
    let (midi_tx, midi_rx) = unbounded();
    let (command_tx, command_rx) = unbounded();
    let (result_tx, result_rx) = unbounded();
    let readback = Arc::new(SharedReadback::new());

    let control = ControlHandle {
        midi_tx,
        command_tx,
        result_rx,
        readback: Arc::clone(&readback),
    };

    let engine = EngineHandle {
        controller: EngineController::new(engine),
        midi_rx,
        command_rx,
        result_tx,
        readback,
    };

    (control, engine)
}

// ═══════════════════════════════════════════════════════════════════
// ControlHandle - control side API
// ═══════════════════════════════════════════════════════════════════

impl ControlHandle {
    /// Queue a MIDI event. Returns `false` once the engine is gone.
    pub fn send_midi(&self, event: TimedMidiEvent) -> bool {
        self.midi_tx.send(event).is_ok()
    }

    /// Queue a batch of MIDI events.
    pub fn send_midi_batch(&self, events: impl IntoIterator<Item = TimedMidiEvent>) -> bool {
        events.into_iter().all(|e| self.send_midi(e))
    }

    /// Queue a command. Its result arrives after the next period.
    pub fn send(&self, command: Command) -> bool {
        self.command_tx.send(command).is_ok()
    }

    /// Next command result, if one is ready.
    pub fn try_recv_result(&self) -> Option<CommandResult> {
        match self.result_rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait for the next command result. `None` once the engine is gone.
    pub fn recv_result(&self) -> Option<CommandResult> {
        self.result_rx.recv().ok()
    }

    /// Every command result ready so far.
    pub fn poll_results(&self) -> Vec<CommandResult> {
        self.result_rx.try_iter().collect()
    }

    // ───────────────────────────────────────────────────────────────
    // Read-back
    // ───────────────────────────────────────────────────────────────

    /// Periods rendered so far.
    pub fn periods(&self) -> u64 {
        self.readback.periods.load(Ordering::Relaxed)
    }

    /// Voices bound after the last period.
    pub fn active_voices(&self) -> usize {
        self.readback.active_voices.load(Ordering::Relaxed)
    }

    /// Master peak of the last period in dB.
    pub fn peak_level(&self) -> f32 {
        f32::from_bits(self.readback.peak_level_bits.load(Ordering::Relaxed))
    }
}

// ═══════════════════════════════════════════════════════════════════
// EngineHandle - audio thread API
// ═══════════════════════════════════════════════════════════════════

impl EngineHandle {
    /// Apply pending commands, schedule pending MIDI, then render one period.
    ///
    /// Call this once per period from the audio callback.
    pub fn process_period(&mut self, now_ms: i64, out: &mut [f32]) -> usize {
        self.process_commands();

        for event in self.midi_rx.try_iter() {
            self.controller.engine_mut().schedule(event);
        }

        let frames = self.controller.engine_mut().process_period(now_ms, out);
        self.sync_readback();
        frames
    }

    /// Apply every queued command and send back its result.
    pub fn process_commands(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(command) = self.command_rx.try_recv() {
            let result = self.controller.handle(&command);
            // The control side may have hung up; results are then dropped
            let _ = self.result_tx.send(result);
            handled += 1;
        }
        handled
    }

    pub fn controller(&self) -> &EngineController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut EngineController {
        &mut self.controller
    }

    pub fn engine(&self) -> &Engine {
        self.controller.engine()
    }

    fn sync_readback(&self) {
        let engine = self.controller.engine();
        self.readback.periods.fetch_add(1, Ordering::Relaxed);
        self.readback
            .active_voices
            .store(engine.active_voices(), Ordering::Relaxed);
        self.readback
            .peak_level_bits
            .store(engine.peak_level().to_bits(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::engine::EngineConfig;
    use crate::event::MidiMessage;
    use crate::instrument::Instrument;
    use crate::state::{Attributes, ModuleTemplate, SubmoduleDef};

    fn bridge() -> (ControlHandle, EngineHandle) {
        let mut builder = Builder::new();
        builder
            .define(
                ModuleTemplate::new("gate")
                    .with_output("out")
                    .with_submodule(SubmoduleDef::new("midiSource", "midi"))
                    .with_submodule(SubmoduleDef::new("constant", "level").parameter("value", "def", 0.5))
                    .with_patch("midi.velocity", "out"),
            )
            .unwrap();

        let config = EngineConfig {
            sample_rate: 1000.0,
            period_frames: 10,
            channels: 2,
        };
        let mut engine = Engine::new(config);
        let inst = Instrument::new("keys", "gate", &builder, 1000.0, 10, &Attributes::new()).unwrap();
        engine.add_instrument(inst).unwrap();
        create_bridge(engine)
    }

    #[test]
    fn test_midi_reaches_engine() {
        let (control, mut engine) = bridge();
        assert_eq!(control.peak_level(), f32::NEG_INFINITY);

        control.send_midi(TimedMidiEvent::new(
            0,
            MidiMessage::NoteOn {
                channel: 0,
                note: 60,
                velocity: 100,
            },
        ));

        let mut out = [0.0f32; 20];
        assert_eq!(engine.process_period(0, &mut out), 10);
        assert_eq!(control.periods(), 1);
        assert_eq!(control.active_voices(), 1);
        // Velocity 100 of 127
        approx::assert_abs_diff_eq!(out[0], 100.0 / 127.0);
        approx::assert_abs_diff_eq!(control.peak_level(), -2.0761, epsilon = 1e-3);
    }

    #[test]
    fn test_commands_answered_in_order() {
        let (control, mut engine) = bridge();
        control.send(Command::SetParam {
            path: "keys.level.value".into(),
            value: "0.25".into(),
        });
        control.send(Command::GetParam {
            path: "keys.level.value".into(),
        });
        control.send(Command::GetParam {
            path: "piano.level.value".into(),
        });
        assert!(control.try_recv_result().is_none());

        let mut out = [0.0f32; 20];
        engine.process_period(0, &mut out);

        let results = control.poll_results();
        assert_eq!(
            results,
            vec![
                CommandResult::Ok,
                CommandResult::text("0.250"),
                CommandResult::error("No instrument 'piano'"),
            ]
        );
    }

    #[test]
    fn test_engine_on_its_own_thread() {
        let (control, mut engine) = bridge();
        let audio = std::thread::spawn(move || {
            let mut out = [0.0f32; 20];
            for period in 0..5 {
                engine.process_period(period * 10, &mut out);
            }
            engine
        });

        let engine = audio.join().unwrap();
        assert_eq!(control.periods(), 5);
        assert_eq!(engine.engine().active_voices(), 0);

        drop(engine);
        assert!(!control.send(Command::ListParams));
        assert!(control.recv_result().is_none());
    }
}

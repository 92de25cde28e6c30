// src/lib.rs
//
// Library entry point.
//
// A module graph is built from templates, prepared for a sample rate and
// period size, then pulled once per period through its output ports.
// Instruments run one graph per voice; the engine mixes instruments and
// the bridge connects it to control threads.

pub mod arena;
pub mod audio_buffer;
pub mod bridge;
pub mod builder;
pub mod convert;
pub mod dot;
pub mod engine;
pub mod engine_controller;
pub mod error;
pub mod event;
pub mod graph;
pub mod instrument;
pub mod node;
pub mod node_factory;
pub mod nodes;
pub mod parameter;
pub mod port;
pub mod scheduler;
pub mod state;
pub mod voice;

// Re-export key types for Rust consumers
pub use audio_buffer::AudioBuffer;
pub use bridge::{ControlHandle, EngineHandle, create_bridge};
pub use builder::Builder;
pub use engine::{Engine, EngineConfig};
pub use engine_controller::EngineController;
pub use error::{BuildError, ParameterError, ProcessingError, SnapshotError};
pub use event::{MidiEvent, MidiMessage, TimedMidiEvent};
pub use graph::{Graph, ModuleId, PortId};
pub use instrument::{Instrument, InstrumentConfig};
pub use node::{MidiListener, Node, NodeSpec, ProcessContext};
pub use node_factory::{NodeFactory, NodeRegistry, SimpleNodeFactory};
pub use nodes::register_builtin_nodes;
pub use parameter::{ParamValue, Parameter, ParameterValues};
pub use state::{Attributes, Command, CommandResult, ModuleTemplate, SubmoduleDef};
pub use voice::Voice;

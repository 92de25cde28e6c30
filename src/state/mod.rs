// src/state/mod.rs
//
// Declarative state.
//
// Structures here describe what to build or persist: module attributes,
// module templates, parameter snapshots, and control commands. None of
// them are touched while a period renders.

mod attributes;
mod command;
mod module_def;
mod snapshot;

pub use attributes::*;
pub use command::*;
pub use module_def::*;
pub use snapshot::*;

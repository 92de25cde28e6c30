// src/nodes/mod.rs
//
// Built-in leaf module types.

mod biquad;
mod envelope;
mod filters;
mod midi;
mod oscillators;
mod sampler;
mod utility;
mod waveform;

pub use biquad::*;
pub use envelope::*;
pub use filters::*;
pub use midi::*;
pub use oscillators::*;
pub use sampler::*;
pub use utility::*;
pub use waveform::*;

use crate::node_factory::{NodeRegistry, SimpleNodeFactory};

// ═══════════════════════════════════════════════════════════════════
// Type names
// ═══════════════════════════════════════════════════════════════════

pub mod node_types {
    pub const CONSTANT: &str = "constant";
    pub const NOISE: &str = "noise";
    pub const VCO: &str = "vco";
    pub const SAMPLER: &str = "sampler";
    pub const MIDI_SOURCE: &str = "midiSource";
    pub const MIDI_CONTROLLER: &str = "midiController";

    pub const ENVELOPE: &str = "envelope";
    pub const ADSR: &str = "adsr";
    pub const VGA: &str = "vga";
    pub const VCF: &str = "vcf";
    pub const ADDER: &str = "adder";
    pub const MULTIPLIER: &str = "multiplier";
    pub const MIXER: &str = "mixer";
    pub const SOFT_CLIPPER: &str = "softClipper";
}

// ═══════════════════════════════════════════════════════════════════
// Registry Population
// ═══════════════════════════════════════════════════════════════════

/// Populate the registry with all built-in node types.
pub fn register_builtin_nodes(registry: &mut NodeRegistry) {
    register_sources(registry);
    register_processors(registry);
}

fn register_sources(registry: &mut NodeRegistry) {
    registry.register(node_types::CONSTANT, SimpleNodeFactory::new(Constant::spec));
    registry.register(node_types::NOISE, SimpleNodeFactory::new(Noise::spec));
    registry.register(node_types::VCO, SimpleNodeFactory::new(Vco::spec));
    registry.register(node_types::SAMPLER, SimpleNodeFactory::new(Sampler::spec));
    registry.register(node_types::MIDI_SOURCE, SimpleNodeFactory::new(MidiSource::spec));
    registry.register(node_types::MIDI_CONTROLLER, SimpleNodeFactory::new(MidiController::spec));
}

fn register_processors(registry: &mut NodeRegistry) {
    registry.register(node_types::ENVELOPE, SimpleNodeFactory::new(Envelope::spec));
    registry.register(node_types::ADSR, SimpleNodeFactory::new(Adsr::spec));
    registry.register(node_types::VGA, SimpleNodeFactory::new(Vga::spec));
    registry.register(node_types::VCF, SimpleNodeFactory::new(Vcf::spec));
    registry.register(node_types::ADDER, SimpleNodeFactory::new(Adder::spec));
    registry.register(node_types::MULTIPLIER, SimpleNodeFactory::new(Multiplier::spec));
    registry.register(node_types::MIXER, SimpleNodeFactory::new(Mixer::spec));
    registry.register(node_types::SOFT_CLIPPER, SimpleNodeFactory::new(SoftClipper::spec));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Attributes;

    #[test]
    fn test_builtin_types_registered() {
        let mut registry = NodeRegistry::new();
        register_builtin_nodes(&mut registry);
        assert_eq!(registry.type_names().count(), 14);

        // Every type except sampler builds from empty attributes
        for name in registry.type_names().filter(|n| *n != node_types::SAMPLER) {
            let factory = registry.get(name).unwrap();
            let result = factory.create(&Attributes::new());
            match name {
                node_types::ENVELOPE => assert!(result.is_err()),
                _ => assert!(result.is_ok(), "{name} failed to build"),
            }
        }
    }
}

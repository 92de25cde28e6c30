// src/nodes/utility.rs
//
// Constants, arithmetic, gain and shaping nodes.

use crate::convert::log2lin;
use crate::error::{BuildResult, ProcessingResult};
use crate::node::{Node, NodeSpec, ProcessContext};
use crate::parameter::{Parameter, ParameterSet};
use crate::state::Attributes;

/// Input names `in0..inN` plus one per-input parameter name each.
fn indexed_names(attributes: &Attributes, param_prefix: &str) -> BuildResult<(Vec<String>, Vec<String>)> {
    let count: usize = attributes.parsed("numInputs", 2)?;
    let inputs = (0..count).map(|i| format!("in{i}")).collect();
    let params = (0..count).map(|i| format!("{param_prefix}{i}")).collect();
    Ok((inputs, params))
}

/// Lock the per-input parameters whose input is unconnected.
fn lock_unconnected(names: &[String], connected: &[bool], params: &mut ParameterSet) {
    for (name, &is_connected) in names.iter().zip(connected) {
        if !is_connected {
            params.lock(name);
        }
    }
}

/// Refresh cached per-input values from the parameter set.
fn read_values(names: &[String], params: &ParameterSet, values: &mut [f32], convert: fn(f32) -> f32) {
    for (v, name) in values.iter_mut().zip(names) {
        *v = convert(params.number(name));
    }
}

fn identity(x: f32) -> f32 {
    x
}

// ═══════════════════════════════════════════════════════════════════
// Constant
// ═══════════════════════════════════════════════════════════════════

pub struct Constant;

impl Constant {
    pub fn spec(_attributes: &Attributes) -> BuildResult<NodeSpec> {
        Ok(NodeSpec::new(Constant)
            .with_output("out")
            .with_param("value", Parameter::new_number(0.0, 0.0, 1.0, 0.01).describe("Value")))
    }
}

impl Node for Constant {
    fn process(&mut self, ctx: &mut ProcessContext) -> ProcessingResult<()> {
        let value = ctx.params.number("value");
        ctx.output(0).fill(value);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════
// Adder
// ═══════════════════════════════════════════════════════════════════

/// out = bias + Σ in_i * gain_i
pub struct Adder {
    gain_names: Vec<String>,
    gains: Vec<f32>,
    bias: f32,
}

impl Adder {
    pub fn spec(attributes: &Attributes) -> BuildResult<NodeSpec> {
        let (inputs, gain_names) = indexed_names(attributes, "gain")?;
        let node = Adder {
            gains: vec![1.0; gain_names.len()],
            gain_names: gain_names.clone(),
            bias: 0.0,
        };

        let mut spec = NodeSpec::new(node)
            .with_output("out")
            .with_param("bias", Parameter::new_number(0.0, -1.0, 1.0, 0.01).describe("Bias"));
        for (input, gain) in inputs.into_iter().zip(gain_names) {
            let description = format!("Gain of {input}");
            spec = spec
                .with_input(input, 0.0)
                .with_param(gain, Parameter::new_number(1.0, 0.0, 1.0, 0.01).describe(description));
        }
        Ok(spec)
    }
}

impl Node for Adder {
    fn connections_resolved(&mut self, connected: &[bool], params: &mut ParameterSet) {
        lock_unconnected(&self.gain_names, connected, params);
    }

    fn parameters_changed(&mut self, params: &ParameterSet) {
        self.bias = params.number("bias");
        read_values(&self.gain_names, params, &mut self.gains, identity);
    }

    fn process(&mut self, ctx: &mut ProcessContext) -> ProcessingResult<()> {
        let inputs: smallvec::SmallVec<[&[f32]; 8]> = (0..ctx.num_inputs()).map(|i| ctx.input(i)).collect();
        for (n, out) in ctx.output(0).iter_mut().enumerate() {
            *out = self.bias
                + inputs
                    .iter()
                    .zip(&self.gains)
                    .map(|(input, gain)| input[n] * gain)
                    .sum::<f32>();
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════
// Multiplier
// ═══════════════════════════════════════════════════════════════════

/// out = gain * Π (in_i + bias_i)
pub struct Multiplier {
    bias_names: Vec<String>,
    biases: Vec<f32>,
    gain: f32,
}

impl Multiplier {
    pub fn spec(attributes: &Attributes) -> BuildResult<NodeSpec> {
        let (inputs, bias_names) = indexed_names(attributes, "bias")?;
        let node = Multiplier {
            biases: vec![0.0; bias_names.len()],
            bias_names: bias_names.clone(),
            gain: 1.0,
        };

        let mut spec = NodeSpec::new(node)
            .with_output("out")
            .with_param("gain", Parameter::new_number(1.0, 0.0, 1.0, 0.01).describe("Gain"));
        for (input, bias) in inputs.into_iter().zip(bias_names) {
            let description = format!("Bias of {input}");
            spec = spec
                .with_input(input, 0.0)
                .with_param(bias, Parameter::new_number(0.0, -1.0, 1.0, 0.01).describe(description));
        }
        Ok(spec)
    }
}

impl Node for Multiplier {
    fn connections_resolved(&mut self, connected: &[bool], params: &mut ParameterSet) {
        lock_unconnected(&self.bias_names, connected, params);
    }

    fn parameters_changed(&mut self, params: &ParameterSet) {
        self.gain = params.number("gain");
        read_values(&self.bias_names, params, &mut self.biases, identity);
    }

    fn process(&mut self, ctx: &mut ProcessContext) -> ProcessingResult<()> {
        let inputs: smallvec::SmallVec<[&[f32]; 8]> = (0..ctx.num_inputs()).map(|i| ctx.input(i)).collect();
        for (n, out) in ctx.output(0).iter_mut().enumerate() {
            *out = self.gain
                * inputs
                    .iter()
                    .zip(&self.biases)
                    .map(|(input, bias)| input[n] + bias)
                    .product::<f32>();
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════
// Mixer
// ═══════════════════════════════════════════════════════════════════

/// out = Σ in_i * 10^(gain_i / 20)
pub struct Mixer {
    gain_names: Vec<String>,
    gains: Vec<f32>,
}

impl Mixer {
    pub fn spec(attributes: &Attributes) -> BuildResult<NodeSpec> {
        let (inputs, gain_names) = indexed_names(attributes, "gain")?;
        let node = Mixer {
            gains: vec![1.0; gain_names.len()],
            gain_names: gain_names.clone(),
        };

        let mut spec = NodeSpec::new(node).with_output("out");
        for (input, gain) in inputs.into_iter().zip(gain_names) {
            let description = format!("Gain of {input} [dB]");
            spec = spec
                .with_input(input, 0.0)
                .with_param(gain, Parameter::new_number(0.0, -24.0, 12.0, 0.1).describe(description));
        }
        Ok(spec)
    }
}

impl Node for Mixer {
    fn connections_resolved(&mut self, connected: &[bool], params: &mut ParameterSet) {
        lock_unconnected(&self.gain_names, connected, params);
    }

    fn parameters_changed(&mut self, params: &ParameterSet) {
        read_values(&self.gain_names, params, &mut self.gains, log2lin);
    }

    fn process(&mut self, ctx: &mut ProcessContext) -> ProcessingResult<()> {
        let inputs: smallvec::SmallVec<[&[f32]; 8]> = (0..ctx.num_inputs()).map(|i| ctx.input(i)).collect();
        for (n, out) in ctx.output(0).iter_mut().enumerate() {
            *out = inputs
                .iter()
                .zip(&self.gains)
                .map(|(input, gain)| input[n] * gain)
                .sum::<f32>();
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════
// VGA
// ═══════════════════════════════════════════════════════════════════

/// Voltage-controlled amplifier with a dB gain input.
pub struct Vga {
    cutoff: f32,
}

impl Vga {
    pub fn spec(attributes: &Attributes) -> BuildResult<NodeSpec> {
        let cutoff = log2lin(attributes.number("cutoff", -96.0)?);
        Ok(NodeSpec::new(Vga { cutoff })
            .with_input("in", 0.0)
            .with_input("gain", 0.0)
            .with_output("out"))
    }
}

impl Node for Vga {
    fn process(&mut self, ctx: &mut ProcessContext) -> ProcessingResult<()> {
        let (input, gain) = (ctx.input(0), ctx.input(1));
        for ((out, &x), &g) in ctx.output(0).iter_mut().zip(input).zip(gain) {
            let k = log2lin(g);
            *out = if k <= self.cutoff { 0.0 } else { x * k };
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════
// Soft clipper
// ═══════════════════════════════════════════════════════════════════

/// Cubic soft saturation towards a dB clipping level.
pub struct SoftClipper;

impl SoftClipper {
    pub fn spec(_attributes: &Attributes) -> BuildResult<NodeSpec> {
        Ok(NodeSpec::new(SoftClipper)
            .with_input("in", 0.0)
            .with_input("level", 0.0)
            .with_output("out"))
    }

    #[inline]
    pub fn clip(x: f32, level: f32) -> f32 {
        let k = 1.5 * level;
        if x < -k {
            -level
        } else if x > k {
            level
        } else {
            let r = x / k;
            x - (k / 3.0) * r * r * r
        }
    }
}

impl Node for SoftClipper {
    fn process(&mut self, ctx: &mut ProcessContext) -> ProcessingResult<()> {
        let (input, level) = (ctx.input(0), ctx.input(1));
        for ((out, &x), &l) in ctx.output(0).iter_mut().zip(input).zip(level) {
            *out = Self::clip(x, log2lin(l));
        }
        Ok(())
    }
}

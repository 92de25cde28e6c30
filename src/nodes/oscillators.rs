// src/nodes/oscillators.rs
//
// Signal sources: the waveform VCO and white noise.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::convert::{cv_to_frequency, log2lin};
use crate::error::{BuildResult, ProcessingError, ProcessingResult};
use crate::node::{Node, NodeSpec, ProcessContext};
use crate::parameter::{Parameter, ParameterSet};
use crate::state::Attributes;

use super::waveform::Waveform;

/// Amplitude / modulation-index parameters shared with the sampler.
pub(crate) fn modulated_source_params(spec: NodeSpec) -> NodeSpec {
    spec.with_param("amplitude", Parameter::new_number(-6.0, -30.0, 0.0, 0.1).describe("Amplitude [dB]"))
        .with_param("amGain", Parameter::new_number(0.5, 0.0, 1.0, 0.05).describe("AM modulation index"))
        .with_param("fmGain", Parameter::new_number(0.1, 0.0, 1.0, 0.05).describe("FM modulation index"))
}

/// Lock `amGain` / `fmGain` when `am` / `fm` (inputs 1 and 2) are unconnected.
pub(crate) fn lock_modulation_gains(connected: &[bool], params: &mut ParameterSet) {
    if connected.get(1) == Some(&false) {
        params.lock("amGain");
    }
    if connected.get(2) == Some(&false) {
        params.lock("fmGain");
    }
}

#[inline]
fn wrap_phase(phi: f32) -> f32 {
    let wrapped = phi.rem_euclid(1.0);
    // rem_euclid can round up to exactly 1.0 for tiny negative inputs
    if wrapped >= 1.0 { 0.0 } else { wrapped }
}

// ═══════════════════════════════════════════════════════════════════
// VCO
// ═══════════════════════════════════════════════════════════════════

/// CV-controlled oscillator with AM, FM and pulse-width inputs.
pub struct Vco {
    phase: f32,
}

impl Vco {
    pub fn new() -> Self {
        Self { phase: 0.0 }
    }

    pub fn spec(_attributes: &Attributes) -> BuildResult<NodeSpec> {
        let semitone = 1.0 / 12.0;
        let spec = NodeSpec::new(Self::new())
            .with_input("cv", 0.0)
            .with_input("am", 0.0)
            .with_input("fm", 0.0)
            .with_input("pwm", 0.5)
            .with_output("out")
            .with_param("waveform", Parameter::choice(&Waveform::NAMES, 0).describe("Waveform"))
            .with_param("phase", Parameter::new_number(0.0, -180.0, 180.0, 1.0).describe("Phase [deg]"))
            .with_param("detune", Parameter::new_number(0.0, -semitone, semitone, 0.001).describe("Detune"));
        Ok(modulated_source_params(spec))
    }
}

impl Default for Vco {
    fn default() -> Self {
        Self::new()
    }
}

impl Node for Vco {
    fn connections_resolved(&mut self, connected: &[bool], params: &mut ParameterSet) {
        lock_modulation_gains(connected, params);
    }

    fn start(&mut self) {
        self.phase = 0.0;
    }

    fn process(&mut self, ctx: &mut ProcessContext) -> ProcessingResult<()> {
        let index = ctx.params.index("waveform");
        let wave = Waveform::from_index(index).ok_or(ProcessingError::InvalidWaveform(index))?;

        let amplitude = log2lin(ctx.params.number("amplitude"));
        let phase_offset = ctx.params.number("phase") / 360.0;
        let detune = ctx.params.number("detune");
        let alpha = ctx.params.number("amGain");
        let beta = ctx.params.number("fmGain");
        let k = 1.0 / ctx.sample_rate;

        let (cv, am, fm, pwm) = (ctx.input(0), ctx.input(1), ctx.input(2), ctx.input(3));
        let mut phi = wrap_phase(self.phase + phase_offset);

        for (i, out) in ctx.output(0).iter_mut().enumerate() {
            let a = amplitude * (1.0 + alpha * am[i]);
            let f = cv_to_frequency(cv[i] + detune) * (1.0 + beta * fm[i]);
            *out = a * wave.sample(phi, pwm[i]);
            phi = wrap_phase(phi + f * k);
        }

        self.phase = wrap_phase(phi - phase_offset);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════
// Noise
// ═══════════════════════════════════════════════════════════════════

const DEFAULT_SEED: u64 = 5489;

/// Uniform white noise.
pub struct Noise {
    seed: i64,
    rng: StdRng,
}

impl Noise {
    /// `seed` < 0 seeds from entropy on every start, 0 uses a fixed default.
    pub fn new(seed: i64) -> Self {
        Self {
            seed,
            rng: Self::make_rng(seed),
        }
    }

    fn make_rng(seed: i64) -> StdRng {
        match seed {
            0 => StdRng::seed_from_u64(DEFAULT_SEED),
            s if s < 0 => StdRng::from_entropy(),
            s => StdRng::seed_from_u64(s as u64),
        }
    }

    pub fn spec(attributes: &Attributes) -> BuildResult<NodeSpec> {
        let seed = attributes.parsed("seed", 0i64)?;
        Ok(NodeSpec::new(Self::new(seed))
            .with_output("out")
            .with_param("amplitude", Parameter::new_number(-6.0, -30.0, 0.0, 0.1).describe("Amplitude [dB]")))
    }
}

impl Node for Noise {
    fn start(&mut self) {
        self.rng = Self::make_rng(self.seed);
    }

    fn process(&mut self, ctx: &mut ProcessContext) -> ProcessingResult<()> {
        let amplitude = log2lin(ctx.params.number("amplitude"));
        let rng = &mut self.rng;
        for out in ctx.output(0).iter_mut() {
            *out = amplitude * rng.gen_range(-1.0f32..1.0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::ParamValue;
    use approx::assert_abs_diff_eq;

    fn run(node: &mut dyn Node, params: &ParameterSet, inputs: &[&[f32]], frames: usize) -> Vec<f32> {
        let mut outputs = vec![vec![0.0; frames]];
        let mut ctx = ProcessContext::new(frames, 48_000.0, params, inputs, &mut outputs);
        node.process(&mut ctx).unwrap();
        outputs.remove(0)
    }

    #[test]
    fn test_vco_square_at_a4() {
        let mut spec = Vco::spec(&Attributes::new()).unwrap();
        spec.parameters.get_mut("waveform").unwrap().set(&ParamValue::from("square")).unwrap();
        spec.parameters.get_mut("amplitude").unwrap().set(&ParamValue::Number(0.0)).unwrap();

        // cv 4 = 440 Hz, 48 kHz: period of ~109 samples
        let frames = 200;
        let cv = vec![4.0; frames];
        let zero = vec![0.0; frames];
        let pwm = vec![0.5; frames];
        let inputs = [cv.as_slice(), zero.as_slice(), zero.as_slice(), pwm.as_slice()];
        let out = run(spec.node.as_mut(), &spec.parameters, &inputs, frames);

        assert_eq!(out[0], 1.0);
        assert_eq!(out[60], -1.0);
        assert_eq!(out[115], 1.0);
        let rising = out.windows(2).filter(|w| w[0] < 0.0 && w[1] > 0.0).count();
        assert_eq!(rising, 1);
    }

    #[test]
    fn test_vco_phase_continuity_across_blocks() {
        let spec = Vco::spec(&Attributes::new()).unwrap();
        let mut a = spec.node;
        let mut b = Vco::spec(&Attributes::new()).unwrap().node;
        let params = spec.parameters;

        let cv = vec![3.5; 128];
        let zero = vec![0.0; 128];
        let pwm = vec![0.5; 128];
        let whole = run(b.as_mut(), &params, &[&cv[..], &zero[..], &zero[..], &pwm[..]], 128);
        let half = [&cv[..64], &zero[..64], &zero[..64], &pwm[..64]];
        let mut halves = run(a.as_mut(), &params, &half, 64);
        halves.extend(run(a.as_mut(), &params, &half, 64));
        for (x, y) in whole.iter().zip(&halves) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_vco_locks_unconnected_modulation() {
        let mut spec = Vco::spec(&Attributes::new()).unwrap();
        spec.node.connections_resolved(&[true, false, true, false], &mut spec.parameters);
        assert!(spec.parameters.get("amGain").unwrap().is_locked());
        assert!(!spec.parameters.get("fmGain").unwrap().is_locked());
    }

    #[test]
    fn test_noise_is_seeded_and_bounded() {
        let attrs = Attributes::new().with("seed", 42);
        let mut a = Noise::spec(&attrs).unwrap();
        let mut b = Noise::spec(&attrs).unwrap();
        a.node.start();
        b.node.start();
        let x = run(a.node.as_mut(), &a.parameters, &[], 256);
        let y = run(b.node.as_mut(), &b.parameters, &[], 256);
        assert_eq!(x, y);

        let amplitude = log2lin(-6.0);
        assert!(x.iter().all(|s| s.abs() <= amplitude));
        assert!(x.iter().any(|&s| s != x[0]));
    }
}

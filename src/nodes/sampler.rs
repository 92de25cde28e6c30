// src/nodes/sampler.rs
//
// Single-cycle / looped sample playback with cubic interpolation.

use std::path::Path;

use crate::convert::{cv_to_frequency, log2lin, note_to_frequency};
use crate::error::{BuildError, BuildResult, ProcessingResult};
use crate::node::{Node, NodeSpec, ProcessContext};
use crate::parameter::ParameterSet;
use crate::state::Attributes;

use super::oscillators::{lock_modulation_gains, modulated_source_params};

/// Wrapped samples stored before and after the waveform for interpolation.
const MARGIN: usize = 2;

// ═══════════════════════════════════════════════════════════════════
// Waveform table
// ═══════════════════════════════════════════════════════════════════

/// A mono waveform padded with wrapped margins on both ends.
#[derive(Debug, Clone)]
pub struct SampleTable {
    data: Vec<f32>,
    sample_rate: u32,
}

impl SampleTable {
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Option<Self> {
        let n = samples.len();
        if n == 0 {
            return None;
        }
        let data = (0..n + 2 * MARGIN)
            .map(|i| samples[(i + n * MARGIN - MARGIN) % n])
            .collect();
        Some(Self { data, sample_rate })
    }

    /// Load a mono WAV file.
    pub fn load(path: &Path) -> BuildResult<Self> {
        let fail = |reason: String| BuildError::SampleLoad {
            path: path.display().to_string(),
            reason,
        };

        let reader = hound::WavReader::open(path).map_err(|e| fail(e.to_string()))?;
        let spec = reader.spec();
        if spec.channels != 1 {
            return Err(fail(format!("{} channels, only mono is supported", spec.channels)));
        }

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| fail(e.to_string()))?,
            hound::SampleFormat::Int => {
                let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / max_val))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| fail(e.to_string()))?
            }
        };

        Self::from_samples(&samples, spec.sample_rate).ok_or_else(|| fail("file contains no samples".to_string()))
    }

    /// Number of samples, excluding margins.
    pub fn len(&self) -> usize {
        self.data.len() - 2 * MARGIN
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Cubic interpolation at normalised position `phi` in [0, 1).
    #[inline]
    pub fn sample(&self, phi: f32) -> f32 {
        let pos = phi * self.len() as f32;
        let i = (pos.floor() as usize).min(self.len() - 1);
        let f = pos - i as f32;

        let p = &self.data[MARGIN + i - 1..MARGIN + i + 3];
        let f2 = f * f;
        let fd6 = f / 6.0;
        let fd2 = f / 2.0;
        p[1] + p[0] * fd6 * (-f2 + 3.0 * f - 2.0)
            + p[1] * fd2 * (f2 - 2.0 * f - 1.0)
            + p[2] * fd2 * (-f2 + f + 2.0)
            + p[3] * fd6 * (f2 - 1.0)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Sampler
// ═══════════════════════════════════════════════════════════════════

pub struct Sampler {
    table: SampleTable,
    base_frequency: f32,
    phase: f32,
}

impl Sampler {
    pub fn new(table: SampleTable, base_frequency: f32) -> Self {
        Self {
            table,
            base_frequency,
            phase: 0.0,
        }
    }

    pub fn spec(attributes: &Attributes) -> BuildResult<NodeSpec> {
        let file = attributes.require("sampler", "file")?;
        let note = attributes.get_or("note", "C4");
        let base_frequency = note_to_frequency(note).ok_or_else(|| BuildError::InvalidAttribute {
            attribute: "note".to_string(),
            value: note.to_string(),
        })?;
        let table = SampleTable::load(Path::new(file))?;

        let spec = NodeSpec::new(Self::new(table, base_frequency))
            .with_input("cv", 0.0)
            .with_input("am", 0.0)
            .with_input("fm", 0.0)
            .with_output("out");
        Ok(modulated_source_params(spec))
    }
}

impl Node for Sampler {
    fn connections_resolved(&mut self, connected: &[bool], params: &mut ParameterSet) {
        lock_modulation_gains(connected, params);
    }

    fn start(&mut self) {
        self.phase = 0.0;
    }

    fn process(&mut self, ctx: &mut ProcessContext) -> ProcessingResult<()> {
        let k = 1.0 / (ctx.sample_rate * self.base_frequency * self.table.len() as f32);
        let amplitude = log2lin(ctx.params.number("amplitude"));
        let alpha = ctx.params.number("amGain");
        let beta = ctx.params.number("fmGain");
        let (cv, am, fm) = (ctx.input(0), ctx.input(1), ctx.input(2));

        let mut phi = self.phase;
        for (i, out) in ctx.output(0).iter_mut().enumerate() {
            let a = amplitude * (1.0 + alpha * am[i]);
            let f = cv_to_frequency(cv[i]) * (1.0 + beta * fm[i]);
            *out = a * self.table.sample(phi);
            phi = (phi + f * k).rem_euclid(1.0);
        }
        self.phase = phi;
        Ok(())
    }
}

// src/nodes/filters.rs
//
// Voltage-controlled filter.

use crate::convert::cv_to_frequency;
use crate::error::{BuildResult, ProcessingError, ProcessingResult};
use crate::node::{Node, NodeSpec, ProcessContext};
use crate::parameter::Parameter;
use crate::state::Attributes;

use super::biquad::{BiquadIir, Coeffs, FilterType};

const Q_MIN: f32 = 0.1;
const Q_MAX: f32 = 20.0;

/// Control values the current coefficients were computed from.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ControlState {
    kind: FilterType,
    cv: f32,
    gain: f32,
    q: f32,
}

pub struct Vcf {
    filter: BiquadIir,
    sample_rate: f32,
    state: Option<ControlState>,
}

impl Vcf {
    pub fn new() -> Self {
        Self {
            filter: BiquadIir::default(),
            sample_rate: 48_000.0,
            state: None,
        }
    }

    pub fn spec(_attributes: &Attributes) -> BuildResult<NodeSpec> {
        Ok(NodeSpec::new(Self::new())
            .with_input("in", 0.0)
            .with_input("freq", 0.0)
            .with_input("gain", 0.0)
            .with_input("q", 1.0)
            .with_output("out")
            .with_param("bypass", Parameter::choice(&["off", "on"], 0).describe("Bypass"))
            .with_param("type", Parameter::choice(&FilterType::NAMES, 0).describe("Filter type")))
    }

    fn reset(&mut self) {
        self.state = None;
        self.filter.reset();
    }
}

impl Default for Vcf {
    fn default() -> Self {
        Self::new()
    }
}

impl Node for Vcf {
    fn prepare(&mut self, sample_rate: f32, _frames: usize) {
        self.sample_rate = sample_rate;
        self.state = None;
    }

    fn start(&mut self) {
        self.reset();
    }

    fn process(&mut self, ctx: &mut ProcessContext) -> ProcessingResult<()> {
        let input = ctx.input(0);

        if ctx.params.index("bypass") == 1 {
            self.reset();
            let out = ctx.output(0);
            out.copy_from_slice(&input[..out.len()]);
            return Ok(());
        }

        let index = ctx.params.index("type");
        let kind = FilterType::from_index(index).ok_or(ProcessingError::InvalidFilterType(index))?;
        let (freq, gain, q) = (ctx.input(1), ctx.input(2), ctx.input(3));

        for (i, out) in ctx.output(0).iter_mut().enumerate() {
            let control = ControlState {
                kind,
                cv: freq[i],
                gain: gain[i],
                q: q[i],
            };
            if self.state != Some(control) {
                let f0 = cv_to_frequency(control.cv);
                let q = control.q.clamp(Q_MIN, Q_MAX);
                self.filter
                    .set_coeffs(Coeffs::design(kind, f0, control.gain, q, self.sample_rate));
                self.state = Some(control);
            }
            *out = self.filter.process(input[i]);
        }
        Ok(())
    }
}

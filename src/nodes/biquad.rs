// src/nodes/biquad.rs
//
// Two-pole/two-zero IIR section with audio EQ cookbook coefficient designs.

use std::f32::consts::TAU;

use crate::convert::log2lin;

/// Supported responses, in `vcf` choice-index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    LowPass,
    HighPass,
    BandPass,
    Notch,
    AllPass,
    Peaking,
    LowShelf,
    HighShelf,
}

impl FilterType {
    pub const ALL: [FilterType; 8] = [
        FilterType::LowPass,
        FilterType::HighPass,
        FilterType::BandPass,
        FilterType::Notch,
        FilterType::AllPass,
        FilterType::Peaking,
        FilterType::LowShelf,
        FilterType::HighShelf,
    ];

    pub const NAMES: [&'static str; 8] = ["lpf", "hpf", "bpf", "notch", "apf", "peaking", "lowShelf", "highShelf"];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// Raw (unnormalised) coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coeffs {
    pub a0: f32,
    pub a1: f32,
    pub a2: f32,
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
}

impl Coeffs {
    /// Pass-through.
    pub const IDENTITY: Coeffs = Coeffs {
        a0: 1.0,
        a1: 0.0,
        a2: 0.0,
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
    };

    /// Design a filter at `f0` Hz. `gain_db` only affects peaking and shelving types.
    pub fn design(kind: FilterType, f0: f32, gain_db: f32, q: f32, fs: f32) -> Coeffs {
        let w = TAU * f0 / fs;
        let (sinw, cosw) = w.sin_cos();
        let alpha = sinw / (2.0 * q);
        let a = log2lin(gain_db * 0.5);

        // Shared denominator of the non-shelving designs
        let (a0, a1, a2) = (1.0 + alpha, -2.0 * cosw, 1.0 - alpha);

        match kind {
            FilterType::LowPass => Coeffs {
                b0: (1.0 - cosw) / 2.0,
                b1: 1.0 - cosw,
                b2: (1.0 - cosw) / 2.0,
                a0,
                a1,
                a2,
            },
            FilterType::HighPass => Coeffs {
                b0: (1.0 + cosw) / 2.0,
                b1: -(1.0 + cosw),
                b2: (1.0 + cosw) / 2.0,
                a0,
                a1,
                a2,
            },
            FilterType::BandPass => Coeffs {
                b0: alpha,
                b1: 0.0,
                b2: -alpha,
                a0,
                a1,
                a2,
            },
            FilterType::Notch => Coeffs {
                b0: 1.0,
                b1: -2.0 * cosw,
                b2: 1.0,
                a0,
                a1,
                a2,
            },
            FilterType::AllPass => Coeffs {
                b0: 1.0 - alpha,
                b1: -2.0 * cosw,
                b2: 1.0 + alpha,
                a0,
                a1,
                a2,
            },
            FilterType::Peaking => Coeffs {
                b0: 1.0 + alpha * a,
                b1: -2.0 * cosw,
                b2: 1.0 - alpha * a,
                a0: 1.0 + alpha / a,
                a1: -2.0 * cosw,
                a2: 1.0 - alpha / a,
            },
            FilterType::LowShelf => {
                let bs = a.sqrt() / q * sinw;
                Coeffs {
                    b0: a * ((a + 1.0) - (a - 1.0) * cosw + bs),
                    b1: 2.0 * a * ((a - 1.0) - (a + 1.0) * cosw),
                    b2: a * ((a + 1.0) - (a - 1.0) * cosw - bs),
                    a0: (a + 1.0) + (a - 1.0) * cosw + bs,
                    a1: -2.0 * ((a - 1.0) + (a + 1.0) * cosw),
                    a2: (a + 1.0) + (a - 1.0) * cosw - bs,
                }
            }
            FilterType::HighShelf => {
                let bs = a.sqrt() / q * sinw;
                Coeffs {
                    b0: a * ((a + 1.0) + (a - 1.0) * cosw + bs),
                    b1: -2.0 * a * ((a - 1.0) + (a + 1.0) * cosw),
                    b2: a * ((a + 1.0) + (a - 1.0) * cosw - bs),
                    a0: (a + 1.0) - (a - 1.0) * cosw + bs,
                    a1: 2.0 * ((a - 1.0) - (a + 1.0) * cosw),
                    a2: (a + 1.0) - (a - 1.0) * cosw - bs,
                }
            }
        }
    }

    /// Divide through by `a0`.
    fn normalized(self) -> Coeffs {
        let k = 1.0 / self.a0;
        Coeffs {
            a0: 1.0,
            a1: self.a1 * k,
            a2: self.a2 * k,
            b0: self.b0 * k,
            b1: self.b1 * k,
            b2: self.b2 * k,
        }
    }
}

/// Transposed direct form II biquad section.
#[derive(Debug, Clone)]
pub struct BiquadIir {
    coeffs: Coeffs,
    s1: f32,
    s2: f32,
}

impl Default for BiquadIir {
    fn default() -> Self {
        Self::new(Coeffs::IDENTITY)
    }
}

impl BiquadIir {
    pub fn new(coeffs: Coeffs) -> Self {
        Self {
            coeffs: coeffs.normalized(),
            s1: 0.0,
            s2: 0.0,
        }
    }

    pub fn set_coeffs(&mut self, coeffs: Coeffs) {
        self.coeffs = coeffs.normalized();
    }

    pub fn coeffs(&self) -> &Coeffs {
        &self.coeffs
    }

    pub fn reset(&mut self) {
        self.s1 = 0.0;
        self.s2 = 0.0;
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let c = &self.coeffs;
        let y = c.b0 * x + self.s1;
        self.s1 = c.b1 * x - c.a1 * y + self.s2;
        self.s2 = c.b2 * x - c.a2 * y;
        y
    }

    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        for (o, &x) in output.iter_mut().zip(input) {
            *o = self.process(x);
        }
    }
}

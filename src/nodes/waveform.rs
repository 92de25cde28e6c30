// src/nodes/waveform.rs
//
// Single-cycle waveform shapes over a normalised phase in [0, 1).

use std::f32::consts::TAU;

/// Waveforms selectable on the `vco`, in choice-index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    HalfSine,
    AbsSine,
    PulseSine,
    EvenSine,
    EvenAbsSine,
    Square,
    DerivedSquare,
    Triangle,
    Sawtooth,
}

impl Waveform {
    pub const ALL: [Waveform; 10] = [
        Waveform::Sine,
        Waveform::HalfSine,
        Waveform::AbsSine,
        Waveform::PulseSine,
        Waveform::EvenSine,
        Waveform::EvenAbsSine,
        Waveform::Square,
        Waveform::DerivedSquare,
        Waveform::Triangle,
        Waveform::Sawtooth,
    ];

    pub const NAMES: [&'static str; 10] = [
        "sine",
        "half_sine",
        "abs_sine",
        "pulse_sine",
        "even_sine",
        "even_abs_sine",
        "square",
        "derived_square",
        "triangle",
        "sawtooth",
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        Self::NAMES[self as usize]
    }

    /// Value at phase `x`. `arg` is the pulse width / symmetry control.
    #[inline]
    pub fn sample(self, x: f32, arg: f32) -> f32 {
        match self {
            Waveform::Sine => (x * TAU).sin(),
            Waveform::HalfSine => {
                if x < 0.5 {
                    (x * TAU).sin()
                } else {
                    0.0
                }
            }
            Waveform::AbsSine => (x * TAU).sin().abs(),
            Waveform::PulseSine => {
                let x = if x > 0.5 { x - 0.5 } else { x };
                if x < 0.25 { (x * TAU).sin() } else { 0.0 }
            }
            Waveform::EvenSine => {
                if x < 0.5 {
                    (2.0 * x * TAU).sin()
                } else {
                    0.0
                }
            }
            Waveform::EvenAbsSine => {
                if x < 0.5 {
                    (2.0 * x * TAU).sin().abs()
                } else {
                    0.0
                }
            }
            Waveform::Square => {
                if x < arg {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::DerivedSquare => {
                let g = 20.0 - 10.0 * arg;
                if x < 0.5 {
                    -(-2.0 * x * g).exp()
                } else {
                    (-2.0 * (1.0 - x) * g).exp()
                }
            }
            Waveform::Triangle => {
                if x < arg {
                    let w = x / arg;
                    2.0 * w - 1.0
                } else {
                    let w = (x - arg) / (1.0 - arg);
                    1.0 - 2.0 * w
                }
            }
            Waveform::Sawtooth => 2.0 * (x - 0.5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_index_order_matches_names() {
        for (i, name) in Waveform::NAMES.iter().enumerate() {
            assert_eq!(Waveform::from_index(i).unwrap().name(), *name);
        }
        assert_eq!(Waveform::from_index(10), None);
    }

    #[test]
    fn test_shapes() {
        assert_abs_diff_eq!(Waveform::Sine.sample(0.25, 0.5), 1.0, epsilon = 1e-6);
        assert_eq!(Waveform::HalfSine.sample(0.75, 0.5), 0.0);
        assert_abs_diff_eq!(Waveform::AbsSine.sample(0.75, 0.5), 1.0, epsilon = 1e-6);
        assert_eq!(Waveform::Square.sample(0.2, 0.25), 1.0);
        assert_eq!(Waveform::Square.sample(0.3, 0.25), -1.0);
        assert_abs_diff_eq!(Waveform::Triangle.sample(0.0, 0.5), -1.0);
        assert_abs_diff_eq!(Waveform::Triangle.sample(0.5, 0.5), 1.0);
        assert_abs_diff_eq!(Waveform::Triangle.sample(0.75, 0.5), 0.0);
        assert_abs_diff_eq!(Waveform::Sawtooth.sample(0.0, 0.5), -1.0);
        assert_abs_diff_eq!(Waveform::DerivedSquare.sample(0.0, 0.5), -1.0);
    }

    #[test]
    fn test_bounded_over_cycle() {
        for w in Waveform::ALL {
            for i in 0..1000 {
                let x = i as f32 / 1000.0;
                let y = w.sample(x, 0.5);
                assert!((-1.0..=1.0).contains(&y), "{} at {x} = {y}", w.name());
            }
        }
    }
}

// src/parameter.rs
//
// Runtime-tunable module state.
//
// A parameter is either a stepped number inside a range or a choice from a
// fixed list. Values only ever land on the step grid inside the range, and
// locked parameters reject external writes.

use std::collections::BTreeMap;

use crate::convert;
use crate::error::{ParameterError, ParameterResult};
use crate::state::Attributes;

/// A value addressed to a parameter.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ParamValue {
    /// A number, or a choice index when integral.
    Number(f32),
    /// A choice name.
    Text(String),
    /// A choice name paired with its expected index.
    Indexed(usize, String),
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        ParamValue::Number(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

/// Path-addressed values for a bulk update.
pub type ParameterValues = BTreeMap<String, ParamValue>;

/// The value domain of a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    Number { min: f32, max: f32, step: f32 },
    Choice { choices: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    kind: ParamKind,
    /// Current value; the index for a choice.
    value: f32,
    default: f32,
    locked: bool,
    description: String,
}

#[inline]
fn snap(v: f32, step: f32) -> f32 {
    (v / step).round() * step
}

/// Grid index at or below `v`, tolerant of float noise just under a grid point.
#[inline]
fn grid_floor(v: f32, step: f32) -> f32 {
    let k = v / step;
    if (k - k.round()).abs() < 1e-4 {
        k.round() * step
    } else {
        k.floor() * step
    }
}

/// Grid index at or above `v`, tolerant of float noise just over a grid point.
#[inline]
fn grid_ceil(v: f32, step: f32) -> f32 {
    let k = v / step;
    if (k - k.round()).abs() < 1e-4 {
        k.round() * step
    } else {
        k.ceil() * step
    }
}

impl Parameter {
    /// A stepped number. Bounds widen outward onto the grid and the
    /// default is snapped onto it.
    pub fn new_number(default: f32, min: f32, max: f32, step: f32) -> Self {
        let step = if step > 0.0 { step } else { f32::EPSILON };
        let (min, max) = (grid_floor(min, step), grid_ceil(max, step));
        let default = snap(default, step).clamp(min, max);
        Self {
            kind: ParamKind::Number { min, max, step },
            value: default,
            default,
            locked: false,
            description: String::new(),
        }
    }

    /// A choice between named options; `default` indexes into `choices`.
    pub fn choice(choices: &[&str], default: usize) -> Self {
        let default = default.min(choices.len().saturating_sub(1)) as f32;
        Self {
            kind: ParamKind::Choice {
                choices: choices.iter().map(|c| c.to_string()).collect(),
            },
            value: default,
            default,
            locked: false,
            description: String::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[inline]
    pub fn kind(&self) -> &ParamKind {
        &self.kind
    }

    #[inline]
    pub fn is_choice(&self) -> bool {
        matches!(self.kind, ParamKind::Choice { .. })
    }

    /// Current numeric value (the index for a choice).
    #[inline]
    pub fn number(&self) -> f32 {
        self.value
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.value.max(0.0) as usize
    }

    pub fn default_value(&self) -> f32 {
        self.default
    }

    pub fn choice_name(&self) -> Option<&str> {
        match &self.kind {
            ParamKind::Choice { choices } => choices.get(self.index()).map(String::as_str),
            ParamKind::Number { .. } => None,
        }
    }

    pub fn choices(&self) -> &[String] {
        match &self.kind {
            ParamKind::Choice { choices } => choices,
            ParamKind::Number { .. } => &[],
        }
    }

    pub fn min(&self) -> f32 {
        match &self.kind {
            ParamKind::Number { min, .. } => *min,
            ParamKind::Choice { .. } => 0.0,
        }
    }

    pub fn max(&self) -> f32 {
        match &self.kind {
            ParamKind::Number { max, .. } => *max,
            ParamKind::Choice { choices } => choices.len().saturating_sub(1) as f32,
        }
    }

    pub fn step(&self) -> f32 {
        match &self.kind {
            ParamKind::Number { step, .. } => *step,
            ParamKind::Choice { .. } => 1.0,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    /// Display form: `%.3f` for numbers, `name(index)` for choices.
    pub fn format_value(&self) -> String {
        match self.choice_name() {
            Some(name) => format!("{}({})", name, self.index()),
            None => format!("{:.3}", self.value),
        }
    }

    /// Restore the default value.
    pub fn reset(&mut self) {
        self.value = self.default;
    }

    /// Store a value previously returned by [`Parameter::resolve`].
    pub(crate) fn assign(&mut self, resolved: f32) {
        self.value = resolved;
    }

    /// External write. Rejected while locked.
    pub fn set(&mut self, value: &ParamValue) -> ParameterResult<()> {
        if self.locked {
            return Err(ParameterError::Locked(self.description.clone()));
        }
        self.value = self.resolve(value)?;
        Ok(())
    }

    /// Validate `value` and return what would be stored, without storing it.
    pub fn resolve(&self, value: &ParamValue) -> ParameterResult<f32> {
        match (&self.kind, value) {
            (ParamKind::Number { min, max, step }, ParamValue::Number(v)) => {
                if !(*min..=*max).contains(v) {
                    return Err(ParameterError::OutOfRange {
                        value: *v,
                        min: *min,
                        max: *max,
                    });
                }
                Ok(snap(*v, *step).clamp(*min, *max))
            }
            (ParamKind::Number { .. }, _) => Err(ParameterError::WrongKind { expected: "number" }),

            (ParamKind::Choice { choices }, ParamValue::Text(name)) => choices
                .iter()
                .position(|c| c == name)
                .map(|i| i as f32)
                .ok_or_else(|| ParameterError::InvalidChoice(name.clone())),

            (ParamKind::Choice { choices }, ParamValue::Indexed(index, name)) => {
                let pos = choices
                    .iter()
                    .position(|c| c == name)
                    .ok_or_else(|| ParameterError::InvalidChoice(name.clone()))?;
                if pos != *index {
                    return Err(ParameterError::ChoiceIndexMismatch {
                        index: *index,
                        name: name.clone(),
                    });
                }
                Ok(pos as f32)
            }

            (ParamKind::Choice { choices }, ParamValue::Number(v)) => {
                if v.fract() == 0.0 && *v >= 0.0 && (*v as usize) < choices.len() {
                    Ok(*v)
                } else {
                    Err(ParameterError::InvalidChoice(format!("{v}")))
                }
            }
        }
    }

    fn bounds_mut(&mut self, what: &str) -> ParameterResult<(&mut f32, &mut f32, &mut f32)> {
        match &mut self.kind {
            ParamKind::Number { min, max, step } => Ok((min, max, step)),
            ParamKind::Choice { .. } => Err(ParameterError::NotANumber(what.to_string())),
        }
    }

    /// Lower bound, floored onto the grid. Raises max, value and default as needed.
    pub fn set_min(&mut self, v: f32) -> ParameterResult<()> {
        let (min, max, step) = self.bounds_mut("min")?;
        let v = grid_floor(v, *step);
        *min = v;
        if *max < v {
            *max = v;
        }
        self.value = self.value.max(v);
        self.default = self.default.max(v);
        Ok(())
    }

    /// Upper bound, ceiled onto the grid. Lowers min, value and default as needed.
    pub fn set_max(&mut self, v: f32) -> ParameterResult<()> {
        let (min, max, step) = self.bounds_mut("max")?;
        let v = grid_ceil(v, *step);
        *max = v;
        if *min > v {
            *min = v;
        }
        self.value = self.value.min(v);
        self.default = self.default.min(v);
        Ok(())
    }

    /// Change the grid; bounds widen outward, value and default re-round.
    pub fn set_step(&mut self, s: f32) -> ParameterResult<()> {
        if !(s > 0.0 && s.is_finite()) {
            if self.is_choice() {
                return Err(ParameterError::NotANumber("step".to_string()));
            }
            return Err(ParameterError::InvalidStep(s));
        }
        let (min, max, step) = self.bounds_mut("step")?;
        *step = s;
        *min = grid_floor(*min, s);
        *max = grid_ceil(*max, s);
        let (lo, hi) = (*min, *max);
        self.value = snap(self.value, s).clamp(lo, hi);
        self.default = snap(self.default, s).clamp(lo, hi);
        Ok(())
    }

    /// Override the default (and current) value, widening the bounds to fit.
    fn override_default(&mut self, raw: &str) -> ParameterResult<()> {
        let value = match &self.kind {
            ParamKind::Choice { .. } => self.resolve(&ParamValue::Text(raw.to_string()))?,
            ParamKind::Number { min, max, .. } => {
                let (min, max) = (*min, *max);
                let v = convert::parse_number(raw).ok_or_else(|| ParameterError::MalformedOverride {
                    key: "def".to_string(),
                    value: raw.to_string(),
                })?;
                if v < min {
                    self.set_min(v)?;
                }
                if v > max {
                    self.set_max(v)?;
                }
                self.resolve(&ParamValue::Number(v))?
            }
        };
        self.value = value;
        self.default = value;
        Ok(())
    }
}

/// Override keywords recognised in `<param>.<keyword>` attributes.
const OVERRIDE_KEYWORDS: [&str; 5] = ["step", "min", "max", "def", "locked"];

/// A module's named parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    params: BTreeMap<String, Parameter>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, param: Parameter) {
        let name = name.into();
        let param = if param.description.is_empty() {
            param.describe(name.clone())
        } else {
            param
        };
        self.params.insert(name, param);
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.get(name)
    }

    #[inline]
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.get_mut(name)
    }

    /// Numeric value of a parameter the module itself declared.
    #[inline]
    pub fn number(&self, name: &str) -> f32 {
        self.params.get(name).map_or(0.0, Parameter::number)
    }

    #[inline]
    pub fn index(&self, name: &str) -> usize {
        self.params.get(name).map_or(0, Parameter::index)
    }

    pub fn lock(&mut self, name: &str) {
        if let Some(p) = self.params.get_mut(name) {
            p.set_locked(true);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Parameter)> {
        self.params.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    /// Reset every unlocked parameter to its default.
    pub fn reset_unlocked(&mut self) {
        for p in self.params.values_mut().filter(|p| !p.is_locked()) {
            p.reset();
        }
    }

    /// Apply `<param>.<keyword>` attribute overrides.
    ///
    /// `lockParameters` (non-zero) locks everything before the per-parameter
    /// `locked` keywords are applied.
    pub fn apply_overrides(&mut self, attributes: &Attributes) -> ParameterResult<()> {
        let lock_all = attributes.get_or("lockParameters", "0").trim();
        if lock_all.parse::<i64>().map_err(|_| ParameterError::MalformedOverride {
            key: "lockParameters".to_string(),
            value: lock_all.to_string(),
        })? != 0
        {
            for p in self.params.values_mut() {
                p.set_locked(true);
            }
        }

        for (key, raw) in attributes.iter() {
            let Some((name, keyword)) = key.rsplit_once('.') else {
                continue;
            };
            if !OVERRIDE_KEYWORDS.contains(&keyword) {
                continue;
            }
            let param = self
                .params
                .get_mut(name)
                .ok_or_else(|| ParameterError::UnknownParameter(name.to_string()))?;

            let malformed = || ParameterError::MalformedOverride {
                key: key.to_string(),
                value: raw.to_string(),
            };
            match keyword {
                "def" => param.override_default(raw)?,
                "locked" => {
                    let flag: i64 = raw.trim().parse().map_err(|_| malformed())?;
                    param.set_locked(flag != 0);
                }
                bound => {
                    if param.is_choice() {
                        return Err(ParameterError::NotANumber(name.to_string()));
                    }
                    let v = convert::parse_number(raw).ok_or_else(malformed)?;
                    match bound {
                        "min" => param.set_min(v)?,
                        "max" => param.set_max(v)?,
                        _ => param.set_step(v)?,
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn waveform() -> Parameter {
        Parameter::choice(&["sine", "square", "sawtooth"], 0)
    }

    #[test]
    fn test_number_rounds_to_step() {
        let mut p = Parameter::new_number(0.0, -1.0, 1.0, 0.25);
        p.set(&ParamValue::Number(0.3)).unwrap();
        assert_relative_eq!(p.number(), 0.25);
        p.set(&ParamValue::Number(0.375)).unwrap();
        assert_relative_eq!(p.number(), 0.5);
        p.set(&ParamValue::Number(-0.375)).unwrap();
        assert_relative_eq!(p.number(), -0.5);
    }

    #[test]
    fn test_number_out_of_range_is_error() {
        let mut p = Parameter::new_number(0.5, 0.0, 1.0, 0.05);
        let err = p.set(&ParamValue::Number(1.5)).unwrap_err();
        assert!(matches!(err, ParameterError::OutOfRange { .. }));
        assert_relative_eq!(p.number(), 0.5);
    }

    #[test]
    fn test_locked_rejects_set() {
        let mut p = Parameter::new_number(0.5, 0.0, 1.0, 0.05);
        p.set_locked(true);
        assert!(matches!(
            p.set(&ParamValue::Number(0.1)),
            Err(ParameterError::Locked(_))
        ));
    }

    #[test]
    fn test_choice_by_name_and_index() {
        let mut p = waveform();
        p.set(&"square".into()).unwrap();
        assert_eq!(p.index(), 1);
        assert_eq!(p.format_value(), "square(1)");

        p.set(&ParamValue::Indexed(2, "sawtooth".into())).unwrap();
        assert_eq!(p.choice_name(), Some("sawtooth"));

        assert!(matches!(
            p.set(&ParamValue::Indexed(0, "square".into())),
            Err(ParameterError::ChoiceIndexMismatch { .. })
        ));
        assert!(matches!(
            p.set(&"noise".into()),
            Err(ParameterError::InvalidChoice(_))
        ));
        p.set(&ParamValue::Number(0.0)).unwrap();
        assert_eq!(p.choice_name(), Some("sine"));
    }

    #[test]
    fn test_choice_rejects_bounds() {
        let mut p = waveform();
        assert!(p.set_min(0.0).is_err());
        assert!(p.set_max(1.0).is_err());
        assert!(p.set_step(1.0).is_err());
    }

    #[test]
    fn test_set_min_drags_value_and_default() {
        let mut p = Parameter::new_number(0.0, -1.0, 1.0, 0.1);
        p.set_min(0.47).unwrap();
        assert_relative_eq!(p.min(), 0.4, epsilon = 1e-6);
        assert_relative_eq!(p.number(), 0.4, epsilon = 1e-6);
        assert_relative_eq!(p.default_value(), 0.4, epsilon = 1e-6);

        p.set_min(2.0).unwrap();
        assert_relative_eq!(p.max(), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_set_max_and_step() {
        let mut p = Parameter::new_number(0.8, 0.0, 1.0, 0.1);
        p.set_max(0.52).unwrap();
        assert_relative_eq!(p.max(), 0.6, epsilon = 1e-6);
        assert_relative_eq!(p.number(), 0.6, epsilon = 1e-6);

        p.set_step(0.25).unwrap();
        assert_relative_eq!(p.max(), 0.75, epsilon = 1e-6);
        assert_relative_eq!(p.number(), 0.5, epsilon = 1e-6);
        assert!(p.set_step(0.0).is_err());
    }

    #[test]
    fn test_overrides() {
        let mut set = ParameterSet::new();
        set.insert("amplitude", Parameter::new_number(-6.0, -30.0, 0.0, 0.1));
        set.insert("waveform", waveform());
        set.insert("detune", Parameter::new_number(0.0, -0.1, 0.1, 0.001));

        let attrs = Attributes::new()
            .with("lockParameters", "1")
            .with("amplitude.def", "6")
            .with("amplitude.locked", "0")
            .with("waveform.def", "sawtooth")
            .with("point0", "0,0")
            .with("detune.note", "ignored");
        set.apply_overrides(&attrs).unwrap();

        let amp = set.get("amplitude").unwrap();
        assert!(!amp.is_locked());
        assert_relative_eq!(amp.max(), 6.0, epsilon = 1e-5);
        assert_relative_eq!(amp.number(), 6.0, epsilon = 1e-5);
        assert!(set.get("waveform").unwrap().is_locked());
        assert_eq!(set.get("waveform").unwrap().choice_name(), Some("sawtooth"));
        assert!(set.get("detune").unwrap().is_locked());
    }

    #[test]
    fn test_override_errors() {
        let mut set = ParameterSet::new();
        set.insert("waveform", waveform());

        let unknown = Attributes::new().with("gain.def", "1");
        assert!(matches!(
            set.apply_overrides(&unknown),
            Err(ParameterError::UnknownParameter(_))
        ));

        let bound_on_choice = Attributes::new().with("waveform.min", "1");
        assert!(matches!(
            set.apply_overrides(&bound_on_choice),
            Err(ParameterError::NotANumber(_))
        ));
    }

    #[test]
    fn test_reset_unlocked() {
        let mut set = ParameterSet::new();
        set.insert("a", Parameter::new_number(0.5, 0.0, 1.0, 0.1));
        set.insert("b", Parameter::new_number(0.5, 0.0, 1.0, 0.1));
        set.get_mut("a").unwrap().set(&ParamValue::Number(0.9)).unwrap();
        set.get_mut("b").unwrap().set(&ParamValue::Number(0.9)).unwrap();
        set.lock("b");
        set.reset_unlocked();
        assert_relative_eq!(set.number("a"), 0.5);
        assert_relative_eq!(set.number("b"), 0.9, epsilon = 1e-6);
    }

    #[test]
    fn test_unaligned_bounds_widen_onto_grid() {
        let mut p = Parameter::new_number(0.0, -5.0, 5.0, 0.03);
        assert_relative_eq!(p.min(), -5.01, epsilon = 1e-5);
        assert_relative_eq!(p.max(), 5.01, epsilon = 1e-5);

        p.set(&ParamValue::Number(-4.999)).unwrap();
        assert_relative_eq!(p.number(), -5.01, epsilon = 1e-5);
        let k = (p.number() / 0.03).round();
        assert!((k * 0.03 - p.number()).abs() < 1e-5);

        p.set(&ParamValue::Number(4.999)).unwrap();
        assert_relative_eq!(p.number(), 5.01, epsilon = 1e-5);
    }

    proptest! {
        #[test]
        fn prop_value_stays_on_grid(
            step_k in 1u32..50,
            values in proptest::collection::vec(-10.0f32..10.0, 1..20),
        ) {
            let step = step_k as f32 * 0.01;
            let mut p = Parameter::new_number(0.0, -5.0, 5.0, step);
            for v in values {
                let _ = p.set(&ParamValue::Number(v));
                let value = p.number();
                prop_assert!(value >= p.min() && value <= p.max());
                let k = ((value - p.default_value()) / step).round();
                prop_assert!((p.default_value() + k * step - value).abs() < 1e-4);
            }
        }
    }
}

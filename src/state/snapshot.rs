// src/state/snapshot.rs
//
// Text format for persisted parameter values.
//
// One `instrument.path=value` line per unlocked parameter. Choices are
// stored by name, numbers with three decimals. Lines addressed to other
// instruments are skipped on load.

use std::collections::BTreeMap;

use crate::parameter::{ParamValue, Parameter, ParameterValues};

/// Render the unlocked parameters of one instrument, sorted by path.
pub fn format_snapshot(instrument: &str, parameters: &BTreeMap<String, Parameter>) -> String {
    let mut text = String::new();
    for (path, param) in parameters.iter().filter(|(_, p)| !p.is_locked()) {
        let value = match param.choice_name() {
            Some(name) => name.to_string(),
            None => param.format_value(),
        };
        text.push_str(&format!("{instrument}.{path}={value}\n"));
    }
    text
}

/// Why a snapshot line was not used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkippedLine {
    /// No `=` separator.
    Malformed(String),
    /// No `instrument.` prefix on the parameter name.
    InvalidName(String),
    /// Addressed to another instrument.
    OtherInstrument(String),
}

/// Parsed snapshot lines for one instrument.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Snapshot {
    pub values: ParameterValues,
    pub skipped: Vec<SkippedLine>,
}

/// Collect the values addressed to `instrument`.
///
/// Numeric values become numbers, anything else a choice name. Bad lines
/// are reported in `skipped` and do not stop the parse.
pub fn parse_snapshot(instrument: &str, text: &str) -> Snapshot {
    let mut snapshot = Snapshot::default();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some((name, value)) = line.split_once('=') else {
            snapshot.skipped.push(SkippedLine::Malformed(line.to_string()));
            continue;
        };
        let Some((target, path)) = name.split_once('.') else {
            snapshot.skipped.push(SkippedLine::InvalidName(name.to_string()));
            continue;
        };
        if target != instrument {
            snapshot.skipped.push(SkippedLine::OtherInstrument(line.to_string()));
            continue;
        }

        let value = match value.trim().parse::<f32>() {
            Ok(number) => ParamValue::Number(number),
            Err(_) => ParamValue::Text(value.trim().to_string()),
        };
        snapshot.values.insert(path.to_string(), value);
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> BTreeMap<String, Parameter> {
        let mut locked = Parameter::new_number(0.5, 0.0, 1.0, 0.1);
        locked.set_locked(true);
        BTreeMap::from([
            ("vco.amplitude".to_string(), Parameter::new_number(-6.0, -30.0, 0.0, 0.1)),
            ("vco.waveform".to_string(), Parameter::choice(&["sine", "square"], 1)),
            ("vco.amGain".to_string(), locked),
        ])
    }

    #[test]
    fn test_format_skips_locked() {
        let text = format_snapshot("lead", &params());
        assert_eq!(text, "lead.vco.amplitude=-6.000\nlead.vco.waveform=square\n");
    }

    #[test]
    fn test_parse_filters_and_reports() {
        let text = "lead.vco.amplitude=-12.000\n\
                    \n\
                    bass.vco.amplitude=-3\n\
                    garbage\n\
                    noinstrument=1\n\
                    lead.vco.waveform= sine \n";
        let snapshot = parse_snapshot("lead", text);

        assert_eq!(snapshot.values.len(), 2);
        assert_eq!(snapshot.values["vco.amplitude"], ParamValue::Number(-12.0));
        assert_eq!(snapshot.values["vco.waveform"], ParamValue::Text("sine".to_string()));
        assert_eq!(
            snapshot.skipped,
            vec![
                SkippedLine::OtherInstrument("bass.vco.amplitude=-3".to_string()),
                SkippedLine::Malformed("garbage".to_string()),
                SkippedLine::InvalidName("noinstrument".to_string()),
            ]
        );
    }
}

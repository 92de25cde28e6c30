// src/convert.rs
//
// Pitch, level and number conversions shared by the module library.

use std::sync::OnceLock;

use regex::Regex;

/// Frequency of CV 0 (A0).
pub const CV_BASE_FREQUENCY: f32 = 27.5;

/// MIDI note number of CV 0.
pub const CV_BASE_NOTE: u8 = 21;

/// Control voltage to frequency, one unit per octave above A0.
#[inline]
pub fn cv_to_frequency(cv: f32) -> f32 {
    CV_BASE_FREQUENCY * cv.exp2()
}

#[inline]
pub fn note_to_cv(note: u8) -> f32 {
    (note as f32 - CV_BASE_NOTE as f32) / 12.0
}

/// Decibels to linear gain.
#[inline]
pub fn log2lin(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Linear magnitude to decibels; zero maps to negative infinity.
#[inline]
pub fn lin2log(x: f32) -> f32 {
    if x == 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * x.abs().log10()
    }
}

fn note_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-G])(#|b)?([0-9])$").ok())
        .as_ref()
}

/// Parse a note name (`C4`, `F#2`, `Bb0`) into a MIDI note number.
pub fn note_to_index(name: &str) -> Option<u8> {
    let caps = note_regex()?.captures(name.trim())?;

    let semitone: i32 = match &caps[1] {
        "C" => 0,
        "D" => 2,
        "E" => 4,
        "F" => 5,
        "G" => 7,
        "A" => 9,
        "B" => 11,
        _ => return None,
    };
    let accidental = match caps.get(2).map(|m| m.as_str()) {
        Some("#") => 1,
        Some("b") => -1,
        _ => 0,
    };
    let octave: i32 = caps[3].parse().ok()?;

    let index = semitone + accidental + 12 + octave * 12;
    u8::try_from(index).ok().filter(|n| *n <= 127)
}

/// Frequency of a named note.
pub fn note_to_frequency(name: &str) -> Option<f32> {
    note_to_index(name).map(|n| cv_to_frequency(note_to_cv(n)))
}

/// Parse a float, or a `num/den` fraction.
pub fn parse_number(text: &str) -> Option<f32> {
    let text = text.trim();
    match text.split_once('/') {
        Some((num, den)) => {
            let num: f32 = num.trim().parse().ok()?;
            let den: f32 = den.trim().parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => text.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cv_and_notes() {
        assert_relative_eq!(cv_to_frequency(0.0), 27.5);
        assert_relative_eq!(cv_to_frequency(4.0), 440.0, epsilon = 1e-3);
        assert_relative_eq!(note_to_cv(69), 4.0);
        assert_relative_eq!(note_to_cv(21), 0.0);
    }

    #[test]
    fn test_note_names() {
        assert_eq!(note_to_index("A0"), Some(21));
        assert_eq!(note_to_index("C4"), Some(60));
        assert_eq!(note_to_index("C#4"), Some(61));
        assert_eq!(note_to_index("Db4"), Some(61));
        assert_eq!(note_to_index("A4"), Some(69));
        assert_eq!(note_to_index("H4"), None);
        assert_eq!(note_to_index("C10"), None);
        assert_relative_eq!(note_to_frequency("A4").unwrap(), 440.0, epsilon = 1e-3);
    }

    #[test]
    fn test_levels() {
        assert_relative_eq!(log2lin(0.0), 1.0);
        assert_relative_eq!(log2lin(-20.0), 0.1, epsilon = 1e-6);
        assert_relative_eq!(lin2log(0.1), -20.0, epsilon = 1e-4);
        assert_eq!(lin2log(0.0), f32::NEG_INFINITY);
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("0.5"), Some(0.5));
        assert_eq!(parse_number(" 1/12 "), Some(1.0 / 12.0));
        assert_eq!(parse_number("1/0"), None);
        assert_eq!(parse_number("abc"), None);
    }
}

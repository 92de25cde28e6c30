// src/state/attributes.rs
//
// String-keyed, build-time configuration of a module or instrument.

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::convert;
use crate::error::BuildError;

/// Immutable attribute map handed to a module when it is built.
///
/// Keys are kept sorted so iteration (and therefore override application)
/// is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Attributes {
    entries: BTreeMap<String, String>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.entries.insert(key.into(), value.to_string());
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Entries addressed to a submodule, with the `<prefix>.` stripped.
    pub fn scoped(&self, prefix: &str) -> Attributes {
        let lead = format!("{prefix}.");
        let entries = self
            .entries
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(&lead).map(|rest| (rest.to_string(), v.clone())))
            .collect();
        Attributes { entries }
    }

    /// Overlay `other` on top of `self`; keys from `other` win.
    pub fn merged(mut self, other: &Attributes) -> Attributes {
        for (k, v) in &other.entries {
            self.entries.insert(k.clone(), v.clone());
        }
        self
    }

    /// Parse an attribute as a number, accepting `num/den` fractions.
    pub fn number(&self, key: &str, default: f32) -> Result<f32, BuildError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => convert::parse_number(raw).ok_or_else(|| invalid(key, raw)),
        }
    }

    /// Parse an attribute with `FromStr` (integers, mostly).
    pub fn parsed<T: FromStr>(&self, key: &str, default: T) -> Result<T, BuildError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| invalid(key, raw)),
        }
    }

    /// Parse an attribute holding a note name such as `C4` or `F#2`.
    pub fn note(&self, key: &str, default: u8) -> Result<u8, BuildError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => convert::note_to_index(raw).ok_or_else(|| invalid(key, raw)),
        }
    }

    /// Fetch a mandatory attribute.
    pub fn require(&self, module: &str, key: &str) -> Result<&str, BuildError> {
        self.get(key).ok_or_else(|| BuildError::MissingAttribute {
            module: module.to_string(),
            attribute: key.to_string(),
        })
    }
}

fn invalid(key: &str, value: &str) -> BuildError {
    BuildError::InvalidAttribute {
        attribute: key.to_string(),
        value: value.to_string(),
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attrs = Attributes::new();
        for (k, v) in iter {
            attrs.insert(k, v);
        }
        attrs
    }
}

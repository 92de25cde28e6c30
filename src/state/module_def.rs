// src/state/module_def.rs
//
// Declarative composite module definitions.
//
// A template is the "document" form of a composite module type: the builder
// instantiates it into a live module tree.

use super::Attributes;

/// One child module declared inside a template.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubmoduleDef {
    pub type_name: String,
    pub name: String,
    pub attributes: Attributes,
}

impl SubmoduleDef {
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            name: name.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.attributes.insert(key, value);
        self
    }

    /// Add a `<name>.<keyword>` parameter override.
    pub fn parameter(self, name: &str, keyword: &str, value: impl ToString) -> Self {
        self.with_attribute(format!("{name}.{keyword}"), value)
    }
}

/// A point-to-point connection between two port specifications.
///
/// A specification is either `port` (a port of the composite itself) or
/// `module.port` (a port of one of its submodules).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Patch {
    pub from: String,
    pub to: String,
}

impl Patch {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// A user-defined composite module type.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModuleTemplate {
    pub type_name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub submodules: Vec<SubmoduleDef>,
    pub patches: Vec<Patch>,
}

impl ModuleTemplate {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    pub fn with_input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(name.into());
        self
    }

    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    pub fn with_submodule(mut self, submodule: SubmoduleDef) -> Self {
        self.submodules.push(submodule);
        self
    }

    pub fn with_patch(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.patches.push(Patch::new(from, to));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_builder() {
        let t = ModuleTemplate::new("voice")
            .with_output("out")
            .with_submodule(SubmoduleDef::new("vco", "osc").parameter("amplitude", "def", -12))
            .with_patch("osc.out", "out");

        assert_eq!(t.outputs, vec!["out".to_string()]);
        assert_eq!(t.submodules[0].attributes.get("amplitude.def"), Some("-12"));
        assert_eq!(t.patches[0], Patch::new("osc.out", "out"));
    }
}

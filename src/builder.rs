// src/builder.rs
//
// Instantiates module trees from registered leaf types and composite templates.

use std::collections::BTreeMap;

use log::debug;

use crate::error::{BuildError, BuildResult};
use crate::graph::{Graph, ModuleId, ModuleKind, PortId};
use crate::node_factory::{NodeFactory, NodeRegistry};
use crate::nodes::register_builtin_nodes;
use crate::parameter::ParameterSet;
use crate::port::Direction;
use crate::state::{Attributes, ModuleTemplate};

const LOG_TARGET: &str = "builder";

/// Module type catalogue: built-in leaf nodes plus user-defined composites.
pub struct Builder {
    registry: NodeRegistry,
    templates: BTreeMap<String, ModuleTemplate>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    /// A builder knowing every built-in module type.
    pub fn new() -> Self {
        let mut registry = NodeRegistry::new();
        register_builtin_nodes(&mut registry);
        Self::with_registry(registry)
    }

    pub fn with_registry(registry: NodeRegistry) -> Self {
        Self {
            registry,
            templates: BTreeMap::new(),
        }
    }

    /// Register an additional leaf type.
    pub fn register(&mut self, type_name: &str, factory: impl NodeFactory + 'static) -> BuildResult<()> {
        if self.templates.contains_key(type_name) || !self.registry.register(type_name, factory) {
            return Err(BuildError::DuplicateModuleType(type_name.to_string()));
        }
        Ok(())
    }

    /// Add a composite module type.
    pub fn define(&mut self, template: ModuleTemplate) -> BuildResult<()> {
        if self.has_type(&template.type_name) {
            return Err(BuildError::DuplicateModuleType(template.type_name));
        }
        self.templates.insert(template.type_name.clone(), template);
        Ok(())
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.registry.contains(type_name) || self.templates.contains_key(type_name)
    }

    pub fn template(&self, type_name: &str) -> Option<&ModuleTemplate> {
        self.templates.get(type_name)
    }

    /// Every known type name, sorted.
    pub fn module_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .registry
            .type_names()
            .map(str::to_string)
            .chain(self.templates.keys().cloned())
            .collect();
        types.sort();
        types
    }

    pub fn build(&self, type_name: &str, name: &str) -> BuildResult<Graph> {
        self.build_with(type_name, name, &Attributes::new())
    }

    /// Instantiate `type_name` as the root of a new graph.
    ///
    /// Attributes prefixed `<submodule>.` are handed down to that submodule
    /// with the prefix stripped, overriding the template's own entries.
    pub fn build_with(&self, type_name: &str, name: &str, attributes: &Attributes) -> BuildResult<Graph> {
        let mut graph = Graph::new();
        let mut stack = Vec::new();
        self.instantiate(&mut graph, None, type_name, name, attributes.clone(), &mut stack)?;
        Ok(graph)
    }

    fn instantiate(
        &self,
        graph: &mut Graph,
        parent: Option<ModuleId>,
        type_name: &str,
        name: &str,
        attributes: Attributes,
        stack: &mut Vec<String>,
    ) -> BuildResult<ModuleId> {
        if let Some(template) = self.templates.get(type_name) {
            if stack.iter().any(|t| t == type_name) {
                return Err(BuildError::RecursiveModuleType(type_name.to_string()));
            }
            stack.push(type_name.to_string());
            let id = self.instantiate_composite(graph, parent, template, name, attributes, stack)?;
            stack.pop();
            return Ok(id);
        }

        let factory = self
            .registry
            .get(type_name)
            .ok_or_else(|| BuildError::UnknownModuleType(type_name.to_string()))?;
        let spec = factory.create(&attributes)?;

        let mut parameters = spec.parameters;
        parameters
            .apply_overrides(&attributes)
            .map_err(|source| BuildError::Parameter {
                module: name.to_string(),
                source,
            })?;

        let id = graph.add_module(parent, type_name, name, attributes, parameters, ModuleKind::Leaf(Some(spec.node)))?;
        for input in &spec.inputs {
            graph.add_port(id, &input.name, Direction::Input, Some(input.default))?;
        }
        for output in &spec.outputs {
            graph.add_port(id, output, Direction::Output, None)?;
        }
        graph.notify_parameters(id);

        debug!(target: LOG_TARGET, "built {} '{}'", type_name, graph.full_name(id));
        Ok(id)
    }

    fn instantiate_composite(
        &self,
        graph: &mut Graph,
        parent: Option<ModuleId>,
        template: &ModuleTemplate,
        name: &str,
        attributes: Attributes,
        stack: &mut Vec<String>,
    ) -> BuildResult<ModuleId> {
        let id = graph.add_module(
            parent,
            template.type_name.as_str(),
            name,
            attributes.clone(),
            ParameterSet::new(),
            ModuleKind::Composite,
        )?;
        for input in &template.inputs {
            graph.add_port(id, input, Direction::Input, Some(0.0))?;
        }
        for output in &template.outputs {
            graph.add_port(id, output, Direction::Output, Some(0.0))?;
        }

        for sub in &template.submodules {
            let child_attributes = sub.attributes.clone().merged(&attributes.scoped(&sub.name));
            self.instantiate(graph, Some(id), &sub.type_name, &sub.name, child_attributes, stack)?;
        }

        for patch in &template.patches {
            let src = Self::resolve_port_spec(graph, id, &patch.from)?;
            let dst = Self::resolve_port_spec(graph, id, &patch.to)?;
            graph.connect(id, src, dst)?;
        }

        debug!(
            target: LOG_TARGET,
            "built {} '{}' with {} submodules",
            template.type_name,
            graph.full_name(id),
            template.submodules.len()
        );
        Ok(id)
    }

    /// Resolve `port` or `module.port` relative to `module`.
    fn resolve_port_spec(graph: &Graph, module: ModuleId, spec: &str) -> BuildResult<PortId> {
        let (owner, port) = match spec.split_once('.') {
            None => (module, spec),
            Some((_, rest)) if rest.contains('.') => {
                return Err(BuildError::InvalidPortSpec(spec.to_string()));
            }
            Some((sub, port)) => {
                let child = graph
                    .find_submodule(module, sub)
                    .ok_or_else(|| BuildError::UnknownSubmodule {
                        module: graph.full_name(module),
                        name: sub.to_string(),
                    })?;
                (child, port)
            }
        };
        graph.find_port(owner, port).ok_or_else(|| BuildError::UnknownPort {
            module: graph.full_name(owner),
            port: port.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SubmoduleDef;
    use approx::assert_relative_eq;

    /// out = a + b, where a and b are constants.
    fn sum_template() -> ModuleTemplate {
        ModuleTemplate::new("sum")
            .with_output("out")
            .with_submodule(SubmoduleDef::new("constant", "a").parameter("value", "def", 0.25))
            .with_submodule(SubmoduleDef::new("constant", "b").parameter("value", "def", 0.5))
            .with_submodule(SubmoduleDef::new("adder", "add"))
            .with_patch("a.out", "add.in0")
            .with_patch("b.out", "add.in1")
            .with_patch("add.out", "out")
    }

    fn render(graph: &mut Graph, port: &str) -> Vec<f32> {
        let root = graph.root().unwrap();
        let out = graph.find_port(root, port).unwrap();
        graph.process_port(out).unwrap();
        graph.buffer(out).to_vec()
    }

    #[test]
    fn test_build_and_render_composite() {
        let mut builder = Builder::new();
        builder.define(sum_template()).unwrap();

        let mut graph = builder.build("sum", "s").unwrap();
        graph.prepare(48_000.0, 32);
        let out = render(&mut graph, "out");
        assert_eq!(out.len(), 32);
        assert_relative_eq!(out[0], 0.75, epsilon = 1e-6);
        assert_relative_eq!(out[31], 0.75, epsilon = 1e-6);
    }

    #[test]
    fn test_parent_attributes_override_submodules() {
        let mut builder = Builder::new();
        builder.define(sum_template()).unwrap();

        let attrs = Attributes::new().with("a.value.def", 0.1).with("b.value.locked", 1);
        let mut graph = builder.build_with("sum", "s", &attrs).unwrap();
        graph.prepare(48_000.0, 8);

        let root = graph.root().unwrap();
        assert!(graph.parameter(root, "b.value").unwrap().is_locked());
        assert_relative_eq!(render(&mut graph, "out")[0], 0.6, epsilon = 1e-6);
    }

    #[test]
    fn test_define_rejects_known_types() {
        let mut builder = Builder::new();
        builder.define(sum_template()).unwrap();
        assert!(matches!(builder.define(sum_template()), Err(BuildError::DuplicateModuleType(_))));
        assert!(matches!(
            builder.define(ModuleTemplate::new("vco")),
            Err(BuildError::DuplicateModuleType(_))
        ));

        let types = builder.module_types();
        assert!(types.contains(&"sum".to_string()));
        assert!(types.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_build_errors() {
        let mut builder = Builder::new();
        assert!(matches!(builder.build("nope", "x"), Err(BuildError::UnknownModuleType(_))));

        builder
            .define(
                ModuleTemplate::new("dup")
                    .with_submodule(SubmoduleDef::new("constant", "c"))
                    .with_submodule(SubmoduleDef::new("constant", "c")),
            )
            .unwrap();
        assert!(matches!(builder.build("dup", "x"), Err(BuildError::DuplicateSubmodule { .. })));

        builder
            .define(
                ModuleTemplate::new("badspec")
                    .with_output("out")
                    .with_submodule(SubmoduleDef::new("constant", "c"))
                    .with_patch("c.out.x", "out"),
            )
            .unwrap();
        assert!(matches!(builder.build("badspec", "x"), Err(BuildError::InvalidPortSpec(_))));

        builder
            .define(
                ModuleTemplate::new("badport")
                    .with_output("out")
                    .with_submodule(SubmoduleDef::new("constant", "c"))
                    .with_patch("c.signal", "out"),
            )
            .unwrap();
        assert!(matches!(builder.build("badport", "x"), Err(BuildError::UnknownPort { .. })));

        builder
            .define(
                ModuleTemplate::new("twice")
                    .with_output("out")
                    .with_submodule(SubmoduleDef::new("constant", "c"))
                    .with_submodule(SubmoduleDef::new("constant", "d"))
                    .with_patch("c.out", "out")
                    .with_patch("d.out", "out"),
            )
            .unwrap();
        assert!(matches!(builder.build("twice", "x"), Err(BuildError::AlreadyConnected(_))));

        builder
            .define(ModuleTemplate::new("loop").with_submodule(SubmoduleDef::new("loop", "inner")))
            .unwrap();
        assert!(matches!(builder.build("loop", "x"), Err(BuildError::RecursiveModuleType(_))));
    }

    #[test]
    fn test_override_errors_name_the_module() {
        let builder = Builder::new();
        let attrs = Attributes::new().with("missing.def", 1);
        match builder.build_with("constant", "c", &attrs) {
            Err(BuildError::Parameter { module, .. }) => assert_eq!(module, "c"),
            other => panic!("unexpected {:?}", other.err()),
        }
    }
}

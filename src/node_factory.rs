// src/node_factory.rs

use std::collections::BTreeMap;

use crate::error::BuildResult;
use crate::node::NodeSpec;
use crate::state::Attributes;

/// A factory capable of creating fresh node instances.
///
/// This is only used during graph construction.
pub trait NodeFactory: Send + Sync {
    /// Create one node instance configured by the module's attributes.
    fn create(&self, attributes: &Attributes) -> BuildResult<NodeSpec>;
}

/// Convenience factory for nodes built from a closure
pub struct SimpleNodeFactory<F>
where
    F: Fn(&Attributes) -> BuildResult<NodeSpec> + Send + Sync,
{
    create_fn: F,
}

impl<F> SimpleNodeFactory<F>
where
    F: Fn(&Attributes) -> BuildResult<NodeSpec> + Send + Sync,
{
    pub fn new(create_fn: F) -> Self {
        Self { create_fn }
    }
}

impl<F> NodeFactory for SimpleNodeFactory<F>
where
    F: Fn(&Attributes) -> BuildResult<NodeSpec> + Send + Sync,
{
    fn create(&self, attributes: &Attributes) -> BuildResult<NodeSpec> {
        (self.create_fn)(attributes)
    }
}

/// Leaf module types by name.
#[derive(Default)]
pub struct NodeRegistry {
    factories: BTreeMap<String, Box<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type. Returns `false` if the name was already taken.
    pub fn register(&mut self, type_name: impl Into<String>, factory: impl NodeFactory + 'static) -> bool {
        let type_name = type_name.into();
        if self.factories.contains_key(&type_name) {
            return false;
        }
        self.factories.insert(type_name, Box::new(factory));
        true
    }

    pub fn get(&self, type_name: &str) -> Option<&dyn NodeFactory> {
        self.factories.get(type_name).map(|f| f.as_ref())
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Registered names in sorted order.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

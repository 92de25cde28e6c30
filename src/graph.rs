// src/graph.rs

//! Module tree with lazy, pull-based evaluation.
//!
//! A [`Graph`] owns every module and port of one instantiated tree in two
//! arenas. Modules are either leaves, which run a [`Node`], or composites,
//! which only route signals between their own ports and their children.
//!
//! Reading a port pulls: a dirty leaf port runs its owner's node once, which
//! first pulls every input of that module. Proxy ports forward to the leaf
//! they resolve to, or yield their default when nothing feeds them.

use std::collections::{BTreeMap, BTreeSet};

use smallvec::SmallVec;

use crate::arena::{Arena, Index};
use crate::error::{BuildError, BuildResult, ParameterError, ParameterResult, ProcessingError, ProcessingResult};
use crate::event::MidiEvent;
use crate::node::{Node, ProcessContext};
use crate::parameter::{ParamValue, Parameter, ParameterSet, ParameterValues};
use crate::port::{Direction, Port, PortKind};
use crate::state::Attributes;

pub type ModuleId = Index<Module>;
pub type PortId = Index<Port>;

/// What a module does when processed.
pub enum ModuleKind {
    /// Routes between its own ports and its children; processing is a no-op.
    Composite,

    /// Runs one node. The slot is empty while the node is processing.
    Leaf(Option<Box<dyn Node>>),
}

pub struct Module {
    type_name: String,
    name: String,
    attributes: Attributes,
    parameters: ParameterSet,
    parent: Option<ModuleId>,
    children: Vec<ModuleId>,
    inputs: Vec<PortId>,
    outputs: Vec<PortId>,
    /// Destination port -> source port.
    connections: BTreeMap<PortId, PortId>,
    kind: ModuleKind,
}

impl Module {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    pub fn parent(&self) -> Option<ModuleId> {
        self.parent
    }

    pub fn children(&self) -> &[ModuleId] {
        &self.children
    }

    pub fn inputs(&self) -> &[PortId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PortId] {
        &self.outputs
    }

    pub fn connections(&self) -> impl Iterator<Item = (PortId, PortId)> + '_ {
        self.connections.iter().map(|(dst, src)| (*dst, *src))
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, ModuleKind::Leaf(_))
    }

    fn node_mut(&mut self) -> Option<&mut Box<dyn Node>> {
        match &mut self.kind {
            ModuleKind::Leaf(slot) => slot.as_mut(),
            ModuleKind::Composite => None,
        }
    }
}

/// One instantiated module tree.
pub struct Graph {
    modules: Arena<Module>,
    ports: Arena<Port>,
    root: Option<ModuleId>,
    sample_rate: f32,
    frames: usize,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            modules: Arena::new(),
            ports: Arena::new(),
            root: None,
            sample_rate: 0.0,
            frames: 0,
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Construction
    // ═══════════════════════════════════════════════════════════════════

    /// Add a module under `parent`, or as the root when `parent` is `None`.
    pub fn add_module(
        &mut self,
        parent: Option<ModuleId>,
        type_name: impl Into<String>,
        name: impl Into<String>,
        attributes: Attributes,
        parameters: ParameterSet,
        kind: ModuleKind,
    ) -> BuildResult<ModuleId> {
        let name = name.into();
        if let Some(pid) = parent {
            let p = self.modules.get(pid).ok_or(BuildError::StaleHandle)?;
            if self.find_submodule(pid, &name).is_some() {
                return Err(BuildError::DuplicateSubmodule {
                    module: p.name.clone(),
                    name,
                });
            }
        }

        let id = self.modules.insert(Module {
            type_name: type_name.into(),
            name,
            attributes,
            parameters,
            parent,
            children: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            connections: BTreeMap::new(),
            kind,
        });

        match parent.and_then(|pid| self.modules.get_mut(pid)) {
            Some(p) => p.children.push(id),
            None => {
                if self.root.is_none() {
                    self.root = Some(id);
                }
            }
        }
        Ok(id)
    }

    /// Add a leaf (buffered) or proxy port to a module.
    pub fn add_port(
        &mut self,
        module: ModuleId,
        name: &str,
        direction: Direction,
        proxy_default: Option<f32>,
    ) -> BuildResult<PortId> {
        if self.find_port(module, name).is_some() {
            let m = self.modules.get(module).ok_or(BuildError::StaleHandle)?;
            return Err(BuildError::DuplicatePort {
                module: m.name.clone(),
                port: name.to_string(),
            });
        }
        let port = match proxy_default {
            Some(default) => Port::proxy(module, name, direction, default),
            None => Port::leaf(module, name, direction),
        };
        let id = self.ports.insert(port);
        let m = self.modules.get_mut(module).ok_or(BuildError::StaleHandle)?;
        match direction {
            Direction::Input => m.inputs.push(id),
            Direction::Output => m.outputs.push(id),
        }
        Ok(id)
    }

    /// Wire `src` into `dst` inside `module`.
    ///
    /// Sources may be the module's own inputs or its children's outputs;
    /// destinations may be the module's own outputs or its children's inputs.
    pub fn connect(&mut self, module: ModuleId, src: PortId, dst: PortId) -> BuildResult<()> {
        let src_port = self.ports.get(src).ok_or(BuildError::StaleHandle)?;
        let dst_port = self.ports.get(dst).ok_or(BuildError::StaleHandle)?;

        if src_port.direction() == Direction::Input && src_port.owner() != module {
            return Err(BuildError::SourceIsInnerInput(self.port_path(src)));
        }
        if dst_port.direction() == Direction::Output && dst_port.owner() != module {
            return Err(BuildError::DestinationIsInnerOutput(self.port_path(dst)));
        }
        if dst_port.is_leaf() {
            return Err(BuildError::DestinationIsBuffered(self.port_path(dst)));
        }

        let occupied = self
            .modules
            .get(module)
            .ok_or(BuildError::StaleHandle)?
            .connections
            .contains_key(&dst);
        if occupied {
            return Err(BuildError::AlreadyConnected(self.port_path(dst)));
        }

        if let Some(m) = self.modules.get_mut(module) {
            m.connections.insert(dst, src);
        }
        Ok(())
    }

    /// Drop every module and port. Outstanding handles become stale.
    pub fn clear(&mut self) {
        self.modules.clear();
        self.ports.clear();
        self.root = None;
    }

    // ═══════════════════════════════════════════════════════════════════
    // Lookup
    // ═══════════════════════════════════════════════════════════════════

    #[inline]
    pub fn root(&self) -> Option<ModuleId> {
        self.root
    }

    #[inline]
    pub fn module(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    #[inline]
    pub fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(id)
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn find_port(&self, module: ModuleId, name: &str) -> Option<PortId> {
        let m = self.modules.get(module)?;
        m.inputs
            .iter()
            .chain(m.outputs.iter())
            .copied()
            .find(|&p| self.ports.get(p).is_some_and(|port| port.name() == name))
    }

    pub fn find_submodule(&self, module: ModuleId, name: &str) -> Option<ModuleId> {
        let m = self.modules.get(module)?;
        m.children
            .iter()
            .copied()
            .find(|&c| self.modules.get(c).is_some_and(|child| child.name == name))
    }

    /// Dotted path of names from the root down to `id`.
    pub fn full_name(&self, id: ModuleId) -> String {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(m) = current.and_then(|c| self.modules.get(c)) {
            names.push(m.name.as_str());
            current = m.parent;
        }
        names.reverse();
        names.join(".")
    }

    fn port_path(&self, id: PortId) -> String {
        match self.ports.get(id) {
            Some(p) => format!("{}.{}", self.full_name(p.owner()), p.name()),
            None => "<stale>".to_string(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Preparation
    // ═══════════════════════════════════════════════════════════════════

    /// Set the sample rate and period size, re-resolve every port and
    /// (re)allocate buffers. Safe to call again when the period size changes.
    pub fn prepare(&mut self, sample_rate: f32, frames: usize) {
        self.sample_rate = sample_rate;
        self.frames = frames;

        let port_ids: Vec<PortId> = self.ports.iter().map(|(id, _)| id).collect();
        let links: Vec<(PortId, Option<PortId>, Vec<PortId>)> = port_ids
            .iter()
            .map(|&id| {
                let source = match self.ports.get(id) {
                    Some(p) if !p.is_leaf() => self.resolve_source(id),
                    _ => None,
                };
                (id, source, self.resolve_sinks(id))
            })
            .collect();

        for (id, source, sinks) in links {
            if let Some(port) = self.ports.get_mut(id) {
                port.source = source;
                port.sinks = sinks;
                port.allocate(frames);
            }
        }

        let module_ids: Vec<ModuleId> = self.modules.iter().map(|(id, _)| id).collect();
        for id in module_ids {
            let connected: SmallVec<[bool; 8]> = match self.modules.get(id) {
                Some(m) if m.is_leaf() => m
                    .inputs
                    .iter()
                    .map(|&p| self.ports.get(p).is_some_and(Port::is_connected))
                    .collect(),
                _ => continue,
            };
            if let Some(m) = self.modules.get_mut(id) {
                let Module { kind, parameters, .. } = m;
                if let ModuleKind::Leaf(Some(node)) = kind {
                    node.prepare(sample_rate, frames);
                    node.connections_resolved(&connected, parameters);
                }
            }
        }
    }

    /// Connection feeding `port`, looked up in its owner and then the owner's parent.
    fn upstream_link(&self, port: PortId) -> Option<PortId> {
        let owner = self.modules.get(self.ports.get(port)?.owner())?;
        owner.connections.get(&port).copied().or_else(|| {
            owner
                .parent
                .and_then(|p| self.modules.get(p))
                .and_then(|parent| parent.connections.get(&port).copied())
        })
    }

    /// Walk upstream until a leaf port is reached.
    fn resolve_source(&self, port: PortId) -> Option<PortId> {
        let mut current = port;
        for _ in 0..=self.ports.len() {
            let next = self.upstream_link(current)?;
            if self.ports.get(next)?.is_leaf() {
                return Some(next);
            }
            current = next;
        }
        None
    }

    /// Ports fed directly by `port`, from the owner's and the parent's maps.
    fn downstream_links(&self, port: PortId) -> Vec<PortId> {
        let Some(owner) = self.ports.get(port).and_then(|p| self.modules.get(p.owner())) else {
            return Vec::new();
        };
        let parent = owner.parent.and_then(|p| self.modules.get(p));
        owner
            .connections
            .iter()
            .chain(parent.into_iter().flat_map(|p| p.connections.iter()))
            .filter(|(_, src)| **src == port)
            .map(|(dst, _)| *dst)
            .collect()
    }

    /// Walk downstream collecting the ports of leaf modules.
    fn resolve_sinks(&self, port: PortId) -> Vec<PortId> {
        let mut sinks = Vec::new();
        let mut visited = BTreeSet::new();
        let mut pending = self.downstream_links(port);
        while let Some(dst) = pending.pop() {
            if !visited.insert(dst) {
                continue;
            }
            let owned_by_leaf = self
                .ports
                .get(dst)
                .and_then(|p| self.modules.get(p.owner()))
                .is_some_and(Module::is_leaf);
            if owned_by_leaf {
                sinks.push(dst);
            } else {
                pending.extend(self.downstream_links(dst));
            }
        }
        sinks.sort();
        sinks
    }

    // ═══════════════════════════════════════════════════════════════════
    // Activation
    // ═══════════════════════════════════════════════════════════════════

    /// Start every node and mark every leaf port stale.
    pub fn start(&mut self) {
        let ids: Vec<ModuleId> = self.modules.iter().map(|(id, _)| id).collect();
        for id in ids {
            if let Some(node) = self.modules.get_mut(id).and_then(Module::node_mut) {
                node.start();
            }
        }
        let ports: Vec<PortId> = self.ports.iter().map(|(id, _)| id).collect();
        for id in ports {
            if let Some(p) = self.ports.get_mut(id) {
                p.set_dirty_flag(true);
            }
        }
    }

    pub fn stop(&mut self) {
        let ids: Vec<ModuleId> = self.modules.iter().map(|(id, _)| id).collect();
        for id in ids {
            if let Some(node) = self.modules.get_mut(id).and_then(Module::node_mut) {
                node.stop();
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Processing
    // ═══════════════════════════════════════════════════════════════════

    /// Make the buffer behind `port` current for this period.
    pub fn process_port(&mut self, port: PortId) -> ProcessingResult<()> {
        let p = self.ports.get(port).ok_or(ProcessingError::StaleHandle)?;
        match p.kind() {
            PortKind::Proxy { .. } => match p.source() {
                Some(src) => self.process_port(src),
                None => Ok(()),
            },
            PortKind::Leaf { dirty: true } => self.process_module(p.owner()),
            PortKind::Leaf { dirty: false } => Ok(()),
        }
    }

    /// The signal seen through `port`: its own buffer, or its resolved source's.
    pub fn buffer(&self, port: PortId) -> &[f32] {
        let Some(p) = self.ports.get(port) else {
            return &[];
        };
        match p.source().and_then(|src| self.ports.get(src)) {
            Some(src) if !p.is_leaf() => &src.buffer,
            _ => &p.buffer,
        }
    }

    fn process_module(&mut self, id: ModuleId) -> ProcessingResult<()> {
        let module = self.modules.get_mut(id).ok_or(ProcessingError::StaleHandle)?;
        let mut node = match &mut module.kind {
            ModuleKind::Composite => return Ok(()),
            ModuleKind::Leaf(slot) => match slot.take() {
                Some(node) => node,
                None => return Err(ProcessingError::Cycle(module.name.clone())),
            },
        };

        let result = self.run_node(id, node.as_mut());

        if let Some(ModuleKind::Leaf(slot)) = self.modules.get_mut(id).map(|m| &mut m.kind) {
            *slot = Some(node);
        }
        result
    }

    fn run_node(&mut self, id: ModuleId, node: &mut dyn Node) -> ProcessingResult<()> {
        let (inputs, outputs) = {
            let m = self.modules.get(id).ok_or(ProcessingError::StaleHandle)?;
            let inputs: SmallVec<[PortId; 8]> = m.inputs.iter().copied().collect();
            let outputs: SmallVec<[PortId; 4]> = m.outputs.iter().copied().collect();
            (inputs, outputs)
        };

        for &p in &inputs {
            self.process_port(p)?;
        }

        let mut out_bufs: SmallVec<[Vec<f32>; 4]> = outputs
            .iter()
            .map(|&p| {
                self.ports
                    .get_mut(p)
                    .map(|port| std::mem::take(&mut port.buffer))
                    .unwrap_or_default()
            })
            .collect();

        let result = {
            let in_bufs: SmallVec<[&[f32]; 8]> = inputs.iter().map(|&p| self.buffer(p)).collect();
            match self.modules.get(id) {
                Some(m) => {
                    let mut ctx =
                        ProcessContext::new(self.frames, self.sample_rate, &m.parameters, &in_bufs, &mut out_bufs);
                    node.process(&mut ctx)
                }
                None => Err(ProcessingError::StaleHandle),
            }
        };

        for (&p, buf) in outputs.iter().zip(out_bufs) {
            if let Some(port) = self.ports.get_mut(p) {
                port.buffer = buf;
                if result.is_ok() {
                    port.set_dirty_flag(false);
                }
            }
        }
        result
    }

    /// Mark `port` stale for the next period.
    ///
    /// A leaf port marks every output of its module; with `propagate` the
    /// module's inputs are marked too, which walks the whole upstream graph.
    /// Proxies forward to their source.
    pub fn set_dirty(&mut self, port: PortId, propagate: bool) {
        let Some(p) = self.ports.get(port) else {
            return;
        };
        match p.kind() {
            PortKind::Proxy { .. } => {
                if let Some(src) = p.source() {
                    self.set_dirty(src, propagate);
                }
            }
            PortKind::Leaf { dirty: true } => {}
            PortKind::Leaf { dirty: false } => {
                let Some(m) = self.modules.get(p.owner()) else {
                    return;
                };
                let outputs: SmallVec<[PortId; 4]> = m.outputs.iter().copied().collect();
                let inputs: SmallVec<[PortId; 8]> = m.inputs.iter().copied().collect();
                for o in outputs {
                    if let Some(out) = self.ports.get_mut(o) {
                        out.set_dirty_flag(true);
                    }
                }
                if propagate {
                    for i in inputs {
                        self.set_dirty(i, true);
                    }
                }
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // MIDI
    // ═══════════════════════════════════════════════════════════════════

    /// Leaf modules exposing the MIDI listener capability, depth first.
    pub fn midi_listeners(&mut self) -> Vec<ModuleId> {
        let mut found = Vec::new();
        let mut stack: Vec<ModuleId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            let Some(m) = self.modules.get_mut(id) else {
                continue;
            };
            if m.node_mut().is_some_and(|n| n.midi_listener().is_some()) {
                found.push(id);
            }
            stack.extend(m.children.iter().rev().copied());
        }
        found
    }

    pub fn push_midi(&mut self, module: ModuleId, event: &MidiEvent) {
        if let Some(listener) = self
            .modules
            .get_mut(module)
            .and_then(Module::node_mut)
            .and_then(|n| n.midi_listener())
        {
            listener.push_event(event);
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Attributes and parameters
    // ═══════════════════════════════════════════════════════════════════

    /// Attributes of `module` and, prefixed by their names, of its descendants.
    pub fn attributes(&self, module: ModuleId) -> Attributes {
        let mut out = Attributes::new();
        self.collect_attributes(module, "", &mut out);
        out
    }

    fn collect_attributes(&self, id: ModuleId, prefix: &str, out: &mut Attributes) {
        let Some(m) = self.modules.get(id) else {
            return;
        };
        for (k, v) in m.attributes.iter() {
            out.insert(format!("{prefix}{k}"), v);
        }
        for &child in &m.children {
            if let Some(c) = self.modules.get(child) {
                self.collect_attributes(child, &format!("{prefix}{}.", c.name), out);
            }
        }
    }

    /// Parameters of `module` and its descendants, keyed by dotted path.
    pub fn parameters(&self, module: ModuleId) -> BTreeMap<String, Parameter> {
        let mut out = BTreeMap::new();
        self.collect_parameters(module, "", &mut out);
        out
    }

    fn collect_parameters(&self, id: ModuleId, prefix: &str, out: &mut BTreeMap<String, Parameter>) {
        let Some(m) = self.modules.get(id) else {
            return;
        };
        for (name, p) in m.parameters.iter() {
            out.insert(format!("{prefix}{name}"), p.clone());
        }
        for &child in &m.children {
            if let Some(c) = self.modules.get(child) {
                self.collect_parameters(child, &format!("{prefix}{}.", c.name), out);
            }
        }
    }

    /// Find the module owning the parameter addressed by `path`.
    ///
    /// A path without a dot names a parameter of `module`; otherwise the part
    /// before the first dot names a submodule.
    fn resolve_parameter_path<'p>(&self, module: ModuleId, path: &'p str) -> ParameterResult<(ModuleId, &'p str)> {
        let mut current = module;
        let mut rest = path;
        while let Some((head, tail)) = rest.split_once('.') {
            current = self
                .find_submodule(current, head)
                .ok_or_else(|| ParameterError::UnknownSubmodule(format!("{}.{}", self.full_name(current), head)))?;
            rest = tail;
        }
        Ok((current, rest))
    }

    /// Read one parameter by dotted path.
    pub fn parameter(&self, module: ModuleId, path: &str) -> ParameterResult<&Parameter> {
        let (target, name) = self.resolve_parameter_path(module, path)?;
        self.modules
            .get(target)
            .and_then(|m| m.parameters.get(name))
            .ok_or_else(|| ParameterError::UnknownParameter(path.to_string()))
    }

    /// Set several parameters by dotted path.
    ///
    /// Every value is validated before any is stored: on error nothing changes.
    pub fn update_parameters(&mut self, module: ModuleId, values: &ParameterValues) -> ParameterResult<()> {
        let mut staged: Vec<(ModuleId, &str, f32)> = Vec::with_capacity(values.len());
        for (path, value) in values {
            let (target, name) = self.resolve_parameter_path(module, path)?;
            let param = self.parameter(module, path)?;
            if param.is_locked() {
                return Err(ParameterError::Locked(path.clone()));
            }
            staged.push((target, name, param.resolve(value)?));
        }

        let mut touched = BTreeSet::new();
        for (target, name, resolved) in staged {
            if let Some(p) = self.modules.get_mut(target).and_then(|m| m.parameters.get_mut(name)) {
                p.assign(resolved);
                touched.insert(target);
            }
        }
        for id in touched {
            self.notify_parameters(id);
        }
        Ok(())
    }

    /// Convenience for a single value.
    pub fn set_parameter(&mut self, module: ModuleId, path: &str, value: ParamValue) -> ParameterResult<()> {
        let mut values = ParameterValues::new();
        values.insert(path.to_string(), value);
        self.update_parameters(module, &values)
    }

    /// Reset every unlocked parameter under `module` to its default.
    pub fn reset_parameters(&mut self, module: ModuleId) {
        let mut stack = vec![module];
        while let Some(id) = stack.pop() {
            if let Some(m) = self.modules.get_mut(id) {
                m.parameters.reset_unlocked();
                stack.extend(m.children.iter().copied());
            }
            self.notify_parameters(id);
        }
    }

    pub(crate) fn notify_parameters(&mut self, id: ModuleId) {
        if let Some(m) = self.modules.get_mut(id) {
            let Module { kind, parameters, .. } = m;
            if let ModuleKind::Leaf(Some(node)) = kind {
                node.parameters_changed(parameters);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fills `out` with `value` and counts how often it ran.
    struct Source {
        calls: Arc<AtomicUsize>,
    }

    impl Node for Source {
        fn process(&mut self, ctx: &mut ProcessContext) -> ProcessingResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let value = ctx.params.number("value");
            ctx.output(0).fill(value);
            ctx.output(1).fill(-value);
            Ok(())
        }
    }

    /// out = in0 + in1
    struct Sum;

    impl Node for Sum {
        fn process(&mut self, ctx: &mut ProcessContext) -> ProcessingResult<()> {
            let (a, b) = (ctx.input(0), ctx.input(1));
            for ((o, x), y) in ctx.output(0).iter_mut().zip(a).zip(b) {
                *o = x + y;
            }
            Ok(())
        }

        fn connections_resolved(&mut self, connected: &[bool], params: &mut ParameterSet) {
            if connected.get(1) == Some(&false) {
                params.lock("gain1");
            }
        }
    }

    struct Fixture {
        graph: Graph,
        root: ModuleId,
        calls: Arc<AtomicUsize>,
    }

    fn leaf(graph: &mut Graph, parent: ModuleId, name: &str, node: Box<dyn Node>, params: ParameterSet) -> ModuleId {
        graph
            .add_module(Some(parent), "test", name, Attributes::new(), params, ModuleKind::Leaf(Some(node)))
            .unwrap()
    }

    /// root(in, out) { src.pos -> sum.in0, src.neg -> sum2.in0, sum.out -> out }
    fn fixture() -> Fixture {
        let mut graph = Graph::new();
        let root = graph
            .add_module(None, "patch", "voice", Attributes::new(), ParameterSet::new(), ModuleKind::Composite)
            .unwrap();
        let root_in = graph.add_port(root, "in", Direction::Input, Some(0.25)).unwrap();
        let root_out = graph.add_port(root, "out", Direction::Output, Some(0.0)).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let mut src_params = ParameterSet::new();
        src_params.insert("value", Parameter::new_number(0.5, 0.0, 1.0, 0.01));
        let src = leaf(&mut graph, root, "src", Box::new(Source { calls: calls.clone() }), src_params);
        let pos = graph.add_port(src, "pos", Direction::Output, None).unwrap();
        let neg = graph.add_port(src, "neg", Direction::Output, None).unwrap();

        let mut sum_params = ParameterSet::new();
        sum_params.insert("gain1", Parameter::new_number(1.0, 0.0, 1.0, 0.01));
        let sum = leaf(&mut graph, root, "sum", Box::new(Sum), sum_params);
        let sum_in0 = graph.add_port(sum, "in0", Direction::Input, Some(0.0)).unwrap();
        let sum_in1 = graph.add_port(sum, "in1", Direction::Input, Some(0.0)).unwrap();
        let sum_out = graph.add_port(sum, "out", Direction::Output, None).unwrap();

        let sum2 = leaf(&mut graph, root, "sum2", Box::new(Sum), ParameterSet::new());
        let sum2_in0 = graph.add_port(sum2, "in0", Direction::Input, Some(0.0)).unwrap();
        let sum2_in1 = graph.add_port(sum2, "in1", Direction::Input, Some(0.0)).unwrap();
        graph.add_port(sum2, "out", Direction::Output, None).unwrap();

        graph.connect(root, pos, sum_in0).unwrap();
        graph.connect(root, neg, sum2_in0).unwrap();
        graph.connect(root, root_in, sum2_in1).unwrap();
        graph.connect(root, sum_out, root_out).unwrap();
        let _ = sum_in1;

        graph.prepare(48_000.0, 16);
        Fixture { graph, root, calls }
    }

    #[test]
    fn test_unconnected_proxy_yields_default() {
        let f = fixture();
        let sum = f.graph.find_submodule(f.root, "sum").unwrap();
        let in1 = f.graph.find_port(sum, "in1").unwrap();
        assert!(f.graph.buffer(in1).iter().all(|&x| x == 0.0));

        let root_in = f.graph.find_port(f.root, "in").unwrap();
        assert_eq!(f.graph.buffer(root_in).len(), 16);
        assert!(f.graph.buffer(root_in).iter().all(|&x| x == 0.25));
    }

    #[test]
    fn test_pull_through_proxies() {
        let mut f = fixture();
        let out = f.graph.find_port(f.root, "out").unwrap();
        f.graph.process_port(out).unwrap();
        assert!(f.graph.buffer(out).iter().all(|&x| x == 0.5));
    }

    #[test]
    fn test_module_runs_once_per_period_with_fanout() {
        let mut f = fixture();
        let out = f.graph.find_port(f.root, "out").unwrap();
        let sum2 = f.graph.find_submodule(f.root, "sum2").unwrap();
        let out2 = f.graph.find_port(sum2, "out").unwrap();

        f.graph.process_port(out).unwrap();
        f.graph.process_port(out2).unwrap();
        f.graph.process_port(out).unwrap();
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        // root.in has no source, so sum2.in1 yields its own default
        assert!(f.graph.buffer(out2).iter().all(|&x| (x + 0.5).abs() < 1e-6));

        f.graph.set_dirty(out, true);
        f.graph.set_dirty(out2, true);
        f.graph.process_port(out).unwrap();
        f.graph.process_port(out2).unwrap();
        assert_eq!(f.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dirty_without_propagation_stays_local() {
        let mut f = fixture();
        let out = f.graph.find_port(f.root, "out").unwrap();
        f.graph.process_port(out).unwrap();
        f.graph.set_dirty(out, false);
        f.graph.process_port(out).unwrap();
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolution_and_connectivity() {
        let f = fixture();
        let src = f.graph.find_submodule(f.root, "src").unwrap();
        let pos = f.graph.find_port(src, "pos").unwrap();
        let sum = f.graph.find_submodule(f.root, "sum").unwrap();
        let in0 = f.graph.find_port(sum, "in0").unwrap();
        let in1 = f.graph.find_port(sum, "in1").unwrap();

        assert_eq!(f.graph.port(in0).unwrap().source(), Some(pos));
        assert_eq!(f.graph.port(pos).unwrap().sinks(), &[in0]);
        assert!(!f.graph.port(in1).unwrap().is_connected());
        assert!(f.graph.module(sum).unwrap().parameters().get("gain1").unwrap().is_locked());

        let out = f.graph.find_port(f.root, "out").unwrap();
        let sum_out = f.graph.find_port(sum, "out").unwrap();
        assert_eq!(f.graph.port(out).unwrap().source(), Some(sum_out));
    }

    #[test]
    fn test_connect_rules() {
        let mut f = fixture();
        let g = &mut f.graph;
        let sum = g.find_submodule(f.root, "sum").unwrap();
        let src = g.find_submodule(f.root, "src").unwrap();
        let sum_in1 = g.find_port(sum, "in1").unwrap();
        let sum_in0 = g.find_port(sum, "in0").unwrap();
        let sum_out = g.find_port(sum, "out").unwrap();
        let pos = g.find_port(src, "pos").unwrap();

        assert!(matches!(g.connect(f.root, sum_in1, sum_in0), Err(BuildError::SourceIsInnerInput(_))));
        assert!(matches!(g.connect(f.root, pos, sum_out), Err(BuildError::DestinationIsInnerOutput(_))));
        assert!(matches!(g.connect(sum, pos, sum_out), Err(BuildError::DestinationIsBuffered(_))));
        assert!(matches!(g.connect(f.root, pos, sum_in0), Err(BuildError::AlreadyConnected(_))));
        assert!(g.connect(f.root, pos, sum_in1).is_ok());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut f = fixture();
        let err = f
            .graph
            .add_module(Some(f.root), "test", "src", Attributes::new(), ParameterSet::new(), ModuleKind::Composite)
            .unwrap_err();
        assert!(matches!(err, BuildError::DuplicateSubmodule { .. }));
        assert!(matches!(
            f.graph.add_port(f.root, "in", Direction::Input, Some(0.0)),
            Err(BuildError::DuplicatePort { .. })
        ));
    }

    #[test]
    fn test_cycle_is_processing_error() {
        let mut graph = Graph::new();
        let root = graph
            .add_module(None, "patch", "loop", Attributes::new(), ParameterSet::new(), ModuleKind::Composite)
            .unwrap();
        let a = leaf(&mut graph, root, "a", Box::new(Sum), ParameterSet::new());
        let a_in = graph.add_port(a, "in0", Direction::Input, Some(0.0)).unwrap();
        let a_out = graph.add_port(a, "out", Direction::Output, None).unwrap();
        graph.connect(root, a_out, a_in).unwrap();
        graph.prepare(48_000.0, 8);

        assert!(matches!(graph.process_port(a_out), Err(ProcessingError::Cycle(_))));
    }

    #[test]
    fn test_parameter_paths_and_atomic_update() {
        let mut f = fixture();
        let params = f.graph.parameters(f.root);
        assert!(params.contains_key("src.value"));
        assert!(params.contains_key("sum.gain1"));

        let mut values = ParameterValues::new();
        values.insert("src.value".into(), ParamValue::Number(0.8));
        values.insert("sum.gain1".into(), ParamValue::Number(0.5));
        let err = f.graph.update_parameters(f.root, &values).unwrap_err();
        assert!(matches!(err, ParameterError::Locked(_)));
        assert_eq!(f.graph.parameter(f.root, "src.value").unwrap().number(), 0.5);

        values.remove("sum.gain1");
        f.graph.update_parameters(f.root, &values).unwrap();
        assert!((f.graph.parameter(f.root, "src.value").unwrap().number() - 0.8).abs() < 1e-6);

        assert!(matches!(
            f.graph.set_parameter(f.root, "nope.value", ParamValue::Number(0.1)),
            Err(ParameterError::UnknownSubmodule(_))
        ));
        assert!(matches!(
            f.graph.set_parameter(f.root, "src.nope", ParamValue::Number(0.1)),
            Err(ParameterError::UnknownParameter(_))
        ));

        f.graph.reset_parameters(f.root);
        assert_eq!(f.graph.parameter(f.root, "src.value").unwrap().number(), 0.5);
    }

    #[test]
    fn test_names_and_attributes() {
        let mut graph = Graph::new();
        let root = graph
            .add_module(
                None,
                "patch",
                "piano#0",
                Attributes::new().with("maxVoices", "2"),
                ParameterSet::new(),
                ModuleKind::Composite,
            )
            .unwrap();
        let child = graph
            .add_module(
                Some(root),
                "envelope",
                "env",
                Attributes::new().with("point0", "0,0"),
                ParameterSet::new(),
                ModuleKind::Composite,
            )
            .unwrap();
        assert_eq!(graph.full_name(child), "piano#0.env");
        let attrs = graph.attributes(root);
        assert_eq!(attrs.get("maxVoices"), Some("2"));
        assert_eq!(attrs.get("env.point0"), Some("0,0"));

        graph.clear();
        assert!(graph.module(root).is_none());
        assert!(graph.root().is_none());
    }
}

// src/port.rs
//
// Signal endpoints of a module.

use crate::graph::{ModuleId, PortId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// How a port obtains its samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PortKind {
    /// Authoritative buffer written by the owning module's node.
    Leaf { dirty: bool },

    /// Forwards to the resolved upstream leaf, or yields `default` when
    /// nothing is connected.
    Proxy { default: f32 },
}

#[derive(Debug)]
pub struct Port {
    owner: ModuleId,
    name: String,
    direction: Direction,
    kind: PortKind,
    /// Leaf: the computed signal. Proxy: the constant default signal.
    pub(crate) buffer: Vec<f32>,
    pub(crate) source: Option<PortId>,
    pub(crate) sinks: Vec<PortId>,
}

impl Port {
    pub fn leaf(owner: ModuleId, name: impl Into<String>, direction: Direction) -> Self {
        Self::new(owner, name.into(), direction, PortKind::Leaf { dirty: true })
    }

    pub fn proxy(owner: ModuleId, name: impl Into<String>, direction: Direction, default: f32) -> Self {
        Self::new(owner, name.into(), direction, PortKind::Proxy { default })
    }

    fn new(owner: ModuleId, name: String, direction: Direction, kind: PortKind) -> Self {
        Self {
            owner,
            name,
            direction,
            kind,
            buffer: Vec::new(),
            source: None,
            sinks: Vec::new(),
        }
    }

    #[inline]
    pub fn owner(&self) -> ModuleId {
        self.owner
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[inline]
    pub fn kind(&self) -> PortKind {
        self.kind
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, PortKind::Leaf { .. })
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        matches!(self.kind, PortKind::Leaf { dirty: true })
    }

    pub fn default_value(&self) -> Option<f32> {
        match self.kind {
            PortKind::Proxy { default } => Some(default),
            PortKind::Leaf { .. } => None,
        }
    }

    /// Resolved upstream leaf port (proxies only).
    #[inline]
    pub fn source(&self) -> Option<PortId> {
        self.source
    }

    /// Resolved downstream leaf-module ports.
    pub fn sinks(&self) -> &[PortId] {
        &self.sinks
    }

    pub fn is_connected(&self) -> bool {
        self.source.is_some() || !self.sinks.is_empty()
    }

    /// Allocate the per-period buffer.
    pub(crate) fn allocate(&mut self, frames: usize) {
        let fill = match self.kind {
            PortKind::Leaf { .. } => {
                self.kind = PortKind::Leaf { dirty: true };
                0.0
            }
            PortKind::Proxy { default } => default,
        };
        self.buffer.clear();
        self.buffer.resize(frames, fill);
    }

    #[inline]
    pub(crate) fn set_dirty_flag(&mut self, dirty: bool) {
        if let PortKind::Leaf { .. } = self.kind {
            self.kind = PortKind::Leaf { dirty };
        }
    }
}

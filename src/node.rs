// src/node.rs

use crate::error::ProcessingResult;
use crate::event::MidiEvent;
use crate::parameter::{Parameter, ParameterSet};

/// Context passed to a node for one period.
pub struct ProcessContext<'a> {
    /// Number of frames to process
    pub frames: usize,

    /// Sample rate
    pub sample_rate: f32,

    /// The module's parameters, read-only during processing
    pub params: &'a ParameterSet,

    /// Input signals in declaration order
    inputs: &'a [&'a [f32]],

    /// Output buffers in declaration order
    outputs: &'a mut [Vec<f32>],
}

impl<'a> ProcessContext<'a> {
    pub fn new(
        frames: usize,
        sample_rate: f32,
        params: &'a ParameterSet,
        inputs: &'a [&'a [f32]],
        outputs: &'a mut [Vec<f32>],
    ) -> Self {
        Self {
            frames,
            sample_rate,
            params,
            inputs,
            outputs,
        }
    }

    /// Input signal `index`; empty if the node declared fewer inputs.
    #[inline]
    pub fn input(&self, index: usize) -> &'a [f32] {
        self.inputs.get(index).copied().unwrap_or(&[])
    }

    #[inline]
    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// Output buffer `index`; empty if the node declared fewer outputs.
    #[inline]
    pub fn output(&mut self, index: usize) -> &mut [f32] {
        match self.outputs.get_mut(index) {
            Some(buf) => buf.as_mut_slice(),
            None => &mut [],
        }
    }

    /// All output buffers, for nodes writing several at once.
    #[inline]
    pub fn outputs(&mut self) -> &mut [Vec<f32>] {
        &mut *self.outputs
    }
}

/// Capability of nodes that consume MIDI events.
pub trait MidiListener {
    /// Queue or apply one event. Events of a period are rendered by the
    /// next `process` in time order.
    fn push_event(&mut self, event: &MidiEvent);
}

/// Core DSP node trait.
///
/// Nodes:
/// - do NOT know about the graph around them
/// - do NOT allocate in `process`
/// - fill every output buffer on each `process`
pub trait Node: Send {
    /// Called whenever the graph is prepared for a sample rate and period size.
    fn prepare(&mut self, _sample_rate: f32, _frames: usize) {}

    /// Called after port resolution with the connectivity of each input.
    ///
    /// Nodes lock the parameters that scale unconnected inputs here.
    fn connections_resolved(&mut self, _connected: &[bool], _params: &mut ParameterSet) {}

    /// Voice activation.
    fn start(&mut self) {}

    /// Voice deactivation.
    fn stop(&mut self) {}

    /// Parameter values changed (after build and after every update).
    fn parameters_changed(&mut self, _params: &ParameterSet) {}

    /// Render one period.
    fn process(&mut self, ctx: &mut ProcessContext) -> ProcessingResult<()>;

    /// The MIDI listener capability, when the node has one.
    fn midi_listener(&mut self) -> Option<&mut dyn MidiListener> {
        None
    }
}

/// Declared input port of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct PortSpec {
    pub name: String,
    pub default: f32,
}

/// A freshly created node together with its declared interface.
pub struct NodeSpec {
    pub node: Box<dyn Node>,
    pub inputs: Vec<PortSpec>,
    pub outputs: Vec<String>,
    pub parameters: ParameterSet,
}

impl NodeSpec {
    pub fn new(node: impl Node + 'static) -> Self {
        Self {
            node: Box::new(node),
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: ParameterSet::new(),
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, default: f32) -> Self {
        self.inputs.push(PortSpec {
            name: name.into(),
            default,
        });
        self
    }

    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, param: Parameter) -> Self {
        self.parameters.insert(name, param);
        self
    }
}

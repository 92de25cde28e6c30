// src/error.rs
//
// Error taxonomy for the graph engine.
//
// Build errors stop graph construction, parameter errors are reported per
// update request, processing errors are confined to the voice that raised them.

use thiserror::Error;

/// Invalid parameter access or value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("value {value} out of range [{min}, {max}]")]
    OutOfRange { value: f32, min: f32, max: f32 },

    #[error("parameter '{0}' is locked")]
    Locked(String),

    #[error("no parameter '{0}'")]
    UnknownParameter(String),

    #[error("no submodule '{0}'")]
    UnknownSubmodule(String),

    #[error("'{0}' is not a valid choice")]
    InvalidChoice(String),

    #[error("choice index {index} does not match '{name}'")]
    ChoiceIndexMismatch { index: usize, name: String },

    #[error("expected a {expected} value")]
    WrongKind { expected: &'static str },

    #[error("bounds and step are not defined for choice parameter '{0}'")]
    NotANumber(String),

    #[error("invalid step {0}")]
    InvalidStep(f32),

    #[error("malformed override '{key}={value}'")]
    MalformedOverride { key: String, value: String },
}

/// Graph definition or construction failure.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unknown module type '{0}'")]
    UnknownModuleType(String),

    #[error("module type '{0}' is already defined")]
    DuplicateModuleType(String),

    #[error("module type '{0}' contains itself")]
    RecursiveModuleType(String),

    #[error("module '{module}' requires attribute '{attribute}'")]
    MissingAttribute { module: String, attribute: String },

    #[error("invalid attribute '{attribute}' = '{value}'")]
    InvalidAttribute { attribute: String, value: String },

    #[error("module '{module}' already has a submodule named '{name}'")]
    DuplicateSubmodule { module: String, name: String },

    #[error("module '{module}' already has a port named '{port}'")]
    DuplicatePort { module: String, port: String },

    #[error("invalid port specification '{0}'")]
    InvalidPortSpec(String),

    #[error("module '{module}' has no port '{port}'")]
    UnknownPort { module: String, port: String },

    #[error("module '{module}' has no submodule '{name}'")]
    UnknownSubmodule { module: String, name: String },

    #[error("port '{0}' is already connected")]
    AlreadyConnected(String),

    #[error("cannot connect from input '{0}' of an inner module")]
    SourceIsInnerInput(String),

    #[error("cannot connect to output '{0}' of an inner module")]
    DestinationIsInnerOutput(String),

    #[error("cannot connect to buffered port '{0}'")]
    DestinationIsBuffered(String),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("module '{module}' of type '{type_name}': {reason}")]
    InvalidOutputs {
        module: String,
        type_name: String,
        reason: &'static str,
    },

    #[error("cannot load sample '{path}': {reason}")]
    SampleLoad { path: String, reason: String },

    #[error("stale module or port handle")]
    StaleHandle,

    #[error("parameter override failed in '{module}': {source}")]
    Parameter {
        module: String,
        #[source]
        source: ParameterError,
    },
}

/// Invalid state reached while rendering a period.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProcessingError {
    #[error("negative envelope event time {0}")]
    NegativeEventTime(i64),

    #[error("invalid waveform index {0}")]
    InvalidWaveform(usize),

    #[error("invalid filter type index {0}")]
    InvalidFilterType(usize),

    #[error("processing cycle through module '{0}'")]
    Cycle(String),

    #[error("stale module or port handle")]
    StaleHandle,

    #[error("output buffer holds {got} frames, expected {expected}")]
    BufferSize { expected: usize, got: usize },
}

/// Parameter snapshot I/O failure.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("cannot access '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Parameter(#[from] ParameterError),
}

pub type BuildResult<T> = Result<T, BuildError>;
pub type ParameterResult<T> = Result<T, ParameterError>;
pub type ProcessingResult<T> = Result<T, ProcessingError>;
pub type SnapshotResult<T> = Result<T, SnapshotError>;

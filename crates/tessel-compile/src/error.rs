//! Compile errors.

use tessel_emit::interp::InterpError;
use tessel_emit::EmitterError;
use tessel_model::{ModelError, PortType};
use thiserror::Error;

/// Errors that abort a compile. There is no partial result.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("type mismatch: cannot compile {context} of type {found}")]
    TypeMismatch { context: String, found: PortType },

    #[error("node {node} ({kind}) cannot be compiled directly")]
    UnsupportedNode { node: String, kind: String },

    #[error("scope imbalance: expected depth {expected}, found {found}")]
    ScopeImbalance { expected: usize, found: usize },

    #[error("invalid parameters: {0}")]
    Parameters(#[from] toml::de::Error),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("emitter error: {0}")]
    Emitter(#[from] EmitterError),

    #[error("execution failed: {0}")]
    Execution(#[from] InterpError),
}

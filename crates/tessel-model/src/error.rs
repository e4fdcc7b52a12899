//! Model construction and refinement errors.

use thiserror::Error;

use crate::node::NodeId;
use crate::port::{OutputPortRef, PortType};

/// Errors that can occur while building, validating, or refining a model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("output port {port} out of range for node {node}")]
    PortOutOfRange { node: NodeId, port: usize },

    #[error("elements [{start}, {end}) out of range for port {port} of size {size}")]
    ElementsOutOfRange {
        port: OutputPortRef,
        start: usize,
        end: usize,
        size: usize,
    },

    #[error("node {node} references later node {referenced}; models must be built in dependency order")]
    ForwardReference { node: NodeId, referenced: NodeId },

    #[error("port type mismatch on {context}: expected {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: PortType,
        found: PortType,
    },

    #[error("size mismatch on {context}: expected {expected}, found {found}")]
    SizeMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    #[error("invalid node {kind}: {reason}")]
    InvalidNode { kind: String, reason: String },

    #[error("node {node} ({kind}) cannot be refined any further")]
    CannotRefine { node: NodeId, kind: String },

    #[error("refinement did not converge after {iterations} iteration(s)")]
    RefinementDidNotConverge { iterations: usize },

    #[error("map binding {0} not found")]
    BindingNotFound(usize),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

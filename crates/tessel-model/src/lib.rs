//! Dataflow model graph for the Tessel compiler.
//!
//! A model is an append-only graph of typed nodes. Each node reads from
//! [`PortElements`] (lanes of earlier nodes' output ports) and produces one or
//! more output ports. A [`Map`] binds a model to a named input and a named
//! output, and can be refined so that every node is expressed in terms the
//! compiler understands.

pub mod error;
pub mod map;
pub mod model;
pub mod node;
pub mod port;
pub mod refine;
pub mod shape;

pub use error::ModelError;
pub use map::Map;
pub use model::Model;
pub use node::{BinaryOp, ComparisonOp, Node, NodeId, NodeKind, ScalarValue, UnaryOp};
pub use port::{
    InputPort, OutputPort, OutputPortRef, PortElement, PortElements, PortRange, PortType,
};
pub use refine::{NodeAction, TransformContext, DEFAULT_MAX_REFINEMENT_ITERATIONS};
pub use shape::TensorShape;

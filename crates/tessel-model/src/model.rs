//! The model graph container.
//!
//! Nodes are stored in an append-only arena. A node may only read from nodes
//! added before it, so insertion order is always a valid dependency order.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::node::{BinaryOp, ComparisonOp, Node, NodeId, NodeKind, ScalarValue, UnaryOp};
use crate::port::{InputPort, OutputPort, OutputPortRef, PortElements, PortType};
use crate::shape::TensorShape;

/// A dataflow graph of typed nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Node>", into = "Vec<Node>")]
pub struct Model {
    nodes: Vec<Node>,
    /// Index: node -> distinct nodes reading any of its outputs
    dependents: Vec<Vec<NodeId>>,
}

impl Model {
    /// Create a new empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node reading from `inputs`. Output ports are derived from the kind.
    pub fn add_node(&mut self, kind: NodeKind, inputs: Vec<PortElements>) -> Result<NodeId, ModelError> {
        let id = NodeId(self.nodes.len());
        let names = kind.input_names();

        let mut input_ports = Vec::with_capacity(inputs.len());
        let mut signature = Vec::with_capacity(inputs.len());
        for (i, elements) in inputs.into_iter().enumerate() {
            let port_type = self.elements_type(&elements)?;
            signature.push((port_type, elements.size()));
            input_ports.push(InputPort {
                name: names.get(i).copied().unwrap_or("input").to_string(),
                port_type,
                elements,
            });
        }

        let outputs = kind.output_ports(&signature)?;

        let mut parents = Vec::new();
        for input in &input_ports {
            for port in input.elements.referenced_ports() {
                if !parents.contains(&port.node) {
                    parents.push(port.node);
                }
            }
        }
        for parent in parents {
            self.dependents[parent.0].push(id);
        }

        self.nodes.push(Node {
            id,
            kind,
            inputs: input_ports,
            outputs,
        });
        self.dependents.push(Vec::new());
        Ok(id)
    }

    pub fn add_input(&mut self, port_type: PortType, shape: TensorShape) -> Result<NodeId, ModelError> {
        self.add_node(NodeKind::Input { port_type, shape }, vec![])
    }

    /// Append an output node. `shape` must cover exactly the selected elements.
    pub fn add_output(&mut self, elements: PortElements, shape: TensorShape) -> Result<NodeId, ModelError> {
        if shape.size() != elements.size() {
            return Err(ModelError::SizeMismatch {
                context: format!("output shape {shape}"),
                expected: shape.size(),
                found: elements.size(),
            });
        }
        self.add_node(NodeKind::Output { shape }, vec![elements])
    }

    /// Append an output node that records `shape` as given, even when it
    /// describes more or fewer elements than `elements` selects.
    pub fn add_terminal_output(
        &mut self,
        elements: PortElements,
        shape: TensorShape,
    ) -> Result<NodeId, ModelError> {
        self.add_node(NodeKind::Output { shape }, vec![elements])
    }

    pub fn add_constant(&mut self, values: Vec<ScalarValue>) -> Result<NodeId, ModelError> {
        self.add_node(NodeKind::Constant { values }, vec![])
    }

    pub fn add_binary(
        &mut self,
        op: BinaryOp,
        lhs: PortElements,
        rhs: PortElements,
    ) -> Result<NodeId, ModelError> {
        self.add_node(NodeKind::Binary(op), vec![lhs, rhs])
    }

    pub fn add_unary(&mut self, op: UnaryOp, input: PortElements) -> Result<NodeId, ModelError> {
        self.add_node(NodeKind::Unary(op), vec![input])
    }

    pub fn add_comparison(
        &mut self,
        op: ComparisonOp,
        lhs: PortElements,
        rhs: PortElements,
    ) -> Result<NodeId, ModelError> {
        self.add_node(NodeKind::Comparison(op), vec![lhs, rhs])
    }

    pub fn add_affine(&mut self, input: PortElements, scale: f64, offset: f64) -> Result<NodeId, ModelError> {
        self.add_node(NodeKind::Affine { scale, offset }, vec![input])
    }

    pub fn add_sum(&mut self, input: PortElements) -> Result<NodeId, ModelError> {
        self.add_node(NodeKind::Sum, vec![input])
    }

    /// Look up a node by ID.
    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Look up a node by ID, failing if absent.
    pub fn node(&self, id: NodeId) -> Result<&Node, ModelError> {
        self.get_node(id).ok_or(ModelError::NodeNotFound(id))
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Number of nodes in the model.
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn output_port(&self, port: OutputPortRef) -> Option<&OutputPort> {
        self.get_node(port.node)?.output(port.port)
    }

    pub fn port_size(&self, port: OutputPortRef) -> Option<usize> {
        self.output_port(port).map(|p| p.size)
    }

    /// All lanes of one output port.
    pub fn full_port(&self, node: NodeId, port: usize) -> Result<PortElements, ModelError> {
        let output_port = self
            .node(node)?
            .output(port)
            .ok_or(ModelError::PortOutOfRange { node, port })?;
        Ok(PortElements::full(
            OutputPortRef::new(node, port),
            output_port.size,
        ))
    }

    /// Element type of a selection; every range must agree and be in bounds.
    pub fn elements_type(&self, elements: &PortElements) -> Result<PortType, ModelError> {
        let mut port_type = None;
        for range in elements.ranges() {
            let node = self.node(range.port.node)?;
            let output = node.output(range.port.port).ok_or(ModelError::PortOutOfRange {
                node: range.port.node,
                port: range.port.port,
            })?;
            if range.end() > output.size {
                return Err(ModelError::ElementsOutOfRange {
                    port: range.port,
                    start: range.start,
                    end: range.end(),
                    size: output.size,
                });
            }
            match port_type {
                None => port_type = Some(output.port_type),
                Some(expected) if expected != output.port_type => {
                    return Err(ModelError::TypeMismatch {
                        context: format!("elements of {}", range.port),
                        expected,
                        found: output.port_type,
                    });
                }
                Some(_) => {}
            }
        }
        Ok(port_type.unwrap_or(PortType::None))
    }

    /// Distinct nodes that read any output of `id`.
    pub fn dependent_nodes(&self, id: NodeId) -> &[NodeId] {
        self.dependents
            .get(id.0)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Whether exactly one node in the whole model consumes the outputs of `id`.
    pub fn has_single_descendant(&self, id: NodeId) -> bool {
        self.dependent_nodes(id).len() == 1
    }

    /// Distinct nodes producing the lanes read by `input`.
    pub fn parent_nodes(&self, input: &InputPort) -> Vec<NodeId> {
        let mut parents = Vec::new();
        for port in input.elements.referenced_ports() {
            if !parents.contains(&port.node) {
                parents.push(port.node);
            }
        }
        parents
    }

    /// Nodes reading from one particular output port.
    pub fn consumers(&self, port: OutputPortRef) -> Vec<NodeId> {
        self.dependent_nodes(port.node)
            .iter()
            .copied()
            .filter(|&dep| {
                self.nodes[dep.0]
                    .inputs
                    .iter()
                    .any(|input| input.elements.ranges().iter().any(|r| r.port == port))
            })
            .collect()
    }

    /// Node IDs in dependency order.
    pub fn topological_order(&self) -> Vec<NodeId> {
        (0..self.nodes.len()).map(NodeId).collect()
    }

    pub fn input_nodes(&self) -> Vec<NodeId> {
        self.nodes_matching(|kind| matches!(kind, NodeKind::Input { .. }))
    }

    pub fn output_nodes(&self) -> Vec<NodeId> {
        self.nodes_matching(|kind| matches!(kind, NodeKind::Output { .. }))
    }

    fn nodes_matching(&self, pred: impl Fn(&NodeKind) -> bool) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| pred(&n.kind))
            .map(|n| n.id)
            .collect()
    }
}

impl TryFrom<Vec<Node>> for Model {
    type Error = ModelError;

    fn try_from(nodes: Vec<Node>) -> Result<Self, Self::Error> {
        let mut model = Model::new();
        for (index, node) in nodes.into_iter().enumerate() {
            for input in &node.inputs {
                for port in input.elements.referenced_ports() {
                    if port.node.0 >= index {
                        return Err(ModelError::ForwardReference {
                            node: NodeId(index),
                            referenced: port.node,
                        });
                    }
                }
            }
            let inputs = node.inputs.into_iter().map(|i| i.elements).collect();
            model.add_node(node.kind, inputs)?;
        }
        Ok(model)
    }
}

impl From<Model> for Vec<Node> {
    fn from(model: Model) -> Self {
        model.nodes
    }
}

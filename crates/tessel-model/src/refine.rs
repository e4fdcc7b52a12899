//! Model refinement: rewrite nodes into more primitive subgraphs.
//!
//! Refinement rebuilds the model in dependency order. A per-node policy
//! decides whether each node is kept as-is or replaced by its expansion;
//! downstream references and map bindings are remapped to the replacement.
//! Passes repeat until the policy asks for no further refinement.

use std::collections::HashMap;

use crate::error::ModelError;
use crate::map::{Map, MapInput, MapOutput};
use crate::model::Model;
use crate::node::{BinaryOp, Node, NodeKind, ScalarValue};
use crate::port::{OutputPortRef, PortElements};

/// Upper bound on refinement passes used when none is configured.
pub const DEFAULT_MAX_REFINEMENT_ITERATIONS: usize = 10;

/// What to do with a node during refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAction {
    /// Keep the node; the consumer can handle it directly.
    Compile,
    /// Replace the node with its expansion.
    Refine,
}

/// Policy and limits for a refinement run.
pub struct TransformContext<'a> {
    policy: Box<dyn Fn(&Node) -> NodeAction + 'a>,
    max_iterations: usize,
}

impl<'a> TransformContext<'a> {
    pub fn new(policy: impl Fn(&Node) -> NodeAction + 'a) -> Self {
        Self {
            policy: Box::new(policy),
            max_iterations: DEFAULT_MAX_REFINEMENT_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn action(&self, node: &Node) -> NodeAction {
        (self.policy)(node)
    }
}

impl Map {
    /// Refine until every node is marked [`NodeAction::Compile`].
    ///
    /// Returns the number of rewriting passes performed.
    pub fn refine(&mut self, context: &TransformContext<'_>) -> Result<usize, ModelError> {
        let mut passes = 0;
        loop {
            let pending = self
                .model()
                .nodes()
                .iter()
                .filter(|n| context.action(n) == NodeAction::Refine)
                .count();
            if pending == 0 {
                log::debug!("refinement converged after {passes} pass(es)");
                return Ok(passes);
            }
            if passes >= context.max_iterations {
                return Err(ModelError::RefinementDidNotConverge { iterations: passes });
            }
            log::debug!("refinement pass {}: {pending} node(s) to refine", passes + 1);
            self.refine_pass(context)?;
            passes += 1;
        }
    }

    fn refine_pass(&mut self, context: &TransformContext<'_>) -> Result<(), ModelError> {
        let old = self.model();
        let mut new = Model::new();
        let mut ports: HashMap<OutputPortRef, PortElements> = HashMap::new();
        let mut node_ids = HashMap::new();

        for node in old.nodes() {
            let inputs = node
                .inputs
                .iter()
                .map(|input| remap(&input.elements, &ports))
                .collect::<Result<Vec<_>, _>>()?;

            let outputs = match context.action(node) {
                NodeAction::Compile => {
                    let id = new.add_node(node.kind.clone(), inputs)?;
                    node_ids.insert(node.id, id);
                    (0..node.outputs.len())
                        .map(|port| new.full_port(id, port))
                        .collect::<Result<Vec<_>, _>>()?
                }
                NodeAction::Refine => expand(node, &mut new, inputs)?.ok_or_else(|| {
                    ModelError::CannotRefine {
                        node: node.id,
                        kind: node.kind.to_string(),
                    }
                })?,
            };

            for (port, elements) in outputs.into_iter().enumerate() {
                ports.insert(OutputPortRef::new(node.id, port), elements);
            }
        }

        let (old_inputs, old_outputs) = self.bindings();
        let inputs = old_inputs
            .iter()
            .map(|input| {
                node_ids
                    .get(&input.node)
                    .map(|&node| MapInput {
                        name: input.name.clone(),
                        node,
                    })
                    .ok_or(ModelError::CannotRefine {
                        node: input.node,
                        kind: "Input".into(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = old_outputs
            .iter()
            .map(|output| {
                Ok(MapOutput {
                    name: output.name.clone(),
                    elements: remap(&output.elements, &ports)?,
                })
            })
            .collect::<Result<Vec<_>, ModelError>>()?;

        self.replace(new, inputs, outputs);
        Ok(())
    }
}

/// Translate a selection over the old model into the new one.
fn remap(
    elements: &PortElements,
    ports: &HashMap<OutputPortRef, PortElements>,
) -> Result<PortElements, ModelError> {
    let mut parts = Vec::with_capacity(elements.ranges().len());
    for range in elements.ranges() {
        let mapped = ports
            .get(&range.port)
            .ok_or(ModelError::NodeNotFound(range.port.node))?;
        let part = mapped
            .slice(range.start, range.count)
            .ok_or(ModelError::ElementsOutOfRange {
                port: range.port,
                start: range.start,
                end: range.end(),
                size: mapped.size(),
            })?;
        parts.push(part);
    }
    Ok(PortElements::concat(parts))
}

/// Build the replacement subgraph for `node`, returning its output selections.
fn expand(
    node: &Node,
    model: &mut Model,
    inputs: Vec<PortElements>,
) -> Result<Option<Vec<PortElements>>, ModelError> {
    match &node.kind {
        NodeKind::Affine { scale, offset } => {
            let input = inputs.into_iter().next().ok_or(ModelError::InvalidNode {
                kind: node.kind.to_string(),
                reason: "missing input".into(),
            })?;
            let port_type = model.elements_type(&input)?;
            let size = input.size();
            let broadcast = |value: f64| {
                ScalarValue::from_f64(port_type, value)
                    .map(|v| vec![v; size])
                    .ok_or(ModelError::InvalidNode {
                        kind: node.kind.to_string(),
                        reason: format!("cannot express {value} as {port_type}"),
                    })
            };

            let scale_id = model.add_constant(broadcast(*scale)?)?;
            let scaled = model.add_binary(BinaryOp::Multiply, input, model.full_port(scale_id, 0)?)?;
            let offset_id = model.add_constant(broadcast(*offset)?)?;
            let shifted = model.add_binary(
                BinaryOp::Add,
                model.full_port(scaled, 0)?,
                model.full_port(offset_id, 0)?,
            )?;
            Ok(Some(vec![model.full_port(shifted, 0)?]))
        }
        _ => Ok(None),
    }
}

//! A model with named input and output bindings.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::model::Model;
use crate::node::NodeId;
use crate::port::{PortElements, PortType};

/// A named map input, bound to an input node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapInput {
    pub name: String,
    pub node: NodeId,
}

/// A named map output, bound to a selection of lanes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapOutput {
    pub name: String,
    pub elements: PortElements,
}

/// A model plus its boundary bindings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Map {
    model: Model,
    inputs: Vec<MapInput>,
    outputs: Vec<MapOutput>,
}

impl Map {
    /// Bind a model to named inputs and outputs.
    ///
    /// Every input must name an input node and every output must be a valid
    /// selection within the model.
    pub fn new(
        model: Model,
        inputs: Vec<(String, NodeId)>,
        outputs: Vec<(String, PortElements)>,
    ) -> Result<Self, ModelError> {
        let map = Self {
            model,
            inputs: inputs
                .into_iter()
                .map(|(name, node)| MapInput { name, node })
                .collect(),
            outputs: outputs
                .into_iter()
                .map(|(name, elements)| MapOutput { name, elements })
                .collect(),
        };
        map.validate_bindings()?;
        Ok(map)
    }

    /// Parse a map from JSON, re-validating its bindings.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let map: Map = serde_json::from_str(json)?;
        map.validate_bindings()?;
        Ok(map)
    }

    pub fn to_json(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn validate_bindings(&self) -> Result<(), ModelError> {
        for input in &self.inputs {
            let node = self.model.node(input.node)?;
            if node.shape().is_none() || !node.inputs.is_empty() {
                return Err(ModelError::InvalidNode {
                    kind: node.kind.to_string(),
                    reason: format!("map input '{}' must bind an input node", input.name),
                });
            }
        }
        for output in &self.outputs {
            self.model.elements_type(&output.elements)?;
        }
        Ok(())
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Mutable access for passes that splice nodes into the model.
    pub fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    pub fn num_input_ports(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_output_ports(&self) -> usize {
        self.outputs.len()
    }

    pub fn input_name(&self, index: usize) -> Option<&str> {
        self.inputs.get(index).map(|i| i.name.as_str())
    }

    pub fn output_name(&self, index: usize) -> Option<&str> {
        self.outputs.get(index).map(|o| o.name.as_str())
    }

    /// The input node bound at `index`.
    pub fn input_node(&self, index: usize) -> Result<NodeId, ModelError> {
        self.inputs
            .get(index)
            .map(|i| i.node)
            .ok_or(ModelError::BindingNotFound(index))
    }

    /// The lanes bound to output `index`.
    pub fn output(&self, index: usize) -> Result<&PortElements, ModelError> {
        self.outputs
            .get(index)
            .map(|o| &o.elements)
            .ok_or(ModelError::BindingNotFound(index))
    }

    /// Element type of output `index`.
    pub fn output_type(&self, index: usize) -> Result<PortType, ModelError> {
        self.model.elements_type(self.output(index)?)
    }

    /// Whether output `index` covers exactly one whole port.
    pub fn is_full_port_output(&self, index: usize) -> Result<bool, ModelError> {
        Ok(self
            .output(index)?
            .is_full_port_output(|port| self.model.port_size(port)))
    }

    /// Rebind output `index` to new lanes.
    pub fn reset_output(&mut self, index: usize, elements: PortElements) -> Result<(), ModelError> {
        self.model.elements_type(&elements)?;
        let output = self
            .outputs
            .get_mut(index)
            .ok_or(ModelError::BindingNotFound(index))?;
        output.elements = elements;
        Ok(())
    }

    /// Total number of input lanes across all inputs.
    pub fn input_size(&self) -> usize {
        self.inputs
            .iter()
            .filter_map(|i| self.model.port_size(crate::port::OutputPortRef::new(i.node, 0)))
            .sum()
    }

    /// Total number of output lanes across all outputs.
    pub fn output_size(&self) -> usize {
        self.outputs.iter().map(|o| o.elements.size()).sum()
    }

    /// Input nodes of the underlying model, in declaration order.
    pub fn input_nodes(&self) -> Vec<NodeId> {
        self.model.input_nodes()
    }

    /// Output nodes of the underlying model, in declaration order.
    pub fn output_nodes(&self) -> Vec<NodeId> {
        self.model.output_nodes()
    }

    pub(crate) fn replace(&mut self, model: Model, inputs: Vec<MapInput>, outputs: Vec<MapOutput>) {
        self.model = model;
        self.inputs = inputs;
        self.outputs = outputs;
    }

    pub(crate) fn bindings(&self) -> (&[MapInput], &[MapOutput]) {
        (&self.inputs, &self.outputs)
    }
}

//! Port and port-element resolution.
//!
//! Every output port a consumer reads must have a variable bound to it by
//! the time the consumer is compiled. Reading an element then depends on
//! the variable's [`Indirection`]: a `Value` variable is the data itself,
//! a `Reference` variable is an address that must be loaded from.

use tessel_emit::{EmitterError, Indirection, Literal, Value, Variable, VariableId};
use tessel_model::{InputPort, Model, OutputPortRef, PortElement};

use crate::compiler::MapCompiler;
use crate::error::CompileError;
use crate::nodes;

impl MapCompiler {
    /// Bind `port` to `variable`, replacing any earlier binding.
    pub fn set_port_variable(&mut self, port: OutputPortRef, variable: VariableId) {
        self.port_variables.insert(port, variable);
    }

    /// The variable bound to `port`, if any.
    pub fn port_variable(&self, port: OutputPortRef) -> Option<VariableId> {
        self.port_variables.get(&port).copied()
    }

    fn bound_variable(&self, port: OutputPortRef) -> Result<VariableId, CompileError> {
        self.port_variable(port)
            .ok_or_else(|| EmitterError::VariableNotFound(port.to_string()).into())
    }

    /// The variable holding `element`, checked against its lane count.
    pub fn get_port_element_variable(&self, element: PortElement) -> Result<VariableId, CompileError> {
        let id = self.bound_variable(element.port)?;
        let variable = self.module.variable(id)?;
        if variable.scalar && element.index > 0 {
            return Err(EmitterError::VectorVariableExpected.into());
        }
        if element.index >= variable.dimension {
            return Err(EmitterError::IndexOutOfRange {
                index: element.index,
                dimension: variable.dimension,
            }
            .into());
        }
        Ok(id)
    }

    /// The variable holding the first lane read by `input`.
    pub fn get_port_variable(&self, input: &InputPort) -> Result<VariableId, CompileError> {
        self.get_port_element_variable(first_element(input)?)
    }

    /// The variable bound to `port`, allocating local storage if the port
    /// has none yet.
    pub fn get_or_allocate_port_variable(
        &mut self,
        model: &Model,
        port: OutputPortRef,
    ) -> Result<VariableId, CompileError> {
        if let Some(id) = self.port_variable(port) {
            return Ok(id);
        }
        let ty = nodes::port_ir_type(model, port)?;
        let size = model
            .port_size(port)
            .ok_or(tessel_model::ModelError::PortOutOfRange {
                node: port.node,
                port: port.port,
            })?;
        let name = port.to_string().replace('.', "_");
        let variable = if size == 1 {
            Variable::local_scalar(name, ty)
        } else {
            Variable::local_vector(name, ty, size)
        };
        let id = self.module.add_variable(variable);
        self.set_port_variable(port, id);
        Ok(id)
    }

    /// Materialize the storage of an output port.
    pub fn ensure_port_emitted(&mut self, model: &Model, port: OutputPortRef) -> Result<Value, CompileError> {
        let id = self.get_or_allocate_port_variable(model, port)?;
        Ok(self.module.ensure_emitted(id)?)
    }

    /// Materialize the storage holding `element`.
    pub fn ensure_port_element_emitted(&mut self, element: PortElement) -> Result<Value, CompileError> {
        let id = self.get_port_element_variable(element)?;
        Ok(self.module.ensure_emitted(id)?)
    }

    /// The value of one lane, loading it if the lane lives in memory.
    pub fn load_port_element_variable(&mut self, element: PortElement) -> Result<Value, CompileError> {
        let id = self.get_port_element_variable(element)?;
        let stored = self.module.ensure_emitted(id)?;
        let (indirection, scalar) = {
            let variable = self.module.variable(id)?;
            (variable.indirection, variable.scalar)
        };
        let function = self.function()?;
        let value = match (indirection, scalar) {
            (Indirection::Value, _) => stored,
            (Indirection::Reference, true) => function.load(stored)?,
            (Indirection::Reference, false) => {
                function.value_at(stored, nodes::lane(element.index)?)?
            }
        };
        Ok(value)
    }

    /// The value of the first lane read by `input`.
    pub fn load_port_variable(&mut self, input: &InputPort) -> Result<Value, CompileError> {
        self.load_port_element_variable(first_element(input)?)
    }

    /// Store `value` into lane `index` of `variable`.
    pub(crate) fn store_lane(&mut self, variable: VariableId, index: Value, value: Value) -> Result<(), CompileError> {
        let stored = self.module.ensure_emitted(variable)?;
        let (indirection, scalar) = {
            let v = self.module.variable(variable)?;
            (v.indirection, v.scalar)
        };
        let function = self.function()?;
        match (indirection, scalar) {
            (Indirection::Reference, true) => {
                if index != Value::Literal(Literal::Int32(0)) {
                    return Err(EmitterError::VectorVariableExpected.into());
                }
                function.store(stored, value)?;
            }
            (Indirection::Reference, false) => function.set_value_at(stored, index, value)?,
            (Indirection::Value, _) => {
                return Err(EmitterError::NotSupported(format!(
                    "store into value variable '{}'",
                    self.module.variable(variable)?.name
                ))
                .into())
            }
        }
        Ok(())
    }
}

fn first_element(input: &InputPort) -> Result<PortElement, CompileError> {
    input.element(0).ok_or_else(|| {
        EmitterError::IndexOutOfRange {
            index: 0,
            dimension: 0,
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_emit::{IrType, VariableScope};
    use tessel_model::{NodeId, PortType, ScalarValue, TensorShape};

    use crate::parameters::MapCompilerParameters;

    fn model() -> Model {
        let mut model = Model::new();
        model
            .add_input(PortType::Float32, TensorShape::vector(3))
            .unwrap();
        model.add_constant(vec![ScalarValue::Float32(2.0)]).unwrap();
        model
    }

    fn compiler() -> MapCompiler {
        let mut c = MapCompiler::new(MapCompilerParameters::default());
        c.module_mut()
            .begin_function("f", IrType::Void, vec![("input".into(), IrType::Float.pointer_to())])
            .unwrap();
        c
    }

    fn element(node: usize, index: usize) -> PortElement {
        PortElement {
            port: OutputPortRef::new(NodeId(node), 0),
            index,
        }
    }

    #[test]
    fn unbound_port_is_variable_not_found() {
        let c = compiler();
        let err = c.get_port_element_variable(element(0, 0)).unwrap_err();
        assert!(matches!(
            err,
            CompileError::Emitter(EmitterError::VariableNotFound(_))
        ));
    }

    #[test]
    fn scalar_lane_checks() {
        let mut c = compiler();
        let scalar = c
            .module_mut()
            .add_variable(Variable::scalar_literal("two", Literal::Float(2.0)));
        c.set_port_variable(OutputPortRef::new(NodeId(1), 0), scalar);

        assert_eq!(c.get_port_element_variable(element(1, 0)).unwrap(), scalar);
        assert!(matches!(
            c.get_port_element_variable(element(1, 1)),
            Err(CompileError::Emitter(EmitterError::VectorVariableExpected))
        ));
    }

    #[test]
    fn vector_lane_checks() {
        let mut c = compiler();
        let input = c.module_mut().add_variable(Variable::vector_argument(
            "input",
            VariableScope::Input,
            IrType::Float,
            3,
            0,
        ));
        c.set_port_variable(OutputPortRef::new(NodeId(0), 0), input);
        assert!(c.get_port_element_variable(element(0, 2)).is_ok());
        assert!(matches!(
            c.get_port_element_variable(element(0, 3)),
            Err(CompileError::Emitter(EmitterError::IndexOutOfRange {
                index: 3,
                dimension: 3
            }))
        ));
    }

    #[test]
    fn literal_scalar_loads_without_memory_access() {
        let mut c = compiler();
        let scalar = c
            .module_mut()
            .add_variable(Variable::scalar_literal("two", Literal::Float(2.0)));
        c.set_port_variable(OutputPortRef::new(NodeId(1), 0), scalar);
        let value = c.load_port_element_variable(element(1, 0)).unwrap();
        assert_eq!(value, Value::Literal(Literal::Float(2.0)));
    }

    #[test]
    fn vector_argument_loads_indexed_lane() {
        let mut c = compiler();
        let input = c.module_mut().add_variable(Variable::vector_argument(
            "input",
            VariableScope::Input,
            IrType::Float,
            3,
            0,
        ));
        c.set_port_variable(OutputPortRef::new(NodeId(0), 0), input);
        let value = c.load_port_element_variable(element(0, 2)).unwrap();
        assert_eq!(c.function().unwrap().value_type(&value).unwrap(), IrType::Float);
        let function = c.function().unwrap().function();
        let block = function.block(function.entry().unwrap()).unwrap();
        assert!(block
            .instructions
            .iter()
            .any(|i| matches!(i, tessel_emit::Instruction::ElementPtr { .. })));
    }

    fn alloca_count(c: &mut MapCompiler) -> usize {
        c.function()
            .unwrap()
            .function()
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter(|i| matches!(i, tessel_emit::Instruction::Alloca { .. }))
            .count()
    }

    #[test]
    fn port_storage_is_emitted_once() {
        let model = model();
        let mut c = compiler();
        let port = OutputPortRef::new(NodeId(0), 0);
        let first = c.ensure_port_emitted(&model, port).unwrap();
        let second = c.ensure_port_emitted(&model, port).unwrap();
        assert_eq!(first, second);
        assert_eq!(alloca_count(&mut c), 1);

        let id = c.port_variable(port).unwrap();
        assert_eq!(c.ensure_port_element_emitted(element(0, 2)).unwrap(), first);
        assert_eq!(c.get_port_element_variable(element(0, 1)).unwrap(), id);
        assert_eq!(alloca_count(&mut c), 1);
    }

    #[test]
    fn element_emission_checks_the_lane() {
        let model = model();
        let mut c = compiler();
        c.ensure_port_emitted(&model, OutputPortRef::new(NodeId(0), 0))
            .unwrap();
        assert!(matches!(
            c.ensure_port_element_emitted(element(0, 3)),
            Err(CompileError::Emitter(EmitterError::IndexOutOfRange { index: 3, .. }))
        ));
        assert!(matches!(
            c.ensure_port_element_emitted(element(1, 0)),
            Err(CompileError::Emitter(EmitterError::VariableNotFound(_)))
        ));
    }

    #[test]
    fn input_port_reads_its_first_lane() {
        let mut model = model();
        let neg = model
            .add_unary(
                tessel_model::UnaryOp::Negate,
                model.full_port(NodeId(0), 0).unwrap(),
            )
            .unwrap();
        let input_port = model.node(neg).unwrap().inputs[0].clone();

        let mut c = compiler();
        let input = c.module_mut().add_variable(Variable::vector_argument(
            "input",
            VariableScope::Input,
            IrType::Float,
            3,
            0,
        ));
        c.set_port_variable(OutputPortRef::new(NodeId(0), 0), input);

        assert_eq!(c.get_port_variable(&input_port).unwrap(), input);
        let value = c.load_port_variable(&input_port).unwrap();
        assert_eq!(c.function().unwrap().value_type(&value).unwrap(), IrType::Float);
        let function = c.function().unwrap().function();
        let block = function.block(function.entry().unwrap()).unwrap();
        assert!(block.instructions.iter().any(|i| matches!(
            i,
            tessel_emit::Instruction::ElementPtr {
                index: Value::Literal(Literal::Int32(0)),
                ..
            }
        )));
    }

    #[test]
    fn allocates_local_storage_once() {
        let model = model();
        let mut c = compiler();
        let port = OutputPortRef::new(NodeId(0), 0);
        let first = c.get_or_allocate_port_variable(&model, port).unwrap();
        let second = c.get_or_allocate_port_variable(&model, port).unwrap();
        assert_eq!(first, second);
        let variable = c.module().variable(first).unwrap();
        assert_eq!(variable.dimension, 3);
        assert!(variable.is_reference());
    }
}

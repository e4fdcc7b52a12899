//! Per-node code emission.
//!
//! Each [`NodeKind`] either binds storage for its output (inputs and
//! constants) or opens a region, emits its computation lane by lane, and
//! tries to merge that region into its parent's. Lanes are computed in a
//! loop when every operand is one contiguous range of a port in memory,
//! and unrolled otherwise.

use tessel_emit::{
    BinaryOp as IrBinaryOp, EmitterError, FunctionEmitter, IrType, Literal, Predicate, UnaryOp as IrUnaryOp,
    Value, Variable, VariableId,
};
use tessel_model::{
    BinaryOp, ComparisonOp, Model, Node, NodeKind, OutputPortRef, PortElements, PortType,
    ScalarValue, UnaryOp,
};

use crate::compiler::MapCompiler;
use crate::error::CompileError;

/// IR element type of a port type; `None` for types that have no runtime
/// representation.
pub fn ir_type(port_type: PortType) -> Option<IrType> {
    match port_type {
        PortType::Boolean => Some(IrType::Bool),
        PortType::Int32 => Some(IrType::Int32),
        PortType::Int64 => Some(IrType::Int64),
        PortType::Float32 => Some(IrType::Float),
        PortType::Float64 => Some(IrType::Double),
        PortType::None | PortType::Categorical => None,
    }
}

fn require_ir_type(port_type: PortType, context: impl FnOnce() -> String) -> Result<IrType, CompileError> {
    ir_type(port_type).ok_or_else(|| CompileError::TypeMismatch {
        context: context(),
        found: port_type,
    })
}

pub(crate) fn port_ir_type(model: &Model, port: OutputPortRef) -> Result<IrType, CompileError> {
    let output = model
        .output_port(port)
        .ok_or(tessel_model::ModelError::PortOutOfRange {
            node: port.node,
            port: port.port,
        })?;
    require_ir_type(output.port_type, || format!("port {port}"))
}

pub(crate) fn elements_ir_type(model: &Model, elements: &PortElements) -> Result<IrType, CompileError> {
    let port_type = model.elements_type(elements)?;
    require_ir_type(port_type, || "port elements".to_string())
}

/// Lane index as an `i32` literal.
pub(crate) fn lane(index: usize) -> Result<Value, CompileError> {
    let index = i32::try_from(index)
        .map_err(|_| EmitterError::NotSupported(format!("lane index {index}")))?;
    Ok(Value::Literal(Literal::Int32(index)))
}

fn literal(value: ScalarValue) -> Literal {
    match value {
        ScalarValue::Boolean(v) => Literal::Bool(v),
        ScalarValue::Int32(v) => Literal::Int32(v),
        ScalarValue::Int64(v) => Literal::Int64(v),
        ScalarValue::Float32(v) => Literal::Float(v),
        ScalarValue::Float64(v) => Literal::Double(v),
    }
}

/// Whether `node` can be emitted directly, without refinement.
pub fn is_compilable(node: &Node) -> bool {
    let kind_supported = match &node.kind {
        NodeKind::Affine { .. } => false,
        NodeKind::Input { .. }
        | NodeKind::Output { .. }
        | NodeKind::Constant { .. }
        | NodeKind::Binary(_)
        | NodeKind::Unary(_)
        | NodeKind::Comparison(_)
        | NodeKind::Sum => true,
    };
    kind_supported
        && node.inputs.iter().all(|i| ir_type(i.port_type).is_some())
        && node.outputs.iter().all(|o| ir_type(o.port_type).is_some())
}

/// Emit the code for one node.
pub fn compile_node(compiler: &mut MapCompiler, model: &Model, node: &Node) -> Result<(), CompileError> {
    match &node.kind {
        NodeKind::Input { .. } => {
            // The map input is bound before the walk; any other input node
            // has no source of data.
            let port = OutputPortRef::new(node.id, 0);
            if compiler.port_variable(port).is_none() {
                return Err(CompileError::InvalidArgument(format!(
                    "input node {} is not bound to the map input",
                    node.id
                )));
            }
            Ok(())
        }
        NodeKind::Constant { values } => compile_constant(compiler, model, node, values),
        NodeKind::Output { .. } => compile_elementwise(compiler, model, node, |_, args| Ok(args[0].clone())),
        NodeKind::Binary(op) => {
            let op = binary_op(*op);
            compile_elementwise(compiler, model, node, move |f, args| {
                f.binary(op, args[0].clone(), args[1].clone())
            })
        }
        NodeKind::Unary(op) => {
            let op = *op;
            compile_elementwise(compiler, model, node, move |f, args| unary(f, op, args[0].clone()))
        }
        NodeKind::Comparison(op) => {
            let predicate = predicate(*op);
            compile_elementwise(compiler, model, node, move |f, args| {
                f.compare(predicate, args[0].clone(), args[1].clone())
            })
        }
        NodeKind::Sum => compile_sum(compiler, model, node),
        NodeKind::Affine { .. } => Err(CompileError::UnsupportedNode {
            node: node.id.to_string(),
            kind: node.kind.to_string(),
        }),
    }
}

fn binary_op(op: BinaryOp) -> IrBinaryOp {
    match op {
        BinaryOp::Add => IrBinaryOp::Add,
        BinaryOp::Subtract => IrBinaryOp::Sub,
        BinaryOp::Multiply => IrBinaryOp::Mul,
        BinaryOp::Divide => IrBinaryOp::Div,
        BinaryOp::Minimum => IrBinaryOp::Min,
        BinaryOp::Maximum => IrBinaryOp::Max,
    }
}

fn predicate(op: ComparisonOp) -> Predicate {
    match op {
        ComparisonOp::Equal => Predicate::Eq,
        ComparisonOp::NotEqual => Predicate::Ne,
        ComparisonOp::Less => Predicate::Lt,
        ComparisonOp::LessOrEqual => Predicate::Le,
        ComparisonOp::Greater => Predicate::Gt,
        ComparisonOp::GreaterOrEqual => Predicate::Ge,
    }
}

fn unary(f: &mut FunctionEmitter, op: UnaryOp, x: Value) -> Result<Value, EmitterError> {
    match op {
        UnaryOp::Negate => f.unary(IrUnaryOp::Neg, x),
        UnaryOp::Square => f.binary(IrBinaryOp::Mul, x.clone(), x),
        UnaryOp::Abs => {
            let negated = f.unary(IrUnaryOp::Neg, x.clone())?;
            f.binary(IrBinaryOp::Max, x, negated)
        }
    }
}

fn compile_constant(
    compiler: &mut MapCompiler,
    model: &Model,
    node: &Node,
    values: &[ScalarValue],
) -> Result<(), CompileError> {
    let port = OutputPortRef::new(node.id, 0);
    let name = format!("const_{}", node.id);
    let variable = match values {
        [single] => Variable::scalar_literal(name, literal(*single)),
        // Uniform by construction; the port type is the element type.
        _ => Variable::vector_literal(
            name,
            port_ir_type(model, port)?,
            values.iter().copied().map(literal).collect(),
        ),
    };
    let id = compiler.module_mut().add_variable(variable);
    compiler.set_port_variable(port, id);
    Ok(())
}

/// Base address and first lane of every input, if each one is a single
/// contiguous range of an in-memory vector.
fn contiguous_sources(compiler: &mut MapCompiler, node: &Node) -> Result<Option<Vec<(Value, usize)>>, CompileError> {
    let mut sources = Vec::with_capacity(node.inputs.len());
    for input in &node.inputs {
        let [range] = input.elements.ranges() else {
            return Ok(None);
        };
        let Some(id) = compiler.port_variable(range.port) else {
            return Ok(None);
        };
        let variable = compiler.module().variable(id)?;
        if variable.scalar || !variable.is_reference() {
            return Ok(None);
        }
        let base = compiler.module_mut().ensure_emitted(id)?;
        sources.push((base, range.start));
    }
    Ok(Some(sources))
}

/// Read lane `index` (offset by `start`) from a contiguous source.
fn read_lane(f: &mut FunctionEmitter, base: &Value, start: usize, index: &Value) -> Result<Value, CompileError> {
    let index = if start == 0 {
        index.clone()
    } else {
        f.binary(IrBinaryOp::Add, index.clone(), lane(start)?)?
    };
    Ok(f.value_at(base.clone(), index)?)
}

fn compile_elementwise<F>(compiler: &mut MapCompiler, model: &Model, node: &Node, op: F) -> Result<(), CompileError>
where
    F: Fn(&mut FunctionEmitter, &[Value]) -> Result<Value, EmitterError>,
{
    compiler.new_node_region(node)?;
    let out_port = OutputPortRef::new(node.id, 0);
    let output = compiler.get_or_allocate_port_variable(model, out_port)?;
    let size = model.port_size(out_port).unwrap_or(0);

    let sources = if size > 1 {
        contiguous_sources(compiler, node)?
    } else {
        None
    };
    match sources {
        Some(sources) => {
            compiler.push_scope();
            let f = compiler.function()?;
            let lp = f.begin_for(size, &format!("{}.loop", node.id))?;
            let mut args = Vec::with_capacity(sources.len());
            for (base, start) in &sources {
                args.push(read_lane(f, base, *start, &lp.index)?);
            }
            let value = op(f, &args)?;
            let index = lp.index.clone();
            compiler.store_lane(output, index, value)?;
            compiler.function()?.end_for(lp)?;
            compiler.pop_scope()?;
        }
        None => {
            for i in 0..size {
                let args = node
                    .inputs
                    .iter()
                    .map(|input| {
                        let element = input.element(i).ok_or(EmitterError::IndexOutOfRange {
                            index: i,
                            dimension: input.size(),
                        })?;
                        compiler.load_port_element_variable(element)
                    })
                    .collect::<Result<Vec<_>, CompileError>>()?;
                let value = op(compiler.function()?, &args)?;
                compiler.store_lane(output, lane(i)?, value)?;
            }
        }
    }

    compiler.try_merge_node_region(model, node)?;
    Ok(())
}

fn compile_sum(compiler: &mut MapCompiler, model: &Model, node: &Node) -> Result<(), CompileError> {
    compiler.new_node_region(node)?;
    let out_port = OutputPortRef::new(node.id, 0);
    let output: VariableId = compiler.get_or_allocate_port_variable(model, out_port)?;
    let ty = port_ir_type(model, out_port)?;
    let input = node.inputs.first().ok_or_else(|| CompileError::UnsupportedNode {
        node: node.id.to_string(),
        kind: node.kind.to_string(),
    })?;
    let count = input.size();

    let total = match contiguous_sources(compiler, node)?.filter(|_| count > 1) {
        Some(sources) => {
            let zero = Literal::zero(&ty)
                .ok_or_else(|| EmitterError::NotSupported(format!("sum of {ty}")))?;
            compiler.push_scope();
            let f = compiler.function()?;
            let accumulator = f.alloca(ty, 1)?;
            f.store(accumulator.clone(), Value::Literal(zero))?;
            let lp = f.begin_for(count, &format!("{}.loop", node.id))?;
            let (base, start) = &sources[0];
            let x = read_lane(f, base, *start, &lp.index)?;
            let partial = f.load(accumulator.clone())?;
            let next = f.binary(IrBinaryOp::Add, partial, x)?;
            f.store(accumulator.clone(), next)?;
            f.end_for(lp)?;
            let total = f.load(accumulator)?;
            compiler.pop_scope()?;
            total
        }
        None => {
            let mut elements = input.elements.elements();
            let first = elements.next().ok_or(EmitterError::IndexOutOfRange {
                index: 0,
                dimension: 0,
            })?;
            let mut total = compiler.load_port_element_variable(first)?;
            for element in elements {
                let x = compiler.load_port_element_variable(element)?;
                total = compiler.function()?.binary(IrBinaryOp::Add, total, x)?;
            }
            total
        }
    };
    compiler.store_lane(output, lane(0)?, total)?;

    compiler.try_merge_node_region(model, node)?;
    Ok(())
}

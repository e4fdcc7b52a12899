//! The introspection API emitted next to every predict function.
//!
//! `<prefix>_GetInputSize`, `<prefix>_GetOutputSize` and
//! `<prefix>_GetNumNodes` return constants. `<prefix>_GetInputShape` and
//! `<prefix>_GetOutputShape` look up a shape by index with a chain of
//! compare-and-branch blocks and write it through an out pointer; an index
//! that matches nothing yields `(0, 0, 0)`.

use tessel_emit::{IrType, Literal, ModuleEmitter, Predicate, StructDef, Value};
use tessel_model::{Map, TensorShape};

use crate::error::CompileError;

pub const TENSOR_SHAPE_NAME: &str = "TensorShape";

fn int32(value: usize, what: &str) -> Result<Value, CompileError> {
    let value = i32::try_from(value)
        .map_err(|_| CompileError::InvalidArgument(format!("{what} {value} does not fit in an i32")))?;
    Ok(Value::Literal(Literal::Int32(value)))
}

/// Emit all five API functions for `map`.
pub fn emit_model_api_functions(module: &mut ModuleEmitter, prefix: &str, map: &Map) -> Result<(), CompileError> {
    emit_constant_function(module, &format!("{prefix}_GetInputSize"), map.input_size())?;
    emit_constant_function(module, &format!("{prefix}_GetOutputSize"), map.output_size())?;
    emit_constant_function(module, &format!("{prefix}_GetNumNodes"), map.model().size())?;

    let input_shapes = node_shapes(map, &map.input_nodes())?;
    emit_shape_function(module, &format!("{prefix}_GetInputShape"), &input_shapes)?;
    let output_shapes = node_shapes(map, &map.output_nodes())?;
    emit_shape_function(module, &format!("{prefix}_GetOutputShape"), &output_shapes)?;
    log::debug!(
        "emitted model API for {prefix}: {} input shape(s), {} output shape(s)",
        input_shapes.len(),
        output_shapes.len()
    );
    Ok(())
}

fn node_shapes(map: &Map, nodes: &[tessel_model::NodeId]) -> Result<Vec<TensorShape>, CompileError> {
    nodes
        .iter()
        .map(|&id| Ok(map.model().node(id)?.shape().unwrap_or_default()))
        .collect()
}

fn emit_constant_function(module: &mut ModuleEmitter, name: &str, value: usize) -> Result<(), CompileError> {
    let value = int32(value, name)?;
    module.begin_function(name, IrType::Int32, vec![])?;
    let f = module.current_function()?;
    f.include_in_header();
    f.ret(Some(value))?;
    module.end_function()?;
    Ok(())
}

/// The shape record type, declared on first use.
pub fn tensor_shape_type(module: &mut ModuleEmitter) -> Result<StructDef, CompileError> {
    if let Some(def) = module.get_struct(TENSOR_SHAPE_NAME) {
        return Ok(def.clone());
    }
    let def = module.declare_struct(
        TENSOR_SHAPE_NAME,
        vec![
            ("rows".into(), IrType::Int32),
            ("columns".into(), IrType::Int32),
            ("channels".into(), IrType::Int32),
        ],
    )?;
    module.include_type_in_header(TENSOR_SHAPE_NAME)?;
    Ok(def)
}

fn emit_shape_function(module: &mut ModuleEmitter, name: &str, shapes: &[TensorShape]) -> Result<(), CompileError> {
    let def = tensor_shape_type(module)?;
    module.begin_function(
        name,
        IrType::Void,
        vec![
            ("index".into(), IrType::Int32),
            ("shape".into(), def.ty().pointer_to()),
        ],
    )?;
    let f = module.current_function()?;
    f.include_in_header();

    let entry = f.current_block();
    let index = f.argument(0)?;
    let shape = f.argument(1)?;
    let mut fields = Vec::with_capacity(3);
    for field in 0..3 {
        fields.push(f.field_ptr(shape.clone(), &def, field)?);
    }

    let mut chain = vec![entry];
    for (i, s) in shapes.iter().enumerate() {
        let cond = f.detached_block(&format!("cond{i}"));
        let then = f.detached_block(&format!("then{i}"));
        let otherwise = f.detached_block(&format!("else{i}"));

        f.set_current_block(cond)?;
        let matches = f.compare(Predicate::Eq, index.clone(), int32(i, "shape index")?)?;
        f.cond_branch(matches, then, otherwise)?;

        f.set_current_block(then)?;
        for (ptr, extent) in fields.iter().zip([s.rows, s.columns, s.channels]) {
            f.store(ptr.clone(), int32(extent, "shape extent")?)?;
        }
        f.ret(None)?;

        chain.extend([cond, then, otherwise]);
    }

    let done = f.detached_block("done");
    f.set_current_block(done)?;
    for ptr in &fields {
        f.store(ptr.clone(), Value::Literal(Literal::Int32(0)))?;
    }
    f.ret(None)?;
    chain.push(done);

    f.concatenate_blocks(&chain)?;
    module.end_function()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_emit::interp::{Interpreter, RuntimeValue};
    use tessel_emit::{CompilerSettings, IrModule, Terminator};
    use tessel_model::{Model, PortType};

    fn map_with_shapes(inputs: &[TensorShape]) -> Map {
        let mut model = Model::new();
        let mut ids = Vec::new();
        for shape in inputs {
            ids.push(model.add_input(PortType::Float32, *shape).unwrap());
        }
        let out = model.full_port(ids[0], 0).unwrap();
        let bindings = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (format!("in{i}"), *id))
            .collect();
        Map::new(model, bindings, vec![("out".into(), out)]).unwrap()
    }

    fn emit(map: &Map) -> IrModule {
        let mut module = ModuleEmitter::new("m", CompilerSettings::default());
        emit_model_api_functions(&mut module, "m", map).unwrap();
        module.finish().unwrap()
    }

    fn shape_at(module: &IrModule, function: &str, index: i32) -> Vec<i32> {
        let mut interp = Interpreter::new(module).unwrap();
        let out = interp
            .alloc_zeroed(&IrType::Struct(TENSOR_SHAPE_NAME.into()), 1)
            .unwrap();
        interp
            .call(function, &[RuntimeValue::Int32(index), out])
            .unwrap();
        interp
            .read(out, 3)
            .unwrap()
            .into_iter()
            .map(|v| v.as_i64().unwrap() as i32)
            .collect()
    }

    #[test]
    fn constants_and_header_tags() {
        let map = map_with_shapes(&[TensorShape::new(2, 3, 1)]);
        let module = emit(&map);
        let mut interp = Interpreter::new(&module).unwrap();
        assert_eq!(
            interp.call("m_GetInputSize", &[]).unwrap(),
            Some(RuntimeValue::Int32(6))
        );
        assert_eq!(
            interp.call("m_GetNumNodes", &[]).unwrap(),
            Some(RuntimeValue::Int32(1))
        );
        assert_eq!(module.header_functions().count(), 5);
        assert_eq!(module.header_types, vec![TENSOR_SHAPE_NAME.to_string()]);
    }

    #[test]
    fn shape_type_is_declared_once() {
        let map = map_with_shapes(&[TensorShape::vector(1)]);
        let module = emit(&map);
        assert_eq!(
            module
                .structs
                .iter()
                .filter(|s| s.name == TENSOR_SHAPE_NAME)
                .count(),
            1
        );
    }

    #[test]
    fn dispatches_on_index() {
        let map = map_with_shapes(&[TensorShape::new(4, 1, 1), TensorShape::new(2, 2, 3)]);
        let module = emit(&map);
        assert_eq!(shape_at(&module, "m_GetInputShape", 0), vec![4, 1, 1]);
        assert_eq!(shape_at(&module, "m_GetInputShape", 1), vec![2, 2, 3]);
        assert_eq!(shape_at(&module, "m_GetInputShape", 2), vec![0, 0, 0]);
        assert_eq!(shape_at(&module, "m_GetInputShape", -1), vec![0, 0, 0]);
    }

    #[test]
    fn empty_shape_list_branches_straight_to_done() {
        let map = map_with_shapes(&[TensorShape::vector(2)]);
        let module = emit(&map);
        let function = module.function("m_GetOutputShape").unwrap();
        let entry = function.block(function.entry().unwrap()).unwrap();
        let done = function.find_block("done").unwrap();
        assert_eq!(entry.terminator, Some(Terminator::Branch(done)));
        assert_eq!(shape_at(&module, "m_GetOutputShape", 0), vec![0, 0, 0]);
    }

    #[test]
    fn chain_is_laid_out_linearly() {
        let map = map_with_shapes(&[TensorShape::vector(1), TensorShape::vector(2)]);
        let module = emit(&map);
        let function = module.function("m_GetInputShape").unwrap();
        let labels: Vec<&str> = function.block_labels();
        assert_eq!(
            labels,
            vec!["entry", "cond0", "then0", "else0", "cond1", "then1", "else1", "done"]
        );
    }
}

//! End-to-end tests: compile maps and run the generated code on the
//! reference interpreter.

use tessel_compile::{compile, CompileError, MapCompiler, MapCompilerParameters};
use tessel_emit::interp::{Interpreter, RuntimeValue};
use tessel_emit::{EmitterError, Instruction, IrModule, IrType};
use tessel_model::{
    BinaryOp, ComparisonOp, Map, Model, NodeKind, OutputPortRef, PortElements, PortType,
    ScalarValue, TensorShape, UnaryOp,
};

fn params(name: &str) -> MapCompilerParameters {
    MapCompilerParameters {
        module_name: name.into(),
        ..Default::default()
    }
}

fn map(model: Model, input: tessel_model::NodeId, output: PortElements) -> Map {
    Map::new(model, vec![("input".into(), input)], vec![("output".into(), output)])
        .expect("valid map")
}

/// One scalar float input, `y = x * 2 + 1`, bound to the map output.
fn affine_map() -> Map {
    let mut model = Model::new();
    let x = model
        .add_input(PortType::Float32, TensorShape::vector(1))
        .unwrap();
    let y = model
        .add_affine(model.full_port(x, 0).unwrap(), 2.0, 1.0)
        .unwrap();
    let out = model.full_port(y, 0).unwrap();
    map(model, x, out)
}

fn call_i32(module: &IrModule, function: &str) -> i32 {
    let mut interp = Interpreter::new(module).unwrap();
    match interp.call(function, &[]).unwrap() {
        Some(RuntimeValue::Int32(v)) => v,
        other => panic!("{function} returned {other:?}"),
    }
}

fn shape(module: &IrModule, function: &str, index: i32) -> (i64, i64, i64) {
    let mut interp = Interpreter::new(module).unwrap();
    let out = interp
        .alloc_zeroed(&IrType::Struct("TensorShape".into()), 1)
        .unwrap();
    interp
        .call(function, &[RuntimeValue::Int32(index), out])
        .unwrap();
    let v = interp.read(out, 3).unwrap();
    (
        v[0].as_i64().unwrap(),
        v[1].as_i64().unwrap(),
        v[2].as_i64().unwrap(),
    )
}

#[test]
fn affine_scenario() {
    let _ = env_logger::builder().is_test(true).try_init();
    let compiled = compile(affine_map(), params("affine")).expect("compile");
    let module = compiled.module();

    assert_eq!(compiled.predict(&[3.0]).unwrap(), vec![7.0]);
    assert_eq!(compiled.predict(&[-0.5]).unwrap(), vec![0.0]);

    assert_eq!(call_i32(module, "affine_GetInputSize"), 1);
    assert_eq!(call_i32(module, "affine_GetOutputSize"), 1);
    // Input, two constants, multiply, add.
    assert_eq!(call_i32(module, "affine_GetNumNodes"), 5);
    assert_eq!(shape(module, "affine_GetInputShape", 0), (1, 1, 1));
    assert_eq!(shape(module, "affine_GetInputShape", 1), (0, 0, 0));
    assert_eq!(shape(module, "affine_GetOutputShape", 0), (0, 0, 0));

    // The add joins the multiply's region: entry, multiply, epilogue.
    let predict = module.function("predict").unwrap();
    assert_eq!(predict.top_level_regions().count(), 3);
    assert!(predict.include_in_header);
    assert!(predict.include_in_predict_interface);
}

#[test]
fn num_nodes_counts_the_refined_graph() {
    let before = affine_map().model().size();
    let compiled = compile(affine_map(), params("m")).unwrap();
    let after = compiled.map().model().size();
    assert_ne!(before, after);
    assert_eq!(call_i32(compiled.module(), "m_GetNumNodes"), after as i32);
    assert!(compiled
        .map()
        .model()
        .nodes()
        .iter()
        .all(|n| !matches!(n.kind, NodeKind::Affine { .. })));
}

#[test]
fn port_count_errors_precede_code_generation() {
    let mut model = Model::new();
    let a = model
        .add_input(PortType::Float32, TensorShape::vector(1))
        .unwrap();
    let b = model
        .add_input(PortType::Float32, TensorShape::vector(1))
        .unwrap();
    let out = model.full_port(a, 0).unwrap();
    let two_inputs = Map::new(
        model.clone(),
        vec![("a".into(), a), ("b".into(), b)],
        vec![("out".into(), out.clone())],
    )
    .unwrap();
    assert!(matches!(
        compile(two_inputs, params("m")),
        Err(CompileError::InvalidArgument(_))
    ));

    let two_outputs = Map::new(
        model,
        vec![("a".into(), a)],
        vec![("x".into(), out.clone()), ("y".into(), out)],
    )
    .unwrap();
    assert!(matches!(
        compile(two_outputs, params("m")),
        Err(CompileError::InvalidArgument(_))
    ));
}

#[test]
fn vector_binary_runs_in_a_loop() {
    let mut model = Model::new();
    let x = model
        .add_input(PortType::Float64, TensorShape::new(2, 2, 1))
        .unwrap();
    let scale = model
        .add_constant(vec![
            ScalarValue::Float64(1.0),
            ScalarValue::Float64(2.0),
            ScalarValue::Float64(3.0),
            ScalarValue::Float64(4.0),
        ])
        .unwrap();
    let product = model
        .add_binary(
            BinaryOp::Multiply,
            model.full_port(x, 0).unwrap(),
            model.full_port(scale, 0).unwrap(),
        )
        .unwrap();
    let out = model.full_port(product, 0).unwrap();
    let compiled = compile(map(model, x, out), params("m")).unwrap();

    assert_eq!(
        compiled.predict(&[1.0, 1.0, 0.5, -1.0]).unwrap(),
        vec![1.0, 2.0, 1.5, -4.0]
    );
    let predict = compiled.module().function("predict").unwrap();
    assert!(predict
        .block_labels()
        .iter()
        .any(|label| label.contains("loop")));
    assert_eq!(shape(compiled.module(), "m_GetInputShape", 0), (2, 2, 1));
}

#[test]
fn unary_chain_and_sum() {
    let mut model = Model::new();
    let x = model
        .add_input(PortType::Float32, TensorShape::vector(3))
        .unwrap();
    let abs = model
        .add_unary(UnaryOp::Abs, model.full_port(x, 0).unwrap())
        .unwrap();
    let squared = model
        .add_unary(UnaryOp::Square, model.full_port(abs, 0).unwrap())
        .unwrap();
    let total = model.add_sum(model.full_port(squared, 0).unwrap()).unwrap();
    let out = model.full_port(total, 0).unwrap();
    let compiled = compile(map(model, x, out), params("m")).unwrap();

    assert_eq!(compiled.predict(&[1.0, -2.0, 3.0]).unwrap(), vec![14.0]);
    assert_eq!(call_i32(compiled.module(), "m_GetOutputSize"), 1);

    // Three single-consumer links collapse into one region.
    let predict = compiled.module().function("predict").unwrap();
    assert_eq!(predict.top_level_regions().count(), 3);
}

#[test]
fn shared_producer_keeps_consumers_apart() {
    let mut model = Model::new();
    let x = model
        .add_input(PortType::Float32, TensorShape::vector(1))
        .unwrap();
    let neg = model
        .add_unary(UnaryOp::Negate, model.full_port(x, 0).unwrap())
        .unwrap();
    let square = model
        .add_unary(UnaryOp::Square, model.full_port(neg, 0).unwrap())
        .unwrap();
    let sum = model
        .add_binary(
            BinaryOp::Add,
            model.full_port(neg, 0).unwrap(),
            model.full_port(square, 0).unwrap(),
        )
        .unwrap();
    let out = model.full_port(sum, 0).unwrap();
    let compiled = compile(map(model, x, out), params("m")).unwrap();

    // -x + x^2
    assert_eq!(compiled.predict(&[3.0]).unwrap(), vec![6.0]);

    // entry, negate, square, add, epilogue: nothing merges through the
    // negation, and the add has producers in two regions.
    let predict = compiled.module().function("predict").unwrap();
    assert_eq!(predict.top_level_regions().count(), 5);
}

#[test]
fn comparison_produces_booleans() {
    let mut model = Model::new();
    let x = model
        .add_input(PortType::Int32, TensorShape::vector(3))
        .unwrap();
    let limit = model
        .add_constant(vec![
            ScalarValue::Int32(0),
            ScalarValue::Int32(0),
            ScalarValue::Int32(0),
        ])
        .unwrap();
    let above = model
        .add_comparison(
            ComparisonOp::Greater,
            model.full_port(x, 0).unwrap(),
            model.full_port(limit, 0).unwrap(),
        )
        .unwrap();
    let out = model.full_port(above, 0).unwrap();
    let compiled = compile(map(model, x, out), params("m")).unwrap();

    let predict = compiled.module().function("predict").unwrap();
    assert_eq!(predict.params[1].1, IrType::Bool.pointer_to());
    assert_eq!(
        compiled.predict(&[-1.0, 0.0, 5.0]).unwrap(),
        vec![0.0, 0.0, 1.0]
    );
}

#[test]
fn partial_output_is_normalized() {
    let mut model = Model::new();
    let x = model
        .add_input(PortType::Float32, TensorShape::vector(4))
        .unwrap();
    let doubled = model
        .add_binary(
            BinaryOp::Add,
            model.full_port(x, 0).unwrap(),
            model.full_port(x, 0).unwrap(),
        )
        .unwrap();
    let port = OutputPortRef::new(doubled, 0);
    let swapped = PortElements::concat([
        PortElements::range(port, 2, 2),
        PortElements::range(port, 0, 2),
    ]);
    let compiled = compile(map(model, x, swapped), params("m")).unwrap();

    assert!(compiled.map().is_full_port_output(0).unwrap());
    assert_eq!(
        compiled.predict(&[1.0, 2.0, 3.0, 4.0]).unwrap(),
        vec![6.0, 8.0, 2.0, 4.0]
    );
    assert_eq!(shape(compiled.module(), "m_GetOutputShape", 0), (4, 1, 1));
    assert_eq!(shape(compiled.module(), "m_GetOutputShape", 1), (0, 0, 0));
}

#[test]
fn sliced_output_keeps_the_declared_output_shape() {
    let mut model = Model::new();
    let x = model
        .add_input(PortType::Float32, TensorShape::vector(4))
        .unwrap();
    let doubled = model
        .add_binary(
            BinaryOp::Add,
            model.full_port(x, 0).unwrap(),
            model.full_port(x, 0).unwrap(),
        )
        .unwrap();
    let out = model
        .add_output(model.full_port(doubled, 0).unwrap(), TensorShape::new(2, 2, 1))
        .unwrap();
    let half = PortElements::range(OutputPortRef::new(out, 0), 0, 2);
    let compiled = compile(map(model, x, half), params("m")).unwrap();

    assert_eq!(compiled.predict(&[1.0, 2.0, 3.0, 4.0]).unwrap(), vec![2.0, 4.0]);
    assert_eq!(call_i32(compiled.module(), "m_GetOutputSize"), 2);
    assert_eq!(shape(compiled.module(), "m_GetOutputShape", 0), (2, 2, 1));
}

#[test]
fn integer_affine_rejects_fractional_scale() {
    let int_affine = |scale: f64| {
        let mut model = Model::new();
        let x = model
            .add_input(PortType::Int32, TensorShape::vector(1))
            .unwrap();
        let y = model
            .add_affine(model.full_port(x, 0).unwrap(), scale, 1.0)
            .unwrap();
        let out = model.full_port(y, 0).unwrap();
        map(model, x, out)
    };

    let compiled = compile(int_affine(3.0), params("m")).unwrap();
    assert_eq!(compiled.predict(&[4.0]).unwrap(), vec![13.0]);

    let err = compile(int_affine(2.5), params("m")).unwrap_err();
    assert!(
        matches!(err, CompileError::Model(tessel_model::ModelError::InvalidNode { .. })),
        "{err:?}"
    );
}

#[test]
fn input_bound_straight_to_output_is_copied() {
    let mut model = Model::new();
    let x = model
        .add_input(PortType::Int64, TensorShape::vector(2))
        .unwrap();
    let out = model.full_port(x, 0).unwrap();
    let compiled = compile(map(model, x, out), params("m")).unwrap();
    assert_eq!(compiled.predict(&[7.0, -3.0]).unwrap(), vec![7.0, -3.0]);
}

#[test]
fn constant_output() {
    let mut model = Model::new();
    let x = model
        .add_input(PortType::Float32, TensorShape::vector(1))
        .unwrap();
    let c = model
        .add_constant(vec![ScalarValue::Float32(1.5), ScalarValue::Float32(-2.0)])
        .unwrap();
    let out = model.full_port(c, 0).unwrap();
    let compiled = compile(map(model, x, out), params("m")).unwrap();
    assert_eq!(compiled.predict(&[0.0]).unwrap(), vec![1.5, -2.0]);
}

#[test]
fn compiling_twice_is_deterministic() {
    let first = compile(affine_map(), params("m")).unwrap();
    let second = compile(affine_map(), params("m")).unwrap();
    assert_eq!(first.ir_text(), second.ir_text());
    assert_eq!(first.header(), second.header());
    for function in ["m_GetInputSize", "m_GetOutputSize", "m_GetNumNodes"] {
        assert_eq!(
            call_i32(first.module(), function),
            call_i32(second.module(), function)
        );
    }
    for index in -1..3 {
        assert_eq!(
            shape(first.module(), "m_GetInputShape", index),
            shape(second.module(), "m_GetInputShape", index)
        );
    }
}

#[test]
fn module_json_round_trips() {
    let compiled = compile(affine_map(), params("m")).unwrap();
    let json = compiled.module().to_json().unwrap();
    let restored: IrModule = serde_json::from_str(&json).unwrap();
    assert_eq!(&restored, compiled.module());
    let mut interp = Interpreter::new(&restored).unwrap();
    let input = interp.alloc(vec![RuntimeValue::Float(2.0)]);
    let output = interp.alloc_zeroed(&IrType::Float, 1).unwrap();
    interp.call("predict", &[input, output]).unwrap();
    assert_eq!(interp.read(output, 1).unwrap(), vec![RuntimeValue::Float(5.0)]);
}

#[test]
fn header_lists_the_public_surface() {
    let compiled = compile(affine_map(), params("affine")).unwrap();
    let header = compiled.header();
    for needle in [
        "typedef struct TensorShape",
        "int32_t affine_GetInputSize(void);",
        "int32_t affine_GetOutputSize(void);",
        "int32_t affine_GetNumNodes(void);",
        "void affine_GetInputShape(int32_t index, TensorShape* shape);",
        "void affine_GetOutputShape(int32_t index, TensorShape* shape);",
        "void predict(const float* input, float* output);",
    ] {
        assert!(header.contains(needle), "missing {needle:?} in\n{header}");
    }
}

#[test]
fn predict_can_be_left_out_of_the_header() {
    let parameters = MapCompilerParameters {
        include_in_header: false,
        ..params("m")
    };
    let compiled = compile(affine_map(), parameters).unwrap();
    assert!(!compiled.module().function("predict").unwrap().include_in_header);
    assert!(!compiled.header().contains("predict("));
    for api in ["m_GetInputSize", "m_GetNumNodes", "m_GetOutputShape"] {
        assert!(compiled.module().function(api).unwrap().include_in_header);
        assert!(compiled.header().contains(api), "missing {api}");
    }
}

#[test]
fn diagnostics_print_each_node() {
    let mut parameters = params("m");
    parameters.compiler_settings.include_diagnostic_info = true;
    let compiled = compile(affine_map(), parameters).unwrap();

    let mut interp = compiled.interpreter().unwrap();
    compiled.predict_with(&mut interp, &[1.0]).unwrap();
    let prints = interp.prints();
    assert_eq!(prints.len(), 2);
    assert!(prints[0].starts_with("Binary(Multiply) node"));
    assert!(prints[1].starts_with("Binary(Add) node"));
}

#[test]
fn no_diagnostics_by_default() {
    let compiled = compile(affine_map(), params("m")).unwrap();
    let printed = compiled
        .module()
        .functions
        .iter()
        .flat_map(|f| &f.blocks)
        .flat_map(|b| &b.instructions)
        .any(|i| matches!(i, Instruction::Print(_)));
    assert!(!printed);
}

#[test]
fn unsupported_port_type_is_a_type_mismatch() {
    let mut model = Model::new();
    let x = model
        .add_input(PortType::Categorical, TensorShape::vector(1))
        .unwrap();
    let out = model.full_port(x, 0).unwrap();
    let err = compile(map(model, x, out), params("m")).unwrap_err();
    assert!(
        matches!(
            err,
            CompileError::TypeMismatch { .. } | CompileError::Model(_)
        ),
        "{err}"
    );
}

#[test]
fn refinement_limit_is_honoured() {
    let parameters = MapCompilerParameters {
        max_refinement_iterations: 0,
        ..params("m")
    };
    assert!(matches!(
        MapCompiler::new(parameters).compile(affine_map()),
        Err(CompileError::Model(
            tessel_model::ModelError::RefinementDidNotConverge { .. }
        ))
    ));
}

#[test]
fn wrong_input_length_is_rejected() {
    let compiled = compile(affine_map(), params("m")).unwrap();
    assert!(matches!(
        compiled.predict(&[1.0, 2.0]),
        Err(CompileError::InvalidArgument(_))
    ));
}

#[test]
fn emitter_errors_surface_unchanged() {
    let mut compiler = MapCompiler::new(params("m"));
    assert!(matches!(
        compiler.function(),
        Err(CompileError::Emitter(EmitterError::NoActiveFunction))
    ));
}

#[cfg(feature = "llvm")]
mod llvm_tests {
    use super::*;
    use tessel_emit::llvm::EmitTarget;

    #[test]
    fn writes_llvm_ir() {
        let compiled = compile(affine_map(), params("affine")).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("affine.ll");
        compiled.write_llvm(EmitTarget::LlvmIr, &path).unwrap();
        let ir = std::fs::read_to_string(&path).unwrap();
        assert!(ir.contains("define void @predict"));
        assert!(ir.contains("define i32 @affine_GetNumNodes"));
    }

    #[test]
    fn writes_object_file() {
        let compiled = compile(affine_map(), params("affine")).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("affine.o");
        compiled.write_llvm(EmitTarget::ObjectFile, &path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}

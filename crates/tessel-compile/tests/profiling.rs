//! Profiling instrumentation, exercised on the reference interpreter.

use tessel_compile::{compile, CompiledMap, MapCompilerParameters};
use tessel_emit::interp::{Interpreter, RuntimeValue};
use tessel_emit::IrType;
use tessel_model::{BinaryOp, Map, Model, PortType, TensorShape, UnaryOp};

fn profiled_map() -> CompiledMap {
    let mut model = Model::new();
    let x = model
        .add_input(PortType::Float32, TensorShape::vector(4))
        .unwrap();
    let neg = model
        .add_unary(UnaryOp::Negate, model.full_port(x, 0).unwrap())
        .unwrap();
    let sum = model
        .add_binary(
            BinaryOp::Add,
            model.full_port(neg, 0).unwrap(),
            model.full_port(x, 0).unwrap(),
        )
        .unwrap();
    let out = model.full_port(sum, 0).unwrap();
    let map = Map::new(model, vec![("x".into(), x)], vec![("y".into(), out)]).unwrap();
    let parameters = MapCompilerParameters {
        module_name: "prof".into(),
        profile: true,
        ..Default::default()
    };
    compile(map, parameters).expect("compile")
}

fn counters(interp: &mut Interpreter<'_>, function: &str, index: Option<i32>) -> (i64, f64) {
    let out = interp
        .alloc_zeroed(&IrType::Struct("PerformanceCounters".into()), 1)
        .unwrap();
    let args = match index {
        Some(i) => vec![RuntimeValue::Int32(i), out],
        None => vec![out],
    };
    interp.call(function, &args).unwrap();
    let v = interp.read(out, 2).unwrap();
    (v[0].as_i64().unwrap(), v[1].as_f64().unwrap())
}

#[test]
fn counts_model_and_node_invocations() {
    let compiled = profiled_map();
    let mut interp = compiled.interpreter().unwrap();
    for _ in 0..3 {
        assert_eq!(
            compiled.predict_with(&mut interp, &[1.0, 2.0, 3.0, 4.0]).unwrap(),
            vec![0.0; 4]
        );
    }

    let (count, total) = counters(&mut interp, "prof_GetModelPerformanceCounters", None);
    assert_eq!(count, 3);
    assert!(total >= 0.0);

    let nodes = match interp.call("prof_GetNumProfiledNodes", &[]).unwrap() {
        Some(RuntimeValue::Int32(n)) => n,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(nodes as usize, compiled.map().model().size());
    for node in 0..nodes {
        let (count, _) = counters(&mut interp, "prof_GetNodePerformanceCounters", Some(node));
        assert_eq!(count, 3, "node {node}");
    }
}

#[test]
fn out_of_range_node_counters_are_zero() {
    let compiled = profiled_map();
    let mut interp = compiled.interpreter().unwrap();
    compiled
        .predict_with(&mut interp, &[1.0, 1.0, 1.0, 1.0])
        .unwrap();
    for index in [-1, 3, 100] {
        assert_eq!(
            counters(&mut interp, "prof_GetNodePerformanceCounters", Some(index)),
            (0, 0.0)
        );
    }
}

#[test]
fn reset_clears_counters() {
    let compiled = profiled_map();
    let mut interp = compiled.interpreter().unwrap();
    compiled
        .predict_with(&mut interp, &[1.0, 1.0, 1.0, 1.0])
        .unwrap();

    interp.call("prof_ResetModelProfilingInfo", &[]).unwrap();
    interp.call("prof_ResetNodeProfilingInfo", &[]).unwrap();
    assert_eq!(
        counters(&mut interp, "prof_GetModelPerformanceCounters", None),
        (0, 0.0)
    );
    assert_eq!(
        counters(&mut interp, "prof_GetNodePerformanceCounters", Some(1)),
        (0, 0.0)
    );
}

#[test]
fn profiling_shows_in_the_header() {
    let header = profiled_map().header();
    assert!(header.contains("#define prof_PROFILING 1"));
    assert!(header.contains("typedef struct PerformanceCounters"));
    assert!(header.contains("void prof_GetNodePerformanceCounters(int32_t index, PerformanceCounters* counters);"));
    assert!(header.contains("void prof_ResetNodeProfilingInfo(void);"));
}

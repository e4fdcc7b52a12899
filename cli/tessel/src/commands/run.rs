//! `tessel run`: compile a map and evaluate it on the reference interpreter.

use std::path::Path;

use anyhow::{Context, Result};
use tessel_compile::MapCompilerParameters;
use tessel_emit::interp::RuntimeValue;

use crate::config::load_map;

pub fn run(map_path: &Path, parameters: MapCompilerParameters, input: &[f64]) -> Result<()> {
    let profile = parameters.profile;
    let prefix = parameters.namespace_prefix().to_string();
    let map = load_map(map_path)?;
    let compiled = tessel_compile::compile(map, parameters)
        .with_context(|| format!("compiling {}", map_path.display()))?;

    let mut interp = compiled.interpreter()?;
    let output = compiled
        .predict_with(&mut interp, input)
        .context("running predict")?;
    for line in interp.prints() {
        println!("{line}");
    }
    let rendered: Vec<String> = output.iter().map(|v| v.to_string()).collect();
    println!("{}", rendered.join(", "));

    if profile {
        let counters = interp.alloc_zeroed(
            &tessel_emit::IrType::Struct(tessel_compile::profiler::PERFORMANCE_COUNTERS_NAME.into()),
            1,
        )?;
        interp.call(&format!("{prefix}_GetModelPerformanceCounters"), &[counters])?;
        let values = interp.read(counters, 2)?;
        if let [RuntimeValue::Int32(count), RuntimeValue::Double(total)] = values[..] {
            println!("model: {count} call(s), {total:.3} ms");
        }
    }
    Ok(())
}

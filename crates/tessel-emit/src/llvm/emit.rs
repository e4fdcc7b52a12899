//! Object, bitcode, and textual IR emission.

use std::path::Path;

use inkwell::module::Module;
use inkwell::targets::{
    CodeModel, FileType, InitializationConfig, RelocMode, Target, TargetMachine, TargetTriple,
};

use crate::error::EmitterError;
use crate::settings::{OptimizationLevel, TargetDevice};

/// Map a compiler optimization level to the LLVM code generation level.
pub fn to_llvm_opt_level(level: OptimizationLevel) -> inkwell::OptimizationLevel {
    match level {
        OptimizationLevel::Throughput => inkwell::OptimizationLevel::Aggressive,
        OptimizationLevel::MinimalSize => inkwell::OptimizationLevel::Less,
        OptimizationLevel::Balanced => inkwell::OptimizationLevel::Default,
        OptimizationLevel::Debug => inkwell::OptimizationLevel::None,
    }
}

/// The triple to compile for; an empty device triple means the host.
pub fn resolve_triple(device: &TargetDevice) -> TargetTriple {
    if device.is_host() {
        TargetMachine::get_default_triple()
    } else {
        TargetTriple::create(&device.triple)
    }
}

/// Emit an object file for `device`.
///
/// Returns the size in bytes of the emitted object file.
pub fn emit_object(
    module: &Module<'_>,
    device: &TargetDevice,
    opt_level: OptimizationLevel,
    output_path: &Path,
) -> Result<u64, EmitterError> {
    let triple = resolve_triple(device);
    let triple_name = triple.as_str().to_string_lossy().into_owned();
    init_target(&triple_name);

    let target = Target::from_triple(&triple).map_err(|e| EmitterError::Llvm {
        stage: "target".into(),
        message: format!("{triple_name}: {e}"),
    })?;
    let cpu = if device.cpu.is_empty() { "generic" } else { device.cpu.as_str() };
    let target_machine = target
        .create_target_machine(
            &triple,
            cpu,
            &device.features,
            to_llvm_opt_level(opt_level),
            RelocMode::PIC,
            CodeModel::Default,
        )
        .ok_or_else(|| EmitterError::Llvm {
            stage: "target".into(),
            message: format!("failed to create TargetMachine for {triple_name}"),
        })?;

    module.set_data_layout(&target_machine.get_target_data().get_data_layout());
    module.set_triple(&triple);

    target_machine
        .write_to_file(module, FileType::Object, output_path)
        .map_err(|e| EmitterError::Llvm {
            stage: "emit_object".into(),
            message: format!("failed to write object file: {e}"),
        })?;

    let size = std::fs::metadata(output_path).map(|m| m.len()).unwrap_or(0);
    log::info!(
        "wrote {} ({size} bytes) for {triple_name}",
        output_path.display()
    );
    Ok(size)
}

/// Emit LLVM IR as a string.
pub fn emit_llvm_ir(module: &Module<'_>) -> String {
    module.print_to_string().to_string()
}

/// Emit LLVM bitcode to a file.
pub fn emit_bitcode(module: &Module<'_>, output_path: &Path) -> Result<(), EmitterError> {
    if !module.write_bitcode_to_path(output_path) {
        return Err(EmitterError::Llvm {
            stage: "emit_bitcode".into(),
            message: format!("failed to write bitcode to {}", output_path.display()),
        });
    }
    Ok(())
}

fn init_target(triple: &str) {
    let config = InitializationConfig::default();

    if triple.starts_with("x86_64") || triple.starts_with("i686") || triple.starts_with("i386") {
        Target::initialize_x86(&config);
    } else if triple.starts_with("aarch64") {
        Target::initialize_aarch64(&config);
    } else if triple.starts_with("arm") || triple.starts_with("thumb") {
        Target::initialize_arm(&config);
    } else {
        Target::initialize_all(&config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkwell::context::Context;

    #[test]
    fn opt_level_mapping() {
        assert_eq!(
            to_llvm_opt_level(OptimizationLevel::Throughput),
            inkwell::OptimizationLevel::Aggressive
        );
        assert_eq!(
            to_llvm_opt_level(OptimizationLevel::Debug),
            inkwell::OptimizationLevel::None
        );
    }

    #[test]
    fn host_object_and_bitcode() {
        let context = Context::create();
        let module = context.create_module("empty");
        let i32_ty = context.i32_type();
        let f = module.add_function("seven", i32_ty.fn_type(&[], false), None);
        let builder = context.create_builder();
        builder.position_at_end(context.append_basic_block(f, "entry"));
        builder
            .build_return(Some(&i32_ty.const_int(7, false)))
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let object = dir.path().join("seven.o");
        let size = emit_object(
            &module,
            &TargetDevice::host(),
            OptimizationLevel::Balanced,
            &object,
        )
        .unwrap();
        assert!(size > 0);

        let bitcode = dir.path().join("seven.bc");
        emit_bitcode(&module, &bitcode).unwrap();
        assert!(bitcode.exists());
        assert!(emit_llvm_ir(&module).contains("@seven"));
    }
}

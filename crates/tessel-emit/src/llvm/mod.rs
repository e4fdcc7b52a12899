//! LLVM backend via inkwell.
//!
//! [`lower::lower_module`] turns a finished [`IrModule`] into an LLVM module;
//! [`write_module`] drives lowering and writes the artifact requested.

pub mod emit;
pub mod lower;
pub mod types;

use std::path::Path;

use inkwell::context::Context;

use crate::error::EmitterError;
use crate::ir::IrModule;
use crate::settings::CompilerSettings;

/// Artifact kinds the LLVM backend can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitTarget {
    LlvmIr,
    Bitcode,
    ObjectFile,
}

impl EmitTarget {
    /// Conventional file extension.
    pub fn extension(self) -> &'static str {
        match self {
            EmitTarget::LlvmIr => "ll",
            EmitTarget::Bitcode => "bc",
            EmitTarget::ObjectFile => "o",
        }
    }
}

/// Lower `ir` and write it to `path` as `target`.
pub fn write_module(
    ir: &IrModule,
    settings: &CompilerSettings,
    target: EmitTarget,
    path: &Path,
) -> Result<(), EmitterError> {
    let context = Context::create();
    let module = lower::lower_module(&context, ir)?;
    match target {
        EmitTarget::LlvmIr => {
            std::fs::write(path, emit::emit_llvm_ir(&module)).map_err(|e| EmitterError::Llvm {
                stage: "emit_llvm_ir".into(),
                message: format!("failed to write {}: {e}", path.display()),
            })?;
        }
        EmitTarget::Bitcode => emit::emit_bitcode(&module, path)?,
        EmitTarget::ObjectFile => {
            emit::emit_object(
                &module,
                &settings.target_device,
                settings.effective_opt_level(),
                path,
            )?;
        }
    }
    Ok(())
}

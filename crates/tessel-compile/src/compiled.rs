//! The result of compiling a map.

use tessel_emit::header::write_header;
use tessel_emit::interp::{InterpError, Interpreter, RuntimeValue};
use tessel_emit::{CompilerSettings, IrModule, IrType};
use tessel_model::Map;

use crate::error::CompileError;

/// A refined map together with the module generated from it.
#[derive(Debug, Clone)]
pub struct CompiledMap {
    map: Map,
    function_name: String,
    module: IrModule,
    settings: CompilerSettings,
}

impl CompiledMap {
    pub fn new(map: Map, function_name: String, module: IrModule, settings: CompilerSettings) -> Self {
        Self {
            map,
            function_name,
            module,
            settings,
        }
    }

    /// The map after validation and refinement.
    pub fn map(&self) -> &Map {
        &self.map
    }

    /// Name of the generated predict function.
    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn module(&self) -> &IrModule {
        &self.module
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    /// The C header for the tagged functions and types.
    pub fn header(&self) -> String {
        write_header(&self.module)
    }

    /// Textual IR of the whole module.
    pub fn ir_text(&self) -> String {
        self.module.to_string()
    }

    pub fn interpreter(&self) -> Result<Interpreter<'_>, CompileError> {
        Ok(Interpreter::new(&self.module)?)
    }

    fn element_type(&self, param: usize) -> Result<IrType, CompileError> {
        self.module
            .function(&self.function_name)
            .and_then(|f| f.params.get(param))
            .and_then(|(_, ty)| ty.pointee().cloned())
            .ok_or_else(|| InterpError::UnknownFunction(self.function_name.clone()).into())
    }

    /// Run the predict function on `input` with a fresh interpreter.
    pub fn predict(&self, input: &[f64]) -> Result<Vec<f64>, CompileError> {
        let mut interp = self.interpreter()?;
        self.predict_with(&mut interp, input)
    }

    /// Run the predict function on `input` with `interp`, so that global
    /// state such as profiling counters persists across calls.
    pub fn predict_with(&self, interp: &mut Interpreter<'_>, input: &[f64]) -> Result<Vec<f64>, CompileError> {
        let expected = self.map.input_size();
        if input.len() != expected {
            return Err(CompileError::InvalidArgument(format!(
                "expected {expected} input value(s), found {}",
                input.len()
            )));
        }
        let input_type = self.element_type(0)?;
        let output_type = self.element_type(1)?;
        let values = input
            .iter()
            .map(|&v| {
                RuntimeValue::from_f64(&input_type, v).ok_or_else(|| {
                    CompileError::InvalidArgument(format!("input type {input_type} is not a scalar"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output_size = self.map.output_size();
        let input_ptr = interp.alloc(values);
        let output_ptr = interp.alloc_zeroed(&output_type, output_size)?;
        interp.call(&self.function_name, &[input_ptr, output_ptr])?;
        interp
            .read(output_ptr, output_size)?
            .iter()
            .map(|v| {
                v.as_f64().ok_or_else(|| {
                    InterpError::TypeError(format!("output lane holds {v:?}")).into()
                })
            })
            .collect()
    }

    /// Lower the module through LLVM and write it to `path`.
    #[cfg(feature = "llvm")]
    pub fn write_llvm(
        &self,
        target: tessel_emit::llvm::EmitTarget,
        path: &std::path::Path,
    ) -> Result<(), CompileError> {
        tessel_emit::llvm::write_module(&self.module, &self.settings, target, path)?;
        Ok(())
    }
}

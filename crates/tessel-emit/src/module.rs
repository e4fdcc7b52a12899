//! Builder for a whole module.

use crate::error::EmitterError;
use crate::function::FunctionEmitter;
use crate::ir::{ExternDecl, GlobalDef, IrFunction, IrModule, Value};
use crate::settings::CompilerSettings;
use crate::types::{IrType, Literal, StructDef};
use crate::variable::{Indirection, Variable, VariableId, VariableScope, VariableTable};

/// Accumulates a module: finished functions, the stack of functions being
/// emitted, types, globals, and the variable table.
#[derive(Debug)]
pub struct ModuleEmitter {
    module: IrModule,
    functions: Vec<FunctionEmitter>,
    variables: VariableTable,
    settings: CompilerSettings,
}

impl ModuleEmitter {
    pub fn new(name: impl Into<String>, settings: CompilerSettings) -> Self {
        let module = IrModule {
            name: name.into(),
            target_triple: settings.target_device.triple.clone(),
            data_layout: settings.target_device.data_layout.clone(),
            ..IrModule::default()
        };
        Self {
            module,
            functions: Vec::new(),
            variables: VariableTable::new(),
            settings,
        }
    }

    pub fn name(&self) -> &str {
        &self.module.name
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    pub fn set_target_triple(&mut self, triple: impl Into<String>) {
        self.module.target_triple = triple.into();
    }

    pub fn set_data_layout(&mut self, layout: impl Into<String>) {
        self.module.data_layout = layout.into();
    }

    fn symbol_taken(&self, name: &str) -> bool {
        self.module.function(name).is_some()
            || self.module.global(name).is_some()
            || self.module.extern_decl(name).is_some()
            || self.functions.iter().any(|f| f.name() == name)
    }

    // --- Functions --------------------------------------------------------

    /// Start a new function; it becomes the current function until ended.
    pub fn begin_function(
        &mut self,
        name: &str,
        return_type: IrType,
        params: Vec<(String, IrType)>,
    ) -> Result<(), EmitterError> {
        if self.symbol_taken(name) {
            return Err(EmitterError::DuplicateSymbol(name.to_string()));
        }
        log::trace!("begin function {name}");
        self.functions
            .push(FunctionEmitter::new(name, return_type, params));
        Ok(())
    }

    pub fn current_function(&mut self) -> Result<&mut FunctionEmitter, EmitterError> {
        self.functions.last_mut().ok_or(EmitterError::NoActiveFunction)
    }

    pub fn current_function_ref(&self) -> Result<&FunctionEmitter, EmitterError> {
        self.functions.last().ok_or(EmitterError::NoActiveFunction)
    }

    pub fn has_current_function(&self) -> bool {
        !self.functions.is_empty()
    }

    /// Finish the current function and add it to the module.
    pub fn end_function(&mut self) -> Result<(), EmitterError> {
        let function = self.functions.pop().ok_or(EmitterError::NoActiveFunction)?;
        let finished = function.finish()?;
        log::trace!(
            "end function {} ({} blocks)",
            finished.name,
            finished.layout.len()
        );
        self.module.functions.push(finished);
        self.variables.clear_locals();
        Ok(())
    }

    /// A function already added to the module.
    pub fn function(&self, name: &str) -> Option<&IrFunction> {
        self.module.function(name)
    }

    // --- Types and symbols ------------------------------------------------

    /// Declare a struct type, or return the existing declaration of the same
    /// name if its fields match.
    pub fn declare_struct(
        &mut self,
        name: &str,
        fields: Vec<(String, IrType)>,
    ) -> Result<StructDef, EmitterError> {
        if let Some(existing) = self.module.struct_def(name) {
            if existing.fields == fields {
                return Ok(existing.clone());
            }
            return Err(EmitterError::DuplicateSymbol(name.to_string()));
        }
        let def = StructDef {
            name: name.to_string(),
            fields,
        };
        self.module.structs.push(def.clone());
        Ok(def)
    }

    pub fn get_struct(&self, name: &str) -> Option<&StructDef> {
        self.module.struct_def(name)
    }

    pub fn include_type_in_header(&mut self, name: &str) -> Result<(), EmitterError> {
        if self.module.struct_def(name).is_none() {
            return Err(EmitterError::UnknownStruct(name.to_string()));
        }
        if !self.module.header_types.iter().any(|t| t == name) {
            self.module.header_types.push(name.to_string());
        }
        Ok(())
    }

    /// Add a global; returns its address.
    pub fn add_global(&mut self, global: GlobalDef) -> Result<Value, EmitterError> {
        if self.symbol_taken(&global.name) {
            return Err(EmitterError::DuplicateSymbol(global.name));
        }
        let value = Value::Global {
            name: global.name.clone(),
            pointee: global.ty.clone(),
        };
        self.module.globals.push(global);
        Ok(value)
    }

    /// Address of an existing global.
    pub fn global_value(&self, name: &str) -> Result<Value, EmitterError> {
        self.module
            .global(name)
            .map(|g| Value::Global {
                name: g.name.clone(),
                pointee: g.ty.clone(),
            })
            .ok_or_else(|| EmitterError::VariableNotFound(name.to_string()))
    }

    /// Declare a runtime-provided function. Repeated identical declarations
    /// are allowed.
    pub fn declare_extern(&mut self, decl: ExternDecl) -> Result<(), EmitterError> {
        if let Some(existing) = self.module.extern_decl(&decl.name) {
            if *existing == decl {
                return Ok(());
            }
            return Err(EmitterError::DuplicateSymbol(decl.name));
        }
        if self.symbol_taken(&decl.name) {
            return Err(EmitterError::DuplicateSymbol(decl.name));
        }
        self.module.externs.push(decl);
        Ok(())
    }

    pub fn add_preprocessor_definition(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .module
            .preprocessor_definitions
            .iter_mut()
            .find(|(n, _)| *n == name)
        {
            Some(entry) => entry.1 = value,
            None => self.module.preprocessor_definitions.push((name, value)),
        }
    }

    pub fn has_preprocessor_definition(&self, name: &str) -> bool {
        self.module.has_definition(name)
    }

    // --- Variables --------------------------------------------------------

    pub fn add_variable(&mut self, variable: Variable) -> VariableId {
        self.variables.add(variable)
    }

    pub fn variable(&self, id: VariableId) -> Result<&Variable, EmitterError> {
        self.variables
            .get(id)
            .ok_or_else(|| EmitterError::VariableNotFound(format!("#{}", id.0)))
    }

    pub fn is_emitted(&self, id: VariableId) -> bool {
        self.variables.emitted(id).is_some()
    }

    fn unique_global_name(&self, base: &str) -> String {
        if !self.symbol_taken(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}_{n}"))
            .find(|candidate| !self.symbol_taken(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Materialize a variable on first use and return the value it was
    /// emitted as. Later calls return the cached value.
    pub fn ensure_emitted(&mut self, id: VariableId) -> Result<Value, EmitterError> {
        if let Some(value) = self.variables.emitted(id) {
            return Ok(value.clone());
        }
        let variable = self.variable(id)?.clone();
        let value = match variable.scope {
            VariableScope::Literal if variable.scalar => {
                let lit = variable
                    .initial_values
                    .first()
                    .copied()
                    .ok_or_else(|| EmitterError::VariableNotFound(variable.name.clone()))?;
                Value::Literal(lit)
            }
            VariableScope::Literal => {
                let name = self.unique_global_name(&format!("{}_{}", self.module.name, variable.name));
                self.add_global(GlobalDef {
                    name,
                    ty: variable.ty.clone().array_of(variable.dimension),
                    initializer: Some(variable.initial_values.clone()),
                    constant: true,
                })?
            }
            VariableScope::Global => {
                let name = self.unique_global_name(&format!("{}_{}", self.module.name, variable.name));
                let ty = if variable.scalar {
                    variable.ty.clone()
                } else {
                    variable.ty.clone().array_of(variable.dimension)
                };
                let initializer = (!variable.initial_values.is_empty())
                    .then(|| variable.initial_values.clone());
                self.add_global(GlobalDef {
                    name,
                    ty,
                    initializer,
                    constant: false,
                })?
            }
            VariableScope::Local => {
                let function = self.current_function()?;
                let ptr = function.alloca(variable.ty.clone(), variable.dimension)?;
                for (i, lit) in variable.initial_values.iter().enumerate() {
                    let index = Value::Literal(Literal::Int32(i as i32));
                    function.set_value_at(ptr.clone(), index, Value::Literal(*lit))?;
                }
                ptr
            }
            VariableScope::Input | VariableScope::Output => {
                let index = variable
                    .argument
                    .ok_or_else(|| EmitterError::VariableNotFound(variable.name.clone()))?;
                let function = self.current_function()?;
                let value = function.argument(index)?;
                let found = function.value_type(&value)?;
                let expected = match variable.indirection {
                    Indirection::Value => variable.ty.clone(),
                    Indirection::Reference => variable.ty.clone().pointer_to(),
                };
                if found != expected {
                    return Err(EmitterError::TypeMismatch {
                        context: format!("argument '{}'", variable.name),
                        expected,
                        found,
                    });
                }
                value
            }
        };
        self.variables.set_emitted(id, value.clone());
        Ok(value)
    }

    /// The finished module. Fails if a function is still open.
    pub fn finish(self) -> Result<IrModule, EmitterError> {
        if let Some(open) = self.functions.last() {
            return Err(EmitterError::UnfinishedFunction(open.name().to_string()));
        }
        Ok(self.module)
    }

    /// The module as built so far.
    pub fn module(&self) -> &IrModule {
        &self.module
    }
}

//! Variables: storage descriptors bound to graph ports.
//!
//! A variable describes *where* a value lives and *how* to read it. Emission
//! is deferred: nothing is materialized in the module until
//! [`crate::ModuleEmitter::ensure_emitted`] is first called for it.

use serde::{Deserialize, Serialize};

use crate::types::{IrType, Literal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableId(pub u32);

/// Where a variable's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VariableScope {
    /// Compile-time constant.
    Literal,
    /// Stack slot in the function being emitted.
    Local,
    /// Module global.
    Global,
    /// Parameter of the function being emitted.
    Input,
    /// Out-parameter of the function being emitted.
    Output,
}

/// How the emitted value relates to the data.
///
/// `Value` means the emitted value *is* the data (a literal or a scalar
/// passed in a register). `Reference` means it is the address of the data and
/// must be dereferenced to read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Indirection {
    Value,
    Reference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    /// Element type.
    pub ty: IrType,
    pub scope: VariableScope,
    pub indirection: Indirection,
    pub scalar: bool,
    /// Number of lanes; 1 for scalars.
    pub dimension: usize,
    pub initial_values: Vec<Literal>,
    /// Parameter index for `Input`/`Output` variables.
    pub argument: Option<u32>,
}

impl Variable {
    pub fn scalar_literal(name: impl Into<String>, value: Literal) -> Self {
        Self {
            name: name.into(),
            ty: value.ty(),
            scope: VariableScope::Literal,
            indirection: Indirection::Value,
            scalar: true,
            dimension: 1,
            initial_values: vec![value],
            argument: None,
        }
    }

    /// Constant lanes, emitted as a read-only global array.
    pub fn vector_literal(name: impl Into<String>, ty: IrType, values: Vec<Literal>) -> Self {
        Self {
            name: name.into(),
            ty,
            scope: VariableScope::Literal,
            indirection: Indirection::Reference,
            scalar: false,
            dimension: values.len(),
            initial_values: values,
            argument: None,
        }
    }

    pub fn local_scalar(name: impl Into<String>, ty: IrType) -> Self {
        Self {
            name: name.into(),
            ty,
            scope: VariableScope::Local,
            indirection: Indirection::Reference,
            scalar: true,
            dimension: 1,
            initial_values: Vec::new(),
            argument: None,
        }
    }

    pub fn local_vector(name: impl Into<String>, ty: IrType, dimension: usize) -> Self {
        Self {
            name: name.into(),
            ty,
            scope: VariableScope::Local,
            indirection: Indirection::Reference,
            scalar: false,
            dimension,
            initial_values: Vec::new(),
            argument: None,
        }
    }

    pub fn global_vector(name: impl Into<String>, ty: IrType, dimension: usize) -> Self {
        Self {
            name: name.into(),
            ty,
            scope: VariableScope::Global,
            indirection: Indirection::Reference,
            scalar: false,
            dimension,
            initial_values: Vec::new(),
            argument: None,
        }
    }

    /// Pointer parameter covering `dimension` lanes.
    pub fn vector_argument(
        name: impl Into<String>,
        scope: VariableScope,
        ty: IrType,
        dimension: usize,
        argument: u32,
    ) -> Self {
        Self {
            name: name.into(),
            ty,
            scope,
            indirection: Indirection::Reference,
            scalar: false,
            dimension,
            initial_values: Vec::new(),
            argument: Some(argument),
        }
    }

    /// Scalar parameter passed by value.
    pub fn scalar_argument(name: impl Into<String>, ty: IrType, argument: u32) -> Self {
        Self {
            name: name.into(),
            ty,
            scope: VariableScope::Input,
            indirection: Indirection::Value,
            scalar: true,
            dimension: 1,
            initial_values: Vec::new(),
            argument: Some(argument),
        }
    }

    pub fn is_literal(&self) -> bool {
        self.scope == VariableScope::Literal
    }

    pub fn is_argument(&self) -> bool {
        matches!(self.scope, VariableScope::Input | VariableScope::Output)
    }

    pub fn is_reference(&self) -> bool {
        self.indirection == Indirection::Reference
    }
}

/// Owns every variable created during a compile and caches the value each
/// one was emitted as.
#[derive(Debug, Default)]
pub struct VariableTable {
    variables: Vec<Variable>,
    emitted: Vec<Option<crate::ir::Value>>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, variable: Variable) -> VariableId {
        let id = VariableId(self.variables.len() as u32);
        self.variables.push(variable);
        self.emitted.push(None);
        id
    }

    pub fn get(&self, id: VariableId) -> Option<&Variable> {
        self.variables.get(id.0 as usize)
    }

    pub fn emitted(&self, id: VariableId) -> Option<&crate::ir::Value> {
        self.emitted.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub(crate) fn set_emitted(&mut self, id: VariableId, value: crate::ir::Value) {
        if let Some(slot) = self.emitted.get_mut(id.0 as usize) {
            *slot = Some(value);
        }
    }

    /// Forget cached values of function-local variables.
    pub(crate) fn clear_locals(&mut self) {
        for (variable, slot) in self.variables.iter().zip(self.emitted.iter_mut()) {
            if matches!(
                variable.scope,
                VariableScope::Local | VariableScope::Input | VariableScope::Output
            ) {
                *slot = None;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Value;

    #[test]
    fn constructors_set_indirection() {
        let lit = Variable::scalar_literal("c", Literal::Float(2.0));
        assert!(lit.is_literal());
        assert!(!lit.is_reference());
        assert_eq!(lit.ty, IrType::Float);

        let input = Variable::vector_argument("x", VariableScope::Input, IrType::Double, 3, 0);
        assert!(input.is_argument());
        assert!(input.is_reference());
        assert_eq!(input.dimension, 3);

        let reg = Variable::scalar_argument("s", IrType::Int32, 1);
        assert!(reg.is_argument());
        assert!(!reg.is_reference());
    }

    #[test]
    fn table_caches_emission() {
        let mut table = VariableTable::new();
        let a = table.add(Variable::local_scalar("a", IrType::Int32));
        let b = table.add(Variable::global_vector("b", IrType::Int32, 2));
        assert!(table.emitted(a).is_none());
        table.set_emitted(a, Value::Argument(0));
        table.set_emitted(
            b,
            Value::Global {
                name: "b".into(),
                pointee: IrType::Int32.array_of(2),
            },
        );
        assert_eq!(table.emitted(a), Some(&Value::Argument(0)));

        table.clear_locals();
        assert!(table.emitted(a).is_none());
        assert!(table.emitted(b).is_some());
        assert_eq!(table.len(), 2);
    }
}

//! Emitter errors.

use thiserror::Error;

use crate::types::IrType;

/// Errors raised by the code-generation library.
///
/// These are contract violations between the caller and the builder; none
/// of them is recoverable within a compile.
#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("variable not found: {0}")]
    VariableNotFound(String),

    #[error("vector variable expected")]
    VectorVariableExpected,

    #[error("index {index} out of range for dimension {dimension}")]
    IndexOutOfRange { index: usize, dimension: usize },

    #[error("type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: IrType,
        found: IrType,
    },

    #[error("pointer expected in {context}, found {found}")]
    PointerExpected { context: String, found: IrType },

    #[error("block '{0}' already has a terminator")]
    BlockTerminated(String),

    #[error("block '{0}' is referenced but was never placed in the function")]
    UnplacedBlock(String),

    #[error("no function is being emitted")]
    NoActiveFunction,

    #[error("function '{0}' has no active region")]
    NoActiveRegion(String),

    #[error("unknown region {0}")]
    UnknownRegion(u32),

    #[error("unknown struct type '{0}'")]
    UnknownStruct(String),

    #[error("struct '{name}' has no field {field}")]
    UnknownField { name: String, field: u32 },

    #[error("argument {index} out of range for function '{function}'")]
    ArgumentOutOfRange { function: String, index: u32 },

    #[error("duplicate symbol '{0}'")]
    DuplicateSymbol(String),

    #[error("block '{block}' in non-void function '{function}' does not return")]
    MissingReturn { function: String, block: String },

    #[error("function '{0}' is still being emitted")]
    UnfinishedFunction(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("LLVM {stage} failed: {message}")]
    Llvm { stage: String, message: String },
}

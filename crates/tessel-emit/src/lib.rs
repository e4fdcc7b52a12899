//! Backend code-generation library for the Tessel compiler.
//!
//! Provides a small, target-neutral IR and the builders used to produce it:
//!
//! - [`ModuleEmitter`]: owns the module under construction, the stack of
//!   functions being built, declared struct types, globals, and the variable
//!   table with deferred emission.
//! - [`FunctionEmitter`]: basic blocks, instructions, loops, and block
//!   regions (contiguous runs of blocks that can be spliced together).
//! - [`header::write_header`]: C header for the tagged public surface.
//! - [`interp::Interpreter`]: reference executor for generated functions.
//!
//! With the `llvm` feature, [`llvm`] lowers a finished module to LLVM and
//! writes textual IR, bitcode, or object files.

pub mod error;
pub mod function;
pub mod header;
pub mod interp;
pub mod ir;
#[cfg(feature = "llvm")]
pub mod llvm;
pub mod module;
mod print;
pub mod settings;
pub mod types;
pub mod variable;

pub use error::EmitterError;
pub use function::{ForLoop, FunctionEmitter};
pub use ir::{
    BasicBlock, BinaryOp, BlockId, BlockRegion, ExternDecl, GlobalDef, Instruction, IrFunction,
    IrModule, Predicate, RegionId, Terminator, UnaryOp, Value, ValueId,
};
pub use module::ModuleEmitter;
pub use settings::{CompilerSettings, OptimizationLevel, TargetDevice};
pub use types::{IrType, Literal, StructDef};
pub use variable::{Indirection, Variable, VariableId, VariableScope, VariableTable};

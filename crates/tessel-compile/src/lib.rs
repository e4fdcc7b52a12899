//! Map compiler for the Tessel toolchain.
//!
//! [`MapCompiler::compile`] takes a [`tessel_model::Map`] with one input and
//! one output and produces a [`CompiledMap`]: a module holding the predict
//! function, a small introspection API, and (optionally) profiling counters.
//!
//! The pipeline is:
//!
//! 1. [`validate::ensure_valid_map`] checks the port counts and turns a
//!    partial output into a whole output port.
//! 2. The map is refined until every node is directly compilable.
//! 3. Nodes are emitted in dependency order. Each node gets its own block
//!    region, which is spliced into its parent's region when the two form
//!    a single-consumer chain.
//! 4. [`api::emit_model_api_functions`] adds `<prefix>_GetInputSize` and
//!    friends, and the profiler adds its accessors.

pub mod api;
pub mod compiled;
pub mod compiler;
pub mod error;
pub mod nodes;
pub mod parameters;
pub mod profiler;
mod resolve;
pub mod validate;

pub use compiled::CompiledMap;
pub use compiler::{MapCompiler, ModelVisitor};
pub use error::CompileError;
pub use parameters::MapCompilerParameters;
pub use profiler::ModelProfiler;
pub use validate::ensure_valid_map;

/// Compile `map` with `parameters`.
pub fn compile(map: tessel_model::Map, parameters: MapCompilerParameters) -> Result<CompiledMap, CompileError> {
    MapCompiler::new(parameters).compile(map)
}

//! Performance counters for compiled models.
//!
//! When enabled, the module gets a `PerformanceCounters` record for the
//! whole model and one per node, and the predict function is instrumented
//! to count invocations and accumulate elapsed milliseconds. Accessor and
//! reset functions are emitted alongside the model API. When disabled every
//! hook does nothing.

use tessel_emit::interp::CLOCK_FUNCTION;
use tessel_emit::{
    BinaryOp, EmitterError, ExternDecl, FunctionEmitter, GlobalDef, IrType, Literal, ModuleEmitter,
    Predicate, StructDef, Value,
};
use tessel_model::{Model, NodeId};

use crate::error::CompileError;
use crate::nodes::lane;

pub const PERFORMANCE_COUNTERS_NAME: &str = "PerformanceCounters";

#[derive(Debug, Clone)]
pub struct ModelProfiler {
    enabled: bool,
    prefix: String,
    num_nodes: usize,
    /// Node whose start timestamp is still to be recorded.
    pending_start: Option<NodeId>,
}

impl ModelProfiler {
    pub fn disabled(prefix: &str) -> Self {
        Self {
            enabled: false,
            prefix: prefix.to_string(),
            num_nodes: 0,
            pending_start: None,
        }
    }

    /// A profiler sized to the nodes of `model`.
    pub fn new(prefix: &str, model: &Model, enabled: bool) -> Self {
        Self {
            enabled,
            prefix: prefix.to_string(),
            num_nodes: model.size(),
            pending_start: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn global_name(&self, suffix: &str) -> String {
        format!("{}_{suffix}", self.prefix)
    }

    fn counters_def(&self, module: &ModuleEmitter) -> Result<StructDef, CompileError> {
        module
            .get_struct(PERFORMANCE_COUNTERS_NAME)
            .cloned()
            .ok_or_else(|| EmitterError::UnknownStruct(PERFORMANCE_COUNTERS_NAME.into()).into())
    }

    /// Declare the counter type, counter storage, and the clock.
    pub fn emit_initialization(&self, module: &mut ModuleEmitter) -> Result<(), CompileError> {
        if !self.enabled {
            return Ok(());
        }
        let def = module.declare_struct(
            PERFORMANCE_COUNTERS_NAME,
            vec![
                ("count".into(), IrType::Int32),
                ("total_time".into(), IrType::Double),
            ],
        )?;
        module.include_type_in_header(&def.name)?;
        module.add_global(GlobalDef {
            name: self.global_name("ModelPerformanceCounters"),
            ty: def.ty(),
            initializer: None,
            constant: false,
        })?;
        module.add_global(GlobalDef {
            name: self.global_name("NodePerformanceCounters"),
            ty: def.ty().array_of(self.num_nodes),
            initializer: None,
            constant: false,
        })?;
        for timer in ["ModelStartTime", "NodeStartTime"] {
            module.add_global(GlobalDef {
                name: self.global_name(timer),
                ty: IrType::Double,
                initializer: None,
                constant: false,
            })?;
        }
        module.declare_extern(ExternDecl {
            name: CLOCK_FUNCTION.into(),
            return_type: IrType::Double,
            params: vec![],
        })?;
        log::debug!("profiling {} node(s)", self.num_nodes);
        Ok(())
    }

    fn start_timer(&self, module: &mut ModuleEmitter, timer: &str) -> Result<(), CompileError> {
        let slot = module.global_value(&self.global_name(timer))?;
        let f = module.current_function()?;
        let now = clock(f)?;
        f.store(slot, now)?;
        Ok(())
    }

    fn stop_timer(&self, module: &mut ModuleEmitter, timer: &str, counters: Value) -> Result<(), CompileError> {
        let def = self.counters_def(module)?;
        let slot = module.global_value(&self.global_name(timer))?;
        let f = module.current_function()?;
        let now = clock(f)?;
        let start = f.load(slot)?;
        let elapsed = f.binary(BinaryOp::Sub, now, start)?;

        let count_ptr = f.field_ptr(counters.clone(), &def, 0)?;
        let count = f.load(count_ptr.clone())?;
        let count = f.binary(BinaryOp::Add, count, Value::Literal(Literal::Int32(1)))?;
        f.store(count_ptr, count)?;

        let total_ptr = f.field_ptr(counters, &def, 1)?;
        let total = f.load(total_ptr.clone())?;
        let total = f.binary(BinaryOp::Add, total, elapsed)?;
        f.store(total_ptr, total)?;
        Ok(())
    }

    pub fn start_model(&self, module: &mut ModuleEmitter) -> Result<(), CompileError> {
        if !self.enabled {
            return Ok(());
        }
        self.start_timer(module, "ModelStartTime")
    }

    pub fn end_model(&self, module: &mut ModuleEmitter) -> Result<(), CompileError> {
        if !self.enabled {
            return Ok(());
        }
        let counters = module.global_value(&self.global_name("ModelPerformanceCounters"))?;
        self.stop_timer(module, "ModelStartTime", counters)
    }

    /// Note that `node` is starting. Its timer starts at the first code the
    /// node emits, which may be in a freshly opened region.
    pub fn init_node(&mut self, node: NodeId) {
        if self.enabled {
            self.pending_start = Some(node);
        }
    }

    /// Start the timer of `node` at the current insertion point, unless it
    /// has already been started.
    pub fn start_pending_node(&mut self, module: &mut ModuleEmitter, node: NodeId) -> Result<(), CompileError> {
        if self.pending_start != Some(node) {
            return Ok(());
        }
        self.pending_start = None;
        self.start_timer(module, "NodeStartTime")
    }

    pub fn end_node(&self, module: &mut ModuleEmitter, node: NodeId) -> Result<(), CompileError> {
        if !self.enabled {
            return Ok(());
        }
        let table = module.global_value(&self.global_name("NodePerformanceCounters"))?;
        let counters = module
            .current_function()?
            .element_ptr(table, lane(node.0)?)?;
        self.stop_timer(module, "NodeStartTime", counters)
    }

    /// Emit the accessor and reset functions.
    pub fn emit_model_profiler_functions(&self, module: &mut ModuleEmitter) -> Result<(), CompileError> {
        if !self.enabled {
            return Ok(());
        }
        let def = self.counters_def(module)?;
        let model_counters = module.global_value(&self.global_name("ModelPerformanceCounters"))?;
        let node_counters = module.global_value(&self.global_name("NodePerformanceCounters"))?;
        let num_nodes = lane(self.num_nodes)?;

        module.begin_function(&self.global_name("GetNumProfiledNodes"), IrType::Int32, vec![])?;
        let f = module.current_function()?;
        f.include_in_header();
        f.ret(Some(num_nodes.clone()))?;
        module.end_function()?;

        let out_param = ("counters".to_string(), def.ty().pointer_to());

        module.begin_function(
            &self.global_name("GetModelPerformanceCounters"),
            IrType::Void,
            vec![out_param.clone()],
        )?;
        let f = module.current_function()?;
        f.include_in_header();
        copy_counters(f, &def, model_counters.clone(), Value::Argument(0))?;
        module.end_function()?;

        module.begin_function(
            &self.global_name("GetNodePerformanceCounters"),
            IrType::Void,
            vec![("index".into(), IrType::Int32), out_param],
        )?;
        let f = module.current_function()?;
        f.include_in_header();
        let check_upper = f.block("check_upper");
        let found = f.block("found");
        let missing = f.block("missing");
        let negative = f.compare(Predicate::Lt, Value::Argument(0), lane(0)?)?;
        f.cond_branch(negative, missing, check_upper)?;
        f.set_current_block(check_upper)?;
        let too_large = f.compare(Predicate::Ge, Value::Argument(0), num_nodes)?;
        f.cond_branch(too_large, missing, found)?;
        f.set_current_block(found)?;
        let source = f.element_ptr(node_counters.clone(), Value::Argument(0))?;
        copy_counters(f, &def, source, Value::Argument(1))?;
        f.ret(None)?;
        f.set_current_block(missing)?;
        reset_counters(f, &def, Value::Argument(1))?;
        f.ret(None)?;
        module.end_function()?;

        module.begin_function(&self.global_name("ResetModelProfilingInfo"), IrType::Void, vec![])?;
        let f = module.current_function()?;
        f.include_in_header();
        reset_counters(f, &def, model_counters)?;
        module.end_function()?;

        module.begin_function(&self.global_name("ResetNodeProfilingInfo"), IrType::Void, vec![])?;
        let f = module.current_function()?;
        f.include_in_header();
        let lp = f.begin_for(self.num_nodes, "node")?;
        let counters = f.element_ptr(node_counters, lp.index.clone())?;
        reset_counters(f, &def, counters)?;
        f.end_for(lp)?;
        module.end_function()?;
        Ok(())
    }
}

fn clock(f: &mut FunctionEmitter) -> Result<Value, EmitterError> {
    f.call(CLOCK_FUNCTION, IrType::Double, vec![])?
        .ok_or_else(|| EmitterError::NotSupported(format!("{CLOCK_FUNCTION} returned no value")))
}

fn copy_counters(f: &mut FunctionEmitter, def: &StructDef, src: Value, dst: Value) -> Result<(), EmitterError> {
    for field in 0..2 {
        let from = f.field_ptr(src.clone(), def, field)?;
        let value = f.load(from)?;
        let to = f.field_ptr(dst.clone(), def, field)?;
        f.store(to, value)?;
    }
    Ok(())
}

fn reset_counters(f: &mut FunctionEmitter, def: &StructDef, counters: Value) -> Result<(), EmitterError> {
    let count = f.field_ptr(counters.clone(), def, 0)?;
    f.store(count, Value::Literal(Literal::Int32(0)))?;
    let total = f.field_ptr(counters, def, 1)?;
    f.store(total, Value::Literal(Literal::Double(0.0)))
}

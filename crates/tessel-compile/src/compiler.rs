//! The map compiler: drives validation, refinement, the node walk, and
//! module packaging.
//!
//! Each compiled node gets a *region*: a contiguous run of blocks in the
//! predict function. After a node is emitted, its region is spliced onto
//! the region of its unique parent when every producer feeding it has no
//! other consumer, so chains of single-use operations end up as one
//! straight-line sequence of blocks.
//!
//! Node to region bindings live in a stack of tables, one per compilation
//! scope. Only the top table is consulted.

use std::collections::HashMap;

use tessel_emit::{
    FunctionEmitter, IrModule, IrType, ModuleEmitter, RegionId, Variable, VariableId,
    VariableScope,
};
use tessel_model::{Map, Model, Node, NodeAction, NodeId, NodeKind, OutputPortRef, PortElement, TransformContext};

use crate::api;
use crate::compiled::CompiledMap;
use crate::error::CompileError;
use crate::nodes;
use crate::parameters::MapCompilerParameters;
use crate::profiler::ModelProfiler;
use crate::validate::ensure_valid_map;

/// Hooks invoked around the node walk.
pub trait ModelVisitor {
    fn on_begin_model(&mut self, model: &Model) -> Result<(), CompileError>;
    fn on_begin_node(&mut self, node: &Node) -> Result<(), CompileError>;
    fn on_end_node(&mut self, node: &Node) -> Result<(), CompileError>;
    fn on_end_model(&mut self, model: &Model) -> Result<(), CompileError>;
}

/// Compiles one map into a module. An instance is consumed by
/// [`MapCompiler::compile`].
#[derive(Debug)]
pub struct MapCompiler {
    pub(crate) parameters: MapCompilerParameters,
    pub(crate) module: ModuleEmitter,
    pub(crate) profiler: ModelProfiler,
    node_regions: Vec<HashMap<NodeId, RegionId>>,
    pub(crate) port_variables: HashMap<OutputPortRef, VariableId>,
}

impl MapCompiler {
    pub fn new(parameters: MapCompilerParameters) -> Self {
        let module = ModuleEmitter::new(
            parameters.module_name.clone(),
            parameters.compiler_settings.clone(),
        );
        Self {
            profiler: ModelProfiler::disabled(&parameters.module_name),
            parameters,
            module,
            node_regions: vec![HashMap::new()],
            port_variables: HashMap::new(),
        }
    }

    pub fn parameters(&self) -> &MapCompilerParameters {
        &self.parameters
    }

    pub fn namespace_prefix(&self) -> &str {
        self.parameters.namespace_prefix()
    }

    pub fn predict_function_name(&self) -> &str {
        &self.parameters.map_function_name
    }

    /// The module being built.
    pub fn module(&self) -> &ModuleEmitter {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut ModuleEmitter {
        &mut self.module
    }

    /// The function currently being emitted.
    pub fn function(&mut self) -> Result<&mut FunctionEmitter, CompileError> {
        Ok(self.module.current_function()?)
    }

    /// Validate, refine, and compile `map`.
    pub fn compile(mut self, mut map: Map) -> Result<CompiledMap, CompileError> {
        ensure_valid_map(&mut map)?;

        let context = TransformContext::new(|node: &Node| {
            if nodes::is_compilable(node) {
                NodeAction::Compile
            } else {
                NodeAction::Refine
            }
        })
        .with_max_iterations(self.parameters.max_refinement_iterations);
        let passes = map.refine(&context)?;
        log::debug!(
            "refined map in {passes} pass(es): {} node(s)",
            map.model().size()
        );

        let prefix = self.namespace_prefix().to_string();
        if self.parameters.profile {
            self.module
                .add_preprocessor_definition(format!("{prefix}_PROFILING"), "1");
        }
        self.profiler = ModelProfiler::new(&prefix, map.model(), self.parameters.profile);
        self.profiler.emit_initialization(&mut self.module)?;

        let function_name = self.predict_function_name().to_string();
        self.compile_map(&map, &function_name)?;

        api::emit_model_api_functions(&mut self.module, &prefix, &map)?;
        self.profiler.emit_model_profiler_functions(&mut self.module)?;

        let device = &self.parameters.compiler_settings.target_device;
        self.module.set_target_triple(device.triple.clone());
        self.module.set_data_layout(device.data_layout.clone());
        let settings = self.parameters.compiler_settings.clone();
        let module: IrModule = self.module.finish()?;
        log::info!(
            "compiled map into module {} ({} function(s))",
            module.name,
            module.functions.len()
        );
        Ok(CompiledMap::new(map, function_name, module, settings))
    }

    /// Emit the predict function for an already validated and refined map.
    pub fn compile_map(&mut self, map: &Map, function_name: &str) -> Result<(), CompileError> {
        let model = map.model();
        let input_node = map.input_node(0)?;
        let input_port = OutputPortRef::new(input_node, 0);
        let input_type = nodes::port_ir_type(model, input_port)?;
        let output = map.output(0)?;
        let output_type = nodes::elements_ir_type(model, output)?;
        let output_port = output
            .referenced_port()
            .ok_or_else(|| CompileError::InvalidArgument("map output is not a whole port".into()))?;

        self.module.begin_function(
            function_name,
            IrType::Void,
            vec![
                ("input".into(), input_type.clone().pointer_to()),
                ("output".into(), output_type.clone().pointer_to()),
            ],
        )?;

        let input = self.module.add_variable(Variable::vector_argument(
            "input",
            VariableScope::Input,
            input_type,
            map.input_size(),
            0,
        ));
        self.set_port_variable(input_port, input);

        let output_variable = Variable::vector_argument(
            "output",
            VariableScope::Output,
            output_type,
            output.size(),
            1,
        );
        // Computed outputs write straight into the caller's buffer. Inputs and
        // constants already own their storage and are copied at the end.
        let producer = model.node(output_port.node)?;
        let copy_output = match producer.kind {
            NodeKind::Input { .. } | NodeKind::Constant { .. } => {
                Some(self.module.add_variable(output_variable))
            }
            _ => {
                let id = self.module.add_variable(output_variable);
                self.set_port_variable(output_port, id);
                None
            }
        };

        let base_depth = self.scope_depth();
        self.on_begin_model(model)?;
        for id in model.topological_order() {
            let node = model.node(id)?;
            self.on_begin_node(node)?;
            nodes::compile_node(self, model, node)?;
            self.on_end_node(node)?;
        }

        // Merged regions may have moved the current block ahead of later
        // regions; model epilogue code goes in a final region of its own.
        let function = self.function()?;
        let epilogue = function.block("epilogue");
        function.set_current_block(epilogue)?;
        function.add_region(epilogue)?;

        if let Some(target) = copy_output {
            let dest = self.module.ensure_emitted(target)?;
            for (i, element) in output.elements().enumerate() {
                let value = self.load_port_element_variable(element)?;
                self.function()?
                    .set_value_at(dest.clone(), nodes::lane(i)?, value)?;
            }
        }
        self.on_end_model(model)?;

        if self.scope_depth() != base_depth {
            return Err(CompileError::ScopeImbalance {
                expected: base_depth,
                found: self.scope_depth(),
            });
        }
        self.module.end_function()?;
        Ok(())
    }

    // --- Regions ----------------------------------------------------------

    fn ensure_region(&mut self) -> Result<(), CompileError> {
        let function = self.function()?;
        if function.current_region().is_none() {
            let block = function.current_block();
            function.add_region(block)?;
        }
        Ok(())
    }

    /// Move the current region's end up to the current block if emission has
    /// advanced past it.
    fn sync_region_end(&mut self) -> Result<(), CompileError> {
        let function = self.function()?;
        let region = function
            .current_region()
            .ok_or_else(|| tessel_emit::EmitterError::NoActiveRegion(function.name().to_string()))?;
        let current = function.current_block();
        let end = function.region(region)?.end;
        if end != current
            && function.layout_position(current) > function.layout_position(end)
        {
            function.set_region_end(region, current)?;
        }
        Ok(())
    }

    fn current_node_regions(&self) -> Option<&HashMap<NodeId, RegionId>> {
        self.node_regions.last()
    }

    fn current_node_regions_mut(&mut self) -> Result<&mut HashMap<NodeId, RegionId>, CompileError> {
        self.node_regions
            .last_mut()
            .ok_or(CompileError::ScopeImbalance { expected: 1, found: 0 })
    }

    /// Region bound to `node` in the current scope.
    pub fn node_region(&self, node: NodeId) -> Option<RegionId> {
        self.current_node_regions()
            .and_then(|regions| regions.get(&node).copied())
    }

    /// Open a new block for `node`, make it the insertion point, and register
    /// it as the node's region in the current scope.
    pub fn new_node_region(&mut self, node: &Node) -> Result<RegionId, CompileError> {
        let diagnostics = self.parameters.compiler_settings.include_diagnostic_info;
        let function = self.function()?;
        let block = function.block(&node.id.to_string());
        function.set_current_block(block)?;
        let region = function.add_region(block)?;
        if diagnostics {
            function.print(format!("{} node {}", node.kind, node.id))?;
        }
        self.current_node_regions_mut()?.insert(node.id, region);
        log::trace!("node {} opened region {}", node.id, region.0);

        self.profiler.start_pending_node(&mut self.module, node.id)?;
        Ok(region)
    }

    /// The node whose region `node` can be merged into: every producer
    /// feeding `node` must have no other consumer, and all producers that
    /// have a region must share it.
    fn unique_parent(&self, model: &Model, node: &Node) -> Option<NodeId> {
        let mut parent = None;
        let mut parent_region = None;
        for input in &node.inputs {
            for producer in model.parent_nodes(input) {
                if !model.has_single_descendant(producer) {
                    return None;
                }
                if let Some(region) = self.node_region(producer) {
                    if parent_region.is_some_and(|r| r != region) {
                        return None;
                    }
                    parent_region = Some(region);
                    parent = Some(producer);
                }
            }
        }
        parent
    }

    /// Merge the region of `node` into its unique parent's region.
    pub fn try_merge_node_region(&mut self, model: &Model, node: &Node) -> Result<bool, CompileError> {
        if self.node_region(node.id).is_none() {
            return Ok(false);
        }
        match self.unique_parent(model, node) {
            Some(parent) => self.try_merge_node_regions(parent, node.id),
            None => Ok(false),
        }
    }

    /// Merge the region of `src` into the region of `dest`.
    pub fn try_merge_node_regions(&mut self, dest: NodeId, src: NodeId) -> Result<bool, CompileError> {
        match self.node_region(dest) {
            Some(region) => self.try_merge_node_into_region(region, src),
            None => Ok(false),
        }
    }

    /// Splice the region of `src` onto the end of `dest` and rebind `src`.
    pub fn try_merge_node_into_region(&mut self, dest: RegionId, src: NodeId) -> Result<bool, CompileError> {
        let src_region = match self.node_region(src) {
            Some(region) if region != dest => region,
            _ => return Ok(false),
        };
        let function = self.function()?;
        if let Some(current) = function.current_region() {
            let block = function.current_block();
            function.set_region_end(current, block)?;
        }
        function.concat_regions(dest, src_region)?;
        self.current_node_regions_mut()?.insert(src, dest);
        log::trace!("merged region {} of node {src} into region {}", src_region.0, dest.0);
        Ok(true)
    }

    /// Region a consumer of `element` may keep emitting into: the producer's
    /// region, if `element` has a single consumer and is not a literal.
    pub fn get_mergeable_node_region(&self, model: &Model, element: PortElement) -> Option<RegionId> {
        if model.consumers(element.port).len() != 1 {
            return None;
        }
        let variable = self.port_variables.get(&element.port)?;
        if self.module.variable(*variable).ok()?.is_literal() {
            return None;
        }
        self.node_region(element.port.node)
    }

    // --- Scopes -----------------------------------------------------------

    /// Enter a nested compilation scope with an empty region table.
    pub fn push_scope(&mut self) {
        self.node_regions.push(HashMap::new());
    }

    /// Leave the current scope. The base scope cannot be popped.
    pub fn pop_scope(&mut self) -> Result<(), CompileError> {
        if self.node_regions.len() <= 1 {
            return Err(CompileError::ScopeImbalance {
                expected: 1,
                found: self.node_regions.len().saturating_sub(1),
            });
        }
        self.node_regions.pop();
        Ok(())
    }

    pub fn scope_depth(&self) -> usize {
        self.node_regions.len()
    }
}

impl ModelVisitor for MapCompiler {
    fn on_begin_model(&mut self, _model: &Model) -> Result<(), CompileError> {
        self.ensure_region()?;
        let include_in_header = self.parameters.include_in_header;
        let function = self.function()?;
        if include_in_header {
            function.include_in_header();
        }
        function.include_in_predict_interface();
        self.profiler.start_model(&mut self.module)?;
        Ok(())
    }

    fn on_begin_node(&mut self, node: &Node) -> Result<(), CompileError> {
        self.ensure_region()?;
        self.profiler.init_node(node.id);
        Ok(())
    }

    fn on_end_node(&mut self, node: &Node) -> Result<(), CompileError> {
        self.profiler.start_pending_node(&mut self.module, node.id)?;
        self.profiler.end_node(&mut self.module, node.id)?;
        self.sync_region_end()
    }

    fn on_end_model(&mut self, _model: &Model) -> Result<(), CompileError> {
        self.profiler.end_model(&mut self.module)
    }
}

//! Builder for a single function.
//!
//! The emitter keeps an insertion point (the current block) and a layout of
//! placed blocks. Node code is grouped into *regions*: contiguous runs of the
//! layout tracked in an arena and addressed by [`RegionId`]. Regions can be
//! spliced into one another; when the function is finished, the regions that
//! are still top-level are chained in creation order.

use std::collections::HashMap;

use crate::error::EmitterError;
use crate::ir::{
    BasicBlock, BinaryOp, BlockId, BlockRegion, Instruction, IrFunction, Predicate, RegionId,
    Terminator, UnaryOp, Value, ValueId,
};
use crate::types::{IrType, Literal, StructDef};

/// A counted loop opened by [`FunctionEmitter::begin_for`].
#[derive(Debug, Clone)]
pub struct ForLoop {
    /// The `i32` loop counter, valid inside the body.
    pub index: Value,
    index_ptr: Value,
    cond: BlockId,
    end: BlockId,
}

#[derive(Debug)]
pub struct FunctionEmitter {
    function: IrFunction,
    current: BlockId,
    current_region: Option<RegionId>,
    /// Allocas are kept at the top of the entry block.
    entry_allocas: usize,
    label_counts: HashMap<String, usize>,
}

impl FunctionEmitter {
    pub fn new(name: impl Into<String>, return_type: IrType, params: Vec<(String, IrType)>) -> Self {
        let function = IrFunction {
            name: name.into(),
            return_type,
            params,
            blocks: vec![BasicBlock::new("entry")],
            layout: vec![BlockId(0)],
            value_types: Vec::new(),
            regions: Vec::new(),
            include_in_header: false,
            include_in_predict_interface: false,
        };
        let mut label_counts = HashMap::new();
        label_counts.insert("entry".to_string(), 1);
        Self {
            function,
            current: BlockId(0),
            current_region: None,
            entry_allocas: 0,
            label_counts,
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn return_type(&self) -> &IrType {
        &self.function.return_type
    }

    /// The function as built so far.
    pub fn function(&self) -> &IrFunction {
        &self.function
    }

    pub fn argument(&self, index: u32) -> Result<Value, EmitterError> {
        if (index as usize) < self.function.params.len() {
            Ok(Value::Argument(index))
        } else {
            Err(EmitterError::ArgumentOutOfRange {
                function: self.function.name.clone(),
                index,
            })
        }
    }

    pub fn value_type(&self, value: &Value) -> Result<IrType, EmitterError> {
        self.function.operand_type(value).ok_or_else(|| match value {
            Value::Argument(index) => EmitterError::ArgumentOutOfRange {
                function: self.function.name.clone(),
                index: *index,
            },
            other => EmitterError::VariableNotFound(other.to_string()),
        })
    }

    // --- Blocks -----------------------------------------------------------

    fn unique_label(&mut self, label: &str) -> String {
        let count = self.label_counts.entry(label.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            label.to_string()
        } else {
            format!("{label}.{}", *count - 1)
        }
    }

    /// Create a block that is not yet part of the layout.
    pub fn detached_block(&mut self, label: &str) -> BlockId {
        let label = self.unique_label(label);
        let id = BlockId(self.function.blocks.len() as u32);
        self.function.blocks.push(BasicBlock::new(label));
        id
    }

    /// Create a block and append it to the layout.
    pub fn block(&mut self, label: &str) -> BlockId {
        let id = self.detached_block(label);
        self.function.layout.push(id);
        id
    }

    /// Append a detached block to the layout. Placed blocks are left alone.
    pub fn attach_block(&mut self, id: BlockId) -> Result<(), EmitterError> {
        self.block_ref(id)?;
        if !self.function.is_placed(id) {
            self.function.layout.push(id);
        }
        Ok(())
    }

    /// Create a block at the end of the layout and move the insertion point to it.
    pub fn begin_block(&mut self, label: &str) -> BlockId {
        let id = self.block(label);
        self.current = id;
        id
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    pub fn set_current_block(&mut self, id: BlockId) -> Result<(), EmitterError> {
        self.block_ref(id)?;
        self.current = id;
        Ok(())
    }

    pub fn block_label(&self, id: BlockId) -> Result<&str, EmitterError> {
        Ok(self.block_ref(id)?.label.as_str())
    }

    pub fn is_terminated(&self, id: BlockId) -> Result<bool, EmitterError> {
        Ok(self.block_ref(id)?.is_terminated())
    }

    /// Position of a placed block in the layout.
    pub fn layout_position(&self, id: BlockId) -> Option<usize> {
        self.function.layout.iter().position(|&b| b == id)
    }

    fn block_ref(&self, id: BlockId) -> Result<&BasicBlock, EmitterError> {
        self.function
            .block(id)
            .ok_or_else(|| EmitterError::UnplacedBlock(format!("<block {}>", id.0)))
    }

    fn block_mut(&mut self, id: BlockId) -> Result<&mut BasicBlock, EmitterError> {
        self.function
            .blocks
            .get_mut(id.0 as usize)
            .ok_or_else(|| EmitterError::UnplacedBlock(format!("<block {}>", id.0)))
    }

    // --- Instructions -----------------------------------------------------

    fn new_value(&mut self, ty: IrType) -> ValueId {
        let id = ValueId(self.function.value_types.len() as u32);
        self.function.value_types.push(ty);
        id
    }

    fn push(&mut self, inst: Instruction) -> Result<(), EmitterError> {
        let current = self.current;
        let block = self.block_mut(current)?;
        if block.is_terminated() {
            return Err(EmitterError::BlockTerminated(block.label.clone()));
        }
        block.instructions.push(inst);
        Ok(())
    }

    fn pointee_of(&self, ptr: &Value, context: &str) -> Result<IrType, EmitterError> {
        match self.value_type(ptr)? {
            IrType::Pointer(inner) => Ok(*inner),
            found => Err(EmitterError::PointerExpected {
                context: context.into(),
                found,
            }),
        }
    }

    fn expect_type(&self, context: &str, expected: &IrType, found: IrType) -> Result<(), EmitterError> {
        if *expected != found {
            return Err(EmitterError::TypeMismatch {
                context: context.into(),
                expected: expected.clone(),
                found,
            });
        }
        Ok(())
    }

    /// Stack storage for `count` values of `ty`, placed in the entry block.
    pub fn alloca(&mut self, ty: IrType, count: usize) -> Result<Value, EmitterError> {
        let result = self.new_value(ty.clone().pointer_to());
        let at = self.entry_allocas;
        let entry = self.block_mut(BlockId(0))?;
        entry
            .instructions
            .insert(at, Instruction::Alloca { result, ty, count });
        self.entry_allocas += 1;
        Ok(Value::Local(result))
    }

    pub fn load(&mut self, ptr: Value) -> Result<Value, EmitterError> {
        let ty = self.pointee_of(&ptr, "load")?;
        if !(ty.is_scalar() || ty.is_pointer()) {
            return Err(EmitterError::NotSupported(format!("load of aggregate {ty}")));
        }
        let result = self.new_value(ty.clone());
        self.push(Instruction::Load { result, ty, ptr })?;
        Ok(Value::Local(result))
    }

    pub fn store(&mut self, ptr: Value, value: Value) -> Result<(), EmitterError> {
        let pointee = self.pointee_of(&ptr, "store")?;
        let ty = self.value_type(&value)?;
        self.expect_type("store", &pointee, ty)?;
        self.push(Instruction::Store { ptr, value })
    }

    /// Address of element `index` of the storage behind `ptr`.
    pub fn element_ptr(&mut self, ptr: Value, index: Value) -> Result<Value, EmitterError> {
        let pointee = self.pointee_of(&ptr, "element pointer")?;
        let index_ty = self.value_type(&index)?;
        if !index_ty.is_integer() {
            return Err(EmitterError::TypeMismatch {
                context: "element index".into(),
                expected: IrType::Int32,
                found: index_ty,
            });
        }
        let element = match pointee {
            IrType::Array(inner, _) => *inner,
            other => other,
        };
        let result = self.new_value(element.pointer_to());
        self.push(Instruction::ElementPtr { result, ptr, index })?;
        Ok(Value::Local(result))
    }

    /// Load `ptr[index]`.
    pub fn value_at(&mut self, ptr: Value, index: Value) -> Result<Value, EmitterError> {
        let address = self.element_ptr(ptr, index)?;
        self.load(address)
    }

    /// Store `value` into `ptr[index]`.
    pub fn set_value_at(&mut self, ptr: Value, index: Value, value: Value) -> Result<(), EmitterError> {
        let address = self.element_ptr(ptr, index)?;
        self.store(address, value)
    }

    /// Address of field `field` of the struct behind `ptr`.
    pub fn field_ptr(&mut self, ptr: Value, def: &StructDef, field: u32) -> Result<Value, EmitterError> {
        let pointee = self.pointee_of(&ptr, "field pointer")?;
        self.expect_type("field pointer", &def.ty(), pointee)?;
        let field_ty = def
            .field_type(field)
            .cloned()
            .ok_or_else(|| EmitterError::UnknownField {
                name: def.name.clone(),
                field,
            })?;
        let result = self.new_value(field_ty.pointer_to());
        self.push(Instruction::FieldPtr {
            result,
            struct_name: def.name.clone(),
            ptr,
            field,
        })?;
        Ok(Value::Local(result))
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EmitterError> {
        let ty = self.value_type(&lhs)?;
        self.expect_type(&format!("{op}"), &ty, self.value_type(&rhs)?)?;
        if !ty.is_numeric() {
            return Err(EmitterError::NotSupported(format!("{op} on {ty}")));
        }
        let result = self.new_value(ty);
        self.push(Instruction::Binary {
            result,
            op,
            lhs,
            rhs,
        })?;
        Ok(Value::Local(result))
    }

    pub fn unary(&mut self, op: UnaryOp, operand: Value) -> Result<Value, EmitterError> {
        let ty = self.value_type(&operand)?;
        if !ty.is_numeric() {
            return Err(EmitterError::NotSupported(format!("{op} on {ty}")));
        }
        let result = self.new_value(ty);
        self.push(Instruction::Unary {
            result,
            op,
            operand,
        })?;
        Ok(Value::Local(result))
    }

    pub fn compare(&mut self, predicate: Predicate, lhs: Value, rhs: Value) -> Result<Value, EmitterError> {
        let ty = self.value_type(&lhs)?;
        self.expect_type(&format!("cmp {predicate}"), &ty, self.value_type(&rhs)?)?;
        let result = self.new_value(IrType::Bool);
        self.push(Instruction::Compare {
            result,
            predicate,
            lhs,
            rhs,
        })?;
        Ok(Value::Local(result))
    }

    /// Convert between scalar types. A no-op when the types already agree.
    pub fn cast(&mut self, value: Value, to: IrType) -> Result<Value, EmitterError> {
        let from = self.value_type(&value)?;
        if from == to {
            return Ok(value);
        }
        if !from.is_scalar() || !to.is_scalar() {
            return Err(EmitterError::NotSupported(format!("cast from {from} to {to}")));
        }
        let result = self.new_value(to.clone());
        self.push(Instruction::Cast { result, value, to })?;
        Ok(Value::Local(result))
    }

    /// Call `callee`; returns the result unless `return_type` is void.
    pub fn call(
        &mut self,
        callee: &str,
        return_type: IrType,
        args: Vec<Value>,
    ) -> Result<Option<Value>, EmitterError> {
        let result = (return_type != IrType::Void).then(|| self.new_value(return_type));
        self.push(Instruction::Call {
            result,
            callee: callee.to_string(),
            args,
        })?;
        Ok(result.map(Value::Local))
    }

    pub fn comment(&mut self, text: impl Into<String>) -> Result<(), EmitterError> {
        self.push(Instruction::Comment(text.into()))
    }

    pub fn print(&mut self, text: impl Into<String>) -> Result<(), EmitterError> {
        self.push(Instruction::Print(text.into()))
    }

    // --- Terminators ------------------------------------------------------

    fn terminate(&mut self, terminator: Terminator) -> Result<(), EmitterError> {
        let current = self.current;
        self.terminate_block(current, terminator)
    }

    fn terminate_block(&mut self, id: BlockId, terminator: Terminator) -> Result<(), EmitterError> {
        let block = self.block_mut(id)?;
        if block.is_terminated() {
            return Err(EmitterError::BlockTerminated(block.label.clone()));
        }
        block.terminator = Some(terminator);
        Ok(())
    }

    pub fn branch(&mut self, target: BlockId) -> Result<(), EmitterError> {
        self.block_ref(target)?;
        self.terminate(Terminator::Branch(target))
    }

    pub fn cond_branch(
        &mut self,
        cond: Value,
        then_block: BlockId,
        else_block: BlockId,
    ) -> Result<(), EmitterError> {
        self.expect_type("branch condition", &IrType::Bool, self.value_type(&cond)?)?;
        self.block_ref(then_block)?;
        self.block_ref(else_block)?;
        self.terminate(Terminator::CondBranch {
            cond,
            then_block,
            else_block,
        })
    }

    pub fn ret(&mut self, value: Option<Value>) -> Result<(), EmitterError> {
        let found = match &value {
            Some(v) => self.value_type(v)?,
            None => IrType::Void,
        };
        let expected = self.function.return_type.clone();
        self.expect_type("return", &expected, found)?;
        self.terminate(Terminator::Return(value))
    }

    // --- Loops ------------------------------------------------------------

    /// Open a loop running its body `count` times. The insertion point moves
    /// into the body; close the loop with [`FunctionEmitter::end_for`].
    pub fn begin_for(&mut self, count: usize, label: &str) -> Result<ForLoop, EmitterError> {
        let index_ptr = self.alloca(IrType::Int32, 1)?;
        self.store(index_ptr.clone(), Value::Literal(Literal::Int32(0)))?;

        let cond = self.block(&format!("{label}.cond"));
        self.branch(cond)?;
        self.current = cond;
        let index = self.load(index_ptr.clone())?;
        let limit = i32::try_from(count)
            .map_err(|_| EmitterError::NotSupported(format!("loop count {count}")))?;
        let more = self.compare(Predicate::Lt, index.clone(), Value::Literal(Literal::Int32(limit)))?;

        let body = self.block(&format!("{label}.body"));
        let end = self.detached_block(&format!("{label}.end"));
        self.cond_branch(more, body, end)?;
        self.current = body;

        Ok(ForLoop {
            index,
            index_ptr,
            cond,
            end,
        })
    }

    /// Close a loop: increment, jump back, and continue after the loop.
    pub fn end_for(&mut self, for_loop: ForLoop) -> Result<(), EmitterError> {
        let next = self.binary(
            BinaryOp::Add,
            for_loop.index.clone(),
            Value::Literal(Literal::Int32(1)),
        )?;
        self.store(for_loop.index_ptr, next)?;
        self.branch(for_loop.cond)?;
        self.attach_block(for_loop.end)?;
        self.current = for_loop.end;
        Ok(())
    }

    // --- Regions ----------------------------------------------------------

    /// Register a region starting (and, for now, ending) at `start`. It becomes
    /// the current region.
    pub fn add_region(&mut self, start: BlockId) -> Result<RegionId, EmitterError> {
        self.block_ref(start)?;
        let id = RegionId(self.function.regions.len() as u32);
        self.function.regions.push(BlockRegion {
            start,
            end: start,
            top_level: true,
        });
        self.current_region = Some(id);
        Ok(id)
    }

    pub fn current_region(&self) -> Option<RegionId> {
        self.current_region
    }

    pub fn set_current_region(&mut self, id: RegionId) -> Result<(), EmitterError> {
        self.region(id)?;
        self.current_region = Some(id);
        Ok(())
    }

    pub fn region(&self, id: RegionId) -> Result<&BlockRegion, EmitterError> {
        self.function
            .regions
            .get(id.0 as usize)
            .ok_or(EmitterError::UnknownRegion(id.0))
    }

    fn region_mut(&mut self, id: RegionId) -> Result<&mut BlockRegion, EmitterError> {
        self.function
            .regions
            .get_mut(id.0 as usize)
            .ok_or(EmitterError::UnknownRegion(id.0))
    }

    pub fn set_region_end(&mut self, id: RegionId, end: BlockId) -> Result<(), EmitterError> {
        self.block_ref(end)?;
        self.region_mut(id)?.end = end;
        Ok(())
    }

    fn region_span(&self, id: RegionId) -> Result<(usize, usize), EmitterError> {
        let region = *self.region(id)?;
        let start = self.placed_position(region.start)?;
        let end = self.placed_position(region.end)?;
        if end < start {
            return Err(EmitterError::NotSupported(format!(
                "region {} ends before it starts",
                id.0
            )));
        }
        Ok((start, end))
    }

    fn placed_position(&self, id: BlockId) -> Result<usize, EmitterError> {
        self.layout_position(id).ok_or_else(|| {
            EmitterError::UnplacedBlock(
                self.function
                    .block(id)
                    .map(|b| b.label.clone())
                    .unwrap_or_else(|| format!("<block {}>", id.0)),
            )
        })
    }

    /// Splice the blocks of `src` directly after the end of `dest`.
    ///
    /// If `dest` ends in an unterminated block it falls through into `src`.
    /// Afterwards `dest` spans both, `src` is no longer top-level, and `dest`
    /// is the current region.
    pub fn concat_regions(&mut self, dest: RegionId, src: RegionId) -> Result<(), EmitterError> {
        if dest == src {
            return Ok(());
        }
        let (src_start, src_end) = self.region_span(src)?;
        let moved: Vec<BlockId> = self.function.layout.drain(src_start..=src_end).collect();

        let (_, dest_end) = self.region_span(dest)?;
        let insert_at = dest_end + 1;
        for (offset, block) in moved.into_iter().enumerate() {
            self.function.layout.insert(insert_at + offset, block);
        }

        let dest_region = *self.region(dest)?;
        let src_region = *self.region(src)?;
        if !self.is_terminated(dest_region.end)? {
            self.terminate_block(dest_region.end, Terminator::Branch(src_region.start))?;
        }
        self.region_mut(dest)?.end = src_region.end;
        self.region_mut(src)?.top_level = false;
        self.current_region = Some(dest);
        log::trace!(
            "{}: spliced region {} into region {}",
            self.function.name,
            src.0,
            dest.0
        );
        Ok(())
    }

    /// Lay out `blocks` contiguously, in order, where the first of them
    /// currently sits (or at the end if it is unplaced). Each unterminated
    /// block except the last falls through to its successor in the list.
    pub fn concatenate_blocks(&mut self, blocks: &[BlockId]) -> Result<(), EmitterError> {
        let Some(&first) = blocks.first() else {
            return Ok(());
        };
        for &block in blocks {
            self.block_ref(block)?;
        }
        let anchor = self.layout_position(first);
        let before = anchor
            .map(|pos| {
                self.function.layout[..pos]
                    .iter()
                    .filter(|b| !blocks.contains(b))
                    .count()
            })
            .unwrap_or(usize::MAX);
        self.function.layout.retain(|b| !blocks.contains(b));
        let insert_at = before.min(self.function.layout.len());
        for (offset, &block) in blocks.iter().enumerate() {
            self.function.layout.insert(insert_at + offset, block);
        }

        for pair in blocks.windows(2) {
            if !self.is_terminated(pair[0])? {
                self.terminate_block(pair[0], Terminator::Branch(pair[1]))?;
            }
        }
        Ok(())
    }

    // --- Tags -------------------------------------------------------------

    pub fn include_in_header(&mut self) {
        self.function.include_in_header = true;
    }

    pub fn include_in_predict_interface(&mut self) {
        self.function.include_in_predict_interface = true;
    }

    pub fn set_include_in_header(&mut self, include: bool) {
        self.function.include_in_header = include;
    }

    // --- Completion -------------------------------------------------------

    /// Link top-level regions, close open blocks, and check branch targets.
    pub fn finish(mut self) -> Result<IrFunction, EmitterError> {
        let top_level: Vec<BlockRegion> = self.function.top_level_regions().copied().collect();
        for pair in top_level.windows(2) {
            if !self.is_terminated(pair[0].end)? {
                self.terminate_block(pair[0].end, Terminator::Branch(pair[1].start))?;
            }
        }

        let void = self.function.return_type == IrType::Void;
        let name = self.function.name.clone();
        let placed = self.function.layout.clone();
        for id in &placed {
            let block = self.block_mut(*id)?;
            if block.is_terminated() {
                continue;
            }
            if !void {
                return Err(EmitterError::MissingReturn {
                    function: name,
                    block: block.label.clone(),
                });
            }
            block.terminator = Some(Terminator::Return(None));
        }

        for id in &placed {
            let successors = self
                .block_ref(*id)?
                .terminator
                .as_ref()
                .map(Terminator::successors)
                .unwrap_or_default();
            for target in successors {
                if !self.function.is_placed(target) {
                    return Err(EmitterError::UnplacedBlock(
                        self.block_label(target)?.to_string(),
                    ));
                }
            }
        }
        Ok(self.function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn void_fn() -> FunctionEmitter {
        FunctionEmitter::new(
            "f",
            IrType::Void,
            vec![
                ("input".into(), IrType::Float.pointer_to()),
                ("output".into(), IrType::Float.pointer_to()),
            ],
        )
    }

    #[test]
    fn labels_are_unique() {
        let mut f = void_fn();
        let a = f.block("node");
        let b = f.block("node");
        assert_eq!(f.block_label(a).unwrap(), "node");
        assert_eq!(f.block_label(b).unwrap(), "node.1");
    }

    #[test]
    fn allocas_stay_at_entry_top() {
        let mut f = void_fn();
        f.comment("first").unwrap();
        f.alloca(IrType::Int32, 1).unwrap();
        f.alloca(IrType::Float, 4).unwrap();
        let entry = &f.function().blocks[0];
        assert!(matches!(entry.instructions[0], Instruction::Alloca { .. }));
        assert!(matches!(entry.instructions[1], Instruction::Alloca { .. }));
        assert!(matches!(entry.instructions[2], Instruction::Comment(_)));
    }

    #[test]
    fn typed_operations() {
        let mut f = void_fn();
        let x = f.value_at(f.argument(0).unwrap(), Value::Literal(Literal::Int32(1))).unwrap();
        assert_eq!(f.value_type(&x).unwrap(), IrType::Float);
        let y = f.binary(BinaryOp::Mul, x.clone(), Value::Literal(Literal::Float(2.0))).unwrap();
        f.set_value_at(f.argument(1).unwrap(), Value::Literal(Literal::Int32(0)), y)
            .unwrap();

        let err = f
            .binary(BinaryOp::Add, x.clone(), Value::Literal(Literal::Double(1.0)))
            .unwrap_err();
        assert!(matches!(err, EmitterError::TypeMismatch { .. }));
        assert!(matches!(
            f.load(x).unwrap_err(),
            EmitterError::PointerExpected { .. }
        ));
        assert!(matches!(
            f.argument(2).unwrap_err(),
            EmitterError::ArgumentOutOfRange { index: 2, .. }
        ));
    }

    #[test]
    fn terminated_block_rejects_code() {
        let mut f = void_fn();
        f.ret(None).unwrap();
        assert!(matches!(
            f.comment("late").unwrap_err(),
            EmitterError::BlockTerminated(_)
        ));
        assert!(matches!(f.ret(None).unwrap_err(), EmitterError::BlockTerminated(_)));
    }

    #[test]
    fn for_loop_shape() {
        let mut f = void_fn();
        let l = f.begin_for(4, "loop").unwrap();
        let x = f.value_at(f.argument(0).unwrap(), l.index.clone()).unwrap();
        f.set_value_at(f.argument(1).unwrap(), l.index.clone(), x).unwrap();
        f.end_for(l).unwrap();
        let func = f.finish().unwrap();
        assert_eq!(
            func.block_labels(),
            vec!["entry", "loop.cond", "loop.body", "loop.end"]
        );
    }

    #[test]
    fn concat_regions_splices_and_links() {
        let mut f = void_fn();
        let r0 = f.add_region(BlockId(0)).unwrap();
        let a = f.begin_block("a");
        let ra = f.add_region(a).unwrap();
        let b = f.begin_block("b");
        let rb = f.add_region(b).unwrap();
        let c = f.begin_block("c");
        let rc = f.add_region(c).unwrap();

        // Merge c into a: layout becomes entry, a, c, b.
        f.concat_regions(ra, rc).unwrap();
        assert_eq!(f.current_region(), Some(ra));
        assert_eq!(f.region(ra).unwrap().end, c);
        assert!(!f.region(rc).unwrap().top_level);
        assert_eq!(f.function().block_labels(), vec!["entry", "a", "c", "b"]);

        let func = f.finish().unwrap();
        // Top-level regions r0, ra, rb are chained in creation order.
        assert_eq!(func.block(BlockId(0)).unwrap().terminator, Some(Terminator::Branch(a)));
        assert_eq!(func.block(a).unwrap().terminator, Some(Terminator::Branch(c)));
        assert_eq!(func.block(c).unwrap().terminator, Some(Terminator::Branch(b)));
        assert_eq!(func.block(b).unwrap().terminator, Some(Terminator::Return(None)));
        let _ = (r0, rb);
    }

    #[test]
    fn concatenate_blocks_builds_chain() {
        let mut f = void_fn();
        let done = f.detached_block("done");
        let cond = f.detached_block("cond");
        let then_block = f.detached_block("then");
        let else_block = f.detached_block("else");
        f.set_current_block(cond).unwrap();
        f.cond_branch(Value::Literal(Literal::Bool(true)), then_block, else_block)
            .unwrap();
        f.set_current_block(then_block).unwrap();
        f.ret(None).unwrap();

        f.concatenate_blocks(&[cond, then_block, else_block, done]).unwrap();
        f.set_current_block(BlockId(0)).unwrap();
        f.branch(cond).unwrap();
        let func = f.finish().unwrap();
        assert_eq!(func.block_labels(), vec!["entry", "cond", "then", "else", "done"]);
        assert_eq!(
            func.block(else_block).unwrap().terminator,
            Some(Terminator::Branch(done))
        );
    }

    #[test]
    fn unplaced_branch_target_is_an_error() {
        let mut f = void_fn();
        let lost = f.detached_block("lost");
        f.branch(lost).unwrap();
        assert!(matches!(f.finish().unwrap_err(), EmitterError::UnplacedBlock(l) if l == "lost"));
    }

    #[test]
    fn non_void_function_must_return() {
        let f = FunctionEmitter::new("g", IrType::Int32, vec![]);
        assert!(matches!(
            f.finish().unwrap_err(),
            EmitterError::MissingReturn { .. }
        ));
    }
}

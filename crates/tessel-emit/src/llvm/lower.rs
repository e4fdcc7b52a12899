//! Lowering of a finished [`IrModule`] to an inkwell module.

use std::collections::HashMap;

use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::targets::{TargetData, TargetTriple};
use inkwell::types::{BasicMetadataTypeEnum, BasicType, FunctionType};
use inkwell::values::{
    BasicMetadataValueEnum, BasicValueEnum, FloatValue, FunctionValue, IntValue, PointerValue,
};
use inkwell::{AddressSpace, FloatPredicate, IntPredicate};

use crate::error::EmitterError;
use crate::ir::{
    BinaryOp, BlockId, Instruction, IrFunction, IrModule, Predicate, Terminator, UnaryOp, Value,
};
use crate::types::{IrType, Literal};

use super::types::{basic_type, to_llvm_type};

fn build_err(stage: &str, e: impl std::fmt::Display) -> EmitterError {
    EmitterError::Llvm {
        stage: stage.into(),
        message: e.to_string(),
    }
}

/// Lower `ir` into a new LLVM module owned by `context`, then verify it.
pub fn lower_module<'ctx>(context: &'ctx Context, ir: &IrModule) -> Result<Module<'ctx>, EmitterError> {
    let module = context.create_module(&ir.name);
    if !ir.target_triple.is_empty() {
        module.set_triple(&TargetTriple::create(&ir.target_triple));
    }
    if !ir.data_layout.is_empty() {
        module.set_data_layout(&TargetData::create(&ir.data_layout).get_data_layout());
    }

    // Struct bodies may refer to each other, so declare every name first.
    let structs: Vec<_> = ir
        .structs
        .iter()
        .map(|def| (def, context.opaque_struct_type(&def.name)))
        .collect();
    for (def, llvm_struct) in &structs {
        let fields = def
            .fields
            .iter()
            .map(|(_, ty)| basic_type(ty, context, &module))
            .collect::<Result<Vec<_>, _>>()?;
        llvm_struct.set_body(&fields, false);
    }

    for global in &ir.globals {
        let ty = basic_type(&global.ty, context, &module)?;
        let value = module.add_global(ty, Some(AddressSpace::default()), &global.name);
        let init = match &global.initializer {
            Some(values) => const_initializer(&global.ty, values, context)?,
            None => ty.const_zero(),
        };
        value.set_initializer(&init);
        value.set_constant(global.constant);
    }

    for decl in &ir.externs {
        let fn_type = function_type(&decl.return_type, &decl.params, context, &module)?;
        module.add_function(&decl.name, fn_type, None);
    }

    let mut declared = Vec::with_capacity(ir.functions.len());
    for function in &ir.functions {
        let params: Vec<IrType> = function.params.iter().map(|(_, ty)| ty.clone()).collect();
        let fn_type = function_type(&function.return_type, &params, context, &module)?;
        declared.push(module.add_function(&function.name, fn_type, None));
    }

    let builder = context.create_builder();
    for (function, llvm_fn) in ir.functions.iter().zip(declared) {
        let mut lowering = FunctionLowering {
            context,
            module: &module,
            builder: &builder,
            function,
            llvm_fn,
            blocks: HashMap::new(),
            values: vec![None; function.value_types.len()],
        };
        lowering.lower()?;
    }

    module
        .verify()
        .map_err(|e| build_err("verify", e.to_string()))?;
    log::debug!(
        "lowered module {} ({} function(s)) to LLVM",
        ir.name,
        ir.functions.len()
    );
    Ok(module)
}

fn function_type<'ctx>(
    return_type: &IrType,
    params: &[IrType],
    context: &'ctx Context,
    module: &Module<'ctx>,
) -> Result<FunctionType<'ctx>, EmitterError> {
    let params = params
        .iter()
        .map(|ty| basic_type(ty, context, module).map(BasicMetadataTypeEnum::from))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(match to_llvm_type(return_type, context, module)? {
        Some(ty) => ty.fn_type(&params, false),
        None => context.void_type().fn_type(&params, false),
    })
}

fn literal<'ctx>(context: &'ctx Context, lit: &Literal) -> BasicValueEnum<'ctx> {
    match *lit {
        Literal::Bool(v) => context.bool_type().const_int(u64::from(v), false).into(),
        Literal::Int32(v) => context.i32_type().const_int(v as u64, true).into(),
        Literal::Int64(v) => context.i64_type().const_int(v as u64, true).into(),
        Literal::Float(v) => context.f32_type().const_float(f64::from(v)).into(),
        Literal::Double(v) => context.f64_type().const_float(v).into(),
    }
}

fn const_initializer<'ctx>(
    ty: &IrType,
    values: &[Literal],
    context: &'ctx Context,
) -> Result<BasicValueEnum<'ctx>, EmitterError> {
    let unsupported = || EmitterError::NotSupported(format!("constant initializer of type {ty}"));
    match ty {
        IrType::Array(inner, _) => match inner.as_ref() {
            IrType::Bool | IrType::Int32 | IrType::Int64 => {
                let elements = values
                    .iter()
                    .map(|v| match literal(context, v) {
                        BasicValueEnum::IntValue(i) => Ok(i),
                        _ => Err(unsupported()),
                    })
                    .collect::<Result<Vec<IntValue>, _>>()?;
                let element_ty = match inner.as_ref() {
                    IrType::Bool => context.bool_type(),
                    IrType::Int32 => context.i32_type(),
                    _ => context.i64_type(),
                };
                Ok(element_ty.const_array(&elements).into())
            }
            IrType::Float | IrType::Double => {
                let elements = values
                    .iter()
                    .map(|v| match literal(context, v) {
                        BasicValueEnum::FloatValue(f) => Ok(f),
                        _ => Err(unsupported()),
                    })
                    .collect::<Result<Vec<FloatValue>, _>>()?;
                let element_ty = match inner.as_ref() {
                    IrType::Float => context.f32_type(),
                    _ => context.f64_type(),
                };
                Ok(element_ty.const_array(&elements).into())
            }
            _ => Err(unsupported()),
        },
        scalar if scalar.is_scalar() => match values {
            [value] => Ok(literal(context, value)),
            _ => Err(unsupported()),
        },
        _ => Err(unsupported()),
    }
}

fn bit_width(ty: &IrType) -> u32 {
    match ty {
        IrType::Bool => 1,
        IrType::Int32 | IrType::Float => 32,
        _ => 64,
    }
}

struct FunctionLowering<'a, 'ctx> {
    context: &'ctx Context,
    module: &'a Module<'ctx>,
    builder: &'a Builder<'ctx>,
    function: &'a IrFunction,
    llvm_fn: FunctionValue<'ctx>,
    blocks: HashMap<BlockId, BasicBlock<'ctx>>,
    values: Vec<Option<BasicValueEnum<'ctx>>>,
}

impl<'a, 'ctx> FunctionLowering<'a, 'ctx> {
    fn lower(&mut self) -> Result<(), EmitterError> {
        for (id, block) in self.function.placed_blocks() {
            let llvm_block = self.context.append_basic_block(self.llvm_fn, &block.label);
            self.blocks.insert(id, llvm_block);
        }
        for (id, block) in self.function.placed_blocks() {
            self.builder.position_at_end(self.llvm_block(id)?);
            for inst in &block.instructions {
                self.instruction(inst)?;
            }
            let terminator = block
                .terminator
                .as_ref()
                .ok_or_else(|| EmitterError::MissingReturn {
                    function: self.function.name.clone(),
                    block: block.label.clone(),
                })?;
            self.terminator(terminator)?;
        }
        Ok(())
    }

    fn llvm_block(&self, id: BlockId) -> Result<BasicBlock<'ctx>, EmitterError> {
        self.blocks
            .get(&id)
            .copied()
            .ok_or_else(|| EmitterError::UnplacedBlock(format!("<block {}>", id.0)))
    }

    fn ir_type(&self, value: &Value) -> Result<IrType, EmitterError> {
        self.function
            .operand_type(value)
            .ok_or_else(|| EmitterError::VariableNotFound(value.to_string()))
    }

    fn operand(&self, value: &Value) -> Result<BasicValueEnum<'ctx>, EmitterError> {
        match value {
            Value::Literal(lit) => Ok(literal(self.context, lit)),
            Value::Argument(index) => {
                self.llvm_fn
                    .get_nth_param(*index)
                    .ok_or_else(|| EmitterError::ArgumentOutOfRange {
                        function: self.function.name.clone(),
                        index: *index,
                    })
            }
            Value::Local(id) => self
                .values
                .get(id.0 as usize)
                .copied()
                .flatten()
                .ok_or_else(|| EmitterError::VariableNotFound(value.to_string())),
            Value::Global { name, .. } => self
                .module
                .get_global(name)
                .map(|g| g.as_pointer_value().into())
                .ok_or_else(|| EmitterError::VariableNotFound(value.to_string())),
        }
    }

    fn int_operand(&self, value: &Value) -> Result<IntValue<'ctx>, EmitterError> {
        match self.operand(value)? {
            BasicValueEnum::IntValue(v) => Ok(v),
            _ => Err(EmitterError::TypeMismatch {
                context: format!("operand {value}"),
                expected: IrType::Int32,
                found: self.ir_type(value)?,
            }),
        }
    }

    fn float_operand(&self, value: &Value) -> Result<FloatValue<'ctx>, EmitterError> {
        match self.operand(value)? {
            BasicValueEnum::FloatValue(v) => Ok(v),
            _ => Err(EmitterError::TypeMismatch {
                context: format!("operand {value}"),
                expected: IrType::Double,
                found: self.ir_type(value)?,
            }),
        }
    }

    fn pointer_operand(&self, value: &Value) -> Result<PointerValue<'ctx>, EmitterError> {
        match self.operand(value)? {
            BasicValueEnum::PointerValue(v) => Ok(v),
            _ => Err(EmitterError::PointerExpected {
                context: format!("operand {value}"),
                found: self.ir_type(value)?,
            }),
        }
    }

    fn basic(&self, ty: &IrType) -> Result<inkwell::types::BasicTypeEnum<'ctx>, EmitterError> {
        basic_type(ty, self.context, self.module)
    }

    fn define(&mut self, result: crate::ir::ValueId, value: BasicValueEnum<'ctx>) {
        if let Some(slot) = self.values.get_mut(result.0 as usize) {
            *slot = Some(value);
        }
    }

    fn instruction(&mut self, inst: &Instruction) -> Result<(), EmitterError> {
        let b = self.builder;
        match inst {
            Instruction::Alloca { result, ty, count } => {
                let name = format!("v{}", result.0);
                let element = self.basic(ty)?;
                let ptr = if *count == 1 {
                    b.build_alloca(element, &name)
                } else {
                    let len = self.context.i32_type().const_int(*count as u64, false);
                    b.build_array_alloca(element, len, &name)
                }
                .map_err(|e| build_err("alloca", e))?;
                self.define(*result, ptr.into());
            }
            Instruction::Load { result, ty, ptr } => {
                let ptr = self.pointer_operand(ptr)?;
                let value = b
                    .build_load(self.basic(ty)?, ptr, &format!("v{}", result.0))
                    .map_err(|e| build_err("load", e))?;
                self.define(*result, value);
            }
            Instruction::Store { ptr, value } => {
                let ptr = self.pointer_operand(ptr)?;
                let value = self.operand(value)?;
                b.build_store(ptr, value).map_err(|e| build_err("store", e))?;
            }
            Instruction::ElementPtr { result, ptr, index } => {
                let pointee = match self.ir_type(ptr)? {
                    IrType::Pointer(inner) => *inner,
                    found => {
                        return Err(EmitterError::PointerExpected {
                            context: "element pointer".into(),
                            found,
                        })
                    }
                };
                let base = self.pointer_operand(ptr)?;
                let index = self.int_operand(index)?;
                let name = format!("v{}", result.0);
                let address = match &pointee {
                    IrType::Array(..) => {
                        let zero = self.context.i32_type().const_zero();
                        // SAFETY: indices stay within the array bounds established by the emitter.
                        unsafe { b.build_in_bounds_gep(self.basic(&pointee)?, base, &[zero, index], &name) }
                    }
                    element => {
                        // SAFETY: as above, for a pointer to consecutive elements.
                        unsafe { b.build_in_bounds_gep(self.basic(element)?, base, &[index], &name) }
                    }
                }
                .map_err(|e| build_err("gep", e))?;
                self.define(*result, address.into());
            }
            Instruction::FieldPtr {
                result,
                struct_name,
                ptr,
                field,
            } => {
                let struct_ty = self
                    .module
                    .get_struct_type(struct_name)
                    .ok_or_else(|| EmitterError::UnknownStruct(struct_name.clone()))?;
                let base = self.pointer_operand(ptr)?;
                let address = b
                    .build_struct_gep(struct_ty, base, *field, &format!("v{}", result.0))
                    .map_err(|e| build_err("struct_gep", e))?;
                self.define(*result, address.into());
            }
            Instruction::Binary {
                result,
                op,
                lhs,
                rhs,
            } => {
                let ty = self.ir_type(lhs)?;
                let name = format!("v{}", result.0);
                let value = if ty.is_float() {
                    self.float_binary(*op, lhs, rhs, &name)?
                } else {
                    self.int_binary(*op, lhs, rhs, &name)?
                };
                self.define(*result, value);
            }
            Instruction::Unary {
                result,
                op: UnaryOp::Neg,
                operand,
            } => {
                let name = format!("v{}", result.0);
                let value: BasicValueEnum<'ctx> = if self.ir_type(operand)?.is_float() {
                    b.build_float_neg(self.float_operand(operand)?, &name)
                        .map_err(|e| build_err("fneg", e))?
                        .into()
                } else {
                    b.build_int_neg(self.int_operand(operand)?, &name)
                        .map_err(|e| build_err("neg", e))?
                        .into()
                };
                self.define(*result, value);
            }
            Instruction::Compare {
                result,
                predicate,
                lhs,
                rhs,
            } => {
                let name = format!("v{}", result.0);
                let ty = self.ir_type(lhs)?;
                let value = if ty.is_float() {
                    let predicate = match predicate {
                        Predicate::Eq => FloatPredicate::OEQ,
                        Predicate::Ne => FloatPredicate::UNE,
                        Predicate::Lt => FloatPredicate::OLT,
                        Predicate::Le => FloatPredicate::OLE,
                        Predicate::Gt => FloatPredicate::OGT,
                        Predicate::Ge => FloatPredicate::OGE,
                    };
                    b.build_float_compare(
                        predicate,
                        self.float_operand(lhs)?,
                        self.float_operand(rhs)?,
                        &name,
                    )
                    .map_err(|e| build_err("fcmp", e))?
                } else {
                    let unsigned = ty == IrType::Bool;
                    let predicate = match (predicate, unsigned) {
                        (Predicate::Eq, _) => IntPredicate::EQ,
                        (Predicate::Ne, _) => IntPredicate::NE,
                        (Predicate::Lt, false) => IntPredicate::SLT,
                        (Predicate::Le, false) => IntPredicate::SLE,
                        (Predicate::Gt, false) => IntPredicate::SGT,
                        (Predicate::Ge, false) => IntPredicate::SGE,
                        (Predicate::Lt, true) => IntPredicate::ULT,
                        (Predicate::Le, true) => IntPredicate::ULE,
                        (Predicate::Gt, true) => IntPredicate::UGT,
                        (Predicate::Ge, true) => IntPredicate::UGE,
                    };
                    b.build_int_compare(
                        predicate,
                        self.int_operand(lhs)?,
                        self.int_operand(rhs)?,
                        &name,
                    )
                    .map_err(|e| build_err("icmp", e))?
                };
                self.define(*result, value.into());
            }
            Instruction::Cast { result, value, to } => {
                let from = self.ir_type(value)?;
                let cast = self.cast(value, &from, to, &format!("v{}", result.0))?;
                self.define(*result, cast);
            }
            Instruction::Call {
                result,
                callee,
                args,
            } => {
                let target = self
                    .module
                    .get_function(callee)
                    .ok_or_else(|| EmitterError::VariableNotFound(format!("@{callee}")))?;
                let args = args
                    .iter()
                    .map(|a| self.operand(a).map(BasicMetadataValueEnum::from))
                    .collect::<Result<Vec<_>, _>>()?;
                let name = result.map(|r| format!("v{}", r.0)).unwrap_or_default();
                let call = b
                    .build_call(target, &args, &name)
                    .map_err(|e| build_err("call", e))?;
                if let Some(result) = result {
                    let value = call
                        .try_as_basic_value()
                        .basic()
                        .ok_or_else(|| build_err("call", format!("@{callee} returns void")))?;
                    self.define(*result, value);
                }
            }
            Instruction::Comment(_) => {}
            Instruction::Print(text) => {
                let puts = match self.module.get_function("puts") {
                    Some(f) => f,
                    None => {
                        let ptr = self.context.ptr_type(AddressSpace::default());
                        let fn_type = self.context.i32_type().fn_type(&[ptr.into()], false);
                        self.module.add_function("puts", fn_type, None)
                    }
                };
                let text = b
                    .build_global_string_ptr(text, "diag")
                    .map_err(|e| build_err("string", e))?;
                b.build_call(puts, &[text.as_pointer_value().into()], "")
                    .map_err(|e| build_err("call", e))?;
            }
        }
        Ok(())
    }

    fn int_binary(
        &self,
        op: BinaryOp,
        lhs: &Value,
        rhs: &Value,
        name: &str,
    ) -> Result<BasicValueEnum<'ctx>, EmitterError> {
        let b = self.builder;
        let l = self.int_operand(lhs)?;
        let r = self.int_operand(rhs)?;
        let value = match op {
            BinaryOp::Add => b.build_int_add(l, r, name),
            BinaryOp::Sub => b.build_int_sub(l, r, name),
            BinaryOp::Mul => b.build_int_mul(l, r, name),
            BinaryOp::Div => b.build_int_signed_div(l, r, name),
            BinaryOp::Min | BinaryOp::Max => {
                let predicate = if op == BinaryOp::Min {
                    IntPredicate::SLT
                } else {
                    IntPredicate::SGT
                };
                let pick = b
                    .build_int_compare(predicate, l, r, "pick")
                    .map_err(|e| build_err("icmp", e))?;
                return b
                    .build_select(pick, l, r, name)
                    .map_err(|e| build_err("select", e));
            }
        }
        .map_err(|e| build_err("int arithmetic", e))?;
        Ok(value.into())
    }

    fn float_binary(
        &self,
        op: BinaryOp,
        lhs: &Value,
        rhs: &Value,
        name: &str,
    ) -> Result<BasicValueEnum<'ctx>, EmitterError> {
        let b = self.builder;
        let l = self.float_operand(lhs)?;
        let r = self.float_operand(rhs)?;
        let value = match op {
            BinaryOp::Add => b.build_float_add(l, r, name),
            BinaryOp::Sub => b.build_float_sub(l, r, name),
            BinaryOp::Mul => b.build_float_mul(l, r, name),
            BinaryOp::Div => b.build_float_div(l, r, name),
            BinaryOp::Min | BinaryOp::Max => {
                let predicate = if op == BinaryOp::Min {
                    FloatPredicate::OLT
                } else {
                    FloatPredicate::OGT
                };
                let pick = b
                    .build_float_compare(predicate, l, r, "pick")
                    .map_err(|e| build_err("fcmp", e))?;
                return b
                    .build_select(pick, l, r, name)
                    .map_err(|e| build_err("select", e));
            }
        }
        .map_err(|e| build_err("float arithmetic", e))?;
        Ok(value.into())
    }

    fn cast(
        &self,
        value: &Value,
        from: &IrType,
        to: &IrType,
        name: &str,
    ) -> Result<BasicValueEnum<'ctx>, EmitterError> {
        let b = self.builder;
        let err = |e| build_err("cast", e);
        if from == to {
            return self.operand(value);
        }
        let cast: BasicValueEnum<'ctx> = match (from.is_float(), to.is_float()) {
            (true, true) => {
                let v = self.float_operand(value)?;
                let target = self.basic(to)?.into_float_type();
                if bit_width(to) > bit_width(from) {
                    b.build_float_ext(v, target, name).map_err(err)?.into()
                } else {
                    b.build_float_trunc(v, target, name).map_err(err)?.into()
                }
            }
            (true, false) if *to == IrType::Bool => {
                let v = self.float_operand(value)?;
                let zero = v.get_type().const_zero();
                b.build_float_compare(FloatPredicate::UNE, v, zero, name)
                    .map_err(err)?
                    .into()
            }
            (true, false) => {
                let v = self.float_operand(value)?;
                let target = self.basic(to)?.into_int_type();
                b.build_float_to_signed_int(v, target, name).map_err(err)?.into()
            }
            (false, true) => {
                let v = self.int_operand(value)?;
                let target = self.basic(to)?.into_float_type();
                if *from == IrType::Bool {
                    b.build_unsigned_int_to_float(v, target, name).map_err(err)?.into()
                } else {
                    b.build_signed_int_to_float(v, target, name).map_err(err)?.into()
                }
            }
            (false, false) if *to == IrType::Bool => {
                let v = self.int_operand(value)?;
                let zero = v.get_type().const_zero();
                b.build_int_compare(IntPredicate::NE, v, zero, name)
                    .map_err(err)?
                    .into()
            }
            (false, false) => {
                let v = self.int_operand(value)?;
                let target = self.basic(to)?.into_int_type();
                if *from == IrType::Bool {
                    b.build_int_z_extend(v, target, name).map_err(err)?.into()
                } else if bit_width(to) > bit_width(from) {
                    b.build_int_s_extend(v, target, name).map_err(err)?.into()
                } else {
                    b.build_int_truncate(v, target, name).map_err(err)?.into()
                }
            }
        };
        Ok(cast)
    }

    fn terminator(&self, terminator: &Terminator) -> Result<(), EmitterError> {
        let b = self.builder;
        match terminator {
            Terminator::Branch(target) => {
                b.build_unconditional_branch(self.llvm_block(*target)?)
                    .map_err(|e| build_err("br", e))?;
            }
            Terminator::CondBranch {
                cond,
                then_block,
                else_block,
            } => {
                b.build_conditional_branch(
                    self.int_operand(cond)?,
                    self.llvm_block(*then_block)?,
                    self.llvm_block(*else_block)?,
                )
                .map_err(|e| build_err("br", e))?;
            }
            Terminator::Return(None) => {
                b.build_return(None).map_err(|e| build_err("ret", e))?;
            }
            Terminator::Return(Some(value)) => {
                let value = self.operand(value)?;
                b.build_return(Some(&value)).map_err(|e| build_err("ret", e))?;
            }
        }
        Ok(())
    }
}

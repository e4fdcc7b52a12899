//! IR type to LLVM type mapping.

use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::types::{BasicType, BasicTypeEnum};
use inkwell::AddressSpace;

use crate::error::EmitterError;
use crate::types::IrType;

/// Convert an IR type to an LLVM basic type. `Void` has no basic type and
/// maps to `None`.
///
/// Struct types must already be declared on `module`.
pub fn to_llvm_type<'ctx>(
    ty: &IrType,
    context: &'ctx Context,
    module: &Module<'ctx>,
) -> Result<Option<BasicTypeEnum<'ctx>>, EmitterError> {
    let lowered = match ty {
        IrType::Void => return Ok(None),
        IrType::Bool => context.bool_type().into(),
        IrType::Int32 => context.i32_type().into(),
        IrType::Int64 => context.i64_type().into(),
        IrType::Float => context.f32_type().into(),
        IrType::Double => context.f64_type().into(),
        // Opaque pointers: the pointee only matters at use sites.
        IrType::Pointer(_) => context.ptr_type(AddressSpace::default()).into(),
        IrType::Struct(name) => module
            .get_struct_type(name)
            .ok_or_else(|| EmitterError::UnknownStruct(name.clone()))?
            .into(),
        IrType::Array(inner, len) => {
            let element = basic_type(inner, context, module)?;
            let len = u32::try_from(*len)
                .map_err(|_| EmitterError::NotSupported(format!("array of {len} elements")))?;
            element.array_type(len).into()
        }
    };
    Ok(Some(lowered))
}

/// Like [`to_llvm_type`], but `Void` is an error.
pub fn basic_type<'ctx>(
    ty: &IrType,
    context: &'ctx Context,
    module: &Module<'ctx>,
) -> Result<BasicTypeEnum<'ctx>, EmitterError> {
    to_llvm_type(ty, context, module)?
        .ok_or_else(|| EmitterError::NotSupported("value of type void".into()))
}

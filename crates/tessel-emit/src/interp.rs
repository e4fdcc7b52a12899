//! Reference interpreter for finished modules.
//!
//! Memory is a set of allocations of scalar slots. Aggregates are flattened:
//! a struct occupies the slots of its fields in order, an array `n` copies of
//! its element. Pointers are `(allocation, offset)` pairs, and reading a slot
//! that was never written is an error rather than garbage.

use std::collections::HashMap;
use std::time::Instant;

use thiserror::Error;

use crate::ir::{
    BinaryOp, Instruction, IrFunction, IrModule, Predicate, Terminator, UnaryOp, Value,
};
use crate::types::{IrType, Literal};

/// Default bound on executed instructions per top-level call.
pub const DEFAULT_STEP_LIMIT: usize = 10_000_000;

/// Runtime timer returning milliseconds as a `double`. Provided by the
/// interpreter; native builds link it from the host runtime.
pub const CLOCK_FUNCTION: &str = "tessel_clock_ms";

#[derive(Debug, Error)]
pub enum InterpError {
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("'{function}' expects {expected} argument(s), got {found}")]
    ArgumentCount {
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("read of undefined value: {0}")]
    UndefinedValue(String),

    #[error("access at offset {offset} outside allocation {allocation} of {size} slot(s)")]
    OutOfBounds {
        allocation: usize,
        offset: usize,
        size: usize,
    },

    #[error("type error: {0}")]
    TypeError(String),

    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("integer division by zero")]
    DivisionByZero,

    #[error("block '{0}' has no terminator")]
    MissingTerminator(String),

    #[error("step limit of {0} instructions exceeded")]
    StepLimit(usize),
}

/// A value held in an interpreter slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuntimeValue {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Pointer { allocation: usize, offset: usize },
    Undefined,
}

impl From<Literal> for RuntimeValue {
    fn from(lit: Literal) -> Self {
        match lit {
            Literal::Bool(v) => RuntimeValue::Bool(v),
            Literal::Int32(v) => RuntimeValue::Int32(v),
            Literal::Int64(v) => RuntimeValue::Int64(v),
            Literal::Float(v) => RuntimeValue::Float(v),
            Literal::Double(v) => RuntimeValue::Double(v),
        }
    }
}

impl RuntimeValue {
    /// Numeric view of a scalar.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            RuntimeValue::Bool(v) => Some(f64::from(u8::from(v))),
            RuntimeValue::Int32(v) => Some(f64::from(v)),
            RuntimeValue::Int64(v) => Some(v as f64),
            RuntimeValue::Float(v) => Some(f64::from(v)),
            RuntimeValue::Double(v) => Some(v),
            RuntimeValue::Pointer { .. } | RuntimeValue::Undefined => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            RuntimeValue::Bool(v) => Some(i64::from(v)),
            RuntimeValue::Int32(v) => Some(i64::from(v)),
            RuntimeValue::Int64(v) => Some(v),
            _ => None,
        }
    }

    /// A scalar of type `ty` holding `value`, converting as a C cast would.
    pub fn from_f64(ty: &IrType, value: f64) -> Option<Self> {
        match ty {
            IrType::Bool => Some(RuntimeValue::Bool(value != 0.0)),
            IrType::Int32 => Some(RuntimeValue::Int32(value as i32)),
            IrType::Int64 => Some(RuntimeValue::Int64(value as i64)),
            IrType::Float => Some(RuntimeValue::Float(value as f32)),
            IrType::Double => Some(RuntimeValue::Double(value)),
            _ => None,
        }
    }

    fn zero(ty: &IrType) -> Self {
        Literal::zero(ty).map(Into::into).unwrap_or(RuntimeValue::Undefined)
    }
}

struct Frame<'a> {
    function: &'a IrFunction,
    args: Vec<RuntimeValue>,
    locals: Vec<Option<RuntimeValue>>,
}

/// Executes functions of one module against private memory.
pub struct Interpreter<'m> {
    module: &'m IrModule,
    memory: Vec<Vec<RuntimeValue>>,
    globals: HashMap<String, usize>,
    prints: Vec<String>,
    started: Instant,
    step_limit: usize,
    steps: usize,
}

impl<'m> Interpreter<'m> {
    /// Set up memory for every global of `module`.
    pub fn new(module: &'m IrModule) -> Result<Self, InterpError> {
        let mut interp = Self {
            module,
            memory: Vec::new(),
            globals: HashMap::new(),
            prints: Vec::new(),
            started: Instant::now(),
            step_limit: DEFAULT_STEP_LIMIT,
            steps: 0,
        };
        for global in &module.globals {
            let layout = interp.flatten(&global.ty)?;
            let slots = match &global.initializer {
                Some(values) if values.len() == layout.len() => {
                    values.iter().map(|&v| RuntimeValue::from(v)).collect()
                }
                Some(values) => {
                    return Err(InterpError::TypeError(format!(
                        "global '{}' has {} initializer(s) for {} slot(s)",
                        global.name,
                        values.len(),
                        layout.len()
                    )))
                }
                None => layout.iter().map(RuntimeValue::zero).collect(),
            };
            let allocation = interp.push_allocation(slots);
            interp.globals.insert(global.name.clone(), allocation);
        }
        Ok(interp)
    }

    pub fn with_step_limit(mut self, step_limit: usize) -> Self {
        self.step_limit = step_limit;
        self
    }

    /// Text produced by `print` instructions so far.
    pub fn prints(&self) -> &[String] {
        &self.prints
    }

    fn push_allocation(&mut self, slots: Vec<RuntimeValue>) -> usize {
        self.memory.push(slots);
        self.memory.len() - 1
    }

    /// Host-side buffer; returns a pointer to its first slot.
    pub fn alloc(&mut self, values: Vec<RuntimeValue>) -> RuntimeValue {
        RuntimeValue::Pointer {
            allocation: self.push_allocation(values),
            offset: 0,
        }
    }

    /// Host-side zero-filled storage for `count` values of `ty`.
    pub fn alloc_zeroed(&mut self, ty: &IrType, count: usize) -> Result<RuntimeValue, InterpError> {
        let layout = self.flatten(ty)?;
        let slots = (0..count)
            .flat_map(|_| layout.iter().map(RuntimeValue::zero))
            .collect();
        Ok(self.alloc(slots))
    }

    /// Read `len` consecutive slots starting at `ptr`.
    pub fn read(&self, ptr: RuntimeValue, len: usize) -> Result<Vec<RuntimeValue>, InterpError> {
        (0..len).map(|i| self.read_slot(ptr, i)).collect()
    }

    /// Pointer to a global.
    pub fn global(&self, name: &str) -> Result<RuntimeValue, InterpError> {
        self.globals
            .get(name)
            .map(|&allocation| RuntimeValue::Pointer {
                allocation,
                offset: 0,
            })
            .ok_or_else(|| InterpError::UndefinedValue(format!("@{name}")))
    }

    /// Call a function by name.
    pub fn call(&mut self, name: &str, args: &[RuntimeValue]) -> Result<Option<RuntimeValue>, InterpError> {
        self.steps = 0;
        self.invoke(name, args.to_vec())
    }

    fn invoke(&mut self, name: &str, args: Vec<RuntimeValue>) -> Result<Option<RuntimeValue>, InterpError> {
        let module = self.module;
        if let Some(function) = module.function(name) {
            if function.params.len() != args.len() {
                return Err(InterpError::ArgumentCount {
                    function: name.to_string(),
                    expected: function.params.len(),
                    found: args.len(),
                });
            }
            return self.run(function, args);
        }
        if module.extern_decl(name).is_some() {
            return self.call_extern(name);
        }
        Err(InterpError::UnknownFunction(name.to_string()))
    }

    fn call_extern(&mut self, name: &str) -> Result<Option<RuntimeValue>, InterpError> {
        match name {
            // Milliseconds since the interpreter was created.
            CLOCK_FUNCTION => Ok(Some(RuntimeValue::Double(
                self.started.elapsed().as_secs_f64() * 1000.0,
            ))),
            other => Err(InterpError::UnknownFunction(other.to_string())),
        }
    }

    // --- Layout -----------------------------------------------------------

    fn flatten(&self, ty: &IrType) -> Result<Vec<IrType>, InterpError> {
        match ty {
            IrType::Void => Err(InterpError::TypeError("storage of type void".into())),
            IrType::Struct(name) => {
                let def = self
                    .module
                    .struct_def(name)
                    .ok_or_else(|| InterpError::UnknownType(name.clone()))?;
                let mut slots = Vec::new();
                for (_, field) in &def.fields {
                    slots.extend(self.flatten(field)?);
                }
                Ok(slots)
            }
            IrType::Array(inner, len) => {
                let element = self.flatten(inner)?;
                Ok((0..*len).flat_map(|_| element.iter().cloned()).collect())
            }
            scalar => Ok(vec![scalar.clone()]),
        }
    }

    fn slot_count(&self, ty: &IrType) -> Result<usize, InterpError> {
        Ok(self.flatten(ty)?.len())
    }

    // --- Memory -----------------------------------------------------------

    fn locate(&self, ptr: RuntimeValue, extra: usize) -> Result<(usize, usize), InterpError> {
        let RuntimeValue::Pointer { allocation, offset } = ptr else {
            return Err(InterpError::TypeError(format!("{ptr:?} is not a pointer")));
        };
        let size = self
            .memory
            .get(allocation)
            .map(Vec::len)
            .ok_or(InterpError::OutOfBounds {
                allocation,
                offset,
                size: 0,
            })?;
        let at = offset + extra;
        if at >= size {
            return Err(InterpError::OutOfBounds {
                allocation,
                offset: at,
                size,
            });
        }
        Ok((allocation, at))
    }

    fn read_slot(&self, ptr: RuntimeValue, extra: usize) -> Result<RuntimeValue, InterpError> {
        let (allocation, at) = self.locate(ptr, extra)?;
        Ok(self.memory[allocation][at])
    }

    fn write_slot(&mut self, ptr: RuntimeValue, value: RuntimeValue) -> Result<(), InterpError> {
        let (allocation, at) = self.locate(ptr, 0)?;
        self.memory[allocation][at] = value;
        Ok(())
    }

    // --- Execution --------------------------------------------------------

    fn eval(&self, frame: &Frame<'_>, value: &Value) -> Result<RuntimeValue, InterpError> {
        match value {
            Value::Literal(lit) => Ok((*lit).into()),
            Value::Argument(index) => frame
                .args
                .get(*index as usize)
                .copied()
                .ok_or_else(|| InterpError::UndefinedValue(format!("%arg{index}"))),
            Value::Local(id) => frame
                .locals
                .get(id.0 as usize)
                .copied()
                .flatten()
                .ok_or_else(|| InterpError::UndefinedValue(format!("%{}", id.0))),
            Value::Global { name, .. } => self.global(name),
        }
    }

    fn static_type(frame: &Frame<'_>, value: &Value) -> Result<IrType, InterpError> {
        frame
            .function
            .operand_type(value)
            .ok_or_else(|| InterpError::UndefinedValue(format!("{value}")))
    }

    fn run(&mut self, function: &'m IrFunction, args: Vec<RuntimeValue>) -> Result<Option<RuntimeValue>, InterpError> {
        let mut frame = Frame {
            function,
            args,
            locals: vec![None; function.value_types.len()],
        };
        let mut current = function
            .entry()
            .ok_or_else(|| InterpError::MissingTerminator(function.name.clone()))?;

        loop {
            let block = function
                .block(current)
                .ok_or_else(|| InterpError::MissingTerminator(format!("<block {}>", current.0)))?;
            for inst in &block.instructions {
                self.steps += 1;
                if self.steps > self.step_limit {
                    return Err(InterpError::StepLimit(self.step_limit));
                }
                self.execute(&mut frame, inst)?;
            }
            match &block.terminator {
                Some(Terminator::Branch(target)) => current = *target,
                Some(Terminator::CondBranch {
                    cond,
                    then_block,
                    else_block,
                }) => {
                    current = match self.eval(&frame, cond)? {
                        RuntimeValue::Bool(true) => *then_block,
                        RuntimeValue::Bool(false) => *else_block,
                        other => {
                            return Err(InterpError::TypeError(format!(
                                "branch on non-boolean {other:?}"
                            )))
                        }
                    };
                }
                Some(Terminator::Return(value)) => {
                    return value.as_ref().map(|v| self.eval(&frame, v)).transpose();
                }
                None => return Err(InterpError::MissingTerminator(block.label.clone())),
            }
        }
    }

    fn execute(&mut self, frame: &mut Frame<'_>, inst: &Instruction) -> Result<(), InterpError> {
        let (result, value) = match inst {
            Instruction::Alloca { result, ty, count } => {
                let slots = self.slot_count(ty)? * count;
                let ptr = self.alloc(vec![RuntimeValue::Undefined; slots]);
                (Some(*result), ptr)
            }
            Instruction::Load { result, ptr, .. } => {
                let ptr = self.eval(frame, ptr)?;
                let value = self.read_slot(ptr, 0)?;
                if value == RuntimeValue::Undefined {
                    return Err(InterpError::UndefinedValue(format!("load from {ptr:?}")));
                }
                (Some(*result), value)
            }
            Instruction::Store { ptr, value } => {
                let ptr = self.eval(frame, ptr)?;
                let value = self.eval(frame, value)?;
                self.write_slot(ptr, value)?;
                return Ok(());
            }
            Instruction::ElementPtr { result, ptr, index } => {
                let element = match Self::static_type(frame, ptr)? {
                    IrType::Pointer(inner) => match *inner {
                        IrType::Array(element, _) => *element,
                        other => other,
                    },
                    other => {
                        return Err(InterpError::TypeError(format!("element pointer on {other}")))
                    }
                };
                let stride = self.slot_count(&element)?;
                let index = self
                    .eval(frame, index)?
                    .as_i64()
                    .ok_or_else(|| InterpError::TypeError("non-integer element index".into()))?;
                let index = usize::try_from(index).map_err(|_| InterpError::OutOfBounds {
                    allocation: 0,
                    offset: 0,
                    size: 0,
                })?;
                let ptr = offset_pointer(self.eval(frame, ptr)?, index * stride)?;
                (Some(*result), ptr)
            }
            Instruction::FieldPtr {
                result,
                struct_name,
                ptr,
                field,
            } => {
                let def = self
                    .module
                    .struct_def(struct_name)
                    .ok_or_else(|| InterpError::UnknownType(struct_name.clone()))?;
                let mut skip = 0;
                for (_, ty) in def.fields.iter().take(*field as usize) {
                    skip += self.slot_count(ty)?;
                }
                let ptr = offset_pointer(self.eval(frame, ptr)?, skip)?;
                (Some(*result), ptr)
            }
            Instruction::Binary {
                result,
                op,
                lhs,
                rhs,
            } => {
                let lhs = self.eval(frame, lhs)?;
                let rhs = self.eval(frame, rhs)?;
                (Some(*result), binary(*op, lhs, rhs)?)
            }
            Instruction::Unary {
                result,
                op: UnaryOp::Neg,
                operand,
            } => {
                let value = match self.eval(frame, operand)? {
                    RuntimeValue::Int32(v) => RuntimeValue::Int32(v.wrapping_neg()),
                    RuntimeValue::Int64(v) => RuntimeValue::Int64(v.wrapping_neg()),
                    RuntimeValue::Float(v) => RuntimeValue::Float(-v),
                    RuntimeValue::Double(v) => RuntimeValue::Double(-v),
                    other => return Err(InterpError::TypeError(format!("neg of {other:?}"))),
                };
                (Some(*result), value)
            }
            Instruction::Compare {
                result,
                predicate,
                lhs,
                rhs,
            } => {
                let lhs = self.eval(frame, lhs)?;
                let rhs = self.eval(frame, rhs)?;
                (Some(*result), RuntimeValue::Bool(compare(*predicate, lhs, rhs)?))
            }
            Instruction::Cast { result, value, to } => {
                let value = self.eval(frame, value)?;
                let cast = match (value, to) {
                    (RuntimeValue::Int64(v), IrType::Int32) => Some(RuntimeValue::Int32(v as i32)),
                    (RuntimeValue::Int32(v), IrType::Int64) => Some(RuntimeValue::Int64(i64::from(v))),
                    (RuntimeValue::Int64(v), IrType::Int64) => Some(RuntimeValue::Int64(v)),
                    (v, ty) => v.as_f64().and_then(|f| RuntimeValue::from_f64(ty, f)),
                };
                let cast = cast.ok_or_else(|| InterpError::TypeError(format!("cast {value:?} to {to}")))?;
                (Some(*result), cast)
            }
            Instruction::Call {
                result,
                callee,
                args,
            } => {
                let args = args
                    .iter()
                    .map(|a| self.eval(frame, a))
                    .collect::<Result<Vec<_>, _>>()?;
                let returned = self.invoke(callee, args)?;
                match (result, returned) {
                    (Some(result), Some(value)) => (Some(*result), value),
                    (Some(_), None) => {
                        return Err(InterpError::UndefinedValue(format!("result of @{callee}")))
                    }
                    (None, _) => return Ok(()),
                }
            }
            Instruction::Comment(_) => return Ok(()),
            Instruction::Print(text) => {
                self.prints.push(text.clone());
                return Ok(());
            }
        };
        if let Some(result) = result {
            if let Some(slot) = frame.locals.get_mut(result.0 as usize) {
                *slot = Some(value);
            }
        }
        Ok(())
    }
}

fn offset_pointer(ptr: RuntimeValue, by: usize) -> Result<RuntimeValue, InterpError> {
    match ptr {
        RuntimeValue::Pointer { allocation, offset } => Ok(RuntimeValue::Pointer {
            allocation,
            offset: offset + by,
        }),
        other => Err(InterpError::TypeError(format!("{other:?} is not a pointer"))),
    }
}

fn binary(op: BinaryOp, lhs: RuntimeValue, rhs: RuntimeValue) -> Result<RuntimeValue, InterpError> {
    use RuntimeValue::*;
    Ok(match (lhs, rhs) {
        (Int32(a), Int32(b)) => Int32(match op {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div => a.checked_div(b).ok_or(InterpError::DivisionByZero)?,
            BinaryOp::Min => a.min(b),
            BinaryOp::Max => a.max(b),
        }),
        (Int64(a), Int64(b)) => Int64(match op {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div => a.checked_div(b).ok_or(InterpError::DivisionByZero)?,
            BinaryOp::Min => a.min(b),
            BinaryOp::Max => a.max(b),
        }),
        (Float(a), Float(b)) => Float(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Min => a.min(b),
            BinaryOp::Max => a.max(b),
        }),
        (Double(a), Double(b)) => Double(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Min => a.min(b),
            BinaryOp::Max => a.max(b),
        }),
        (a, b) => {
            return Err(InterpError::TypeError(format!("{op} of {a:?} and {b:?}")));
        }
    })
}

fn compare(predicate: Predicate, lhs: RuntimeValue, rhs: RuntimeValue) -> Result<bool, InterpError> {
    let ordering = match (lhs, rhs) {
        (RuntimeValue::Bool(a), RuntimeValue::Bool(b)) => a.partial_cmp(&b),
        (RuntimeValue::Int32(a), RuntimeValue::Int32(b)) => a.partial_cmp(&b),
        (RuntimeValue::Int64(a), RuntimeValue::Int64(b)) => a.partial_cmp(&b),
        (RuntimeValue::Float(a), RuntimeValue::Float(b)) => a.partial_cmp(&b),
        (RuntimeValue::Double(a), RuntimeValue::Double(b)) => a.partial_cmp(&b),
        (a, b) => {
            return Err(InterpError::TypeError(format!("compare {a:?} with {b:?}")));
        }
    };
    use std::cmp::Ordering::*;
    // Unordered (NaN) compares false except for `ne`.
    Ok(match (predicate, ordering) {
        (Predicate::Ne, None) => true,
        (_, None) => false,
        (Predicate::Eq, Some(o)) => o == Equal,
        (Predicate::Ne, Some(o)) => o != Equal,
        (Predicate::Lt, Some(o)) => o == Less,
        (Predicate::Le, Some(o)) => o != Greater,
        (Predicate::Gt, Some(o)) => o == Greater,
        (Predicate::Ge, Some(o)) => o != Less,
    })
}

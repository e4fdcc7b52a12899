//! Textual rendering of the IR.

use std::fmt;

use crate::ir::{
    BinaryOp, Instruction, IrFunction, IrModule, Predicate, Terminator, UnaryOp, Value,
};

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Literal(lit) => write!(f, "{lit}"),
            Value::Argument(index) => write!(f, "%arg{index}"),
            Value::Local(id) => write!(f, "%{}", id.0),
            Value::Global { name, .. } => write!(f, "@{name}"),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Min => "min",
            BinaryOp::Max => "max",
        };
        f.write_str(name)
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Neg => f.write_str("neg"),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Predicate::Eq => "eq",
            Predicate::Ne => "ne",
            Predicate::Lt => "lt",
            Predicate::Le => "le",
            Predicate::Gt => "gt",
            Predicate::Ge => "ge",
        };
        f.write_str(name)
    }
}

fn join(values: &[Value]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn write_instruction(f: &mut fmt::Formatter<'_>, inst: &Instruction) -> fmt::Result {
    match inst {
        Instruction::Alloca { result, ty, count } => {
            write!(f, "%{} = alloca {ty}, {count}", result.0)
        }
        Instruction::Load { result, ty, ptr } => write!(f, "%{} = load {ty}, {ptr}", result.0),
        Instruction::Store { ptr, value } => write!(f, "store {value}, {ptr}"),
        Instruction::ElementPtr { result, ptr, index } => {
            write!(f, "%{} = elementptr {ptr}, {index}", result.0)
        }
        Instruction::FieldPtr {
            result,
            struct_name,
            ptr,
            field,
        } => write!(f, "%{} = fieldptr %{struct_name}, {ptr}, {field}", result.0),
        Instruction::Binary {
            result,
            op,
            lhs,
            rhs,
        } => write!(f, "%{} = {op} {lhs}, {rhs}", result.0),
        Instruction::Unary {
            result,
            op,
            operand,
        } => write!(f, "%{} = {op} {operand}", result.0),
        Instruction::Compare {
            result,
            predicate,
            lhs,
            rhs,
        } => write!(f, "%{} = cmp {predicate} {lhs}, {rhs}", result.0),
        Instruction::Cast { result, value, to } => {
            write!(f, "%{} = cast {value} to {to}", result.0)
        }
        Instruction::Call {
            result: Some(result),
            callee,
            args,
        } => write!(f, "%{} = call @{callee}({})", result.0, join(args)),
        Instruction::Call {
            result: None,
            callee,
            args,
        } => write!(f, "call @{callee}({})", join(args)),
        Instruction::Comment(text) => write!(f, "; {text}"),
        Instruction::Print(text) => write!(f, "print {text:?}"),
    }
}

impl fmt::Display for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .enumerate()
            .map(|(i, (name, ty))| format!("{ty} %arg{i} /* {name} */"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "define {} @{}({params})", self.return_type, self.name)?;
        if self.include_in_header {
            write!(f, " #header")?;
        }
        if self.include_in_predict_interface {
            write!(f, " #predict")?;
        }
        writeln!(f, " {{")?;
        for (_, block) in self.placed_blocks() {
            writeln!(f, "{}:", block.label)?;
            for inst in &block.instructions {
                write!(f, "  ")?;
                write_instruction(f, inst)?;
                writeln!(f)?;
            }
            match &block.terminator {
                Some(Terminator::Branch(target)) => {
                    writeln!(f, "  br {}", self.label_of(*target))?;
                }
                Some(Terminator::CondBranch {
                    cond,
                    then_block,
                    else_block,
                }) => writeln!(
                    f,
                    "  br {cond}, {}, {}",
                    self.label_of(*then_block),
                    self.label_of(*else_block)
                )?,
                Some(Terminator::Return(Some(value))) => writeln!(f, "  ret {value}")?,
                Some(Terminator::Return(None)) => writeln!(f, "  ret void")?,
                None => writeln!(f, "  ; unterminated")?,
            }
        }
        writeln!(f, "}}")
    }
}

impl IrFunction {
    fn label_of(&self, id: crate::ir::BlockId) -> String {
        self.block(id)
            .map(|b| b.label.clone())
            .unwrap_or_else(|| format!("<block {}>", id.0))
    }
}

impl fmt::Display for IrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; module {}", self.name)?;
        if !self.target_triple.is_empty() {
            writeln!(f, "target triple = {:?}", self.target_triple)?;
        }
        if !self.data_layout.is_empty() {
            writeln!(f, "target datalayout = {:?}", self.data_layout)?;
        }
        for (name, value) in &self.preprocessor_definitions {
            writeln!(f, "; #define {name} {value}")?;
        }
        for def in &self.structs {
            let fields = def
                .fields
                .iter()
                .map(|(_, ty)| ty.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(f, "%{} = type {{ {fields} }}", def.name)?;
        }
        for global in &self.globals {
            let kind = if global.constant { "constant" } else { "global" };
            match &global.initializer {
                Some(values) => {
                    let init = values
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ");
                    writeln!(f, "@{} = {kind} {} [{init}]", global.name, global.ty)?;
                }
                None => writeln!(f, "@{} = {kind} {} zeroinitializer", global.name, global.ty)?,
            }
        }
        for decl in &self.externs {
            let params = decl
                .params
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(f, "declare {} @{}({params})", decl.return_type, decl.name)?;
        }
        for function in &self.functions {
            writeln!(f)?;
            write!(f, "{function}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{BasicBlock, BlockId, IrFunction, IrModule, Terminator, Value};
    use crate::types::{IrType, Literal};

    #[test]
    fn function_text() {
        let mut entry = BasicBlock::new("entry");
        entry.terminator = Some(Terminator::Return(Some(Value::Literal(Literal::Int32(4)))));
        let function = IrFunction {
            name: "m_GetInputSize".into(),
            return_type: IrType::Int32,
            params: vec![],
            blocks: vec![entry],
            layout: vec![BlockId(0)],
            value_types: vec![],
            regions: vec![],
            include_in_header: true,
            include_in_predict_interface: false,
        };
        let module = IrModule {
            name: "m".into(),
            functions: vec![function],
            ..IrModule::default()
        };
        let text = module.to_string();
        assert!(text.contains("define i32 @m_GetInputSize() #header {"));
        assert!(text.contains("  ret 4"));
    }
}

//! The in-memory IR produced by the emitters.
//!
//! A function is a list of basic blocks plus a *layout*: the order in which
//! placed blocks appear. Blocks that were created but never placed are kept
//! out of the layout and must not be branched to. Values are in SSA form;
//! mutable state lives behind `alloca` slots or globals.

use serde::{Deserialize, Serialize};

use crate::types::{IrType, Literal, StructDef};

/// An SSA value produced by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueId(pub u32);

/// Index of a basic block within its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u32);

/// Handle into a function's region arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(pub u32);

/// An operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Value {
    Literal(Literal),
    /// The function parameter at this index.
    Argument(u32),
    Local(ValueId),
    /// Address of a module global whose contents have type `pointee`.
    Global { name: String, pointee: IrType },
}

impl From<Literal> for Value {
    fn from(lit: Literal) -> Self {
        Value::Literal(lit)
    }
}

impl From<ValueId> for Value {
    fn from(id: ValueId) -> Self {
        Value::Local(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnaryOp {
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Predicate {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Instruction {
    /// Stack slot for `count` consecutive values of `ty`; result is `ty*`.
    Alloca {
        result: ValueId,
        ty: IrType,
        count: usize,
    },
    Load {
        result: ValueId,
        ty: IrType,
        ptr: Value,
    },
    Store {
        ptr: Value,
        value: Value,
    },
    /// Address of element `index`. On `[n x T]*` the result is `T*`; on `T*`
    /// it is `T*` offset by `index` elements.
    ElementPtr {
        result: ValueId,
        ptr: Value,
        index: Value,
    },
    FieldPtr {
        result: ValueId,
        struct_name: String,
        ptr: Value,
        field: u32,
    },
    Binary {
        result: ValueId,
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
    },
    Unary {
        result: ValueId,
        op: UnaryOp,
        operand: Value,
    },
    Compare {
        result: ValueId,
        predicate: Predicate,
        lhs: Value,
        rhs: Value,
    },
    Cast {
        result: ValueId,
        value: Value,
        to: IrType,
    },
    Call {
        result: Option<ValueId>,
        callee: String,
        args: Vec<Value>,
    },
    Comment(String),
    /// Diagnostic output at run time.
    Print(String),
}

impl Instruction {
    pub fn result(&self) -> Option<ValueId> {
        match self {
            Instruction::Alloca { result, .. }
            | Instruction::Load { result, .. }
            | Instruction::ElementPtr { result, .. }
            | Instruction::FieldPtr { result, .. }
            | Instruction::Binary { result, .. }
            | Instruction::Unary { result, .. }
            | Instruction::Compare { result, .. }
            | Instruction::Cast { result, .. } => Some(*result),
            Instruction::Call { result, .. } => *result,
            Instruction::Store { .. } | Instruction::Comment(_) | Instruction::Print(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Terminator {
    Branch(BlockId),
    CondBranch {
        cond: Value,
        then_block: BlockId,
        else_block: BlockId,
    },
    Return(Option<Value>),
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Branch(target) => vec![*target],
            Terminator::CondBranch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Return(_) => vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub label: String,
    pub instructions: Vec<Instruction>,
    pub terminator: Option<Terminator>,
}

impl BasicBlock {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            instructions: Vec::new(),
            terminator: None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator.is_some()
    }
}

/// A contiguous run of blocks in a function's layout, from `start` to `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRegion {
    pub start: BlockId,
    pub end: BlockId,
    /// Cleared once the region has been spliced into another.
    pub top_level: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrFunction {
    pub name: String,
    pub return_type: IrType,
    pub params: Vec<(String, IrType)>,
    pub blocks: Vec<BasicBlock>,
    pub layout: Vec<BlockId>,
    pub value_types: Vec<IrType>,
    pub regions: Vec<BlockRegion>,
    pub include_in_header: bool,
    pub include_in_predict_interface: bool,
}

impl IrFunction {
    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.0 as usize)
    }

    pub fn value_type(&self, id: ValueId) -> Option<&IrType> {
        self.value_types.get(id.0 as usize)
    }

    /// Static type of an operand used in this function.
    pub fn operand_type(&self, value: &Value) -> Option<IrType> {
        match value {
            Value::Literal(lit) => Some(lit.ty()),
            Value::Argument(index) => self.params.get(*index as usize).map(|(_, ty)| ty.clone()),
            Value::Local(id) => self.value_type(*id).cloned(),
            Value::Global { pointee, .. } => Some(pointee.clone().pointer_to()),
        }
    }

    /// The first placed block.
    pub fn entry(&self) -> Option<BlockId> {
        self.layout.first().copied()
    }

    pub fn is_placed(&self, id: BlockId) -> bool {
        self.layout.contains(&id)
    }

    /// Placed blocks in layout order.
    pub fn placed_blocks(&self) -> impl Iterator<Item = (BlockId, &BasicBlock)> + '_ {
        self.layout
            .iter()
            .filter_map(|&id| self.block(id).map(|b| (id, b)))
    }

    /// Labels of placed blocks in layout order.
    pub fn block_labels(&self) -> Vec<&str> {
        self.placed_blocks().map(|(_, b)| b.label.as_str()).collect()
    }

    pub fn find_block(&self, label: &str) -> Option<BlockId> {
        self.placed_blocks()
            .find(|(_, b)| b.label == label)
            .map(|(id, _)| id)
    }

    /// Regions still standing on their own.
    pub fn top_level_regions(&self) -> impl Iterator<Item = &BlockRegion> + '_ {
        self.regions.iter().filter(|r| r.top_level)
    }
}

/// A module global. `initializer` holds flattened scalar contents; `None`
/// means zero-initialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalDef {
    pub name: String,
    pub ty: IrType,
    pub initializer: Option<Vec<Literal>>,
    pub constant: bool,
}

/// A function provided by the runtime environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternDecl {
    pub name: String,
    pub return_type: IrType,
    pub params: Vec<IrType>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IrModule {
    pub name: String,
    pub target_triple: String,
    pub data_layout: String,
    pub structs: Vec<StructDef>,
    pub globals: Vec<GlobalDef>,
    pub externs: Vec<ExternDecl>,
    pub functions: Vec<IrFunction>,
    /// `#define` entries emitted into the generated header.
    pub preprocessor_definitions: Vec<(String, String)>,
    /// Struct types to declare in the generated header.
    pub header_types: Vec<String>,
}

impl IrModule {
    pub fn function(&self, name: &str) -> Option<&IrFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn struct_def(&self, name: &str) -> Option<&StructDef> {
        self.structs.iter().find(|s| s.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&GlobalDef> {
        self.globals.iter().find(|g| g.name == name)
    }

    pub fn extern_decl(&self, name: &str) -> Option<&ExternDecl> {
        self.externs.iter().find(|e| e.name == name)
    }

    pub fn has_definition(&self, name: &str) -> bool {
        self.preprocessor_definitions.iter().any(|(n, _)| n == name)
    }

    /// Functions tagged for the generated header, in definition order.
    pub fn header_functions(&self) -> impl Iterator<Item = &IrFunction> + '_ {
        self.functions.iter().filter(|f| f.include_in_header)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminator_successors() {
        let cond = Terminator::CondBranch {
            cond: Value::Literal(Literal::Bool(true)),
            then_block: BlockId(1),
            else_block: BlockId(2),
        };
        assert_eq!(cond.successors(), vec![BlockId(1), BlockId(2)]);
        assert!(Terminator::Return(None).successors().is_empty());
    }

    #[test]
    fn instruction_results() {
        let load = Instruction::Load {
            result: ValueId(3),
            ty: IrType::Float,
            ptr: Value::Argument(0),
        };
        assert_eq!(load.result(), Some(ValueId(3)));
        let call = Instruction::Call {
            result: None,
            callee: "f".into(),
            args: vec![],
        };
        assert_eq!(call.result(), None);
    }

    #[test]
    fn module_lookups() {
        let module = IrModule {
            name: "m".into(),
            structs: vec![StructDef {
                name: "S".into(),
                fields: vec![],
            }],
            preprocessor_definitions: vec![("M_PROFILING".into(), "1".into())],
            ..IrModule::default()
        };
        assert!(module.struct_def("S").is_some());
        assert!(module.function("f").is_none());
        assert!(module.has_definition("M_PROFILING"));
    }
}

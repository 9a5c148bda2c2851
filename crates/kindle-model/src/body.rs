//! Method Bodies
//!
//! A body is an SSA control-flow graph: ordered basic blocks, each holding
//! phi nodes, straight-line instructions and exactly one terminator. Every
//! variable carries the kind assigned by the type inferer in
//! `Body::variables`.

use crate::descriptor::{FieldRef, MethodRef};
use crate::types::{IntegerSubtype, NumericType, ValueType, VariableKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SSA variable identifier (index into `Body::variables`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Var(pub u32);

impl Var {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Basic block identifier (index into `Body::blocks`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// A method body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Body {
    /// Kind of every variable, indexed by `Var`
    pub variables: Vec<VariableKind>,
    /// Basic blocks; block 0 is the entry
    pub blocks: Vec<BasicBlock>,
}

impl Body {
    pub fn kind_of(&self, var: Var) -> Option<VariableKind> {
        self.variables.get(var.index()).copied()
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.index())
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Successors of a block, including exception handlers
    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        let Some(block) = self.block(id) else {
            return Vec::new();
        };
        let mut succs = block.terminator.successors();
        for tc in &block.try_catches {
            if !succs.contains(&tc.handler) {
                succs.push(tc.handler);
            }
        }
        succs
    }
}

/// A basic block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    #[serde(default)]
    pub phis: Vec<Phi>,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
    /// Handlers protecting every throwing instruction of this block, in
    /// the order they are tried
    #[serde(default)]
    pub try_catches: Vec<TryCatch>,
    /// Receives the caught exception when this block is a handler
    #[serde(default)]
    pub exception_variable: Option<Var>,
}

impl BasicBlock {
    pub fn new() -> Self {
        Self {
            phis: Vec::new(),
            instructions: Vec::new(),
            terminator: Terminator::Unreachable,
            try_catches: Vec::new(),
            exception_variable: None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        !matches!(self.terminator, Terminator::Unreachable)
    }

    pub fn is_protected(&self) -> bool {
        !self.try_catches.is_empty()
    }
}

impl Default for BasicBlock {
    fn default() -> Self {
        Self::new()
    }
}

/// A phi node merging one value per incoming edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phi {
    pub receiver: Var,
    pub incomings: Vec<Incoming>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Incoming {
    pub source: BlockId,
    pub value: Var,
}

/// An exception handler attached to a block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TryCatch {
    /// Caught class, or `None` to catch everything
    pub exception_type: Option<String>,
    pub handler: BlockId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    /// Three-way comparison producing -1, 0 or 1
    Compare,
    And,
    Or,
    Xor,
    ShiftLeft,
    ShiftRight,
    ShiftRightUnsigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastDirection {
    /// Widen a sub-int value to int
    ToInteger,
    /// Narrow an int to a sub-int value (result still held as int)
    FromInteger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationKind {
    /// Non-virtual call of an instance method (constructors, super calls)
    Special,
    /// Call of a static method
    Static,
    /// Dispatch through the receiver's class
    Virtual,
}

/// Straight-line instructions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    Nop,
    NullConstant {
        receiver: Var,
    },
    ClassConstant {
        receiver: Var,
        ty: ValueType,
    },
    IntConstant {
        receiver: Var,
        value: i32,
    },
    LongConstant {
        receiver: Var,
        value: i64,
    },
    FloatConstant {
        receiver: Var,
        value: f32,
    },
    DoubleConstant {
        receiver: Var,
        value: f64,
    },
    StringConstant {
        receiver: Var,
        value: String,
    },
    Binary {
        operator: BinaryOp,
        receiver: Var,
        first: Var,
        second: Var,
        operand: NumericType,
    },
    Negate {
        receiver: Var,
        operand: Var,
        ty: NumericType,
    },
    Assign {
        receiver: Var,
        assignee: Var,
    },
    /// Reference cast (the checked part is done by a preceding `IsInstance`)
    Cast {
        receiver: Var,
        value: Var,
        target: ValueType,
    },
    NumericCast {
        receiver: Var,
        value: Var,
        from: NumericType,
        to: NumericType,
    },
    IntegerCast {
        receiver: Var,
        value: Var,
        subtype: IntegerSubtype,
        direction: CastDirection,
    },
    Construct {
        receiver: Var,
        class: String,
    },
    ConstructArray {
        receiver: Var,
        item_type: ValueType,
        size: Var,
    },
    ConstructMultiArray {
        receiver: Var,
        item_type: ValueType,
        dimensions: Vec<Var>,
    },
    GetField {
        receiver: Var,
        /// `None` for static fields
        instance: Option<Var>,
        field: FieldRef,
        field_type: ValueType,
    },
    PutField {
        instance: Option<Var>,
        field: FieldRef,
        value: Var,
        field_type: ValueType,
    },
    ArrayLength {
        receiver: Var,
        array: Var,
    },
    CloneArray {
        receiver: Var,
        array: Var,
    },
    /// Reinterpret an array object as its element storage
    UnwrapArray {
        receiver: Var,
        array: Var,
    },
    GetElement {
        receiver: Var,
        array: Var,
        index: Var,
    },
    PutElement {
        array: Var,
        index: Var,
        value: Var,
    },
    Invoke {
        receiver: Option<Var>,
        instance: Option<Var>,
        method: MethodRef,
        arguments: Vec<Var>,
        kind: InvocationKind,
    },
    /// Call site bound at run time through a bootstrap method
    InvokeDynamic {
        receiver: Option<Var>,
        name: String,
        arguments: Vec<Var>,
    },
    IsInstance {
        receiver: Var,
        value: Var,
        ty: ValueType,
    },
    InitClass {
        class: String,
    },
    NullCheck {
        receiver: Var,
        value: Var,
    },
    MonitorEnter {
        object: Var,
    },
    MonitorExit {
        object: Var,
    },
}

impl Instruction {
    /// Variable defined by this instruction, if any
    pub fn defined(&self) -> Option<Var> {
        use Instruction::*;
        match self {
            Nop | PutField { .. } | PutElement { .. } | InitClass { .. } | MonitorEnter { .. }
            | MonitorExit { .. } => None,
            NullConstant { receiver }
            | ClassConstant { receiver, .. }
            | IntConstant { receiver, .. }
            | LongConstant { receiver, .. }
            | FloatConstant { receiver, .. }
            | DoubleConstant { receiver, .. }
            | StringConstant { receiver, .. }
            | Binary { receiver, .. }
            | Negate { receiver, .. }
            | Assign { receiver, .. }
            | Cast { receiver, .. }
            | NumericCast { receiver, .. }
            | IntegerCast { receiver, .. }
            | Construct { receiver, .. }
            | ConstructArray { receiver, .. }
            | ConstructMultiArray { receiver, .. }
            | GetField { receiver, .. }
            | ArrayLength { receiver, .. }
            | CloneArray { receiver, .. }
            | UnwrapArray { receiver, .. }
            | GetElement { receiver, .. }
            | IsInstance { receiver, .. }
            | NullCheck { receiver, .. } => Some(*receiver),
            Invoke { receiver, .. } | InvokeDynamic { receiver, .. } => *receiver,
        }
    }

    /// Variables read by this instruction, in operand order
    pub fn used(&self) -> Vec<Var> {
        use Instruction::*;
        match self {
            Nop
            | NullConstant { .. }
            | ClassConstant { .. }
            | IntConstant { .. }
            | LongConstant { .. }
            | FloatConstant { .. }
            | DoubleConstant { .. }
            | StringConstant { .. }
            | Construct { .. }
            | InitClass { .. } => Vec::new(),
            Binary { first, second, .. } => vec![*first, *second],
            Negate { operand, .. } => vec![*operand],
            Assign { assignee, .. } => vec![*assignee],
            Cast { value, .. }
            | NumericCast { value, .. }
            | IntegerCast { value, .. }
            | IsInstance { value, .. }
            | NullCheck { value, .. } => vec![*value],
            ConstructArray { size, .. } => vec![*size],
            ConstructMultiArray { dimensions, .. } => dimensions.clone(),
            GetField { instance, .. } => instance.iter().copied().collect(),
            PutField {
                instance, value, ..
            } => instance.iter().copied().chain(std::iter::once(*value)).collect(),
            ArrayLength { array, .. } | CloneArray { array, .. } | UnwrapArray { array, .. } => {
                vec![*array]
            }
            GetElement { array, index, .. } => vec![*array, *index],
            PutElement {
                array,
                index,
                value,
            } => vec![*array, *index, *value],
            Invoke {
                instance,
                arguments,
                ..
            } => instance.iter().chain(arguments.iter()).copied().collect(),
            InvokeDynamic { arguments, .. } => arguments.clone(),
            MonitorEnter { object } | MonitorExit { object } => vec![*object],
        }
    }

    /// Whether the instruction may allocate, run arbitrary code or unwind,
    /// and therefore needs a precise snapshot of live references
    pub fn is_call_site(&self) -> bool {
        matches!(
            self,
            Instruction::Invoke { .. }
                | Instruction::InvokeDynamic { .. }
                | Instruction::Construct { .. }
                | Instruction::ConstructArray { .. }
                | Instruction::ConstructMultiArray { .. }
                | Instruction::CloneArray { .. }
                | Instruction::InitClass { .. }
        )
    }
}

/// Unary branch conditions (compare against zero or null)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchCondition {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Null,
    NotNull,
}

/// Binary branch conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryBranchCondition {
    Equal,
    NotEqual,
    ReferenceEqual,
    ReferenceNotEqual,
}

/// Block terminators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Terminator {
    Jump {
        target: BlockId,
    },
    Branch {
        condition: BranchCondition,
        operand: Var,
        consequent: BlockId,
        alternative: BlockId,
    },
    BinaryBranch {
        condition: BinaryBranchCondition,
        first: Var,
        second: Var,
        consequent: BlockId,
        alternative: BlockId,
    },
    Switch {
        condition: Var,
        table: Vec<(i32, BlockId)>,
        default: BlockId,
    },
    Exit {
        value: Option<Var>,
    },
    Raise {
        exception: Var,
    },
    /// Placeholder before a terminator has been set
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump { target } => vec![*target],
            Terminator::Branch {
                consequent,
                alternative,
                ..
            }
            | Terminator::BinaryBranch {
                consequent,
                alternative,
                ..
            } => {
                if consequent == alternative {
                    vec![*consequent]
                } else {
                    vec![*consequent, *alternative]
                }
            }
            Terminator::Switch { table, default, .. } => {
                let mut succs: Vec<BlockId> = Vec::with_capacity(table.len() + 1);
                for &(_, target) in table.iter() {
                    if !succs.contains(&target) {
                        succs.push(target);
                    }
                }
                if !succs.contains(default) {
                    succs.push(*default);
                }
                succs
            }
            Terminator::Exit { .. } | Terminator::Raise { .. } | Terminator::Unreachable => vec![],
        }
    }

    pub fn used(&self) -> Vec<Var> {
        match self {
            Terminator::Branch { operand, .. } => vec![*operand],
            Terminator::BinaryBranch { first, second, .. } => vec![*first, *second],
            Terminator::Switch { condition, .. } => vec![*condition],
            Terminator::Exit { value } => value.iter().copied().collect(),
            Terminator::Raise { exception } => vec![*exception],
            Terminator::Jump { .. } | Terminator::Unreachable => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::MethodDescriptor;

    #[test]
    fn test_invoke_uses_instance_then_arguments() {
        let instr = Instruction::Invoke {
            receiver: Some(Var(5)),
            instance: Some(Var(1)),
            method: MethodRef::new("A", MethodDescriptor::new("f", vec![ValueType::INT], ValueType::INT)),
            arguments: vec![Var(2)],
            kind: InvocationKind::Virtual,
        };
        assert_eq!(instr.defined(), Some(Var(5)));
        assert_eq!(instr.used(), vec![Var(1), Var(2)]);
        assert!(instr.is_call_site());
    }

    #[test]
    fn test_switch_successors_are_deduplicated() {
        let term = Terminator::Switch {
            condition: Var(0),
            table: vec![(1, BlockId(1)), (2, BlockId(1)), (3, BlockId(2))],
            default: BlockId(2),
        };
        assert_eq!(term.successors(), vec![BlockId(1), BlockId(2)]);
    }

    #[test]
    fn test_handlers_are_successors() {
        let mut body = Body::default();
        let mut entry = BasicBlock::new();
        entry.terminator = Terminator::Jump { target: BlockId(1) };
        entry.try_catches.push(TryCatch {
            exception_type: None,
            handler: BlockId(2),
        });
        body.blocks.push(entry);
        assert_eq!(body.successors(BlockId(0)), vec![BlockId(1), BlockId(2)]);
    }

    #[test]
    fn test_field_access_is_not_a_call_site() {
        let instr = Instruction::GetField {
            receiver: Var(1),
            instance: Some(Var(0)),
            field: FieldRef::new("A", "x"),
            field_type: ValueType::INT,
        };
        assert!(!instr.is_call_site());
        assert_eq!(instr.used(), vec![Var(0)]);
    }
}

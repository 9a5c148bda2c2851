//! Function builder
//!
//! Instructions and terminators are structured values rendered only when
//! the function is finished. Phi incomings may name a source-program block
//! whose final IR label is not known yet (the block may still be split by
//! later lowering); those are resolved at `finish`.

use super::types::IrType;
use super::value::{Operand, Value};
use kindle_model::BlockId;
use rustc_hash::FxHashMap;
use std::fmt;

// ============================================================================
// Instructions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
    And,
    Or,
    Xor,
    Shl,
    AShr,
    LShr,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::SDiv => "sdiv",
            BinOp::SRem => "srem",
            BinOp::FAdd => "fadd",
            BinOp::FSub => "fsub",
            BinOp::FMul => "fmul",
            BinOp::FDiv => "fdiv",
            BinOp::FRem => "frem",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Shl => "shl",
            BinOp::AShr => "ashr",
            BinOp::LShr => "lshr",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntPredicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl fmt::Display for IntPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            IntPredicate::Eq => "eq",
            IntPredicate::Ne => "ne",
            IntPredicate::Slt => "slt",
            IntPredicate::Sle => "sle",
            IntPredicate::Sgt => "sgt",
            IntPredicate::Sge => "sge",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FpTrunc,
    FpExt,
    SiToFp,
    FpToSi,
    Bitcast,
    PtrToInt,
}

impl fmt::Display for CastOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CastOp::Trunc => "trunc",
            CastOp::ZExt => "zext",
            CastOp::SExt => "sext",
            CastOp::FpTrunc => "fptrunc",
            CastOp::FpExt => "fpext",
            CastOp::SiToFp => "sitofp",
            CastOp::FpToSi => "fptosi",
            CastOp::Bitcast => "bitcast",
            CastOp::PtrToInt => "ptrtoint",
        };
        f.write_str(text)
    }
}

/// Non-terminator instructions
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Binary {
        op: BinOp,
        ty: IrType,
        lhs: Value,
        rhs: Value,
    },
    FNeg {
        ty: IrType,
        value: Value,
    },
    Icmp {
        pred: IntPredicate,
        ty: IrType,
        lhs: Value,
        rhs: Value,
    },
    Cast {
        op: CastOp,
        value: Operand,
        to: IrType,
    },
    Load {
        ty: IrType,
        ptr: Value,
    },
    Store {
        value: Operand,
        ptr: Value,
    },
    /// `getelementptr` over `base`; every index is `i32`
    Gep {
        base: IrType,
        ptr: Value,
        indices: Vec<Value>,
    },
    Call {
        ret: IrType,
        callee: Value,
        args: Vec<Operand>,
    },
    Alloca {
        ty: IrType,
    },
    Select {
        cond: Value,
        ty: IrType,
        then_value: Value,
        else_value: Value,
    },
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Binary { op, ty, lhs, rhs } => write!(f, "{} {} {}, {}", op, ty, lhs, rhs),
            Instr::FNeg { ty, value } => write!(f, "fneg {} {}", ty, value),
            Instr::Icmp { pred, ty, lhs, rhs } => write!(f, "icmp {} {} {}, {}", pred, ty, lhs, rhs),
            Instr::Cast { op, value, to } => write!(f, "{} {} to {}", op, value, to),
            Instr::Load { ty, ptr } => write!(f, "load {}, ptr {}", ty, ptr),
            Instr::Store { value, ptr } => write!(f, "store {}, ptr {}", value, ptr),
            Instr::Gep { base, ptr, indices } => {
                write!(f, "getelementptr {}, ptr {}", base, ptr)?;
                for index in indices {
                    write!(f, ", i32 {}", index)?;
                }
                Ok(())
            }
            Instr::Call { ret, callee, args } => {
                write!(f, "call {} {}(", ret, callee)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Instr::Alloca { ty } => write!(f, "alloca {}", ty),
            Instr::Select {
                cond,
                ty,
                then_value,
                else_value,
            } => write!(f, "select i1 {}, {} {}, {} {}", cond, ty, then_value, ty, else_value),
        }
    }
}

/// Block terminators
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Br(String),
    CondBr {
        cond: Value,
        then_label: String,
        else_label: String,
    },
    Switch {
        ty: IrType,
        value: Value,
        default: String,
        cases: Vec<(i64, String)>,
    },
    Ret(Option<Operand>),
    Unreachable,
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Br(label) => write!(f, "br label %{}", label),
            Term::CondBr {
                cond,
                then_label,
                else_label,
            } => write!(f, "br i1 {}, label %{}, label %{}", cond, then_label, else_label),
            Term::Switch {
                ty,
                value,
                default,
                cases,
            } => {
                write!(f, "switch {} {}, label %{} [", ty, value, default)?;
                for (case, label) in cases {
                    write!(f, " {} {}, label %{}", ty, case, label)?;
                }
                write!(f, " ]")
            }
            Term::Ret(Some(value)) => write!(f, "ret {}", value),
            Term::Ret(None) => write!(f, "ret void"),
            Term::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Predecessor named by a phi incoming
#[derive(Debug, Clone, PartialEq)]
pub enum PhiSource {
    Label(String),
    /// The last IR block produced for a source-program block
    Block(BlockId),
}

// ============================================================================
// Function builder
// ============================================================================

#[derive(Debug, Clone)]
enum Line {
    Text(String),
    Phi {
        dest: Value,
        ty: IrType,
        incomings: Vec<(Value, PhiSource)>,
    },
}

#[derive(Debug, Clone)]
struct IrBlock {
    label: String,
    lines: Vec<Line>,
    terminated: bool,
}

/// Builder for one function definition
#[derive(Debug)]
pub struct FunctionBuilder {
    name: String,
    ret: IrType,
    params: Vec<Operand>,
    blocks: Vec<IrBlock>,
    current: usize,
    next_temp: u32,
    next_label: u32,
    final_labels: FxHashMap<BlockId, String>,
}

impl FunctionBuilder {
    /// Create a builder whose first block is `entry`
    pub fn new(name: impl Into<String>, ret: IrType, params: Vec<Operand>) -> Self {
        Self {
            name: name.into(),
            ret,
            params,
            blocks: vec![IrBlock {
                label: "entry".to_string(),
                lines: Vec::new(),
                terminated: false,
            }],
            current: 0,
            next_temp: 0,
            next_label: 0,
            final_labels: FxHashMap::default(),
        }
    }

    pub fn ret_type(&self) -> &IrType {
        &self.ret
    }

    /// Append a block with the given label at the end of the function
    pub fn create_block(&mut self, label: impl Into<String>) -> String {
        let label = label.into();
        self.blocks.push(IrBlock {
            label: label.clone(),
            lines: Vec::new(),
            terminated: false,
        });
        label
    }

    /// Insert a fresh block right after the current one, for splitting a
    /// source block around control flow introduced by lowering
    pub fn split_block(&mut self, prefix: &str) -> String {
        let label = format!("{}.{}", prefix, self.next_label);
        self.next_label += 1;
        self.insert_block(label)
    }

    /// Insert a block with the given label right after the current one
    pub fn insert_block(&mut self, label: impl Into<String>) -> String {
        let label = label.into();
        let position = (self.current + 1).min(self.blocks.len());
        self.blocks.insert(
            position,
            IrBlock {
                label: label.clone(),
                lines: Vec::new(),
                terminated: false,
            },
        );
        label
    }

    pub fn has_block(&self, label: &str) -> bool {
        self.blocks.iter().any(|b| b.label == label)
    }

    /// Continue emitting into the block with this label
    pub fn switch_to(&mut self, label: &str) {
        if let Some(index) = self.blocks.iter().position(|b| b.label == label) {
            self.current = index;
        }
    }

    pub fn current_label(&self) -> &str {
        &self.blocks[self.current].label
    }

    pub fn is_terminated(&self) -> bool {
        self.blocks[self.current].terminated
    }

    /// Record the block currently being emitted as the last one of `block`
    pub fn finish_source_block(&mut self, block: BlockId) {
        let label = self.current_label().to_string();
        self.final_labels.insert(block, label);
    }

    pub fn fresh(&mut self) -> Value {
        let name = format!("t{}", self.next_temp);
        self.next_temp += 1;
        Value::Local(name)
    }

    fn push(&mut self, line: Line) {
        self.blocks[self.current].lines.push(line);
    }

    pub fn comment(&mut self, text: &str) {
        self.push(Line::Text(format!("; {}", text)));
    }

    /// Emit an instruction into a fresh temporary
    pub fn define(&mut self, instr: Instr) -> Value {
        let dest = self.fresh();
        self.assign(&dest, instr);
        dest
    }

    /// Emit an instruction whose result is named `dest`
    pub fn assign(&mut self, dest: &Value, instr: Instr) {
        self.push(Line::Text(format!("{} = {}", dest, instr)));
    }

    /// Emit an instruction without a result
    pub fn emit(&mut self, instr: Instr) {
        self.push(Line::Text(instr.to_string()));
    }

    /// Emit a call, naming the result only when the callee returns a value
    pub fn call(&mut self, ret: IrType, callee: Value, args: Vec<Operand>) -> Option<Value> {
        let returns = ret != IrType::Void;
        let instr = Instr::Call { ret, callee, args };
        if returns {
            Some(self.define(instr))
        } else {
            self.emit(instr);
            None
        }
    }

    pub fn phi(&mut self, dest: Value, ty: IrType, incomings: Vec<(Value, PhiSource)>) {
        self.push(Line::Phi {
            dest,
            ty,
            incomings,
        });
    }

    pub fn terminate(&mut self, term: Term) {
        let block = &mut self.blocks[self.current];
        if block.terminated {
            return;
        }
        block.lines.push(Line::Text(term.to_string()));
        block.terminated = true;
    }

    /// Render the function, closing unterminated blocks with `unreachable`
    pub fn finish(mut self) -> String {
        for block in &mut self.blocks {
            if !block.terminated {
                block.lines.push(Line::Text(Term::Unreachable.to_string()));
                block.terminated = true;
            }
        }
        self.to_string()
    }

    fn phi_label(&self, source: &PhiSource) -> String {
        match source {
            PhiSource::Label(label) => label.clone(),
            PhiSource::Block(id) => self
                .final_labels
                .get(id)
                .cloned()
                .unwrap_or_else(|| id.to_string()),
        }
    }
}

impl fmt::Display for FunctionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "define {} @{}(", self.ret, self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        writeln!(f, ") {{")?;

        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}:", block.label)?;
            for line in &block.lines {
                match line {
                    Line::Text(text) => writeln!(f, "  {}", text)?,
                    Line::Phi {
                        dest,
                        ty,
                        incomings,
                    } => {
                        write!(f, "  {} = phi {} ", dest, ty)?;
                        for (j, (value, source)) in incomings.iter().enumerate() {
                            if j > 0 {
                                write!(f, ", ")?;
                            }
                            write!(f, "[ {}, %{} ]", value, self.phi_label(source))?;
                        }
                        writeln!(f)?;
                    }
                }
            }
        }
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_display() {
        let gep = Instr::Gep {
            base: IrType::named("class.A"),
            ptr: Value::local("v0"),
            indices: vec![Value::Int(0), Value::Int(2)],
        };
        assert_eq!(gep.to_string(), "getelementptr %class.A, ptr %v0, i32 0, i32 2");

        let call = Instr::Call {
            ret: IrType::Ptr,
            callee: Value::global("rt.alloc"),
            args: vec![Operand::ptr(Value::global("vtable.A"))],
        };
        assert_eq!(call.to_string(), "call ptr @rt.alloc(ptr @vtable.A)");
    }

    #[test]
    fn test_switch_display() {
        let term = Term::Switch {
            ty: IrType::I32,
            value: Value::local("v1"),
            default: "b3".to_string(),
            cases: vec![(1, "b1".to_string()), (2, "b2".to_string())],
        };
        assert_eq!(
            term.to_string(),
            "switch i32 %v1, label %b3 [ i32 1, label %b1 i32 2, label %b2 ]"
        );
    }

    #[test]
    fn test_split_blocks_and_phi_resolution() {
        let mut f = FunctionBuilder::new("f", IrType::I32, vec![]);
        f.terminate(Term::Br("b0".to_string()));
        f.create_block("b0");
        f.create_block("b1");

        f.switch_to("b0");
        let cont = f.split_block("b0");
        f.terminate(Term::Br(cont.clone()));
        f.switch_to(&cont);
        f.terminate(Term::Br("b1".to_string()));
        f.finish_source_block(BlockId(0));

        f.switch_to("b1");
        let dest = Value::local("v0");
        f.phi(dest.clone(), IrType::I32, vec![(Value::Int(7), PhiSource::Block(BlockId(0)))]);
        f.terminate(Term::Ret(Some(Operand::new(IrType::I32, dest))));

        let text = f.finish();
        assert!(text.contains("%v0 = phi i32 [ 7, %b0.0 ]"));
        let b0 = text.find("\nb0:").unwrap();
        let split = text.find("\nb0.0:").unwrap();
        let b1 = text.find("\nb1:").unwrap();
        assert!(b0 < split && split < b1);
    }

    #[test]
    fn test_void_call_has_no_result() {
        let mut f = FunctionBuilder::new("g", IrType::Void, vec![]);
        assert!(f.call(IrType::Void, Value::global("rt.init"), vec![]).is_none());
        f.terminate(Term::Ret(None));
        assert!(f.finish().contains("  call void @rt.init()\n"));
    }

    #[test]
    fn test_finish_closes_open_blocks() {
        let mut f = FunctionBuilder::new("h", IrType::Void, vec![Operand::ptr(Value::local("this"))]);
        f.create_block("dead");
        assert_eq!(f.to_string(), "define void @h(ptr %this) {\nentry:\n\ndead:\n}\n");
        assert_eq!(
            f.finish(),
            "define void @h(ptr %this) {\nentry:\n  unreachable\n\ndead:\n  unreachable\n}\n"
        );
    }
}

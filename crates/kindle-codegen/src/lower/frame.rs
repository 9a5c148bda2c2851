//! Shadow-stack frames and call-site brackets

use super::{block_label, Landing, MethodRenderer};
use crate::emit::classes::needs_initialization;
use crate::error::{CodegenError, CodegenResult};
use crate::ir::{Instr, IntPredicate, IrType, Operand, PhiSource, Term, Value};
use crate::mangle;
use kindle_model::{BlockId, Instruction, Terminator, Var};

/// Index of the call-site id in `%rt.StackFrame`
const FRAME_SITE: i64 = 1;
/// Index of the link to the caller's frame in `%rt.StackFrame`
const FRAME_NEXT: i64 = 2;

/// The method's frame: header plus `size` reference cells
#[derive(Debug, Clone)]
pub(super) struct Frame {
    pub size: usize,
    ty: IrType,
}

impl Frame {
    fn new(size: usize) -> Self {
        Self {
            size,
            ty: IrType::Struct(vec![IrType::named("rt.StackFrame"), IrType::array(size as u64, IrType::Ptr)]),
        }
    }

    fn base() -> Value {
        Value::local("frame")
    }

    fn caller() -> Value {
        Value::local("frame.next")
    }
}

pub(super) fn landing_label(block: BlockId) -> String {
    format!("{}.lp", block_label(block))
}

impl<'p, 'b, 's> MethodRenderer<'p, 'b, 's> {
    /// Class whose initializer runs on entry: static methods other than
    /// `<clinit>` and constructors initialize their owner
    pub(super) fn entry_initializer(&self) -> Option<String> {
        let desc = &self.method.desc;
        let initializes = (self.method.is_static && !desc.is_class_initializer()) || desc.is_constructor();
        if initializes && needs_initialization(self.backend.program(), &self.class.name) {
            Some(self.class.name.clone())
        } else {
            None
        }
    }

    pub(super) fn needs_initializer_call(&self, class: &str) -> bool {
        needs_initialization(self.backend.program(), class)
    }

    pub(super) fn call_initializer(&mut self, class: &str) {
        self.f.call(
            IrType::Void,
            Value::global(mangle::initializer_symbol(class)),
            vec![],
        );
    }

    /// Whether any instruction of the block may leave through its landing pad
    pub(super) fn block_throws(&self, id: BlockId) -> bool {
        let Some(block) = self.body.block(id) else {
            return false;
        };
        if !block.is_protected() {
            return false;
        }
        let has_site = block.instructions.iter().any(|instruction| match instruction {
            Instruction::InitClass { class } => self.needs_initializer_call(class),
            other => other.is_call_site(),
        });
        has_site || matches!(block.terminator, Terminator::Raise { .. })
    }

    /// Live references across the site at `index` of the current block
    pub(super) fn site_live(&self, index: usize) -> Vec<Var> {
        self.block
            .and_then(|block| self.liveness.site_at(block, index))
            .map(|site| site.live.clone())
            .unwrap_or_default()
    }

    // ========================================================================
    // Frame
    // ========================================================================

    pub(super) fn setup_frame(&mut self, entry_init: bool) {
        if self.liveness.sites().is_empty() && !entry_init {
            return;
        }
        let mut size = self.liveness.frame_size();
        if entry_init {
            size = size.max(self.reference_parameters().len());
        }
        let frame = Frame::new(size);

        self.f.assign(&Frame::base(), Instr::Alloca { ty: frame.ty.clone() });
        let size_ptr = self.header_field(&frame, 0);
        self.f.emit(Instr::Store {
            value: Operand::i32(size as i32),
            ptr: size_ptr,
        });
        self.f.assign(
            &Frame::caller(),
            Instr::Load {
                ty: IrType::Ptr,
                ptr: Value::global("rt.stackTop"),
            },
        );
        let link = self.header_field(&frame, FRAME_NEXT);
        self.f.emit(Instr::Store {
            value: Operand::ptr(Frame::caller()),
            ptr: link,
        });
        self.f.emit(Instr::Store {
            value: Operand::ptr(Frame::base()),
            ptr: Value::global("rt.stackTop"),
        });
        self.frame = Some(frame);
    }

    fn header_field(&mut self, frame: &Frame, index: i64) -> Value {
        self.f.define(Instr::Gep {
            base: frame.ty.clone(),
            ptr: Frame::base(),
            indices: vec![Value::Int(0), Value::Int(0), Value::Int(index)],
        })
    }

    fn pop_frame(&mut self) {
        if self.frame.is_some() {
            self.f.emit(Instr::Store {
                value: Operand::ptr(Frame::caller()),
                ptr: Value::global("rt.stackTop"),
            });
        }
    }

    // ========================================================================
    // Sites
    // ========================================================================

    /// Handler classes of the current block, in the order they are tried
    fn handler_types(&self) -> CodegenResult<Vec<Option<String>>> {
        let Some(block) = self.block.and_then(|id| self.body.block(id)) else {
            return Ok(Vec::new());
        };
        let program = self.backend.program();
        let mut types = Vec::with_capacity(block.try_catches.len());
        for tc in &block.try_catches {
            if let Some(class) = &tc.exception_type {
                if program.lookup(class).is_none() {
                    return Err(CodegenError::missing_class(class.clone()));
                }
            }
            types.push(tc.exception_type.clone());
        }
        Ok(types)
    }

    /// Spill the live references and record the site id in the frame
    pub(super) fn begin_site(&mut self, live: &[Var]) -> CodegenResult<u32> {
        let types = self.handler_types()?;
        let site = self.state.call_sites.register(live.len(), types);

        let Some(frame) = self.frame.clone() else {
            return Ok(site);
        };
        for cell in 0..frame.size {
            let value = match live.get(cell) {
                Some(var) => self.var(*var),
                None => Value::Null,
            };
            let ptr = self.f.define(Instr::Gep {
                base: frame.ty.clone(),
                ptr: Frame::base(),
                indices: vec![Value::Int(0), Value::Int(1), Value::Int(cell as i64)],
            });
            self.f.emit(Instr::Store {
                value: Operand::ptr(value),
                ptr,
            });
        }
        let site_ptr = self.header_field(&frame, FRAME_SITE);
        self.f.emit(Instr::Store {
            value: Operand::i32(site as i32),
            ptr: site_ptr,
        });
        Ok(site)
    }

    /// Leave through the landing pad or unwind if the site left an
    /// exception pending, and continue in a fresh block otherwise
    pub(super) fn end_site(&mut self, site: u32) {
        let pending = self.f.define(Instr::Load {
            ty: IrType::Ptr,
            ptr: Value::global("rt.pendingException"),
        });
        let thrown = self.f.define(Instr::Icmp {
            pred: IntPredicate::Ne,
            ty: IrType::Ptr,
            lhs: pending,
            rhs: Value::Null,
        });
        let target = self.exception_target(site);
        let prefix = self.block.map(block_label).unwrap_or_else(|| "entry".to_string());
        let next = self.f.split_block(&prefix);
        self.f.terminate(Term::CondBr {
            cond: thrown,
            then_label: target,
            else_label: next.clone(),
        });
        self.f.switch_to(&next);
    }

    /// Label an exception raised at `site` from the current IR block goes to
    pub(super) fn exception_target(&mut self, site: u32) -> String {
        match self.block {
            Some(id) if self.body.block(id).is_some_and(|b| b.is_protected()) => {
                self.landings.push(Landing {
                    site,
                    from: self.f.current_label().to_string(),
                });
                landing_label(id)
            }
            _ => {
                self.unwinds = true;
                "unwind".to_string()
            }
        }
    }

    /// `bN.lp`: ask the runtime which handler of the block catches the
    /// pending exception
    pub(super) fn finish_landing(&mut self, id: BlockId) {
        if self.landings.is_empty() {
            return;
        }
        let Some(block) = self.body.block(id) else {
            return;
        };
        let label = self.f.insert_block(landing_label(id));
        self.f.switch_to(&label);

        let site = Value::local(format!("{}.site", label));
        let incomings = self
            .landings
            .drain(..)
            .map(|l| (Value::Int(i64::from(l.site)), PhiSource::Label(l.from)))
            .collect();
        self.f.phi(site.clone(), IrType::I32, incomings);
        let exception = self.f.define(Instr::Load {
            ty: IrType::Ptr,
            ptr: Value::global("rt.pendingException"),
        });
        let selected = self.f.define(Instr::Call {
            ret: IrType::I32,
            callee: Value::global("rt.selectHandler"),
            args: vec![Operand::ptr(exception), Operand::new(IrType::I32, site)],
        });
        let cases = block
            .try_catches
            .iter()
            .enumerate()
            .map(|(i, tc)| (i as i64, block_label(tc.handler)))
            .collect();
        self.unwinds = true;
        self.f.terminate(Term::Switch {
            ty: IrType::I32,
            value: selected,
            default: "unwind".to_string(),
            cases,
        });
    }

    // ========================================================================
    // Returns
    // ========================================================================

    /// Return `value`, through the shared `exit` block when a frame must
    /// be popped
    pub(super) fn return_value(&mut self, value: Option<Value>) {
        if self.frame.is_none() {
            let ret = self.f.ret_type().clone();
            self.f.terminate(Term::Ret(value.map(|v| v.typed(ret))));
            return;
        }
        let from = self.f.current_label().to_string();
        self.exits.push((value, from));
        self.f.terminate(Term::Br("exit".to_string()));
    }

    pub(super) fn finish_exits(&mut self) {
        if self.exits.is_empty() {
            return;
        }
        let ret = self.f.ret_type().clone();
        let label = self.f.create_block("exit");
        self.f.switch_to(&label);
        let result = if ret == IrType::Void {
            None
        } else {
            let dest = Value::local("ret");
            let incomings = self
                .exits
                .drain(..)
                .map(|(value, from)| (value.unwrap_or(Value::Undef), PhiSource::Label(from)))
                .collect();
            self.f.phi(dest.clone(), ret.clone(), incomings);
            Some(dest.typed(ret))
        };
        self.pop_frame();
        self.f.terminate(Term::Ret(result));
    }

    /// `unwind`: pop the frame and return a zero value, leaving the
    /// exception pending for the caller
    pub(super) fn finish_unwind(&mut self) {
        if !self.unwinds {
            return;
        }
        let ret = self.f.ret_type().clone();
        let label = self.f.create_block("unwind");
        self.f.switch_to(&label);
        self.pop_frame();
        let result = if ret == IrType::Void {
            None
        } else {
            Some(Operand::new(ret.clone(), Value::zero_of(&ret)))
        };
        self.f.terminate(Term::Ret(result));
    }
}

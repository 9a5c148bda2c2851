//! Method Lowering
//!
//! Translates one SSA method body into an LLVM function. Each source block
//! `bN` becomes an IR block of the same name, split at every call site so
//! the pending-exception check can branch away; phis name their source
//! blocks and are resolved to the final split label when the function is
//! rendered.
//!
//! Methods with call sites own a shadow-stack frame: a `%rt.StackFrame`
//! header followed by one cell per live reference. Before each site the
//! live references are spilled into the cells and the site id is stored in
//! the header, so the collector and the exception dispatcher can both walk
//! the frame chain from `@rt.stackTop`.

mod control_flow;
mod dispatch;
mod expr;
mod frame;
mod objects;

use crate::emit::metadata::CallSiteTable;
use crate::emit::strings::StringPool;
use crate::error::{CodegenError, CodegenResult};
use crate::ir::{CastOp, FunctionBuilder, Instr, IrType, Operand, Term, Value};
use crate::liveness::{self, LivenessInfo};
use crate::mangle;
use crate::Backend;
use frame::Frame;
use kindle_model::{BlockId, Body, ClassDef, Instruction, MethodDef, MethodRef, Var, VariableKind};
use rustc_hash::FxHashSet;
use std::fmt::Write;

/// Module-wide state shared by every lowered method
#[derive(Debug, Default)]
pub struct ModuleState {
    pub strings: StringPool,
    pub call_sites: CallSiteTable,
}

impl ModuleState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Render one method: a `declare` for native methods, a `define` for
/// methods with a body, nothing for abstract ones
pub fn render_method<'p>(
    out: &mut String,
    backend: &Backend<'p>,
    state: &mut ModuleState,
    class: &'p ClassDef,
    method: &'p MethodDef,
) -> CodegenResult<()> {
    let reference = MethodRef::new(class.name.clone(), method.desc.clone());
    let symbol = mangle::method_name(&reference);
    let ret = IrType::of_value(&method.desc.ret);

    if method.is_native {
        let mut params: Vec<String> = Vec::with_capacity(method.arity());
        if !method.is_static {
            params.push(IrType::Ptr.to_string());
        }
        params.extend(method.desc.params.iter().map(|p| IrType::of_value(p).to_string()));
        writeln!(out, "declare {} @{}({})", ret, symbol, params.join(", "))?;
        return Ok(());
    }
    if method.is_abstract {
        return Ok(());
    }
    let Some(body) = &method.body else {
        return Err(CodegenError::MalformedBody {
            method: reference.to_string(),
            message: "concrete method has no body".to_string(),
        });
    };

    let renderer = MethodRenderer::new(backend, state, class, method, body, reference, symbol)?;
    out.push_str(&renderer.render()?);
    Ok(())
}

/// Where the pending-exception check of a site in the current block goes
#[derive(Debug, Clone)]
struct Landing {
    site: u32,
    from: String,
}

pub(crate) struct MethodRenderer<'p, 'b, 's> {
    backend: &'b Backend<'p>,
    state: &'s mut ModuleState,
    class: &'p ClassDef,
    method: &'p MethodDef,
    body: &'p Body,
    reference: MethodRef,
    f: FunctionBuilder,
    liveness: LivenessInfo,
    frame: Option<Frame>,
    /// Block being lowered; `None` while emitting the entry block
    block: Option<BlockId>,
    /// Sites of the current block that branch to its landing pad
    landings: Vec<Landing>,
    /// Protected blocks with at least one site, which get a landing pad
    throwing: FxHashSet<BlockId>,
    handlers: FxHashSet<BlockId>,
    /// Returned values and the label they leave from
    exits: Vec<(Option<Value>, String)>,
    unwinds: bool,
    entry_label: String,
}

impl<'p, 'b, 's> MethodRenderer<'p, 'b, 's> {
    fn new(
        backend: &'b Backend<'p>,
        state: &'s mut ModuleState,
        class: &'p ClassDef,
        method: &'p MethodDef,
        body: &'p Body,
        reference: MethodRef,
        symbol: String,
    ) -> CodegenResult<Self> {
        let arity = method.arity();
        if body.variables.len() < arity {
            return Err(CodegenError::MalformedBody {
                method: reference.to_string(),
                message: format!("{} parameters but {} variables", arity, body.variables.len()),
            });
        }

        let mut params: Vec<Operand> = Vec::with_capacity(arity);
        let mut declared = Vec::with_capacity(arity);
        if !method.is_static {
            declared.push(VariableKind::Object);
        }
        declared.extend(method.desc.params.iter().filter_map(|p| p.kind()));
        for (index, expected) in declared.into_iter().enumerate() {
            let actual = body.variables[index];
            let compatible = actual == expected || (actual.is_reference() && expected.is_reference());
            if !compatible {
                return Err(CodegenError::KindMismatch {
                    method: reference.to_string(),
                    message: format!("parameter v{} is {} but declared {}", index, actual, expected),
                });
            }
            params.push(Operand::new(IrType::of_kind(actual), Value::local(format!("v{}", index))));
        }

        let handlers = body
            .blocks
            .iter()
            .flat_map(|b| b.try_catches.iter().map(|tc| tc.handler))
            .collect();

        let f = FunctionBuilder::new(symbol, IrType::of_value(&method.desc.ret), params);
        Ok(Self {
            backend,
            state,
            class,
            method,
            body,
            reference,
            f,
            liveness: liveness::analyze(body),
            frame: None,
            block: None,
            landings: Vec::new(),
            throwing: FxHashSet::default(),
            handlers,
            exits: Vec::new(),
            unwinds: false,
            entry_label: "entry".to_string(),
        })
    }

    fn render(mut self) -> CodegenResult<String> {
        if self.body.blocks.is_empty() {
            return Err(self.malformed("body has no blocks"));
        }

        self.throwing = (0..self.body.blocks.len())
            .map(|i| BlockId(i as u32))
            .filter(|id| self.block_throws(*id))
            .collect();

        let entry_init = self.entry_initializer();
        self.setup_frame(entry_init.is_some());
        if let Some(class) = entry_init {
            let live = self.reference_parameters();
            let site = self.begin_site(&live)?;
            self.call_initializer(&class);
            self.end_site(site);
        }
        self.entry_label = self.f.current_label().to_string();
        self.f.terminate(Term::Br(block_label(BlockId(0))));

        for index in 0..self.body.blocks.len() {
            self.f.create_block(block_label(BlockId(index as u32)));
        }
        for index in 0..self.body.blocks.len() {
            self.lower_block(BlockId(index as u32))?;
        }
        self.finish_exits();
        self.finish_unwind();

        tracing::trace!(
            method = %self.reference,
            frame = self.frame.as_ref().map_or(0, |f| f.size),
            sites = self.liveness.sites().len(),
            "lowered method"
        );
        Ok(self.f.finish())
    }

    fn lower_block(&mut self, id: BlockId) -> CodegenResult<()> {
        let body = self.body;
        let block = &body.blocks[id.index()];
        self.block = Some(id);
        self.landings.clear();
        self.f.switch_to(&block_label(id));

        self.lower_phis(id)?;
        if self.handlers.contains(&id) {
            let exception = self.f.call(IrType::Ptr, Value::global("rt.catchException"), vec![]);
            if let (Some(var), Some(exception)) = (block.exception_variable, exception) {
                self.copy_into(var, IrType::Ptr, exception)?;
            }
        }

        for (index, instruction) in block.instructions.iter().enumerate() {
            if self.backend.config().emit_comments {
                self.f.comment(&format!("{:?}", instruction));
            }
            self.lower_instruction(index, instruction)?;
        }
        self.lower_terminator(&block.terminator)?;
        self.f.finish_source_block(id);
        self.finish_landing(id);
        Ok(())
    }

    fn lower_instruction(&mut self, index: usize, instruction: &Instruction) -> CodegenResult<()> {
        use Instruction::*;
        if instruction.is_call_site() {
            if let InitClass { class } = instruction {
                if !self.needs_initializer_call(class) {
                    return Ok(());
                }
            }
            let live = self.site_live(index);
            let site = self.begin_site(&live)?;
            self.lower_site(instruction)?;
            self.end_site(site);
            return Ok(());
        }

        match instruction {
            Nop | MonitorEnter { .. } | MonitorExit { .. } => Ok(()),
            NullConstant { receiver } => self.copy_into(*receiver, IrType::Ptr, Value::Null),
            IntConstant { receiver, value } => {
                self.copy_into(*receiver, IrType::I32, Value::Int(i64::from(*value)))
            }
            LongConstant { receiver, value } => self.copy_into(*receiver, IrType::I64, Value::Int(*value)),
            FloatConstant { receiver, value } => {
                self.copy_into(*receiver, IrType::Float, Value::Float(f64::from(*value)))
            }
            DoubleConstant { receiver, value } => {
                self.copy_into(*receiver, IrType::Double, Value::Float(*value))
            }
            StringConstant { receiver, value } => {
                let literal = self.state.strings.intern(value);
                self.copy_into(*receiver, IrType::Ptr, literal)
            }
            ClassConstant { receiver, ty } => self.lower_class_constant(*receiver, ty),
            Binary {
                operator,
                receiver,
                first,
                second,
                operand,
            } => self.lower_binary(*operator, *receiver, *first, *second, *operand),
            Negate { receiver, operand, ty } => self.lower_negate(*receiver, *operand, *ty),
            Assign { receiver, assignee } => {
                let ty = self.reg_type(*receiver)?;
                self.expect_type(*assignee, &ty)?;
                let value = self.var(*assignee);
                self.copy_into(*receiver, ty, value)
            }
            Cast { receiver, value, .. } | NullCheck { receiver, value } | UnwrapArray { receiver, array: value } => {
                self.expect_reference(*value)?;
                self.expect_reference(*receiver)?;
                let value = self.var(*value);
                self.copy_into(*receiver, IrType::Ptr, value)
            }
            NumericCast {
                receiver,
                value,
                from,
                to,
            } => self.lower_numeric_cast(*receiver, *value, *from, *to),
            IntegerCast {
                receiver,
                value,
                subtype,
                direction,
            } => self.lower_integer_cast(*receiver, *value, *subtype, *direction),
            GetField {
                receiver,
                instance,
                field,
                field_type,
            } => self.lower_get_field(*receiver, *instance, field, field_type),
            PutField {
                instance,
                field,
                value,
                field_type,
            } => self.lower_put_field(*instance, field, *value, field_type),
            ArrayLength { receiver, array } => self.lower_array_length(*receiver, *array),
            GetElement { receiver, array, index } => self.lower_get_element(*receiver, *array, *index),
            PutElement { array, index, value } => self.lower_put_element(*array, *index, *value),
            IsInstance { receiver, value, ty } => self.lower_is_instance(*receiver, *value, ty),
            Invoke { .. }
            | InvokeDynamic { .. }
            | Construct { .. }
            | ConstructArray { .. }
            | ConstructMultiArray { .. }
            | CloneArray { .. }
            | InitClass { .. } => Err(self.malformed("call site outside a site bracket")),
        }
    }

    /// Instructions that may collect or throw
    fn lower_site(&mut self, instruction: &Instruction) -> CodegenResult<()> {
        use Instruction::*;
        match instruction {
            Invoke {
                receiver,
                instance,
                method,
                arguments,
                kind,
            } => self.lower_invoke(*receiver, *instance, method, arguments, *kind),
            InvokeDynamic { name, .. } => Err(CodegenError::unsupported(format!("invokedynamic {}", name))),
            Construct { receiver, class } => self.lower_construct(*receiver, class),
            ConstructArray {
                receiver,
                item_type,
                size,
            } => self.lower_construct_array(*receiver, item_type, *size),
            ConstructMultiArray {
                receiver,
                item_type,
                dimensions,
            } => match dimensions.as_slice() {
                [size] => self.lower_construct_array(*receiver, item_type, *size),
                _ => Err(CodegenError::unsupported(format!(
                    "{}-dimensional array construction",
                    dimensions.len()
                ))),
            },
            CloneArray { receiver, array } => self.lower_clone_array(*receiver, *array),
            InitClass { class } => {
                self.call_initializer(class);
                Ok(())
            }
            _ => Err(self.malformed("not a call site")),
        }
    }

    // ========================================================================
    // Variables
    // ========================================================================

    fn var(&self, var: Var) -> Value {
        Value::local(format!("v{}", var.0))
    }

    fn kind(&self, var: Var) -> CodegenResult<VariableKind> {
        self.body
            .kind_of(var)
            .ok_or_else(|| self.malformed(format!("unknown variable {}", var)))
    }

    fn reg_type(&self, var: Var) -> CodegenResult<IrType> {
        Ok(IrType::of_kind(self.kind(var)?))
    }

    fn operand(&self, var: Var) -> CodegenResult<Operand> {
        Ok(Operand::new(self.reg_type(var)?, self.var(var)))
    }

    fn expect_type(&self, var: Var, ty: &IrType) -> CodegenResult<()> {
        let actual = self.reg_type(var)?;
        if &actual != ty {
            return Err(self.mismatch(format!("{} is {} where {} is expected", var, actual, ty)));
        }
        Ok(())
    }

    fn expect_reference(&self, var: Var) -> CodegenResult<()> {
        if !self.kind(var)?.is_reference() {
            return Err(self.mismatch(format!("{} is not a reference", var)));
        }
        Ok(())
    }

    /// Bind a source variable to an already computed value
    fn copy_into(&mut self, dest: Var, ty: IrType, value: Value) -> CodegenResult<()> {
        self.expect_type(dest, &ty)?;
        let dest = self.var(dest);
        self.f.assign(
            &dest,
            Instr::Cast {
                op: CastOp::Bitcast,
                value: value.typed(ty.clone()),
                to: ty,
            },
        );
        Ok(())
    }

    fn reference_parameters(&self) -> Vec<Var> {
        (0..self.method.arity())
            .map(|i| Var(i as u32))
            .filter(|v| self.body.kind_of(*v).is_some_and(VariableKind::is_reference))
            .collect()
    }

    fn mismatch(&self, message: impl Into<String>) -> CodegenError {
        CodegenError::KindMismatch {
            method: self.reference.to_string(),
            message: message.into(),
        }
    }

    fn malformed(&self, message: impl Into<String>) -> CodegenError {
        CodegenError::MalformedBody {
            method: self.reference.to_string(),
            message: message.into(),
        }
    }
}

pub(crate) fn block_label(id: BlockId) -> String {
    id.to_string()
}


//! Builders for constructing programs in Rust
//!
//! `BodyBuilder` follows the usual block-cursor shape: create blocks,
//! switch to one, emit instructions into it, then terminate it.

use crate::body::{
    BasicBlock, BinaryOp, BlockId, Body, Incoming, InvocationKind, Instruction, Phi, Terminator,
    TryCatch, Var,
};
use crate::class::{AccessLevel, ClassDef, FieldDef, MethodDef};
use crate::descriptor::{FieldRef, MethodDescriptor, MethodRef};
use crate::error::ModelResult;
use crate::program::Program;
use crate::types::{NumericType, ValueType, VariableKind};

/// Builder that collects classes into a `Program`
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    classes: Vec<ClassDef>,
    entry_point: Option<MethodRef>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class(mut self, class: ClassDef) -> Self {
        self.classes.push(class);
        self
    }

    pub fn entry_point(mut self, method: MethodRef) -> Self {
        self.entry_point = Some(method);
        self
    }

    pub fn build(self) -> ModelResult<Program> {
        Program::from_classes(self.classes, self.entry_point)
    }
}

/// Fluent builder for a single class
#[derive(Debug)]
pub struct ClassBuilder {
    class: ClassDef,
}

impl ClassBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            class: ClassDef::new(name),
        }
    }

    pub fn interface(name: impl Into<String>) -> Self {
        let mut builder = Self::new(name);
        builder.class.is_interface = true;
        builder.class.is_abstract = true;
        builder
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.class.parent = Some(parent.into());
        self
    }

    pub fn implements(mut self, iface: impl Into<String>) -> Self {
        self.class.interfaces.push(iface.into());
        self
    }

    pub fn abstract_class(mut self) -> Self {
        self.class.is_abstract = true;
        self
    }

    pub fn field(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.class.fields.push(FieldDef::new(name, ty));
        self
    }

    pub fn static_field(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.class.fields.push(FieldDef::new_static(name, ty));
        self
    }

    pub fn field_def(mut self, field: FieldDef) -> Self {
        self.class.fields.push(field);
        self
    }

    /// Instance method with a body
    pub fn method(mut self, desc: MethodDescriptor, body: Body) -> Self {
        let mut method = MethodDef::new(desc);
        method.body = Some(body);
        self.class.methods.push(method);
        self
    }

    pub fn static_method(mut self, desc: MethodDescriptor, body: Body) -> Self {
        let mut method = MethodDef::new(desc);
        method.is_static = true;
        method.body = Some(body);
        self.class.methods.push(method);
        self
    }

    pub fn abstract_method(mut self, desc: MethodDescriptor) -> Self {
        let mut method = MethodDef::new(desc);
        method.is_abstract = true;
        self.class.methods.push(method);
        self
    }

    pub fn native_method(mut self, desc: MethodDescriptor, is_static: bool) -> Self {
        let mut method = MethodDef::new(desc);
        method.is_native = true;
        method.is_static = is_static;
        self.class.methods.push(method);
        self
    }

    pub fn private_method(mut self, desc: MethodDescriptor, body: Body) -> Self {
        let mut method = MethodDef::new(desc);
        method.access = AccessLevel::Private;
        method.body = Some(body);
        self.class.methods.push(method);
        self
    }

    pub fn method_def(mut self, method: MethodDef) -> Self {
        self.class.methods.push(method);
        self
    }

    pub fn build(self) -> ClassDef {
        self.class
    }
}

/// Builder for SSA method bodies
#[derive(Debug)]
pub struct BodyBuilder {
    body: Body,
    current_block: BlockId,
}

impl BodyBuilder {
    /// Create a builder with an empty entry block selected
    pub fn new() -> Self {
        let mut body = Body::default();
        body.blocks.push(BasicBlock::new());
        Self {
            body,
            current_block: BlockId(0),
        }
    }

    /// Allocate a new variable of the given kind
    pub fn var(&mut self, kind: VariableKind) -> Var {
        let var = Var(self.body.variables.len() as u32);
        self.body.variables.push(kind);
        var
    }

    /// Create a new basic block
    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId(self.body.blocks.len() as u32);
        self.body.blocks.push(BasicBlock::new());
        id
    }

    /// Switch to emitting into a different block
    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current_block = block;
    }

    pub fn current_block(&self) -> BlockId {
        self.current_block
    }

    fn block_mut(&mut self) -> &mut BasicBlock {
        &mut self.body.blocks[self.current_block.index()]
    }

    /// Emit an instruction into the current block
    pub fn emit(&mut self, instr: Instruction) {
        self.block_mut().instructions.push(instr);
    }

    /// Set the terminator for the current block
    pub fn terminate(&mut self, term: Terminator) {
        self.block_mut().terminator = term;
    }

    pub fn phi(&mut self, receiver: Var, incomings: &[(BlockId, Var)]) {
        let incomings = incomings
            .iter()
            .map(|&(source, value)| Incoming { source, value })
            .collect();
        self.block_mut().phis.push(Phi {
            receiver,
            incomings,
        });
    }

    /// Protect the current block with a handler
    pub fn try_catch(&mut self, exception_type: Option<&str>, handler: BlockId) {
        self.block_mut().try_catches.push(TryCatch {
            exception_type: exception_type.map(str::to_string),
            handler,
        });
    }

    /// Mark the current block as receiving the caught exception in `var`
    pub fn catch_into(&mut self, var: Var) {
        self.block_mut().exception_variable = Some(var);
    }

    pub fn const_int(&mut self, value: i32) -> Var {
        let receiver = self.var(VariableKind::Int);
        self.emit(Instruction::IntConstant { receiver, value });
        receiver
    }

    pub fn const_long(&mut self, value: i64) -> Var {
        let receiver = self.var(VariableKind::Long);
        self.emit(Instruction::LongConstant { receiver, value });
        receiver
    }

    pub fn const_double(&mut self, value: f64) -> Var {
        let receiver = self.var(VariableKind::Double);
        self.emit(Instruction::DoubleConstant { receiver, value });
        receiver
    }

    pub fn const_null(&mut self) -> Var {
        let receiver = self.var(VariableKind::Object);
        self.emit(Instruction::NullConstant { receiver });
        receiver
    }

    pub fn const_string(&mut self, value: impl Into<String>) -> Var {
        let receiver = self.var(VariableKind::Object);
        self.emit(Instruction::StringConstant {
            receiver,
            value: value.into(),
        });
        receiver
    }

    pub fn binary(&mut self, operator: BinaryOp, first: Var, second: Var, operand: NumericType) -> Var {
        let kind = if operator == BinaryOp::Compare {
            VariableKind::Int
        } else {
            operand.kind()
        };
        let receiver = self.var(kind);
        self.emit(Instruction::Binary {
            operator,
            receiver,
            first,
            second,
            operand,
        });
        receiver
    }

    pub fn construct(&mut self, class: impl Into<String>) -> Var {
        let receiver = self.var(VariableKind::Object);
        self.emit(Instruction::Construct {
            receiver,
            class: class.into(),
        });
        receiver
    }

    pub fn construct_array(&mut self, item_type: ValueType, size: Var) -> Var {
        let receiver = self.var(VariableKind::Array(item_type.array_element_kind()));
        self.emit(Instruction::ConstructArray {
            receiver,
            item_type,
            size,
        });
        receiver
    }

    pub fn get_field(&mut self, instance: Option<Var>, field: FieldRef, field_type: ValueType) -> Var {
        let kind = field_type.kind().unwrap_or(VariableKind::Int);
        let receiver = self.var(kind);
        self.emit(Instruction::GetField {
            receiver,
            instance,
            field,
            field_type,
        });
        receiver
    }

    pub fn put_field(&mut self, instance: Option<Var>, field: FieldRef, value: Var, field_type: ValueType) {
        self.emit(Instruction::PutField {
            instance,
            field,
            value,
            field_type,
        });
    }

    /// Emit a call; a receiver is allocated unless the method returns void
    pub fn invoke(
        &mut self,
        kind: InvocationKind,
        method: MethodRef,
        instance: Option<Var>,
        arguments: Vec<Var>,
    ) -> Option<Var> {
        let receiver = method.desc.ret.kind().map(|k| self.var(k));
        self.emit(Instruction::Invoke {
            receiver,
            instance,
            method,
            arguments,
            kind,
        });
        receiver
    }

    pub fn is_instance(&mut self, value: Var, ty: ValueType) -> Var {
        let receiver = self.var(VariableKind::Int);
        self.emit(Instruction::IsInstance {
            receiver,
            value,
            ty,
        });
        receiver
    }

    pub fn jump(&mut self, target: BlockId) {
        self.terminate(Terminator::Jump { target });
    }

    pub fn exit(&mut self, value: Option<Var>) {
        self.terminate(Terminator::Exit { value });
    }

    pub fn raise(&mut self, exception: Var) {
        self.terminate(Terminator::Raise { exception });
    }

    pub fn finish(self) -> Body {
        self.body
    }
}

impl Default for BodyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Body of an instance method whose parameters occupy the first variables:
/// `this` is `Var(0)`, followed by one variable per parameter
pub fn method_body(params: &[ValueType]) -> (BodyBuilder, Vec<Var>) {
    let mut builder = BodyBuilder::new();
    let mut vars = Vec::with_capacity(params.len() + 1);
    vars.push(builder.var(VariableKind::Object));
    for param in params {
        vars.push(builder.var(param.kind().unwrap_or(VariableKind::Int)));
    }
    (builder, vars)
}

/// Body of a static method whose parameters occupy the first variables
pub fn static_body(params: &[ValueType]) -> (BodyBuilder, Vec<Var>) {
    let mut builder = BodyBuilder::new();
    let vars = params
        .iter()
        .map(|param| builder.var(param.kind().unwrap_or(VariableKind::Int)))
        .collect();
    (builder, vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::validate_body;

    #[test]
    fn test_build_loop() {
        let (mut b, params) = static_body(&[ValueType::INT]);
        let n = params[0];
        let header = b.create_block();
        let body = b.create_block();
        let done = b.create_block();

        let zero = b.const_int(0);
        b.jump(header);

        b.switch_to_block(header);
        let i = b.var(VariableKind::Int);
        let next = b.var(VariableKind::Int);
        b.phi(i, &[(BlockId(0), zero), (body, next)]);
        b.terminate(Terminator::BinaryBranch {
            condition: crate::body::BinaryBranchCondition::Equal,
            first: i,
            second: n,
            consequent: done,
            alternative: body,
        });

        b.switch_to_block(body);
        let one = b.const_int(1);
        b.emit(Instruction::Binary {
            operator: BinaryOp::Add,
            receiver: next,
            first: i,
            second: one,
            operand: NumericType::Int,
        });
        b.jump(header);

        b.switch_to_block(done);
        b.exit(Some(i));

        let body = b.finish();
        assert_eq!(body.block_count(), 4);
        assert!(validate_body("loop", &body).is_ok());
    }

    #[test]
    fn test_void_invoke_has_no_receiver() {
        let mut b = BodyBuilder::new();
        let method = MethodRef::new("A", MethodDescriptor::new("run", vec![], ValueType::Void));
        assert_eq!(b.invoke(InvocationKind::Static, method, None, vec![]), None);
    }
}

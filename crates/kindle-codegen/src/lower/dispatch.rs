//! Method invocation
//!
//! Static and special calls name their target directly. Virtual calls load
//! the class metadata from the object header and call through the slot the
//! declaration owns: a class slot sits after the `%rt.itable` header of the
//! owner's table type, an interface slot inside the header itself. A virtual
//! call to a method that owns no slot (a private or final-only declaration)
//! is bound directly.

use super::MethodRenderer;
use crate::emit::metadata::ITABLE_FIRST_SLOT;
use crate::error::{CodegenError, CodegenResult};
use crate::ir::{Instr, IrType, Operand, Value};
use crate::mangle;
use crate::vtable::VtableSlot;
use kindle_model::{InvocationKind, MethodRef, Var};

impl<'p, 'b, 's> MethodRenderer<'p, 'b, 's> {
    pub(super) fn lower_invoke(
        &mut self,
        receiver: Option<Var>,
        instance: Option<Var>,
        method: &MethodRef,
        arguments: &[Var],
        kind: InvocationKind,
    ) -> CodegenResult<()> {
        if arguments.len() != method.desc.params.len() {
            return Err(self.mismatch(format!(
                "{} takes {} arguments, {} given",
                method,
                method.desc.params.len(),
                arguments.len()
            )));
        }
        let is_static = kind == InvocationKind::Static;
        if is_static != instance.is_none() {
            return Err(self.malformed(format!("{:?} call to {} with instance {:?}", kind, method, instance)));
        }

        let mut args: Vec<Operand> = Vec::with_capacity(arguments.len() + 1);
        if let Some(instance) = instance {
            self.expect_reference(instance)?;
            args.push(Operand::ptr(self.var(instance)));
        }
        for (argument, param) in arguments.iter().zip(&method.desc.params) {
            let ty = IrType::of_value(param);
            self.expect_type(*argument, &ty)?;
            args.push(Operand::new(ty, self.var(*argument)));
        }

        let ret = IrType::of_value(&method.desc.ret);
        if let Some(receiver) = receiver {
            if ret == IrType::Void {
                return Err(self.mismatch(format!("{} returns nothing into {}", method, receiver)));
            }
            self.expect_type(receiver, &ret)?;
        }

        let callee = match (kind, instance) {
            (InvocationKind::Virtual, Some(instance)) => self.virtual_callee(method, instance)?,
            _ => self.direct_callee(method, is_static)?,
        };
        let call = Instr::Call { ret, callee, args };
        match receiver {
            Some(receiver) => {
                let dest = self.var(receiver);
                self.f.assign(&dest, call);
            }
            None => self.f.emit(call),
        }
        Ok(())
    }

    fn direct_callee(&self, method: &MethodRef, is_static: bool) -> CodegenResult<Value> {
        let (owner, def) = self
            .backend
            .program()
            .resolve_method(method)
            .ok_or_else(|| CodegenError::MissingMethod {
                method: method.to_string(),
            })?;
        if def.is_static != is_static {
            return Err(self.mismatch(format!(
                "{} is {}static",
                method,
                if def.is_static { "" } else { "not " }
            )));
        }
        if def.is_abstract {
            return Err(CodegenError::MissingMethod {
                method: format!("concrete {}", method),
            });
        }
        Ok(Value::global(mangle::method_name_parts(&owner.name, &def.desc)))
    }

    fn virtual_callee(&mut self, method: &MethodRef, instance: Var) -> CodegenResult<Value> {
        let backend = self.backend;
        let Some(slot) = backend.vtables().resolve(backend.program(), method) else {
            return self.direct_callee(method, false);
        };

        let object = self.var(instance);
        let class = self.f.define(Instr::Load {
            ty: IrType::Ptr,
            ptr: object,
        });
        let (base, index) = match slot {
            VtableSlot::Class { owner, slot } => (
                IrType::named(mangle::vtable_symbol(&owner)),
                1 + slot as i64,
            ),
            VtableSlot::Interface { slot } => (
                IrType::named("rt.itable"),
                i64::from(ITABLE_FIRST_SLOT) + slot as i64,
            ),
        };
        let address = self.f.define(Instr::Gep {
            base,
            ptr: class,
            indices: vec![Value::Int(0), Value::Int(index)],
        });
        Ok(self.f.define(Instr::Load {
            ty: IrType::Ptr,
            ptr: address,
        }))
    }
}

//! Per-class declarations: structure types, static field globals and the
//! guarded static initializer stubs.

use crate::emit::metadata::{FLAG_INITIALIZED, ITABLE_FLAGS};
use crate::emit::strings::StringPool;
use crate::error::{CodegenError, CodegenResult};
use crate::ir::{float_literal, BinOp, FunctionBuilder, Instr, IntPredicate, IrType, Term, Value};
use crate::mangle;
use crate::Backend;
use kindle_model::{ClassDef, Constant, FieldDef, MethodRef, Program};
use std::fmt::{self, Write};

/// Interfaces have metadata but no instances
pub fn class_needs_layout(class: &ClassDef) -> bool {
    !class.is_interface
}

/// Whether the class or one of its ancestors has a static initializer
pub fn needs_initialization(program: &Program, class: &str) -> bool {
    program
        .ancestors(class)
        .iter()
        .any(|c| c.class_initializer().is_some())
}

/// `%class.C` and `%vtable.C`
pub fn render_types(out: &mut String, backend: &Backend<'_>, class: &ClassDef) -> fmt::Result {
    let vtable = mangle::vtable_symbol(&class.name);
    if !class_needs_layout(class) {
        return writeln!(out, "%{} = type {{ %rt.itable }}", vtable);
    }

    write!(out, "%{} = type {{ %rt.Object", mangle::class_type(&class.name))?;
    if let Some(layout) = backend.layouts().layout(&class.name) {
        for field in &layout.fields {
            write!(out, ", {}", IrType::storage(&field.ty))?;
        }
    }
    out.push_str(" }\n");

    write!(out, "%{} = type {{ %rt.itable", vtable)?;
    if let Some(table) = backend.vtables().class_table(&class.name) {
        for _ in &table.entries {
            out.push_str(", ptr");
        }
    }
    out.push_str(" }\n");
    Ok(())
}

/// Globals backing the class's static fields
pub fn render_static_fields(out: &mut String, class: &ClassDef, strings: &mut StringPool) -> CodegenResult<()> {
    for field in class.static_fields() {
        let ty = IrType::storage(&field.ty);
        let value = match &field.initial {
            Some(constant) => constant_value(class, field, &ty, constant, strings)?,
            None => Value::zero_of(&ty),
        };
        writeln!(
            out,
            "@{} = global {} {}",
            mangle::field_name(&class.name, &field.name),
            ty,
            value
        )?;
    }
    Ok(())
}

fn constant_value(
    class: &ClassDef,
    field: &FieldDef,
    ty: &IrType,
    constant: &Constant,
    strings: &mut StringPool,
) -> CodegenResult<Value> {
    let value = match (constant, ty) {
        (Constant::Int(v), t) if t.is_integer() => Value::Int(truncate(i64::from(*v), t)),
        (Constant::Long(v), t) if t.is_integer() => Value::Int(truncate(*v, t)),
        // `float` constants must be exactly representable, which a value
        // that went through f32 always is
        (Constant::Float(v), IrType::Float) => Value::Const(float_literal(f64::from(*v))),
        (Constant::Float(v), IrType::Double) => Value::Const(float_literal(f64::from(*v))),
        (Constant::Double(v), IrType::Double) => Value::Const(float_literal(*v)),
        (Constant::Double(v), IrType::Float) => Value::Const(float_literal(f64::from(*v as f32))),
        (Constant::String(text), IrType::Ptr) => strings.intern(text),
        _ => {
            return Err(CodegenError::KindMismatch {
                method: format!("{}.{}", class.name, field.name),
                message: format!("initializer {:?} does not fit a {} field", constant, field.ty),
            })
        }
    };
    Ok(value)
}

fn truncate(value: i64, ty: &IrType) -> i64 {
    match ty {
        IrType::I1 => value & 1,
        IrType::I8 => i64::from(value as i8),
        IrType::I16 => i64::from(value as i16),
        IrType::I32 => i64::from(value as i32),
        _ => value,
    }
}

/// `@initializer_C`: run the parent's initializer and then `<clinit>`,
/// once, guarded by the initialized bit of the class flags
pub fn render_initializer(out: &mut String, backend: &Backend<'_>, class: &ClassDef) {
    let program = backend.program();
    let flags_ptr = Value::constant(format!(
        "getelementptr (%rt.itable, ptr @{}, i32 0, i32 {})",
        mangle::vtable_symbol(&class.name),
        ITABLE_FLAGS
    ));

    let mut f = FunctionBuilder::new(mangle::initializer_symbol(&class.name), IrType::Void, vec![]);
    let flags = f.define(Instr::Load {
        ty: IrType::I32,
        ptr: flags_ptr.clone(),
    });
    let done = f.define(Instr::Binary {
        op: BinOp::And,
        ty: IrType::I32,
        lhs: flags.clone(),
        rhs: Value::Int(i64::from(FLAG_INITIALIZED)),
    });
    let initialized = f.define(Instr::Icmp {
        pred: IntPredicate::Ne,
        ty: IrType::I32,
        lhs: done,
        rhs: Value::Int(0),
    });
    let init = f.create_block("init");
    let exit = f.create_block("exit");
    f.terminate(Term::CondBr {
        cond: initialized,
        then_label: exit.clone(),
        else_label: init.clone(),
    });

    f.switch_to(&init);
    let marked = f.define(Instr::Binary {
        op: BinOp::Or,
        ty: IrType::I32,
        lhs: flags,
        rhs: Value::Int(i64::from(FLAG_INITIALIZED)),
    });
    f.emit(Instr::Store {
        value: marked.typed(IrType::I32),
        ptr: flags_ptr,
    });
    if let Some(parent) = class.parent_name() {
        if needs_initialization(program, parent) {
            f.call(
                IrType::Void,
                Value::global(mangle::initializer_symbol(parent)),
                vec![],
            );
        }
    }
    if let Some(clinit) = class.class_initializer() {
        let method = MethodRef::new(class.name.clone(), clinit.desc.clone());
        f.call(IrType::Void, Value::global(mangle::method_name(&method)), vec![]);
    }
    f.terminate(Term::Br(exit.clone()));

    f.switch_to(&exit);
    f.terminate(Term::Ret(None));
    out.push_str(&f.finish());
}

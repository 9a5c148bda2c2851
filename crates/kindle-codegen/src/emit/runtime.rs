//! Fixed runtime text and the process entry wrapper

use crate::config::CodegenConfig;
use crate::error::{CodegenError, CodegenResult};
use crate::ir::{FunctionBuilder, IrType, Operand, Term, Value};
use crate::mangle;
use kindle_model::{MethodRef, Program};
use std::fmt::{self, Write};

/// Runtime types and external runtime entry points
pub const PROLOGUE: &str = include_str!("../runtime/prologue.ll");

/// Helper routines defined by every module
pub const EPILOGUE: &str = include_str!("../runtime/epilogue.ll");

pub fn render_header(out: &mut String, config: &CodegenConfig) -> fmt::Result {
    writeln!(out, "; ModuleID = '{}'", config.module_name)?;
    writeln!(out, "source_filename = \"{}\"", config.module_name)?;
    if let Some(layout) = &config.data_layout {
        writeln!(out, "target datalayout = \"{}\"", layout)?;
    }
    if let Some(triple) = &config.target_triple {
        writeln!(out, "target triple = \"{}\"", triple)?;
    }
    writeln!(out)
}

/// `@main`: start the runtime, mark the string pool, run the entry method
pub fn render_main(out: &mut String, program: &Program, entry: &MethodRef) -> CodegenResult<()> {
    let (owner, method) = program
        .resolve_method(entry)
        .ok_or_else(|| CodegenError::MissingMethod {
            method: entry.to_string(),
        })?;
    if !method.is_static {
        return Err(CodegenError::MissingMethod {
            method: format!("static {}", entry),
        });
    }

    let target = MethodRef::new(owner.name.clone(), method.desc.clone());
    let args = method
        .desc
        .params
        .iter()
        .map(|param| {
            let ty = IrType::of_value(param);
            let zero = Value::zero_of(&ty);
            Operand::new(ty, zero)
        })
        .collect();

    let mut f = FunctionBuilder::new("main", IrType::I32, vec![]);
    f.call(IrType::Void, Value::global("rt.init"), vec![]);
    f.call(IrType::Void, Value::global("rt.initStringPool"), vec![]);
    f.call(
        IrType::of_value(&method.desc.ret),
        Value::global(mangle::method_name(&target)),
        args,
    );
    f.terminate(Term::Ret(Some(Operand::i32(0))));
    out.push_str(&f.finish());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindle_model::{BodyBuilder, ClassBuilder, MethodDescriptor, ProgramBuilder, ValueType};

    #[test]
    fn test_header() {
        let config = CodegenConfig::default()
            .with_module_name("demo")
            .with_target_triple("x86_64-pc-linux-gnu");
        let mut out = String::new();
        render_header(&mut out, &config).unwrap();
        assert!(out.starts_with("; ModuleID = 'demo'\nsource_filename = \"demo\"\n"));
        assert!(out.contains("target triple = \"x86_64-pc-linux-gnu\""));
        assert!(!out.contains("datalayout"));
    }

    #[test]
    fn test_main_passes_null_arguments() {
        let desc = MethodDescriptor::new(
            "main",
            vec![ValueType::array_of(ValueType::object("java.lang.String"))],
            ValueType::Void,
        );
        let mut b = BodyBuilder::new();
        b.var(kindle_model::VariableKind::Array(kindle_model::ArrayKind::Object));
        b.exit(None);
        let program = ProgramBuilder::new()
            .class(ClassBuilder::new("App").static_method(desc.clone(), b.finish()).build())
            .build()
            .unwrap();

        let mut out = String::new();
        render_main(&mut out, &program, &MethodRef::new("App", desc)).unwrap();
        assert!(out.contains("call void @rt.init()"));
        assert!(out.contains("call void @rt.initStringPool()"));
        assert!(out.contains("call void @m3_App4_mainVAL24_java_002elang_002eString(ptr null)"));
        assert!(out.contains("ret i32 0"));
    }

    #[test]
    fn test_missing_entry() {
        let program = ProgramBuilder::new().build().unwrap();
        let entry = MethodRef::new("App", MethodDescriptor::new("main", vec![], ValueType::Void));
        assert!(matches!(
            render_main(&mut String::new(), &program, &entry),
            Err(CodegenError::MissingMethod { .. })
        ));
    }
}

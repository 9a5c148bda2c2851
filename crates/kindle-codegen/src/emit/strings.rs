//! String literal pool
//!
//! Literals are interned by content in first-use order. Each one becomes a
//! statically allocated string object whose character field points at a
//! statically allocated `char[]`. Both live in writable globals so the
//! start-up routine can set their GC mark bit.

use crate::error::{CodegenError, CodegenResult};
use crate::ir::{IrType, Operand, Value};
use crate::layout::LayoutRegistry;
use crate::mangle;
use kindle_model::FieldRef;
use rustc_hash::FxHashMap;
use std::fmt::Write;

/// Mark bit of the GC word in the object header
pub const GC_MARK: i32 = i32::MIN;

#[derive(Debug, Default)]
pub struct StringPool {
    literals: Vec<String>,
    index: FxHashMap<String, usize>,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Global holding the literal's string object
    pub fn intern(&mut self, text: &str) -> Value {
        let id = match self.index.get(text) {
            Some(&id) => id,
            None => {
                let id = self.literals.len();
                self.literals.push(text.to_string());
                self.index.insert(text.to_string(), id);
                id
            }
        };
        Value::global(format!("str.{}", id))
    }

    pub fn len(&self) -> usize {
        self.literals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    /// Render the literal globals and `@rt.initStringPool`
    pub fn render(
        &self,
        out: &mut String,
        layouts: &LayoutRegistry,
        string_class: &str,
        chars_field: &str,
    ) -> CodegenResult<()> {
        let mut field_values: Vec<(IrType, bool)> = Vec::new();
        if !self.literals.is_empty() {
            let layout = layouts
                .layout(string_class)
                .ok_or_else(|| CodegenError::missing_class(string_class))?;
            let chars = layouts
                .field(&FieldRef::new(string_class, chars_field))
                .ok_or_else(|| CodegenError::MissingField {
                    field: format!("{}.{}", string_class, chars_field),
                })?;
            for field in &layout.fields {
                field_values.push((IrType::storage(&field.ty), field.index == chars.index));
            }
        }

        let class_type = IrType::named(mangle::class_type(string_class));
        let class_meta = Value::global(mangle::vtable_symbol(string_class));

        for (id, text) in self.literals.iter().enumerate() {
            let units: Vec<u16> = text.encode_utf16().collect();
            let array_type = IrType::array(units.len() as u64, IrType::I16);
            let chars_type = IrType::Struct(vec![IrType::named("rt.Array"), array_type.clone()]);
            let data = if units.is_empty() {
                "zeroinitializer".to_string()
            } else {
                let items: Vec<String> = units.iter().map(|u| format!("i16 {}", u)).collect();
                format!("[{}]", items.join(", "))
            };
            writeln!(
                out,
                "@str.chars.{} = private global {} {{ %rt.Array {{ %rt.Object {{ ptr @rt.charArray, i32 0 }}, i32 {}, ptr null }}, {} {} }}",
                id,
                chars_type,
                units.len(),
                array_type,
                data
            )?;

            let mut fields = vec![format!("%rt.Object {{ ptr {}, i32 0 }}", class_meta)];
            for (ty, is_chars) in &field_values {
                let value = if *is_chars {
                    Value::global(format!("str.chars.{}", id))
                } else {
                    Value::zero_of(ty)
                };
                fields.push(Operand::new(ty.clone(), value).to_string());
            }
            writeln!(
                out,
                "@str.{} = private global {} {{ {} }}",
                id,
                class_type,
                fields.join(", ")
            )?;
        }
        out.push('\n');

        out.push_str("define void @rt.initStringPool() {\nentry:\n");
        for id in 0..self.literals.len() {
            for global in [format!("str.{}", id), format!("str.chars.{}", id)] {
                writeln!(
                    out,
                    "  store i32 {}, ptr getelementptr (%rt.Object, ptr @{}, i32 0, i32 1)",
                    GC_MARK, global
                )?;
            }
        }
        out.push_str("  ret void\n}\n");
        Ok(())
    }
}

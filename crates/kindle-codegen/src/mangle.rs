//! Symbol name mangling
//!
//! Every component is escaped so the result only contains `[A-Za-z0-9_]`,
//! then length-prefixed. Signatures use self-delimiting type codes. Since
//! every piece can be parsed back unambiguously, distinct inputs never map
//! to the same symbol.

use kindle_model::{MethodDescriptor, MethodRef, PrimitiveType, ValueType};

/// Escape one identifier, working on UTF-16 code units
pub fn escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for unit in name.encode_utf16() {
        match unit {
            u if u == u16::from(b'_') => out.push_str("__"),
            u if u < 0x80 && (u as u8).is_ascii_alphanumeric() => out.push(u as u8 as char),
            u => out.push_str(&format!("_{:04x}", u)),
        }
    }
    out
}

/// `<len>_<escaped>`, where `len` counts bytes of the escaped text
pub fn length_prefixed(name: &str) -> String {
    let escaped = escape(name);
    format!("{}_{}", escaped.len(), escaped)
}

/// Self-delimiting code for a value type
pub fn type_code(ty: &ValueType) -> String {
    let mut out = String::new();
    push_type_code(&mut out, ty);
    out
}

fn push_type_code(out: &mut String, ty: &ValueType) {
    match ty {
        ValueType::Void => out.push('V'),
        ValueType::Primitive(p) => out.push(match p {
            PrimitiveType::Boolean => 'Z',
            PrimitiveType::Byte => 'B',
            PrimitiveType::Short => 'S',
            PrimitiveType::Char => 'C',
            PrimitiveType::Int => 'I',
            PrimitiveType::Long => 'J',
            PrimitiveType::Float => 'F',
            PrimitiveType::Double => 'D',
        }),
        ValueType::Object(class) => {
            out.push('L');
            out.push_str(&length_prefixed(class));
        }
        ValueType::Array(item) => {
            out.push('A');
            push_type_code(out, item);
        }
    }
}

/// Symbol of a method implementation
pub fn method_name(method: &MethodRef) -> String {
    method_name_parts(&method.class, &method.desc)
}

pub fn method_name_parts(class: &str, desc: &MethodDescriptor) -> String {
    let mut out = String::from("m");
    out.push_str(&length_prefixed(class));
    out.push_str(&length_prefixed(&desc.name));
    push_type_code(&mut out, &desc.ret);
    for param in &desc.params {
        push_type_code(&mut out, param);
    }
    out
}

/// Symbol of a static field
pub fn field_name(class: &str, field: &str) -> String {
    format!("f{}{}", length_prefixed(class), length_prefixed(field))
}

/// Component used for per-class globals (`@vtable.<...>`, `%class.<...>`)
pub fn class_name(class: &str) -> String {
    length_prefixed(class)
}

/// Class metadata global, also the name of its structure type
pub fn vtable_symbol(class: &str) -> String {
    format!("vtable.{}", class_name(class))
}

/// Instance structure type
pub fn class_type(class: &str) -> String {
    format!("class.{}", class_name(class))
}

/// GC table of a class's own reference field offsets
pub fn fields_symbol(class: &str) -> String {
    format!("fields.{}", class_name(class))
}

/// Guarded static initializer stub
pub fn initializer_symbol(class: &str) -> String {
    format!("initializer_{}", class_name(class))
}

//! Runtime metadata
//!
//! Class metadata globals (the `%rt.itable` header followed by the class's
//! virtual slots), GC field tables, runtime array classes, the stack-root
//! table and the call-site table consumed by the exception dispatcher.

use crate::emit::classes::class_needs_layout;
use crate::error::{CodegenError, CodegenResult};
use crate::ir::{IrType, Value};
use crate::mangle;
use crate::vtable::find_implementation;
use crate::Backend;
use kindle_model::{ArrayKind, ClassDef};
use std::fmt::{self, Write};

/// Element index of the flags word in `%rt.itable`
pub const ITABLE_FLAGS: u32 = 1;
/// Element index of the lower tag bound in `%rt.itable`
pub const ITABLE_TAG_LOWER: u32 = 2;
/// Element index of the first interface slot in `%rt.itable`
pub const ITABLE_FIRST_SLOT: u32 = 5;
/// Flags bit recording that the class initializer has run
pub const FLAG_INITIALIZED: i32 = i32::MIN;

/// Global holding the metadata of runtime arrays of a kind
pub fn array_class_symbol(kind: ArrayKind) -> String {
    format!("rt.{}Array", kind.name())
}

/// `%rt.itable` with one pointer per shared interface slot
pub fn render_itable_type(out: &mut String, backend: &Backend<'_>) {
    out.push_str("%rt.itable = type { i32, i32, i32, i32, %rt.Fields");
    for _ in 0..backend.vtables().interface_slot_count() {
        out.push_str(", ptr");
    }
    out.push_str(" }\n");
}

fn itable_constant(
    size: &str,
    tags: (i32, i32),
    parent: &Value,
    field_count: usize,
    fields: &Value,
    slots: &[Value],
) -> Result<String, fmt::Error> {
    let mut text = format!(
        "%rt.itable {{ i32 {}, i32 0, i32 {}, i32 {}, %rt.Fields {{ ptr {}, i64 {}, ptr {} }}",
        size, tags.0, tags.1, parent, field_count, fields
    );
    for slot in slots {
        write!(text, ", ptr {}", slot)?;
    }
    text.push_str(" }");
    Ok(text)
}

/// Metadata global of one class or interface
pub fn render_class_metadata(out: &mut String, backend: &Backend<'_>, class: &ClassDef) -> CodegenResult<()> {
    let program = backend.program();
    let symbol = mangle::vtable_symbol(&class.name);
    let interface_table = backend.vtables().interface_table();

    if !class_needs_layout(class) {
        let nulls = vec![Value::Null; interface_table.len()];
        let header = itable_constant("0", (0, 0), &Value::Null, 0, &Value::Null, &nulls)?;
        writeln!(out, "@{} = global %{} {{ {} }}", symbol, symbol, header)?;
        return Ok(());
    }

    let range = backend
        .tags()
        .class_range(&class.name)
        .ok_or_else(|| CodegenError::InconsistentHierarchy {
            class: class.name.clone(),
            message: "class has no type tag".to_string(),
        })?;
    let layout = backend
        .layouts()
        .layout(&class.name)
        .ok_or_else(|| CodegenError::missing_class(class.name.clone()))?;

    let mut interface_slots: Vec<Value> = Vec::with_capacity(interface_table.len());
    for entry in &interface_table.entries {
        let implementation = if program.is_subtype(&class.name, &entry.method.class) {
            find_implementation(program, &class.name, &entry.method.desc)
        } else {
            None
        };
        interface_slots.push(match implementation {
            Some(method) => Value::global(mangle::method_name(&method)),
            None => Value::Null,
        });
    }

    let parent = match class.parent_name() {
        Some(parent) => Value::global(mangle::vtable_symbol(parent)),
        None => Value::Null,
    };
    let ref_count = layout.own_reference_fields().count();
    let fields = if ref_count > 0 {
        Value::global(mangle::fields_symbol(&class.name))
    } else {
        Value::Null
    };
    let size = format!(
        "ptrtoint (ptr getelementptr (%{}, ptr null, i32 1) to i32)",
        mangle::class_type(&class.name)
    );
    let header = itable_constant(
        &size,
        (range.lower, range.upper),
        &parent,
        ref_count,
        &fields,
        &interface_slots,
    )?;

    write!(out, "@{} = global %{} {{ {}", symbol, symbol, header)?;
    if let Some(table) = backend.vtables().class_table(&class.name) {
        for entry in &table.entries {
            match find_implementation(program, &class.name, &entry.method.desc) {
                Some(method) => write!(out, ", ptr @{}", mangle::method_name(&method))?,
                None => out.push_str(", ptr null"),
            }
        }
    }
    out.push_str(" }\n");
    Ok(())
}

/// Byte offsets of a class's own reference fields
pub fn render_field_table(out: &mut String, backend: &Backend<'_>, class: &ClassDef) -> CodegenResult<()> {
    let Some(layout) = backend.layouts().layout(&class.name) else {
        return Ok(());
    };
    let offsets: Vec<String> = layout
        .own_reference_fields()
        .map(|field| {
            format!(
                "i32 ptrtoint (ptr getelementptr (%{}, ptr null, i32 0, i32 {}) to i32)",
                mangle::class_type(&class.name),
                field.index
            )
        })
        .collect();
    if offsets.is_empty() {
        return Ok(());
    }
    writeln!(
        out,
        "@{} = private constant [{} x i32] [{}]",
        mangle::fields_symbol(&class.name),
        offsets.len(),
        offsets.join(", ")
    )?;
    Ok(())
}

/// Metadata of every runtime array class. Arrays carry the root class's
/// tag, so they are instances of the root class and of nothing else.
pub fn render_array_classes(out: &mut String, backend: &Backend<'_>) -> CodegenResult<()> {
    let root = &backend.config().root_class;
    let tag = backend.tags().tag_of(root).unwrap_or(-1);
    let parent = if backend.program().lookup(root).is_some() {
        Value::global(mangle::vtable_symbol(root))
    } else {
        Value::Null
    };
    let nulls = vec![Value::Null; backend.vtables().interface_slot_count()];
    for kind in ArrayKind::ALL {
        let header = itable_constant("0", (tag, tag + 1), &parent, 0, &Value::Null, &nulls)?;
        writeln!(out, "@{} = global {}", array_class_symbol(kind), header)?;
    }
    Ok(())
}

/// `@rt.stackRoots`: every static reference field, scanned as a GC root
pub fn render_stack_roots(out: &mut String, backend: &Backend<'_>) -> CodegenResult<()> {
    let mut roots: Vec<String> = Vec::new();
    for class in backend.program().sorted_classes() {
        for field in class.static_fields().filter(|f| f.ty.is_reference()) {
            roots.push(format!("ptr @{}", mangle::field_name(&class.name, &field.name)));
        }
    }
    let array = IrType::array(roots.len() as u64, IrType::Ptr);
    let items = if roots.is_empty() {
        "zeroinitializer".to_string()
    } else {
        format!("[{}]", roots.join(", "))
    };
    writeln!(
        out,
        "@rt.stackRoots = constant {{ i64, {} }} {{ i64 {}, {} {} }}",
        array,
        roots.len(),
        array,
        items
    )?;
    Ok(())
}

// ============================================================================
// Call sites
// ============================================================================

/// A point where a callee may collect or throw
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub id: u32,
    pub live_references: usize,
    /// Handlers in the order they are tried; `None` catches everything
    pub exception_types: Vec<Option<String>>,
}

#[derive(Debug, Default)]
pub struct CallSiteTable {
    sites: Vec<CallSite>,
}

impl CallSiteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, live_references: usize, exception_types: Vec<Option<String>>) -> u32 {
        let id = self.sites.len() as u32;
        self.sites.push(CallSite {
            id,
            live_references,
            exception_types,
        });
        id
    }

    pub fn sites(&self) -> &[CallSite] {
        &self.sites
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn render(&self, out: &mut String) -> fmt::Result {
        for site in self.sites.iter().filter(|s| !s.exception_types.is_empty()) {
            let handlers: Vec<String> = site
                .exception_types
                .iter()
                .map(|ty| match ty {
                    Some(class) => format!("ptr @{}", mangle::vtable_symbol(class)),
                    None => "ptr null".to_string(),
                })
                .collect();
            writeln!(
                out,
                "@callsite.{} = private constant [{} x ptr] [{}]",
                site.id,
                handlers.len(),
                handlers.join(", ")
            )?;
        }

        let entries: Vec<String> = self
            .sites
            .iter()
            .map(|site| {
                let handlers = if site.exception_types.is_empty() {
                    "null".to_string()
                } else {
                    format!("@callsite.{}", site.id)
                };
                format!(
                    "%rt.CallSite {{ i32 {}, i32 {}, ptr {} }}",
                    site.live_references,
                    site.exception_types.len(),
                    handlers
                )
            })
            .collect();
        let array = IrType::array(entries.len() as u64, IrType::named("rt.CallSite"));
        let items = if entries.is_empty() {
            "zeroinitializer".to_string()
        } else {
            format!("[{}]", entries.join(", "))
        };
        writeln!(out, "@rt.callSites = constant {} {}", array, items)?;
        writeln!(out, "@rt.callSiteCount = constant i32 {}", entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_site_table() {
        let mut table = CallSiteTable::new();
        assert_eq!(table.register(2, vec![]), 0);
        assert_eq!(
            table.register(0, vec![Some("Err".to_string()), None]),
            1
        );

        let mut out = String::new();
        table.render(&mut out).unwrap();
        assert!(out.contains("@callsite.1 = private constant [2 x ptr] [ptr @vtable.3_Err, ptr null]"));
        assert!(out.contains("%rt.CallSite { i32 2, i32 0, ptr null }"));
        assert!(out.contains("%rt.CallSite { i32 0, i32 2, ptr @callsite.1 }"));
        assert!(out.contains("@rt.callSiteCount = constant i32 2"));
    }

    #[test]
    fn test_empty_call_site_table() {
        let mut out = String::new();
        CallSiteTable::new().render(&mut out).unwrap();
        assert!(out.contains("@rt.callSites = constant [0 x %rt.CallSite] zeroinitializer"));
    }
}

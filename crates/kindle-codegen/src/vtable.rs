//! Virtual Table Builder
//!
//! Slots are assigned once per topmost declaration and inherited unchanged
//! by every override:
//!
//! - a class method that overrides nothing gets the next free slot of its
//!   class's table; subclass tables start with the parent's entries, so the
//!   slot index is valid on every subclass;
//! - a method whose topmost declarations live in interfaces dispatches
//!   through the shared interface table instead, one slot per interface
//!   declaration, present in the header of every class.
//!
//! Constructors, static initializers, static and private methods never get
//! slots; they are always called directly.

use crate::error::{CodegenError, CodegenResult};
use kindle_model::{ClassDef, MethodDescriptor, MethodRef, Program};
use rustc_hash::{FxHashMap, FxHashSet};

/// A declaration and the slot it owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualTableEntry {
    pub method: MethodRef,
    pub slot: usize,
}

/// Slot-indexed dispatch table; `class` is `None` for the interface table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualTable {
    pub class: Option<String>,
    pub entries: Vec<VirtualTableEntry>,
}

impl VirtualTable {
    fn new(class: Option<String>) -> Self {
        Self {
            class,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, method: MethodRef) -> usize {
        let slot = self.entries.len();
        self.entries.push(VirtualTableEntry { method, slot });
        slot
    }
}

/// Where a declaration's slot lives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VtableSlot {
    /// Slot of the table introduced by `owner` (valid on all subclasses)
    Class { owner: String, slot: usize },
    /// Slot of the shared interface table
    Interface { slot: usize },
}

#[derive(Debug, Default)]
pub struct VtableRegistry {
    tables: FxHashMap<String, VirtualTable>,
    interface_table: VirtualTable,
    entries: FxHashMap<MethodRef, VtableSlot>,
}

impl Default for VirtualTable {
    fn default() -> Self {
        Self::new(None)
    }
}

impl VtableRegistry {
    pub fn build(program: &Program) -> CodegenResult<Self> {
        let mut registry = VtableRegistry::default();

        let mut classes: Vec<(usize, &ClassDef)> = program
            .classes()
            .iter()
            .filter(|c| !c.is_interface)
            .map(|c| (program.ancestors(&c.name).len(), c))
            .collect();
        classes.sort_by(|(da, a), (db, b)| da.cmp(db).then_with(|| a.name.cmp(&b.name)));

        for (_, class) in &classes {
            let mut table = match class.parent_name().and_then(|p| registry.tables.get(p)) {
                Some(parent) => parent.clone(),
                None => VirtualTable::default(),
            };
            table.class = Some(class.name.clone());

            for method in class.methods.iter().filter(|m| m.is_virtual()) {
                let decls = topmost_declarations(program, class, &method.desc);
                if decls.is_empty() {
                    let method_ref = MethodRef::new(class.name.clone(), method.desc.clone());
                    let slot = table.push(method_ref.clone());
                    registry.insert(
                        method_ref,
                        VtableSlot::Class {
                            owner: class.name.clone(),
                            slot,
                        },
                    )?;
                } else {
                    registry.assign_interface_slots(program, decls);
                }
            }
            registry.tables.insert(class.name.clone(), table);
        }

        let mut interfaces: Vec<&ClassDef> =
            program.classes().iter().filter(|c| c.is_interface).collect();
        interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        for iface in interfaces {
            for method in iface.methods.iter().filter(|m| m.is_virtual()) {
                let decls = topmost_declarations(program, iface, &method.desc);
                if decls.is_empty() {
                    let method_ref = MethodRef::new(iface.name.clone(), method.desc.clone());
                    if !registry.entries.contains_key(&method_ref) {
                        let slot = registry.interface_table.push(method_ref.clone());
                        registry.insert(method_ref, VtableSlot::Interface { slot })?;
                    }
                } else {
                    registry.assign_interface_slots(program, decls);
                }
            }
        }

        let class_slots: usize = registry.tables.values().map(|t| t.len()).sum();
        tracing::debug!(
            tables = registry.tables.len(),
            class_slots,
            interface_slots = registry.interface_table.len(),
            "virtual tables built"
        );
        Ok(registry)
    }

    fn insert(&mut self, method: MethodRef, slot: VtableSlot) -> CodegenResult<()> {
        if self.entries.contains_key(&method) {
            return Err(CodegenError::DuplicateVtableEntry {
                method: method.to_string(),
            });
        }
        self.entries.insert(method, slot);
        Ok(())
    }

    fn assign_interface_slots(&mut self, program: &Program, decls: Vec<MethodRef>) {
        for decl in decls {
            let is_interface = program
                .lookup(&decl.class)
                .is_some_and(|c| c.is_interface);
            if is_interface && !self.entries.contains_key(&decl) {
                let slot = self.interface_table.push(decl.clone());
                self.entries.insert(decl, VtableSlot::Interface { slot });
            }
        }
    }

    /// Table of a concrete class, including inherited entries
    pub fn class_table(&self, class: &str) -> Option<&VirtualTable> {
        self.tables.get(class)
    }

    pub fn interface_table(&self) -> &VirtualTable {
        &self.interface_table
    }

    pub fn interface_slot_count(&self) -> usize {
        self.interface_table.len()
    }

    /// Slot owned by exactly this declaration
    pub fn entry(&self, method: &MethodRef) -> Option<&VtableSlot> {
        self.entries.get(method)
    }

    /// Slot a virtual call through `method` dispatches on: the parent chain
    /// of the referenced class is searched first, then its interfaces
    pub fn resolve(&self, program: &Program, method: &MethodRef) -> Option<VtableSlot> {
        for class in program.ancestors(&method.class) {
            if let Some(slot) = self.entries.get(&method.with_class(class.name.clone())) {
                return Some(slot.clone());
            }
        }
        for iface in program.all_interfaces(&method.class) {
            if let Some(slot) = self.entries.get(&method.with_class(iface.name.clone())) {
                return Some(slot.clone());
            }
        }
        None
    }
}

/// Implementation a concrete class runs for a descriptor, or `None` when the
/// nearest declaration is abstract or there is none
pub fn find_implementation(program: &Program, class: &str, desc: &MethodDescriptor) -> Option<MethodRef> {
    for ancestor in program.ancestors(class) {
        let Some(method) = ancestor.method(desc) else {
            continue;
        };
        if method.is_static || method.is_private() {
            continue;
        }
        if method.is_abstract {
            return None;
        }
        return Some(MethodRef::new(ancestor.name.clone(), desc.clone()));
    }
    None
}

/// Topmost declarations `desc` overrides when declared in `class`: for each
/// direct supertype, its own topmost set, or the supertype's declaration if
/// that declaration overrides nothing further up
fn topmost_declarations(program: &Program, class: &ClassDef, desc: &MethodDescriptor) -> Vec<MethodRef> {
    let mut result: Vec<MethodRef> = Vec::new();
    let mut visited: FxHashSet<String> = FxHashSet::default();
    visited.insert(class.name.clone());
    collect_topmost(program, class, desc, &mut visited, &mut result);
    result
}

fn collect_topmost(
    program: &Program,
    class: &ClassDef,
    desc: &MethodDescriptor,
    visited: &mut FxHashSet<String>,
    result: &mut Vec<MethodRef>,
) {
    let supertypes = class.parent_name().into_iter().chain(class.interfaces.iter().map(String::as_str));
    for name in supertypes {
        if !visited.insert(name.to_string()) {
            continue;
        }
        let Some(sup) = program.lookup(name) else {
            continue;
        };
        let before = result.len();
        collect_topmost(program, sup, desc, visited, result);
        if result.len() > before {
            continue;
        }
        let declares = sup
            .method(desc)
            .is_some_and(|m| !m.is_static && !m.is_private());
        if declares {
            let decl = MethodRef::new(sup.name.clone(), desc.clone());
            if !result.contains(&decl) {
                result.push(decl);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindle_model::{BodyBuilder, ClassBuilder, ProgramBuilder, ValueType};

    fn body() -> kindle_model::Body {
        let mut b = BodyBuilder::new();
        b.exit(None);
        b.finish()
    }

    fn get_x() -> MethodDescriptor {
        MethodDescriptor::new("getX", vec![], ValueType::INT)
    }

    fn foo() -> MethodDescriptor {
        MethodDescriptor::new("foo", vec![], ValueType::INT)
    }

    fn scenario() -> Program {
        ProgramBuilder::new()
            .class(ClassBuilder::new("Object").build())
            .class(
                ClassBuilder::new("Base")
                    .extends("Object")
                    .abstract_class()
                    .abstract_method(get_x())
                    .build(),
            )
            .class(ClassBuilder::interface("I").abstract_method(foo()).build())
            .class(
                ClassBuilder::new("A")
                    .extends("Base")
                    .implements("I")
                    .method(get_x(), body())
                    .method(foo(), body())
                    .build(),
            )
            .class(ClassBuilder::new("B").extends("Base").method(get_x(), body()).build())
            .build()
            .unwrap()
    }

    #[test]
    fn test_override_shares_slot() {
        let p = scenario();
        let vt = VtableRegistry::build(&p).unwrap();

        let expected = VtableSlot::Class {
            owner: "Base".to_string(),
            slot: 0,
        };
        assert_eq!(vt.resolve(&p, &MethodRef::new("A", get_x())), Some(expected.clone()));
        assert_eq!(vt.resolve(&p, &MethodRef::new("B", get_x())), Some(expected));
        assert_eq!(vt.class_table("A").unwrap().len(), 1);
        assert_eq!(vt.class_table("Object").unwrap().len(), 0);
    }

    #[test]
    fn test_interface_method_uses_interface_table() {
        let p = scenario();
        let vt = VtableRegistry::build(&p).unwrap();

        assert_eq!(
            vt.resolve(&p, &MethodRef::new("I", foo())),
            Some(VtableSlot::Interface { slot: 0 })
        );
        assert_eq!(
            vt.resolve(&p, &MethodRef::new("A", foo())),
            Some(VtableSlot::Interface { slot: 0 })
        );
        assert_eq!(vt.interface_slot_count(), 1);
    }

    #[test]
    fn test_find_implementation() {
        let p = scenario();
        assert_eq!(
            find_implementation(&p, "B", &get_x()),
            Some(MethodRef::new("B", get_x()))
        );
        assert_eq!(find_implementation(&p, "Base", &get_x()), None);
        assert_eq!(find_implementation(&p, "Object", &get_x()), None);
    }

    #[test]
    fn test_constructors_and_private_methods_have_no_slots() {
        let p = ProgramBuilder::new()
            .class(
                ClassBuilder::new("A")
                    .method(MethodDescriptor::new("<init>", vec![], ValueType::Void), body())
                    .private_method(MethodDescriptor::new("helper", vec![], ValueType::Void), body())
                    .static_method(MethodDescriptor::new("util", vec![], ValueType::Void), body())
                    .build(),
            )
            .build()
            .unwrap();
        let vt = VtableRegistry::build(&p).unwrap();
        assert!(vt.class_table("A").unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_declaration_is_rejected() {
        let p = ProgramBuilder::new()
            .class(
                ClassBuilder::new("A")
                    .method(get_x(), body())
                    .method(get_x(), body())
                    .build(),
            )
            .build()
            .unwrap();
        assert!(matches!(
            VtableRegistry::build(&p),
            Err(CodegenError::DuplicateVtableEntry { .. })
        ));
    }
}

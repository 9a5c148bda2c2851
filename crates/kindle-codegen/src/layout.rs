//! Object Layout Builder
//!
//! Each class's structure is the object header followed by every inherited
//! instance field and then its own, so a field keeps the same element index
//! in the structure of every subclass. Viewing a subclass instance through
//! an ancestor's type therefore only ever touches a prefix of the object.

use crate::error::CodegenResult;
use kindle_model::{FieldRef, Program, ValueType};
use rustc_hash::FxHashMap;

/// Element index of the object header in every class structure
pub const HEADER_INDEX: u32 = 0;

/// One instance field and its place in the structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSlot {
    /// Declaring class
    pub class: String,
    pub name: String,
    pub ty: ValueType,
    /// Element index within the class structure
    pub index: u32,
    pub is_reference: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLayout {
    pub class: String,
    pub parent: Option<String>,
    /// Inherited fields first, then own fields
    pub fields: Vec<FieldSlot>,
    /// Position in `fields` of the first own field
    pub own_start: usize,
}

impl ObjectLayout {
    pub fn own_fields(&self) -> &[FieldSlot] {
        &self.fields[self.own_start..]
    }

    /// Own reference fields, as recorded in the class's GC field table
    pub fn own_reference_fields(&self) -> impl Iterator<Item = &FieldSlot> {
        self.own_fields().iter().filter(|f| f.is_reference)
    }

    /// Nearest field with this name, own fields shadowing inherited ones
    pub fn field(&self, name: &str) -> Option<&FieldSlot> {
        self.fields.iter().rev().find(|f| f.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.field(name).map(|f| f.index)
    }
}

#[derive(Debug, Default)]
pub struct LayoutRegistry {
    layouts: FxHashMap<String, ObjectLayout>,
}

impl LayoutRegistry {
    /// Build layouts for every concrete class; the hierarchy must already
    /// have been checked by the tag registry
    pub fn build(program: &Program) -> CodegenResult<Self> {
        let mut registry = LayoutRegistry::default();
        for class in program.classes().iter().filter(|c| !c.is_interface) {
            let mut chain = program.ancestors(&class.name);
            chain.reverse();

            let mut fields: Vec<FieldSlot> = Vec::new();
            let mut own_start = 0;
            for ancestor in chain {
                own_start = fields.len();
                for field in ancestor.instance_fields() {
                    let index = fields.len() as u32 + 1;
                    fields.push(FieldSlot {
                        class: ancestor.name.clone(),
                        name: field.name.clone(),
                        ty: field.ty.clone(),
                        index,
                        is_reference: field.ty.is_reference(),
                    });
                }
            }

            registry.layouts.insert(
                class.name.clone(),
                ObjectLayout {
                    class: class.name.clone(),
                    parent: class.parent_name().map(str::to_string),
                    fields,
                    own_start,
                },
            );
        }
        tracing::debug!(layouts = registry.layouts.len(), "object layouts built");
        Ok(registry)
    }

    pub fn layout(&self, class: &str) -> Option<&ObjectLayout> {
        self.layouts.get(class)
    }

    /// Element index of an instance field; static and unknown fields are
    /// not found
    pub fn index_of(&self, field: &FieldRef) -> Option<u32> {
        self.layout(&field.class)?.index_of(&field.name)
    }

    pub fn field(&self, field: &FieldRef) -> Option<&FieldSlot> {
        self.layout(&field.class)?.field(&field.name)
    }
}

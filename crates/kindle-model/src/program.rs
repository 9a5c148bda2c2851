//! Whole-program class set
//!
//! Classes are stored in an arena in insertion order with a name index on
//! the side. The program is immutable once handed to the backend.

use crate::class::{ClassDef, FieldDef, MethodDef};
use crate::descriptor::{FieldRef, MethodRef};
use crate::error::{ModelError, ModelResult};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Index of a class in the program arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId(pub u32);

impl ClassId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Serialized form of a program
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ProgramData {
    #[serde(default)]
    classes: Vec<ClassDef>,
    #[serde(default)]
    entry_point: Option<MethodRef>,
}

/// The reachable set of classes plus an optional entry point
#[derive(Debug, Clone, Default)]
pub struct Program {
    classes: Vec<ClassDef>,
    by_name: FxHashMap<String, ClassId>,
    entry_point: Option<MethodRef>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a program from a class list, rejecting duplicate names
    pub fn from_classes(classes: Vec<ClassDef>, entry_point: Option<MethodRef>) -> ModelResult<Self> {
        let mut program = Self::new();
        for class in classes {
            program.add_class(class)?;
        }
        program.entry_point = entry_point;
        Ok(program)
    }

    /// Parse a program from its JSON form
    pub fn from_json(text: &str) -> ModelResult<Self> {
        let data: ProgramData = serde_json::from_str(text)?;
        Self::from_classes(data.classes, data.entry_point)
    }

    pub fn to_json(&self) -> ModelResult<String> {
        let data = ProgramData {
            classes: self.classes.clone(),
            entry_point: self.entry_point.clone(),
        };
        Ok(serde_json::to_string_pretty(&data)?)
    }

    pub fn add_class(&mut self, class: ClassDef) -> ModelResult<ClassId> {
        if self.by_name.contains_key(&class.name) {
            return Err(ModelError::DuplicateClass { name: class.name });
        }
        let id = ClassId(self.classes.len() as u32);
        self.by_name.insert(class.name.clone(), id);
        self.classes.push(class);
        Ok(id)
    }

    pub fn set_entry_point(&mut self, entry: Option<MethodRef>) {
        self.entry_point = entry;
    }

    pub fn entry_point(&self) -> Option<&MethodRef> {
        self.entry_point.as_ref()
    }

    pub fn classes(&self) -> &[ClassDef] {
        &self.classes
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn id_of(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: ClassId) -> &ClassDef {
        &self.classes[id.index()]
    }

    pub fn lookup(&self, name: &str) -> Option<&ClassDef> {
        self.id_of(name).map(|id| self.get(id))
    }

    /// Classes sorted by name, the order output is emitted in
    pub fn sorted_classes(&self) -> Vec<&ClassDef> {
        let mut classes: Vec<&ClassDef> = self.classes.iter().collect();
        classes.sort_by(|a, b| a.name.cmp(&b.name));
        classes
    }

    /// The class itself followed by its parent chain, stopping at the first
    /// missing class or at a repeated name
    pub fn ancestors<'a>(&'a self, name: &str) -> Vec<&'a ClassDef> {
        let mut chain: Vec<&ClassDef> = Vec::new();
        let mut current = self.lookup(name);
        while let Some(class) = current {
            if chain.iter().any(|c| c.name == class.name) {
                break;
            }
            chain.push(class);
            current = class.parent_name().and_then(|p| self.lookup(p));
        }
        chain
    }

    /// All interfaces a class or interface implements, directly or
    /// transitively, in breadth-first order without duplicates
    pub fn all_interfaces(&self, name: &str) -> Vec<&ClassDef> {
        let mut result: Vec<&ClassDef> = Vec::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        for class in self.ancestors(name) {
            for iface in &class.interfaces {
                queue.push_back(iface);
            }
        }
        while let Some(next) = queue.pop_front() {
            let Some(iface) = self.lookup(next) else {
                continue;
            };
            if result.iter().any(|c| c.name == iface.name) {
                continue;
            }
            result.push(iface);
            for sup in &iface.interfaces {
                queue.push_back(sup);
            }
        }
        result
    }

    /// Whether `sub` is `sup` or inherits from it through parents or
    /// interfaces
    pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        if sub == sup {
            return true;
        }
        if self.ancestors(sub).iter().any(|c| c.name == sup) {
            return true;
        }
        self.all_interfaces(sub).iter().any(|c| c.name == sup)
    }

    /// Method declared directly in the referenced class
    pub fn method(&self, method: &MethodRef) -> Option<&MethodDef> {
        self.lookup(&method.class)?.method(&method.desc)
    }

    /// Field declared directly in the referenced class
    pub fn field(&self, field: &FieldRef) -> Option<&FieldDef> {
        self.lookup(&field.class)?.field(&field.name)
    }

    /// Resolve a field reference against the parent chain, returning the
    /// declaring class's name
    pub fn resolve_field(&self, field: &FieldRef) -> Option<(&str, &FieldDef)> {
        self.ancestors(&field.class)
            .into_iter()
            .find_map(|class| class.field(&field.name).map(|f| (class.name.as_str(), f)))
    }

    /// Resolve a method reference against the parent chain, then the
    /// implemented interfaces
    pub fn resolve_method(&self, method: &MethodRef) -> Option<(&ClassDef, &MethodDef)> {
        for class in self.ancestors(&method.class) {
            if let Some(found) = class.method(&method.desc) {
                return Some((class, found));
            }
        }
        for iface in self.all_interfaces(&method.class) {
            if let Some(found) = iface.method(&method.desc) {
                return Some((iface, found));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::MethodDescriptor;
    use crate::types::ValueType;

    fn class(name: &str, parent: Option<&str>) -> ClassDef {
        let mut c = ClassDef::new(name);
        c.parent = parent.map(str::to_string);
        c
    }

    #[test]
    fn test_duplicate_class_rejected() {
        let result = Program::from_classes(vec![class("A", None), class("A", None)], None);
        assert!(matches!(result, Err(ModelError::DuplicateClass { name }) if name == "A"));
    }

    #[test]
    fn test_ancestors_stop_on_cycle() {
        let program =
            Program::from_classes(vec![class("A", Some("B")), class("B", Some("A"))], None).unwrap();
        let names: Vec<&str> = program.ancestors("A").iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_subtype_through_interfaces() {
        let mut i = class("I", None);
        i.is_interface = true;
        let mut j = class("J", None);
        j.is_interface = true;
        j.interfaces.push("I".to_string());
        let mut a = class("A", Some("Object"));
        a.interfaces.push("J".to_string());
        let b = class("B", Some("A"));
        let program =
            Program::from_classes(vec![class("Object", None), i, j, a, b], None).unwrap();

        assert!(program.is_subtype("B", "I"));
        assert!(program.is_subtype("B", "Object"));
        assert!(!program.is_subtype("A", "B"));
    }

    #[test]
    fn test_resolve_inherited_method() {
        let mut base = class("Base", None);
        let desc = MethodDescriptor::new("get", vec![], ValueType::INT);
        base.methods.push(MethodDef::new(desc.clone()));
        let program = Program::from_classes(vec![base, class("Sub", Some("Base"))], None).unwrap();

        let (owner, _) = program
            .resolve_method(&MethodRef::new("Sub", desc))
            .unwrap();
        assert_eq!(owner.name, "Base");
    }
}

//! Runtime type tags
//!
//! Every concrete (non-interface) class gets a half-open range `[lower, upper)`
//! from a preorder walk of the class forest, so a class's range contains
//! exactly the tags of itself and its subclasses. An object stores the
//! `lower` bound of its class; a type test against a class is one range
//! check. Interfaces sit outside the forest and instead own the merged list
//! of ranges of every class implementing them.

use crate::error::{CodegenError, CodegenResult};
use kindle_model::{ClassDef, Program};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;

/// Half-open tag range
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagRange {
    pub lower: i32,
    pub upper: i32,
}

impl TagRange {
    pub fn new(lower: i32, upper: i32) -> Self {
        Self { lower, upper }
    }

    pub fn contains_tag(&self, tag: i32) -> bool {
        self.lower <= tag && tag < self.upper
    }

    pub fn contains(&self, other: &TagRange) -> bool {
        self.lower <= other.lower && other.upper <= self.upper
    }

    pub fn is_empty(&self) -> bool {
        self.lower >= self.upper
    }
}

impl fmt::Display for TagRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.lower, self.upper)
    }
}

/// Tag ranges for every class and interface of a program
#[derive(Debug, Default)]
pub struct TagRegistry {
    classes: FxHashMap<String, TagRange>,
    interfaces: FxHashMap<String, Vec<TagRange>>,
    tag_count: i32,
}

impl TagRegistry {
    pub fn build(program: &Program) -> CodegenResult<Self> {
        let mut children: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
        let mut roots: Vec<&str> = Vec::new();

        for class in program.classes().iter().filter(|c| !c.is_interface) {
            match class.parent_name() {
                None => roots.push(&class.name),
                Some(parent) => children.entry(parent).or_default().push(&class.name),
            }
        }
        roots.sort_unstable();
        for list in children.values_mut() {
            list.sort_unstable();
        }

        let mut registry = TagRegistry::default();
        let mut counter = 0i32;

        // (class, entered) pairs; a class is pushed again as exited once
        // all of its descendants have been numbered
        let mut stack: Vec<(&str, bool)> = roots.iter().rev().map(|&r| (r, false)).collect();
        let mut lowers: FxHashMap<&str, i32> = FxHashMap::default();
        while let Some((name, exiting)) = stack.pop() {
            if exiting {
                let lower = lowers.get(name).copied().unwrap_or(counter);
                registry
                    .classes
                    .insert(name.to_string(), TagRange::new(lower, counter));
                continue;
            }
            lowers.insert(name, counter);
            counter += 1;
            stack.push((name, true));
            if let Some(kids) = children.get(name) {
                for &child in kids.iter().rev() {
                    stack.push((child, false));
                }
            }
        }
        registry.tag_count = counter;

        for class in program.classes().iter().filter(|c| !c.is_interface) {
            if !registry.classes.contains_key(&class.name) {
                return Err(unreachable_class(program, class));
            }
        }

        let mut implementors: FxHashMap<&str, Vec<TagRange>> = FxHashMap::default();
        for class in program.classes().iter().filter(|c| !c.is_interface) {
            let range = registry.classes[&class.name];
            for iface in program.all_interfaces(&class.name) {
                implementors.entry(&iface.name).or_default().push(range);
            }
        }
        for iface in program.classes().iter().filter(|c| c.is_interface) {
            let ranges = implementors.remove(iface.name.as_str()).unwrap_or_default();
            registry
                .interfaces
                .insert(iface.name.clone(), merge_ranges(ranges));
        }

        tracing::debug!(
            classes = registry.classes.len(),
            interfaces = registry.interfaces.len(),
            tags = registry.tag_count,
            "tag registry built"
        );
        Ok(registry)
    }

    /// Range of a concrete class
    pub fn class_range(&self, name: &str) -> Option<TagRange> {
        self.classes.get(name).copied()
    }

    /// Ranges an instance's tag must fall into to be an instance of `name`
    pub fn ranges(&self, name: &str) -> Option<Vec<TagRange>> {
        if let Some(range) = self.classes.get(name) {
            return Some(vec![*range]);
        }
        self.interfaces.get(name).cloned()
    }

    /// Tag stored in instances of a concrete class
    pub fn tag_of(&self, name: &str) -> Option<i32> {
        self.class_range(name).map(|r| r.lower)
    }

    /// Whether a concrete class is a subtype of a class or interface,
    /// decided by range containment alone
    pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        let Some(tag) = self.tag_of(sub) else {
            return false;
        };
        match self.ranges(sup) {
            Some(ranges) => ranges.iter().any(|r| r.contains_tag(tag)),
            None => false,
        }
    }

    pub fn tag_count(&self) -> i32 {
        self.tag_count
    }
}

/// Sort ranges and fuse the ones that overlap or touch
fn merge_ranges(mut ranges: Vec<TagRange>) -> Vec<TagRange> {
    ranges.sort_unstable();
    let mut merged: Vec<TagRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.lower <= last.upper => {
                last.upper = last.upper.max(range.upper);
            }
            _ => merged.push(range),
        }
    }
    merged
}

fn unreachable_class(program: &Program, class: &ClassDef) -> CodegenError {
    let message = match class.parent_name().map(|p| (p, program.lookup(p))) {
        Some((parent, None)) => format!("parent {} is missing", parent),
        Some((parent, Some(p))) if p.is_interface => format!("parent {} is an interface", parent),
        _ => {
            let mut seen: FxHashSet<&str> = FxHashSet::default();
            let chain: Vec<&str> = program
                .ancestors(&class.name)
                .iter()
                .map(|c| c.name.as_str())
                .take_while(|n| seen.insert(n))
                .collect();
            format!("inheritance cycle through {}", chain.join(" -> "))
        }
    };
    CodegenError::InconsistentHierarchy {
        class: class.name.clone(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindle_model::{ClassBuilder, ProgramBuilder};

    fn program(classes: Vec<ClassDef>) -> Program {
        let mut builder = ProgramBuilder::new();
        for class in classes {
            builder = builder.class(class);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_preorder_ranges() {
        let p = program(vec![
            ClassBuilder::new("Object").build(),
            ClassBuilder::new("B").extends("Object").build(),
            ClassBuilder::new("A").extends("Object").build(),
            ClassBuilder::new("A2").extends("A").build(),
        ]);
        let tags = TagRegistry::build(&p).unwrap();

        assert_eq!(tags.class_range("Object"), Some(TagRange::new(0, 4)));
        assert_eq!(tags.class_range("A"), Some(TagRange::new(1, 3)));
        assert_eq!(tags.class_range("A2"), Some(TagRange::new(2, 3)));
        assert_eq!(tags.class_range("B"), Some(TagRange::new(3, 4)));
        assert_eq!(tags.tag_count(), 4);
    }

    #[test]
    fn test_interface_ranges_are_merged() {
        let p = program(vec![
            ClassBuilder::new("Object").build(),
            ClassBuilder::interface("I").build(),
            ClassBuilder::new("A").extends("Object").implements("I").build(),
            ClassBuilder::new("A2").extends("A").build(),
            ClassBuilder::new("B").extends("Object").implements("I").build(),
            ClassBuilder::new("C").extends("Object").build(),
        ]);
        let tags = TagRegistry::build(&p).unwrap();

        assert_eq!(tags.ranges("I"), Some(vec![TagRange::new(1, 4)]));
        assert!(tags.is_subtype("A2", "I"));
        assert!(!tags.is_subtype("C", "I"));
    }

    #[test]
    fn test_missing_parent_is_fatal() {
        let p = program(vec![ClassBuilder::new("A").extends("Ghost").build()]);
        let err = TagRegistry::build(&p).unwrap_err();
        assert!(matches!(err, CodegenError::InconsistentHierarchy { class, .. } if class == "A"));
    }

    #[test]
    fn test_interface_parent_is_fatal() {
        let p = program(vec![
            ClassBuilder::interface("I").build(),
            ClassBuilder::new("A").extends("I").build(),
        ]);
        assert!(matches!(
            TagRegistry::build(&p),
            Err(CodegenError::InconsistentHierarchy { .. })
        ));
    }

    #[test]
    fn test_cycle_is_fatal() {
        let p = program(vec![
            ClassBuilder::new("A").extends("B").build(),
            ClassBuilder::new("B").extends("A").build(),
        ]);
        let err = TagRegistry::build(&p).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_merge_ranges() {
        let merged = merge_ranges(vec![
            TagRange::new(5, 7),
            TagRange::new(1, 3),
            TagRange::new(3, 4),
            TagRange::new(6, 9),
        ]);
        assert_eq!(merged, vec![TagRange::new(1, 4), TagRange::new(5, 9)]);
    }
}

//! Method and field references
//!
//! A `MethodDescriptor` identifies a method within a class (name plus
//! signature); `MethodRef` and `FieldRef` qualify members with the class
//! they are referenced through.

use crate::types::ValueType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of instance constructors
pub const CONSTRUCTOR_NAME: &str = "<init>";

/// Name of static class initializers
pub const CLASS_INITIALIZER_NAME: &str = "<clinit>";

/// Method name plus parameter and return types
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ValueType>,
    #[serde(default = "void_type")]
    pub ret: ValueType,
}

fn void_type() -> ValueType {
    ValueType::Void
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>, params: Vec<ValueType>, ret: ValueType) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
        }
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR_NAME
    }

    pub fn is_class_initializer(&self) -> bool {
        self.name == CLASS_INITIALIZER_NAME
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, "): {}", self.ret)
    }
}

/// A method referenced through a class
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub class: String,
    #[serde(flatten)]
    pub desc: MethodDescriptor,
}

impl MethodRef {
    pub fn new(class: impl Into<String>, desc: MethodDescriptor) -> Self {
        Self {
            class: class.into(),
            desc,
        }
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    /// The same descriptor referenced through another class
    pub fn with_class(&self, class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            desc: self.desc.clone(),
        }
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.desc)
    }
}

/// A field referenced through a class
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub class: String,
    pub name: String,
}

impl FieldRef {
    pub fn new(class: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_display() {
        let desc = MethodDescriptor::new("get", vec![ValueType::INT], ValueType::object("A"));
        assert_eq!(desc.to_string(), "get(int): A");
        let method = MethodRef::new("B", desc);
        assert_eq!(method.to_string(), "B.get(int): A");
    }

    #[test]
    fn test_special_names() {
        assert!(MethodDescriptor::new("<init>", vec![], ValueType::Void).is_constructor());
        assert!(MethodDescriptor::new("<clinit>", vec![], ValueType::Void).is_class_initializer());
    }
}

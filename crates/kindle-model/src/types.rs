//! Value Types and Variable Kinds
//!
//! `ValueType` is the declared type of fields, parameters and return values.
//! `VariableKind` is the coarse runtime representation the type inferer
//! assigns to every SSA variable; the backend only ever looks at kinds when
//! it needs to know whether a value is a GC reference.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Primitive value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveType {
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
}

impl PrimitiveType {
    /// Source-level name of the primitive (`int`, `boolean`, ...)
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::Boolean => "boolean",
            PrimitiveType::Byte => "byte",
            PrimitiveType::Short => "short",
            PrimitiveType::Char => "char",
            PrimitiveType::Int => "int",
            PrimitiveType::Long => "long",
            PrimitiveType::Float => "float",
            PrimitiveType::Double => "double",
        }
    }

    /// The array kind of a one-dimensional array of this primitive
    pub fn array_kind(self) -> ArrayKind {
        match self {
            PrimitiveType::Boolean | PrimitiveType::Byte => ArrayKind::Byte,
            PrimitiveType::Short => ArrayKind::Short,
            PrimitiveType::Char => ArrayKind::Char,
            PrimitiveType::Int => ArrayKind::Int,
            PrimitiveType::Long => ArrayKind::Long,
            PrimitiveType::Float => ArrayKind::Float,
            PrimitiveType::Double => ArrayKind::Double,
        }
    }
}

/// Declared type of a field, parameter or return value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Void,
    Primitive(PrimitiveType),
    Object(String),
    Array(Box<ValueType>),
}

impl ValueType {
    pub fn object(class_name: impl Into<String>) -> Self {
        ValueType::Object(class_name.into())
    }

    pub fn array_of(item: ValueType) -> Self {
        ValueType::Array(Box::new(item))
    }

    pub const INT: ValueType = ValueType::Primitive(PrimitiveType::Int);
    pub const LONG: ValueType = ValueType::Primitive(PrimitiveType::Long);
    pub const FLOAT: ValueType = ValueType::Primitive(PrimitiveType::Float);
    pub const DOUBLE: ValueType = ValueType::Primitive(PrimitiveType::Double);
    pub const BOOLEAN: ValueType = ValueType::Primitive(PrimitiveType::Boolean);
    pub const CHAR: ValueType = ValueType::Primitive(PrimitiveType::Char);

    /// Whether values of this type are heap references the GC must trace
    pub fn is_reference(&self) -> bool {
        matches!(self, ValueType::Object(_) | ValueType::Array(_))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, ValueType::Void)
    }

    /// Variable kind a value of this type has once loaded into an SSA variable
    pub fn kind(&self) -> Option<VariableKind> {
        match self {
            ValueType::Void => None,
            ValueType::Primitive(p) => Some(match p {
                PrimitiveType::Long => VariableKind::Long,
                PrimitiveType::Float => VariableKind::Float,
                PrimitiveType::Double => VariableKind::Double,
                _ => VariableKind::Int,
            }),
            ValueType::Object(_) => Some(VariableKind::Object),
            ValueType::Array(item) => Some(VariableKind::Array(item.array_element_kind())),
        }
    }

    /// Array kind for an array whose items have this type
    pub fn array_element_kind(&self) -> ArrayKind {
        match self {
            ValueType::Primitive(p) => p.array_kind(),
            _ => ArrayKind::Object,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Void => write!(f, "void"),
            ValueType::Primitive(p) => write!(f, "{}", p.name()),
            ValueType::Object(name) => write!(f, "{}", name),
            ValueType::Array(item) => write!(f, "{}[]", item),
        }
    }
}

/// Element representation of an array value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayKind {
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
    Object,
}

impl ArrayKind {
    pub fn name(self) -> &'static str {
        match self {
            ArrayKind::Byte => "byte",
            ArrayKind::Short => "short",
            ArrayKind::Char => "char",
            ArrayKind::Int => "int",
            ArrayKind::Long => "long",
            ArrayKind::Float => "float",
            ArrayKind::Double => "double",
            ArrayKind::Object => "object",
        }
    }

    /// Kind of an element once loaded into a variable
    pub fn element_kind(self) -> VariableKind {
        match self {
            ArrayKind::Byte | ArrayKind::Short | ArrayKind::Char | ArrayKind::Int => VariableKind::Int,
            ArrayKind::Long => VariableKind::Long,
            ArrayKind::Float => VariableKind::Float,
            ArrayKind::Double => VariableKind::Double,
            ArrayKind::Object => VariableKind::Object,
        }
    }

    pub const ALL: [ArrayKind; 8] = [
        ArrayKind::Byte,
        ArrayKind::Short,
        ArrayKind::Char,
        ArrayKind::Int,
        ArrayKind::Long,
        ArrayKind::Float,
        ArrayKind::Double,
        ArrayKind::Object,
    ];
}

/// Runtime representation of an SSA variable, as computed by the type inferer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    Int,
    Long,
    Float,
    Double,
    Object,
    Array(ArrayKind),
}

impl VariableKind {
    /// Whether the variable holds a GC-visible reference
    pub fn is_reference(self) -> bool {
        matches!(self, VariableKind::Object | VariableKind::Array(_))
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableKind::Int => write!(f, "int"),
            VariableKind::Long => write!(f, "long"),
            VariableKind::Float => write!(f, "float"),
            VariableKind::Double => write!(f, "double"),
            VariableKind::Object => write!(f, "object"),
            VariableKind::Array(kind) => write!(f, "{}[]", kind.name()),
        }
    }
}

/// Operand type of arithmetic instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericType {
    Int,
    Long,
    Float,
    Double,
}

impl NumericType {
    pub fn is_float(self) -> bool {
        matches!(self, NumericType::Float | NumericType::Double)
    }

    pub fn kind(self) -> VariableKind {
        match self {
            NumericType::Int => VariableKind::Int,
            NumericType::Long => VariableKind::Long,
            NumericType::Float => VariableKind::Float,
            NumericType::Double => VariableKind::Double,
        }
    }
}

/// Sub-int integer types reachable through narrowing casts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegerSubtype {
    Byte,
    Short,
    Char,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_types() {
        assert!(ValueType::object("A").is_reference());
        assert!(ValueType::array_of(ValueType::INT).is_reference());
        assert!(!ValueType::INT.is_reference());
        assert!(!ValueType::Void.is_reference());
    }

    #[test]
    fn test_kind_of_value_types() {
        assert_eq!(ValueType::BOOLEAN.kind(), Some(VariableKind::Int));
        assert_eq!(ValueType::LONG.kind(), Some(VariableKind::Long));
        assert_eq!(
            ValueType::array_of(ValueType::CHAR).kind(),
            Some(VariableKind::Array(ArrayKind::Char))
        );
        assert_eq!(
            ValueType::array_of(ValueType::array_of(ValueType::INT)).kind(),
            Some(VariableKind::Array(ArrayKind::Object))
        );
        assert_eq!(ValueType::Void.kind(), None);
    }

    #[test]
    fn test_display() {
        let ty = ValueType::array_of(ValueType::object("java.lang.String"));
        assert_eq!(ty.to_string(), "java.lang.String[]");
    }
}

//! LLVM IR types
//!
//! Only the handful of types the backend produces. Pointers are opaque, so
//! every reference is a plain `ptr` and structure types are named only where
//! address arithmetic needs them.

use kindle_model::{ArrayKind, PrimitiveType, ValueType, VariableKind};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IrType {
    Void,
    I1,
    I8,
    I16,
    I32,
    I64,
    Float,
    Double,
    Ptr,
    /// Named structure type, printed as `%name`
    Named(String),
    Array(u64, Box<IrType>),
    Struct(Vec<IrType>),
}

impl IrType {
    pub fn named(name: impl Into<String>) -> Self {
        IrType::Named(name.into())
    }

    pub fn array(len: u64, item: IrType) -> Self {
        IrType::Array(len, Box::new(item))
    }

    /// Register type of an SSA variable
    pub fn of_kind(kind: VariableKind) -> Self {
        match kind {
            VariableKind::Int => IrType::I32,
            VariableKind::Long => IrType::I64,
            VariableKind::Float => IrType::Float,
            VariableKind::Double => IrType::Double,
            VariableKind::Object | VariableKind::Array(_) => IrType::Ptr,
        }
    }

    /// Type used for parameters and return values; sub-int primitives are
    /// widened to `i32`
    pub fn of_value(ty: &ValueType) -> Self {
        match ty.kind() {
            Some(kind) => Self::of_kind(kind),
            None => IrType::Void,
        }
    }

    /// Type a field of this value type occupies in memory
    pub fn storage(ty: &ValueType) -> Self {
        match ty {
            ValueType::Void => IrType::Void,
            ValueType::Primitive(p) => match p {
                PrimitiveType::Boolean | PrimitiveType::Byte => IrType::I8,
                PrimitiveType::Short | PrimitiveType::Char => IrType::I16,
                PrimitiveType::Int => IrType::I32,
                PrimitiveType::Long => IrType::I64,
                PrimitiveType::Float => IrType::Float,
                PrimitiveType::Double => IrType::Double,
            },
            ValueType::Object(_) | ValueType::Array(_) => IrType::Ptr,
        }
    }

    /// Type of one element of an array of this kind
    pub fn element(kind: ArrayKind) -> Self {
        match kind {
            ArrayKind::Byte => IrType::I8,
            ArrayKind::Short | ArrayKind::Char => IrType::I16,
            ArrayKind::Int => IrType::I32,
            ArrayKind::Long => IrType::I64,
            ArrayKind::Float => IrType::Float,
            ArrayKind::Double => IrType::Double,
            ArrayKind::Object => IrType::Ptr,
        }
    }

    /// Size in bytes of scalar types on a 64-bit target
    pub fn scalar_size(&self) -> Option<u32> {
        match self {
            IrType::I1 | IrType::I8 => Some(1),
            IrType::I16 => Some(2),
            IrType::I32 | IrType::Float => Some(4),
            IrType::I64 | IrType::Double | IrType::Ptr => Some(8),
            _ => None,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, IrType::Float | IrType::Double)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            IrType::I1 | IrType::I8 | IrType::I16 | IrType::I32 | IrType::I64
        )
    }

    /// Width of integer types in bits
    pub fn bits(&self) -> Option<u32> {
        match self {
            IrType::I1 => Some(1),
            IrType::I8 => Some(8),
            IrType::I16 => Some(16),
            IrType::I32 | IrType::Float => Some(32),
            IrType::I64 | IrType::Double => Some(64),
            _ => None,
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Void => write!(f, "void"),
            IrType::I1 => write!(f, "i1"),
            IrType::I8 => write!(f, "i8"),
            IrType::I16 => write!(f, "i16"),
            IrType::I32 => write!(f, "i32"),
            IrType::I64 => write!(f, "i64"),
            IrType::Float => write!(f, "float"),
            IrType::Double => write!(f, "double"),
            IrType::Ptr => write!(f, "ptr"),
            IrType::Named(name) => write!(f, "%{}", name),
            IrType::Array(len, item) => write!(f, "[{} x {}]", len, item),
            IrType::Struct(fields) => {
                write!(f, "{{ ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                write!(f, " }}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(IrType::named("rt.Object").to_string(), "%rt.Object");
        assert_eq!(IrType::array(3, IrType::I16).to_string(), "[3 x i16]");
        assert_eq!(
            IrType::Struct(vec![IrType::named("rt.Array"), IrType::array(2, IrType::I16)]).to_string(),
            "{ %rt.Array, [2 x i16] }"
        );
    }

    #[test]
    fn test_register_and_storage_types() {
        assert_eq!(IrType::of_value(&ValueType::CHAR), IrType::I32);
        assert_eq!(IrType::storage(&ValueType::CHAR), IrType::I16);
        assert_eq!(IrType::of_value(&ValueType::Void), IrType::Void);
        assert_eq!(IrType::of_kind(VariableKind::Array(ArrayKind::Int)), IrType::Ptr);
    }
}

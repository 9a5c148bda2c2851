//! IR operands

use super::types::IrType;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Function-local name, printed as `%name`
    Local(String),
    /// Global symbol, printed as `@name`
    Global(String),
    Int(i64),
    /// Floating constant, printed as the hexadecimal `double` bit pattern
    Float(f64),
    Bool(bool),
    Null,
    Zero,
    Undef,
    /// Constant expression, printed verbatim
    Const(String),
}

impl Value {
    pub fn local(name: impl Into<String>) -> Self {
        Value::Local(name.into())
    }

    pub fn global(name: impl Into<String>) -> Self {
        Value::Global(name.into())
    }

    pub fn constant(text: impl Into<String>) -> Self {
        Value::Const(text.into())
    }

    pub fn typed(self, ty: IrType) -> Operand {
        Operand { ty, value: self }
    }

    /// Zero value of a type
    pub fn zero_of(ty: &IrType) -> Self {
        match ty {
            IrType::Ptr => Value::Null,
            IrType::Float | IrType::Double => Value::Float(0.0),
            IrType::I1 => Value::Bool(false),
            t if t.is_integer() => Value::Int(0),
            _ => Value::Zero,
        }
    }
}

/// LLVM spells floating constants of either width as the bits of the
/// equivalent `double`
pub fn float_literal(value: f64) -> String {
    format!("0x{:016X}", value.to_bits())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Local(name) => write!(f, "%{}", name),
            Value::Global(name) => write!(f, "@{}", name),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", float_literal(*v)),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Null => write!(f, "null"),
            Value::Zero => write!(f, "zeroinitializer"),
            Value::Undef => write!(f, "undef"),
            Value::Const(text) => write!(f, "{}", text),
        }
    }
}

/// A value together with its type, printed as `ty value`
#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    pub ty: IrType,
    pub value: Value,
}

impl Operand {
    pub fn new(ty: IrType, value: Value) -> Self {
        Self { ty, value }
    }

    pub fn i32(value: i32) -> Self {
        Self::new(IrType::I32, Value::Int(i64::from(value)))
    }

    pub fn ptr(value: Value) -> Self {
        Self::new(IrType::Ptr, value)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.ty, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_literal() {
        assert_eq!(float_literal(1.0), "0x3FF0000000000000");
        assert_eq!(float_literal(0.5f32 as f64), "0x3FE0000000000000");
    }

    #[test]
    fn test_operand_display() {
        assert_eq!(Operand::i32(-4).to_string(), "i32 -4");
        assert_eq!(Operand::ptr(Value::global("vtable.A")).to_string(), "ptr @vtable.A");
        assert_eq!(Value::zero_of(&IrType::Ptr).to_string(), "null");
    }
}

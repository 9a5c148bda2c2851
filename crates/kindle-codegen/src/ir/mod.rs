//! Textual LLVM IR construction
//!
//! Typed values and operands, structured instructions, and a function
//! builder that renders to LLVM assembly.

pub mod builder;
pub mod types;
pub mod value;

pub use builder::{BinOp, CastOp, FunctionBuilder, Instr, IntPredicate, PhiSource, Term};
pub use types::IrType;
pub use value::{float_literal, Operand, Value};

//! Kindle Model - Whole-Program Input for the Native Backend
//!
//! This crate describes the resolved, type-inferred program the backend
//! consumes: classes with their fields and methods, and SSA method bodies
//! whose variables carry runtime kinds. Programs are built with the
//! builder API or loaded from JSON, then checked by `validate_program`.

pub mod body;
pub mod builder;
pub mod class;
pub mod descriptor;
pub mod error;
pub mod program;
pub mod types;
pub mod validate;

pub use body::{
    BasicBlock, BinaryBranchCondition, BinaryOp, BlockId, Body, BranchCondition, CastDirection,
    Incoming, Instruction, InvocationKind, Phi, Terminator, TryCatch, Var,
};
pub use builder::{method_body, static_body, BodyBuilder, ClassBuilder, ProgramBuilder};
pub use class::{AccessLevel, ClassDef, Constant, FieldDef, MethodDef};
pub use descriptor::{FieldRef, MethodDescriptor, MethodRef, CLASS_INITIALIZER_NAME, CONSTRUCTOR_NAME};
pub use error::{ModelError, ModelResult};
pub use program::{ClassId, Program};
pub use types::{ArrayKind, IntegerSubtype, NumericType, PrimitiveType, ValueType, VariableKind};
pub use validate::{validate_body, validate_program};

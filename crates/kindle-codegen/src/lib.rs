//! Kindle Codegen - Native Backend
//!
//! Lowers a whole, type-inferred `kindle_model::Program` into one textual
//! LLVM module:
//! - **Tags**: half-open type-tag ranges for constant-time type tests
//! - **Virtual tables**: per-class slots plus one shared interface table
//! - **Layouts**: prefix-compatible object structures
//! - **Liveness**: live references across every call site, spilled into a
//!   shadow-stack frame the collector scans
//! - **Lowering**: SSA instructions to LLVM IR with exception dispatch
//!
//! # Example
//!
//! ```rust,ignore
//! use kindle_codegen::{compile_to_string, CodegenConfig};
//! use kindle_model::Program;
//!
//! let program = Program::from_json(&std::fs::read_to_string("app.json")?)?;
//! let ir = compile_to_string(&program, CodegenConfig::default())?;
//! ```

#![warn(rust_2018_idioms)]

// ============================================================================
// Modules
// ============================================================================

pub mod config;
pub mod emit;
pub mod error;
pub mod ir;
pub mod layout;
pub mod liveness;
pub mod lower;
pub mod mangle;
pub mod tags;
pub mod vtable;

pub use config::CodegenConfig;
pub use error::{CodegenError, CodegenResult};
pub use layout::{FieldSlot, LayoutRegistry, ObjectLayout};
pub use liveness::{analyze, CallSiteLiveness, LivenessInfo};
pub use tags::{TagRange, TagRegistry};
pub use vtable::{find_implementation, VirtualTable, VirtualTableEntry, VtableRegistry, VtableSlot};

use kindle_model::{validate_program, Program};
use std::io::Write;

// ============================================================================
// Backend
// ============================================================================

/// A validated program together with the registries every emission phase
/// reads. Built once; emission never mutates it.
#[derive(Debug)]
pub struct Backend<'p> {
    program: &'p Program,
    config: CodegenConfig,
    tags: TagRegistry,
    vtables: VtableRegistry,
    layouts: LayoutRegistry,
}

impl<'p> Backend<'p> {
    pub fn new(program: &'p Program, config: CodegenConfig) -> CodegenResult<Self> {
        let span = tracing::info_span!("registries", classes = program.class_count());
        let _guard = span.enter();

        validate_program(program)?;
        let tags = TagRegistry::build(program)?;
        let vtables = VtableRegistry::build(program)?;
        let layouts = LayoutRegistry::build(program)?;
        Ok(Self {
            program,
            config,
            tags,
            vtables,
            layouts,
        })
    }

    pub fn program(&self) -> &'p Program {
        self.program
    }

    pub fn config(&self) -> &CodegenConfig {
        &self.config
    }

    pub fn tags(&self) -> &TagRegistry {
        &self.tags
    }

    pub fn vtables(&self) -> &VtableRegistry {
        &self.vtables
    }

    pub fn layouts(&self) -> &LayoutRegistry {
        &self.layouts
    }

    /// Render the whole module. Nothing is written unless every phase
    /// succeeds.
    pub fn emit_to_string(&self) -> CodegenResult<String> {
        emit::ModuleEmitter::new(self).emit()
    }

    pub fn emit<W: Write>(&self, out: &mut W) -> CodegenResult<()> {
        let text = self.emit_to_string()?;
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    }
}

/// Compile a program into an LLVM module written to `out`
pub fn compile<W: Write>(program: &Program, config: CodegenConfig, out: &mut W) -> CodegenResult<()> {
    Backend::new(program, config)?.emit(out)
}

pub fn compile_to_string(program: &Program, config: CodegenConfig) -> CodegenResult<String> {
    Backend::new(program, config)?.emit_to_string()
}

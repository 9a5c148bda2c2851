//! Module Emitter
//!
//! Assembles the final LLVM module in a fixed order, classes sorted by name
//! and members in declaration order, so equal programs always produce
//! byte-identical text.

pub mod classes;
pub mod metadata;
pub mod runtime;
pub mod strings;

use crate::error::CodegenResult;
use crate::lower::{render_method, ModuleState};
use crate::Backend;
use kindle_model::ClassDef;

pub struct ModuleEmitter<'a, 'p> {
    backend: &'a Backend<'p>,
    classes: Vec<&'p ClassDef>,
    state: ModuleState,
    out: String,
}

impl<'a, 'p> ModuleEmitter<'a, 'p> {
    pub fn new(backend: &'a Backend<'p>) -> Self {
        Self {
            backend,
            classes: backend.program().sorted_classes(),
            state: ModuleState::new(),
            out: String::new(),
        }
    }

    pub fn emit(mut self) -> CodegenResult<String> {
        let backend = self.backend;
        let span = tracing::info_span!("emit", module = %backend.config().module_name);
        let _guard = span.enter();

        runtime::render_header(&mut self.out, backend.config())?;
        self.out.push_str(runtime::PROLOGUE);
        self.out.push('\n');

        metadata::render_itable_type(&mut self.out, backend);
        for class in &self.classes {
            classes::render_types(&mut self.out, backend, class)?;
        }
        self.out.push('\n');

        for class in &self.classes {
            classes::render_static_fields(&mut self.out, class, &mut self.state.strings)?;
        }
        self.out.push('\n');

        self.emit_methods()?;
        self.emit_initializers();

        for class in &self.classes {
            metadata::render_class_metadata(&mut self.out, backend, class)?;
        }
        metadata::render_array_classes(&mut self.out, backend)?;
        self.out.push('\n');

        for class in &self.classes {
            metadata::render_field_table(&mut self.out, backend, class)?;
        }
        metadata::render_stack_roots(&mut self.out, backend)?;
        self.out.push('\n');

        if let Some(entry) = backend.program().entry_point() {
            runtime::render_main(&mut self.out, backend.program(), entry)?;
            self.out.push('\n');
        }

        let config = backend.config();
        self.state.strings.render(
            &mut self.out,
            backend.layouts(),
            &config.string_class,
            &config.string_chars_field,
        )?;
        self.out.push('\n');
        self.state.call_sites.render(&mut self.out)?;
        self.out.push('\n');
        self.out.push_str(runtime::EPILOGUE);

        tracing::debug!(
            classes = self.classes.len(),
            strings = self.state.strings.len(),
            call_sites = self.state.call_sites.len(),
            bytes = self.out.len(),
            "module emitted"
        );
        Ok(self.out)
    }

    fn emit_methods(&mut self) -> CodegenResult<()> {
        let backend = self.backend;
        for &class in &self.classes {
            let span = tracing::info_span!("class", name = %class.name);
            let _guard = span.enter();
            for method in &class.methods {
                let before = self.out.len();
                render_method(&mut self.out, backend, &mut self.state, class, method)?;
                if self.out.len() > before {
                    self.out.push('\n');
                }
            }
        }
        Ok(())
    }

    fn emit_initializers(&mut self) {
        let backend = self.backend;
        for class in &self.classes {
            if classes::needs_initialization(backend.program(), &class.name) {
                classes::render_initializer(&mut self.out, backend, class);
                self.out.push('\n');
            }
        }
    }
}

//! Code generation errors

use kindle_model::ModelError;
use thiserror::Error;

pub type CodegenResult<T> = Result<T, CodegenError>;

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("Class not found: {name}")]
    MissingClass { name: String },

    #[error("Method not found: {method}")]
    MissingMethod { method: String },

    #[error("Field not found: {field}")]
    MissingField { field: String },

    #[error("Inconsistent class hierarchy at {class}: {message}")]
    InconsistentHierarchy { class: String, message: String },

    #[error("Method {method} already has a virtual table entry")]
    DuplicateVtableEntry { method: String },

    #[error("Kind mismatch in {method}: {message}")]
    KindMismatch { method: String, message: String },

    #[error("Malformed body of {method}: {message}")]
    MalformedBody { method: String, message: String },

    #[error("Unsupported feature: {feature}")]
    Unsupported { feature: String },

    #[error("Invalid program: {0}")]
    Model(#[from] ModelError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Formatting failed: {0}")]
    Format(#[from] std::fmt::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodegenError {
    pub fn missing_class(name: impl Into<String>) -> Self {
        CodegenError::MissingClass { name: name.into() }
    }

    pub fn unsupported(feature: impl Into<String>) -> Self {
        CodegenError::Unsupported {
            feature: feature.into(),
        }
    }
}

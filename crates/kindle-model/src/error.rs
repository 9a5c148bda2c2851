//! Model errors

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Duplicate class: {name}")]
    DuplicateClass { name: String },

    #[error("Unknown block {block} referenced in {method}")]
    UnknownBlock { method: String, block: u32 },

    #[error("Unknown variable v{var} referenced in {method}")]
    UnknownVariable { method: String, var: u32 },

    #[error("Block b{block} of {method} has no terminator")]
    MissingTerminator { method: String, block: u32 },

    #[error("Malformed body of {method}: {message}")]
    MalformedBody { method: String, message: String },
}

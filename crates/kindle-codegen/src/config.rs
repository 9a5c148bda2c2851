//! Backend configuration
//!
//! Loaded from TOML or built in code. Every key is optional; unknown keys
//! are rejected so typos do not silently fall back to defaults.

use crate::error::CodegenResult;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodegenConfig {
    /// Value of the module's `source_filename`
    pub module_name: String,
    pub target_triple: Option<String>,
    pub data_layout: Option<String>,
    /// Class every hierarchy is rooted at; arrays are instances of it
    pub root_class: String,
    /// Class string literals are instances of
    pub string_class: String,
    /// Field of `string_class` holding the `char[]` contents
    pub string_chars_field: String,
    /// Emit descriptive `;` comments into the output
    pub emit_comments: bool,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            module_name: "kindle".to_string(),
            target_triple: None,
            data_layout: None,
            root_class: "java.lang.Object".to_string(),
            string_class: "java.lang.String".to_string(),
            string_chars_field: "characters".to_string(),
            emit_comments: false,
        }
    }
}

impl CodegenConfig {
    pub fn from_toml(text: &str) -> CodegenResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> CodegenResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn with_module_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = name.into();
        self
    }

    pub fn with_target_triple(mut self, triple: impl Into<String>) -> Self {
        self.target_triple = Some(triple.into());
        self
    }

    pub fn with_comments(mut self, emit: bool) -> Self {
        self.emit_comments = emit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodegenError;

    #[test]
    fn test_defaults() {
        let config = CodegenConfig::from_toml("").unwrap();
        assert_eq!(config, CodegenConfig::default());
        assert_eq!(config.root_class, "java.lang.Object");
        assert_eq!(config.string_chars_field, "characters");
    }

    #[test]
    fn test_partial_override() {
        let config = CodegenConfig::from_toml(
            r#"
            module_name = "demo"
            target_triple = "x86_64-unknown-linux-gnu"
            emit_comments = true
            "#,
        )
        .unwrap();
        assert_eq!(config.module_name, "demo");
        assert_eq!(config.target_triple.as_deref(), Some("x86_64-unknown-linux-gnu"));
        assert!(config.emit_comments);
        assert_eq!(config.string_class, "java.lang.String");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = CodegenConfig::from_toml("modul_name = \"typo\"");
        assert!(matches!(result, Err(CodegenError::Config(_))));
    }
}

//! Class, field and method definitions

use crate::body::Body;
use crate::descriptor::MethodDescriptor;
use crate::types::ValueType;
use serde::{Deserialize, Serialize};

/// Member visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    #[default]
    Public,
    Protected,
    Package,
    Private,
}

/// Compile-time constant used as a static field initializer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Constant {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
}

/// A field declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(default)]
    pub is_static: bool,
    pub ty: ValueType,
    #[serde(default)]
    pub initial: Option<Constant>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            is_static: false,
            ty,
            initial: None,
        }
    }

    pub fn new_static(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            is_static: true,
            ..Self::new(name, ty)
        }
    }
}

/// A method declaration, with a body unless abstract or native
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    #[serde(flatten)]
    pub desc: MethodDescriptor,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_native: bool,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub access: AccessLevel,
    #[serde(default)]
    pub body: Option<Body>,
}

impl MethodDef {
    pub fn new(desc: MethodDescriptor) -> Self {
        Self {
            desc,
            is_static: false,
            is_native: false,
            is_abstract: false,
            access: AccessLevel::Public,
            body: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn is_private(&self) -> bool {
        self.access == AccessLevel::Private
    }

    /// Whether calls to this method may be dispatched virtually
    pub fn is_virtual(&self) -> bool {
        !self.is_static
            && !self.is_private()
            && !self.desc.is_constructor()
            && !self.desc.is_class_initializer()
    }

    /// Number of incoming values including the implicit `this`
    pub fn arity(&self) -> usize {
        self.desc.params.len() + usize::from(!self.is_static)
    }
}

/// A class or interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub is_interface: bool,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub methods: Vec<MethodDef>,
}

impl ClassDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            interfaces: Vec::new(),
            is_interface: false,
            is_abstract: false,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// A class with no parent, or one naming itself, starts a hierarchy
    pub fn is_root(&self) -> bool {
        match &self.parent {
            None => true,
            Some(parent) => parent == &self.name,
        }
    }

    /// Parent name, ignoring self-references
    pub fn parent_name(&self) -> Option<&str> {
        match &self.parent {
            Some(parent) if parent != &self.name => Some(parent.as_str()),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn method(&self, desc: &MethodDescriptor) -> Option<&MethodDef> {
        self.methods.iter().find(|m| &m.desc == desc)
    }

    pub fn instance_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| !f.is_static)
    }

    pub fn static_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.is_static)
    }

    pub fn class_initializer(&self) -> Option<&MethodDef> {
        self.methods
            .iter()
            .find(|m| m.is_static && m.desc.is_class_initializer())
    }
}

//! Struct descriptors: the immutable, schema-derived description of a record.

use crate::error::SchemaError;
use crate::ttype::TType;
use crate::value::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Declared type of a field, list element, set element or map key/value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Bool,
    Byte,
    I16,
    I32,
    I64,
    Double,
    String,
    Binary,
    Struct(Arc<StructDescriptor>),
    List(Box<FieldType>),
    Set(Box<FieldType>),
    Map(Box<FieldType>, Box<FieldType>),
}

impl FieldType {
    pub fn list(elem: FieldType) -> Self {
        FieldType::List(Box::new(elem))
    }

    pub fn set(elem: FieldType) -> Self {
        FieldType::Set(Box::new(elem))
    }

    pub fn map(key: FieldType, value: FieldType) -> Self {
        FieldType::Map(Box::new(key), Box::new(value))
    }

    pub fn structure(descriptor: impl Into<Arc<StructDescriptor>>) -> Self {
        FieldType::Struct(descriptor.into())
    }

    /// Returns the wire tag values of this type are written with.
    pub fn ttype(&self) -> TType {
        match self {
            FieldType::Bool => TType::Bool,
            FieldType::Byte => TType::Byte,
            FieldType::I16 => TType::I16,
            FieldType::I32 => TType::I32,
            FieldType::I64 => TType::I64,
            FieldType::Double => TType::Double,
            FieldType::String | FieldType::Binary => TType::String,
            FieldType::Struct(_) => TType::Struct,
            FieldType::List(_) => TType::List,
            FieldType::Set(_) => TType::Set,
            FieldType::Map(_, _) => TType::Map,
        }
    }
}

/// Field requiredness as declared in the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Requiredness {
    /// Must be present on both write and read.
    Required,
    /// Written only when present; absent is a valid state.
    Optional,
    /// Written when present; usually populated from the schema default.
    #[default]
    Default,
}

/// One field of a struct.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub id: i16,
    pub name: String,
    pub ty: FieldType,
    pub requiredness: Requiredness,
    pub default: Option<Value>,
}

impl FieldDescriptor {
    pub fn new(id: i16, name: impl Into<String>, ty: FieldType, requiredness: Requiredness) -> Self {
        Self {
            id,
            name: name.into(),
            ty,
            requiredness,
            default: None,
        }
    }

    pub fn required(id: i16, name: impl Into<String>, ty: FieldType) -> Self {
        Self::new(id, name, ty, Requiredness::Required)
    }

    pub fn optional(id: i16, name: impl Into<String>, ty: FieldType) -> Self {
        Self::new(id, name, ty, Requiredness::Optional)
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn is_required(&self) -> bool {
        self.requiredness == Requiredness::Required
    }
}

/// What kind of record a descriptor describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StructKind {
    #[default]
    Struct,
    /// Exactly one field is set.
    Union,
    /// A struct that is raised as a declared service exception.
    Exception,
}

/// Ordered set of fields with unique ids.
///
/// The name is used for diagnostics only and never reaches the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct StructDescriptor {
    name: String,
    kind: StructKind,
    fields: Vec<FieldDescriptor>,
}

impl StructDescriptor {
    /// Starts building a plain struct descriptor.
    pub fn builder(name: impl Into<String>) -> StructDescriptorBuilder {
        StructDescriptorBuilder {
            name: name.into(),
            kind: StructKind::Struct,
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StructKind {
        self.kind
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Looks up a field by id.
    pub fn field(&self, id: i16) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Iterates over required fields.
    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_required())
    }
}

/// Builder for [`StructDescriptor`].
#[derive(Debug)]
pub struct StructDescriptorBuilder {
    name: String,
    kind: StructKind,
    fields: Vec<FieldDescriptor>,
}

impl StructDescriptorBuilder {
    pub fn kind(mut self, kind: StructKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn required(self, id: i16, name: impl Into<String>, ty: FieldType) -> Self {
        self.field(FieldDescriptor::required(id, name, ty))
    }

    pub fn optional(self, id: i16, name: impl Into<String>, ty: FieldType) -> Self {
        self.field(FieldDescriptor::optional(id, name, ty))
    }

    /// Validates field ids and produces the descriptor.
    pub fn build(self) -> Result<StructDescriptor, SchemaError> {
        let mut seen = HashSet::with_capacity(self.fields.len());
        for field in &self.fields {
            // Result structs use id 0 for the success slot.
            if field.id < 0 {
                return Err(SchemaError::InvalidFieldId {
                    struct_name: self.name,
                    id: field.id,
                });
            }
            if !seen.insert(field.id) {
                return Err(SchemaError::DuplicateFieldId {
                    struct_name: self.name,
                    id: field.id,
                });
            }
        }
        Ok(StructDescriptor {
            name: self.name,
            kind: self.kind,
            fields: self.fields,
        })
    }
}

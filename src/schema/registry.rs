//! Collection schemas and the process-wide schema registry
//!
//! Schemas are registered once while the database context is assembled.
//! After the registry moves into the context it is only ever read.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::types::FieldType;
use crate::core::{DbError, DbResult};

/// Field lookup consumed by the filter compiler
pub trait FieldLookup {
    /// Type declared for `field`, if any
    fn lookup(&self, field: &str) -> Option<&FieldType>;
}

/// Lookup for collections without a registered schema
#[derive(Debug, Clone, Copy, Default)]
pub struct Schemaless;

impl FieldLookup for Schemaless {
    fn lookup(&self, _field: &str) -> Option<&FieldType> {
        None
    }
}

/// Field definition
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub field_type: FieldType,
    /// Whether the field must be present on insert
    pub required: bool,
    /// Value filled in on insert when the field is absent
    pub default: Option<Value>,
}

impl FieldDef {
    /// Create a required field
    pub fn required(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: true,
            default: None,
        }
    }

    /// Create an optional field
    pub fn optional(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            default: None,
        }
    }

    /// Create an optional field with a default value
    pub fn with_default(field_type: FieldType, default: Value) -> Self {
        Self {
            field_type,
            required: false,
            default: Some(default),
        }
    }
}

/// Schema for one collection
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    name: String,
    /// Declaration order is kept for deterministic validation
    fields: Vec<(String, FieldDef)>,
}

impl Schema {
    /// Create an empty schema for a collection
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Add a required field
    pub fn field(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.define(name, FieldDef::required(field_type))
    }

    /// Add an optional field
    pub fn optional(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.define(name, FieldDef::optional(field_type))
    }

    /// Add an optional field with a default
    pub fn defaulted(self, name: impl Into<String>, field_type: FieldType, default: Value) -> Self {
        self.define(name, FieldDef::with_default(field_type, default))
    }

    /// Add or replace a field definition
    pub fn define(mut self, name: impl Into<String>, def: FieldDef) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = def,
            None => self.fields.push((name, def)),
        }
        self
    }

    /// Collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a field definition
    pub fn field_def(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    /// Iterate field definitions in declaration order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldDef)> {
        self.fields.iter().map(|(n, d)| (n.as_str(), d))
    }

    /// Validates the schema structure itself (not a document)
    pub fn validate_structure(&self) -> DbResult<()> {
        if self.name.is_empty() {
            return Err(DbError::compile("schema must name its collection"));
        }
        for (name, def) in &self.fields {
            if name.is_empty() || name.starts_with('$') {
                return Err(DbError::compile(format!(
                    "invalid field name '{}' in schema '{}'",
                    name, self.name
                )));
            }
            if let Some(default) = &def.default {
                def.field_type.validate(name, default)?;
            }
        }
        Ok(())
    }
}

impl FieldLookup for Schema {
    fn lookup(&self, field: &str) -> Option<&FieldType> {
        self.field_def(field).map(|d| &d.field_type)
    }
}

/// Registry of collection schemas
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<Schema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema; schemas are immutable once registered
    pub fn register(&mut self, schema: Schema) -> DbResult<()> {
        schema.validate_structure()?;
        if self.schemas.contains_key(schema.name()) {
            return Err(DbError::compile(format!(
                "schema for collection '{}' is already registered",
                schema.name()
            )));
        }
        self.schemas
            .insert(schema.name().to_string(), Arc::new(schema));
        Ok(())
    }

    /// Get the schema for a collection
    pub fn get(&self, collection: &str) -> Option<Arc<Schema>> {
        self.schemas.get(collection).cloned()
    }

    pub fn contains(&self, collection: &str) -> bool {
        self.schemas.contains_key(collection)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Registered collection names, sorted
    pub fn collections(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

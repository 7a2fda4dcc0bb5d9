//! Field Type Registry
//!
//! Named field types (coercion kind + constraints), per-collection schemas
//! and write-path validation. The filter compiler only ever sees this
//! module through [`FieldLookup`].

mod registry;
mod types;
mod validator;

pub use registry::{FieldDef, FieldLookup, Schema, SchemaRegistry, Schemaless};
pub use types::{describe_value, Constraints, FieldKind, FieldType};
pub use validator::SchemaValidator;

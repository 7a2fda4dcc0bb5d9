//! Document and update validation
//!
//! Runs on the write path before any command is built. Undeclared fields
//! are left as they are; declared fields are coerced and checked.

use serde_json::{Map, Value};

use super::registry::Schema;
use super::types::{describe_value, FieldKind};
use crate::core::{DbError, DbResult};

/// Validates writes against a collection schema
pub struct SchemaValidator;

impl SchemaValidator {
    /// Validate and coerce a document for insert, filling defaults
    pub fn validate_document(schema: &Schema, document: &Value) -> DbResult<Value> {
        let Value::Object(obj) = document else {
            return Err(DbError::validation(
                "<document>",
                "object",
                describe_value(document),
            ));
        };
        let mut out = obj.clone();

        for (name, def) in schema.fields() {
            match obj.get(name) {
                Some(Value::Null) if def.required => {
                    return Err(DbError::validation(name, "non-null value", "null"));
                }
                Some(Value::Null) => {}
                Some(value) => {
                    let coerced = def.field_type.validate(name, value)?;
                    out.insert(name.to_string(), coerced);
                }
                None => {
                    if let Some(default) = &def.default {
                        out.insert(name.to_string(), default.clone());
                    } else if def.required {
                        return Err(DbError::validation(
                            name,
                            "field to be present",
                            "missing",
                        ));
                    }
                }
            }
        }

        Ok(Value::Object(out))
    }

    /// Validate and coerce the values of an update operator document
    pub fn validate_update(schema: &Schema, update: &Value) -> DbResult<Value> {
        let Value::Object(ops) = update else {
            return Err(DbError::validation(
                "<update>",
                "operator document",
                describe_value(update),
            ));
        };

        let mut out = Map::with_capacity(ops.len());
        for (op, args) in ops {
            let Value::Object(args) = args else {
                return Err(DbError::validation(
                    op,
                    "object of field assignments",
                    describe_value(args),
                ));
            };

            let mut checked = Map::with_capacity(args.len());
            for (field, value) in args {
                let checked_value = match schema.field_def(field) {
                    None => value.clone(),
                    Some(def) => match op.as_str() {
                        "$set" | "$setOnInsert" => {
                            if value.is_null() && def.required {
                                return Err(DbError::validation(field, "non-null value", "null"));
                            }
                            if value.is_null() {
                                value.clone()
                            } else {
                                def.field_type.validate(field, value)?
                            }
                        }
                        "$inc" => {
                            if !matches!(def.field_type.kind, FieldKind::Int | FieldKind::Float) {
                                return Err(DbError::validation(
                                    field,
                                    "numeric field for $inc",
                                    def.field_type.kind.type_name(),
                                ));
                            }
                            def.field_type.kind.coerce(field, value)?
                        }
                        "$push" | "$addToSet" => match &def.field_type.kind {
                            FieldKind::Array { element } => element.coerce(field, value)?,
                            other => {
                                return Err(DbError::validation(
                                    field,
                                    format!("array field for {}", op),
                                    other.type_name(),
                                ))
                            }
                        },
                        "$unset" if def.required => {
                            return Err(DbError::validation(
                                field,
                                "required field to stay present",
                                "$unset",
                            ));
                        }
                        _ => value.clone(),
                    },
                };
                checked.insert(field.clone(), checked_value);
            }
            out.insert(op.clone(), Value::Object(checked));
        }

        Ok(Value::Object(out))
    }
}

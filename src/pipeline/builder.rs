//! # Pipeline Builder
//!
//! Chainable accumulator of aggregation stages. Every method appends
//! exactly one stage, and stages are never reordered. Methods that can
//! reject their input return `DbResult<Pipeline>` so a malformed stage is
//! reported at the call that introduced it, before anything is sent.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::stage::{is_accumulator, Stage, ACCUMULATORS};
use crate::client::Collection;
use crate::core::{DbError, DbResult};
use crate::filter::Filter;
use crate::response::Response;
use crate::schema::{describe_value, FieldLookup, Schema, Schemaless};

/// Ordered aggregation pipeline
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
    aliases: HashSet<String>,
    schema: Option<Arc<Schema>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coerce `$match` values through a collection schema
    pub fn with_schema(mut self, schema: Arc<Schema>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn push(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    fn fields(&self) -> &dyn FieldLookup {
        match &self.schema {
            Some(schema) => schema.as_ref(),
            None => &Schemaless,
        }
    }

    // =========================================================================
    // Stages
    // =========================================================================

    /// `$match` on a compiled filter
    pub fn match_filter(self, filter: &Filter) -> DbResult<Self> {
        let query = filter.compile(self.fields())?;
        Ok(self.push(Stage::Match(query)))
    }

    /// `$match` on a `field__op` predicate mapping
    pub fn match_predicates(self, predicates: Value) -> DbResult<Self> {
        let filter = Filter::from_predicates(predicates)?;
        self.match_filter(&filter)
    }

    /// `$group` by `key` (`None` groups everything into one bucket)
    ///
    /// `accumulators` maps output names to single-operator documents such
    /// as `{"total": {"$sum": "$amount"}}`.
    pub fn group(mut self, key: Option<Value>, accumulators: Value) -> DbResult<Self> {
        let Value::Object(accumulators) = accumulators else {
            return Err(DbError::compile(format!(
                "$group accumulators must be an object, got {}",
                describe_value(&accumulators)
            )));
        };

        for (name, spec) in &accumulators {
            validate_output_name(name)?;
            validate_accumulator(name, spec)?;
        }

        // Grouping replaces every document; only its outputs survive
        self.aliases = accumulators.keys().cloned().collect();
        Ok(self.push(Stage::Group {
            key: key.unwrap_or(Value::Null),
            accumulators,
        }))
    }

    /// `$sort`; the order of `fields` is the tie-break order
    pub fn sort(self, fields: &[(&str, i32)]) -> DbResult<Self> {
        if fields.is_empty() {
            return Err(DbError::compile("$sort requires at least one field"));
        }

        let mut seen = HashSet::with_capacity(fields.len());
        let mut keys = Vec::with_capacity(fields.len());
        for &(field, direction) in fields {
            if field.is_empty() {
                return Err(DbError::compile("$sort field name cannot be empty"));
            }
            if direction != 1 && direction != -1 {
                return Err(DbError::compile(format!(
                    "$sort direction for '{}' must be 1 or -1, got {}",
                    field, direction
                )));
            }
            if !seen.insert(field) {
                return Err(DbError::compile(format!("$sort field '{}' appears twice", field)));
            }
            keys.push((field.to_string(), direction));
        }

        Ok(self.push(Stage::Sort(keys)))
    }

    /// `$limit`; `n` must be positive
    pub fn limit(self, n: u64) -> DbResult<Self> {
        if n == 0 {
            return Err(DbError::compile("$limit must be positive"));
        }
        Ok(self.push(Stage::Limit(n)))
    }

    /// `$skip`
    pub fn skip(self, n: u64) -> Self {
        self.push(Stage::Skip(n))
    }

    /// `$lookup`; declares `alias` for later `unwind` calls
    pub fn lookup(
        mut self,
        from: &str,
        local_field: &str,
        foreign_field: &str,
        alias: &str,
    ) -> DbResult<Self> {
        for (param, value) in [
            ("from", from),
            ("localField", local_field),
            ("foreignField", foreign_field),
            ("as", alias),
        ] {
            if value.is_empty() {
                return Err(DbError::compile(format!("$lookup '{}' cannot be empty", param)));
            }
        }
        validate_output_name(alias)?;

        self.aliases.insert(alias.to_string());
        Ok(self.push(Stage::Lookup {
            from: from.to_string(),
            local_field: local_field.to_string(),
            foreign_field: foreign_field.to_string(),
            alias: alias.to_string(),
        }))
    }

    /// `$unwind` an alias declared by an earlier `lookup` or `group` and not
    /// projected away since
    pub fn unwind(self, alias: &str) -> DbResult<Self> {
        let path = strip_field_ref(alias)?;
        let root = path.split('.').next().unwrap_or(path);
        if !self.aliases.contains(root) {
            return Err(DbError::compile(format!(
                "$unwind references '{}', which no earlier stage declared",
                root
            )));
        }
        let path = path.to_string();
        Ok(self.push(Stage::Unwind(path)))
    }

    /// `$unwind` an array field of the documents themselves
    pub fn unwind_path(self, path: &str) -> DbResult<Self> {
        let path = strip_field_ref(path)?.to_string();
        Ok(self.push(Stage::Unwind(path)))
    }

    /// `$project`; inclusion and exclusion cannot be mixed except for `_id`
    pub fn project(mut self, fields: Value) -> DbResult<Self> {
        let Value::Object(fields) = fields else {
            return Err(DbError::compile(format!(
                "$project specification must be an object, got {}",
                describe_value(&fields)
            )));
        };
        if fields.is_empty() {
            return Err(DbError::compile("$project requires at least one field"));
        }

        let (mut includes, mut excludes) = (false, false);
        let mut kept = HashSet::new();
        let mut dropped = HashSet::new();
        for (field, spec) in &fields {
            if field.is_empty() {
                return Err(DbError::compile("$project field name cannot be empty"));
            }
            let include = match spec {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64() != Some(0.0),
                Value::String(_) | Value::Object(_) => true,
                other => {
                    return Err(DbError::compile(format!(
                        "$project value for '{}' must be 0, 1 or an expression, got {}",
                        field,
                        describe_value(other)
                    )))
                }
            };
            if field == "_id" {
                continue;
            }
            let root = field.split('.').next().unwrap_or(field);
            if include {
                includes = true;
                kept.insert(root.to_string());
            } else {
                excludes = true;
                if root == field {
                    dropped.insert(root.to_string());
                }
            }
        }
        if includes && excludes {
            return Err(DbError::compile(
                "$project cannot mix inclusion and exclusion",
            ));
        }

        if includes {
            self.aliases.retain(|alias| kept.contains(alias));
        } else {
            self.aliases.retain(|alias| !dropped.contains(alias));
        }

        Ok(self.push(Stage::Project(fields)))
    }

    // =========================================================================
    // Output
    // =========================================================================

    /// Render the stages in call order
    pub fn compile(&self) -> Vec<Value> {
        let pipeline: Vec<Value> = self.stages.iter().map(Stage::to_document).collect();
        debug!(stages = pipeline.len(), "compiled aggregation pipeline");
        pipeline
    }

    /// Run against a collection without blocking the calling thread
    pub async fn execute(&self, collection: &Collection<'_>) -> Response {
        collection.aggregate(self).run().await
    }

    /// Run against a collection on the calling thread
    pub fn execute_sync(&self, collection: &Collection<'_>) -> Response {
        collection.aggregate(self).run_sync()
    }
}

fn validate_output_name(name: &str) -> DbResult<()> {
    if name.is_empty() {
        return Err(DbError::compile("output field name cannot be empty"));
    }
    if name == "_id" {
        return Err(DbError::compile("'_id' is reserved for the group key"));
    }
    if name.contains('.') {
        return Err(DbError::compile(format!(
            "output field name '{}' cannot contain '.'",
            name
        )));
    }
    if name.starts_with('$') {
        return Err(DbError::compile(format!(
            "output field name '{}' cannot start with '$'",
            name
        )));
    }
    Ok(())
}

fn validate_accumulator(name: &str, spec: &Value) -> DbResult<()> {
    let op = match spec {
        Value::Object(map) if map.len() == 1 => map.keys().next().map(String::as_str),
        _ => None,
    };
    match op {
        Some(op) if is_accumulator(op) => Ok(()),
        Some(op) => Err(DbError::compile(format!(
            "unknown accumulator '{}' for '{}'; expected one of {}",
            op,
            name,
            ACCUMULATORS.join(", ")
        ))),
        None => Err(DbError::compile(format!(
            "accumulator for '{}' must be a single-operator object",
            name
        ))),
    }
}

fn strip_field_ref(path: &str) -> DbResult<&str> {
    let path = path.strip_prefix('$').unwrap_or(path);
    if path.is_empty() {
        return Err(DbError::compile("$unwind path cannot be empty"));
    }
    Ok(path)
}

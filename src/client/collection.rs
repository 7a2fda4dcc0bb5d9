//! # Collection Operations
//!
//! Builds commands for one collection. Input problems (schema violations,
//! malformed filters or updates) are returned immediately as `DbResult`
//! errors; nothing reaches a transport until an [`Op`] or [`Find`]
//! terminal is called.

use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use super::database::Database;
use super::op::{Find, Op};
use crate::core::{
    AggregateCmd, Command, CountCmd, DbError, DbResult, DeleteCmd, InsertCmd, UpdateCmd, WatchCmd,
};
use crate::filter::Filter;
use crate::pipeline::Pipeline;
use crate::schema::{describe_value, FieldLookup, Schema, SchemaValidator, Schemaless};

/// Handle to one collection of a [`Database`]
#[derive(Clone)]
pub struct Collection<'a> {
    db: &'a Database,
    name: String,
    schema: Option<Arc<Schema>>,
}

impl<'a> Collection<'a> {
    pub(crate) fn new(db: &'a Database, name: &str, schema: Option<Arc<Schema>>) -> Self {
        Self {
            db,
            name: name.to_string(),
            schema,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.schema.as_ref()
    }

    pub(crate) fn database(&self) -> &'a Database {
        self.db
    }

    fn fields(&self) -> &dyn FieldLookup {
        match &self.schema {
            Some(schema) => schema.as_ref(),
            None => &Schemaless,
        }
    }

    fn op(&self, command: Command) -> Op<'a> {
        Op::new(self.db, command)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert one document
    pub fn insert_one(&self, document: Value) -> DbResult<Op<'a>> {
        let document = self.prepare_document(document)?;
        Ok(self.op(Command::Insert(InsertCmd {
            collection: self.name.clone(),
            documents: vec![document],
            ordered: true,
        })))
    }

    /// Insert several documents in order, stopping at the first failure
    pub fn insert_many(&self, documents: Vec<Value>) -> DbResult<Op<'a>> {
        if documents.is_empty() {
            return Err(DbError::validation("<documents>", "at least one document", "empty list"));
        }
        let documents = documents
            .into_iter()
            .map(|doc| self.prepare_document(doc))
            .collect::<DbResult<Vec<_>>>()?;

        Ok(self.op(Command::Insert(InsertCmd {
            collection: self.name.clone(),
            documents,
            ordered: true,
        })))
    }

    /// Update every document matching `filter`
    ///
    /// A document without `$` operators is treated as a `$set`.
    pub fn update(&self, filter: &Filter, update: Value) -> DbResult<Op<'a>> {
        self.build_update(filter, update, true)
    }

    /// Update the first document matching `filter`
    pub fn update_one(&self, filter: &Filter, update: Value) -> DbResult<Op<'a>> {
        self.build_update(filter, update, false)
    }

    /// Delete every document matching `filter`; an empty filter deletes all
    pub fn delete(&self, filter: &Filter) -> DbResult<Op<'a>> {
        self.build_delete(filter, true)
    }

    /// Delete the first document matching `filter`
    pub fn delete_one(&self, filter: &Filter) -> DbResult<Op<'a>> {
        self.build_delete(filter, false)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Start a find query
    pub fn find(&self, filter: &Filter) -> DbResult<Find<'a>> {
        let query = filter.compile(self.fields())?;
        Ok(Find::new(self.clone(), query))
    }

    /// Count documents matching `filter`
    pub fn count(&self, filter: &Filter) -> DbResult<Op<'a>> {
        let query = filter.compile(self.fields())?;
        Ok(self.op(Command::Count(CountCmd {
            collection: self.name.clone(),
            filter: query,
        })))
    }

    /// Empty pipeline bound to this collection's schema
    pub fn pipeline(&self) -> Pipeline {
        match &self.schema {
            Some(schema) => Pipeline::new().with_schema(Arc::clone(schema)),
            None => Pipeline::new(),
        }
    }

    /// Aggregate with an already validated pipeline
    pub fn aggregate(&self, pipeline: &Pipeline) -> Op<'a> {
        self.op(Command::Aggregate(AggregateCmd {
            collection: self.name.clone(),
            pipeline: pipeline.compile(),
        }))
    }

    /// Change stream over this collection, optionally narrowed by a
    /// pipeline of `$match` stages; open it with `cursor` or `cursor_sync`
    pub fn watch(&self, pipeline: Option<&Pipeline>) -> Op<'a> {
        self.op(Command::Watch(WatchCmd {
            collection: self.name.clone(),
            pipeline: pipeline.map(Pipeline::compile).unwrap_or_default(),
        }))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn prepare_document(&self, document: Value) -> DbResult<Value> {
        let document = match &self.schema {
            Some(schema) => SchemaValidator::validate_document(schema, &document)?,
            None if document.is_object() => document,
            None => {
                return Err(DbError::validation(
                    "<document>",
                    "object",
                    describe_value(&document),
                ))
            }
        };

        let Value::Object(fields) = document else {
            return Err(DbError::validation("<document>", "object", "non-object"));
        };
        Ok(Value::Object(with_id(fields)))
    }

    fn build_update(&self, filter: &Filter, update: Value, multi: bool) -> DbResult<Op<'a>> {
        let query = filter.compile(self.fields())?;
        let update = as_operator_document(update)?;
        let update = match &self.schema {
            Some(schema) => SchemaValidator::validate_update(schema, &update)?,
            None => update,
        };

        Ok(self.op(Command::Update(UpdateCmd {
            collection: self.name.clone(),
            filter: query,
            update,
            multi,
        })))
    }

    fn build_delete(&self, filter: &Filter, multi: bool) -> DbResult<Op<'a>> {
        let query = filter.compile(self.fields())?;
        Ok(self.op(Command::Delete(DeleteCmd {
            collection: self.name.clone(),
            filter: query,
            multi,
        })))
    }
}

/// Put a generated `_id` first when the document has none
fn with_id(fields: Map<String, Value>) -> Map<String, Value> {
    if fields.contains_key("_id") {
        return fields;
    }
    let mut out = Map::with_capacity(fields.len() + 1);
    out.insert("_id".to_string(), Value::String(Uuid::new_v4().to_string()));
    out.extend(fields);
    out
}

/// Wrap a plain document in `$set`; reject documents mixing both forms
fn as_operator_document(update: Value) -> DbResult<Value> {
    let Value::Object(map) = update else {
        return Err(DbError::validation(
            "<update>",
            "object",
            describe_value(&update),
        ));
    };
    if map.is_empty() {
        return Err(DbError::validation("<update>", "at least one field", "empty object"));
    }

    let operators = map.keys().filter(|k| k.starts_with('$')).count();
    if operators == map.len() {
        Ok(Value::Object(map))
    } else if operators == 0 {
        let mut set = Map::with_capacity(1);
        set.insert("$set".to_string(), Value::Object(map));
        Ok(Value::Object(set))
    } else {
        Err(DbError::validation(
            "<update>",
            "either update operators or plain fields",
            "a mix of both",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ClientConfig, ErrorKind};
    use crate::memory::MemoryStore;
    use crate::schema::{FieldType, SchemaRegistry};
    use serde_json::json;

    fn database() -> Database {
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                Schema::new("users")
                    .field("name", FieldType::name())
                    .optional("age", FieldType::age())
                    .defaulted("is_active", FieldType::boolean(), json!(true)),
            )
            .unwrap();
        Database::new(ClientConfig::default(), registry, Arc::new(MemoryStore::default())).unwrap()
    }

    #[test]
    fn test_insert_generates_id_and_defaults() {
        let db = database();
        let op = db.collection("users").insert_one(json!({"name": "Ada", "age": "36"})).unwrap();
        let Command::Insert(cmd) = op.command() else {
            panic!("expected insert");
        };
        let doc = &cmd.documents[0];
        assert!(doc["_id"].is_string());
        assert_eq!(doc["age"], json!(36));
        assert_eq!(doc["is_active"], json!(true));
        assert_eq!(doc.as_object().unwrap().keys().next().map(String::as_str), Some("_id"));
    }

    #[test]
    fn test_insert_keeps_given_id() {
        let db = database();
        let op = db.collection("events").insert_one(json!({"_id": 7, "kind": "x"})).unwrap();
        let Command::Insert(cmd) = op.command() else {
            panic!("expected insert");
        };
        assert_eq!(cmd.documents[0]["_id"], json!(7));
    }

    #[test]
    fn test_insert_rejects_invalid_documents() {
        let db = database();
        let users = db.collection("users");

        let err = users.insert_one(json!({"age": 30})).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = users.insert_many(vec![json!({"name": "Ok"}), json!({"name": "Bad", "age": "old"})]);
        assert!(err.is_err());

        assert!(db.collection("events").insert_one(json!([1])).is_err());
        assert!(users.insert_many(Vec::new()).is_err());
    }

    #[test]
    fn test_update_wraps_plain_documents() {
        let db = database();
        let filter = Filter::by_id(1);
        let op = db.collection("users").update_one(&filter, json!({"age": "40"})).unwrap();
        let Command::Update(cmd) = op.command() else {
            panic!("expected update");
        };
        assert_eq!(cmd.update, json!({"$set": {"age": 40}}));
        assert_eq!(cmd.filter, json!({"_id": 1}));
        assert!(!cmd.multi);
    }

    #[test]
    fn test_update_rejects_mixed_documents() {
        let db = database();
        let result = db
            .collection("users")
            .update(&Filter::new(), json!({"$set": {"a": 1}, "b": 2}));
        assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::Validation));
    }

    #[test]
    fn test_find_reports_filter_errors() {
        let db = database();
        let filter = Filter::new().with("age__gte", json!("many")).unwrap();
        let err = db.collection("users").find(&filter).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_watch_compiles_pipeline() {
        let db = database();
        let users = db.collection("users");
        let pipeline = Pipeline::new()
            .match_predicates(json!({"operationType": "insert"}))
            .unwrap();
        let op = users.watch(Some(&pipeline));
        let Command::Watch(cmd) = op.command() else {
            panic!("expected watch");
        };
        assert_eq!(cmd.pipeline, vec![json!({"$match": {"operationType": "insert"}})]);
        assert!(matches!(users.watch(None).command(), Command::Watch(c) if c.pipeline.is_empty()));
    }
}

//! # Filter Compiler
//!
//! Turns predicate mappings and combinator trees into store-native filter
//! documents. The compiler is pure: same input, same bytes out.
//!
//! Rules:
//! - predicates on one field share one key; a lone `eq` renders as the bare
//!   value, otherwise as `$eq` next to its siblings
//! - the same operator twice on one field is a compile error
//! - `Not(Leaf)` uses the field-level `$not`, `Not(combinator)` uses `$nor`
//! - empty `And` is `{}`, empty `Or` is `{"$nor": [{}]}` (matches nothing)

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use super::node::Node;
use super::operator::{Operator, Predicate};
use crate::core::{DbError, DbResult};
use crate::schema::{describe_value, FieldKind, FieldLookup};

/// Compile a predicate mapping and combinators into a filter document
pub fn compile(
    predicates: &Map<String, Value>,
    combinators: &[Node],
    fields: &dyn FieldLookup,
) -> DbResult<Value> {
    let mut parts = Vec::with_capacity(combinators.len() + 1);

    if !predicates.is_empty() {
        let parsed = predicates
            .iter()
            .map(|(key, value)| Predicate::parse(key, value.clone()))
            .collect::<DbResult<Vec<_>>>()?;
        parts.push(Value::Object(compile_predicates(&parsed, fields)?));
    }

    for node in combinators {
        parts.push(compile_node(node, fields)?);
    }

    let compiled = match parts.len() {
        0 => Value::Object(Map::new()),
        1 => parts.remove(0),
        _ => and_of(parts),
    };

    debug!(
        predicates = predicates.len(),
        combinators = combinators.len(),
        "compiled filter"
    );
    Ok(compiled)
}

/// Compile one combinator tree
pub fn compile_node(node: &Node, fields: &dyn FieldLookup) -> DbResult<Value> {
    match node {
        Node::Leaf(predicate) => Ok(Value::Object(compile_predicates(
            std::slice::from_ref(predicate),
            fields,
        )?)),

        Node::And(children) if children.is_empty() => Ok(Value::Object(Map::new())),
        Node::And(children) => children
            .iter()
            .map(|c| compile_node(c, fields))
            .collect::<DbResult<Vec<_>>>()
            .map(and_of),

        Node::Or(children) if children.is_empty() => Ok(match_nothing()),
        Node::Or(children) => children
            .iter()
            .map(|c| compile_node(c, fields))
            .collect::<DbResult<Vec<_>>>()
            .map(|docs| single_key("$or", Value::Array(docs))),

        Node::Not(inner) => match inner.as_ref() {
            Node::Leaf(predicate) => {
                let (key, operand) = compile_operand(predicate, fields)?;
                let mut negated = Map::new();
                negated.insert(key.to_string(), operand);
                Ok(single_key(
                    &predicate.field,
                    single_key("$not", Value::Object(negated)),
                ))
            }
            other => {
                let compiled = compile_node(other, fields)?;
                Ok(single_key("$nor", Value::Array(vec![compiled])))
            }
        },
    }
}

/// Compile sibling predicates, merging those that share a field
fn compile_predicates(
    predicates: &[Predicate],
    fields: &dyn FieldLookup,
) -> DbResult<Map<String, Value>> {
    // Field order follows first appearance
    let mut grouped: Vec<(&str, Vec<(&'static str, Value)>)> = Vec::new();

    for predicate in predicates {
        let (key, operand) = compile_operand(predicate, fields)?;
        let slot = match grouped.iter().position(|(f, _)| *f == predicate.field) {
            Some(i) => &mut grouped[i].1,
            None => {
                grouped.push((predicate.field.as_str(), Vec::new()));
                let last = grouped.len() - 1;
                &mut grouped[last].1
            }
        };
        if slot.iter().any(|(k, _)| *k == key) {
            return Err(DbError::compile(format!(
                "conflicting predicates on field '{}': operator {} given more than once",
                predicate.field, key
            )));
        }
        slot.push((key, operand));
    }

    let mut doc = Map::new();
    for (field, mut ops) in grouped {
        let rendered = if ops.len() == 1 && ops[0].0 == "$eq" {
            ops.remove(0).1
        } else {
            Value::Object(
                ops.into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            )
        };
        doc.insert(field.to_string(), rendered);
    }
    Ok(doc)
}

/// Coerce and validate an operand, returning its wire key and value
fn compile_operand(
    predicate: &Predicate,
    fields: &dyn FieldLookup,
) -> DbResult<(&'static str, Value)> {
    let field = predicate.field.as_str();
    let op = predicate.operator;
    let value = &predicate.value;

    let operand = match op {
        Operator::Exists => FieldKind::Bool.coerce(field, value)?,

        Operator::Regex => {
            let pattern = value
                .as_str()
                .ok_or_else(|| DbError::validation(field, "regex pattern string", describe_value(value)))?;
            Regex::new(pattern).map_err(|e| {
                DbError::validation(field, "valid regex pattern", e.to_string())
            })?;
            Value::String(pattern.to_string())
        }

        Operator::Contains => {
            let needle = value
                .as_str()
                .ok_or_else(|| DbError::validation(field, "substring", describe_value(value)))?;
            if let Some(ty) = fields.lookup(field) {
                if !matches!(ty.kind.scalar(), FieldKind::String | FieldKind::Any) {
                    return Err(DbError::validation(
                        field,
                        "string field for contains",
                        ty.kind.type_name(),
                    ));
                }
            }
            Value::String(regex::escape(needle))
        }

        Operator::In | Operator::Nin => {
            let items = value
                .as_array()
                .ok_or_else(|| DbError::validation(field, "array of values", describe_value(value)))?;
            Value::Array(
                items
                    .iter()
                    .map(|item| coerce_scalar(field, op, item, fields))
                    .collect::<DbResult<Vec<_>>>()?,
            )
        }

        Operator::Eq | Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            coerce_scalar(field, op, value, fields)?
        }
    };

    Ok((op.wire_key(), operand))
}

/// Coerce a comparison operand through the field registry
fn coerce_scalar(
    field: &str,
    op: Operator,
    value: &Value,
    fields: &dyn FieldLookup,
) -> DbResult<Value> {
    reject_operator_keys(field, value)?;
    let Some(ty) = fields.lookup(field) else {
        return Ok(value.clone());
    };
    if value.is_null() {
        return Ok(Value::Null);
    }

    match (&ty.kind, value) {
        // Whole-array comparison against an array field
        (FieldKind::Array { .. }, Value::Array(_)) => ty.kind.coerce(field, value),
        // Element comparison against an array field
        (FieldKind::Array { element }, _) => element.coerce(field, value),
        _ => {
            let coerced = ty.kind.coerce(field, value)?;
            if op.checks_constraints() {
                ty.check(field, &coerced)?;
            }
            Ok(coerced)
        }
    }
}

/// Operators come only from the `__op` suffix; an operand object carrying
/// `$` keys would otherwise reach the wire as an undeclared operator
fn reject_operator_keys(field: &str, value: &Value) -> DbResult<()> {
    let found = match value {
        Value::Object(map) => map.keys().find(|k| k.starts_with('$')),
        _ => None,
    };
    match found {
        Some(key) => Err(DbError::validation(
            field,
            "plain value",
            format!("object with operator key {}", key),
        )),
        None => Ok(()),
    }
}

fn and_of(parts: Vec<Value>) -> Value {
    single_key("$and", Value::Array(parts))
}

fn match_nothing() -> Value {
    single_key("$nor", Value::Array(vec![Value::Object(Map::new())]))
}

fn single_key(key: &str, value: Value) -> Value {
    let mut map = Map::with_capacity(1);
    map.insert(key.to_string(), value);
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::schema::{FieldType, Schema, Schemaless};
    use serde_json::json;

    fn users() -> Schema {
        Schema::new("users")
            .field("name", FieldType::name())
            .field("age", FieldType::age())
            .field("score", FieldType::float())
            .field("tags", FieldType::array(FieldKind::String))
            .field("is_active", FieldType::boolean())
    }

    fn compile_json(predicates: Value) -> DbResult<Value> {
        Filter::from_predicates(predicates)?.compile(&users())
    }

    #[test]
    fn test_empty_is_match_all() {
        assert_eq!(Filter::new().compile(&Schemaless).unwrap(), json!({}));
    }

    #[test]
    fn test_range_merges_on_one_key() {
        let doc = compile_json(json!({"age__gte": 18, "age__lt": 65})).unwrap();
        assert_eq!(doc, json!({"age": {"$gte": 18, "$lt": 65}}));
        assert_eq!(
            serde_json::to_string(&doc).unwrap(),
            r#"{"age":{"$gte":18,"$lt":65}}"#
        );
    }

    #[test]
    fn test_eq_merged_with_siblings_uses_dollar_eq() {
        let doc = compile_json(json!({"age": 30, "age__lte": 40})).unwrap();
        assert_eq!(doc, json!({"age": {"$eq": 30, "$lte": 40}}));
    }

    #[test]
    fn test_same_operator_twice_is_compile_error() {
        let predicates = vec![
            Predicate::parse("age", json!(1)).unwrap(),
            Predicate::parse("age__eq", json!(2)).unwrap(),
        ];
        let err = compile_predicates(&predicates, &Schemaless).unwrap_err();
        assert!(matches!(err, DbError::Compile(_)));
    }

    #[test]
    fn test_value_coercion() {
        let doc = compile_json(json!({"age__gte": "18", "is_active": "true"})).unwrap();
        assert_eq!(doc, json!({"age": {"$gte": 18}, "is_active": true}));
    }

    #[test]
    fn test_coercion_failure_names_field() {
        let err = compile_json(json!({"age": "abc"})).unwrap_err();
        match err {
            DbError::Validation {
                field, expected, ..
            } => {
                assert_eq!(field, "age");
                assert_eq!(expected, "int");
            }
            other => panic!("Expected Validation, got {:?}", other),
        }
    }

    #[test]
    fn test_constraints_only_on_equality() {
        assert!(compile_json(json!({"age": 200})).is_err());
        assert!(compile_json(json!({"age__in": [20, 200]})).is_err());
        // Range operands may sit outside the declared range
        assert!(compile_json(json!({"age__lt": 200})).is_ok());
    }

    #[test]
    fn test_array_field_element_match() {
        let doc = compile_json(json!({"tags__in": ["vip"], "tags": "new"})).unwrap();
        assert_eq!(doc, json!({"tags": {"$in": ["vip"], "$eq": "new"}}));
    }

    #[test]
    fn test_in_requires_array() {
        let err = compile_json(json!({"age__in": 5})).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_regex_and_contains() {
        let doc = compile_json(json!({"name__regex": "^Al"})).unwrap();
        assert_eq!(doc, json!({"name": {"$regex": "^Al"}}));

        let doc = compile_json(json!({"name__contains": "a.b"})).unwrap();
        assert_eq!(doc, json!({"name": {"$regex": "a\\.b"}}));

        assert!(compile_json(json!({"name__regex": "(unclosed"})).is_err());
        assert!(compile_json(json!({"age__contains": "1"})).is_err());
    }

    #[test]
    fn test_regex_and_contains_conflict() {
        let err = compile_json(json!({"name__regex": "^A", "name__contains": "x"})).unwrap_err();
        assert!(matches!(err, DbError::Compile(_)));
    }

    #[test]
    fn test_exists() {
        let doc = compile_json(json!({"email__exists": false})).unwrap();
        assert_eq!(doc, json!({"email": {"$exists": false}}));
        assert!(compile_json(json!({"email__exists": "perhaps"})).is_err());
    }

    #[test]
    fn test_operator_keys_in_operand_rejected() {
        let compile_schemaless =
            |predicates: Value| Filter::from_predicates(predicates).unwrap().compile(&Schemaless);

        for predicates in [
            json!({"meta": {"$gt": 5}}),
            json!({"meta": {"$where": "sleep(1000)"}}),
            json!({"meta__in": [{"$ne": null}]}),
            json!({"meta__lt": {"$expr": 1}}),
        ] {
            let err = compile_schemaless(predicates).unwrap_err();
            assert_eq!(err.code(), "VALIDATION_ERROR");
        }

        let err = Filter::new()
            .combine(Node::not(Node::leaf("meta", json!({"$gt": 5})).unwrap()))
            .compile(&Schemaless)
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        // Plain embedded documents are still equality operands
        let doc = compile_schemaless(json!({"meta": {"kind": "a"}})).unwrap();
        assert_eq!(doc, json!({"meta": {"kind": "a"}}));
    }

    #[test]
    fn test_and_combinator() {
        let filter = Filter::new().combine(Node::and([
            Node::leaf("tags__in", json!(["vip"])).unwrap(),
            Node::leaf("is_active", json!(true)).unwrap(),
        ]));
        assert_eq!(
            filter.compile(&users()).unwrap(),
            json!({"$and": [{"tags": {"$in": ["vip"]}}, {"is_active": true}]})
        );
    }

    #[test]
    fn test_empty_combinators() {
        let always = Filter::new().combine(Node::And(Vec::new()));
        assert_eq!(always.compile(&Schemaless).unwrap(), json!({}));

        let never = Filter::new().combine(Node::Or(Vec::new()));
        assert_eq!(never.compile(&Schemaless).unwrap(), json!({"$nor": [{}]}));
    }

    #[test]
    fn test_not_leaf_and_not_combinator() {
        let not_leaf = Filter::new().combine(Node::not(Node::leaf("age__gt", json!(5)).unwrap()));
        assert_eq!(
            not_leaf.compile(&users()).unwrap(),
            json!({"age": {"$not": {"$gt": 5}}})
        );

        let not_or = Filter::new().combine(Node::not(Node::or([
            Node::leaf("a", json!(1)).unwrap(),
            Node::leaf("b", json!(2)).unwrap(),
        ])));
        assert_eq!(
            not_or.compile(&Schemaless).unwrap(),
            json!({"$nor": [{"$or": [{"a": 1}, {"b": 2}]}]})
        );
    }

    #[test]
    fn test_predicates_and_combinators_joined() {
        let filter = Filter::from_predicates(json!({"status": "active"}))
            .unwrap()
            .combine(Node::or([
                Node::leaf("age__lt", json!(18)).unwrap(),
                Node::leaf("age__gte", json!(65)).unwrap(),
            ]));
        assert_eq!(
            filter.compile(&Schemaless).unwrap(),
            json!({"$and": [
                {"status": "active"},
                {"$or": [{"age": {"$lt": 18}}, {"age": {"$gte": 65}}]}
            ]})
        );
    }

    #[test]
    fn test_compile_is_idempotent() {
        let filter = Filter::from_predicates(json!({"age__gte": 18, "name__contains": "x"}))
            .unwrap()
            .combine(Node::not(Node::and([Node::leaf("a", json!(1)).unwrap()])));
        let first = serde_json::to_string(&filter.compile(&users()).unwrap()).unwrap();
        let second = serde_json::to_string(&filter.compile(&users()).unwrap()).unwrap();
        assert_eq!(first, second);
    }
}

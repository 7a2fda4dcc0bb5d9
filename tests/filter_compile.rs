//! Filter Compiler Tests
//!
//! Compiled query documents are checked against hand-written expectations
//! and, through the in-memory evaluator, against plain Rust predicates
//! over a fixture set.

use doclite::filter::{compile, Filter, Node, Operator};
use doclite::memory::matches;
use doclite::schema::{FieldType, Schema, Schemaless};
use doclite::ErrorKind;
use serde_json::{json, Map, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn fixtures() -> Vec<Value> {
    vec![
        json!({"_id": 1, "name": "Ada", "age": 36, "tags": ["vip", "beta"], "is_active": true}),
        json!({"_id": 2, "name": "Bob", "age": 17, "tags": [], "is_active": false}),
        json!({"_id": 3, "name": "Cy.", "age": 65, "tags": ["vip"], "is_active": false}),
        json!({"_id": 4, "name": "Di", "tags": ["beta"], "is_active": true}),
        json!({"_id": 5, "name": "Eve", "age": 44, "tags": ["vip"], "is_active": true}),
    ]
}

fn ids_matching(query: &Value) -> Vec<i64> {
    fixtures()
        .iter()
        .filter(|doc| matches(doc, query).unwrap())
        .filter_map(|doc| doc["_id"].as_i64())
        .collect()
}

fn ids_where(pred: impl Fn(&Value) -> bool) -> Vec<i64> {
    fixtures()
        .iter()
        .filter(|doc| pred(doc))
        .filter_map(|doc| doc["_id"].as_i64())
        .collect()
}

fn compiled(filter: &Filter) -> Value {
    filter.compile(&Schemaless).unwrap()
}

type Check = Box<dyn Fn(&Value) -> bool>;

fn check(pred: impl Fn(&Value) -> bool + 'static) -> Check {
    Box::new(pred)
}

fn has_tag(doc: &Value, tag: &str) -> bool {
    doc["tags"]
        .as_array()
        .map(|tags| tags.iter().any(|t| t == tag))
        .unwrap_or(false)
}

// =============================================================================
// Canonical Output
// =============================================================================

#[test]
fn test_range_predicates_merge_into_one_key() {
    let filter = Filter::from_predicates(json!({"age__gte": 18, "age__lt": 65})).unwrap();
    let query = compiled(&filter);

    assert_eq!(
        serde_json::to_string(&query).unwrap(),
        r#"{"age":{"$gte":18,"$lt":65}}"#
    );
    assert_eq!(ids_matching(&query), vec![1, 5]);
}

#[test]
fn test_and_combinator() {
    let filter = Filter::new().combine(Node::and([
        Node::leaf("tags__in", json!(["vip"])).unwrap(),
        Node::leaf("is_active", json!(true)).unwrap(),
    ]));
    let query = compiled(&filter);

    assert_eq!(
        query,
        json!({"$and": [{"tags": {"$in": ["vip"]}}, {"is_active": true}]})
    );
    assert_eq!(ids_matching(&query), vec![1, 5]);
}

#[test]
fn test_empty_mapping_matches_everything() {
    let query = compile(&Map::new(), &[], &Schemaless).unwrap();
    assert_eq!(query, json!({}));
    assert_eq!(ids_matching(&query), vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_empty_or_matches_nothing() {
    let query = compiled(&Filter::new().combine(Node::Or(Vec::new())));
    assert_eq!(query, json!({"$nor": [{}]}));
    assert!(ids_matching(&query).is_empty());
}

#[test]
fn test_predicates_and_combinators_are_and_ed() {
    let filter = Filter::from_predicates(json!({"is_active": true}))
        .unwrap()
        .combine(Node::or([
            Node::predicate("age", Operator::Gt, json!(40)),
            Node::predicate("age", Operator::Exists, json!(false)),
        ]));
    let query = compiled(&filter);

    assert_eq!(
        query,
        json!({"$and": [
            {"is_active": true},
            {"$or": [{"age": {"$gt": 40}}, {"age": {"$exists": false}}]}
        ]})
    );
    assert_eq!(ids_matching(&query), vec![4, 5]);
}

// =============================================================================
// Fixture Equivalence
// =============================================================================

#[test]
fn test_compiled_filters_agree_with_direct_evaluation() {
    let cases: Vec<(Value, Check)> = vec![
        (
            json!({"age__gt": 30}),
            check(|d| d["age"].as_i64().map(|a| a > 30).unwrap_or(false)),
        ),
        (
            json!({"age__lte": 36}),
            check(|d| d["age"].as_i64().map(|a| a <= 36).unwrap_or(false)),
        ),
        (
            json!({"name__in": ["Ada", "Di"]}),
            check(|d| d["name"] == "Ada" || d["name"] == "Di"),
        ),
        (
            json!({"tags__nin": ["vip"]}),
            check(|d| !has_tag(d, "vip")),
        ),
        (
            json!({"age__exists": true}),
            check(|d| d.get("age").is_some()),
        ),
        (
            json!({"name__regex": "^[A-C]"}),
            check(|d| d["name"].as_str().map(|n| n < "D").unwrap_or(false)),
        ),
        (
            json!({"name__contains": "."}),
            check(|d| d["name"].as_str().map(|n| n.contains('.')).unwrap_or(false)),
        ),
        (
            json!({"tags": "beta"}),
            check(|d| has_tag(d, "beta")),
        ),
    ];

    for (predicates, expected) in cases {
        let query = compiled(&Filter::from_predicates(predicates.clone()).unwrap());
        assert_eq!(
            ids_matching(&query),
            ids_where(&expected),
            "mismatch for {}",
            predicates
        );
    }
}

#[test]
fn test_de_morgan_equivalence() {
    let a = || Node::leaf("age__gte", json!(18)).unwrap();
    let b = || Node::leaf("is_active", json!(true)).unwrap();

    let not_and = compiled(&Filter::new().combine(Node::not(Node::and([a(), b()]))));
    let or_not = compiled(&Filter::new().combine(Node::or([Node::not(a()), Node::not(b())])));
    assert_eq!(ids_matching(&not_and), ids_matching(&or_not));

    let not_or = compiled(&Filter::new().combine(Node::not(Node::or([a(), b()]))));
    let and_not = compiled(&Filter::new().combine(Node::and([Node::not(a()), Node::not(b())])));
    assert_eq!(ids_matching(&not_or), ids_matching(&and_not));
    assert_eq!(ids_matching(&not_or), vec![2]);
}

#[test]
fn test_double_negation() {
    let leaf = Node::leaf("tags__in", json!(["vip"])).unwrap();
    let plain = compiled(&Filter::new().combine(leaf.clone()));
    let doubled = compiled(&Filter::new().combine(Node::not(Node::not(leaf))));
    assert_eq!(ids_matching(&plain), ids_matching(&doubled));
}

#[test]
fn test_compilation_is_idempotent() {
    let filter = Filter::from_predicates(json!({"age__gte": 18, "name__contains": "a+b", "tags__in": ["x"]}))
        .unwrap()
        .combine(Node::not(Node::any_of(&json!({"is_active": false, "age__lt": 21})).unwrap()));

    let first = serde_json::to_vec(&compiled(&filter)).unwrap();
    for _ in 0..10 {
        assert_eq!(serde_json::to_vec(&compiled(&filter)).unwrap(), first);
    }
}

// =============================================================================
// Errors and Coercion
// =============================================================================

#[test]
fn test_unknown_operator_is_validation_error() {
    let err = Filter::from_predicates(json!({"age__between": [1, 2]})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn test_same_operator_twice_is_compile_error() {
    let err = Filter::from_predicates(json!({"age": 1, "age__eq": 2}))
        .unwrap()
        .compile(&Schemaless)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Compile);
}

#[test]
fn test_values_are_coerced_through_schema() {
    let schema = Schema::new("users")
        .field("age", FieldType::age())
        .field("is_active", FieldType::boolean());

    let filter = Filter::from_predicates(json!({"age__gte": "18", "is_active": "true"})).unwrap();
    assert_eq!(
        filter.compile(&schema).unwrap(),
        json!({"age": {"$gte": 18}, "is_active": true})
    );

    let bad = Filter::from_predicates(json!({"age__gte": "adult"})).unwrap();
    let err = bad.compile(&schema).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("age"));
}

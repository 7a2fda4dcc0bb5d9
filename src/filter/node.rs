//! # Filter Expressions
//!
//! Combinator trees and the caller-facing [`Filter`] value: a predicate
//! mapping plus any number of combinator nodes. Filters are built per call
//! and hold no state beyond their own contents.

use serde_json::{Map, Value};

use super::compiler;
use super::operator::{Operator, Predicate};
use crate::core::{DbError, DbResult};
use crate::schema::{describe_value, FieldLookup};

/// Logical combinator tree
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(Predicate),
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
}

impl Node {
    /// Create a leaf from a `field__op` key
    pub fn leaf(key: &str, value: Value) -> DbResult<Self> {
        Predicate::parse(key, value).map(Node::Leaf)
    }

    /// Create a leaf from an explicit operator
    pub fn predicate(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Node::Leaf(Predicate::new(field, operator, value))
    }

    /// All children must match; empty matches everything
    pub fn and(children: impl IntoIterator<Item = Node>) -> Self {
        Node::And(children.into_iter().collect())
    }

    /// Any child must match; empty matches nothing
    pub fn or(children: impl IntoIterator<Item = Node>) -> Self {
        Node::Or(children.into_iter().collect())
    }

    /// Negate a node
    pub fn not(node: Node) -> Self {
        Node::Not(Box::new(node))
    }

    /// AND of one leaf per mapping entry, in mapping order
    pub fn all_of(predicates: &Value) -> DbResult<Self> {
        let map = as_predicate_map(predicates)?;
        map.iter()
            .map(|(k, v)| Node::leaf(k, v.clone()))
            .collect::<DbResult<Vec<_>>>()
            .map(Node::And)
    }

    /// OR of one leaf per mapping entry, in mapping order
    pub fn any_of(predicates: &Value) -> DbResult<Self> {
        let map = as_predicate_map(predicates)?;
        map.iter()
            .map(|(k, v)| Node::leaf(k, v.clone()))
            .collect::<DbResult<Vec<_>>>()
            .map(Node::Or)
    }

    /// Nesting depth, a leaf counts as one
    pub fn depth(&self) -> usize {
        match self {
            Node::Leaf(_) => 1,
            Node::And(children) | Node::Or(children) => {
                1 + children.iter().map(Node::depth).max().unwrap_or(0)
            }
            Node::Not(inner) => 1 + inner.depth(),
        }
    }
}

fn as_predicate_map(predicates: &Value) -> DbResult<&Map<String, Value>> {
    predicates.as_object().ok_or_else(|| {
        DbError::validation(
            "<predicates>",
            "object of field predicates",
            describe_value(predicates),
        )
    })
}

/// Declarative filter: predicate mapping plus combinators
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    predicates: Map<String, Value>,
    combinators: Vec<Node>,
}

impl Filter {
    /// Create an empty filter (matches every document)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a filter from a predicate mapping such as
    /// `{"age__gte": 18, "status": "active"}`
    pub fn from_predicates(predicates: Value) -> DbResult<Self> {
        match predicates {
            Value::Object(map) => {
                // Keys are checked here so malformed input fails at the call
                for key in map.keys() {
                    Predicate::parse(key, Value::Null)?;
                }
                Ok(Self {
                    predicates: map,
                    combinators: Vec::new(),
                })
            }
            Value::Null => Ok(Self::new()),
            other => Err(DbError::validation(
                "<predicates>",
                "object of field predicates",
                describe_value(&other),
            )),
        }
    }

    /// Filter on a document identifier
    pub fn by_id(id: impl Into<Value>) -> Self {
        let mut predicates = Map::new();
        predicates.insert("_id".to_string(), id.into());
        Self {
            predicates,
            combinators: Vec::new(),
        }
    }

    /// Add a predicate
    pub fn with(mut self, key: &str, value: Value) -> DbResult<Self> {
        Predicate::parse(key, Value::Null)?;
        self.predicates.insert(key.to_string(), value);
        Ok(self)
    }

    /// Add a combinator node
    pub fn combine(mut self, node: Node) -> Self {
        self.combinators.push(node);
        self
    }

    pub fn predicates(&self) -> &Map<String, Value> {
        &self.predicates
    }

    pub fn combinators(&self) -> &[Node] {
        &self.combinators
    }

    /// Whether the filter matches every document
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty() && self.combinators.is_empty()
    }

    /// Compile to a store-native filter document
    pub fn compile(&self, fields: &dyn FieldLookup) -> DbResult<Value> {
        compiler::compile(&self.predicates, &self.combinators, fields)
    }
}

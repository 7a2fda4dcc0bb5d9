//! Unified Command Model
//!
//! Every logical operation is one of these values. A command holds only
//! compiled, store-native documents and is identical for both execution
//! modes; the dispatcher routes it unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// All operations route through this enum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    // Write operations
    Insert(InsertCmd),
    Update(UpdateCmd),
    Delete(DeleteCmd),

    // Read operations
    Find(FindCmd),
    Count(CountCmd),
    Distinct(DistinctCmd),
    Aggregate(AggregateCmd),

    // Change streams
    Watch(WatchCmd),
}

impl Command {
    /// Get the target collection
    pub fn collection(&self) -> &str {
        match self {
            Self::Insert(c) => &c.collection,
            Self::Update(c) => &c.collection,
            Self::Delete(c) => &c.collection,
            Self::Find(c) => &c.collection,
            Self::Count(c) => &c.collection,
            Self::Distinct(c) => &c.collection,
            Self::Aggregate(c) => &c.collection,
            Self::Watch(c) => &c.collection,
        }
    }

    /// Get operation name for logging and hooks
    pub fn name(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::Update(_) => "update",
            Self::Delete(_) => "delete",
            Self::Find(_) => "find",
            Self::Count(_) => "count",
            Self::Distinct(_) => "distinct",
            Self::Aggregate(_) => "aggregate",
            Self::Watch(_) => "watch",
        }
    }

    /// Check if this command modifies documents
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Insert(_) | Self::Update(_) | Self::Delete(_))
    }

    /// Check if this command can be consumed through a cursor
    pub fn is_cursor_capable(&self) -> bool {
        matches!(self, Self::Find(_) | Self::Aggregate(_) | Self::Watch(_))
    }

    /// The compiled filter, for commands that carry one
    pub fn filter(&self) -> Option<&Value> {
        match self {
            Self::Update(c) => Some(&c.filter),
            Self::Delete(c) => Some(&c.filter),
            Self::Find(c) => Some(&c.filter),
            Self::Count(c) => Some(&c.filter),
            Self::Distinct(c) => Some(&c.filter),
            _ => None,
        }
    }
}

/// Insert one or more documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertCmd {
    pub collection: String,
    pub documents: Vec<Value>,
    /// Stop at the first failing document
    #[serde(default = "default_true")]
    pub ordered: bool,
}

/// Update documents matching a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateCmd {
    pub collection: String,
    pub filter: Value,
    /// Operator document (`$set`, `$inc`, ...)
    pub update: Value,
    #[serde(default)]
    pub multi: bool,
}

/// Delete documents matching a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteCmd {
    pub collection: String,
    pub filter: Value,
    #[serde(default)]
    pub multi: bool,
}

/// Query documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindCmd {
    pub collection: String,
    pub filter: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Value>,
    #[serde(default)]
    pub skip: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

/// Count documents matching a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountCmd {
    pub collection: String,
    pub filter: Value,
}

/// Distinct values of one field among matching documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistinctCmd {
    pub collection: String,
    pub field: String,
    pub filter: Value,
}

/// Run an aggregation pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateCmd {
    pub collection: String,
    pub pipeline: Vec<Value>,
}

/// Open a change stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchCmd {
    pub collection: String,
    #[serde(default)]
    pub pipeline: Vec<Value>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_parsing() {
        let json = r#"{"op": "find", "collection": "users", "filter": {"age": {"$gte": 18}}}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();

        assert!(matches!(cmd, Command::Find(_)));
        assert_eq!(cmd.collection(), "users");
        assert_eq!(cmd.name(), "find");
        assert_eq!(cmd.filter(), Some(&json!({"age": {"$gte": 18}})));
    }

    #[test]
    fn test_insert_defaults_to_ordered() {
        let json = r#"{"op": "insert", "collection": "users", "documents": [{"name": "A"}]}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();

        match cmd {
            Command::Insert(insert) => assert!(insert.ordered),
            other => panic!("Expected Insert, got {:?}", other),
        }
    }

    #[test]
    fn test_write_classification() {
        let delete = Command::Delete(DeleteCmd {
            collection: "users".into(),
            filter: json!({}),
            multi: true,
        });
        let aggregate = Command::Aggregate(AggregateCmd {
            collection: "orders".into(),
            pipeline: vec![],
        });

        assert!(delete.is_write());
        assert!(!delete.is_cursor_capable());
        assert!(!aggregate.is_write());
        assert!(aggregate.is_cursor_capable());
    }
}

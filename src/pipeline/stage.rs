//! Pipeline stages
//!
//! Each stage renders to exactly one wire document. Stages carry already
//! validated content; validation happens in the builder methods.

use serde_json::{json, Map, Value};

/// Accumulators accepted by `$group`
pub const ACCUMULATORS: &[&str] = &[
    "$sum",
    "$avg",
    "$min",
    "$max",
    "$stdDevPop",
    "$stdDevSamp",
    "$addToSet",
    "$push",
    "$first",
    "$last",
    "$count",
];

/// Check whether an accumulator operator is supported
pub fn is_accumulator(op: &str) -> bool {
    ACCUMULATORS.contains(&op)
}

/// One aggregation stage
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Value),
    Group {
        key: Value,
        accumulators: Map<String, Value>,
    },
    Sort(Vec<(String, i32)>),
    Limit(u64),
    Skip(u64),
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        alias: String,
    },
    /// Field path without the leading `$`
    Unwind(String),
    Project(Map<String, Value>),
}

impl Stage {
    /// Wire name of the stage
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Group { .. } => "$group",
            Stage::Sort(_) => "$sort",
            Stage::Limit(_) => "$limit",
            Stage::Skip(_) => "$skip",
            Stage::Lookup { .. } => "$lookup",
            Stage::Unwind(_) => "$unwind",
            Stage::Project(_) => "$project",
        }
    }

    /// Render the stage as its wire document
    pub fn to_document(&self) -> Value {
        let body = match self {
            Stage::Match(query) => query.clone(),
            Stage::Group { key, accumulators } => {
                let mut group = Map::with_capacity(accumulators.len() + 1);
                group.insert("_id".to_string(), key.clone());
                for (name, acc) in accumulators {
                    group.insert(name.clone(), acc.clone());
                }
                Value::Object(group)
            }
            Stage::Sort(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(field, dir)| (field.clone(), Value::from(*dir)))
                    .collect(),
            ),
            Stage::Limit(n) | Stage::Skip(n) => Value::from(*n),
            Stage::Lookup {
                from,
                local_field,
                foreign_field,
                alias,
            } => json!({
                "from": from,
                "localField": local_field,
                "foreignField": foreign_field,
                "as": alias,
            }),
            Stage::Unwind(path) => Value::String(format!("${}", path)),
            Stage::Project(fields) => Value::Object(fields.clone()),
        };

        let mut doc = Map::with_capacity(1);
        doc.insert(self.name().to_string(), body);
        Value::Object(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_puts_id_first() {
        let mut accumulators = Map::new();
        accumulators.insert("total".to_string(), json!({"$sum": "$amount"}));
        let stage = Stage::Group {
            key: Value::Null,
            accumulators,
        };
        assert_eq!(
            serde_json::to_string(&stage.to_document()).unwrap(),
            r#"{"$group":{"_id":null,"total":{"$sum":"$amount"}}}"#
        );
    }

    #[test]
    fn test_sort_keeps_call_order() {
        let stage = Stage::Sort(vec![("b".to_string(), -1), ("a".to_string(), 1)]);
        assert_eq!(
            serde_json::to_string(&stage.to_document()).unwrap(),
            r#"{"$sort":{"b":-1,"a":1}}"#
        );
    }

    #[test]
    fn test_unwind_and_lookup() {
        assert_eq!(Stage::Unwind("buyer".to_string()).to_document(), json!({"$unwind": "$buyer"}));
        let lookup = Stage::Lookup {
            from: "customers".to_string(),
            local_field: "customer".to_string(),
            foreign_field: "_id".to_string(),
            alias: "buyer".to_string(),
        };
        assert_eq!(
            lookup.to_document(),
            json!({"$lookup": {"from": "customers", "localField": "customer", "foreignField": "_id", "as": "buyer"}})
        );
    }

    #[test]
    fn test_allow_list() {
        assert!(is_accumulator("$stdDevSamp"));
        assert!(!is_accumulator("$median"));
        assert!(!is_accumulator("sum"));
    }
}

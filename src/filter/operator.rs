//! # Predicate Operators
//!
//! Suffix operators and the `field__op` key convention.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{DbError, DbResult};

/// Separator between field path and operator suffix
pub const OPERATOR_SEPARATOR: &str = "__";

/// Predicate operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Equals (default when no suffix is given)
    Eq,

    /// Greater than
    Gt,

    /// Greater than or equal
    Gte,

    /// Less than
    Lt,

    /// Less than or equal
    Lte,

    /// Value in list
    In,

    /// Value not in list
    Nin,

    /// Regular expression match
    Regex,

    /// Substring match
    Contains,

    /// Field presence
    Exists,
}

impl Operator {
    /// All operators, in suffix-table order
    pub const ALL: [Operator; 10] = [
        Operator::Eq,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::In,
        Operator::Nin,
        Operator::Regex,
        Operator::Contains,
        Operator::Exists,
    ];

    /// Get the suffix string
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::In => "in",
            Operator::Nin => "nin",
            Operator::Regex => "regex",
            Operator::Contains => "contains",
            Operator::Exists => "exists",
        }
    }

    /// Parse a suffix
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == suffix)
    }

    /// Store-native operator key
    pub fn wire_key(&self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::In => "$in",
            Operator::Nin => "$nin",
            Operator::Regex | Operator::Contains => "$regex",
            Operator::Exists => "$exists",
        }
    }

    /// Whether field constraints apply to the operand
    pub fn checks_constraints(&self) -> bool {
        matches!(self, Operator::Eq | Operator::In | Operator::Nin)
    }

    /// Whether the operand is a list of values
    pub fn takes_list(&self) -> bool {
        matches!(self, Operator::In | Operator::Nin)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field/operator/value constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    /// Field path (dotted for nested fields)
    pub field: String,

    /// Comparison operator
    pub operator: Operator,

    /// Operand as given by the caller, before coercion
    pub value: Value,
}

impl Predicate {
    /// Create a new predicate
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Parse a `field__op` key; a key without separator means `eq`
    pub fn parse(key: &str, value: Value) -> DbResult<Self> {
        let (field, operator) = match key.rsplit_once(OPERATOR_SEPARATOR) {
            Some((field, suffix)) => {
                let operator = Operator::from_suffix(suffix).ok_or_else(|| {
                    DbError::validation(
                        key,
                        "one of eq, gt, gte, lt, lte, in, nin, regex, contains, exists",
                        format!("unknown operator suffix '{}'", suffix),
                    )
                })?;
                (field, operator)
            }
            None => (key, Operator::Eq),
        };

        if field.is_empty() || field.starts_with('$') {
            return Err(DbError::validation(
                key,
                "a field name",
                format!("'{}'", field),
            ));
        }

        Ok(Self::new(field, operator, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_default_eq() {
        let p = Predicate::parse("name", json!("Alice")).unwrap();
        assert_eq!(p.field, "name");
        assert_eq!(p.operator, Operator::Eq);
    }

    #[test]
    fn test_parse_suffix() {
        let p = Predicate::parse("age__gte", json!(18)).unwrap();
        assert_eq!(p.field, "age");
        assert_eq!(p.operator, Operator::Gte);

        let p = Predicate::parse("address.city__in", json!(["Oslo"])).unwrap();
        assert_eq!(p.field, "address.city");
        assert_eq!(p.operator, Operator::In);
    }

    #[test]
    fn test_last_separator_wins() {
        let p = Predicate::parse("created__at__lt", json!(5)).unwrap();
        assert_eq!(p.field, "created__at");
        assert_eq!(p.operator, Operator::Lt);
    }

    #[test]
    fn test_unknown_suffix_rejected() {
        let err = Predicate::parse("age__between", json!([1, 2])).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("between"));
    }

    #[test]
    fn test_empty_field_rejected() {
        assert!(Predicate::parse("__gt", json!(1)).is_err());
        assert!(Predicate::parse("$where", json!("1")).is_err());
    }

    #[test]
    fn test_wire_keys() {
        assert_eq!(Operator::Contains.wire_key(), "$regex");
        assert_eq!(Operator::Nin.wire_key(), "$nin");
        assert_eq!(Operator::from_suffix("exists"), Some(Operator::Exists));
        assert_eq!(Operator::from_suffix("ne"), None);
    }
}

//! Field type definitions
//!
//! A field type is a plain data record: a kind that drives coercion and a
//! constraint set checked after coercion. No inheritance; the standard
//! types are named constructors and can be looked up by name.
//!
//! Coercion is lax in the usual places: numeric strings become numbers,
//! integral floats become ints, `"true"`/`"1"`/`"yes"` become booleans and
//! RFC 3339 or `YYYY-MM-DD` strings become normalized UTC timestamps.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::core::{DbError, DbResult};

/// Value kinds understood by coercion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldKind {
    /// UTF-8 string
    String,
    /// 64-bit signed integer
    Int,
    /// 64-bit floating point
    Float,
    /// Boolean
    Bool,
    /// UTC timestamp stored as an RFC 3339 string
    DateTime,
    /// Homogeneous array
    Array {
        /// Element kind (boxed to allow recursive types)
        element: Box<FieldKind>,
    },
    /// Nested object, contents unchecked
    Object,
    /// Anything, passed through untouched
    Any,
}

impl FieldKind {
    /// Returns the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Int => "int",
            FieldKind::Float => "float",
            FieldKind::Bool => "bool",
            FieldKind::DateTime => "datetime",
            FieldKind::Array { .. } => "array",
            FieldKind::Object => "object",
            FieldKind::Any => "any",
        }
    }

    /// Element kind for arrays, the kind itself otherwise
    pub fn scalar(&self) -> &FieldKind {
        match self {
            FieldKind::Array { element } => element,
            other => other,
        }
    }

    /// Coerce a value to this kind
    pub fn coerce(&self, field: &str, value: &Value) -> DbResult<Value> {
        let mismatch = || DbError::validation(field, self.type_name(), describe_value(value));

        match (self, value) {
            (FieldKind::Any, v) => Ok(v.clone()),

            (FieldKind::String, Value::String(_)) => Ok(value.clone()),

            (FieldKind::Int, Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    return Ok(Value::from(i));
                }
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                        Ok(Value::from(f as i64))
                    }
                    _ => Err(mismatch()),
                }
            }
            (FieldKind::Int, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| mismatch()),

            (FieldKind::Float, Value::Number(n)) => n
                .as_f64()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(mismatch),
            (FieldKind::Float, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(mismatch),

            (FieldKind::Bool, Value::Bool(_)) => Ok(value.clone()),
            (FieldKind::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
                _ => Err(mismatch()),
            },
            (FieldKind::Bool, Value::Number(n)) => match n.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(mismatch()),
            },

            (FieldKind::DateTime, Value::String(s)) => parse_timestamp(s)
                .map(|ts| Value::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true)))
                .ok_or_else(mismatch),

            (FieldKind::Array { element }, Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| element.coerce(&format!("{}[{}]", field, i), item))
                .collect::<DbResult<Vec<_>>>()
                .map(Value::Array),

            (FieldKind::Object, Value::Object(_)) => Ok(value.clone()),

            _ => Err(mismatch()),
        }
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Short description of a value for error messages
pub fn describe_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("bool {}", b),
        Value::Number(n) => format!("number {}", n),
        Value::String(s) => format!("string {:?}", s),
        Value::Array(a) => format!("array of {}", a.len()),
        Value::Object(_) => "object".to_string(),
    }
}

/// Constraints checked after coercion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// Minimum length (chars for strings, items for arrays)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    /// Maximum length (chars for strings, items for arrays)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Inclusive numeric lower bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive numeric upper bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Regular expression strings must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// A named field type: coercion kind plus constraints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldType {
    /// Type name ("email", "age", "int", ...)
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(skip)]
    pattern: OnceLock<Regex>,
}

impl PartialEq for FieldType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.kind == other.kind && self.constraints == other.constraints
    }
}

impl FieldType {
    /// Create an unconstrained field type
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            constraints: Constraints::default(),
            pattern: OnceLock::new(),
        }
    }

    /// Set the length bounds
    pub fn length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.constraints.min_length = min;
        self.constraints.max_length = max;
        self
    }

    /// Set the numeric bounds
    pub fn range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.constraints.min = min;
        self.constraints.max = max;
        self
    }

    /// Set a format pattern; the pattern must be a valid regex
    pub fn pattern(mut self, pattern: &str) -> DbResult<Self> {
        let compiled = Regex::new(pattern).map_err(|e| {
            DbError::validation(self.name.clone(), "valid format pattern", e.to_string())
        })?;
        self.constraints.pattern = Some(pattern.to_string());
        self.pattern = OnceLock::new();
        let _ = self.pattern.set(compiled);
        Ok(self)
    }

    /// Coerce a value to this type's kind (no constraint checks)
    pub fn coerce(&self, field: &str, value: &Value) -> DbResult<Value> {
        self.kind.coerce(field, value)
    }

    /// Coerce then check constraints
    pub fn validate(&self, field: &str, value: &Value) -> DbResult<Value> {
        let coerced = self.coerce(field, value)?;
        self.check(field, &coerced)?;
        Ok(coerced)
    }

    /// Check constraints on an already coerced value
    pub fn check(&self, field: &str, value: &Value) -> DbResult<()> {
        let c = &self.constraints;

        let length = match value {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(items) => Some(items.len()),
            _ => None,
        };
        if let Some(len) = length {
            if let Some(min) = c.min_length {
                if len < min {
                    return Err(DbError::validation(
                        field,
                        format!("{} of length >= {}", self.name, min),
                        format!("length {}", len),
                    ));
                }
            }
            if let Some(max) = c.max_length {
                if len > max {
                    return Err(DbError::validation(
                        field,
                        format!("{} of length <= {}", self.name, max),
                        format!("length {}", len),
                    ));
                }
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = c.min {
                if n < min {
                    return Err(DbError::validation(
                        field,
                        format!("{} >= {}", self.name, min),
                        describe_value(value),
                    ));
                }
            }
            if let Some(max) = c.max {
                if n > max {
                    return Err(DbError::validation(
                        field,
                        format!("{} <= {}", self.name, max),
                        describe_value(value),
                    ));
                }
            }
        }

        if let (Some(regex), Value::String(s)) = (self.compiled_pattern()?, value) {
            if !regex.is_match(s) {
                return Err(DbError::validation(
                    field,
                    format!("{} matching the {} format", self.name, self.name),
                    describe_value(value),
                ));
            }
        }

        Ok(())
    }

    fn compiled_pattern(&self) -> DbResult<Option<&Regex>> {
        let Some(source) = &self.constraints.pattern else {
            return Ok(None);
        };
        if let Some(regex) = self.pattern.get() {
            return Ok(Some(regex));
        }
        // Deserialized types arrive without the compiled form
        let compiled = Regex::new(source).map_err(|e| {
            DbError::validation(self.name.clone(), "valid format pattern", e.to_string())
        })?;
        Ok(Some(self.pattern.get_or_init(|| compiled)))
    }

    // ==================
    // Primitive types
    // ==================

    pub fn string() -> Self {
        Self::new("string", FieldKind::String)
    }

    pub fn int() -> Self {
        Self::new("int", FieldKind::Int)
    }

    pub fn float() -> Self {
        Self::new("float", FieldKind::Float)
    }

    pub fn boolean() -> Self {
        Self::new("bool", FieldKind::Bool)
    }

    pub fn datetime() -> Self {
        Self::new("datetime", FieldKind::DateTime)
    }

    pub fn array(element: FieldKind) -> Self {
        Self::new(
            "array",
            FieldKind::Array {
                element: Box::new(element),
            },
        )
    }

    pub fn object() -> Self {
        Self::new("object", FieldKind::Object)
    }

    pub fn any() -> Self {
        Self::new("any", FieldKind::Any)
    }

    // ==================
    // Standard types
    // ==================

    /// Person or entity name, 1-100 chars
    pub fn name() -> Self {
        Self::new("name", FieldKind::String).length(Some(1), Some(100))
    }

    /// Email address
    pub fn email() -> Self {
        Self::new("email", FieldKind::String)
            .length(None, Some(254))
            .with_static_pattern(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
    }

    /// Age in years, 0-150
    pub fn age() -> Self {
        Self::new("age", FieldKind::Int).range(Some(0.0), Some(150.0))
    }

    /// Title, 1-200 chars
    pub fn title() -> Self {
        Self::new("title", FieldKind::String).length(Some(1), Some(200))
    }

    /// Body text, 1-50000 chars
    pub fn content() -> Self {
        Self::new("content", FieldKind::String).length(Some(1), Some(50_000))
    }

    /// Free text up to 1000 chars
    pub fn description() -> Self {
        Self::new("description", FieldKind::String).length(None, Some(1000))
    }

    /// Login handle, 3-30 word characters
    pub fn username() -> Self {
        Self::new("username", FieldKind::String)
            .length(Some(3), Some(30))
            .with_static_pattern(r"^[A-Za-z0-9_]+$")
    }

    /// http(s) URL
    pub fn url() -> Self {
        Self::new("url", FieldKind::String).with_static_pattern(r"^https?://\S+$")
    }

    /// Phone number
    pub fn phone() -> Self {
        Self::new("phone", FieldKind::String).with_static_pattern(r"^\+?[0-9 ()\-]{7,20}$")
    }

    /// Non-negative price
    pub fn price() -> Self {
        Self::new("price", FieldKind::Float).range(Some(0.0), None)
    }

    /// Look a type up by name, case-insensitively
    pub fn builtin(name: &str) -> Option<Self> {
        let ty = match name.to_ascii_lowercase().as_str() {
            "string" | "str" => Self::string(),
            "int" | "integer" => Self::int(),
            "float" | "number" => Self::float(),
            "bool" | "boolean" => Self::boolean(),
            "datetime" => Self::datetime(),
            "object" => Self::object(),
            "any" => Self::any(),
            "name" => Self::name(),
            "email" => Self::email(),
            "age" => Self::age(),
            "title" => Self::title(),
            "content" => Self::content(),
            "description" => Self::description(),
            "username" => Self::username(),
            "url" => Self::url(),
            "phone" => Self::phone(),
            "price" => Self::price(),
            _ => return None,
        };
        Some(ty)
    }

    // Patterns of the standard types are literals known to compile
    fn with_static_pattern(mut self, pattern: &'static str) -> Self {
        self.constraints.pattern = Some(pattern.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_int_coercion() {
        let kind = FieldKind::Int;
        assert_eq!(kind.coerce("age", &json!(18)).unwrap(), json!(18));
        assert_eq!(kind.coerce("age", &json!("18")).unwrap(), json!(18));
        assert_eq!(kind.coerce("age", &json!(18.0)).unwrap(), json!(18));
        assert!(kind.coerce("age", &json!(18.5)).is_err());
        assert!(kind.coerce("age", &json!(true)).is_err());
    }

    #[test]
    fn test_int_coercion_rejects_out_of_range() {
        let kind = FieldKind::Int;
        assert!(kind.coerce("n", &json!(9223372036854775808u64)).is_err());
        assert!(kind.coerce("n", &json!(9.223372036854775808e18)).is_err());
        assert_eq!(
            kind.coerce("n", &json!(i64::MAX)).unwrap(),
            json!(9223372036854775807i64)
        );
        assert_eq!(kind.coerce("n", &json!(-9.223372036854775808e18)).unwrap(), json!(i64::MIN));
    }

    #[test]
    fn test_coercion_error_names_field_and_type() {
        let err = FieldKind::Int.coerce("age", &json!("abc")).unwrap_err();
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
    fn test_bool_coercion() {
        let kind = FieldKind::Bool;
        assert_eq!(kind.coerce("f", &json!("yes")).unwrap(), json!(true));
        assert_eq!(kind.coerce("f", &json!(0)).unwrap(), json!(false));
        assert!(kind.coerce("f", &json!("maybe")).is_err());
    }

    #[test]
    fn test_datetime_normalized() {
        let kind = FieldKind::DateTime;
        assert_eq!(
            kind.coerce("at", &json!("2024-03-01")).unwrap(),
            json!("2024-03-01T00:00:00.000Z")
        );
        assert_eq!(
            kind.coerce("at", &json!("2024-03-01T10:00:00+02:00")).unwrap(),
            json!("2024-03-01T08:00:00.000Z")
        );
    }

    #[test]
    fn test_array_elements_coerced() {
        let kind = FieldKind::Array {
            element: Box::new(FieldKind::Int),
        };
        assert_eq!(kind.coerce("n", &json!(["1", 2])).unwrap(), json!([1, 2]));

        let err = kind.coerce("n", &json!([1, "x"])).unwrap_err();
        assert!(err.to_string().contains("n[1]"));
    }

    #[test]
    fn test_age_range() {
        let age = FieldType::age();
        assert_eq!(age.validate("age", &json!("30")).unwrap(), json!(30));
        assert!(age.validate("age", &json!(-5)).is_err());
        assert!(age.validate("age", &json!(151)).is_err());
    }

    #[test]
    fn test_name_length() {
        let name = FieldType::name();
        assert!(name.validate("name", &json!("Alice")).is_ok());
        assert!(name.validate("name", &json!("")).is_err());
    }

    #[test]
    fn test_email_format() {
        let email = FieldType::email();
        assert!(email.validate("email", &json!("alice@example.com")).is_ok());
        assert!(email.validate("email", &json!("not-an-email")).is_err());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let result = FieldType::string().pattern("([unclosed");
        assert!(matches!(result, Err(DbError::Validation { .. })));
    }

    #[test]
    fn test_builtin_lookup() {
        assert_eq!(FieldType::builtin("Email").unwrap().name, "email");
        assert_eq!(FieldType::builtin("AGE").unwrap().kind, FieldKind::Int);
        assert!(FieldType::builtin("nope").is_none());
    }

    #[test]
    fn test_deserialized_type_checks_pattern() {
        let ty: FieldType = serde_json::from_str(
            r#"{"name": "sku", "type": "string", "constraints": {"pattern": "^[A-Z]{3}-\\d+$"}}"#,
        )
        .unwrap();
        assert!(ty.validate("sku", &json!("ABC-12")).is_ok());
        assert!(ty.validate("sku", &json!("abc")).is_err());
    }
}

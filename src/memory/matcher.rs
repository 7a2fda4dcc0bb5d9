//! Filter document evaluation
//!
//! Evaluates store-native filter documents against JSON documents. A
//! field holding an array matches when the array itself or any element
//! satisfies the condition.

use std::cmp::Ordering;

use regex::RegexBuilder;
use serde_json::{Map, Value};

use super::compare::{compare_values, get_path, same_bracket, values_equal};

/// Whether `doc` satisfies `filter`; errors name the offending operator
pub fn matches(doc: &Value, filter: &Value) -> Result<bool, String> {
    let Value::Object(conditions) = filter else {
        return Err("filter must be an object".to_string());
    };

    for (key, condition) in conditions {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => any_clause(doc, key, condition)?,
            "$nor" => !any_clause(doc, key, condition)?,
            op if op.starts_with('$') => {
                return Err(format!("unknown top level operator: {}", op));
            }
            field => field_matches(get_path(doc, field), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses<'a>(key: &str, condition: &'a Value) -> Result<&'a Vec<Value>, String> {
    condition
        .as_array()
        .ok_or_else(|| format!("{} must be an array", key))
}

fn any_clause(doc: &Value, key: &str, condition: &Value) -> Result<bool, String> {
    for clause in clauses(key, condition)? {
        if matches(doc, clause)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn is_operator_doc(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

fn field_matches(actual: Option<&Value>, condition: &Value) -> Result<bool, String> {
    match condition {
        Value::Object(ops) if is_operator_doc(ops) => operators_match(actual, ops),
        expected => Ok(eq_matches(actual, expected)),
    }
}

fn operators_match(actual: Option<&Value>, ops: &Map<String, Value>) -> Result<bool, String> {
    let options = ops.get("$options").and_then(Value::as_str).unwrap_or("");
    for (op, arg) in ops {
        if op == "$options" {
            continue;
        }
        if !apply(op, actual, arg, options)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Equality, with missing fields equal to null
pub fn eq_matches(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(array @ Value::Array(items)) => {
            values_equal(array, expected) || items.iter().any(|item| values_equal(item, expected))
        }
        Some(value) => values_equal(value, expected),
    }
}

fn candidates(actual: Option<&Value>) -> Vec<&Value> {
    match actual {
        None => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(value) => vec![value],
    }
}

fn compare_any(actual: Option<&Value>, bound: &Value, accept: fn(Ordering) -> bool) -> bool {
    candidates(actual)
        .into_iter()
        .any(|v| same_bracket(v, bound) && accept(compare_values(v, bound)))
}

fn apply(op: &str, actual: Option<&Value>, arg: &Value, options: &str) -> Result<bool, String> {
    let result = match op {
        "$eq" => eq_matches(actual, arg),
        "$ne" => !eq_matches(actual, arg),
        "$gt" => compare_any(actual, arg, |o| o == Ordering::Greater),
        "$gte" => compare_any(actual, arg, |o| o != Ordering::Less),
        "$lt" => compare_any(actual, arg, |o| o == Ordering::Less),
        "$lte" => compare_any(actual, arg, |o| o != Ordering::Greater),
        "$in" => clauses(op, arg)?.iter().any(|item| eq_matches(actual, item)),
        "$nin" => !clauses(op, arg)?.iter().any(|item| eq_matches(actual, item)),
        "$all" => clauses(op, arg)?.iter().all(|item| eq_matches(actual, item)),
        "$exists" => actual.is_some() == truthy(arg),
        "$size" => match (actual, arg.as_u64()) {
            (Some(Value::Array(items)), Some(n)) => items.len() as u64 == n,
            (_, None) => return Err("$size needs a non-negative integer".to_string()),
            _ => false,
        },
        "$regex" => {
            let pattern = arg
                .as_str()
                .ok_or_else(|| "$regex has to be a string".to_string())?;
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(options.contains('i'))
                .multi_line(options.contains('m'))
                .dot_matches_new_line(options.contains('s'))
                .ignore_whitespace(options.contains('x'))
                .build()
                .map_err(|e| format!("invalid regular expression: {}", e))?;
            candidates(actual)
                .into_iter()
                .any(|v| v.as_str().map(|s| regex.is_match(s)).unwrap_or(false))
        }
        "$not" => match arg {
            Value::Object(inner) if is_operator_doc(inner) => !operators_match(actual, inner)?,
            _ => return Err("$not needs an operator document".to_string()),
        },
        other => return Err(format!("unknown operator: {}", other)),
    };
    Ok(result)
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        _ => true,
    }
}

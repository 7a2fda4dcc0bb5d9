//! Aggregation pipeline evaluation
//!
//! Supports `$match`, `$group`, `$sort`, `$limit`, `$skip`, `$lookup`,
//! `$unwind` and `$project`. Stages run strictly in order.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::compare::{compare_optional, compare_values, get_path, remove_path, set_path, values_equal};
use super::matcher::{eq_matches, matches};

/// Run a pipeline; `resolve` returns the documents of a joined collection
pub fn run_pipeline(
    mut docs: Vec<Value>,
    pipeline: &[Value],
    resolve: &dyn Fn(&str) -> Vec<Value>,
) -> Result<Vec<Value>, String> {
    for stage in pipeline {
        let (name, spec) = match stage.as_object() {
            Some(map) if map.len() == 1 => map.iter().next().ok_or("empty stage")?,
            _ => return Err("A pipeline stage specification object must contain exactly one field".to_string()),
        };

        docs = match name.as_str() {
            "$match" => {
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches(&doc, spec)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            "$group" => group(&docs, spec)?,
            "$sort" => {
                sort_documents(&mut docs, spec)?;
                docs
            }
            "$limit" => {
                let n = spec
                    .as_u64()
                    .filter(|n| *n > 0)
                    .ok_or("the limit must be positive")?;
                docs.truncate(n as usize);
                docs
            }
            "$skip" => {
                let n = spec.as_u64().ok_or("the skip must be a non-negative number")?;
                docs.into_iter().skip(n as usize).collect()
            }
            "$lookup" => lookup(docs, spec, resolve)?,
            "$unwind" => unwind(docs, spec)?,
            "$project" => {
                let spec = spec
                    .as_object()
                    .ok_or("$project specification must be an object")?;
                docs.iter()
                    .map(|doc| project(doc, spec))
                    .collect::<Result<Vec<_>, _>>()?
            }
            other => return Err(format!("Unrecognized pipeline stage name: '{}'", other)),
        };
    }
    Ok(docs)
}

/// Evaluate an expression: `"$path"` reads a field, objects evaluate
/// field-wise, anything else is a literal
fn eval_expr(doc: &Value, expr: &Value) -> Option<Value> {
    match expr {
        Value::String(s) if s.starts_with('$') => get_path(doc, &s[1..]).cloned(),
        Value::Object(map) if map.keys().all(|k| !k.starts_with('$')) => {
            let mut out = Map::new();
            for (k, v) in map {
                if let Some(value) = eval_expr(doc, v) {
                    out.insert(k.clone(), value);
                }
            }
            Some(Value::Object(out))
        }
        Value::Object(map) if map.len() == 1 && map.contains_key("$literal") => {
            map.get("$literal").cloned()
        }
        other => Some(other.clone()),
    }
}

// =============================================================================
// $group
// =============================================================================

enum Acc {
    Sum {
        int: i64,
        float: f64,
        saw_float: bool,
    },
    Avg {
        sum: f64,
        n: u64,
    },
    Min(Option<Value>),
    Max(Option<Value>),
    First(Option<Option<Value>>),
    Last(Option<Value>),
    Push(Vec<Value>),
    AddToSet(Vec<Value>),
    StdDev {
        values: Vec<f64>,
        sample: bool,
    },
    Count(u64),
}

impl Acc {
    fn new(op: &str) -> Result<Self, String> {
        Ok(match op {
            "$sum" => Acc::Sum {
                int: 0,
                float: 0.0,
                saw_float: false,
            },
            "$avg" => Acc::Avg { sum: 0.0, n: 0 },
            "$min" => Acc::Min(None),
            "$max" => Acc::Max(None),
            "$first" => Acc::First(None),
            "$last" => Acc::Last(None),
            "$push" => Acc::Push(Vec::new()),
            "$addToSet" => Acc::AddToSet(Vec::new()),
            "$stdDevPop" => Acc::StdDev {
                values: Vec::new(),
                sample: false,
            },
            "$stdDevSamp" => Acc::StdDev {
                values: Vec::new(),
                sample: true,
            },
            "$count" => Acc::Count(0),
            other => return Err(format!("unknown group operator '{}'", other)),
        })
    }

    fn feed(&mut self, value: Option<Value>) {
        match self {
            Acc::Sum {
                int,
                float,
                saw_float,
            } => {
                if let Some(Value::Number(n)) = value {
                    match n.as_i64() {
                        Some(i) if !*saw_float => match int.checked_add(i) {
                            Some(sum) => *int = sum,
                            None => {
                                *saw_float = true;
                                *float += *int as f64 + i as f64;
                                *int = 0;
                            }
                        },
                        _ => {
                            if !*saw_float {
                                *saw_float = true;
                                *float += *int as f64;
                                *int = 0;
                            }
                            *float += n.as_f64().unwrap_or(0.0);
                        }
                    }
                }
            }
            Acc::Avg { sum, n } => {
                if let Some(f) = value.as_ref().and_then(Value::as_f64) {
                    *sum += f;
                    *n += 1;
                }
            }
            Acc::Min(current) => keep_extreme(current, value, Ordering::Less),
            Acc::Max(current) => keep_extreme(current, value, Ordering::Greater),
            Acc::First(first) => {
                if first.is_none() {
                    *first = Some(value);
                }
            }
            Acc::Last(last) => *last = value,
            Acc::Push(items) => items.extend(value),
            Acc::AddToSet(items) => {
                if let Some(v) = value {
                    if !items.iter().any(|i| values_equal(i, &v)) {
                        items.push(v);
                    }
                }
            }
            Acc::StdDev { values, .. } => values.extend(value.as_ref().and_then(Value::as_f64)),
            Acc::Count(n) => *n += 1,
        }
    }

    fn finish(self) -> Value {
        match self {
            Acc::Sum {
                int,
                float,
                saw_float,
            } => {
                if saw_float {
                    Value::from(float)
                } else {
                    Value::from(int)
                }
            }
            Acc::Avg { sum, n } if n > 0 => Value::from(sum / n as f64),
            Acc::Avg { .. } => Value::Null,
            Acc::Min(v) | Acc::Max(v) | Acc::Last(v) => v.unwrap_or(Value::Null),
            Acc::First(v) => v.flatten().unwrap_or(Value::Null),
            Acc::Push(items) | Acc::AddToSet(items) => Value::Array(items),
            Acc::StdDev { values, sample } => {
                let n = values.len();
                if n == 0 || (sample && n < 2) {
                    return Value::Null;
                }
                let mean = values.iter().sum::<f64>() / n as f64;
                let squares = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
                let divisor = if sample { n - 1 } else { n };
                Value::from((squares / divisor as f64).sqrt())
            }
            Acc::Count(n) => Value::from(n),
        }
    }
}

fn keep_extreme(current: &mut Option<Value>, value: Option<Value>, want: Ordering) {
    let Some(v) = value.filter(|v| !v.is_null()) else {
        return;
    };
    let replace = current
        .as_ref()
        .map(|c| compare_values(&v, c) == want)
        .unwrap_or(true);
    if replace {
        *current = Some(v);
    }
}

fn group(docs: &[Value], spec: &Value) -> Result<Vec<Value>, String> {
    let spec = spec
        .as_object()
        .ok_or("a group specification must be an object")?;
    let key_expr = spec
        .get("_id")
        .ok_or("a group specification must include an _id")?;

    let mut fields: Vec<(&str, &str, &Value)> = Vec::new();
    for (name, acc) in spec.iter().filter(|(k, _)| k.as_str() != "_id") {
        let (op, expr) = match acc.as_object() {
            Some(map) if map.len() == 1 => map.iter().next().ok_or("empty accumulator")?,
            _ => return Err(format!("The field '{}' must be an accumulator object", name)),
        };
        Acc::new(op)?;
        fields.push((name.as_str(), op.as_str(), expr));
    }

    let mut groups: Vec<(Value, Vec<Acc>)> = Vec::new();
    for doc in docs {
        let key = eval_expr(doc, key_expr).unwrap_or(Value::Null);
        let idx = match groups.iter().position(|(k, _)| values_equal(k, &key)) {
            Some(i) => i,
            None => {
                let accs = fields
                    .iter()
                    .map(|(_, op, _)| Acc::new(op))
                    .collect::<Result<Vec<_>, _>>()?;
                groups.push((key, accs));
                groups.len() - 1
            }
        };
        for (acc, (_, _, expr)) in groups[idx].1.iter_mut().zip(&fields) {
            acc.feed(eval_expr(doc, expr));
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, accs)| {
            let mut out = Map::new();
            out.insert("_id".to_string(), key);
            for (acc, (name, _, _)) in accs.into_iter().zip(&fields) {
                out.insert(name.to_string(), acc.finish());
            }
            Value::Object(out)
        })
        .collect())
}

// =============================================================================
// $sort / $project
// =============================================================================

/// Stable sort by a `{field: 1 | -1}` specification
pub fn sort_documents(docs: &mut [Value], spec: &Value) -> Result<(), String> {
    let spec = spec.as_object().ok_or("$sort specification must be an object")?;
    let mut keys = Vec::with_capacity(spec.len());
    for (field, dir) in spec {
        match dir.as_i64() {
            Some(1) => keys.push((field.as_str(), false)),
            Some(-1) => keys.push((field.as_str(), true)),
            _ => return Err(format!("$sort key ordering for '{}' must be 1 or -1", field)),
        }
    }

    docs.sort_by(|a, b| {
        for (field, descending) in &keys {
            let ord = compare_optional(get_path(a, field), get_path(b, field));
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(())
}

fn is_flag(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_f64().map(|f| f != 0.0).unwrap_or(true)),
        _ => None,
    }
}

/// Apply an inclusion or exclusion projection
pub fn project(doc: &Value, spec: &Map<String, Value>) -> Result<Value, String> {
    let excluding = spec
        .iter()
        .any(|(k, v)| k != "_id" && is_flag(v) == Some(false));
    let including = spec
        .iter()
        .any(|(k, v)| k != "_id" && is_flag(v) != Some(false));
    if excluding && including {
        return Err("Cannot mix inclusion and exclusion in a projection".to_string());
    }

    if !including {
        let mut out = doc.clone();
        for (field, _) in spec.iter().filter(|(_, v)| is_flag(v) == Some(false)) {
            remove_path(&mut out, field);
        }
        return Ok(out);
    }

    let mut out = Value::Object(Map::new());
    let keep_id = spec.get("_id").map(|v| is_flag(v) != Some(false)).unwrap_or(true);
    if keep_id && !spec.get("_id").map(|v| is_flag(v).is_none()).unwrap_or(false) {
        if let Some(id) = doc.get("_id") {
            set_path(&mut out, "_id", id.clone())?;
        }
    }
    for (field, v) in spec {
        match is_flag(v) {
            Some(false) => {}
            Some(true) if field == "_id" => {}
            Some(true) => {
                if let Some(value) = get_path(doc, field) {
                    set_path(&mut out, field, value.clone())?;
                }
            }
            None => set_path(&mut out, field, eval_expr(doc, v).unwrap_or(Value::Null))?,
        }
    }
    Ok(out)
}

// =============================================================================
// $lookup / $unwind
// =============================================================================

fn string_param<'a>(spec: &'a Value, stage: &str, name: &str) -> Result<&'a str, String> {
    spec.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("{} requires a string '{}'", stage, name))
}

fn lookup(
    docs: Vec<Value>,
    spec: &Value,
    resolve: &dyn Fn(&str) -> Vec<Value>,
) -> Result<Vec<Value>, String> {
    let from = string_param(spec, "$lookup", "from")?;
    let local = string_param(spec, "$lookup", "localField")?;
    let foreign = string_param(spec, "$lookup", "foreignField")?;
    let alias = string_param(spec, "$lookup", "as")?;

    let foreign_docs = resolve(from);
    docs.into_iter()
        .map(|mut doc| {
            let joined: Vec<Value> = {
                let local_value = get_path(&doc, local);
                foreign_docs
                    .iter()
                    .filter(|f| {
                        let fv = get_path(f, foreign);
                        match local_value {
                            Some(Value::Array(items)) => items.iter().any(|i| eq_matches(fv, i)),
                            Some(v) => eq_matches(fv, v),
                            None => eq_matches(fv, &Value::Null),
                        }
                    })
                    .cloned()
                    .collect()
            };
            set_path(&mut doc, alias, Value::Array(joined))?;
            Ok(doc)
        })
        .collect()
}

fn unwind(docs: Vec<Value>, spec: &Value) -> Result<Vec<Value>, String> {
    let (path, preserve) = match spec {
        Value::String(path) => (path.as_str(), false),
        Value::Object(_) => (
            string_param(spec, "$unwind", "path")?,
            spec.get("preserveNullAndEmptyArrays")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        ),
        _ => return Err("$unwind expects a path string or an object".to_string()),
    };
    let field = path
        .strip_prefix('$')
        .ok_or_else(|| format!("$unwind path '{}' must be prefixed with '$'", path))?;

    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        match get_path(&doc, field).cloned() {
            Some(Value::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut copy = doc.clone();
                    set_path(&mut copy, field, item)?;
                    out.push(copy);
                }
            }
            Some(Value::Array(_)) | Some(Value::Null) | None => {
                if preserve {
                    out.push(doc);
                }
            }
            Some(_) => out.push(doc),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn none(_: &str) -> Vec<Value> {
        Vec::new()
    }

    fn orders() -> Vec<Value> {
        vec![
            json!({"_id": 1, "status": "completed", "amount": 10, "customer": "a"}),
            json!({"_id": 2, "status": "completed", "amount": 20, "customer": "b"}),
            json!({"_id": 3, "status": "completed", "amount": 30, "customer": "a"}),
            json!({"_id": 4, "status": "pending", "amount": 99, "customer": "a"}),
        ]
    }

    #[test]
    fn test_match_group_sum() {
        let out = run_pipeline(
            orders(),
            &[
                json!({"$match": {"status": "completed"}}),
                json!({"$group": {"_id": null, "total": {"$sum": "$amount"}}}),
            ],
            &none,
        )
        .unwrap();
        assert_eq!(out, vec![json!({"_id": null, "total": 60})]);
    }

    #[test]
    fn test_group_by_key_keeps_first_appearance_order() {
        let out = run_pipeline(
            orders(),
            &[json!({"$group": {
                "_id": "$customer",
                "n": {"$sum": 1},
                "avg": {"$avg": "$amount"},
                "max": {"$max": "$amount"},
                "statuses": {"$addToSet": "$status"}
            }})],
            &none,
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["_id"], json!("a"));
        assert_eq!(out[0]["n"], json!(3));
        assert_eq!(out[0]["max"], json!(99));
        assert_eq!(out[0]["statuses"], json!(["completed", "pending"]));
        assert_eq!(out[1]["avg"], json!(20.0));
    }

    #[test]
    fn test_sum_mixed_numbers() {
        let docs = vec![json!({"v": 1}), json!({"v": 1.5})];
        let out = run_pipeline(
            docs,
            &[json!({"$group": {"_id": null, "t": {"$sum": "$v"}}})],
            &none,
        )
        .unwrap();
        assert_eq!(out[0]["t"], json!(2.5));
    }

    #[test]
    fn test_std_dev() {
        let docs = vec![json!({"v": 2}), json!({"v": 4}), json!({"v": 4}), json!({"v": 4}), json!({"v": 5}), json!({"v": 5}), json!({"v": 7}), json!({"v": 9})];
        let out = run_pipeline(
            docs,
            &[json!({"$group": {"_id": null, "sd": {"$stdDevPop": "$v"}}})],
            &none,
        )
        .unwrap();
        assert_eq!(out[0]["sd"], json!(2.0));
    }

    #[test]
    fn test_sort_skip_limit() {
        let out = run_pipeline(
            orders(),
            &[
                json!({"$sort": {"amount": -1}}),
                json!({"$skip": 1}),
                json!({"$limit": 2}),
            ],
            &none,
        )
        .unwrap();
        let ids: Vec<&Value> = out.iter().map(|d| &d["_id"]).collect();
        assert_eq!(ids, vec![&json!(3), &json!(2)]);
    }

    #[test]
    fn test_lookup_and_unwind() {
        let customers = |name: &str| {
            assert_eq!(name, "customers");
            vec![
                json!({"_id": "a", "name": "Alice"}),
                json!({"_id": "b", "name": "Bob"}),
            ]
        };
        let out = run_pipeline(
            orders(),
            &[
                json!({"$match": {"_id": 2}}),
                json!({"$lookup": {"from": "customers", "localField": "customer", "foreignField": "_id", "as": "buyer"}}),
                json!({"$unwind": "$buyer"}),
                json!({"$project": {"_id": 0, "amount": 1, "name": "$buyer.name"}}),
            ],
            &customers,
        )
        .unwrap();
        assert_eq!(out, vec![json!({"amount": 20, "name": "Bob"})]);
    }

    #[test]
    fn test_unwind_drops_empty_unless_preserved() {
        let docs = vec![json!({"_id": 1, "xs": []}), json!({"_id": 2, "xs": [1, 2]})];
        let out = run_pipeline(docs.clone(), &[json!({"$unwind": "$xs"})], &none).unwrap();
        assert_eq!(out.len(), 2);

        let out = run_pipeline(
            docs,
            &[json!({"$unwind": {"path": "$xs", "preserveNullAndEmptyArrays": true}})],
            &none,
        )
        .unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_exclusion_projection() {
        let spec = json!({"status": 0, "customer": 0});
        let out = project(&orders()[0], spec.as_object().unwrap()).unwrap();
        assert_eq!(out, json!({"_id": 1, "amount": 10}));
    }

    #[test]
    fn test_mixed_projection_rejected() {
        let spec = json!({"status": 0, "amount": 1});
        assert!(project(&orders()[0], spec.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_unknown_stage() {
        let err = run_pipeline(orders(), &[json!({"$facet": {}})], &none).unwrap_err();
        assert!(err.contains("$facet"));
    }
}

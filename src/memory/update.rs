//! Update operator application

use serde_json::Value;

use super::compare::{get_path, remove_path, set_path, values_equal};

/// Apply an update document in place; returns whether the document changed
pub fn apply_update(doc: &mut Value, update: &Value) -> Result<bool, String> {
    let Value::Object(ops) = update else {
        return Err("update must be an object".to_string());
    };
    if ops.is_empty() || !ops.keys().all(|k| k.starts_with('$')) {
        return Err("update document requires atomic operators".to_string());
    }

    let before = doc.clone();
    for (op, args) in ops {
        let Value::Object(args) = args else {
            return Err(format!("{} needs an object of fields", op));
        };
        for (field, arg) in args {
            if field == "_id" {
                if op == "$set" && get_path(doc, "_id").map(|id| values_equal(id, arg)) == Some(true) {
                    continue;
                }
                return Err("Performing an update on the path '_id' would modify the immutable field '_id'".to_string());
            }
            match op.as_str() {
                "$set" => set_path(doc, field, arg.clone())?,
                "$unset" => {
                    remove_path(doc, field);
                }
                "$inc" => increment(doc, field, arg)?,
                "$push" => push(doc, field, arg, false)?,
                "$addToSet" => push(doc, field, arg, true)?,
                other => return Err(format!("unknown update operator: {}", other)),
            }
        }
    }
    Ok(*doc != before)
}

fn increment(doc: &mut Value, field: &str, by: &Value) -> Result<(), String> {
    let Value::Number(by) = by else {
        return Err(format!("Cannot increment with non-numeric argument: {{{}: {}}}", field, by));
    };
    let next = match get_path(doc, field) {
        None => Value::Number(by.clone()),
        Some(Value::Number(current)) => match (current.as_i64(), by.as_i64()) {
            (Some(a), Some(b)) => match a.checked_add(b) {
                Some(sum) => Value::from(sum),
                None => Value::from(a as f64 + b as f64),
            },
            _ => Value::from(current.as_f64().unwrap_or(0.0) + by.as_f64().unwrap_or(0.0)),
        },
        Some(_) => {
            return Err(format!(
                "Cannot apply $inc to a value of non-numeric type at '{}'",
                field
            ))
        }
    };
    set_path(doc, field, next)
}

fn push(doc: &mut Value, field: &str, arg: &Value, unique: bool) -> Result<(), String> {
    let items: Vec<Value> = match arg.get("$each") {
        Some(Value::Array(each)) => each.clone(),
        Some(_) => return Err("$each requires an array".to_string()),
        None => vec![arg.clone()],
    };

    let mut current = match get_path(doc, field) {
        None => Vec::new(),
        Some(Value::Array(existing)) => existing.clone(),
        Some(_) => {
            return Err(format!(
                "The field '{}' must be an array but is of a different type",
                field
            ))
        }
    };
    for item in items {
        if unique && current.iter().any(|v| values_equal(v, &item)) {
            continue;
        }
        current.push(item);
    }
    set_path(doc, field, Value::Array(current))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_unset() {
        let mut doc = json!({"_id": 1, "a": 1, "b": 2});
        let changed = apply_update(&mut doc, &json!({"$set": {"a": 5, "c.d": 1}, "$unset": {"b": ""}})).unwrap();
        assert!(changed);
        assert_eq!(doc, json!({"_id": 1, "a": 5, "c": {"d": 1}}));
    }

    #[test]
    fn test_unchanged_reports_false() {
        let mut doc = json!({"_id": 1, "a": 1});
        assert!(!apply_update(&mut doc, &json!({"$set": {"a": 1}})).unwrap());
    }

    #[test]
    fn test_inc() {
        let mut doc = json!({"_id": 1, "n": 1});
        apply_update(&mut doc, &json!({"$inc": {"n": 2, "m": 1.5}})).unwrap();
        assert_eq!(doc["n"], json!(3));
        assert_eq!(doc["m"], json!(1.5));

        let mut doc = json!({"_id": 1, "s": "x"});
        assert!(apply_update(&mut doc, &json!({"$inc": {"s": 1}})).is_err());
    }

    #[test]
    fn test_push_and_add_to_set() {
        let mut doc = json!({"_id": 1, "tags": ["a"]});
        apply_update(&mut doc, &json!({"$push": {"tags": "a"}})).unwrap();
        assert_eq!(doc["tags"], json!(["a", "a"]));

        apply_update(&mut doc, &json!({"$addToSet": {"tags": {"$each": ["a", "b"]}}})).unwrap();
        assert_eq!(doc["tags"], json!(["a", "a", "b"]));
    }

    #[test]
    fn test_id_is_immutable() {
        let mut doc = json!({"_id": 1});
        assert!(apply_update(&mut doc, &json!({"$set": {"_id": 2}})).is_err());
        assert!(apply_update(&mut doc, &json!({"a": 1})).is_err());
    }
}

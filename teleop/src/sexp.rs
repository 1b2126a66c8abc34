//! Plist accessors over `lexpr` values.
//!
//! Config files and replay traces are property lists such as
//! `(:hand :left :trigger :fist)`.  Keys may come back from the parser as
//! `Value::Keyword("hand")` or `Value::Symbol(":hand")`; both are accepted.

use lexpr::Value;

/// Find the value that follows `:key` in a plist.
pub fn get_value<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let prefixed = format!(":{}", key);
    let mut current = value;
    while let Value::Cons(pair) = current {
        let is_key = match pair.car() {
            Value::Keyword(k) => k.as_ref() == key,
            Value::Symbol(s) => s.as_ref() == prefixed,
            _ => false,
        };
        if is_key {
            return match pair.cdr() {
                Value::Cons(next) => Some(next.car()),
                _ => None,
            };
        }
        current = pair.cdr();
    }
    None
}

/// Render an atom as a plain string, dropping any leading `:`.
pub fn atom_to_string(val: &Value) -> Option<String> {
    match val {
        Value::Keyword(v) => Some(v.to_string()),
        Value::Symbol(v) => {
            let s = v.to_string();
            Some(s.strip_prefix(':').unwrap_or(&s).to_string())
        }
        Value::String(v) => Some(v.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "t" } else { "nil" }.to_string()),
        Value::Null | Value::Nil => Some("nil".to_string()),
        Value::Cons(_) => None,
        _ => Some(val.to_string()),
    }
}

/// Extract a keyword/atom value from a plist as a string.
pub fn get_keyword(value: &Value, key: &str) -> Option<String> {
    get_value(value, key).and_then(atom_to_string)
}

/// Extract an integer value from a plist.
pub fn get_int(value: &Value, key: &str) -> Option<i64> {
    get_keyword(value, key).and_then(|s| s.parse().ok())
}

/// Extract a floating-point value from a plist.
pub fn get_float(value: &Value, key: &str) -> Option<f64> {
    get_keyword(value, key).and_then(|s| s.parse().ok())
}

/// Extract a boolean value from a plist.  Treats "nil" as false.
pub fn get_bool(value: &Value, key: &str) -> Option<bool> {
    get_keyword(value, key).map(|s| s != "nil")
}

/// Whether a value reads as nil / empty.
pub fn is_nil(value: &Value) -> bool {
    match value {
        Value::Null | Value::Nil | Value::Bool(false) => true,
        Value::Symbol(s) => s.as_ref() == "nil",
        _ => false,
    }
}

/// Elements of a proper list, in order.  Non-lists yield nothing.
pub fn list_items(value: &Value) -> Vec<&Value> {
    let mut items = Vec::new();
    let mut current = value;
    while let Value::Cons(pair) = current {
        items.push(pair.car());
        current = pair.cdr();
    }
    items
}

/// Parse a list of exactly three numbers.
pub fn as_triple(value: &Value) -> Option<[f32; 3]> {
    let items = list_items(value);
    if items.len() != 3 {
        return None;
    }
    let mut out = [0.0f32; 3];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = atom_to_string(item)?.parse().ok()?;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_keyword_from_plist() {
        let v = lexpr::from_str("(:hand :left :trigger :fist)").unwrap();
        assert_eq!(get_keyword(&v, "hand"), Some("left".to_string()));
        assert_eq!(get_keyword(&v, "trigger"), Some("fist".to_string()));
        assert_eq!(get_keyword(&v, "mode"), None);
    }

    #[test]
    fn test_get_keyword_empty_list() {
        let v = lexpr::from_str("()").unwrap();
        assert_eq!(get_keyword(&v, "hand"), None);
    }

    #[test]
    fn test_get_numbers() {
        let v = lexpr::from_str("(:timeout-ms 200 :gain 2.5 :offset -3)").unwrap();
        assert_eq!(get_int(&v, "timeout-ms"), Some(200));
        assert_eq!(get_float(&v, "gain"), Some(2.5));
        assert_eq!(get_int(&v, "offset"), Some(-3));
        assert_eq!(get_int(&v, "gain"), None);
    }

    #[test]
    fn test_get_bool() {
        let v = lexpr::from_str("(:enabled t :verbose nil)").unwrap();
        assert_eq!(get_bool(&v, "enabled"), Some(true));
        assert_eq!(get_bool(&v, "verbose"), Some(false));
    }

    #[test]
    fn test_nested_value_and_items() {
        let v = lexpr::from_str("(:stop (:five :ok) :pos (0.1 -0.2 0.3))").unwrap();
        let stop = get_value(&v, "stop").unwrap();
        let names: Vec<String> = list_items(stop).into_iter().filter_map(atom_to_string).collect();
        assert_eq!(names, vec!["five".to_string(), "ok".to_string()]);

        let pos = as_triple(get_value(&v, "pos").unwrap()).unwrap();
        assert!((pos[0] - 0.1).abs() < 1e-6);
        assert!((pos[1] + 0.2).abs() < 1e-6);
        assert!((pos[2] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_as_triple_wrong_length() {
        let v = lexpr::from_str("(1 2)").unwrap();
        assert!(as_triple(&v).is_none());
    }

    #[test]
    fn test_is_nil() {
        let v = lexpr::from_str("(:right nil :left ())").unwrap();
        assert!(is_nil(get_value(&v, "right").unwrap()));
        assert!(is_nil(get_value(&v, "left").unwrap()));
    }
}

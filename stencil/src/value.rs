//! The runtime data model. Template contexts hold self-describing
//! [`Value`]s; host data enters through `serde` conversion or the `From`
//! impls. Output safety travels with each string value rather than with
//! the ambient autoescape flag alone.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Error, RenderError};

/// Escaping state carried by a string value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Safety {
    /// Subject to the ambient autoescape flag.
    Unsafe,
    /// Never escaped again; produced by `safe`, trusted tags, or a
    /// completed escape.
    Safe,
    /// Escaped on output regardless of the ambient flag; produced by the
    /// lazy `escape` filter.
    MustEscape,
}

/// A host-supplied zero-argument callable. Resolution invokes it when a
/// dotted path lands on it, unless it is flagged `do_not_call` (left in
/// place as an opaque value) or `alters_data` (resolution of the path
/// fails instead of running side effects).
pub struct HostFn {
    func: Box<dyn Fn() -> std::result::Result<Value, RenderError> + Send + Sync>,
    pub do_not_call: bool,
    pub alters_data: bool,
}

impl HostFn {
    pub fn new(
        func: impl Fn() -> std::result::Result<Value, RenderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            func: Box::new(func),
            do_not_call: false,
            alters_data: false,
        }
    }

    #[must_use]
    pub fn do_not_call(mut self) -> Self {
        self.do_not_call = true;
        self
    }

    #[must_use]
    pub fn alters_data(mut self) -> Self {
        self.alters_data = true;
        self
    }

    pub fn call(&self) -> std::result::Result<Value, RenderError> {
        (self.func)()
    }
}

impl fmt::Debug for HostFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFn")
            .field("do_not_call", &self.do_not_call)
            .field("alters_data", &self.alters_data)
            .finish_non_exhaustive()
    }
}

pub type Map = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String, Safety),
    List(Vec<Value>),
    Map(Map),
    Func(Arc<HostFn>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into(), Safety::Unsafe)
    }

    pub fn safe(s: impl Into<String>) -> Self {
        Value::Str(s.into(), Safety::Safe)
    }

    /// Truthiness follows the original engine: null, false, numeric zero
    /// and empty strings/lists/maps are falsy; callables are truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::Str(s, _) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Func(_) => true,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s, _) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(n) => Some(*n as i64),
            Value::Str(s, _) => s.trim().parse().ok(),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            Value::Str(s, _) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// The textual form a template renders for this value, before any
    /// escaping is applied.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(n) => n.to_string(),
            Value::Str(s, _) => s.clone(),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(Value::to_text).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Map(map) => {
                let inner: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", v.to_text()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            Value::Func(_) => String::new(),
        }
    }

    pub fn safety(&self) -> Safety {
        match self {
            Value::Str(_, safety) => *safety,
            // Non-string values stringify to markup-inert text.
            _ => Safety::Safe,
        }
    }

    #[must_use]
    pub fn mark_safe(self) -> Self {
        match self {
            Value::Str(s, _) => Value::Str(s, Safety::Safe),
            other => other,
        }
    }

    #[must_use]
    pub fn mark_for_escaping(self) -> Self {
        match self {
            Value::Str(s, Safety::Safe) => Value::Str(s, Safety::Safe),
            Value::Str(s, _) => Value::Str(s, Safety::MustEscape),
            other => Value::Str(other.to_text(), Safety::MustEscape),
        }
    }

    /// One dotted-path step. The strategies are tried in order: keyed
    /// lookup, integer-index lookup for numeric segments, then
    /// attribute-style lookup (which for maps is the key space again, plus
    /// the `items`/`keys`/`values` views the original exposes on
    /// mappings).
    pub fn lookup(&self, segment: &str) -> Option<Value> {
        // (1) mapping-style keyed lookup
        if let Value::Map(map) = self {
            if let Some(found) = map.get(segment) {
                return Some(found.clone());
            }
        }
        // (2) sequence integer-index lookup
        if let Ok(index) = segment.parse::<usize>() {
            match self {
                Value::List(items) => {
                    if let Some(found) = items.get(index) {
                        return Some(found.clone());
                    }
                }
                Value::Str(s, safety) => {
                    if let Some(c) = s.chars().nth(index) {
                        return Some(Value::Str(c.to_string(), *safety));
                    }
                }
                _ => {}
            }
        }
        // (3) attribute-style lookup
        if let Value::Map(map) = self {
            match segment {
                "items" => {
                    return Some(Value::List(
                        map.iter()
                            .map(|(k, v)| Value::List(vec![Value::str(k.clone()), v.clone()]))
                            .collect(),
                    ));
                }
                "keys" => {
                    return Some(Value::List(
                        map.keys().map(|k| Value::str(k.clone())).collect(),
                    ));
                }
                "values" => {
                    return Some(Value::List(map.values().cloned().collect()));
                }
                _ => {}
            }
        }
        None
    }

    /// The sequence a `for` tag iterates: list items, string characters,
    /// or mapping keys. Everything else iterates as empty.
    pub fn iter_sequence(&self) -> Vec<Value> {
        match self {
            Value::List(items) => items.clone(),
            Value::Str(s, safety) => s
                .chars()
                .map(|c| Value::Str(c.to_string(), *safety))
                .collect(),
            Value::Map(map) => map.keys().map(|k| Value::str(k.clone())).collect(),
            _ => Vec::new(),
        }
    }

    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s, Safety::Unsafe),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

/// Converts any serializable host value into a template [`Value`].
pub fn to_value<T: Serialize>(value: T) -> Result<Value, Error> {
    Ok(Value::from_json(serde_json::to_value(value)?))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            // Numbers compare across representations, like the original.
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            // Safety does not participate in equality.
            (Value::Str(a, _), Value::Str(b, _)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Func(a), Value::Func(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::str("").is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(Value::str("x").is_truthy());
    }

    #[test]
    fn test_lookup_order() {
        let mut map = Map::new();
        map.insert("0".into(), Value::str("keyed"));
        let value = Value::Map(map);
        // Keyed lookup wins over everything for maps.
        assert_eq!(value.lookup("0"), Some(Value::str("keyed")));

        let list = Value::from(vec![10i64, 20]);
        assert_eq!(list.lookup("1"), Some(Value::Int(20)));
        assert_eq!(list.lookup("5"), None);
        assert_eq!(list.lookup("x"), None);
    }

    #[test]
    fn test_map_views() {
        let mut map = Map::new();
        map.insert("a".into(), Value::Int(1));
        let value = Value::Map(map);
        let items = value.lookup("items").unwrap();
        assert_eq!(
            items,
            Value::List(vec![Value::List(vec![Value::str("a"), Value::Int(1)])])
        );
    }

    #[test]
    fn test_numeric_equality() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Int(1), Value::str("1"));
    }

    #[test]
    fn test_from_json_numbers() {
        let v = Value::from_json(serde_json::json!({"a": 1, "b": 1.5}));
        assert_eq!(v.lookup("a"), Some(Value::Int(1)));
        assert_eq!(v.lookup("b"), Some(Value::Float(1.5)));
    }

    #[test]
    fn test_safety_travels() {
        let v = Value::str("<b>").mark_safe();
        assert_eq!(v.safety(), Safety::Safe);
        let v = Value::str("<b>").mark_for_escaping();
        assert_eq!(v.safety(), Safety::MustEscape);
        // Safe values are not downgraded by a later escape mark.
        let v = Value::safe("<b>").mark_for_escaping();
        assert_eq!(v.safety(), Safety::Safe);
    }
}

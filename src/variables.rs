//! Variable scopes
//!
//! Each execution owns a [`Variables`] map. Values are JSON values, so
//! results from services, decisions and expressions all share one
//! representation regardless of where they came from.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::btree_map;
use std::collections::BTreeMap;

/// An ordered variable map keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables(BTreeMap<String, Value>);

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(name.into(), value.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    /// Copy every entry of `other` into this map, overwriting existing keys.
    pub fn merge(&mut self, other: &Variables) {
        for (name, value) in other.iter() {
            self.0.insert(name.clone(), value.clone());
        }
    }

    /// Resolve a dotted path such as `order.customer.name`.
    pub fn lookup_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.0.get(first.as_ref())?;
        for segment in rest {
            current = match current {
                Value::Object(map) => map.get(segment.as_ref())?,
                Value::Array(items) => items.get(segment.as_ref().parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Build from a JSON value; only objects carry variables.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(map.into()),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

impl From<Map<String, Value>> for Variables {
    fn from(map: Map<String, Value>) -> Self {
        Self(map.into_iter().collect())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Variables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<'a> IntoIterator for &'a Variables {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Convert a step id such as `ServiceTask` into the variable key
/// `service_task`.
pub fn underscore(word: &str) -> String {
    let chars: Vec<char> = word.chars().collect();
    let mut out = String::with_capacity(word.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c == '-' || c == ' ' || c == '.' {
            out.push('_');
            continue;
        }
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower)
            {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn underscore_matches_step_id_conventions() {
        assert_eq!(underscore("ServiceTask"), "service_task");
        assert_eq!(underscore("HTTPRequest"), "http_request");
        assert_eq!(underscore("Activity_0abc"), "activity_0abc");
        assert_eq!(underscore("check-prices"), "check_prices");
        assert_eq!(underscore("Task_1A"), "task_1_a");
    }

    #[test]
    fn merge_overwrites_existing_keys() {
        let mut scope: Variables = [("a", json!(1)), ("b", json!("x"))].into_iter().collect();
        let update: Variables = [("b", json!("y")), ("c", json!(true))].into_iter().collect();
        scope.merge(&update);
        assert_eq!(scope.get("a"), Some(&json!(1)));
        assert_eq!(scope.get("b"), Some(&json!("y")));
        assert_eq!(scope.len(), 3);
    }

    #[test]
    fn lookup_path_walks_objects_and_arrays() {
        let scope = Variables::from_value(json!({
            "order": { "lines": [ { "sku": "A-1" } ] }
        }))
        .unwrap();
        assert_eq!(
            scope.lookup_path(&["order", "lines", "0", "sku"]),
            Some(&json!("A-1"))
        );
        assert_eq!(scope.lookup_path(&["order", "missing"]), None);
    }

    #[test]
    fn only_objects_become_variables() {
        assert!(Variables::from_value(json!("plain")).is_none());
        assert_eq!(
            Variables::from_value(json!({"k": 1})).unwrap().to_value(),
            json!({"k": 1})
        );
    }
}

//! State values: the nested, serializable form of an active configuration.
//!
//! A compound node whose active child is atomic is written as the child's key;
//! anything deeper becomes a map from child key to the child's own value.
//! Parallel nodes always map every region, atomic regions to an empty map.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Default delimiter between path segments in state descriptors.
pub const DEFAULT_DELIMITER: &str = ".";

/// Nested description of which states are active.
///
/// # Example
///
/// ```rust
/// use harel::core::StateValue;
///
/// let value: StateValue = serde_json::from_str(r#"{ "red": "walk" }"#).unwrap();
///
/// assert!(value.contains(&StateValue::from_descriptor("red", ".")));
/// assert!(value.contains(&StateValue::from_descriptor("red.walk", ".")));
/// assert!(!value.contains(&StateValue::from_descriptor("red.wait", ".")));
/// assert_eq!(value.to_string(), "red.walk");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    /// An atomic child key
    Leaf(String),
    /// Child key → nested value
    Branch(BTreeMap<String, StateValue>),
}

impl StateValue {
    /// Build a value from a delimited path such as `red.walk`.
    pub fn from_descriptor(descriptor: &str, delimiter: &str) -> Self {
        let segments: Vec<&str> = descriptor
            .split(delimiter)
            .filter(|s| !s.is_empty())
            .collect();
        Self::from_segments(&segments)
    }

    fn from_segments(segments: &[&str]) -> Self {
        match segments {
            [] => StateValue::Branch(BTreeMap::new()),
            [leaf] => StateValue::Leaf((*leaf).to_string()),
            [head, rest @ ..] => {
                let mut map = BTreeMap::new();
                map.insert((*head).to_string(), Self::from_segments(rest));
                StateValue::Branch(map)
            }
        }
    }

    /// Whether `other` describes a subset of the states described by `self`.
    pub fn contains(&self, other: &StateValue) -> bool {
        match (self, other) {
            (StateValue::Leaf(a), StateValue::Leaf(b)) => a == b,
            (StateValue::Branch(map), StateValue::Leaf(b)) => map.contains_key(b),
            (StateValue::Leaf(a), StateValue::Branch(other)) => match other.len() {
                0 => true,
                1 => other
                    .get(a)
                    .is_some_and(|v| matches!(v, StateValue::Branch(m) if m.is_empty())),
                _ => false,
            },
            (StateValue::Branch(map), StateValue::Branch(other)) => {
                other.iter().all(|(key, sub)| match map.get(key) {
                    Some(value) => value.contains(sub),
                    None => false,
                })
            }
        }
    }

    /// Every delimited path described by this value, parents before children.
    pub fn paths(&self, delimiter: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_paths(None, delimiter, &mut out);
        out
    }

    fn collect_paths(&self, prefix: Option<&str>, delimiter: &str, out: &mut Vec<String>) {
        let join = |key: &str| match prefix {
            Some(p) => format!("{p}{delimiter}{key}"),
            None => key.to_string(),
        };
        match self {
            StateValue::Leaf(key) => out.push(join(key)),
            StateValue::Branch(map) => {
                for (key, sub) in map {
                    let path = join(key);
                    out.push(path.clone());
                    sub.collect_paths(Some(&path), delimiter, out);
                }
            }
        }
    }

    /// Paths of the atomic states described by this value.
    pub fn leaves(&self, delimiter: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_leaves(None, delimiter, &mut out);
        out
    }

    fn collect_leaves(&self, prefix: Option<&str>, delimiter: &str, out: &mut Vec<String>) {
        let join = |key: &str| match prefix {
            Some(p) => format!("{p}{delimiter}{key}"),
            None => key.to_string(),
        };
        match self {
            StateValue::Leaf(key) => out.push(join(key)),
            StateValue::Branch(map) if map.is_empty() => {
                if let Some(p) = prefix {
                    out.push(p.to_string());
                }
            }
            StateValue::Branch(map) => {
                for (key, sub) in map {
                    sub.collect_leaves(Some(&join(key)), delimiter, out);
                }
            }
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.leaves(DEFAULT_DELIMITER).join(", "))
    }
}

impl From<&str> for StateValue {
    fn from(descriptor: &str) -> Self {
        StateValue::from_descriptor(descriptor, DEFAULT_DELIMITER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: serde_json::Value) -> StateValue {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn descriptor_builds_nested_value() {
        assert_eq!(
            StateValue::from_descriptor("green", "."),
            StateValue::Leaf("green".into())
        );
        assert_eq!(
            StateValue::from_descriptor("red.walk", "."),
            parse(json!({ "red": "walk" }))
        );
        assert_eq!(
            StateValue::from_descriptor("a/b/c", "/"),
            parse(json!({ "a": { "b": "c" } }))
        );
    }

    #[test]
    fn parallel_value_contains_each_region() {
        let value = parse(json!({ "upload": "pending", "download": { "fetching": {} } }));

        assert!(value.contains(&"upload".into()));
        assert!(value.contains(&"upload.pending".into()));
        assert!(value.contains(&"download.fetching".into()));
        assert!(!value.contains(&"download.done".into()));
        assert!(!value.contains(&"idle".into()));
    }

    #[test]
    fn leaf_does_not_contain_deeper_paths() {
        let value = StateValue::Leaf("green".into());
        assert!(value.contains(&"green".into()));
        assert!(!value.contains(&"green.fast".into()));
        assert!(!value.contains(&"red".into()));
    }

    #[test]
    fn paths_lists_parents_before_children() {
        let value = parse(json!({ "red": "walk" }));
        assert_eq!(value.paths("."), vec!["red".to_string(), "red.walk".to_string()]);
    }

    #[test]
    fn leaves_include_empty_parallel_regions() {
        let value = parse(json!({ "bold": {}, "italic": "on" }));
        assert_eq!(
            value.leaves("."),
            vec!["bold".to_string(), "italic.on".to_string()]
        );
    }

    #[test]
    fn value_roundtrips_through_json() {
        let value = parse(json!({ "red": { "walk": {} }, "aux": "on" }));
        let json = serde_json::to_string(&value).unwrap();
        let back: StateValue = serde_json::from_str(&json).unwrap();
        assert_eq!(value, back);
    }
}

//! Format backends: bytes in, a tree of keyed entries out, and back.
//!
//! A format never sees scopes, layers, or schemes. It turns raw bytes into a
//! flat map of `/`-joined full keys and serializes such a map back. The
//! bundled backends cover properties, JSON and YAML; anything else plugs in
//! through the same trait.

pub mod json;
pub mod properties;
pub mod yaml;

use crate::entry::EntryValue;
use crate::error::{ConfigError, ConfigResult};
use crate::settings::FactorySettings;
use std::collections::BTreeMap;

/// One parsed node: a value plus an optional retained comment.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub value: EntryValue,
    pub comment: Option<String>,
}

impl TreeNode {
    pub fn new(value: EntryValue) -> Self {
        Self {
            value,
            comment: None,
        }
    }
}

/// A parsed configuration body: full keys (`a/b/c`) to nodes.
pub type EntryTree = BTreeMap<String, TreeNode>;

/// Contract every format backend fulfills.
pub trait ConfigFormat: Send + Sync {
    /// Stable short identifier, `[A-Za-z0-9_]+`.
    fn id(&self) -> &'static str;

    /// Filename extensions including the dot, e.g. `".json"`.
    fn extensions(&self) -> &[&'static str];

    /// Whether this format can operate under the given settings.
    fn self_test(&self, _settings: &FactorySettings) -> bool {
        true
    }

    /// Parse raw bytes into a tree of entries.
    fn parse(&self, bytes: &[u8]) -> ConfigResult<EntryTree>;

    /// Serialize a tree back to bytes.
    fn serialize(&self, tree: &EntryTree) -> ConfigResult<Vec<u8>>;
}

// Shared plumbing between the JSON and YAML backends, which both go through
// serde_json's value model.

/// Flatten a JSON-ish value into `/`-joined full keys.
pub(crate) fn flatten_value(value: &serde_json::Value, prefix: &str, out: &mut EntryTree) {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = join_key(prefix, key);
                flatten_value(child, &path, out);
            }
        }
        Value::Array(items) => {
            if items.iter().all(|i| !i.is_object() && !i.is_array()) {
                let list = items.iter().map(render_scalar).collect();
                out.insert(prefix.to_string(), TreeNode::new(EntryValue::List(list)));
            } else {
                // Structured arrays become indexed branches.
                for (index, child) in items.iter().enumerate() {
                    let path = join_key(prefix, &index.to_string());
                    flatten_value(child, &path, out);
                }
            }
        }
        Value::Null => {}
        scalar => {
            out.insert(prefix.to_string(), TreeNode::new(scalar_value(scalar)));
        }
    }
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", prefix, key)
    }
}

fn scalar_value(value: &serde_json::Value) -> EntryValue {
    use serde_json::Value;
    match value {
        Value::Bool(b) => EntryValue::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                EntryValue::Integer(i as i128)
            } else {
                EntryValue::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => EntryValue::Text(s.clone()),
        _ => EntryValue::Text(value.to_string()),
    }
}

fn render_scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Rebuild a nested JSON value from a flat tree.
pub(crate) fn unflatten_tree(tree: &EntryTree) -> ConfigResult<serde_json::Value> {
    use serde_json::{Map, Value};
    let mut root = Map::new();
    for (full_key, node) in tree {
        let segments: Vec<&str> = full_key.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ConfigError::key_format(full_key, "empty path segment"));
        }
        let mut cursor = &mut root;
        for segment in &segments[..segments.len() - 1] {
            let slot = cursor
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                // A leaf and a branch collide on this path; the branch wins.
                *slot = Value::Object(Map::new());
            }
            cursor = slot.as_object_mut().expect("just ensured object");
        }
        let leaf = segments[segments.len() - 1].to_string();
        cursor.insert(leaf, entry_to_json(&node.value));
    }
    Ok(Value::Object(root))
}

fn entry_to_json(value: &EntryValue) -> serde_json::Value {
    use serde_json::Value;
    match value {
        EntryValue::Text(s) => Value::String(s.clone()),
        EntryValue::Integer(i) => match i64::try_from(*i) {
            Ok(v) => Value::from(v),
            Err(_) => Value::String(i.to_string()),
        },
        EntryValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(f.to_string())),
        EntryValue::Boolean(b) => Value::Bool(*b),
        EntryValue::Bytes(b) => {
            use base64::Engine as _;
            Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
        EntryValue::List(items) => {
            Value::Array(items.iter().map(|i| Value::String(i.clone())).collect())
        }
    }
}

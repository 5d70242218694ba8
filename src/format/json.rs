//! JSON format backend, via serde_json.

use super::{ConfigFormat, EntryTree, flatten_value, unflatten_tree};
use crate::error::{ConfigError, ConfigResult};

pub struct JsonFormat {
    _private: (),
}

impl JsonFormat {
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for JsonFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigFormat for JsonFormat {
    fn id(&self) -> &'static str {
        "json"
    }

    fn extensions(&self) -> &[&'static str] {
        &[".json"]
    }

    fn parse(&self, bytes: &[u8]) -> ConfigResult<EntryTree> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| ConfigError::argument_invalid(format!("invalid JSON: {}", e)))?;
        let mut tree = EntryTree::new();
        flatten_value(&value, "", &mut tree);
        Ok(tree)
    }

    fn serialize(&self, tree: &EntryTree) -> ConfigResult<Vec<u8>> {
        let value = unflatten_tree(tree)?;
        let mut out = serde_json::to_vec_pretty(&value)
            .map_err(|e| ConfigError::logic(format!("JSON serialization failed: {}", e)))?;
        out.push(b'\n');
        Ok(out)
    }
}

//! YAML format backend, via serde_yaml.
//!
//! Parses into serde_json's value model so the tree flattening is shared
//! with the JSON backend.

use super::{ConfigFormat, EntryTree, flatten_value, unflatten_tree};
use crate::error::{ConfigError, ConfigResult};

pub struct YamlFormat {
    _private: (),
}

impl YamlFormat {
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for YamlFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigFormat for YamlFormat {
    fn id(&self) -> &'static str {
        "yaml"
    }

    fn extensions(&self) -> &[&'static str] {
        &[".yaml", ".yml"]
    }

    fn parse(&self, bytes: &[u8]) -> ConfigResult<EntryTree> {
        let value: serde_json::Value = serde_yaml::from_slice(bytes)
            .map_err(|e| ConfigError::argument_invalid(format!("invalid YAML: {}", e)))?;
        let mut tree = EntryTree::new();
        flatten_value(&value, "", &mut tree);
        Ok(tree)
    }

    fn serialize(&self, tree: &EntryTree) -> ConfigResult<Vec<u8>> {
        let value = unflatten_tree(tree)?;
        let text = serde_yaml::to_string(&value)
            .map_err(|e| ConfigError::logic(format!("YAML serialization failed: {}", e)))?;
        Ok(text.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryValue;

    #[test]
    fn test_parse_nested_yaml() {
        let input = b"server:\n  port: 9000\n  hosts:\n    - a\n    - b\nflag: true\n";
        let tree = YamlFormat::new().parse(input).unwrap();
        assert_eq!(
            tree.get("server/port").unwrap().value,
            EntryValue::Integer(9000)
        );
        assert_eq!(
            tree.get("server/hosts").unwrap().value,
            EntryValue::List(vec!["a".into(), "b".into()])
        );
        assert_eq!(tree.get("flag").unwrap().value, EntryValue::Boolean(true));
    }

    #[test]
    fn test_round_trip() {
        let format = YamlFormat::new();
        let tree = format.parse(b"a:\n  b: x\nc: 3\n").unwrap();
        let bytes = format.serialize(&tree).unwrap();
        let reparsed = format.parse(&bytes).unwrap();
        assert_eq!(tree, reparsed);
    }

    #[test]
    fn test_invalid_yaml_is_rejected() {
        let err = YamlFormat::new().parse(b"a: [unclosed").unwrap_err();
        assert_eq!(err.reason, crate::error::ErrorReason::ArgumentInvalid);
    }
}

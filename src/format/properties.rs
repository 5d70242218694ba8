//! Flat `key=value` properties files.
//!
//! Comment lines (`#` or `!`) directly above a key are retained as that
//! entry's comment. Keys may use `/` separators for nesting; the file itself
//! stays flat.

use super::{ConfigFormat, EntryTree, TreeNode};
use crate::entry::EntryValue;
use crate::error::{ConfigError, ConfigResult};

pub struct PropertiesFormat {
    _private: (),
}

impl PropertiesFormat {
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for PropertiesFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigFormat for PropertiesFormat {
    fn id(&self) -> &'static str {
        "properties"
    }

    fn extensions(&self) -> &[&'static str] {
        &[".properties", ".conf"]
    }

    fn parse(&self, bytes: &[u8]) -> ConfigResult<EntryTree> {
        let text = std::str::from_utf8(bytes).map_err(|_| {
            ConfigError::argument_invalid("properties file is not valid UTF-8")
        })?;

        let mut tree = EntryTree::new();
        let mut pending_comment: Vec<String> = Vec::new();

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                pending_comment.clear();
                continue;
            }
            if let Some(comment) = trimmed.strip_prefix('#').or_else(|| trimmed.strip_prefix('!')) {
                pending_comment.push(comment.trim().to_string());
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                // Tolerate stray lines; a hard error here would make one bad
                // line kill the whole layer.
                pending_comment.clear();
                continue;
            };
            let key = key.trim().to_string();
            if key.is_empty() {
                pending_comment.clear();
                continue;
            }
            let mut node = TreeNode::new(EntryValue::Text(value.trim().to_string()));
            if !pending_comment.is_empty() {
                node.comment = Some(pending_comment.join("\n"));
                pending_comment.clear();
            }
            tree.insert(key, node);
        }
        Ok(tree)
    }

    fn serialize(&self, tree: &EntryTree) -> ConfigResult<Vec<u8>> {
        let mut out = String::new();
        for (key, node) in tree {
            if let Some(comment) = &node.comment {
                for line in comment.lines() {
                    out.push_str("# ");
                    out.push_str(line);
                    out.push('\n');
                }
            }
            let rendered = node.value.to_text().ok_or_else(|| {
                ConfigError::conversion(key, "properties text")
            })?;
            out.push_str(key);
            out.push('=');
            out.push_str(&rendered);
            out.push('\n');
        }
        Ok(out.into_bytes())
    }
}

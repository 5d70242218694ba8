//! Tree cursor over the merged, flattened key space of a configuration.
//!
//! The cursor walks map and list nodes without the caller knowing which
//! physical layer holds which branch. It is snapshot-based: the set of keys
//! at the current level is recomputed from the flattened merged key set on
//! every structural move, not diffed incrementally.

use crate::entry::{ConfigEntry, EntryType, EntryValue};
use crate::error::{ConfigError, ConfigResult};
use crate::layered::LayeredConfiguration;
use crate::scope::{Scope, ScopeSet};
use std::sync::Arc;
use tracing::warn;

pub struct ConfigCursor {
    config: Arc<LayeredConfiguration>,
    path_stack: Vec<String>,
    current_level_path: String,
    current_level_keys: Option<Vec<String>>,
    /// Position within the level; `None` before the first `move_next`.
    index: Option<usize>,
    /// Materialized values while positioned inside a list-typed entry.
    current_list: Option<Vec<String>>,
    in_list_mode: bool,
}

impl ConfigCursor {
    pub fn new(config: Arc<LayeredConfiguration>) -> Self {
        Self {
            config,
            path_stack: Vec::new(),
            current_level_path: String::new(),
            current_level_keys: None,
            index: None,
            current_list: None,
            in_list_mode: false,
        }
    }

    /// Back to the root, as freshly created.
    pub fn reset(&mut self) {
        self.path_stack.clear();
        self.current_level_path.clear();
        self.current_level_keys = None;
        self.index = None;
        self.current_list = None;
        self.in_list_mode = false;
    }

    pub fn can_write(&self) -> bool {
        self.config.is_writeable().unwrap_or(false)
    }

    pub fn is_empty(&self) -> ConfigResult<bool> {
        self.config.is_empty()
    }

    fn full_path(&self, key: &str) -> String {
        if self.current_level_path.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.current_level_path, key)
        }
    }

    fn collect_keys_at_current_level(&self) -> ConfigResult<Vec<String>> {
        if self.in_list_mode {
            let len = self.current_list.as_ref().map(|l| l.len()).unwrap_or(0);
            return Ok((0..len).map(|i| i.to_string()).collect());
        }
        let all_keys = self.config.all_keys_flattened(ScopeSet::all())?;
        let mut level_keys: Vec<String> = Vec::new();
        for full_key in all_keys {
            let child = if self.current_level_path.is_empty() {
                full_key.split('/').next().map(str::to_string)
            } else if let Some(rest) =
                full_key.strip_prefix(&format!("{}/", self.current_level_path))
            {
                rest.split('/').next().map(str::to_string)
            } else {
                None
            };
            if let Some(child) = child {
                if !level_keys.contains(&child) {
                    level_keys.push(child);
                }
            }
        }
        Ok(level_keys)
    }

    fn refresh_level_keys(&mut self) -> ConfigResult<()> {
        self.current_level_keys = Some(self.collect_keys_at_current_level()?);
        Ok(())
    }

    fn current_key(&self) -> Option<&str> {
        let keys = self.current_level_keys.as_ref()?;
        keys.get(self.index?).map(|k| k.as_str())
    }

    /// Is the current position a branch node (no direct leaf entry at its
    /// accumulated path)?
    pub fn is_on_map(&self) -> ConfigResult<bool> {
        let Some(key) = self.current_key() else {
            // At a level root.
            return Ok(true);
        };
        let path = self.full_path(key);
        Ok(self.config.entry(&path, ScopeSet::all())?.is_none())
    }

    pub fn is_on_leaf(&self) -> ConfigResult<bool> {
        let Some(key) = self.current_key() else {
            return Ok(false);
        };
        let path = self.full_path(key);
        Ok(self.config.entry(&path, ScopeSet::all())?.is_some())
    }

    /// Is the current position a list-typed leaf?
    pub fn is_on_list(&self) -> ConfigResult<bool> {
        if self.index.is_none() || self.in_list_mode {
            // Nested lists are handled by a further enter().
            return Ok(false);
        }
        match self.current_element()? {
            Some(entry) => Ok(matches!(
                entry.entry_type(),
                EntryType::MultipleStrings | EntryType::EnumSet
            ) && entry.is_leaf()),
            None => Ok(false),
        }
    }

    pub fn has_next(&self) -> bool {
        let len = if self.in_list_mode {
            self.current_list.as_ref().map(|l| l.len()).unwrap_or(0)
        } else {
            match &self.current_level_keys {
                Some(keys) => keys.len(),
                None => return false,
            }
        };
        match self.index {
            Some(index) => index + 1 < len,
            None => len > 0,
        }
    }

    /// Advance within the current level (or list); false at the end.
    pub fn move_next(&mut self) -> bool {
        if !self.has_next() {
            return false;
        }
        self.index = Some(match self.index {
            Some(index) => index + 1,
            None => 0,
        });
        true
    }

    pub fn can_enter(&self) -> ConfigResult<bool> {
        Ok(self.is_on_map()? || self.is_on_list()?)
    }

    pub fn can_leave(&self) -> bool {
        !self.path_stack.is_empty() || self.in_list_mode
    }

    /// Enter the branch or list at the current position. Entering a map
    /// re-derives the level's keys from the flattened key set; entering a
    /// list materializes its values under synthetic index keys "0", "1", …
    pub fn enter(&mut self) -> ConfigResult<bool> {
        if self.is_on_list()? {
            let entry = self
                .current_element()?
                .ok_or_else(|| ConfigError::logic("list position without entry"))?;
            let values = entry.as_string_list()?;
            let key = self
                .current_key()
                .ok_or_else(|| ConfigError::logic("list position without key"))?
                .to_string();
            self.path_stack.push(key);
            self.current_level_path = self.path_stack.join("/");
            self.current_list = Some(values);
            self.in_list_mode = true;
            self.index = None;
            return Ok(true);
        }

        if self.is_on_map()? {
            if let Some(key) = self.current_key().map(str::to_string) {
                self.path_stack.push(key);
                self.current_level_path = self.path_stack.join("/");
            }
            self.refresh_level_keys()?;
            self.index = None;
            return Ok(!self
                .current_level_keys
                .as_ref()
                .map(|k| k.is_empty())
                .unwrap_or(true));
        }
        Ok(false)
    }

    /// Go back up one level. Afterwards the cursor is positioned ON the node
    /// it just exited, not above it.
    pub fn leave(&mut self) -> ConfigResult<bool> {
        if self.in_list_mode {
            self.in_list_mode = false;
            self.current_list = None;
            let left_key = self
                .path_stack
                .pop()
                .ok_or_else(|| ConfigError::logic("list mode without path entry"))?;
            self.current_level_path = self.path_stack.join("/");
            self.refresh_level_keys()?;
            self.index = self.position_of(&left_key);
            return Ok(true);
        }

        if !self.can_leave() {
            return Ok(false);
        }
        let left_key = self.path_stack.pop().expect("checked non-empty");
        self.current_level_path = self.path_stack.join("/");
        self.refresh_level_keys()?;
        self.index = self.position_of(&left_key);
        Ok(true)
    }

    fn position_of(&self, key: &str) -> Option<usize> {
        self.current_level_keys
            .as_ref()?
            .iter()
            .position(|k| k == key)
    }

    /// Move to a key at the current level, case-insensitively.
    ///
    /// Only single-segment keys at the current level are matched; paths with
    /// separators are not resolved. This restriction is deliberate.
    pub fn move_to(&mut self, key: &str) -> ConfigResult<bool> {
        if key.is_empty() {
            return Ok(false);
        }
        if self.current_level_keys.is_none() {
            self.refresh_level_keys()?;
        }
        let position = self
            .current_level_keys
            .as_ref()
            .expect("just refreshed")
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(key));
        match position {
            Some(position) => {
                self.index = Some(position);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The entry at the current position: the real leaf entry, a synthetic
    /// map placeholder for branches, or a synthetic list item in list mode.
    /// All three forms share the `ConfigEntry` contract; only the leaf form
    /// is meaningfully readable and writable.
    pub fn current_element(&self) -> ConfigResult<Option<ConfigEntry>> {
        if self.in_list_mode {
            let (Some(list), Some(index)) = (&self.current_list, self.index) else {
                return Ok(None);
            };
            let Some(value) = list.get(index) else {
                return Ok(None);
            };
            let list_key = self
                .path_stack
                .last()
                .cloned()
                .unwrap_or_default();
            // The list's own entry supplies item type and scope.
            let list_entry = self.config.entry(&self.current_level_path, ScopeSet::all())?;
            let (item_type, scope) = match &list_entry {
                Some(entry) => (
                    if entry.entry_type() == EntryType::EnumSet {
                        EntryType::Enum
                    } else {
                        EntryType::String
                    },
                    entry.scope(),
                ),
                None => (EntryType::String, Scope::Product),
            };
            return Ok(Some(ConfigEntry::list_item(
                list_key, index, value, item_type, scope,
            )));
        }

        let Some(key) = self.current_key().map(str::to_string) else {
            return Ok(None);
        };
        let path = self.full_path(&key);
        match self.config.entry(&path, ScopeSet::all())? {
            Some(entry) => {
                if entry.key() != key {
                    // Leaf entries carry their simple key through the cursor.
                    Ok(Some(entry.with_simple_key(key)))
                } else {
                    Ok(Some(entry))
                }
            }
            None => Ok(Some(ConfigEntry::map_node(key))),
        }
    }

    /// Remove the current entry: an empty-string put at its owning scope.
    /// True storage-level deletion is a storage concern; this is documented
    /// soft-delete behavior.
    pub fn remove(&mut self) -> ConfigResult<()> {
        if !self.can_write() {
            return Err(ConfigError::not_writeable("cursor target is not writable"));
        }
        let Some(key) = self.current_key().map(str::to_string) else {
            return Err(ConfigError::argument_invalid(
                "remove() without current element (call move_next first)",
            ));
        };
        let scope = self
            .current_element()?
            .filter(|e| e.is_leaf())
            .map(|e| e.scope())
            .unwrap_or(Scope::User);
        let path = self.full_path(&key);
        self.config.put(&path, EntryValue::Text(String::new()), scope)?;
        self.refresh_level_keys()
    }

    /// Overwrite the value at the current position, through to the layer the
    /// entry came from.
    pub fn set_value(&mut self, value: EntryValue) -> ConfigResult<()> {
        if self.in_list_mode {
            return Err(ConfigError::not_writeable(
                "writing list items through the cursor is not supported",
            ));
        }
        let Some(key) = self.current_key().map(str::to_string) else {
            return Err(ConfigError::argument_invalid(
                "set_value() without current element (call move_next first)",
            ));
        };
        match self.current_element()?.filter(|e| e.is_leaf()) {
            Some(entry) => entry.write_back(value),
            None => {
                // No resolvable owner; volatile runtime scope is the safe
                // fallback target.
                let path = self.full_path(&key);
                warn!("cursor set_value falling back to RUNTIME scope for '{}'", path);
                self.config.put(&path, value, Scope::Runtime)
            }
        }
    }

    /// Write a key below the current level, then refresh the level's key
    /// cache so new siblings become visible without an enter/leave round
    /// trip.
    pub fn put(&mut self, key: &str, value: EntryValue, scope: Scope) -> ConfigResult<()> {
        let path = self.full_path(key);
        self.config.put(&path, value, scope)?;
        self.refresh_level_keys()
    }
}

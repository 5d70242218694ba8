//! Configuration layers: one physically-loaded body of entries at one scope.
//!
//! A layer is produced by a storage backend from one location. The merge
//! engine only ever talks to the [`ConfigLayer`] contract; whether entries
//! came from a parsed file, process memory, or the environment is invisible
//! above this line.

use crate::entry::{EntryValue, RawEntry};
use crate::error::{ConfigError, ConfigResult};
use crate::format::{ConfigFormat, EntryTree, TreeNode};
use crate::location::ConfigLocation;
use crate::scope::Scope;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// One loaded body of key/value data at one scope, backed by one source.
pub trait ConfigLayer: Send + Sync {
    fn scope(&self) -> Scope;

    /// The location this layer was materialized from.
    fn source(&self) -> &ConfigLocation;

    fn is_writeable(&self) -> bool;

    fn is_empty(&self) -> bool;

    /// Look up one entry by full key.
    fn get(&self, full_key: &str) -> Option<RawEntry>;

    /// All full keys in this layer, or `None` when the backing storage
    /// cannot enumerate.
    fn keys(&self) -> Option<Vec<String>>;

    /// Write or overwrite one entry.
    fn write(&self, full_key: &str, value: EntryValue, comment: Option<&str>) -> ConfigResult<()>;

    /// Persist pending changes; returns how many entries were flushed.
    fn flush(&self) -> ConfigResult<usize>;
}

/// Writable in-memory layer. Used for the RUNTIME scope and as the base of
/// environment-derived layers; contents are lost when the layer is dropped.
pub struct MemoryLayer {
    scope: Scope,
    source: ConfigLocation,
    writeable: bool,
    entries: Mutex<BTreeMap<String, RawEntry>>,
}

impl MemoryLayer {
    pub fn new(scope: Scope, source: ConfigLocation, writeable: bool) -> Self {
        Self {
            scope,
            source,
            writeable,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Pre-populate with entries, e.g. from the environment.
    pub fn with_entries(self, entries: BTreeMap<String, RawEntry>) -> Self {
        *self.entries.lock() = entries;
        self
    }
}

impl ConfigLayer for MemoryLayer {
    fn scope(&self) -> Scope {
        self.scope
    }

    fn source(&self) -> &ConfigLocation {
        &self.source
    }

    fn is_writeable(&self) -> bool {
        self.writeable
    }

    fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn get(&self, full_key: &str) -> Option<RawEntry> {
        self.entries.lock().get(full_key).cloned()
    }

    fn keys(&self) -> Option<Vec<String>> {
        Some(self.entries.lock().keys().cloned().collect())
    }

    fn write(&self, full_key: &str, value: EntryValue, comment: Option<&str>) -> ConfigResult<()> {
        if !self.writeable {
            return Err(ConfigError::not_writeable(format!(
                "memory layer at {} is read-only",
                self.source
            )));
        }
        let mut raw = RawEntry::new(value);
        if let Some(c) = comment {
            raw = raw.with_comment(c);
        }
        self.entries.lock().insert(full_key.to_string(), raw);
        Ok(())
    }

    fn flush(&self) -> ConfigResult<usize> {
        // Nothing to persist; memory is the storage.
        Ok(0)
    }
}

/// The always-present, lowest-priority layer holding scheme-declared
/// defaults. Refuses external writes so a PRODUCT-scope put cannot silently
/// land in volatile memory; seeding goes through [`DefaultLayer::seed_default`].
pub struct DefaultLayer {
    source: ConfigLocation,
    entries: Mutex<BTreeMap<String, RawEntry>>,
}

impl DefaultLayer {
    pub fn new() -> Self {
        Self {
            source: ConfigLocation::new(Scope::Product, "defaults", false),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Install one scheme-declared default.
    pub fn seed_default(&self, key: &str, value: EntryValue, description: Option<&str>) {
        let mut raw = RawEntry::new(value);
        if let Some(d) = description {
            raw = raw.with_comment(d);
        }
        self.entries.lock().insert(key.to_string(), raw);
    }

    /// Drop all previously seeded defaults.
    pub fn clear_defaults(&self) {
        self.entries.lock().clear();
    }
}

impl Default for DefaultLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLayer for DefaultLayer {
    fn scope(&self) -> Scope {
        Scope::Product
    }

    fn source(&self) -> &ConfigLocation {
        &self.source
    }

    fn is_writeable(&self) -> bool {
        false
    }

    fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn get(&self, full_key: &str) -> Option<RawEntry> {
        self.entries.lock().get(full_key).cloned()
    }

    fn keys(&self) -> Option<Vec<String>> {
        Some(self.entries.lock().keys().cloned().collect())
    }

    fn write(&self, _full_key: &str, _value: EntryValue, _comment: Option<&str>) -> ConfigResult<()> {
        Err(ConfigError::not_writeable("default layer is read-only"))
    }

    fn flush(&self) -> ConfigResult<usize> {
        Ok(0)
    }
}

/// A layer parsed from one file; writes go through its format back to disk.
pub struct FileLayer {
    scope: Scope,
    source: ConfigLocation,
    path: PathBuf,
    format: Arc<dyn ConfigFormat>,
    writeable: bool,
    write_comments: bool,
    entries: Mutex<BTreeMap<String, RawEntry>>,
    /// Keys written to memory whose persist attempt failed; retried on flush.
    dirty: Mutex<HashSet<String>>,
}

impl FileLayer {
    pub fn new(
        scope: Scope,
        source: ConfigLocation,
        path: PathBuf,
        format: Arc<dyn ConfigFormat>,
        writeable: bool,
        write_comments: bool,
        tree: EntryTree,
    ) -> Self {
        let entries = tree
            .into_iter()
            .map(|(key, node)| {
                let mut raw = RawEntry::new(node.value);
                raw.comment = node.comment;
                (key, raw)
            })
            .collect();
        Self {
            scope,
            source,
            path,
            format,
            writeable,
            write_comments,
            entries: Mutex::new(entries),
            dirty: Mutex::new(HashSet::new()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Serialize the current entry map through the format and write the file.
    fn persist(&self) -> ConfigResult<()> {
        let tree: EntryTree = self
            .entries
            .lock()
            .iter()
            .map(|(key, raw)| {
                (
                    key.clone(),
                    TreeNode {
                        value: raw.value.clone(),
                        comment: if self.write_comments {
                            raw.comment.clone()
                        } else {
                            None
                        },
                    },
                )
            })
            .collect();
        let bytes = self.format.serialize(&tree)?;
        std::fs::write(&self.path, bytes).map_err(|e| {
            ConfigError::not_writeable(format!("cannot write {}: {}", self.path.display(), e))
                .with_location(self.source.location_string())
        })
    }
}

impl ConfigLayer for FileLayer {
    fn scope(&self) -> Scope {
        self.scope
    }

    fn source(&self) -> &ConfigLocation {
        &self.source
    }

    fn is_writeable(&self) -> bool {
        self.writeable
    }

    fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn get(&self, full_key: &str) -> Option<RawEntry> {
        self.entries.lock().get(full_key).cloned()
    }

    fn keys(&self) -> Option<Vec<String>> {
        Some(self.entries.lock().keys().cloned().collect())
    }

    fn write(&self, full_key: &str, value: EntryValue, comment: Option<&str>) -> ConfigResult<()> {
        if !self.writeable {
            return Err(ConfigError::not_writeable(format!(
                "file layer {} is read-only",
                self.source
            ))
            .with_key(full_key));
        }
        {
            let mut raw = RawEntry::new(value);
            if let Some(c) = comment {
                raw = raw.with_comment(c);
            }
            self.entries.lock().insert(full_key.to_string(), raw);
        }
        // Write-through, so external observers (and the change checker) see
        // the update without waiting for an explicit flush.
        match self.persist() {
            Ok(()) => {
                self.dirty.lock().remove(full_key);
                Ok(())
            }
            Err(e) => {
                self.dirty.lock().insert(full_key.to_string());
                Err(e)
            }
        }
    }

    fn flush(&self) -> ConfigResult<usize> {
        let pending = {
            let dirty = self.dirty.lock();
            dirty.len()
        };
        if pending == 0 {
            return Ok(0);
        }
        self.persist()?;
        self.dirty.lock().clear();
        Ok(pending)
    }
}

impl Drop for FileLayer {
    fn drop(&mut self) {
        let pending = self.dirty.lock().len();
        if pending > 0 {
            if let Err(e) = self.persist() {
                warn!("dropping file layer with {} unflushed entries: {}", pending, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_layer(scope: Scope, writeable: bool) -> MemoryLayer {
        MemoryLayer::new(scope, ConfigLocation::new(scope, "RAM", writeable), writeable)
    }

    #[test]
    fn test_memory_layer_round_trip() {
        let layer = memory_layer(Scope::Runtime, true);
        assert!(layer.is_empty());
        layer
            .write("a/b", EntryValue::Text("v".into()), None)
            .unwrap();
        assert!(!layer.is_empty());
        let raw = layer.get("a/b").unwrap();
        assert_eq!(raw.value, EntryValue::Text("v".into()));
        assert_eq!(layer.keys().unwrap(), vec!["a/b".to_string()]);
    }

    #[test]
    fn test_memory_layer_read_only() {
        let layer = memory_layer(Scope::Session, false);
        let err = layer
            .write("k", EntryValue::Text("v".into()), None)
            .unwrap_err();
        assert_eq!(err.reason, crate::error::ErrorReason::NotWriteable);
    }

    #[test]
    fn test_default_layer_refuses_external_writes() {
        let layer = DefaultLayer::new();
        assert!(layer
            .write("k", EntryValue::Text("v".into()), None)
            .is_err());
        layer.seed_default("k", EntryValue::Text("seeded".into()), Some("why"));
        let raw = layer.get("k").unwrap();
        assert_eq!(raw.value, EntryValue::Text("seeded".into()));
        assert_eq!(raw.comment.as_deref(), Some("why"));
        layer.clear_defaults();
        assert!(layer.is_empty());
    }

    #[test]
    fn test_file_layer_write_through() {
        use crate::format::properties::PropertiesFormat;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("app.properties");
        std::fs::write(&path, "existing=1\n").unwrap();

        let format: Arc<dyn ConfigFormat> = Arc::new(PropertiesFormat::new());
        let tree = format.parse(&std::fs::read(&path).unwrap()).unwrap();
        let source =
            ConfigLocation::new(Scope::User, "files", true).with_handle(path.clone());
        let layer = FileLayer::new(
            Scope::User,
            source,
            path.clone(),
            format,
            true,
            false,
            tree,
        );

        layer
            .write("added", EntryValue::Text("2".into()), None)
            .unwrap();

        // The write is already on disk; flush has nothing left to do.
        assert_eq!(layer.flush().unwrap(), 0);
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("existing=1"));
        assert!(content.contains("added=2"));
    }
}

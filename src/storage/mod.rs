//! Storage backends: where configuration bodies physically live.
//!
//! A storage contributes candidate locations to the search list, turns
//! (name, location) pairs into loaded layers, can create new writable layers
//! on demand, and answers the change checker's "did this location change"
//! probe. The bundled backends are the filesystem, process memory (RUNTIME),
//! and environment variables (SESSION).

pub mod env;
pub mod filesystem;
pub mod memory;
pub mod watcher;

use crate::error::{ConfigError, ConfigResult};
use crate::layer::ConfigLayer;
use crate::location::ConfigLocation;
use crate::scheme::ConfigScheme;
use crate::scope::Scope;
use crate::search::SearchList;
use crate::settings::FactorySettings;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Metadata about one discoverable configuration at one location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigDiscoveryInfo {
    pub name: String,
    pub scope: Scope,
    pub format_id: String,
    pub writeable: bool,
}

/// Contract every storage backend fulfills.
pub trait ConfigStorage: Send + Sync {
    /// Stable short identifier, `[A-Za-z0-9_]+`.
    fn id(&self) -> &'static str;

    /// Whether this storage can operate under the given settings.
    fn self_test(&self, _settings: &FactorySettings) -> bool {
        true
    }

    /// Capability: can this storage write at all, anywhere.
    fn is_generally_writeable(&self) -> bool;

    /// Contribute candidate locations (defaults, builder-supplied extras,
    /// test-mode directories) to the search list.
    fn contribute_locations(&self, settings: &FactorySettings, list: &mut SearchList);

    /// Read zero or more layers for a configuration name at one location.
    ///
    /// Layers are returned in loading order; the layered configuration's
    /// `add` gives layers registered later within a scope higher priority,
    /// so e.g. fragment layers follow their base file here.
    fn read_layers(&self, name: &str, location: &ConfigLocation) -> Vec<Arc<dyn ConfigLayer>>;

    /// Create a new writable layer at a location, making directories as
    /// needed.
    fn create_layer(
        &self,
        name: &str,
        location: &ConfigLocation,
        scheme: &ConfigScheme,
    ) -> ConfigResult<Arc<dyn ConfigLayer>>;

    /// Cheap storage-specific check whether a location changed since this
    /// was last asked.
    fn has_changed(&self, location: &ConfigLocation) -> bool;

    /// Enumerate configurations discoverable at a location.
    fn list_configurations(&self, _location: &ConfigLocation) -> Vec<ConfigDiscoveryInfo> {
        Vec::new()
    }

    /// Raw-blob side channel: read the single byte body for a name.
    fn read_blob(&self, _name: &str, _location: &ConfigLocation) -> Option<Vec<u8>> {
        None
    }

    /// Raw-blob side channel: write the single byte body for a name.
    fn write_blob(
        &self,
        _name: &str,
        _location: &ConfigLocation,
        _bytes: &[u8],
    ) -> ConfigResult<()> {
        Err(ConfigError::not_writeable("storage has no blob support"))
    }
}

/// Editor/OS artifact files that are never discovered as configurations
/// nor as fragments.
pub fn is_ghost_file(file_name: &str) -> bool {
    file_name.ends_with('~')
        || file_name.ends_with(".bak")
        || file_name.ends_with(".swp")
        || file_name.ends_with(".tmp")
        || file_name.eq_ignore_ascii_case("Thumbs.db")
        || file_name == ".DS_Store"
}

/// Validates storage and format identifiers.
pub fn is_valid_component_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Storages that passed self-test, resolvable by id.
pub struct StorageRegistry {
    by_id: HashMap<String, Arc<dyn ConfigStorage>>,
    ordered: Vec<Arc<dyn ConfigStorage>>,
}

impl StorageRegistry {
    pub fn new(storages: Vec<Arc<dyn ConfigStorage>>) -> Self {
        let mut by_id = HashMap::new();
        let mut ordered = Vec::new();
        for storage in storages {
            if !is_valid_component_id(storage.id()) {
                warn!("ignoring storage with invalid id '{}'", storage.id());
                continue;
            }
            if by_id
                .insert(storage.id().to_string(), storage.clone())
                .is_some()
            {
                warn!("duplicate storage id '{}', later registration wins", storage.id());
                ordered.retain(|s: &Arc<dyn ConfigStorage>| s.id() != storage.id());
            }
            ordered.push(storage);
        }
        Self { by_id, ordered }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn ConfigStorage>> {
        self.by_id.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ConfigStorage>> {
        self.ordered.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ghost_file_patterns() {
        assert!(is_ghost_file("app.properties~"));
        assert!(is_ghost_file("app.properties.bak"));
        assert!(is_ghost_file(".app.json.swp"));
        assert!(is_ghost_file("upload.tmp"));
        assert!(is_ghost_file("Thumbs.db"));
        assert!(is_ghost_file("thumbs.DB"));
        assert!(is_ghost_file(".DS_Store"));
        assert!(!is_ghost_file("app.properties"));
        assert!(!is_ghost_file("backup-plan.yaml"));
    }

    #[test]
    fn test_component_id_validation() {
        assert!(is_valid_component_id("files"));
        assert!(is_valid_component_id("RAM"));
        assert!(is_valid_component_id("env_vars2"));
        assert!(!is_valid_component_id(""));
        assert!(!is_valid_component_id("no-dashes"));
        assert!(!is_valid_component_id("no spaces"));
    }
}

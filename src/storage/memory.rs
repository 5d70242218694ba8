//! In-process memory storage for the RUNTIME scope.
//!
//! Always writable, volatile by contract: a rebuilt configuration starts
//! from an empty runtime layer, so RUNTIME writes do not survive
//! re-instantiation.

use super::ConfigStorage;
use crate::error::ConfigResult;
use crate::layer::{ConfigLayer, MemoryLayer};
use crate::location::ConfigLocation;
use crate::scheme::ConfigScheme;
use crate::scope::Scope;
use crate::search::SearchList;
use crate::settings::FactorySettings;
use std::sync::Arc;

pub const MEMORY_STORAGE_ID: &str = "RAM";

pub struct MemoryStorage {
    _private: (),
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self { _private: () }
    }

    fn make_layer(location: &ConfigLocation) -> Arc<dyn ConfigLayer> {
        Arc::new(MemoryLayer::new(location.scope(), location.clone(), true))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStorage for MemoryStorage {
    fn id(&self) -> &'static str {
        MEMORY_STORAGE_ID
    }

    fn is_generally_writeable(&self) -> bool {
        true
    }

    fn contribute_locations(&self, _settings: &FactorySettings, list: &mut SearchList) {
        list.insert_at_scope_end(ConfigLocation::new(Scope::Runtime, MEMORY_STORAGE_ID, true));
    }

    fn read_layers(&self, _name: &str, location: &ConfigLocation) -> Vec<Arc<dyn ConfigLayer>> {
        // A fresh empty layer per configuration: this is what makes RUNTIME
        // writes work with zero setup, and disappear on rebuild.
        vec![Self::make_layer(location)]
    }

    fn create_layer(
        &self,
        _name: &str,
        location: &ConfigLocation,
        _scheme: &ConfigScheme,
    ) -> ConfigResult<Arc<dyn ConfigLayer>> {
        Ok(Self::make_layer(location))
    }

    fn has_changed(&self, _location: &ConfigLocation) -> bool {
        // Mutated only by the process itself; the entry-level differ covers
        // anything worth notifying.
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryValue;

    #[test]
    fn test_contributes_one_runtime_location() {
        let mut list = SearchList::new();
        MemoryStorage::new().contribute_locations(&FactorySettings::new(), &mut list);
        assert_eq!(list.entries().len(), 1);
        assert_eq!(list.entries()[0].scope(), Scope::Runtime);
        assert!(list.entries()[0].is_writeable());
    }

    #[test]
    fn test_layers_are_volatile() {
        let storage = MemoryStorage::new();
        let location = ConfigLocation::new(Scope::Runtime, MEMORY_STORAGE_ID, true);

        let first = storage.read_layers("app", &location);
        first[0]
            .write("k", EntryValue::Text("v".into()), None)
            .unwrap();

        // A re-read yields a fresh, empty layer.
        let second = storage.read_layers("app", &location);
        assert!(second[0].get("k").is_none());
    }
}

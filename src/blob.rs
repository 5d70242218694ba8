//! BLOB side channel: single-entry-per-scope raw byte access.
//!
//! A deliberately small parallel track beside the tree/scheme model, for
//! configurations that are one opaque body of bytes per scope (certificates,
//! license blobs). No scheme, no cursor, no merge beyond scope precedence.

use crate::error::{ConfigError, ConfigResult};
use crate::location::ConfigLocation;
use crate::scope::{Scope, ScopeSet};
use crate::search::SearchList;
use crate::storage::StorageRegistry;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

pub struct BlobConfig {
    name: String,
    storages: Arc<StorageRegistry>,
    search_list: Arc<RwLock<SearchList>>,
    /// One body per scope; a later search-list hit replaces an earlier one,
    /// mirroring the layered within-scope precedence.
    bodies: Mutex<HashMap<Scope, (ConfigLocation, Vec<u8>)>>,
}

impl BlobConfig {
    pub(crate) fn new(
        name: impl Into<String>,
        storages: Arc<StorageRegistry>,
        search_list: Arc<RwLock<SearchList>>,
    ) -> Self {
        Self {
            name: name.into(),
            storages,
            search_list,
            bodies: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Walk the search list and load whatever blob bodies exist.
    pub(crate) fn populate(&self) {
        let locations: Vec<ConfigLocation> = self.search_list.read().entries().to_vec();
        let mut bodies = self.bodies.lock();
        for location in locations {
            let Some(storage) = self.storages.get(location.storage_id()) else {
                continue;
            };
            if let Some(bytes) = storage.read_blob(&self.name, &location) {
                bodies.insert(location.scope(), (location, bytes));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.lock().is_empty()
    }

    /// The body at the most specific scope among `scopes`, if any.
    pub fn get(&self, scopes: ScopeSet) -> Option<(Scope, Vec<u8>)> {
        let bodies = self.bodies.lock();
        scopes
            .iter_most_specific_first()
            .find_map(|scope| bodies.get(&scope).map(|(_, bytes)| (scope, bytes.clone())))
    }

    /// The body at one exact scope.
    pub fn get_at(&self, scope: Scope) -> Option<Vec<u8>> {
        self.bodies.lock().get(&scope).map(|(_, b)| b.clone())
    }

    /// Write the body for one scope through the first writable location of
    /// that scope in the search list.
    pub fn put(&self, scope: Scope, bytes: &[u8]) -> ConfigResult<()> {
        let locations: Vec<ConfigLocation> = self.search_list.read().entries().to_vec();
        for location in locations {
            if location.scope() != scope || !location.is_writeable() {
                continue;
            }
            let Some(storage) = self.storages.get(location.storage_id()) else {
                continue;
            };
            if !storage.is_generally_writeable() {
                continue;
            }
            storage.write_blob(&self.name, &location, bytes)?;
            self.bodies
                .lock()
                .insert(scope, (location, bytes.to_vec()));
            return Ok(());
        }
        Err(ConfigError::no_writeable_location(&self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::properties::PropertiesFormat;
    use crate::storage::filesystem::{FILE_STORAGE_ID, FileStorage};
    use tempfile::TempDir;

    fn blob_setup(temp: &TempDir) -> BlobConfig {
        let storage: Arc<dyn crate::storage::ConfigStorage> = Arc::new(FileStorage::new(
            vec![Arc::new(PropertiesFormat::new())],
            false,
        ));
        let mut list = SearchList::new();
        list.insert_at_scope_end(
            ConfigLocation::new(Scope::User, FILE_STORAGE_ID, true)
                .with_handle(temp.path().join("user")),
        );
        list.insert_at_scope_end(
            ConfigLocation::new(Scope::Host, FILE_STORAGE_ID, true)
                .with_handle(temp.path().join("host")),
        );
        BlobConfig::new(
            "license.key",
            Arc::new(StorageRegistry::new(vec![storage])),
            Arc::new(RwLock::new(list)),
        )
    }

    #[test]
    fn test_blob_precedence_and_round_trip() {
        let temp = TempDir::new().unwrap();
        let blob = blob_setup(&temp);
        assert!(blob.is_empty());
        assert!(blob.get(ScopeSet::all()).is_none());

        blob.put(Scope::Host, b"host body").unwrap();
        blob.put(Scope::User, b"user body").unwrap();

        // Most specific scope wins.
        let (scope, bytes) = blob.get(ScopeSet::all()).unwrap();
        assert_eq!(scope, Scope::User);
        assert_eq!(bytes, b"user body");
        assert_eq!(blob.get_at(Scope::Host).unwrap(), b"host body");

        // Bodies are on disk where the scope's location points.
        assert!(temp.path().join("user/license.key").is_file());
        assert!(temp.path().join("host/license.key").is_file());
    }

    #[test]
    fn test_blob_populate_reads_existing_bodies() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("host")).unwrap();
        std::fs::write(temp.path().join("host/license.key"), b"preexisting").unwrap();

        let blob = blob_setup(&temp);
        blob.populate();
        let (scope, bytes) = blob.get(ScopeSet::all()).unwrap();
        assert_eq!(scope, Scope::Host);
        assert_eq!(bytes, b"preexisting");
    }

    #[test]
    fn test_blob_put_without_writable_scope_fails() {
        let temp = TempDir::new().unwrap();
        let blob = blob_setup(&temp);
        let err = blob.put(Scope::Cloud, b"x").unwrap_err();
        assert_eq!(err.reason, crate::error::ErrorReason::NoWriteableLocation);
    }
}

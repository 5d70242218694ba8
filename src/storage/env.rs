//! Environment variable storage for the SESSION scope.
//!
//! Variables named `<APP>_SECTION__KEY` (application name upper-cased,
//! non-alphanumerics folded to `_`) map to the full key `section/key`:
//! a double underscore separates path segments, single underscores stay
//! part of the segment. Read-only.

use super::ConfigStorage;
use crate::entry::{EntryValue, RawEntry};
use crate::error::{ConfigError, ConfigResult};
use crate::layer::{ConfigLayer, MemoryLayer};
use crate::location::ConfigLocation;
use crate::scheme::ConfigScheme;
use crate::scope::Scope;
use crate::search::SearchList;
use crate::settings::{ConfigFeature, FactorySettings};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const ENV_STORAGE_ID: &str = "envvars";

pub struct EnvStorage {
    prefix: String,
}

impl EnvStorage {
    /// Prefix derived from the application name at build time.
    pub fn from_settings(settings: &FactorySettings) -> Self {
        Self {
            prefix: env_prefix(settings.text_of(ConfigFeature::ApplicationName)),
        }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn collect_entries(&self) -> BTreeMap<String, RawEntry> {
        let mut entries = BTreeMap::new();
        if self.prefix.is_empty() {
            return entries;
        }
        for (name, value) in std::env::vars() {
            if let Some(rest) = name.strip_prefix(&self.prefix) {
                let key = env_name_to_key(rest);
                if !key.is_empty() {
                    entries.insert(key, RawEntry::new(EntryValue::Text(value)));
                }
            }
        }
        entries
    }
}

/// `My App` becomes `MY_APP_`.
pub fn env_prefix(application_name: &str) -> String {
    if application_name.is_empty() {
        return String::new();
    }
    let mut prefix: String = application_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    prefix.push('_');
    prefix
}

/// `SECTION__KEY_NAME` becomes `section/key_name`.
fn env_name_to_key(rest: &str) -> String {
    rest.split("__")
        .map(|segment| segment.to_ascii_lowercase())
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

impl ConfigStorage for EnvStorage {
    fn id(&self) -> &'static str {
        ENV_STORAGE_ID
    }

    fn self_test(&self, _settings: &FactorySettings) -> bool {
        !self.prefix.is_empty()
    }

    fn is_generally_writeable(&self) -> bool {
        false
    }

    fn contribute_locations(&self, _settings: &FactorySettings, list: &mut SearchList) {
        list.insert_at_scope_end(ConfigLocation::new(Scope::Session, ENV_STORAGE_ID, false));
    }

    fn read_layers(&self, _name: &str, location: &ConfigLocation) -> Vec<Arc<dyn ConfigLayer>> {
        let entries = self.collect_entries();
        if entries.is_empty() {
            return Vec::new();
        }
        vec![Arc::new(
            MemoryLayer::new(location.scope(), location.clone(), false).with_entries(entries),
        )]
    }

    fn create_layer(
        &self,
        _name: &str,
        _location: &ConfigLocation,
        _scheme: &ConfigScheme,
    ) -> ConfigResult<Arc<dyn ConfigLayer>> {
        Err(ConfigError::not_writeable(
            "environment variables are read-only",
        ))
    }

    fn has_changed(&self, _location: &ConfigLocation) -> bool {
        // The process environment is effectively static for our lifetime.
        false
    }
}

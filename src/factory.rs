//! Factory and builder: identity, feature configuration, component
//! registries, the search list, and the configuration instance cache.
//!
//! The builder collects settings and component registrations; `build()`
//! self-tests every component, keeps the survivors, and assembles the sorted
//! search list. The factory then resolves configuration names to cached
//! instances; cache entries are weak, so dropped configurations vanish and a
//! later lookup transparently rebuilds.

use crate::blob::BlobConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::facade::Config;
use crate::format::json::JsonFormat;
use crate::format::properties::PropertiesFormat;
use crate::format::yaml::YamlFormat;
use crate::format::ConfigFormat;
use crate::layered::LayeredConfiguration;
use crate::location::ConfigLocation;
use crate::scheme::ConfigScheme;
use crate::search::SearchList;
use crate::settings::{ConfigFeature, FactorySettings, FeatureValue};
use crate::storage::env::EnvStorage;
use crate::storage::filesystem::FileStorage;
use crate::storage::memory::MemoryStorage;
use crate::storage::{ConfigDiscoveryInfo, ConfigStorage, StorageRegistry, is_valid_component_id};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use regex_lite::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._\s\-]+$").expect("static pattern")
});

/// Trim, collapse inner whitespace, and validate a configuration name.
/// Names are case-sensitive (they match file names).
pub fn sanitize_config_name(name: &str) -> ConfigResult<String> {
    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return Err(ConfigError::argument_invalid("empty configuration name"));
    }
    if !NAME_PATTERN.is_match(&collapsed) || collapsed.contains("..") {
        return Err(ConfigError::argument_invalid(format!(
            "invalid configuration name '{}'",
            name
        )));
    }
    Ok(collapsed)
}

/// Company and application names become path components; separators and
/// traversal are rejected. The sub-path may contain `/` but never `..`.
fn validate_identity(part: &str, what: &str, allow_separators: bool) -> ConfigResult<()> {
    if part.contains("..") {
        return Err(ConfigError::argument_invalid(format!(
            "{} must not contain '..'",
            what
        )));
    }
    if !allow_separators && (part.contains('/') || part.contains('\\')) {
        return Err(ConfigError::argument_invalid(format!(
            "{} must not contain path separators",
            what
        )));
    }
    if allow_separators && part.contains('\\') {
        return Err(ConfigError::argument_invalid(format!(
            "{} must use '/' separators",
            what
        )));
    }
    Ok(())
}

pub struct ConfigFactoryBuilder {
    settings: FactorySettings,
    extra_storages: Vec<Arc<dyn ConfigStorage>>,
    extra_formats: Vec<Arc<dyn ConfigFormat>>,
    schemes: HashMap<String, ConfigScheme>,
    default_formats: bool,
    default_storages: bool,
}

impl ConfigFactoryBuilder {
    pub fn new(
        company_name: impl Into<String>,
        application_name: impl Into<String>,
    ) -> ConfigResult<Self> {
        let company = company_name.into();
        let application = application_name.into();
        validate_identity(&company, "company name", false)?;
        validate_identity(&application, "application name", false)?;
        if application.is_empty() {
            return Err(ConfigError::argument_invalid("empty application name"));
        }
        let mut settings = FactorySettings::new();
        settings.set_text(ConfigFeature::CompanyName, company)?;
        settings.set_text(ConfigFeature::ApplicationName, application)?;
        Ok(Self {
            settings,
            extra_storages: Vec::new(),
            extra_formats: Vec::new(),
            schemes: HashMap::new(),
            default_formats: true,
            default_storages: true,
        })
    }

    pub fn with_sub_path(mut self, sub_path: impl Into<String>) -> ConfigResult<Self> {
        let sub_path = sub_path.into();
        validate_identity(&sub_path, "sub-path", true)?;
        self.settings.set_text(ConfigFeature::SubPath, sub_path)?;
        Ok(self)
    }

    pub fn set_feature(mut self, feature: ConfigFeature, value: FeatureValue) -> ConfigResult<Self> {
        self.settings.set(feature, value)?;
        Ok(self)
    }

    pub fn set_bool(mut self, feature: ConfigFeature, value: bool) -> ConfigResult<Self> {
        self.settings.set_bool(feature, value)?;
        Ok(self)
    }

    pub fn set_int(mut self, feature: ConfigFeature, value: i64) -> ConfigResult<Self> {
        self.settings.set_int(feature, value)?;
        Ok(self)
    }

    pub fn set_text_list(
        mut self,
        feature: ConfigFeature,
        values: Vec<String>,
    ) -> ConfigResult<Self> {
        self.settings.set_text_list(feature, values)?;
        Ok(self)
    }

    /// Register an additional storage backend.
    pub fn register_storage(mut self, storage: Arc<dyn ConfigStorage>) -> Self {
        self.extra_storages.push(storage);
        self
    }

    /// Register an additional format backend.
    pub fn register_format(mut self, format: Arc<dyn ConfigFormat>) -> Self {
        self.extra_formats.push(format);
        self
    }

    /// Attach a scheme to a configuration name ahead of its first lookup.
    pub fn register_scheme(
        mut self,
        config_name: &str,
        scheme: ConfigScheme,
    ) -> ConfigResult<Self> {
        let sanitized = sanitize_config_name(config_name)?;
        self.schemes.insert(sanitized, scheme);
        Ok(self)
    }

    /// Skip the bundled properties/JSON/YAML formats.
    pub fn without_default_formats(mut self) -> Self {
        self.default_formats = false;
        self
    }

    /// Skip the bundled files/RAM/envvars storages.
    pub fn without_default_storages(mut self) -> Self {
        self.default_storages = false;
        self
    }

    pub fn build(self) -> ConfigResult<ConfigFactory> {
        let settings = self.settings;

        // Formats: bundled ones first, then registrations; self-test filters.
        let mut formats: Vec<Arc<dyn ConfigFormat>> = Vec::new();
        if self.default_formats {
            formats.push(Arc::new(PropertiesFormat::new()));
            formats.push(Arc::new(JsonFormat::new()));
            formats.push(Arc::new(YamlFormat::new()));
        }
        formats.extend(self.extra_formats);
        formats.retain(|format| {
            if !is_valid_component_id(format.id()) {
                warn!("ignoring format with invalid id '{}'", format.id());
                return false;
            }
            if !format.self_test(&settings) {
                debug!("format '{}' refused to run with current settings", format.id());
                return false;
            }
            true
        });
        if formats.is_empty() {
            warn!("no config formats available; file storages will read nothing");
        }

        let write_comments = settings.bool_of(ConfigFeature::CommentsWriting);
        let mut storages: Vec<Arc<dyn ConfigStorage>> = Vec::new();
        if self.default_storages {
            storages.push(Arc::new(FileStorage::new(formats.clone(), write_comments)));
            storages.push(Arc::new(MemoryStorage::new()));
            storages.push(Arc::new(EnvStorage::from_settings(&settings)));
        }
        storages.extend(self.extra_storages);
        storages.retain(|storage| {
            if !storage.self_test(&settings) {
                debug!(
                    "storage '{}' refused to run with current settings",
                    storage.id()
                );
                return false;
            }
            true
        });

        // Initialize the search list in storage priority order, then apply
        // the final scope/priority sort.
        let priorities: Vec<String> = settings
            .strings_of(ConfigFeature::StorageTypePriorities)
            .to_vec();
        let allow_unlisted = settings.bool_of(ConfigFeature::StorageTypeAllowAllStorages);
        let mut ordered_for_init = storages.clone();
        ordered_for_init.sort_by_key(|storage| {
            priorities
                .iter()
                .position(|id| id == storage.id())
                .unwrap_or(usize::MAX)
        });

        let mut search_list = SearchList::new();
        for storage in &ordered_for_init {
            storage.contribute_locations(&settings, &mut search_list);
        }
        search_list.sort_by_storage_priorities(&priorities, allow_unlisted);

        if !settings.bool_of(ConfigFeature::Quiet) {
            debug!("factory initialized for '{}' / '{}'",
                settings.text_of(ConfigFeature::CompanyName),
                settings.text_of(ConfigFeature::ApplicationName));
            for storage in &storages {
                debug!("  storage: {}", storage.id());
            }
            for format in &formats {
                debug!("  format: {}", format.id());
            }
            for location in search_list.entries() {
                debug!("  search: {}", location);
            }
        }

        Ok(ConfigFactory {
            inner: Arc::new(FactoryInner {
                settings,
                storages: Arc::new(StorageRegistry::new(storages)),
                search_list: Arc::new(RwLock::new(search_list)),
                schemes: Mutex::new(self.schemes),
                cache: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }
}

struct FactoryInner {
    settings: FactorySettings,
    storages: Arc<StorageRegistry>,
    search_list: Arc<RwLock<SearchList>>,
    schemes: Mutex<HashMap<String, ConfigScheme>>,
    cache: Mutex<HashMap<String, Weak<LayeredConfiguration>>>,
    closed: AtomicBool,
}

/// Resolves configuration names to live configuration instances.
#[derive(Clone)]
pub struct ConfigFactory {
    inner: Arc<FactoryInner>,
}

impl ConfigFactory {
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn check_closed(&self) -> ConfigResult<()> {
        if self.is_closed() {
            Err(ConfigError::closed("factory"))
        } else {
            Ok(())
        }
    }

    /// Resolve a configuration by name, using the registered scheme if one
    /// was attached to that name.
    pub fn config(&self, name: &str) -> ConfigResult<Config> {
        self.check_closed()?;
        let sanitized = sanitize_config_name(name)?;
        let scheme = self.inner.schemes.lock().get(&sanitized).cloned();
        self.config_internal(sanitized, scheme)
    }

    /// Resolve a configuration with an explicitly supplied scheme.
    pub fn config_with_scheme(&self, name: &str, scheme: ConfigScheme) -> ConfigResult<Config> {
        self.check_closed()?;
        let sanitized = sanitize_config_name(name)?;
        self.config_internal(sanitized, Some(scheme))
    }

    fn config_internal(
        &self,
        sanitized: String,
        scheme: Option<ConfigScheme>,
    ) -> ConfigResult<Config> {
        // Same name, same instance, as long as someone still holds it.
        if let Some(existing) = self.inner.cache.lock().get(&sanitized) {
            if let Some(live) = existing.upgrade() {
                if !live.is_closed() {
                    return Ok(Config::attach(live));
                }
            }
        }

        let evict_target = Arc::downgrade(&self.inner);
        let on_close: crate::layered::CloseCallback = Box::new(move |name: &str| {
            if let Some(inner) = evict_target.upgrade() {
                inner.cache.lock().remove(name);
            }
        });

        let configuration = LayeredConfiguration::new(
            sanitized.clone(),
            scheme,
            &self.inner.settings,
            self.inner.storages.clone(),
            self.inner.search_list.clone(),
            Some(on_close),
        )?;
        configuration.populate()?;

        if self
            .inner
            .settings
            .bool_of(ConfigFeature::ExceptionWhenConfigurationNotFound)
            && configuration.is_empty()?
        {
            let name = configuration.name().to_string();
            configuration.close();
            return Err(ConfigError::no_configuration(&name));
        }

        self.inner
            .cache
            .lock()
            .insert(sanitized, Arc::downgrade(&configuration));
        Ok(Config::attach(configuration))
    }

    /// Open the raw-blob side channel for a name.
    pub fn blob_config(&self, name: &str) -> ConfigResult<BlobConfig> {
        self.check_closed()?;
        let sanitized = sanitize_config_name(name)?;
        let blob = BlobConfig::new(
            sanitized,
            self.inner.storages.clone(),
            self.inner.search_list.clone(),
        );
        blob.populate();
        Ok(blob)
    }

    /// Everything discoverable across the whole search list.
    pub fn list_available_configurations(&self) -> ConfigResult<Vec<ConfigDiscoveryInfo>> {
        self.check_closed()?;
        let locations: Vec<ConfigLocation> = self.inner.search_list.read().entries().to_vec();
        let mut found: Vec<ConfigDiscoveryInfo> = Vec::new();
        for location in locations {
            if let Some(storage) = self.inner.storages.get(location.storage_id()) {
                for info in storage.list_configurations(&location) {
                    if !found.contains(&info) {
                        found.push(info);
                    }
                }
            }
        }
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    /// An owned snapshot of the current search list.
    pub fn search_list(&self) -> ConfigResult<Vec<ConfigLocation>> {
        self.check_closed()?;
        Ok(self.inner.search_list.read().entries().to_vec())
    }

    /// Add a location at the weak end of its scope section.
    pub fn prepend_search_entry(&self, location: ConfigLocation) -> ConfigResult<()> {
        self.check_closed()?;
        self.inner.search_list.write().insert_at_scope_start(location);
        Ok(())
    }

    /// Add a location at the strong end of its scope section.
    pub fn append_search_entry(&self, location: ConfigLocation) -> ConfigResult<()> {
        self.check_closed()?;
        self.inner.search_list.write().insert_at_scope_end(location);
        Ok(())
    }

    /// Attach a scheme to a name for future lookups.
    pub fn register_scheme(&self, config_name: &str, scheme: ConfigScheme) -> ConfigResult<()> {
        self.check_closed()?;
        let sanitized = sanitize_config_name(config_name)?;
        self.inner.schemes.lock().insert(sanitized, scheme);
        Ok(())
    }

    /// Close every live configuration and the factory itself.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Collect first: each close() evicts itself from the cache.
        let live: Vec<Arc<LayeredConfiguration>> = {
            let cache = self.inner.cache.lock();
            cache.values().filter_map(|weak| weak.upgrade()).collect()
        };
        for configuration in live {
            configuration.close();
        }
        self.inner.cache.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorReason;
    use crate::scope::Scope;
    use tempfile::TempDir;

    fn test_builder(temp: &TempDir) -> ConfigFactoryBuilder {
        ConfigFactoryBuilder::new("Acme", "Widget")
            .unwrap()
            .set_bool(ConfigFeature::PermitTestMode, true)
            .unwrap()
            .set_bool(ConfigFeature::TestMode, true)
            .unwrap()
            .set_text_list(
                ConfigFeature::TestmodeDirectories,
                vec![format!("USER:{}", temp.path().display())],
            )
            .unwrap()
            .set_int(ConfigFeature::UpdateCheckFrequencyMs, 0)
            .unwrap()
    }

    #[test]
    fn test_sanitize_config_name() {
        assert_eq!(sanitize_config_name("  my  app ").unwrap(), "my app");
        assert_eq!(sanitize_config_name("app-1.cfg").unwrap(), "app-1.cfg");
        assert!(sanitize_config_name("").is_err());
        assert!(sanitize_config_name("   ").is_err());
        assert!(sanitize_config_name("../escape").is_err());
        assert!(sanitize_config_name("a/b").is_err());
    }

    #[test]
    fn test_identity_validation() {
        assert!(ConfigFactoryBuilder::new("Acme", "Widget").is_ok());
        assert!(ConfigFactoryBuilder::new("A/B", "Widget").is_err());
        assert!(ConfigFactoryBuilder::new("Acme", "..").is_err());
        assert!(ConfigFactoryBuilder::new("Acme", "").is_err());
        let builder = ConfigFactoryBuilder::new("Acme", "Widget").unwrap();
        assert!(builder.with_sub_path("srv/2024").is_ok());
        let builder = ConfigFactoryBuilder::new("Acme", "Widget").unwrap();
        assert!(builder.with_sub_path("srv/../other").is_err());
    }

    #[test]
    fn test_test_mode_restricts_search_list() {
        let temp = TempDir::new().unwrap();
        let factory = test_builder(&temp).build().unwrap();
        let list = factory.search_list().unwrap();
        // The test directory is present; none of the regular platform roots
        // may leak into a test-mode search list.
        assert!(
            list.iter()
                .any(|l| l.scope() == Scope::User
                    && l.handle() == Some(temp.path()))
        );
        assert!(list.iter().all(|l| l.scope() != Scope::Host));
    }

    #[test]
    fn test_config_reads_from_test_directory() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("app.properties"), "greeting=hello\n").unwrap();
        let factory = test_builder(&temp).build().unwrap();

        let config = factory.config("app").unwrap();
        assert_eq!(config.get_string("greeting").unwrap().unwrap(), "hello");
    }

    #[test]
    fn test_same_name_same_instance_while_alive() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("app.properties"), "k=v\n").unwrap();
        let factory = test_builder(&temp).build().unwrap();

        let first = factory.config("app").unwrap();
        let second = factory.config("app").unwrap();
        assert!(first.shares_instance_with(&second));
    }

    #[test]
    fn test_closed_configuration_is_rebuilt_on_next_lookup() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("app.properties"), "k=v\n").unwrap();
        let factory = test_builder(&temp).build().unwrap();

        let first = factory.config("app").unwrap();
        first.close();
        let second = factory.config("app").unwrap();
        assert!(!second.is_closed());
        assert_eq!(second.get_string("k").unwrap().unwrap(), "v");
    }

    #[test]
    fn test_missing_configuration_policy_defaults_to_empty() {
        let temp = TempDir::new().unwrap();
        let factory = test_builder(&temp).build().unwrap();
        // Nothing on disk: still a usable (empty-ish) configuration, because
        // the RAM layer exists and the policy default is lenient.
        let config = factory.config("nothing-here").unwrap();
        assert!(!config.is_closed());
    }

    #[test]
    fn test_missing_configuration_policy_strict() {
        let temp = TempDir::new().unwrap();
        let factory = test_builder(&temp)
            .set_bool(ConfigFeature::ExceptionWhenConfigurationNotFound, true)
            .unwrap()
            .build()
            .unwrap();
        let err = factory.config("nothing-here").unwrap_err();
        assert_eq!(err.reason, ErrorReason::NoConfigurationFound);
    }

    #[test]
    fn test_factory_close_cascades() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("app.properties"), "k=v\n").unwrap();
        let factory = test_builder(&temp).build().unwrap();
        let config = factory.config("app").unwrap();

        factory.close();
        assert!(factory.is_closed());
        assert!(config.is_closed());
        assert_eq!(
            factory.config("app").unwrap_err().reason,
            ErrorReason::FactoryClosed
        );
        assert_eq!(
            config.get_string("k").unwrap_err().reason,
            ErrorReason::FactoryClosed
        );
    }

    #[test]
    fn test_discovery_listing() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("alpha.properties"), "a=1\n").unwrap();
        std::fs::write(temp.path().join("beta.json"), "{\"b\": 2}\n").unwrap();
        std::fs::write(temp.path().join("ghost.properties~"), "x=1\n").unwrap();
        let factory = test_builder(&temp).build().unwrap();

        let listed = factory.list_available_configurations().unwrap();
        let names: Vec<&str> = listed.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert_eq!(listed[0].format_id, "properties");
        assert_eq!(listed[1].format_id, "json");
    }
}

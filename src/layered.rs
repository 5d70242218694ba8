//! The layered configuration: merge engine for reads and placement engine
//! for writes.
//!
//! Holds the ordered layer list for one configuration name. Reads scan from
//! the most specific scope downwards and return the first entry that passes
//! scheme validation; within one scope, the layer registered last wins.
//! Writes follow a three-tier placement policy: update an existing entry in
//! place, append into an existing writable layer, or create a new layer
//! through the search list.

use crate::entry::{ConfigEntry, EntryValue};
use crate::error::{ConfigError, ConfigResult, ErrorReason};
use crate::layer::{ConfigLayer, DefaultLayer};
use crate::location::ConfigLocation;
use crate::scheme::ConfigScheme;
use crate::scope::{Scope, ScopeSet};
use crate::search::SearchList;
use crate::settings::{ConfigFeature, FactorySettings};
use crate::storage::StorageRegistry;
use crate::watch::{SourceChangeChecker, SourceChangeNotifier, SubscriptionId, UpdateListener};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Callback the factory installs to evict its cache entry on close.
pub type CloseCallback = Box<dyn FnOnce(&str) + Send>;

pub struct LayeredConfiguration {
    name: String,
    scheme: RwLock<Arc<ConfigScheme>>,
    layers: Mutex<Vec<Arc<dyn ConfigLayer>>>,
    default_layer: Arc<DefaultLayer>,
    notifier: Arc<SourceChangeNotifier>,
    checker: SourceChangeChecker,
    storages: Arc<StorageRegistry>,
    search_list: Arc<RwLock<SearchList>>,
    allowed_scopes: Mutex<ScopeSet>,
    closed: AtomicBool,
    exception_on_missing: bool,
    strict_scheme: bool,
    reset_defaults_on_scheme: bool,
    description_on_create: bool,
    trim_text: bool,
    on_close: Mutex<Option<CloseCallback>>,
}

impl LayeredConfiguration {
    pub fn new(
        sanitized_name: impl Into<String>,
        scheme: Option<ConfigScheme>,
        settings: &FactorySettings,
        storages: Arc<StorageRegistry>,
        search_list: Arc<RwLock<SearchList>>,
        on_close: Option<CloseCallback>,
    ) -> ConfigResult<Arc<Self>> {
        let notifier = Arc::new(SourceChangeNotifier::new(
            settings.int_of(ConfigFeature::UpdateCheckFrequencyMs),
        ));
        let checker = SourceChangeChecker::new(storages.clone(), notifier.clone(), settings)?;

        let default_layer = Arc::new(DefaultLayer::new());
        let scheme = match scheme {
            Some(scheme) => {
                scheme.transfer_defaults(&default_layer, true);
                Arc::new(scheme)
            }
            None => Arc::new(ConfigScheme::permissive()),
        };

        let config = Arc::new(Self {
            name: sanitized_name.into(),
            scheme: RwLock::new(scheme),
            layers: Mutex::new(vec![default_layer.clone() as Arc<dyn ConfigLayer>]),
            default_layer,
            notifier,
            checker,
            storages,
            search_list,
            allowed_scopes: Mutex::new(ScopeSet::all()),
            closed: AtomicBool::new(false),
            exception_on_missing: settings.bool_of(ConfigFeature::ExceptionOnMissingEntry),
            strict_scheme: settings.bool_of(ConfigFeature::SchemeStrictMode),
            reset_defaults_on_scheme: settings.bool_of(ConfigFeature::SchemeResetsDefaults),
            description_on_create: settings.bool_of(ConfigFeature::DescriptionOnCreate),
            trim_text: settings.bool_of(ConfigFeature::TrimTextvalueSpaces),
            on_close: Mutex::new(on_close),
        });
        config.checker.update_layers(config.layer_snapshot());
        Ok(config)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_closed(&self) -> ConfigResult<()> {
        if self.is_closed() {
            Err(ConfigError::closed(&format!("configuration '{}'", self.name)))
        } else {
            Ok(())
        }
    }

    pub(crate) fn exception_on_missing(&self) -> bool {
        self.exception_on_missing
    }

    pub(crate) fn trim_text(&self) -> bool {
        self.trim_text
    }

    pub fn scheme(&self) -> Arc<ConfigScheme> {
        self.scheme.read().clone()
    }

    fn layer_snapshot(&self) -> Vec<Arc<dyn ConfigLayer>> {
        self.layers.lock().clone()
    }

    /// Restrict every subsequent read to the given scopes.
    pub fn limit_scopes(&self, scopes: ScopeSet) -> ConfigResult<()> {
        self.check_closed()?;
        if scopes.is_empty() {
            return Err(ConfigError::argument_invalid("empty scope limit"));
        }
        *self.allowed_scopes.lock() = scopes;
        Ok(())
    }

    /// Register one loaded layer. Layers are kept ordered by scope ordinal
    /// descending; within one scope the newest registration goes first and
    /// therefore wins subsequent reads.
    pub fn add(&self, layer: Arc<dyn ConfigLayer>, location: &ConfigLocation) -> ConfigResult<()> {
        self.check_closed()?;
        if layer.scope() != location.scope() {
            warn!(
                "layer with scope {} registered at location scope {}",
                layer.scope(),
                location.scope()
            );
        }
        {
            let mut layers = self.layers.lock();
            let ordinal = layer.scope().ordinal();
            let index = layers
                .iter()
                .position(|existing| ordinal >= existing.scope().ordinal())
                .unwrap_or(layers.len());
            layers.insert(index, layer);
        }
        self.checker.update_layers(self.layer_snapshot());
        Ok(())
    }

    /// Build the layer list by walking the search list. Locations whose
    /// storage fails to deliver are skipped quietly; resolution succeeds as
    /// long as anything (including just defaults) is available.
    pub fn populate(&self) -> ConfigResult<()> {
        self.check_closed()?;
        let locations: Vec<ConfigLocation> = self.search_list.read().entries().to_vec();
        for location in locations {
            let Some(storage) = self.storages.get(location.storage_id()) else {
                debug!("no storage '{}' for {}", location.storage_id(), location);
                continue;
            };
            for layer in storage.read_layers(&self.name, &location) {
                self.add(layer, &location)?;
            }
        }
        Ok(())
    }

    /// Drop every loaded layer (the default layer stays) and re-read the
    /// search list.
    pub fn reload(&self) -> ConfigResult<()> {
        self.check_closed()?;
        {
            let mut layers = self.layers.lock();
            layers.clear();
            layers.push(self.default_layer.clone());
        }
        self.populate()?;
        self.checker.update_layers(self.layer_snapshot());
        Ok(())
    }

    /// Resolve a full key to the single winning entry, or None.
    ///
    /// Layers are consulted most specific scope first; within a scope the
    /// last-registered layer wins. An entry that fails scheme validation is
    /// treated as "not found in this layer" and the scan continues.
    pub fn entry(&self, full_key: &str, scopes: ScopeSet) -> ConfigResult<Option<ConfigEntry>> {
        self.check_closed()?;
        validate_key(full_key)?;
        let scheme = self.scheme();
        let spec = scheme.specification_for(full_key);

        // Piggy-backed change sweep, so change detection keeps working under
        // low-frequency access patterns even without the background thread.
        if self.checker.consider_check() {
            self.checker.check_and_notify();
        }

        let allowed = self.allowed_scopes.lock().intersect(scopes);
        for layer in self.layer_snapshot() {
            if !allowed.contains(layer.scope()) {
                continue;
            }
            let Some(raw) = layer.get(full_key) else {
                continue;
            };
            let mut entry = ConfigEntry::leaf(
                full_key,
                raw,
                layer.scope(),
                layer.source().clone(),
                layer.clone(),
            );
            if let Some(spec) = &spec {
                entry = entry.with_spec(spec.clone());
            }
            if !scheme.check_entry_validity(full_key, &entry, self.strict_scheme) {
                continue;
            }
            debug!(
                "'{}' found in [{}] at {}",
                full_key,
                entry.scope(),
                layer.source()
            );
            return Ok(Some(entry));
        }
        Ok(None)
    }

    /// Three-tier write placement at one target scope.
    pub fn put(&self, full_key: &str, value: EntryValue, scope: Scope) -> ConfigResult<()> {
        self.check_closed()?;
        validate_key(full_key)?;

        let scheme = self.scheme();
        let spec = scheme.specification_for(full_key);
        if let Some(spec) = &spec {
            let candidate = ConfigEntry::candidate(full_key, value.clone(), scope)
                .with_spec(spec.clone());
            if !spec.validate(&candidate) {
                return Err(ConfigError::input_invalid(full_key));
            }
        }
        let creation_comment = if self.description_on_create {
            spec.as_ref().and_then(|s| s.description.clone())
        } else {
            None
        };

        // Tiers 1 and 2 work on the current layer list.
        enum Placement {
            Update(Arc<dyn ConfigLayer>, Option<String>),
            Append(Arc<dyn ConfigLayer>),
        }
        let placement = {
            let layers = self.layers.lock();
            let mut append_target: Option<Arc<dyn ConfigLayer>> = None;
            let mut found = None;
            for layer in layers.iter() {
                if layer.scope() != scope || !layer.is_writeable() {
                    continue;
                }
                if let Some(existing) = layer.get(full_key) {
                    found = Some(Placement::Update(layer.clone(), existing.comment));
                    break;
                }
                if append_target.is_none() {
                    append_target = Some(layer.clone());
                }
            }
            found.or(append_target.map(Placement::Append))
        };

        match placement {
            Some(Placement::Update(layer, existing_comment)) => {
                // Update in place, keeping the entry's comment.
                return layer.write(full_key, value, existing_comment.as_deref());
            }
            Some(Placement::Append(layer)) => {
                return layer.write(full_key, value, creation_comment.as_deref());
            }
            None => {}
        }

        // Tier 3: create a new layer through the search list.
        let locations: Vec<ConfigLocation> = self.search_list.read().entries().to_vec();
        for location in locations {
            if location.scope() != scope || !location.is_writeable() {
                continue;
            }
            let Some(storage) = self.storages.get(location.storage_id()) else {
                continue;
            };
            if !storage.is_generally_writeable() {
                debug!("layer creation: skipping read-only storage '{}'", storage.id());
                continue;
            }
            match storage.create_layer(&self.name, &location, &scheme) {
                Ok(layer) => {
                    self.add(layer.clone(), &location)?;
                    return layer.write(full_key, value, creation_comment.as_deref());
                }
                Err(e) => {
                    debug!("layer creation failed at {}: {}", location, e);
                }
            }
        }

        Err(ConfigError::not_writeable(format!(
            "no tier accepts '{}' at scope {}",
            full_key, scope
        ))
        .with_key(full_key))
    }

    /// Multi-scope write: scopes are tried most specific first; the first
    /// scope where any tier succeeds wins.
    pub fn put_in_scopes(
        &self,
        full_key: &str,
        value: EntryValue,
        scopes: ScopeSet,
    ) -> ConfigResult<()> {
        self.check_closed()?;
        if scopes.is_empty() {
            return Err(ConfigError::argument_invalid("empty scope set for put"));
        }
        for scope in scopes.iter_most_specific_first() {
            match self.put(full_key, value.clone(), scope) {
                Ok(()) => return Ok(()),
                // Spec rejection is scope-independent; retrying elsewhere
                // would just mutate a different layer with invalid input.
                Err(e) if e.reason == ErrorReason::InputInvalid => return Err(e),
                Err(e) => debug!("put at {} failed: {}", scope, e),
            }
        }
        Err(ConfigError::no_writeable_location(full_key))
    }

    /// All full keys of the merged configuration across the given scopes.
    pub fn all_keys_flattened(&self, scopes: ScopeSet) -> ConfigResult<BTreeSet<String>> {
        self.check_closed()?;
        let allowed = self.allowed_scopes.lock().intersect(scopes);
        let mut keys = BTreeSet::new();
        for layer in self.layer_snapshot() {
            if !allowed.contains(layer.scope()) {
                continue;
            }
            if let Some(layer_keys) = layer.keys() {
                keys.extend(layer_keys);
            }
        }
        Ok(keys)
    }

    pub fn is_empty(&self) -> ConfigResult<bool> {
        self.check_closed()?;
        Ok(self.layer_snapshot().iter().all(|l| l.is_empty()))
    }

    /// Writable now, or writable after creating a layer somewhere.
    pub fn is_writeable(&self) -> ConfigResult<bool> {
        self.check_closed()?;
        if self.layer_snapshot().iter().any(|l| l.is_writeable()) {
            return Ok(true);
        }
        let list = self.search_list.read();
        Ok(list.entries().iter().any(|location| {
            location.is_writeable()
                && self
                    .storages
                    .get(location.storage_id())
                    .map(|s| s.is_generally_writeable())
                    .unwrap_or(false)
        }))
    }

    /// Flush every layer; returns the total number of entries flushed.
    pub fn flush(&self) -> ConfigResult<usize> {
        self.check_closed()?;
        let mut flushed = 0;
        for layer in self.layer_snapshot() {
            match layer.flush() {
                Ok(count) => flushed += count,
                Err(e) => warn!("flush failed for {}: {}", layer.source(), e),
            }
        }
        Ok(flushed)
    }

    /// Flush, stop the change machinery and mark this configuration closed.
    /// Every public operation afterwards fails.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for layer in self.layer_snapshot() {
            if let Err(e) = layer.flush() {
                warn!("flush on close failed for {}: {}", layer.source(), e);
            }
        }
        self.checker.stop();
        self.notifier.stop();
        if let Some(callback) = self.on_close.lock().take() {
            callback(&self.name);
        }
    }

    /// Replace the scheme; its defaults re-seed the default layer.
    pub fn set_scheme(&self, scheme: Option<ConfigScheme>) -> ConfigResult<()> {
        self.check_closed()?;
        let scheme = match scheme {
            Some(scheme) => {
                scheme.transfer_defaults(&self.default_layer, self.reset_defaults_on_scheme);
                Arc::new(scheme)
            }
            None => Arc::new(ConfigScheme::permissive()),
        };
        *self.scheme.write() = scheme;
        Ok(())
    }

    /// Locations of every current layer, the default layer included.
    pub fn source_locations(&self) -> ConfigResult<Vec<ConfigLocation>> {
        self.check_closed()?;
        Ok(self
            .layer_snapshot()
            .iter()
            .map(|l| l.source().clone())
            .collect())
    }

    /// Subscribe to whole-location updates for every current layer.
    pub fn subscribe(&self, listener: UpdateListener) -> ConfigResult<Vec<SubscriptionId>> {
        self.check_closed()?;
        Ok(self
            .layer_snapshot()
            .iter()
            .map(|layer| {
                self.notifier
                    .subscribe_location(layer.source().clone(), listener.clone())
            })
            .collect())
    }

    /// Subscribe to updates of one specific entry.
    pub fn subscribe_key(
        &self,
        full_key: &str,
        listener: UpdateListener,
    ) -> ConfigResult<SubscriptionId> {
        self.check_closed()?;
        Ok(self.notifier.subscribe_key(full_key, listener))
    }

    pub fn unsubscribe(&self, ids: &[SubscriptionId]) {
        for id in ids {
            self.notifier.unsubscribe(*id);
        }
    }

    /// One synchronous change sweep; mainly for tests and callers that
    /// disabled the background thread.
    pub fn check_for_changes_now(&self) -> ConfigResult<()> {
        self.check_closed()?;
        self.checker.check_and_notify();
        Ok(())
    }
}

impl Drop for LayeredConfiguration {
    fn drop(&mut self) {
        if !self.is_closed() {
            self.close();
        }
    }
}

/// Keys are `/`-joined non-empty segments.
fn validate_key(full_key: &str) -> ConfigResult<()> {
    if full_key.trim().is_empty() {
        return Err(ConfigError::key_format(full_key, "empty key"));
    }
    if full_key.split('/').any(|segment| segment.trim().is_empty()) {
        return Err(ConfigError::key_format(full_key, "empty path segment"));
    }
    Ok(())
}

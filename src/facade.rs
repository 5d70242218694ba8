//! The public configuration facade: typed access over the merge engine.
//!
//! Every typed getter funnels through the single entry-resolution path and
//! adds one value conversion; every typed putter funnels through the
//! three-tier placement policy. Whether a missing entry is an error or a
//! `None` is the EXCEPTION_ON_MISSING_ENTRY policy decided at build time.

use crate::cursor::ConfigCursor;
use crate::entry::secret::SecretValue;
use crate::entry::{ConfigEntry, EntryValue};
use crate::error::{ConfigError, ConfigResult};
use crate::layered::LayeredConfiguration;
use crate::location::ConfigLocation;
use crate::scheme::ConfigScheme;
use crate::scope::{Scope, ScopeSet};
use crate::watch::{SubscriptionId, UpdateListener};
use std::sync::Arc;

/// A live, named configuration.
///
/// Cheap to clone; clones share the same underlying instance.
#[derive(Clone)]
pub struct Config {
    inner: Arc<LayeredConfiguration>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("name", &self.inner.name())
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}

impl Config {
    pub(crate) fn attach(inner: Arc<LayeredConfiguration>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Whether two handles refer to the same underlying instance.
    pub fn shares_instance_with(&self, other: &Config) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Resolve the winning entry for a key across all allowed scopes.
    pub fn entry(&self, full_key: &str) -> ConfigResult<Option<ConfigEntry>> {
        self.inner.entry(full_key, ScopeSet::all())
    }

    /// Resolve restricted to the given scopes.
    pub fn entry_in(
        &self,
        full_key: &str,
        scopes: ScopeSet,
    ) -> ConfigResult<Option<ConfigEntry>> {
        self.inner.entry(full_key, scopes)
    }

    fn resolve<T>(
        &self,
        full_key: &str,
        convert: impl FnOnce(&ConfigEntry) -> ConfigResult<T>,
    ) -> ConfigResult<Option<T>> {
        match self.inner.entry(full_key, ScopeSet::all())? {
            Some(entry) => convert(&entry).map(Some),
            None => {
                // A scheme-declared mandatory entry missing everywhere is an
                // error even under the lenient missing-entry policy.
                let mandatory = self
                    .inner
                    .scheme()
                    .specification_for(full_key)
                    .map(|spec| spec.mandatory)
                    .unwrap_or(false);
                if mandatory || self.inner.exception_on_missing() {
                    Err(ConfigError::no_matching_entry(full_key))
                } else {
                    Ok(None)
                }
            }
        }
    }

    // Typed getters.

    pub fn get_string(&self, full_key: &str) -> ConfigResult<Option<String>> {
        let trim = self.inner.trim_text();
        self.resolve(full_key, |entry| {
            let text = entry.as_string()?;
            Ok(if trim { text.trim().to_string() } else { text })
        })
    }

    pub fn get_bool(&self, full_key: &str) -> ConfigResult<Option<bool>> {
        self.resolve(full_key, |entry| entry.as_bool())
    }

    pub fn get_i32(&self, full_key: &str) -> ConfigResult<Option<i32>> {
        self.resolve(full_key, |entry| entry.as_i32())
    }

    pub fn get_i64(&self, full_key: &str) -> ConfigResult<Option<i64>> {
        self.resolve(full_key, |entry| entry.as_i64())
    }

    pub fn get_i128(&self, full_key: &str) -> ConfigResult<Option<i128>> {
        self.resolve(full_key, |entry| entry.as_i128())
    }

    pub fn get_f64(&self, full_key: &str) -> ConfigResult<Option<f64>> {
        self.resolve(full_key, |entry| entry.as_f64())
    }

    pub fn get_bytes(&self, full_key: &str) -> ConfigResult<Option<Vec<u8>>> {
        self.resolve(full_key, |entry| entry.as_bytes())
    }

    pub fn get_string_list(&self, full_key: &str) -> ConfigResult<Option<Vec<String>>> {
        self.resolve(full_key, |entry| entry.as_string_list())
    }

    /// The value wrapped so it cannot leak into logs unredacted.
    pub fn get_secret(&self, full_key: &str) -> ConfigResult<Option<SecretValue>> {
        self.resolve(full_key, |entry| entry.as_string().map(SecretValue::new))
    }

    // Typed putters.

    pub fn put_value(&self, full_key: &str, value: EntryValue, scope: Scope) -> ConfigResult<()> {
        self.inner.put(full_key, value, scope)
    }

    /// Multi-scope put: the most specific scope that accepts the write wins.
    pub fn put_value_in(
        &self,
        full_key: &str,
        value: EntryValue,
        scopes: ScopeSet,
    ) -> ConfigResult<()> {
        self.inner.put_in_scopes(full_key, value, scopes)
    }

    pub fn put_string(&self, full_key: &str, value: &str, scope: Scope) -> ConfigResult<()> {
        self.put_value(full_key, EntryValue::Text(value.to_string()), scope)
    }

    pub fn put_bool(&self, full_key: &str, value: bool, scope: Scope) -> ConfigResult<()> {
        self.put_value(full_key, EntryValue::Boolean(value), scope)
    }

    pub fn put_i64(&self, full_key: &str, value: i64, scope: Scope) -> ConfigResult<()> {
        self.put_value(full_key, EntryValue::Integer(value as i128), scope)
    }

    pub fn put_f64(&self, full_key: &str, value: f64, scope: Scope) -> ConfigResult<()> {
        self.put_value(full_key, EntryValue::Float(value), scope)
    }

    pub fn put_bytes(&self, full_key: &str, value: &[u8], scope: Scope) -> ConfigResult<()> {
        self.put_value(full_key, EntryValue::Bytes(value.to_vec()), scope)
    }

    pub fn put_string_list(
        &self,
        full_key: &str,
        value: Vec<String>,
        scope: Scope,
    ) -> ConfigResult<()> {
        self.put_value(full_key, EntryValue::List(value), scope)
    }

    // Structure and lifecycle.

    /// A tree cursor over the merged key space.
    pub fn cursor(&self) -> ConfigCursor {
        ConfigCursor::new(self.inner.clone())
    }

    /// All full keys across the allowed scopes.
    pub fn all_keys(&self) -> ConfigResult<Vec<String>> {
        Ok(self
            .inner
            .all_keys_flattened(ScopeSet::all())?
            .into_iter()
            .collect())
    }

    pub fn is_empty(&self) -> ConfigResult<bool> {
        self.inner.is_empty()
    }

    pub fn is_writeable(&self) -> ConfigResult<bool> {
        self.inner.is_writeable()
    }

    /// Restrict all subsequent reads to the given scopes.
    pub fn limit_scopes(&self, scopes: ScopeSet) -> ConfigResult<()> {
        self.inner.limit_scopes(scopes)
    }

    /// Replace the attached scheme; declared defaults re-seed.
    pub fn set_scheme(&self, scheme: Option<ConfigScheme>) -> ConfigResult<()> {
        self.inner.set_scheme(scheme)
    }

    /// Locations contributing to this configuration, default layer included.
    pub fn source_locations(&self) -> ConfigResult<Vec<ConfigLocation>> {
        self.inner.source_locations()
    }

    /// Subscribe to whole-location updates of every current layer.
    pub fn subscribe(&self, listener: UpdateListener) -> ConfigResult<Vec<SubscriptionId>> {
        self.inner.subscribe(listener)
    }

    /// Subscribe to updates of one entry.
    pub fn subscribe_key(
        &self,
        full_key: &str,
        listener: UpdateListener,
    ) -> ConfigResult<SubscriptionId> {
        self.inner.subscribe_key(full_key, listener)
    }

    pub fn unsubscribe(&self, ids: &[SubscriptionId]) {
        self.inner.unsubscribe(ids)
    }

    /// Persist pending changes in every layer; returns the flush count.
    pub fn flush(&self) -> ConfigResult<usize> {
        self.inner.flush()
    }

    /// Drop all loaded layers and re-read the search list.
    pub fn reload(&self) -> ConfigResult<()> {
        self.inner.reload()
    }

    /// One synchronous change sweep, independent of the background schedule.
    pub fn check_for_changes_now(&self) -> ConfigResult<()> {
        self.inner.check_for_changes_now()
    }

    /// Flush, stop change detection, release subscriptions. Every operation
    /// afterwards fails.
    pub fn close(&self) {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorReason;
    use crate::layer::{ConfigLayer, MemoryLayer};
    use crate::search::SearchList;
    use crate::settings::{ConfigFeature, FactorySettings};
    use crate::storage::StorageRegistry;
    use parking_lot::RwLock;

    fn facade_with(
        entries: &[(&str, EntryValue)],
        tune: impl FnOnce(&mut FactorySettings),
    ) -> Config {
        let mut settings = FactorySettings::new();
        settings
            .set_int(ConfigFeature::UpdateCheckFrequencyMs, 0)
            .unwrap();
        tune(&mut settings);
        let inner = LayeredConfiguration::new(
            "facade-test",
            None,
            &settings,
            Arc::new(StorageRegistry::new(Vec::new())),
            Arc::new(RwLock::new(SearchList::new())),
            None,
        )
        .unwrap();
        let location = ConfigLocation::new(Scope::User, "RAM", true).with_handle("/mem");
        let layer = Arc::new(MemoryLayer::new(Scope::User, location.clone(), true));
        for (key, value) in entries {
            layer.write(key, value.clone(), None).unwrap();
        }
        inner.add(layer, &location).unwrap();
        Config::attach(inner)
    }

    #[test]
    fn test_typed_getters() {
        let config = facade_with(
            &[
                ("text", EntryValue::Text("  padded  ".into())),
                ("flag", EntryValue::Text("yes".into())),
                ("count", EntryValue::Text("42".into())),
                ("ratio", EntryValue::Float(0.5)),
                ("hosts", EntryValue::List(vec!["a".into(), "b".into()])),
            ],
            |_| {},
        );
        // TRIM_TEXTVALUE_SPACES is on by default.
        assert_eq!(config.get_string("text").unwrap().unwrap(), "padded");
        assert!(config.get_bool("flag").unwrap().unwrap());
        assert_eq!(config.get_i32("count").unwrap().unwrap(), 42);
        assert_eq!(config.get_i64("count").unwrap().unwrap(), 42);
        assert_eq!(config.get_f64("ratio").unwrap().unwrap(), 0.5);
        assert_eq!(
            config.get_string_list("hosts").unwrap().unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_missing_entry_is_error_by_default() {
        let config = facade_with(&[], |_| {});
        let err = config.get_string("absent").unwrap_err();
        assert_eq!(err.reason, ErrorReason::NoMatchingEntry);
    }

    #[test]
    fn test_missing_entry_policy_lenient() {
        let config = facade_with(&[], |settings| {
            settings
                .set_bool(ConfigFeature::ExceptionOnMissingEntry, false)
                .unwrap();
        });
        assert_eq!(config.get_string("absent").unwrap(), None);
    }

    #[test]
    fn test_conversion_failure_reason() {
        let config = facade_with(&[("word", EntryValue::Text("many".into()))], |_| {});
        let err = config.get_i64("word").unwrap_err();
        assert_eq!(err.reason, ErrorReason::ConversionFailure);
    }

    #[test]
    fn test_put_then_get_round_trip() {
        let config = facade_with(&[], |_| {});
        config.put_string("greeting", "hi", Scope::User).unwrap();
        assert_eq!(config.get_string("greeting").unwrap().unwrap(), "hi");

        config.put_i64("answer", 42, Scope::User).unwrap();
        assert_eq!(config.get_i64("answer").unwrap().unwrap(), 42);

        config.put_bool("on", true, Scope::User).unwrap();
        assert!(config.get_bool("on").unwrap().unwrap());
    }

    #[test]
    fn test_secret_values_are_wrapped() {
        let config = facade_with(
            &[("token", EntryValue::Text("hunter2".into()))],
            |_| {},
        );
        let secret = config.get_secret("token").unwrap().unwrap();
        assert_eq!(secret.reveal(), "hunter2");
        assert!(!format!("{:?}", secret).contains("hunter2"));
    }

    #[test]
    fn test_mandatory_key_missing_is_error_even_when_lenient() {
        use crate::entry::EntryType;
        use crate::scheme::{ConfigScheme, EntrySpec};

        let mut settings = FactorySettings::new();
        settings
            .set_int(ConfigFeature::UpdateCheckFrequencyMs, 0)
            .unwrap();
        settings
            .set_bool(ConfigFeature::ExceptionOnMissingEntry, false)
            .unwrap();
        let scheme = ConfigScheme::builder()
            .entry(EntrySpec::new("required", EntryType::String).mandatory())
            .build();
        let inner = LayeredConfiguration::new(
            "mandatory-test",
            Some(scheme),
            &settings,
            Arc::new(StorageRegistry::new(Vec::new())),
            Arc::new(RwLock::new(SearchList::new())),
            None,
        )
        .unwrap();
        let config = Config::attach(inner);

        assert_eq!(config.get_string("optional").unwrap(), None);
        assert_eq!(
            config.get_string("required").unwrap_err().reason,
            ErrorReason::NoMatchingEntry
        );
    }

    #[test]
    fn test_no_trim_when_disabled() {
        let config = facade_with(
            &[("text", EntryValue::Text("  padded  ".into()))],
            |settings| {
                settings
                    .set_bool(ConfigFeature::TrimTextvalueSpaces, false)
                    .unwrap();
            },
        );
        assert_eq!(config.get_string("text").unwrap().unwrap(), "  padded  ");
    }
}

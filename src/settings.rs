//! Engine feature flags and the typed settings bag.
//!
//! Every tunable of the engine is a [`ConfigFeature`] with a declared value
//! kind and a default, held in an immutable table built once at first use.
//! [`FactorySettings`] stores overrides and rejects values whose kind does
//! not match the feature's declaration.

use crate::error::{ConfigError, ConfigResult};
use crate::scope::Scope;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::PathBuf;

/// Tunable features of the factory and its configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigFeature {
    /// Organization identifier, part of default directory layouts.
    CompanyName,
    /// Application identifier, part of default directory layouts.
    ApplicationName,
    /// Optional sub-path below the application directory.
    SubPath,
    /// Whether test mode may be switched on at all.
    PermitTestMode,
    /// Test mode: only test-mode directories are consulted.
    TestMode,
    /// `[SCOPE":"]PATH` entries used instead of regular roots in test mode.
    TestmodeDirectories,
    /// Extra `[SCOPE":"]PATH` directories, default scope RUNTIME.
    AdditionalRuntimeDirectories,
    /// Extra `[SCOPE":"]PATH` directories, default scope USER.
    AdditionalUserDirectories,
    /// Storage IDs in descending priority order.
    StorageTypePriorities,
    /// Whether storages absent from the priority list are still consulted.
    StorageTypeAllowAllStorages,
    /// Change check period in milliseconds; 0 disables checking.
    UpdateCheckFrequencyMs,
    /// Scope names checked for changes. RUNTIME is excluded by default:
    /// it is mutated by the process itself, so self-notification is noise.
    UpdateCheckScopes,
    /// Missing entry: error (true, the default) or `None`.
    ExceptionOnMissingEntry,
    /// Missing whole configuration: error or empty view (the default).
    ExceptionWhenConfigurationNotFound,
    /// Suppress entries the scheme does not describe.
    SchemeStrictMode,
    /// Replacing a scheme clears previously seeded defaults first.
    SchemeResetsDefaults,
    /// Trim surrounding whitespace off text values on read.
    TrimTextvalueSpaces,
    /// Persist entry comments where the format supports them.
    CommentsWriting,
    /// Copy the spec description into the comment of newly created entries.
    DescriptionOnCreate,
    /// Skip the platform default directories entirely.
    NoDefaultDirectories,
    /// Suppress the factory's composition dump at build time.
    Quiet,
}

/// Value kinds a feature may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Bool,
    Int,
    Text,
    TextList,
}

/// A feature value.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Bool(bool),
    Int(i64),
    Text(String),
    TextList(Vec<String>),
}

impl FeatureValue {
    fn kind(&self) -> FeatureKind {
        match self {
            FeatureValue::Bool(_) => FeatureKind::Bool,
            FeatureValue::Int(_) => FeatureKind::Int,
            FeatureValue::Text(_) => FeatureKind::Text,
            FeatureValue::TextList(_) => FeatureKind::TextList,
        }
    }
}

impl ConfigFeature {
    /// The value kind this feature accepts.
    pub fn kind(self) -> FeatureKind {
        use ConfigFeature::*;
        match self {
            CompanyName | ApplicationName | SubPath => FeatureKind::Text,
            PermitTestMode | TestMode | StorageTypeAllowAllStorages | ExceptionOnMissingEntry
            | ExceptionWhenConfigurationNotFound | SchemeStrictMode | SchemeResetsDefaults
            | TrimTextvalueSpaces | CommentsWriting | DescriptionOnCreate
            | NoDefaultDirectories | Quiet => FeatureKind::Bool,
            UpdateCheckFrequencyMs => FeatureKind::Int,
            TestmodeDirectories | AdditionalRuntimeDirectories | AdditionalUserDirectories
            | StorageTypePriorities | UpdateCheckScopes => FeatureKind::TextList,
        }
    }
}

/// Defaults for every feature, built once.
static FEATURE_DEFAULTS: Lazy<HashMap<ConfigFeature, FeatureValue>> = Lazy::new(|| {
    use ConfigFeature::*;
    let mut map = HashMap::new();
    map.insert(CompanyName, FeatureValue::Text(String::new()));
    map.insert(ApplicationName, FeatureValue::Text(String::new()));
    map.insert(SubPath, FeatureValue::Text(String::new()));
    map.insert(PermitTestMode, FeatureValue::Bool(false));
    map.insert(TestMode, FeatureValue::Bool(false));
    map.insert(TestmodeDirectories, FeatureValue::TextList(Vec::new()));
    map.insert(
        AdditionalRuntimeDirectories,
        FeatureValue::TextList(Vec::new()),
    );
    map.insert(
        AdditionalUserDirectories,
        FeatureValue::TextList(Vec::new()),
    );
    map.insert(
        StorageTypePriorities,
        FeatureValue::TextList(vec![
            "RAM".to_string(),
            "envvars".to_string(),
            "files".to_string(),
        ]),
    );
    map.insert(StorageTypeAllowAllStorages, FeatureValue::Bool(true));
    map.insert(UpdateCheckFrequencyMs, FeatureValue::Int(2000));
    map.insert(
        UpdateCheckScopes,
        FeatureValue::TextList(
            Scope::ALL
                .iter()
                .filter(|s| **s != Scope::Runtime)
                .map(|s| s.name().to_string())
                .collect(),
        ),
    );
    map.insert(ExceptionOnMissingEntry, FeatureValue::Bool(true));
    map.insert(ExceptionWhenConfigurationNotFound, FeatureValue::Bool(false));
    map.insert(SchemeStrictMode, FeatureValue::Bool(false));
    map.insert(SchemeResetsDefaults, FeatureValue::Bool(true));
    map.insert(TrimTextvalueSpaces, FeatureValue::Bool(true));
    map.insert(CommentsWriting, FeatureValue::Bool(false));
    map.insert(DescriptionOnCreate, FeatureValue::Bool(false));
    map.insert(NoDefaultDirectories, FeatureValue::Bool(false));
    map.insert(Quiet, FeatureValue::Bool(false));
    map
});

/// Typed settings bag: feature overrides on top of the defaults table.
#[derive(Debug, Clone, Default)]
pub struct FactorySettings {
    values: HashMap<ConfigFeature, FeatureValue>,
}

impl FactorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a feature value; the value kind must match the feature's declaration.
    pub fn set(&mut self, feature: ConfigFeature, value: FeatureValue) -> ConfigResult<()> {
        if value.kind() != feature.kind() {
            return Err(ConfigError::feature_value(format!(
                "feature {:?} takes {:?}, got {:?}",
                feature,
                feature.kind(),
                value.kind()
            )));
        }
        self.values.insert(feature, value);
        Ok(())
    }

    pub fn set_bool(&mut self, feature: ConfigFeature, value: bool) -> ConfigResult<()> {
        self.set(feature, FeatureValue::Bool(value))
    }

    pub fn set_int(&mut self, feature: ConfigFeature, value: i64) -> ConfigResult<()> {
        self.set(feature, FeatureValue::Int(value))
    }

    pub fn set_text(&mut self, feature: ConfigFeature, value: impl Into<String>) -> ConfigResult<()> {
        self.set(feature, FeatureValue::Text(value.into()))
    }

    pub fn set_text_list(
        &mut self,
        feature: ConfigFeature,
        value: Vec<String>,
    ) -> ConfigResult<()> {
        self.set(feature, FeatureValue::TextList(value))
    }

    fn get(&self, feature: ConfigFeature) -> &FeatureValue {
        self.values
            .get(&feature)
            .or_else(|| FEATURE_DEFAULTS.get(&feature))
            .expect("every feature has a default")
    }

    pub fn bool_of(&self, feature: ConfigFeature) -> bool {
        match self.get(feature) {
            FeatureValue::Bool(b) => *b,
            _ => unreachable!("kind checked on set"),
        }
    }

    pub fn int_of(&self, feature: ConfigFeature) -> i64 {
        match self.get(feature) {
            FeatureValue::Int(i) => *i,
            _ => unreachable!("kind checked on set"),
        }
    }

    pub fn text_of(&self, feature: ConfigFeature) -> &str {
        match self.get(feature) {
            FeatureValue::Text(s) => s,
            _ => unreachable!("kind checked on set"),
        }
    }

    pub fn strings_of(&self, feature: ConfigFeature) -> &[String] {
        match self.get(feature) {
            FeatureValue::TextList(v) => v,
            _ => unreachable!("kind checked on set"),
        }
    }

    /// Whether test mode is both permitted and switched on.
    pub fn test_mode_active(&self) -> bool {
        self.bool_of(ConfigFeature::PermitTestMode) && self.bool_of(ConfigFeature::TestMode)
    }

    /// Parse a directory-list feature of `[SCOPE":"]PATH` entries.
    ///
    /// Entries without a scope prefix get `default_scope`. Entries with an
    /// unparseable scope prefix are returned as errors by value so callers
    /// can log and skip them.
    pub fn scoped_directories(
        &self,
        feature: ConfigFeature,
        default_scope: Scope,
    ) -> Vec<ConfigResult<(Scope, PathBuf)>> {
        self.strings_of(feature)
            .iter()
            .map(|raw| parse_scoped_directory(raw, default_scope))
            .collect()
    }
}

/// Parse one `[SCOPE":"]PATH` entry.
fn parse_scoped_directory(raw: &str, default_scope: Scope) -> ConfigResult<(Scope, PathBuf)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ConfigError::argument_invalid("empty directory entry"));
    }
    if let Some((prefix, rest)) = raw.split_once(':') {
        // A single-letter prefix is a Windows drive, not a scope.
        if prefix.len() > 1 {
            if let Some(scope) = Scope::parse(prefix) {
                if rest.is_empty() {
                    return Err(ConfigError::argument_invalid(format!(
                        "missing path after scope in '{}'",
                        raw
                    )));
                }
                return Ok((scope, PathBuf::from(rest)));
            }
            return Err(ConfigError::feature_value(format!(
                "unknown scope prefix '{}' in directory entry",
                prefix
            )));
        }
    }
    Ok((default_scope, PathBuf::from(raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_complete() {
        let settings = FactorySettings::new();
        // A few spot checks on documented defaults.
        assert_eq!(settings.int_of(ConfigFeature::UpdateCheckFrequencyMs), 2000);
        assert!(settings.bool_of(ConfigFeature::ExceptionOnMissingEntry));
        assert!(!settings.bool_of(ConfigFeature::ExceptionWhenConfigurationNotFound));
        assert!(settings.bool_of(ConfigFeature::StorageTypeAllowAllStorages));
    }

    #[test]
    fn test_update_check_scopes_exclude_runtime() {
        let settings = FactorySettings::new();
        let scopes = settings.strings_of(ConfigFeature::UpdateCheckScopes);
        assert!(!scopes.iter().any(|s| s == "RUNTIME"));
        assert!(scopes.iter().any(|s| s == "USER"));
        assert_eq!(scopes.len(), 9);
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let mut settings = FactorySettings::new();
        let err = settings
            .set(ConfigFeature::TestMode, FeatureValue::Int(1))
            .unwrap_err();
        assert_eq!(err.reason, crate::error::ErrorReason::FeatureValueInvalid);
    }

    #[test]
    fn test_override_round_trip() {
        let mut settings = FactorySettings::new();
        settings
            .set_int(ConfigFeature::UpdateCheckFrequencyMs, 0)
            .unwrap();
        assert_eq!(settings.int_of(ConfigFeature::UpdateCheckFrequencyMs), 0);
    }

    #[test]
    fn test_scoped_directory_parsing() {
        let (scope, path) = parse_scoped_directory("HOST:/etc/app", Scope::User).unwrap();
        assert_eq!(scope, Scope::Host);
        assert_eq!(path, PathBuf::from("/etc/app"));

        let (scope, path) = parse_scoped_directory("/plain/path", Scope::User).unwrap();
        assert_eq!(scope, Scope::User);
        assert_eq!(path, PathBuf::from("/plain/path"));

        assert!(parse_scoped_directory("NOWHERE:/x", Scope::User).is_err());
    }

    #[test]
    fn test_test_mode_needs_permission() {
        let mut settings = FactorySettings::new();
        settings.set_bool(ConfigFeature::TestMode, true).unwrap();
        assert!(!settings.test_mode_active());
        settings.set_bool(ConfigFeature::PermitTestMode, true).unwrap();
        assert!(settings.test_mode_active());
    }
}

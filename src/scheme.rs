//! Configuration schemes: per-key specifications, validators, defaults.
//!
//! A scheme is optional. Where one is attached, it is applied on both sides:
//! reads wrap matching entries with their specification and drop entries that
//! fail validation, and writes are validated before any layer is touched.
//! Declared defaults seed the configuration's default layer.

use crate::entry::{ConfigEntry, EntryType, EntryValue};
use crate::layer::DefaultLayer;
use crate::scope::ScopeSet;
use regex_lite::Regex;
use std::collections::HashMap;
use std::sync::Arc;

/// Value restriction applied by a specification.
#[derive(Debug, Clone)]
pub enum Validator {
    /// Inclusive integer range.
    IntegerRange { min: i128, max: i128 },
    /// The whole text value must match this pattern. For list values, every
    /// item must match.
    Pattern(Regex),
    /// One of a fixed option list (used for Enum/EnumSet entries).
    OneOf(Vec<String>),
    /// A TCP/UDP port number.
    Port,
    /// Parseable as a duration (ISO-8601 or plain seconds).
    DurationLike,
}

impl Validator {
    /// Check a value against this restriction.
    pub fn accepts(&self, value: &EntryValue) -> bool {
        match self {
            Validator::IntegerRange { min, max } => match value.to_i128() {
                Some(v) => v >= *min && v <= *max,
                None => false,
            },
            Validator::Pattern(regex) => {
                let matches_all = |items: &[String]| items.iter().all(|i| full_match(regex, i));
                match value {
                    EntryValue::List(items) => matches_all(items),
                    _ => match value.to_text() {
                        Some(text) => full_match(regex, &text),
                        None => false,
                    },
                }
            }
            Validator::OneOf(options) => match value {
                EntryValue::List(items) => items.iter().all(|i| options.contains(i)),
                _ => match value.to_text() {
                    Some(text) => options.contains(&text),
                    None => false,
                },
            },
            Validator::Port => matches!(value.to_i128(), Some(v) if (0..=65535).contains(&v)),
            Validator::DurationLike => {
                ConfigEntry::candidate("", value.clone(), crate::scope::Scope::Product)
                    .as_duration()
                    .is_ok()
            }
        }
    }
}

/// Anchored match; a partial hit does not validate a value.
fn full_match(regex: &Regex, text: &str) -> bool {
    match regex.find(text) {
        Some(m) => m.start() == 0 && m.end() == text.len(),
        None => false,
    }
}

/// Per-key metadata: type, default, restriction, secrecy, description.
#[derive(Debug, Clone)]
pub struct EntrySpec {
    pub key: String,
    pub entry_type: EntryType,
    pub default: Option<EntryValue>,
    pub validator: Option<Validator>,
    pub secret: bool,
    pub description: Option<String>,
    pub mandatory: bool,
    /// Scopes this entry is meaningful in; `None` means all.
    pub scopes: Option<ScopeSet>,
}

impl EntrySpec {
    pub fn new(key: impl Into<String>, entry_type: EntryType) -> Self {
        Self {
            key: key.into(),
            entry_type,
            default: None,
            validator: None,
            secret: false,
            description: None,
            mandatory: false,
            scopes: None,
        }
    }

    /// Shorthand for a secret text entry (tokens, passwords).
    pub fn secret_text(key: impl Into<String>) -> Self {
        let mut spec = Self::new(key, EntryType::String);
        spec.secret = true;
        spec
    }

    pub fn with_default(mut self, default: EntryValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    pub fn with_scopes(mut self, scopes: ScopeSet) -> Self {
        self.scopes = Some(scopes);
        self
    }

    /// Validate a candidate entry against this specification.
    pub fn validate(&self, entry: &ConfigEntry) -> bool {
        match &self.validator {
            Some(validator) => validator.accepts(entry.value()),
            None => true,
        }
    }
}

/// A scheme: the set of specifications attached to one configuration name.
///
/// The permissive scheme (no specs, nothing rejected) stands in where no
/// scheme was supplied, so the merge engine never branches on "scheme or not".
#[derive(Debug, Clone, Default)]
pub struct ConfigScheme {
    entries: HashMap<String, Arc<EntrySpec>>,
    permissive: bool,
}

impl ConfigScheme {
    /// The null scheme: accepts everything, declares nothing.
    pub fn permissive() -> Self {
        Self {
            entries: HashMap::new(),
            permissive: true,
        }
    }

    pub fn builder() -> SchemeBuilder {
        SchemeBuilder::default()
    }

    pub fn is_permissive(&self) -> bool {
        self.permissive
    }

    /// Specification for a key, if the scheme declares one.
    pub fn specification_for(&self, full_key: &str) -> Option<Arc<EntrySpec>> {
        self.entries.get(full_key).cloned()
    }

    pub fn entry_keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    /// Validity check applied during reads. In strict mode, keys the scheme
    /// does not describe are suppressed.
    pub fn check_entry_validity(&self, full_key: &str, entry: &ConfigEntry, strict: bool) -> bool {
        if self.permissive {
            return true;
        }
        match self.entries.get(full_key) {
            Some(spec) => spec.validate(entry),
            None => !strict,
        }
    }

    /// Seed declared defaults into the default layer.
    pub fn transfer_defaults(&self, default_layer: &DefaultLayer, reset_first: bool) {
        if reset_first {
            default_layer.clear_defaults();
        }
        for (key, spec) in &self.entries {
            if let Some(default) = &spec.default {
                default_layer.seed_default(key, default.clone(), spec.description.as_deref());
            }
        }
    }
}

/// Builds a [`ConfigScheme`] from individual specifications.
#[derive(Debug, Default)]
pub struct SchemeBuilder {
    entries: HashMap<String, Arc<EntrySpec>>,
}

impl SchemeBuilder {
    pub fn entry(mut self, spec: EntrySpec) -> Self {
        self.entries.insert(spec.key.clone(), Arc::new(spec));
        self
    }

    pub fn build(self) -> ConfigScheme {
        ConfigScheme {
            entries: self.entries,
            permissive: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;

    fn candidate(key: &str, value: EntryValue) -> ConfigEntry {
        ConfigEntry::candidate(key, value, Scope::User)
    }

    #[test]
    fn test_integer_range_validator() {
        let v = Validator::IntegerRange { min: 0, max: 99 };
        assert!(v.accepts(&EntryValue::Integer(0)));
        assert!(v.accepts(&EntryValue::Integer(99)));
        assert!(v.accepts(&EntryValue::Text("42".into())));
        assert!(!v.accepts(&EntryValue::Integer(100)));
        assert!(!v.accepts(&EntryValue::Text("many".into())));
    }

    #[test]
    fn test_pattern_validator_is_anchored() {
        let v = Validator::Pattern(Regex::new("[a-z]+").unwrap());
        assert!(v.accepts(&EntryValue::Text("abc".into())));
        assert!(!v.accepts(&EntryValue::Text("abc123".into())));
        assert!(v.accepts(&EntryValue::List(vec!["ab".into(), "cd".into()])));
        assert!(!v.accepts(&EntryValue::List(vec!["ab".into(), "c3".into()])));
    }

    #[test]
    fn test_one_of_validator() {
        let v = Validator::OneOf(vec!["red".into(), "green".into()]);
        assert!(v.accepts(&EntryValue::Text("red".into())));
        assert!(!v.accepts(&EntryValue::Text("blue".into())));
    }

    #[test]
    fn test_port_validator() {
        assert!(Validator::Port.accepts(&EntryValue::Integer(8080)));
        assert!(!Validator::Port.accepts(&EntryValue::Integer(70000)));
        assert!(!Validator::Port.accepts(&EntryValue::Integer(-1)));
    }

    #[test]
    fn test_scheme_validity_checks() {
        let scheme = ConfigScheme::builder()
            .entry(
                EntrySpec::new("port", EntryType::Number).with_validator(Validator::Port),
            )
            .build();

        let good = candidate("port", EntryValue::Integer(80));
        let bad = candidate("port", EntryValue::Integer(99999));
        assert!(scheme.check_entry_validity("port", &good, false));
        assert!(!scheme.check_entry_validity("port", &bad, false));

        // Undeclared keys pass in lax mode, are suppressed in strict mode.
        let other = candidate("other", EntryValue::Text("x".into()));
        assert!(scheme.check_entry_validity("other", &other, false));
        assert!(!scheme.check_entry_validity("other", &other, true));
    }

    #[test]
    fn test_permissive_scheme_accepts_everything() {
        let scheme = ConfigScheme::permissive();
        let entry = candidate("whatever", EntryValue::Text("x".into()));
        assert!(scheme.check_entry_validity("whatever", &entry, true));
        assert!(scheme.specification_for("whatever").is_none());
    }
}

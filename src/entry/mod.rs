//! The entry model: typed values and the per-lookup entry object.
//!
//! Entries are produced fresh on every lookup from whichever layer matched.
//! They carry enough metadata (scope, location, owning layer) to be written
//! back to their exact originating layer. The layer never holds references
//! to entry objects; the entry borrows its layer for write-back only.

pub mod secret;

use crate::error::{ConfigError, ConfigResult};
use crate::layer::ConfigLayer;
use crate::location::ConfigLocation;
use crate::scheme::EntrySpec;
use crate::scope::Scope;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Declared type of a configuration entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    /// A text string; the most basic type.
    String,
    /// An integer or floating point number of unspecified size.
    Number,
    /// true (yes, 1) or false (no, 0).
    Boolean,
    /// A raw byte sequence.
    Bytes,
    /// A list of strings.
    MultipleStrings,
    /// A single value out of a predefined option list.
    Enum,
    /// Multiple values out of a predefined option list.
    EnumSet,
    /// A URI (RFC 3986), carried as text.
    Uri,
    /// A filesystem path, carried as text.
    FilePath,
    /// An ISO-8601 calendar date.
    Date,
    /// An ISO-8601 time of day.
    Time,
    /// An ISO-8601 combined date and time.
    DateTime,
    /// A duration; ISO-8601 (`PT90S`) or plain seconds.
    Duration,
}

/// A typed configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryValue {
    Text(String),
    Integer(i128),
    Float(f64),
    Boolean(bool),
    Bytes(Vec<u8>),
    List(Vec<String>),
}

impl EntryValue {
    /// The natural entry type of this value.
    pub fn natural_type(&self) -> EntryType {
        match self {
            EntryValue::Text(_) => EntryType::String,
            EntryValue::Integer(_) | EntryValue::Float(_) => EntryType::Number,
            EntryValue::Boolean(_) => EntryType::Boolean,
            EntryValue::Bytes(_) => EntryType::Bytes,
            EntryValue::List(_) => EntryType::MultipleStrings,
        }
    }

    /// Render as a string, if representable.
    pub fn to_text(&self) -> Option<String> {
        match self {
            EntryValue::Text(s) => Some(s.clone()),
            EntryValue::Integer(i) => Some(i.to_string()),
            EntryValue::Float(f) => Some(f.to_string()),
            EntryValue::Boolean(b) => Some(b.to_string()),
            EntryValue::Bytes(b) => Some(BASE64.encode(b)),
            EntryValue::List(items) => Some(items.join(",")),
        }
    }

    pub fn to_bool(&self) -> Option<bool> {
        match self {
            EntryValue::Boolean(b) => Some(*b),
            EntryValue::Integer(i) => match i {
                0 => Some(false),
                1 => Some(true),
                _ => None,
            },
            EntryValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn to_i128(&self) -> Option<i128> {
        match self {
            EntryValue::Integer(i) => Some(*i),
            EntryValue::Float(f) if f.fract() == 0.0 => Some(*f as i128),
            EntryValue::Text(s) => s.trim().parse().ok(),
            EntryValue::Boolean(b) => Some(if *b { 1 } else { 0 }),
            _ => None,
        }
    }

    pub fn to_i64(&self) -> Option<i64> {
        self.to_i128().and_then(|v| i64::try_from(v).ok())
    }

    pub fn to_i32(&self) -> Option<i32> {
        self.to_i128().and_then(|v| i32::try_from(v).ok())
    }

    pub fn to_f64(&self) -> Option<f64> {
        match self {
            EntryValue::Float(f) => Some(*f),
            EntryValue::Integer(i) => Some(*i as f64),
            EntryValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Bytes; text values are tried as hex, then base64, then raw UTF-8.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match self {
            EntryValue::Bytes(b) => Some(b.clone()),
            EntryValue::Text(s) => {
                let trimmed = s.trim();
                if let Some(bytes) = hex_decode(trimmed) {
                    return Some(bytes);
                }
                if let Ok(bytes) = BASE64.decode(trimmed) {
                    return Some(bytes);
                }
                Some(trimmed.as_bytes().to_vec())
            }
            _ => None,
        }
    }

    pub fn to_string_list(&self) -> Option<Vec<String>> {
        match self {
            EntryValue::List(items) => Some(items.clone()),
            EntryValue::Text(s) => Some(vec![s.clone()]),
            _ => None,
        }
    }
}

impl fmt::Display for EntryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("<opaque>"),
        }
    }
}

/// Decode an even-length all-hex-digit string, or bail out.
fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.is_empty() || s.len() % 2 != 0 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    let bytes = s.as_bytes();
    for pair in bytes.chunks(2) {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = (pair[1] as char).to_digit(16)?;
        out.push(((hi << 4) | lo) as u8);
    }
    Some(out)
}

/// What an entry returned by a lookup or cursor actually stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryForm {
    /// A real value stored in some layer.
    Leaf,
    /// A synthetic placeholder for a branch of the key tree.
    MapNode,
    /// A synthetic item of a list-typed entry, with its index.
    ListItem(usize),
}

/// Raw per-key data a layer hands out; the merge engine dresses it up into a
/// full [`ConfigEntry`].
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntry {
    pub value: EntryValue,
    pub entry_type: EntryType,
    pub comment: Option<String>,
}

impl RawEntry {
    pub fn new(value: EntryValue) -> Self {
        let entry_type = value.natural_type();
        Self {
            value,
            entry_type,
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// One logical key/value observation, produced fresh per lookup.
#[derive(Clone)]
pub struct ConfigEntry {
    key: String,
    value: EntryValue,
    entry_type: EntryType,
    scope: Scope,
    location: Option<ConfigLocation>,
    spec: Option<Arc<EntrySpec>>,
    comment: Option<String>,
    secret: bool,
    form: EntryForm,
    layer: Option<Arc<dyn ConfigLayer>>,
}

impl ConfigEntry {
    /// A leaf entry resolved from a layer.
    pub fn leaf(
        key: impl Into<String>,
        raw: RawEntry,
        scope: Scope,
        location: ConfigLocation,
        layer: Arc<dyn ConfigLayer>,
    ) -> Self {
        Self {
            key: key.into(),
            value: raw.value,
            entry_type: raw.entry_type,
            scope,
            location: Some(location),
            spec: None,
            comment: raw.comment,
            secret: false,
            form: EntryForm::Leaf,
            layer: Some(layer),
        }
    }

    /// A candidate entry that has not been placed in any layer yet;
    /// used for pre-write validation.
    pub fn candidate(key: impl Into<String>, value: EntryValue, scope: Scope) -> Self {
        let entry_type = value.natural_type();
        Self {
            key: key.into(),
            value,
            entry_type,
            scope,
            location: None,
            spec: None,
            comment: None,
            secret: false,
            form: EntryForm::Leaf,
            layer: None,
        }
    }

    /// A synthetic placeholder for a branch node of the key tree.
    pub fn map_node(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: EntryValue::Text(String::new()),
            entry_type: EntryType::String,
            scope: Scope::Product,
            location: None,
            spec: None,
            comment: None,
            secret: false,
            form: EntryForm::MapNode,
            layer: None,
        }
    }

    /// A synthetic item of a list-typed entry.
    pub fn list_item(
        list_key: impl Into<String>,
        index: usize,
        value: impl Into<String>,
        item_type: EntryType,
        scope: Scope,
    ) -> Self {
        Self {
            key: list_key.into(),
            value: EntryValue::Text(value.into()),
            entry_type: item_type,
            scope,
            location: None,
            spec: None,
            comment: None,
            secret: false,
            form: EntryForm::ListItem(index),
            layer: None,
        }
    }

    /// Attach a specification; picks up its declared type and secrecy.
    pub fn with_spec(mut self, spec: Arc<EntrySpec>) -> Self {
        self.secret = spec.secret;
        self.entry_type = spec.entry_type;
        self.spec = Some(spec);
        self
    }

    /// A view of the same entry under a simple (single-segment) key,
    /// as handed out by the cursor.
    pub fn with_simple_key(mut self, simple_key: impl Into<String>) -> Self {
        self.key = simple_key.into();
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &EntryValue {
        &self.value
    }

    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn location(&self) -> Option<&ConfigLocation> {
        self.location.as_ref()
    }

    pub fn spec(&self) -> Option<&Arc<EntrySpec>> {
        self.spec.as_ref()
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn set_comment(&mut self, comment: Option<String>) {
        self.comment = comment;
    }

    pub fn is_secret(&self) -> bool {
        self.secret
    }

    pub fn form(&self) -> EntryForm {
        self.form
    }

    /// Only leaf entries hold a meaningfully readable/writable value.
    pub fn is_leaf(&self) -> bool {
        self.form == EntryForm::Leaf
    }

    // Typed accessors; each fails with a ConversionFailure reason.

    pub fn as_string(&self) -> ConfigResult<String> {
        self.value
            .to_text()
            .ok_or_else(|| ConfigError::conversion(&self.key, "string"))
    }

    pub fn as_bool(&self) -> ConfigResult<bool> {
        self.value
            .to_bool()
            .ok_or_else(|| ConfigError::conversion(&self.key, "boolean"))
    }

    pub fn as_i32(&self) -> ConfigResult<i32> {
        self.value
            .to_i32()
            .ok_or_else(|| ConfigError::conversion(&self.key, "i32"))
    }

    pub fn as_i64(&self) -> ConfigResult<i64> {
        self.value
            .to_i64()
            .ok_or_else(|| ConfigError::conversion(&self.key, "i64"))
    }

    pub fn as_i128(&self) -> ConfigResult<i128> {
        self.value
            .to_i128()
            .ok_or_else(|| ConfigError::conversion(&self.key, "i128"))
    }

    pub fn as_f64(&self) -> ConfigResult<f64> {
        self.value
            .to_f64()
            .ok_or_else(|| ConfigError::conversion(&self.key, "f64"))
    }

    pub fn as_bytes(&self) -> ConfigResult<Vec<u8>> {
        self.value
            .to_bytes()
            .ok_or_else(|| ConfigError::conversion(&self.key, "bytes"))
    }

    pub fn as_string_list(&self) -> ConfigResult<Vec<String>> {
        self.value
            .to_string_list()
            .ok_or_else(|| ConfigError::conversion(&self.key, "string list"))
    }

    pub fn as_date(&self) -> ConfigResult<NaiveDate> {
        let text = self.as_string()?;
        text.trim()
            .parse()
            .map_err(|_| ConfigError::conversion(&self.key, "date"))
    }

    pub fn as_time(&self) -> ConfigResult<NaiveTime> {
        let text = self.as_string()?;
        text.trim()
            .parse()
            .map_err(|_| ConfigError::conversion(&self.key, "time"))
    }

    pub fn as_datetime(&self) -> ConfigResult<NaiveDateTime> {
        let text = self.as_string()?;
        text.trim()
            .parse()
            .map_err(|_| ConfigError::conversion(&self.key, "datetime"))
    }

    /// Durations accept ISO-8601 (`PT90S`, `PT1H30M`) or plain seconds.
    pub fn as_duration(&self) -> ConfigResult<Duration> {
        let text = self.as_string()?;
        parse_duration(text.trim()).ok_or_else(|| ConfigError::conversion(&self.key, "duration"))
    }

    /// Write a new value back to the exact layer this entry came from.
    pub fn write_back(&self, value: EntryValue) -> ConfigResult<()> {
        let layer = self.layer.as_ref().ok_or_else(|| {
            ConfigError::not_writeable(format!("entry '{}' has no backing layer", self.key))
        })?;
        if !layer.is_writeable() {
            return Err(ConfigError::not_writeable(format!(
                "layer holding '{}' is read-only",
                self.key
            )));
        }
        layer.write(&self.key, value, self.comment.as_deref())
    }
}

impl fmt::Debug for ConfigEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("ConfigEntry");
        dbg.field("key", &self.key)
            .field("type", &self.entry_type)
            .field("scope", &self.scope)
            .field("form", &self.form);
        if self.secret {
            dbg.field("value", &"***");
        } else {
            dbg.field("value", &self.value);
        }
        dbg.finish()
    }
}

/// `PT…` ISO-8601 durations plus bare seconds.
fn parse_duration(text: &str) -> Option<Duration> {
    if let Ok(secs) = text.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let rest = text
        .strip_prefix("PT")
        .or_else(|| text.strip_prefix("pt"))?;
    let mut total = 0f64;
    let mut number = String::new();
    for c in rest.chars() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let value: f64 = number.parse().ok()?;
        number.clear();
        match c.to_ascii_uppercase() {
            'H' => total += value * 3600.0,
            'M' => total += value * 60.0,
            'S' => total += value,
            _ => return None,
        }
    }
    if !number.is_empty() {
        return None;
    }
    Some(Duration::from_secs_f64(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        assert_eq!(EntryValue::Text("42".into()).to_i64(), Some(42));
        assert_eq!(EntryValue::Integer(1).to_bool(), Some(true));
        assert_eq!(EntryValue::Text("yes".into()).to_bool(), Some(true));
        assert_eq!(EntryValue::Text("no".into()).to_bool(), Some(false));
        assert_eq!(EntryValue::Text("maybe".into()).to_bool(), None);
        assert_eq!(EntryValue::Float(2.5).to_f64(), Some(2.5));
        assert_eq!(EntryValue::Float(2.5).to_i64(), None);
    }

    #[test]
    fn test_bytes_from_hex_then_base64_then_utf8() {
        // Even-length hex decodes as hex.
        assert_eq!(
            EntryValue::Text("cafe".into()).to_bytes(),
            Some(vec![0xca, 0xfe])
        );
        // Valid base64 that is not hex.
        assert_eq!(
            EntryValue::Text("aGVsbG8=".into()).to_bytes(),
            Some(b"hello".to_vec())
        );
        // Neither: raw UTF-8.
        assert_eq!(
            EntryValue::Text("n!".into()).to_bytes(),
            Some(b"n!".to_vec())
        );
    }

    #[test]
    fn test_duration_parsing() {
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("PT90S"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("PT1H30M"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("whenever"), None);
    }

    #[test]
    fn test_candidate_entry_types() {
        let entry = ConfigEntry::candidate("port", EntryValue::Integer(8080), Scope::User);
        assert_eq!(entry.entry_type(), EntryType::Number);
        assert_eq!(entry.as_i64().unwrap(), 8080);
        assert_eq!(entry.as_string().unwrap(), "8080");
    }

    #[test]
    fn test_secret_entry_debug_is_redacted() {
        let spec = Arc::new(EntrySpec::secret_text("token"));
        let entry =
            ConfigEntry::candidate("token", EntryValue::Text("hunter2".into()), Scope::User)
                .with_spec(spec);
        let rendered = format!("{:?}", entry);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_synthetic_forms() {
        let node = ConfigEntry::map_node("server");
        assert!(!node.is_leaf());
        assert_eq!(node.form(), EntryForm::MapNode);

        let item = ConfigEntry::list_item("hosts", 2, "b", EntryType::String, Scope::User);
        assert_eq!(item.form(), EntryForm::ListItem(2));
        assert_eq!(item.as_string().unwrap(), "b");
    }
}

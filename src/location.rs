//! Addressable configuration locations.
//!
//! A location is "where to look": a (storage, scope, optional instance
//! handle) triple, created during search-list construction or layer
//! materialization and immutable thereafter. Identity is defined by storage
//! and handle only: the same physical file addressed at two logical scopes
//! is still the same place to the change notifier.

use crate::scope::Scope;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// An addressable (storage, scope, handle) triple.
#[derive(Debug, Clone)]
pub struct ConfigLocation {
    scope: Scope,
    storage_id: String,
    handle: Option<PathBuf>,
    writeable: bool,
    format_id: Option<String>,
}

impl ConfigLocation {
    pub fn new(scope: Scope, storage_id: impl Into<String>, writeable: bool) -> Self {
        Self {
            scope,
            storage_id: storage_id.into(),
            handle: None,
            writeable,
            format_id: None,
        }
    }

    pub fn with_handle(mut self, handle: impl Into<PathBuf>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn with_format(mut self, format_id: impl Into<String>) -> Self {
        self.format_id = Some(format_id.into());
        self
    }

    /// Clone this location with a different handle, keeping storage, scope and
    /// format. Used for nested resources such as `.d` fragment files.
    pub fn derive(&self, handle: impl Into<PathBuf>) -> Self {
        let mut derived = self.clone();
        derived.handle = Some(handle.into());
        derived
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn storage_id(&self) -> &str {
        &self.storage_id
    }

    pub fn handle(&self) -> Option<&Path> {
        self.handle.as_deref()
    }

    pub fn is_writeable(&self) -> bool {
        self.writeable
    }

    pub fn format_id(&self) -> Option<&str> {
        self.format_id.as_deref()
    }

    /// Rendered form, also used as the per-entry change cache key component.
    pub fn location_string(&self) -> String {
        match &self.handle {
            Some(handle) => format!(
                "config:[{}]:{}:{}",
                self.scope,
                self.storage_id,
                handle.display()
            ),
            None => format!("config:[{}]:{}:/", self.scope, self.storage_id),
        }
    }
}

impl fmt::Display for ConfigLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location_string())
    }
}

// Identity: storage + handle. Scope deliberately excluded.
impl PartialEq for ConfigLocation {
    fn eq(&self, other: &Self) -> bool {
        self.storage_id == other.storage_id && self.handle == other.handle
    }
}

impl Eq for ConfigLocation {}

impl Hash for ConfigLocation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.storage_id.hash(state);
        self.handle.hash(state);
    }
}

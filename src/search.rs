//! The search list: ordered candidate locations for layer discovery.
//!
//! The list is grouped into scope sections, most specific scope first.
//! Reading walks the list front to back and registers each found layer into
//! the layered configuration, whose `add` gives the layer registered last
//! within a scope the highest priority. An entry's effective priority
//! therefore GROWS towards the end of its scope section: `insert_at_scope_end`
//! yields the strongest entry of a scope, `insert_at_scope_start` the
//! weakest. (The ordering is validated by behavior tests, not prose; it is
//! an easy thing to invert by accident.)

use crate::location::ConfigLocation;
use std::cmp::Ordering;

/// Ordered list of candidate locations, grouped by scope.
#[derive(Debug, Default, Clone)]
pub struct SearchList {
    entries: Vec<ConfigLocation>,
}

impl SearchList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ConfigLocation] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Insert at the beginning of the entry's scope section: consulted first,
    /// overridden by every other source of the same scope.
    pub fn insert_at_scope_start(&mut self, entry: ConfigLocation) {
        let ordinal = entry.scope().ordinal();
        let index = self
            .entries
            .iter()
            .position(|e| e.scope().ordinal() <= ordinal)
            .unwrap_or(self.entries.len());
        self.entries.insert(index, entry);
    }

    /// Insert at the end of the entry's scope section: consulted last,
    /// overriding every other source of the same scope.
    pub fn insert_at_scope_end(&mut self, entry: ConfigLocation) {
        let ordinal = entry.scope().ordinal();
        let index = self
            .entries
            .iter()
            .position(|e| e.scope().ordinal() < ordinal)
            .unwrap_or(self.entries.len());
        self.entries.insert(index, entry);
    }

    /// Final ordering pass after all contributions.
    ///
    /// Primary key: scope ordinal descending. Secondary key, within one
    /// scope: storages named earlier in `priorities` sort later, which gives
    /// them higher effective priority; unnamed storages sort first (lowest
    /// priority), or are dropped entirely when `allow_unlisted` is false.
    /// The sort is stable, so same-storage entries keep their insertion
    /// order.
    pub fn sort_by_storage_priorities(&mut self, priorities: &[String], allow_unlisted: bool) {
        let rank = |location: &ConfigLocation| -> Option<usize> {
            priorities.iter().position(|id| id == location.storage_id())
        };
        if !allow_unlisted {
            self.entries.retain(|e| rank(e).is_some());
        }
        self.entries.sort_by(|a, b| {
            match b.scope().ordinal().cmp(&a.scope().ordinal()) {
                Ordering::Equal => {}
                other => return other,
            }
            // Unnamed storages get the lowest effective priority: first in
            // the section. Among named ones, a lower priority index sorts
            // later.
            let rank_a = rank(a);
            let rank_b = rank(b);
            match (rank_a, rank_b) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(ra), Some(rb)) => rb.cmp(&ra),
            }
        });
    }
}

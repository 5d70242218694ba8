//! Configuration scopes and scope sets.
//!
//! A scope is a precedence tier, ordered from the most generic (product-wide
//! defaults) to the most specific (enforced policy). Higher-ordinal scopes
//! override lower ones on reads, and are preferred as write targets when a
//! caller hands in a set of candidate scopes.

use std::fmt;

/// Precedence tier a configuration entry is effective for.
///
/// Declaration order is the precedence order: later variants override earlier
/// ones. `Policy` reads above everything else but is not a normal write tier;
/// writers treat it as read-dominant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    /// Built-in product-wide defaults, the floor of the hierarchy.
    Product = 0,
    /// Settings for the organization operating the software.
    Organization = 1,
    /// Shared across clusters in a cloud deployment.
    Cloud = 2,
    /// One cluster of hosts.
    Cluster = 3,
    /// This host / OS instance ("system-wide settings").
    Host = 4,
    /// This installation of the application, regardless of user or host state.
    Application = 5,
    /// The current user, for this application.
    User = 6,
    /// The current process/session context (environment, shell).
    Session = 7,
    /// Volatile in-process values, lost on restart.
    Runtime = 8,
    /// Administratively enforced settings; overrides everything on reads.
    Policy = 9,
}

impl Scope {
    /// All scopes, in ascending precedence order.
    pub const ALL: [Scope; 10] = [
        Scope::Product,
        Scope::Organization,
        Scope::Cloud,
        Scope::Cluster,
        Scope::Host,
        Scope::Application,
        Scope::User,
        Scope::Session,
        Scope::Runtime,
        Scope::Policy,
    ];

    /// Numeric precedence; higher wins on reads.
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Parse a scope name, case-insensitively.
    ///
    /// Used for `SCOPE:PATH` directory settings and scope-name lists.
    pub fn parse(name: &str) -> Option<Scope> {
        let name = name.trim();
        Scope::ALL
            .iter()
            .copied()
            .find(|s| s.name().eq_ignore_ascii_case(name))
    }

    /// Canonical upper-case name, as used in settings values.
    pub fn name(self) -> &'static str {
        match self {
            Scope::Product => "PRODUCT",
            Scope::Organization => "ORGANIZATION",
            Scope::Cloud => "CLOUD",
            Scope::Cluster => "CLUSTER",
            Scope::Host => "HOST",
            Scope::Application => "APPLICATION",
            Scope::User => "USER",
            Scope::Session => "SESSION",
            Scope::Runtime => "RUNTIME",
            Scope::Policy => "POLICY",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A cheap, copyable set of scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeSet(u16);

impl ScopeSet {
    /// The empty set.
    pub fn empty() -> Self {
        ScopeSet(0)
    }

    /// All ten scopes.
    pub fn all() -> Self {
        ScopeSet((1u16 << Scope::ALL.len()) - 1)
    }

    /// A set holding exactly one scope.
    pub fn only(scope: Scope) -> Self {
        ScopeSet(1 << scope.ordinal())
    }

    /// Build a set from a slice of scopes.
    pub fn of(scopes: &[Scope]) -> Self {
        let mut set = ScopeSet::empty();
        for s in scopes {
            set = set.with(*s);
        }
        set
    }

    /// This set plus `scope`.
    pub fn with(self, scope: Scope) -> Self {
        ScopeSet(self.0 | (1 << scope.ordinal()))
    }

    /// This set minus `scope`.
    pub fn without(self, scope: Scope) -> Self {
        ScopeSet(self.0 & !(1 << scope.ordinal()))
    }

    /// Scopes present in both sets.
    pub fn intersect(self, other: ScopeSet) -> ScopeSet {
        ScopeSet(self.0 & other.0)
    }

    pub fn contains(self, scope: Scope) -> bool {
        self.0 & (1 << scope.ordinal()) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Scopes in ascending precedence order.
    pub fn iter(self) -> impl Iterator<Item = Scope> {
        Scope::ALL.into_iter().filter(move |s| self.contains(*s))
    }

    /// Scopes in descending precedence order, the order in which write
    /// placement tries candidate scopes.
    pub fn iter_most_specific_first(self) -> impl Iterator<Item = Scope> {
        Scope::ALL
            .into_iter()
            .rev()
            .filter(move |s| self.contains(*s))
    }
}

impl Default for ScopeSet {
    fn default() -> Self {
        ScopeSet::all()
    }
}

impl FromIterator<Scope> for ScopeSet {
    fn from_iter<T: IntoIterator<Item = Scope>>(iter: T) -> Self {
        let mut set = ScopeSet::empty();
        for s in iter {
            set = set.with(s);
        }
        set
    }
}

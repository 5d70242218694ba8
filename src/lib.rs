//! confstack: a layered configuration engine.
//!
//! Given an application identity and a configuration name, the factory
//! discovers physical sources across an ordered hierarchy of scopes (product
//! defaults up to enforced policy), merges them into one coherent view, and
//! exposes typed reads, three-tier write placement, a tree cursor over the
//! merged key space, and debounced change notification.
//!
//! ```no_run
//! use confstack::{ConfigFactoryBuilder, Scope};
//!
//! # fn main() -> Result<(), confstack::ConfigError> {
//! let factory = ConfigFactoryBuilder::new("Acme", "Widget")?.build()?;
//! let config = factory.config("server")?;
//! let port = config.get_i64("network/port")?;
//! config.put_string("network/host", "0.0.0.0", Scope::User)?;
//! config.close();
//! # Ok(())
//! # }
//! ```

pub mod blob;
pub mod cursor;
pub mod entry;
pub mod error;
pub mod facade;
pub mod factory;
pub mod format;
pub mod layer;
pub mod layered;
pub mod location;
pub mod mapper;
pub mod scheme;
pub mod scope;
pub mod search;
pub mod settings;
pub mod storage;
pub mod watch;

pub use blob::BlobConfig;
pub use cursor::ConfigCursor;
pub use entry::secret::SecretValue;
pub use entry::{ConfigEntry, EntryForm, EntryType, EntryValue};
pub use error::{ConfigError, ConfigResult, ErrorReason};
pub use facade::Config;
pub use factory::{ConfigFactory, ConfigFactoryBuilder};
pub use layer::ConfigLayer;
pub use layered::LayeredConfiguration;
pub use location::ConfigLocation;
pub use scheme::{ConfigScheme, EntrySpec, SchemeBuilder, Validator};
pub use scope::{Scope, ScopeSet};
pub use settings::{ConfigFeature, FactorySettings, FeatureValue};
pub use storage::{ConfigDiscoveryInfo, ConfigStorage};
pub use watch::{SubscriptionId, UpdateListener};

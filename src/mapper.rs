//! Optional structural mapper capability.
//!
//! A mapper copies the tree under a cursor into a caller-supplied target
//! object. The capability is pluggable and may be absent; absence is a
//! documented no-op that maps zero fields, never a failure.

use crate::cursor::ConfigCursor;
use crate::error::ConfigResult;
use once_cell::sync::OnceCell;
use std::any::Any;

/// Naming convention applied when matching tree keys to target fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamingConvention {
    /// Keys match field names verbatim.
    #[default]
    Verbatim,
    /// `some-key` and `some_key` are treated alike.
    Relaxed,
}

/// Copies the tree at the cursor's position into `target`.
pub trait TreeMapper: Send + Sync {
    /// Returns the number of fields mapped.
    fn map_tree(
        &self,
        cursor: &mut ConfigCursor,
        target: &mut dyn Any,
        naming: NamingConvention,
    ) -> ConfigResult<usize>;
}

static INSTALLED: OnceCell<Box<dyn TreeMapper>> = OnceCell::new();

/// Install a mapper implementation. Only the first installation wins;
/// returns false when one was already present.
pub fn install_mapper(mapper: Box<dyn TreeMapper>) -> bool {
    INSTALLED.set(mapper).is_ok()
}

/// Map the tree at the cursor into `target` using the installed mapper.
/// Without an installed mapper this maps nothing and reports zero.
pub fn map_tree(
    cursor: &mut ConfigCursor,
    target: &mut dyn Any,
    naming: NamingConvention,
) -> ConfigResult<usize> {
    match INSTALLED.get() {
        Some(mapper) => mapper.map_tree(cursor, target, naming),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layered::LayeredConfiguration;
    use crate::search::SearchList;
    use crate::settings::{ConfigFeature, FactorySettings};
    use crate::storage::StorageRegistry;
    use parking_lot::RwLock;
    use std::sync::Arc;

    #[test]
    fn test_absent_mapper_is_noop_zero() {
        let mut settings = FactorySettings::new();
        settings
            .set_int(ConfigFeature::UpdateCheckFrequencyMs, 0)
            .unwrap();
        let config = LayeredConfiguration::new(
            "mapper-test",
            None,
            &settings,
            Arc::new(StorageRegistry::new(Vec::new())),
            Arc::new(RwLock::new(SearchList::new())),
            None,
        )
        .unwrap();
        let mut cursor = crate::cursor::ConfigCursor::new(config);
        let mut target = ();
        let mapped = map_tree(&mut cursor, &mut target, NamingConvention::default()).unwrap();
        assert_eq!(mapped, 0);
    }
}

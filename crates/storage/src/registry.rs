//! Store registry & loader (C1)
//!
//! A process-wide, read-mostly map from filename suffix to a factory that
//! produces a fresh, empty [`ReadableStore`]. `open_store` parses the
//! suffix, looks up the factory, constructs the store, and calls `load`.
//! Grounded on `strata-storage::registry::PrimitiveRegistry`'s
//! `HashMap<TypeId, Arc<dyn _>>` shape and on the source's
//! `ReadableStore::openStore`/`RegisterStoreFactory`
//! (`original_source/src/terark/db/db_store.cpp`), which this corrects from
//! a fatal `THROW_STD` into a recoverable `Error::UnknownStoreType`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use composite_core::{Error, Result};
use once_cell::sync::Lazy;

use crate::store::btree_index::BTreeIndexStore;
use crate::store::fixedwidth::FixedWidthStore;
use crate::store::frozen::FrozenValueStore;
use crate::store::mock::MockValueStore;
use crate::store::ReadableStore;

/// A factory produces a fresh, empty store ready to have `load` called on it.
pub type StoreFactory = Box<dyn Fn() -> Box<dyn ReadableStore> + Send + Sync>;

/// The process-wide suffix -> factory map.
pub struct StoreRegistry {
    factories: RwLock<HashMap<String, StoreFactory>>,
}

impl StoreRegistry {
    fn new() -> Self {
        StoreRegistry {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Register `factory` for `suffix` (without the leading dot, e.g. `"mock"`).
    ///
    /// # Errors
    /// [`Error::DuplicateRegistration`] if `suffix` is already registered.
    pub fn register(&self, suffix: &str, factory: StoreFactory) -> Result<()> {
        let mut factories = self.factories.write().expect("registry lock poisoned");
        if factories.contains_key(suffix) {
            return Err(Error::DuplicateRegistration(suffix.to_string()));
        }
        factories.insert(suffix.to_string(), factory);
        Ok(())
    }

    /// `true` if a factory is registered for `suffix`.
    pub fn is_registered(&self, suffix: &str) -> bool {
        self.factories
            .read()
            .expect("registry lock poisoned")
            .contains_key(suffix)
    }

    /// Construct a fresh store for `suffix` and load it from `path`.
    ///
    /// # Errors
    /// [`Error::UnknownStoreType`] if no factory is registered for `suffix`.
    pub fn open(&self, suffix: &str, path: &Path) -> Result<Box<dyn ReadableStore>> {
        let mut store = {
            let factories = self.factories.read().expect("registry lock poisoned");
            let factory = factories
                .get(suffix)
                .ok_or_else(|| Error::UnknownStoreType(suffix.to_string()))?;
            factory()
        };
        store.load(path)?;
        Ok(store)
    }
}

/// The global registry, populated with this crate's built-in store kinds on
/// first access.
pub static REGISTRY: Lazy<StoreRegistry> = Lazy::new(|| {
    let registry = StoreRegistry::new();
    register_builtin_stores(&registry);
    registry
});

fn register_builtin_stores(registry: &StoreRegistry) {
    let _ = registry.register("mock", Box::new(MockValueStore::factory));
    let _ = registry.register("rovec", Box::new(FrozenValueStore::factory));
    let _ = registry.register("fixlen", Box::new(FixedWidthStore::factory));
    let _ = registry.register("btreeidx", Box::new(BTreeIndexStore::factory));
}

/// Extract the suffix (the substring after the last `.`) from a filename.
pub fn suffix_of(fname: &str) -> &str {
    match fname.rfind('.') {
        Some(pos) => &fname[pos + 1..],
        None => fname,
    }
}

/// Open `segDir/fname` by dispatching on its suffix through [`REGISTRY`].
pub fn open_store(seg_dir: &Path, fname: &str) -> Result<Box<dyn ReadableStore>> {
    let suffix = suffix_of(fname);
    REGISTRY.open(suffix, &seg_dir.join(fname))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_suffix_is_an_error() {
        let err = REGISTRY.open("doesnotexist", Path::new("/tmp/whatever"));
        assert!(matches!(err, Err(Error::UnknownStoreType(_))));
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let registry = StoreRegistry::new();
        registry
            .register("mock", Box::new(MockValueStore::factory))
            .unwrap();
        let second = registry.register("mock", Box::new(MockValueStore::factory));
        assert!(matches!(second, Err(Error::DuplicateRegistration(_))));
    }

    #[test]
    fn suffix_of_takes_the_last_segment() {
        assert_eq!(suffix_of("values.mock"), "mock");
        assert_eq!(suffix_of("wr-0001/idx.0.btreeidx"), "btreeidx");
        assert_eq!(suffix_of("noext"), "noext");
    }

    #[test]
    fn builtin_suffixes_are_registered() {
        assert!(REGISTRY.is_registered("mock"));
        assert!(REGISTRY.is_registered("rovec"));
        assert!(REGISTRY.is_registered("fixlen"));
        assert!(REGISTRY.is_registered("btreeidx"));
    }
}

//! Index type configurations and the name-keyed registry.
//!
//! Types are registered explicitly, usually at startup, so resolving a type
//! name can only fail one way: `UnknownType`.

use std::collections::hash_map::Entry;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use sift_core::{FieldConfig, IndexElement, IndexError, IndexResult};

/// Per-entity-type descriptor supplied by the module that owns the entity.
///
/// `fetch_page(offset, limit)` must return up to `limit` elements tagged
/// `Insert`, ordered consistently across calls with increasing offsets; an
/// empty or short page ends the scan.
#[async_trait]
pub trait IndexTypeConfig: Send + Sync {
    /// Registry key and index namespace.
    fn name(&self) -> &str;

    /// Ordered field list. Read once at registration.
    fn fields(&self) -> Vec<FieldConfig>;

    async fn fetch_page(&self, offset: usize, limit: usize) -> anyhow::Result<Vec<IndexElement>>;

    /// Called after each indexed batch. Errors are logged, never fatal.
    async fn on_indexed(&self, _batch: &[IndexElement]) -> anyhow::Result<()> { Ok(()) }
}

#[derive(Default)]
pub struct TypeRegistry {
    types: RwLock<FxHashMap<String, Arc<dyn IndexTypeConfig>>>,
}

impl TypeRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn register(&self, config: Arc<dyn IndexTypeConfig>) -> IndexResult<()> {
        let mut types = self.types.write().unwrap_or_else(|e| e.into_inner());
        match types.entry(config.name().to_string()) {
            Entry::Occupied(e) => Err(IndexError::DuplicateType(e.key().clone())),
            Entry::Vacant(v) => {
                v.insert(config);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, name: &str) -> IndexResult<Arc<dyn IndexTypeConfig>> {
        let types = self.types.read().unwrap_or_else(|e| e.into_inner());
        types.get(name).cloned().ok_or_else(|| IndexError::UnknownType(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let types = self.types.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = types.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize { self.types.read().unwrap_or_else(|e| e.into_inner()).len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl IndexTypeConfig for Named {
        fn name(&self) -> &str { self.0 }
        fn fields(&self) -> Vec<FieldConfig> { vec![FieldConfig::text("name")] }
        async fn fetch_page(&self, _offset: usize, _limit: usize) -> anyhow::Result<Vec<IndexElement>> { Ok(Vec::new()) }
    }

    #[test]
    fn register_and_lookup() {
        let r = TypeRegistry::new();
        r.register(Arc::new(Named("news"))).unwrap();
        r.register(Arc::new(Named("category"))).unwrap();
        assert_eq!(r.lookup("news").unwrap().name(), "news");
        assert_eq!(r.names(), vec!["category".to_string(), "news".to_string()]);
    }

    #[test]
    fn duplicate_and_unknown() {
        let r = TypeRegistry::new();
        r.register(Arc::new(Named("news"))).unwrap();
        assert!(matches!(r.register(Arc::new(Named("news"))), Err(IndexError::DuplicateType(n)) if n == "news"));
        assert!(matches!(r.lookup("tags"), Err(IndexError::UnknownType(n)) if n == "tags"));
        assert_eq!(r.len(), 1);
    }
}

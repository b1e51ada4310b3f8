//! Pruning context cache shared with query planners.
//!
//! Readers take a snapshot with a single atomic load; DDL replaces the whole
//! map with copy-on-write semantics.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::ids::ClassId;
use crate::partition::PruningContext;

/// Cache of pruning contexts keyed by partitioned parent.
#[derive(Debug)]
pub struct PartitionCache {
    contexts: ArcSwap<HashMap<ClassId, Arc<PruningContext>>>,
}

impl PartitionCache {
    pub fn new() -> Self {
        Self {
            contexts: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Returns the cached context of a parent, if any.
    pub fn get(&self, parent: ClassId) -> Option<Arc<PruningContext>> {
        self.contexts.load().get(&parent).cloned()
    }

    /// Publishes a context for its parent.
    pub fn insert(&self, context: PruningContext) -> Arc<PruningContext> {
        let context = Arc::new(context);
        self.contexts.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(context.parent, Arc::clone(&context));
            next
        });
        context
    }

    /// Drops the context of a parent after its partitions changed.
    pub fn invalidate(&self, parent: ClassId) {
        if self.contexts.load().contains_key(&parent) {
            self.contexts.rcu(|current| {
                let mut next = HashMap::clone(current);
                next.remove(&parent);
                next
            });
        }
    }

    pub fn clear(&self) {
        self.contexts.store(Arc::new(HashMap::new()));
    }

    pub fn len(&self) -> usize {
        self.contexts.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PartitionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;
    use crate::partition::{PartitionKey, PartitionKind};

    fn context(parent: u32) -> PruningContext {
        PruningContext {
            parent: ClassId(parent),
            kind: PartitionKind::Hash,
            key: PartitionKey::attribute("k"),
            key_domain: Domain::Integer,
            hash_size: 2,
            partitions: Vec::new(),
            enumeration_limit: 64,
        }
    }

    #[test]
    fn test_snapshot_survives_invalidation() {
        let cache = PartitionCache::new();
        cache.insert(context(1));
        cache.insert(context(2));
        let held = cache.get(ClassId(1)).unwrap();
        cache.invalidate(ClassId(1));
        assert!(cache.get(ClassId(1)).is_none());
        assert_eq!(held.parent, ClassId(1));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}

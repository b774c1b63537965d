use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use crate::graph::{normalize_text, Domain};
use crate::sources::Passage;

/// Thread-safe LRU cache for source answers
///
/// Keyed by domain and normalized query, so repeated plans (expand passes,
/// retried jobs) do not hit remote sources again.
pub struct PassageCache {
    cache: Mutex<LruCache<(Domain, String), Vec<Passage>>>,
}

impl PassageCache {
    /// Create a cache holding at most `capacity` answers (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    fn key(domain: &Domain, query: &str) -> (Domain, String) {
        (domain.clone(), normalize_text(query))
    }

    pub fn get(&self, domain: &Domain, query: &str) -> Option<Vec<Passage>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&Self::key(domain, query))
            .cloned()
    }

    pub fn put(&self, domain: &Domain, query: &str, passages: Vec<Passage>) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(Self::key(domain, query), passages);
    }

    pub fn len(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

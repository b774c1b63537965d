use async_trait::async_trait;
use std::sync::Arc;

use super::{EvidenceSource, Passage, SourceError};
use crate::cache::PassageCache;
use crate::graph::Domain;

/// LRU-cached wrapper around any evidence source.
///
/// Only successful answers are cached; failures are retried on the next call.
pub struct CachedSource {
    inner: Arc<dyn EvidenceSource>,
    cache: Arc<PassageCache>,
    name: String,
}

impl CachedSource {
    pub fn new(inner: Arc<dyn EvidenceSource>, cache: Arc<PassageCache>) -> Self {
        let name = format!("cached({})", inner.name());
        Self { inner, cache, name }
    }
}

#[async_trait]
impl EvidenceSource for CachedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, domain: &Domain, query: &str) -> Result<Vec<Passage>, SourceError> {
        if let Some(hit) = self.cache.get(domain, query) {
            log::debug!("Passage cache hit for {} / {}", domain, query);
            return Ok(hit);
        }
        let passages = self.inner.fetch(domain, query).await?;
        self.cache.put(domain, query, passages.clone());
        Ok(passages)
    }
}

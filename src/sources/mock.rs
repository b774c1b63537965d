use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::{EvidenceSource, Passage, SourceError};
use crate::graph::Domain;

const SOURCE_NAME: &str = "mock";

/// Deterministic, scripted evidence source.
///
/// Passages are registered per domain (returned for every query) or per
/// exact `(domain, query)`. Domains and queries can be scripted to fail, and
/// every call is recorded for assertions.
#[derive(Default)]
pub struct MockSource {
    by_domain: HashMap<Domain, Vec<Passage>>,
    by_query: HashMap<(Domain, String), Vec<Passage>>,
    failing_domains: HashSet<Domain>,
    failing_queries: HashSet<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Passage returned for any query in `domain`.
    pub fn with_passage(mut self, domain: &str, title: &str, snippet: &str) -> Self {
        let domain = Domain::new(domain);
        let passage = Passage::new(SOURCE_NAME, domain.clone(), title, snippet);
        self.by_domain.entry(domain).or_default().push(passage);
        self
    }

    /// Passage returned only for this exact query.
    pub fn with_query_passage(mut self, domain: &str, query: &str, title: &str, snippet: &str) -> Self {
        let domain = Domain::new(domain);
        let passage = Passage::new(SOURCE_NAME, domain.clone(), title, snippet);
        self.by_query
            .entry((domain, query.to_string()))
            .or_default()
            .push(passage);
        self
    }

    /// Every query in `domain` fails.
    pub fn fail_domain(mut self, domain: &str) -> Self {
        self.failing_domains.insert(Domain::new(domain));
        self
    }

    /// This query fails in every domain.
    pub fn fail_query(mut self, query: &str) -> Self {
        self.failing_queries.insert(query.to_string());
        self
    }

    /// Sleep before answering (exercises stage timeouts).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// `(domain, query)` pairs seen so far, in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EvidenceSource for MockSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(&self, domain: &Domain, query: &str) -> Result<Vec<Passage>, SourceError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((domain.to_string(), query.to_string()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing_domains.contains(domain) || self.failing_queries.contains(query) {
            return Err(SourceError::Scripted {
                domain: domain.to_string(),
                query: query.to_string(),
            });
        }

        if let Some(passages) = self.by_query.get(&(domain.clone(), query.to_string())) {
            return Ok(passages.clone());
        }
        Ok(self.by_domain.get(domain).cloned().unwrap_or_default())
    }
}

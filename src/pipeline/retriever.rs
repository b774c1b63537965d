use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{Result, XkgError};
use crate::graph::{normalize_name, Domain};
use crate::sources::{EvidenceSource, Passage};

/// Evidence gathered for one domain.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub passages: Vec<Passage>,
    /// `query: error` for every query whose fetch failed
    pub failures: Vec<String>,
}

/// Runs a domain's queries against the evidence source.
#[derive(Clone)]
pub struct Retriever {
    source: Arc<dyn EvidenceSource>,
    max_passages: usize,
}

impl Retriever {
    pub fn new(source: Arc<dyn EvidenceSource>, max_passages: usize) -> Self {
        Self {
            source,
            max_passages: max_passages.max(1),
        }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Fetch passages for every query, in order, until the cap is reached.
    ///
    /// A failing query is recorded and skipped. Zero passages overall is a
    /// retrieval error for the domain.
    pub async fn retrieve(&self, domain: &Domain, queries: &[String]) -> Result<Retrieval> {
        let mut retrieval = Retrieval::default();
        let mut seen_titles: HashSet<String> = HashSet::new();

        'queries: for query in queries {
            let fetched = match self.source.fetch(domain, query).await {
                Ok(passages) => passages,
                Err(e) => {
                    log::warn!("[Retrieve] {} query '{}' failed: {}", domain, query, e);
                    retrieval.failures.push(format!("{}: {}", query, e));
                    continue;
                }
            };

            for mut passage in fetched {
                if !seen_titles.insert(normalize_name(&passage.title)) {
                    continue;
                }
                passage.domain = domain.clone();
                retrieval.passages.push(passage);
                if retrieval.passages.len() >= self.max_passages {
                    break 'queries;
                }
            }
        }

        if retrieval.passages.is_empty() {
            let reason = if !queries.is_empty() && retrieval.failures.len() == queries.len() {
                format!(
                    "all {} queries failed (first: {})",
                    queries.len(),
                    retrieval.failures[0]
                )
            } else {
                "no passages found".to_string()
            };
            return Err(XkgError::Retrieval {
                domain: domain.to_string(),
                reason,
            });
        }

        log::debug!(
            "[Retrieve] {}: {} passages from {} ({} failed queries)",
            domain,
            retrieval.passages.len(),
            self.source.name(),
            retrieval.failures.len()
        );
        Ok(retrieval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MockSource;

    fn queries(items: &[&str]) -> Vec<String> {
        items.iter().map(|q| q.to_string()).collect()
    }

    #[tokio::test]
    async fn test_dedupes_titles_and_caps() {
        let source = MockSource::new()
            .with_passage("Physics", "Heat", "Heat is energy in transit.")
            .with_passage("Physics", "Work", "Work is force times distance.")
            .with_query_passage("Physics", "q2", "Heat", "Duplicate title.")
            .with_query_passage("Physics", "q2", "Temperature", "Average kinetic energy.");
        let retriever = Retriever::new(Arc::new(source), 3);

        let result = retriever
            .retrieve(&Domain::new("Physics"), &queries(&["q1", "q2", "q3"]))
            .await
            .unwrap();
        let titles: Vec<&str> = result.passages.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Heat", "Work", "Temperature"]);
        assert!(result.failures.is_empty());
    }

    #[tokio::test]
    async fn test_failed_queries_are_recorded() {
        let source = MockSource::new()
            .with_query_passage("Biology", "good", "Cell", "The basic unit of life.")
            .fail_query("bad");
        let retriever = Retriever::new(Arc::new(source), 10);

        let result = retriever
            .retrieve(&Domain::new("Biology"), &queries(&["bad", "good"]))
            .await
            .unwrap();
        assert_eq!(result.passages.len(), 1);
        assert_eq!(result.passages[0].domain, Domain::new("Biology"));
        assert_eq!(result.failures.len(), 1);
        assert!(result.failures[0].starts_with("bad:"));
    }

    #[tokio::test]
    async fn test_no_passages_is_retrieval_error() {
        let retriever = Retriever::new(Arc::new(MockSource::new().fail_domain("Economics")), 10);
        let err = retriever
            .retrieve(&Domain::new("Economics"), &queries(&["a", "b"]))
            .await
            .unwrap_err();
        match err {
            XkgError::Retrieval { domain, reason } => {
                assert_eq!(domain, "Economics");
                assert!(reason.contains("all 2 queries failed"));
            }
            other => panic!("unexpected error {other:?}"),
        }

        let empty = Retriever::new(Arc::new(MockSource::new()), 10);
        assert!(matches!(
            empty.retrieve(&Domain::new("Physics"), &queries(&["a"])).await,
            Err(XkgError::Retrieval { .. })
        ));
    }
}

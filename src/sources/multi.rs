use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use super::{EvidenceSource, Passage, SourceError};
use crate::graph::{normalize_name, Domain};

/// Several sources behind one `fetch`.
///
/// Primaries are all consulted; results are deduplicated by
/// `(source, normalized title)`. Fallbacks run only when the primaries
/// produced nothing. The call fails only if every consulted source failed.
pub struct MultiSource {
    primaries: Vec<Arc<dyn EvidenceSource>>,
    fallbacks: Vec<Arc<dyn EvidenceSource>>,
}

impl MultiSource {
    pub fn new(primaries: Vec<Arc<dyn EvidenceSource>>) -> Self {
        Self {
            primaries,
            fallbacks: Vec::new(),
        }
    }

    pub fn with_fallback(mut self, source: Arc<dyn EvidenceSource>) -> Self {
        self.fallbacks.push(source);
        self
    }

    async fn consult(
        sources: &[Arc<dyn EvidenceSource>],
        domain: &Domain,
        query: &str,
        seen: &mut HashSet<(String, String)>,
        out: &mut Vec<Passage>,
        errors: &mut Vec<String>,
    ) {
        for source in sources {
            match source.fetch(domain, query).await {
                Ok(passages) => {
                    for passage in passages {
                        let key = (passage.source.clone(), normalize_name(&passage.title));
                        if seen.insert(key) {
                            out.push(passage);
                        }
                    }
                }
                Err(e) => {
                    log::warn!("{} failed for {} / {}: {}", source.name(), domain, query, e);
                    errors.push(e.to_string());
                }
            }
        }
    }
}

#[async_trait]
impl EvidenceSource for MultiSource {
    fn name(&self) -> &str {
        "multi"
    }

    async fn fetch(&self, domain: &Domain, query: &str) -> Result<Vec<Passage>, SourceError> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut errors = Vec::new();

        let mut attempted = self.primaries.len();
        Self::consult(&self.primaries, domain, query, &mut seen, &mut out, &mut errors).await;
        if out.is_empty() {
            attempted += self.fallbacks.len();
            Self::consult(&self.fallbacks, domain, query, &mut seen, &mut out, &mut errors).await;
        }

        if out.is_empty() && attempted > 0 && errors.len() == attempted {
            return Err(SourceError::AllFailed(errors.join("; ")));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MockSource;

    fn physics() -> Domain {
        Domain::new("Physics")
    }

    #[tokio::test]
    async fn test_dedupes_by_source_and_title() {
        let a: Arc<dyn EvidenceSource> = Arc::new(
            MockSource::new()
                .with_passage("Physics", "Entropy (physics)", "one")
                .with_passage("Physics", "entropy", "two"),
        );
        let multi = MultiSource::new(vec![a]);
        let passages = multi.fetch(&physics(), "entropy").await.unwrap();
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].snippet, "one");
    }

    #[tokio::test]
    async fn test_one_failing_primary_is_tolerated() {
        let bad: Arc<dyn EvidenceSource> = Arc::new(MockSource::new().fail_domain("Physics"));
        let good: Arc<dyn EvidenceSource> =
            Arc::new(MockSource::new().with_passage("Physics", "Heat", "heat and entropy"));
        let multi = MultiSource::new(vec![bad, good]);
        let passages = multi.fetch(&physics(), "entropy").await.unwrap();
        assert_eq!(passages.len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_only_when_primaries_empty() {
        let good: Arc<dyn EvidenceSource> =
            Arc::new(MockSource::new().with_passage("Physics", "Heat", "heat"));
        let fallback = Arc::new(MockSource::new().with_passage("Physics", "Fallback", "fb"));
        let multi = MultiSource::new(vec![good]).with_fallback(fallback.clone());
        let passages = multi.fetch(&physics(), "q").await.unwrap();
        assert_eq!(passages[0].title, "Heat");
        assert!(fallback.calls().is_empty());

        let empty: Arc<dyn EvidenceSource> = Arc::new(MockSource::new());
        let multi = MultiSource::new(vec![empty]).with_fallback(fallback.clone());
        let passages = multi.fetch(&physics(), "q").await.unwrap();
        assert_eq!(passages[0].title, "Fallback");
    }

    #[tokio::test]
    async fn test_all_failed() {
        let bad: Arc<dyn EvidenceSource> = Arc::new(MockSource::new().fail_domain("Physics"));
        let multi = MultiSource::new(vec![bad.clone(), bad]);
        let err = multi.fetch(&physics(), "q").await.unwrap_err();
        assert!(matches!(err, SourceError::AllFailed(_)));
    }
}

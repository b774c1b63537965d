//! Evidence sources.
//!
//! Every source answers `fetch(domain, query)` with a finite list of
//! passages. The Retriever only sees the [`EvidenceSource`] trait, so
//! network-backed sources, the offline seed corpus and the scripted
//! [`MockSource`] are interchangeable.

pub mod arxiv;
pub mod cached;
pub mod local_kb;
pub mod mock;
pub mod multi;
pub mod seed;
pub mod wikipedia;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::cache::PassageCache;
use crate::config::RetrievalConfig;
use crate::graph::{Domain, Evidence};

pub use arxiv::ArxivSource;
pub use cached::CachedSource;
pub use local_kb::LocalKbSource;
pub use mock::MockSource;
pub use multi::MultiSource;
pub use seed::SeedCorpus;
pub use wikipedia::WikipediaSource;

/// Source-level failures. A failing query never fails a domain on its own.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("{source_name} request failed: {message}")]
    Http {
        source_name: String,
        message: String,
    },

    #[error("{source_name} returned an unreadable response: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    #[error("{source_name} is unavailable: {message}")]
    Unavailable {
        source_name: String,
        message: String,
    },

    #[error("every source failed: {0}")]
    AllFailed(String),

    #[error("scripted failure for {domain} / {query}")]
    Scripted { domain: String, query: String },
}

/// One retrieved passage, stamped with the domain it was fetched for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Name of the source that produced it
    pub source: String,
    pub domain: Domain,
    pub title: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Passage {
    pub fn new(
        source: impl Into<String>,
        domain: Domain,
        title: impl Into<String>,
        snippet: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            domain,
            title: title.into(),
            snippet: snippet.into(),
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn evidence(&self) -> Evidence {
        Evidence {
            title: self.title.clone(),
            snippet: self.snippet.clone(),
            url: self.url.clone(),
            domain: Some(self.domain.clone()),
        }
    }
}

#[async_trait]
pub trait EvidenceSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, domain: &Domain, query: &str) -> Result<Vec<Passage>, SourceError>;
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

/// Shared HTTP client for network sources.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("xkg/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SourceError::Unavailable {
            source_name: "http".to_string(),
            message: e.to_string(),
        })
}

/// Assemble the evidence source described by the retrieval config.
///
/// Enabled primaries (local KB, Wikipedia, arXiv) are consulted first; the
/// seed corpus answers when none is enabled or none returns anything.
pub fn build_source(config: &RetrievalConfig) -> Result<Arc<dyn EvidenceSource>, SourceError> {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let mut primaries: Vec<Arc<dyn EvidenceSource>> = Vec::new();

    if let Some(path) = &config.local_kb_path {
        if path.is_dir() {
            primaries.push(Arc::new(LocalKbSource::new(path, config.max_per_source)));
        } else {
            log::warn!("local_kb_path {} is not a directory, skipping", path.display());
        }
    }
    if config.enable_wiki {
        primaries.push(Arc::new(WikipediaSource::new(timeout)?));
    }
    if config.enable_arxiv {
        primaries.push(Arc::new(ArxivSource::new(timeout, config.max_per_source)?));
    }

    let combined: Arc<dyn EvidenceSource> =
        Arc::new(MultiSource::new(primaries).with_fallback(Arc::new(SeedCorpus::new())));

    if config.cache_capacity > 0 {
        let cache = Arc::new(PassageCache::new(config.cache_capacity));
        Ok(Arc::new(CachedSource::new(combined, cache)))
    } else {
        Ok(combined)
    }
}

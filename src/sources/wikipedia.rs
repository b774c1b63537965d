use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::{http_client, truncate_chars, EvidenceSource, Passage, SourceError};
use crate::graph::Domain;

const SOURCE_NAME: &str = "wikipedia";
const DEFAULT_ENDPOINT: &str = "https://en.wikipedia.org/api/rest_v1/page/summary/";
const MAX_SNIPPET_CHARS: usize = 500;

#[derive(Deserialize)]
struct SummaryResponse {
    title: Option<String>,
    extract: Option<String>,
    content_urls: Option<ContentUrls>,
}

#[derive(Deserialize)]
struct ContentUrls {
    desktop: Option<PageUrl>,
}

#[derive(Deserialize)]
struct PageUrl {
    page: Option<String>,
}

/// Wikipedia REST page-summary lookup.
///
/// One request per query; the page extract becomes a single passage.
pub struct WikipediaSource {
    client: Client,
    endpoint: Url,
}

impl WikipediaSource {
    pub fn new(timeout: Duration) -> Result<Self, SourceError> {
        Self::with_endpoint(DEFAULT_ENDPOINT, timeout)
    }

    /// Point at another REST summary endpoint (mirrors, tests).
    pub fn with_endpoint(endpoint: &str, timeout: Duration) -> Result<Self, SourceError> {
        let endpoint = Url::parse(endpoint).map_err(|e| SourceError::Unavailable {
            source_name: SOURCE_NAME.to_string(),
            message: format!("invalid endpoint {}: {}", endpoint, e),
        })?;
        Ok(Self {
            client: http_client(timeout)?,
            endpoint,
        })
    }

    fn page_url(&self, query: &str) -> Result<Url, SourceError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::Unavailable {
                source_name: SOURCE_NAME.to_string(),
                message: "endpoint cannot be a base URL".to_string(),
            })?
            .pop_if_empty()
            .push(query.trim());
        Ok(url)
    }
}

#[async_trait]
impl EvidenceSource for WikipediaSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(&self, domain: &Domain, query: &str) -> Result<Vec<Passage>, SourceError> {
        let url = self.page_url(query)?;
        log::debug!("Wikipedia lookup: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::Http {
                source_name: SOURCE_NAME.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(SourceError::Http {
                source_name: SOURCE_NAME.to_string(),
                message: format!("status {}", status),
            });
        }

        let summary: SummaryResponse = response.json().await.map_err(|e| SourceError::Parse {
            source_name: SOURCE_NAME.to_string(),
            message: e.to_string(),
        })?;

        Ok(summary_to_passage(summary, domain, query).into_iter().collect())
    }
}

fn summary_to_passage(summary: SummaryResponse, domain: &Domain, query: &str) -> Option<Passage> {
    let extract = summary.extract.unwrap_or_default();
    let extract = extract.trim();
    if extract.is_empty() {
        return None;
    }
    let title = summary
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| query.trim().to_string());
    let mut passage = Passage::new(
        SOURCE_NAME,
        domain.clone(),
        title,
        truncate_chars(extract, MAX_SNIPPET_CHARS),
    );
    passage.url = summary
        .content_urls
        .and_then(|c| c.desktop)
        .and_then(|d| d.page)
        .filter(|p| !p.is_empty());
    Some(passage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_url_encodes_query() {
        let source = WikipediaSource::new(Duration::from_secs(1)).unwrap();
        let url = source.page_url("Shannon entropy").unwrap();
        assert_eq!(
            url.as_str(),
            "https://en.wikipedia.org/api/rest_v1/page/summary/Shannon%20entropy"
        );
    }

    #[test]
    fn test_summary_to_passage() {
        let summary: SummaryResponse = serde_json::from_str(
            r#"{"title":"Entropy","extract":"Entropy is a measure of disorder.",
                "content_urls":{"desktop":{"page":"https://en.wikipedia.org/wiki/Entropy"}}}"#,
        )
        .unwrap();
        let passage = summary_to_passage(summary, &Domain::new("Physics"), "entropy").unwrap();
        assert_eq!(passage.title, "Entropy");
        assert_eq!(passage.source, "wikipedia");
        assert_eq!(passage.url.as_deref(), Some("https://en.wikipedia.org/wiki/Entropy"));
    }

    #[test]
    fn test_empty_extract_yields_nothing() {
        let summary: SummaryResponse = serde_json::from_str(r#"{"title":"X","extract":"  "}"#).unwrap();
        assert!(summary_to_passage(summary, &Domain::new("Physics"), "x").is_none());
    }
}

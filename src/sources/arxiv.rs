use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use std::time::Duration;
use url::Url;

use super::{http_client, truncate_chars, EvidenceSource, Passage, SourceError};
use crate::graph::Domain;

const SOURCE_NAME: &str = "arxiv";
const DEFAULT_ENDPOINT: &str = "http://export.arxiv.org/api/query";
const MAX_SNIPPET_CHARS: usize = 500;

/// arXiv search over the public Atom API.
pub struct ArxivSource {
    client: Client,
    endpoint: String,
    max_results: usize,
}

/// Fields pulled out of one Atom `<entry>`.
#[derive(Debug, Default, PartialEq)]
struct AtomEntry {
    id: String,
    title: String,
    summary: String,
}

impl ArxivSource {
    pub fn new(timeout: Duration, max_results: usize) -> Result<Self, SourceError> {
        Ok(Self {
            client: http_client(timeout)?,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_results: max_results.max(1),
        })
    }

    fn search_url(&self, domain: &Domain, query: &str) -> Result<Url, SourceError> {
        let search = format!("all:\"{}\" AND all:\"{}\"", query.trim(), domain);
        Url::parse_with_params(
            &self.endpoint,
            &[
                ("search_query", search),
                ("start", "0".to_string()),
                ("max_results", self.max_results.to_string()),
            ],
        )
        .map_err(|e| SourceError::Unavailable {
            source_name: SOURCE_NAME.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl EvidenceSource for ArxivSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(&self, domain: &Domain, query: &str) -> Result<Vec<Passage>, SourceError> {
        let url = self.search_url(domain, query)?;
        log::debug!("arXiv search: {}", url);

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
        if !status.is_success() {
            return Err(SourceError::Http {
                source_name: SOURCE_NAME.to_string(),
                message: format!("status {}", status),
            });
        }

        let body = response.text().await.map_err(|e| SourceError::Http {
            source_name: SOURCE_NAME.to_string(),
            message: e.to_string(),
        })?;

        let passages = parse_feed(&body)?
            .into_iter()
            .take(self.max_results)
            .filter(|entry| !entry.title.is_empty() && !entry.summary.is_empty())
            .map(|entry| {
                let mut passage = Passage::new(
                    SOURCE_NAME,
                    domain.clone(),
                    entry.title,
                    truncate_chars(&entry.summary, MAX_SNIPPET_CHARS),
                );
                if !entry.id.is_empty() {
                    passage.url = Some(entry.id);
                }
                passage
            })
            .collect();

        Ok(passages)
    }
}

/// Parse an Atom feed into entries; whitespace inside fields is collapsed.
fn parse_feed(xml: &str) -> Result<Vec<AtomEntry>, SourceError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut entries = Vec::new();
    let mut current: Option<AtomEntry> = None;
    let mut field: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "entry" {
                    current = Some(AtomEntry::default());
                } else if current.is_some() && matches!(name.as_str(), "id" | "title" | "summary") {
                    field = Some(name);
                }
            }
            Ok(Event::Text(e)) => {
                if let (Some(entry), Some(field)) = (current.as_mut(), field.as_deref()) {
                    let text = String::from_utf8_lossy(e.as_ref()).to_string();
                    let slot = match field {
                        "id" => &mut entry.id,
                        "title" => &mut entry.title,
                        _ => &mut entry.summary,
                    };
                    slot.push_str(&text);
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "entry" {
                    if let Some(mut entry) = current.take() {
                        entry.title = collapse_whitespace(&entry.title);
                        entry.summary = collapse_whitespace(&entry.summary);
                        entry.id = entry.id.trim().to_string();
                        entries.push(entry);
                    }
                } else if field.as_deref() == Some(name.as_str()) {
                    field = None;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SourceError::Parse {
                    source_name: SOURCE_NAME.to_string(),
                    message: format!("XML error at {}: {}", reader.buffer_position(), e),
                })
            }
            Ok(_) => {}
        }
        buf.clear();
    }

    Ok(entries)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{truncate_chars, EvidenceSource, Passage, SourceError};
use crate::graph::Domain;

const SOURCE_NAME: &str = "local_kb";
const WINDOW_BEFORE: usize = 120;
const WINDOW_AFTER: usize = 260;
const MAX_SNIPPET_CHARS: usize = 500;

/// Markdown/plain-text notes on disk used as an evidence source.
///
/// Files are scored by how often the query (and its longer words) occurs;
/// the snippet is a window around the first occurrence.
pub struct LocalKbSource {
    root: PathBuf,
    max_results: usize,
}

#[derive(Debug)]
struct Hit {
    score: usize,
    title: String,
    snippet: String,
    path: PathBuf,
}

impl LocalKbSource {
    pub fn new<P: AsRef<Path>>(root: P, max_results: usize) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_results: max_results.max(1),
        }
    }
}

#[async_trait]
impl EvidenceSource for LocalKbSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(&self, domain: &Domain, query: &str) -> Result<Vec<Passage>, SourceError> {
        let root = self.root.clone();
        let query = query.to_string();
        let max_results = self.max_results;

        let hits = tokio::task::spawn_blocking(move || scan(&root, &query, max_results))
            .await
            .map_err(|e| SourceError::Unavailable {
                source_name: SOURCE_NAME.to_string(),
                message: e.to_string(),
            })??;

        Ok(hits
            .into_iter()
            .map(|hit| {
                Passage::new(SOURCE_NAME, domain.clone(), hit.title, hit.snippet)
                    .with_url(format!("file://{}", hit.path.display()))
            })
            .collect())
    }
}

fn scan(root: &Path, query: &str, max_results: usize) -> Result<Vec<Hit>, SourceError> {
    if !root.is_dir() {
        return Err(SourceError::Unavailable {
            source_name: SOURCE_NAME.to_string(),
            message: format!("{} is not a directory", root.display()),
        });
    }

    let phrase = query.trim().to_lowercase();
    if phrase.is_empty() {
        return Ok(Vec::new());
    }
    let words: Vec<&str> = phrase
        .split_whitespace()
        .filter(|w| w.chars().count() >= 4)
        .collect();

    let mut hits = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        let is_note = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| matches!(ext.to_lowercase().as_str(), "md" | "markdown" | "txt"))
            .unwrap_or(false);
        if !is_note {
            continue;
        }

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                log::debug!("Skipping unreadable note {}: {}", path.display(), e);
                continue;
            }
        };
        // offsets found in the lowered text are only valid in the original when lengths agree
        let lowered = text.to_lowercase();
        let source_text = if lowered.len() == text.len() { &text } else { &lowered };

        let phrase_hits = lowered.matches(&phrase).count();
        let word_hits: usize = words.iter().map(|w| lowered.matches(w).count()).sum();
        let score = phrase_hits * 3 + word_hits;
        if score == 0 {
            continue;
        }

        let first = lowered
            .find(&phrase)
            .or_else(|| words.iter().filter_map(|w| lowered.find(w)).min())
            .unwrap_or(0);

        let title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("note")
            .replace(['_', '-'], " ");

        hits.push(Hit {
            score,
            title,
            snippet: window(source_text, first),
            path: path.to_path_buf(),
        });
    }

    hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.path.cmp(&b.path)));
    hits.truncate(max_results);
    Ok(hits)
}

/// Text around byte offset `at`, snapped to char boundaries and flattened to one line.
fn window(text: &str, at: usize) -> String {
    let mut start = at.saturating_sub(WINDOW_BEFORE);
    while start > 0 && !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (at + WINDOW_AFTER).min(text.len());
    while end < text.len() && !text.is_char_boundary(end) {
        end += 1;
    }
    let flat = text[start..end].split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&flat, MAX_SNIPPET_CHARS)
}

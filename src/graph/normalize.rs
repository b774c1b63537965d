//! Name normalization, node ids and evidence mention matching.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::OnceLock;

use super::Domain;

const ABBREVIATIONS: &[(&str, &str)] = &[
    ("kl divergence", "kullback leibler divergence"),
    ("nn", "neural network"),
    ("ml", "machine learning"),
    ("dl", "deep learning"),
    ("ai", "artificial intelligence"),
];

const STOPWORDS: &[&str] = &[
    "the", "of", "and", "in", "for", "a", "an", "to", "on", "with", "as", "by", "its",
];

fn parenthetical() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\([^)]*\)").expect("valid parenthetical pattern"))
}

/// Lowercase, punctuation to spaces, whitespace collapsed, known
/// abbreviations expanded.
pub fn normalize_text(text: &str) -> String {
    let lowered: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    expand_abbreviations(&collapsed)
}

/// Key used to decide that two node names denote the same concept.
///
/// Parenthetical qualifiers are dropped: "Entropy (physics)" and "entropy"
/// normalize identically.
pub fn normalize_name(name: &str) -> String {
    normalize_text(&parenthetical().replace_all(name, " "))
}

fn expand_abbreviations(normalized: &str) -> String {
    let mut padded = format!(" {} ", normalized);
    for (short, long) in ABBREVIATIONS {
        let needle = format!(" {} ", short);
        if padded.contains(&needle) {
            padded = padded.replace(&needle, &format!(" {} ", long));
        }
    }
    padded.trim().to_string()
}

/// Lowercase alphanumeric runs joined by `_`.
pub fn slugify(text: &str) -> String {
    let slug = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if slug.is_empty() {
        short_digest(text)
    } else {
        slug
    }
}

/// Canonical node id: `<domain-slug>:<name-slug>`.
///
/// The name slug comes from [`normalize_name`], so two names get the same id
/// only when they would also merge.
pub fn node_id(domain: &Domain, name: &str) -> String {
    let normalized = normalize_name(name);
    let slug = if normalized.is_empty() {
        slugify(name)
    } else {
        slugify(&normalized)
    };
    format!("{}:{}", slugify(domain.as_str()), slug)
}

pub fn short_digest(text: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(text.as_bytes()));
    digest[..10].to_string()
}

fn stem(token: &str) -> &str {
    if token.len() > 4 {
        if let Some(stripped) = token.strip_suffix("es") {
            if stripped.ends_with('s') || stripped.ends_with('x') {
                return stripped;
            }
        }
        if let Some(stripped) = token.strip_suffix('s') {
            return stripped;
        }
    }
    token
}

fn significant_tokens(normalized: &str) -> Vec<&str> {
    normalized
        .split(' ')
        .filter(|t| t.chars().count() >= 3 && !STOPWORDS.contains(t))
        .collect()
}

/// Whether `text` mentions the concept called `name`.
///
/// True when the normalized name is a substring of the normalized text, or
/// when more than half of the name's significant tokens appear in the text
/// (plural-insensitive).
pub fn mentions(text: &str, name: &str) -> bool {
    let needle = normalize_name(name);
    if needle.is_empty() {
        return false;
    }
    let haystack = normalize_text(text);
    if haystack.contains(&needle) {
        return true;
    }

    let tokens = significant_tokens(&needle);
    if tokens.is_empty() {
        return false;
    }
    let present: HashSet<&str> = haystack.split(' ').map(stem).collect();
    let matched = tokens.iter().filter(|t| present.contains(stem(t))).count();
    matched * 2 > tokens.len()
}

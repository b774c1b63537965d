//! Per-domain subgraph extraction from retrieved passages.

use regex::Regex;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use super::schema::{coerce_subgraph, Coercion};
use crate::error::{Result, XkgError};
use crate::graph::{mentions, node_id, normalize_name, normalize_text, Domain, Edge, Node, Relation, SubGraph};
use crate::llm::GenerationClient;
use crate::sources::Passage;

const SEED_CONFIDENCE: f64 = 0.9;
const PASSAGE_NODE_CONFIDENCE: f64 = 0.78;
const PASSAGE_EDGE_CONFIDENCE: f64 = 0.72;
const MAX_DEFINITION_CHARS: usize = 300;
const MAX_PROMPT_PASSAGES: usize = 8;

const EXTRACTOR_SYSTEM: &str = "You extract a small knowledge graph about a seed concept from the given passages. \
Return ONLY a JSON object {\"nodes\": [{\"id\", \"name\", \"domain\", \"definition\", \"confidence\"}], \
\"edges\": [{\"source\", \"target\", \"relation\", \"explanation\", \"evidence\": {\"title\", \"snippet\", \"url\"}, \"confidence\"}]}. \
Relations: related_to, used_in, is_a, explains, bridges. Evidence snippets must be quoted from the passages.";

/// The node extraction is anchored on.
#[derive(Debug, Clone, PartialEq)]
pub struct Seed {
    pub name: String,
    pub node_id: String,
    pub domain: Domain,
}

impl Seed {
    /// The seed concept of a fresh generation (always `Core`).
    pub fn concept(name: &str) -> Self {
        let name = name.trim().to_string();
        Self {
            node_id: node_id(&Domain::core(), &name),
            domain: Domain::core(),
            name,
        }
    }

    /// An existing node being expanded.
    pub fn anchor(node: &Node) -> Self {
        Self {
            name: node.name.clone(),
            node_id: node.id.clone(),
            domain: node.domain.clone(),
        }
    }
}

#[derive(Clone, Default)]
pub struct Extractor {
    generator: Option<Arc<dyn GenerationClient>>,
}

impl Extractor {
    /// Offline extractor driven by passage titles and relation cues.
    pub fn heuristic() -> Self {
        Self { generator: None }
    }

    pub fn with_model(generator: Arc<dyn GenerationClient>) -> Self {
        Self {
            generator: Some(generator),
        }
    }

    pub fn uses_model(&self) -> bool {
        self.generator.is_some()
    }

    /// Turn passages into a subgraph for `domain`.
    ///
    /// Every returned edge is unchecked and grounded in one of `passages`.
    pub async fn extract(&self, seed: &Seed, domain: &Domain, passages: &[Passage]) -> Result<SubGraph> {
        let mut graph = match &self.generator {
            Some(generator) => self.extract_with_model(generator.as_ref(), seed, domain, passages).await?,
            None => extract_heuristic(seed, domain, passages),
        };
        ground(&mut graph, passages);
        Ok(graph)
    }

    async fn extract_with_model(
        &self,
        generator: &dyn GenerationClient,
        seed: &Seed,
        domain: &Domain,
        passages: &[Passage],
    ) -> Result<SubGraph> {
        let mut previous_error: Option<String> = None;

        for attempt in 1..=2 {
            let prompt = build_prompt(seed, domain, passages, previous_error.as_deref());
            let reason = match generator.complete(EXTRACTOR_SYSTEM, &prompt).await {
                Ok(raw) => match coerce_subgraph(&raw, seed, domain) {
                    Coercion::WellFormed(graph) => return Ok(graph),
                    Coercion::Repaired { graph, repairs } => {
                        log::debug!(
                            "[Extract] {}: {} repairs applied ({})",
                            domain,
                            repairs.len(),
                            repairs.join("; ")
                        );
                        return Ok(graph);
                    }
                    Coercion::Unrecoverable(reason) => reason,
                },
                Err(e) => e.to_string(),
            };
            log::warn!("[Extract] {} attempt {} unusable: {}", domain, attempt, reason);
            previous_error = Some(reason);
        }

        Err(XkgError::Extraction {
            domain: domain.to_string(),
            reason: previous_error.unwrap_or_default(),
        })
    }
}

fn build_prompt(seed: &Seed, domain: &Domain, passages: &[Passage], previous_error: Option<&str>) -> String {
    let passages: Vec<_> = passages
        .iter()
        .take(MAX_PROMPT_PASSAGES)
        .map(|p| json!({"title": p.title, "snippet": p.snippet, "url": p.url}))
        .collect();
    let mut payload = json!({
        "seed": {"id": seed.node_id, "name": seed.name, "domain": seed.domain},
        "domain": domain,
        "passages": passages,
        "requirements": [
            format!("Nodes belong to '{}' or 'Bridge'; reuse the seed id for the seed.", domain),
            "Every edge needs evidence quoted from one passage.",
            "Keep 3-8 nodes.",
        ],
    });
    if let Some(error) = previous_error {
        payload["previous_error"] = json!(format!("Your previous answer was rejected: {}", error));
    }
    payload.to_string()
}

struct RelationCue {
    relation: Relation,
    pattern: Regex,
}

fn relation_cues() -> &'static [RelationCue] {
    static CUES: OnceLock<Vec<RelationCue>> = OnceLock::new();
    CUES.get_or_init(|| {
        [
            (
                Relation::UsedIn,
                r"(?i)\b(used (in|for|as)|applied (in|to)|loss functions?|classification)\b",
            ),
            (
                Relation::Explains,
                r"(?i)\b(explains?|describes?|governs?|second law|thermodynamics)\b",
            ),
            (
                Relation::IsA,
                r"(?i)\b(is an? (kind|type|form|measure|class) of|probability distributions?)\b",
            ),
        ]
        .into_iter()
        .filter_map(|(relation, pattern)| {
            Regex::new(pattern)
                .ok()
                .map(|pattern| RelationCue { relation, pattern })
        })
        .collect()
    })
}

/// First relation whose cue appears in the snippet; `related_to` otherwise.
pub fn infer_relation(snippet: &str) -> Relation {
    relation_cues()
        .iter()
        .find(|cue| cue.pattern.is_match(snippet))
        .map(|cue| cue.relation)
        .unwrap_or(Relation::RelatedTo)
}

fn relation_phrase(relation: Relation) -> &'static str {
    match relation {
        Relation::RelatedTo => "is related to",
        Relation::UsedIn => "is used in",
        Relation::IsA => "is a kind of",
        Relation::Explains => "explains",
        Relation::Bridges => "bridges to",
    }
}

fn title_name(title: &str) -> String {
    let name = match title.rfind(" (") {
        Some(idx) if title.ends_with(')') => &title[..idx],
        _ => title,
    };
    name.trim().to_string()
}

fn truncate_definition(snippet: &str) -> String {
    match snippet.char_indices().nth(MAX_DEFINITION_CHARS) {
        Some((idx, _)) => format!("{}...", snippet[..idx].trim_end()),
        None => snippet.trim().to_string(),
    }
}

/// One node per distinct passage title, linked from the seed.
///
/// In the `Core` domain only the seed itself is described.
fn extract_heuristic(seed: &Seed, domain: &Domain, passages: &[Passage]) -> SubGraph {
    let seed_key = normalize_name(&seed.name);
    let mut seed_node = Node {
        id: seed.node_id.clone(),
        name: seed.name.clone(),
        domain: seed.domain.clone(),
        definition: None,
        confidence: SEED_CONFIDENCE,
    };
    let mut nodes: Vec<Node> = Vec::new();
    let mut edges: Vec<Edge> = Vec::new();
    let mut seen: HashSet<String> = HashSet::from([seed_key.clone()]);

    for passage in passages {
        let name = title_name(&passage.title);
        let key = normalize_name(&name);
        if key.is_empty() {
            continue;
        }
        if key == seed_key || domain.is_core() {
            if seed_node.definition.is_none() && !passage.snippet.trim().is_empty() {
                seed_node.definition = Some(truncate_definition(&passage.snippet));
            }
            continue;
        }
        if !seen.insert(key) {
            continue;
        }

        let node = Node::new(name.clone(), domain.clone(), PASSAGE_NODE_CONFIDENCE)
            .with_definition(truncate_definition(&passage.snippet));
        let relation = infer_relation(&passage.snippet);
        let explanation = format!(
            "{} {} {} according to '{}'.",
            seed.name,
            relation_phrase(relation),
            name,
            passage.title
        );
        edges.push(Edge::new(
            seed.node_id.clone(),
            node.id.clone(),
            relation,
            explanation,
            passage.evidence(),
            PASSAGE_EDGE_CONFIDENCE,
        ));
        nodes.push(node);
    }

    nodes.insert(0, seed_node);
    SubGraph { nodes, edges }
}

/// Make every edge cite a passage that was actually retrieved.
///
/// Evidence not found in any passage is swapped for the first passage that
/// mentions both endpoints; edges with no such passage are dropped.
fn ground(graph: &mut SubGraph, passages: &[Passage]) {
    let corpus: Vec<String> = passages.iter().map(|p| normalize_text(&p.snippet)).collect();
    let names: HashMap<&str, &str> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), n.name.as_str()))
        .collect();

    let mut kept = Vec::with_capacity(graph.edges.len());
    for mut edge in graph.edges.drain(..) {
        let quoted = edge.evidence.fragments().any(|fragment| {
            let fragment = normalize_text(fragment);
            !fragment.is_empty() && corpus.iter().any(|text| text.contains(&fragment))
        });
        if quoted {
            kept.push(edge);
            continue;
        }

        let (Some(source), Some(target)) = (names.get(edge.source.as_str()), names.get(edge.target.as_str()))
        else {
            continue;
        };
        match passages
            .iter()
            .find(|p| mentions(&p.snippet, source) && mentions(&p.snippet, target))
        {
            Some(passage) => {
                log::debug!("Re-grounded edge {} -> {} on '{}'", edge.source, edge.target, passage.title);
                edge.evidence = passage.evidence();
                kept.push(edge);
            }
            None => {
                log::debug!("Dropped ungrounded edge {} -> {}", edge.source, edge.target);
            }
        }
    }
    graph.edges = kept;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockGenerator;

    fn passage(domain: &str, title: &str, snippet: &str) -> Passage {
        Passage::new("mock", Domain::new(domain), title, snippet)
    }

    #[test]
    fn test_relation_cues() {
        assert_eq!(
            infer_relation("Cross-entropy is widely used as a loss function."),
            Relation::UsedIn
        );
        assert_eq!(
            infer_relation("The second law of thermodynamics states that entropy grows."),
            Relation::Explains
        );
        assert_eq!(
            infer_relation("A probability distribution assigns mass to outcomes."),
            Relation::IsA
        );
        assert_eq!(infer_relation("Markets clear at equilibrium."), Relation::RelatedTo);
    }

    #[tokio::test]
    async fn test_heuristic_builds_seed_star() {
        let passages = vec![
            passage("Computer Science", "Entropy", "Entropy is the average information content."),
            passage(
                "Computer Science",
                "Cross-entropy",
                "Cross-entropy compares two distributions and is used as a loss function; it builds on entropy.",
            ),
            passage("Computer Science", "Huffman coding", "Huffman coding approaches the entropy bound."),
            passage("Computer Science", "Huffman coding (algorithm)", "Duplicate title."),
        ];
        let seed = Seed::concept("Entropy");
        let graph = Extractor::heuristic()
            .extract(&seed, &Domain::new("Computer Science"), &passages)
            .await
            .unwrap();

        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.nodes[0].id, "core:entropy");
        assert_eq!(
            graph.nodes[0].definition.as_deref(),
            Some("Entropy is the average information content.")
        );
        assert_eq!(graph.edges.len(), 2);
        assert!(graph.edges.iter().all(|e| e.source == "core:entropy" && !e.checked));
        assert_eq!(graph.edges[0].relation, Relation::UsedIn);
        assert_eq!(graph.edges[0].evidence.title, "Cross-entropy");
    }

    #[tokio::test]
    async fn test_core_domain_only_describes_seed() {
        let passages = vec![passage("Core", "Entropy overview (Core)", "Entropy measures disorder.")];
        let graph = Extractor::heuristic()
            .extract(&Seed::concept("Entropy"), &Domain::core(), &passages)
            .await
            .unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert!(graph.edges.is_empty());
        assert_eq!(graph.nodes[0].definition.as_deref(), Some("Entropy measures disorder."));
    }

    #[tokio::test]
    async fn test_model_retry_then_success() {
        let generator = Arc::new(
            MockGenerator::new().respond("garbage").respond(
                r#"{"nodes": [{"id": "a", "name": "Entropy", "domain": "Core", "confidence": 0.9},
                              {"id": "b", "name": "Heat", "domain": "Physics", "confidence": 0.8}],
                    "edges": [{"source": "a", "target": "b", "relation": "explains",
                               "explanation": "Entropy explains heat flow.",
                               "evidence": {"title": "Heat", "snippet": "entropy governs heat flow"},
                               "confidence": 0.8}]}"#,
            ),
        );
        let passages = vec![passage("Physics", "Heat", "Entropy governs heat flow between bodies.")];
        let extractor = Extractor::with_model(generator.clone());

        let graph = extractor
            .extract(&Seed::concept("Entropy"), &Domain::new("Physics"), &passages)
            .await
            .unwrap();
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].target, "physics:heat");

        let calls = generator.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].contains("previous_error"));
    }

    #[tokio::test]
    async fn test_model_second_failure_is_extraction_error() {
        let generator = Arc::new(MockGenerator::new().respond("nope").respond("{\"edges\": []}"));
        let err = Extractor::with_model(generator)
            .extract(&Seed::concept("Entropy"), &Domain::new("Biology"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, XkgError::Extraction { ref domain, .. } if domain == "Biology"));
    }

    #[tokio::test]
    async fn test_unquoted_evidence_is_regrounded_or_dropped() {
        let generator = Arc::new(MockGenerator::new().respond(
            r#"{"nodes": [{"name": "Entropy", "domain": "Core", "confidence": 0.9},
                          {"name": "Heat", "domain": "Physics", "confidence": 0.8},
                          {"name": "Gravity", "domain": "Physics", "confidence": 0.8}],
                "edges": [{"source": "Entropy", "target": "Heat", "relation": "explains",
                           "evidence": {"title": "Made up", "snippet": "invented sentence"}, "confidence": 0.8},
                          {"source": "Entropy", "target": "Gravity", "relation": "related_to",
                           "evidence": {"title": "Made up", "snippet": "also invented"}, "confidence": 0.8}]}"#,
        ));
        let passages = vec![passage("Physics", "Heat", "Entropy increases as heat spreads.")];
        let graph = Extractor::with_model(generator)
            .extract(&Seed::concept("Entropy"), &Domain::new("Physics"), &passages)
            .await
            .unwrap();

        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].target, "physics:heat");
        assert_eq!(graph.edges[0].evidence.title, "Heat");
    }
}

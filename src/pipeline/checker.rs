//! Schema, evidence and conflict checks over a merged graph.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use super::merger::flag_duplicate_edges;
use crate::graph::{assign_edge_ids, mentions, CheckerSummary, Edge, EdgeFlag, GraphResult, Node, Relation};

pub const EMPTY_EXPLANATION: &str = "No explanation provided.";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConflictPolicy {
    /// Two checked edges on one pair whose confidences differ by more than
    /// this conflict
    pub confidence_spread: f64,
    /// Any two different relations on one pair conflict
    pub distinct_relations: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckPolicy {
    pub min_confidence: f64,
    pub downgrade_factor: f64,
    pub conflict: ConflictPolicy,
}

impl CheckPolicy {
    pub fn strict() -> Self {
        Self {
            min_confidence: 0.6,
            downgrade_factor: 0.6,
            conflict: ConflictPolicy {
                confidence_spread: 0.3,
                distinct_relations: false,
            },
        }
    }

    pub fn relaxed() -> Self {
        Self {
            min_confidence: 0.4,
            downgrade_factor: 0.7,
            conflict: ConflictPolicy {
                confidence_spread: 0.45,
                distinct_relations: false,
            },
        }
    }
}

fn bridging_cue() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(bridg\w*|connect\w*|links?|linking|across|interdisciplinary|cross-domain|in both|analog\w*)\b")
            .expect("valid bridging cue pattern")
    })
}

enum Support {
    Sufficient(&'static str),
    Insufficient(String),
}

pub struct Checker {
    policy: CheckPolicy,
}

impl Checker {
    pub fn new(policy: CheckPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &CheckPolicy {
        &self.policy
    }

    /// Check every edge of `graph` in place and report the counters.
    ///
    /// `dedup_edges_flagged` only counts triples that downgrades made
    /// repeat; the other merge counters are left at zero for the caller.
    pub fn check(&self, graph: &mut GraphResult) -> CheckerSummary {
        let mut summary = CheckerSummary::default();
        self.schema_pass(graph, &mut summary);
        self.evidence_pass(graph, &mut summary);
        summary.dedup_edges_flagged = flag_duplicate_edges(&mut graph.edges);
        self.conflict_pass(&mut graph.edges, &mut summary);

        summary.passed = graph.edges.iter().filter(|e| e.checked).count();
        summary.failed = graph.edges.len() - summary.passed;
        summary
    }

    fn schema_pass(&self, graph: &mut GraphResult, summary: &mut CheckerSummary) {
        for node in graph.nodes.iter_mut() {
            if fix_confidence(&mut node.confidence) {
                summary.schema_fixed += 1;
            }
        }

        let known: HashMap<&str, &Node> = graph.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let before = graph.edges.len();
        graph.edges.retain(|e| {
            let keep =
                e.source != e.target && known.contains_key(e.source.as_str()) && known.contains_key(e.target.as_str());
            if !keep {
                log::debug!("[Check] dropped malformed edge {} -> {}", e.source, e.target);
            }
            keep
        });
        summary.edges_dropped = before - graph.edges.len();

        for edge in graph.edges.iter_mut() {
            if edge.explanation.trim().is_empty() {
                edge.explanation = EMPTY_EXPLANATION.to_string();
                summary.schema_fixed += 1;
            }
            if fix_confidence(&mut edge.confidence) {
                summary.schema_fixed += 1;
            }
        }
        summary.schema_fixed += assign_edge_ids(&mut graph.edges);
    }

    fn evidence_pass(&self, graph: &mut GraphResult, summary: &mut CheckerSummary) {
        let names: HashMap<String, String> = graph
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.name.clone()))
            .collect();

        for edge in graph.edges.iter_mut() {
            summary.edges_checked += 1;
            let (Some(source), Some(target)) = (names.get(&edge.source), names.get(&edge.target)) else {
                continue;
            };

            match evidence_support(edge, source, target) {
                Support::Sufficient(reason) if edge.confidence >= self.policy.min_confidence => {
                    edge.checked = true;
                    edge.check_reason = Some(reason.to_string());
                }
                Support::Sufficient(_) => {
                    edge.checked = false;
                    edge.check_reason = Some(format!(
                        "confidence {:.2} below threshold {:.2}",
                        edge.confidence, self.policy.min_confidence
                    ));
                }
                Support::Insufficient(reason) => {
                    edge.checked = false;
                    if edge.relation.is_specific() && edge.confidence > 0.0 {
                        let original = edge.relation;
                        edge.relation = Relation::RelatedTo;
                        edge.confidence *= self.policy.downgrade_factor;
                        edge.flag(EdgeFlag::Downgraded);
                        summary.edges_downgraded += 1;
                        edge.check_reason = Some(format!(
                            "{}; downgraded from {} to related_to",
                            reason, original
                        ));
                    } else {
                        edge.check_reason = Some(reason);
                    }
                }
            }
        }
    }

    fn conflict_pass(&self, edges: &mut [Edge], summary: &mut CheckerSummary) {
        let mut pairs: HashMap<(String, String), Vec<usize>> = HashMap::new();
        for (idx, edge) in edges.iter().enumerate() {
            if edge.has_flag(EdgeFlag::Duplicate) {
                continue;
            }
            let key = if edge.source <= edge.target {
                (edge.source.clone(), edge.target.clone())
            } else {
                (edge.target.clone(), edge.source.clone())
            };
            pairs.entry(key).or_default().push(idx);
        }

        let mut conflicting = vec![false; edges.len()];
        for members in pairs.values().filter(|m| m.len() > 1) {
            for (n, &i) in members.iter().enumerate() {
                for &j in &members[n + 1..] {
                    if self.conflicts(&edges[i], &edges[j]) {
                        conflicting[i] = true;
                        conflicting[j] = true;
                    }
                }
            }
        }

        for (edge, conflict) in edges.iter_mut().zip(conflicting) {
            if conflict && !edge.has_flag(EdgeFlag::Conflict) {
                edge.flag(EdgeFlag::Conflict);
                summary.conflicts_flagged += 1;
            }
        }
    }

    fn conflicts(&self, a: &Edge, b: &Edge) -> bool {
        let opposite = a.source == b.target && a.target == b.source;
        let exclusive = opposite
            && matches!(
                (a.relation, b.relation),
                (Relation::IsA, Relation::IsA)
                    | (Relation::Explains, Relation::Explains)
                    | (Relation::IsA, Relation::Bridges)
                    | (Relation::Bridges, Relation::IsA)
            );
        let distinct = self.policy.conflict.distinct_relations && a.relation != b.relation;
        let spread = a.checked
            && b.checked
            && (a.confidence - b.confidence).abs() > self.policy.conflict.confidence_spread;
        exclusive || distinct || spread
    }
}

/// Clamp into [0, 1]; non-finite becomes 0.5. True when anything changed.
fn fix_confidence(confidence: &mut f64) -> bool {
    let fixed = if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.5
    };
    let changed = fixed != *confidence;
    *confidence = fixed;
    changed
}

fn evidence_support(edge: &Edge, source: &str, target: &str) -> Support {
    if edge.evidence.is_empty() {
        return Support::Insufficient("evidence snippet is empty".to_string());
    }
    if edge
        .evidence
        .fragments()
        .any(|f| mentions(f, source) && mentions(f, target))
    {
        return Support::Sufficient("evidence mentions both endpoints");
    }
    if edge.relation == Relation::Bridges && edge.evidence.fragments().any(|f| bridging_cue().is_match(f)) {
        return Support::Sufficient("evidence states the cross-domain link");
    }

    let source_seen = edge.evidence.fragments().any(|f| mentions(f, source));
    let target_seen = edge.evidence.fragments().any(|f| mentions(f, target));
    let reason = match (source_seen, target_seen) {
        (true, true) => format!("no single evidence fragment mentions both '{}' and '{}'", source, target),
        (true, false) => format!("evidence does not mention '{}'", target),
        (false, true) => format!("evidence does not mention '{}'", source),
        (false, false) => format!("evidence mentions neither '{}' nor '{}'", source, target),
    };
    Support::Insufficient(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Domain, Evidence, Meta};
    use chrono::Utc;

    fn graph(nodes: Vec<Node>, edges: Vec<Edge>) -> GraphResult {
        GraphResult {
            concept: "Entropy".to_string(),
            nodes,
            edges,
            meta: Meta {
                generated_at: Utc::now(),
                version: 1,
                checker_summary: CheckerSummary::default(),
                agent_trace: None,
            },
        }
    }

    fn nodes() -> Vec<Node> {
        vec![
            Node::new("Entropy", Domain::core(), 0.9),
            Node::new("Heat", Domain::new("Physics"), 0.8),
            Node::new("Huffman coding", Domain::new("Computer Science"), 0.8),
        ]
    }

    fn edge(source: &str, target: &str, relation: Relation, confidence: f64, snippet: &str) -> Edge {
        Edge::new(
            source,
            target,
            relation,
            "because",
            Evidence {
                title: "t".to_string(),
                snippet: snippet.to_string(),
                url: None,
                domain: None,
            },
            confidence,
        )
    }

    #[test]
    fn test_supported_edge_passes() {
        let mut g = graph(
            nodes(),
            vec![edge("core:entropy", "physics:heat", Relation::Explains, 0.8, "Entropy governs heat flow.")],
        );
        let summary = Checker::new(CheckPolicy::strict()).check(&mut g);
        assert!(g.edges[0].checked);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.edges_checked, 1);
    }

    #[test]
    fn test_unsupported_specific_relation_is_downgraded() {
        let mut g = graph(
            nodes(),
            vec![edge("core:entropy", "physics:heat", Relation::IsA, 0.8, "Entropy measures disorder.")],
        );
        let summary = Checker::new(CheckPolicy::strict()).check(&mut g);
        let e = &g.edges[0];
        assert!(!e.checked);
        assert_eq!(e.relation, Relation::RelatedTo);
        assert!(e.has_flag(EdgeFlag::Downgraded));
        assert!((e.confidence - 0.48).abs() < 1e-9);
        assert!(e.check_reason.as_deref().unwrap().contains("'Heat'"));
        assert_eq!(summary.edges_downgraded, 1);

        // a second pass keeps it related_to without another downgrade
        let again = Checker::new(CheckPolicy::strict()).check(&mut g);
        assert_eq!(again.edges_downgraded, 0);
        assert!((g.edges[0].confidence - 0.48).abs() < 1e-9);
    }

    #[test]
    fn test_low_confidence_fails_without_downgrade() {
        let mut g = graph(
            nodes(),
            vec![edge("core:entropy", "physics:heat", Relation::Explains, 0.5, "Entropy governs heat.")],
        );
        Checker::new(CheckPolicy::strict()).check(&mut g);
        assert!(!g.edges[0].checked);
        assert_eq!(g.edges[0].relation, Relation::Explains);

        let mut relaxed = graph(
            nodes(),
            vec![edge("core:entropy", "physics:heat", Relation::Explains, 0.5, "Entropy governs heat.")],
        );
        Checker::new(CheckPolicy::relaxed()).check(&mut relaxed);
        assert!(relaxed.edges[0].checked);
    }

    #[test]
    fn test_fragments_are_checked_independently() {
        let mut g = graph(
            nodes(),
            vec![edge(
                "core:entropy",
                "physics:heat",
                Relation::RelatedTo,
                0.8,
                "Entropy is a state function.\nHeat flows from hot to cold.",
            )],
        );
        Checker::new(CheckPolicy::strict()).check(&mut g);
        assert!(!g.edges[0].checked);
        assert!(g.edges[0]
            .check_reason
            .as_deref()
            .unwrap()
            .contains("no single evidence fragment"));
    }

    #[test]
    fn test_bridges_edge_passes_on_cue() {
        let mut g = graph(
            nodes(),
            vec![edge(
                "physics:heat",
                "computer_science:huffman_coding",
                Relation::Bridges,
                0.7,
                "Thermodynamic ideas carry across to coding theory.",
            )],
        );
        Checker::new(CheckPolicy::strict()).check(&mut g);
        assert!(g.edges[0].checked);
    }

    #[test]
    fn test_schema_fixes_and_drops() {
        let mut bad = edge("core:entropy", "physics:heat", Relation::RelatedTo, f64::NAN, "Entropy and heat.");
        bad.explanation = "  ".to_string();
        let mut g = graph(
            nodes(),
            vec![
                bad,
                edge("core:entropy", "core:entropy", Relation::RelatedTo, 0.9, "Entropy."),
                edge("core:entropy", "biology:cell", Relation::RelatedTo, 0.9, "Entropy and cells."),
            ],
        );
        let summary = Checker::new(CheckPolicy::strict()).check(&mut g);
        assert_eq!(summary.edges_dropped, 2);
        assert_eq!(g.edges.len(), 1);
        assert_eq!(g.edges[0].explanation, EMPTY_EXPLANATION);
        assert_eq!(g.edges[0].confidence, 0.5);
        assert!(g.edges[0].id.is_some());
        // explanation, confidence and id
        assert_eq!(summary.schema_fixed, 3);
    }

    #[test]
    fn test_opposite_is_a_and_bridges_conflict() {
        let mut g = graph(
            nodes(),
            vec![
                edge("physics:heat", "computer_science:huffman_coding", Relation::IsA, 0.8, "Heat and Huffman coding."),
                edge(
                    "computer_science:huffman_coding",
                    "physics:heat",
                    Relation::Bridges,
                    0.8,
                    "Huffman coding and heat.",
                ),
            ],
        );
        let summary = Checker::new(CheckPolicy::strict()).check(&mut g);
        assert_eq!(summary.conflicts_flagged, 2);
        assert!(g.edges.iter().all(|e| e.has_flag(EdgeFlag::Conflict)));
        assert!(g.edges.iter().all(|e| e.checked));
    }

    #[test]
    fn test_confidence_spread_conflict_and_duplicates_ignored() {
        let mut dup = edge("core:entropy", "physics:heat", Relation::Explains, 1.0, "Entropy and heat.");
        dup.flag(EdgeFlag::Duplicate);
        let mut g = graph(
            nodes(),
            vec![
                edge("core:entropy", "physics:heat", Relation::Explains, 0.62, "Entropy and heat."),
                dup,
                edge("physics:heat", "core:entropy", Relation::RelatedTo, 0.65, "Heat and entropy."),
            ],
        );
        let summary = Checker::new(CheckPolicy::strict()).check(&mut g);
        assert_eq!(summary.conflicts_flagged, 0);

        let mut wide = graph(
            nodes(),
            vec![
                edge("core:entropy", "physics:heat", Relation::Explains, 0.62, "Entropy and heat."),
                edge("physics:heat", "core:entropy", Relation::RelatedTo, 1.0, "Heat and entropy."),
            ],
        );
        let summary = Checker::new(CheckPolicy::strict()).check(&mut wide);
        assert_eq!(summary.conflicts_flagged, 2);
    }

    #[test]
    fn test_downgrade_into_existing_triple_is_flagged_duplicate() {
        let mut g = graph(
            nodes(),
            vec![
                edge("core:entropy", "physics:heat", Relation::RelatedTo, 0.7, "Entropy and heat."),
                edge("core:entropy", "physics:heat", Relation::IsA, 0.8, "Entropy measures disorder."),
            ],
        );
        let summary = Checker::new(CheckPolicy::strict()).check(&mut g);

        assert_eq!(g.edges[1].relation, Relation::RelatedTo);
        assert!(g.edges[1].has_flag(EdgeFlag::Downgraded));
        assert!(g.edges[1].has_flag(EdgeFlag::Duplicate));
        assert!(!g.edges[0].has_flag(EdgeFlag::Duplicate));
        assert!(g.edges[0].evidence.snippet.contains("Entropy measures disorder."));
        assert_eq!(summary.dedup_edges_flagged, 1);
        assert_eq!(summary.conflicts_flagged, 0);
    }

    #[test]
    fn test_distinct_relations_conflict_when_enabled() {
        let edges = || {
            vec![
                edge("core:entropy", "physics:heat", Relation::Explains, 0.8, "Entropy governs heat flow."),
                edge("core:entropy", "physics:heat", Relation::RelatedTo, 0.7, "Entropy and heat."),
            ]
        };

        let mut default = graph(nodes(), edges());
        let summary = Checker::new(CheckPolicy::strict()).check(&mut default);
        assert_eq!(summary.conflicts_flagged, 0);

        let mut policy = CheckPolicy::strict();
        policy.conflict.distinct_relations = true;
        let mut g = graph(nodes(), edges());
        let summary = Checker::new(policy).check(&mut g);
        assert_eq!(summary.conflicts_flagged, 2);
        assert!(g.edges.iter().all(|e| e.has_flag(EdgeFlag::Conflict)));
        assert!(g.edges.iter().all(|e| e.checked));
    }
}

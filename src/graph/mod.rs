//! Knowledge graph data model.
//!
//! A [`GraphResult`] is the unit the pipeline produces, checks and persists:
//! nodes labelled with one [`Domain`], typed [`Edge`]s carrying the
//! [`Evidence`] they were extracted from, and a [`Meta`] block with the
//! Check Layer summary and an optional per-domain trace.

pub mod normalize;
pub mod traversal;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

pub use normalize::{mentions, node_id, normalize_name, normalize_text, slugify};
pub use traversal::{neighborhood, shortest_path, subgraph_within};

/// Reason carried by edges that have not been through the Check Layer yet.
pub const PENDING_CHECK: &str = "pending check";

/// Domain label of a node.
///
/// Disciplinary labels come from configuration; `Core` (the seed concept)
/// and `Bridge` (cross-domain connectors) are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domain(String);

impl Domain {
    pub const CORE: &'static str = "Core";
    pub const BRIDGE: &'static str = "Bridge";

    pub fn new(label: impl AsRef<str>) -> Self {
        Domain(label.as_ref().trim().to_string())
    }

    pub fn core() -> Self {
        Domain(Self::CORE.to_string())
    }

    pub fn bridge() -> Self {
        Domain(Self::BRIDGE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_core(&self) -> bool {
        self.0 == Self::CORE
    }

    pub fn is_bridge(&self) -> bool {
        self.0 == Self::BRIDGE
    }

    /// `Core` and `Bridge` are never planned or retrieved on their own.
    pub fn is_structural(&self) -> bool {
        self.is_core() || self.is_bridge()
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Domain {
    fn from(label: &str) -> Self {
        Domain::new(label)
    }
}

/// Typed relation between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    RelatedTo,
    UsedIn,
    IsA,
    Explains,
    Bridges,
}

impl Relation {
    pub const ALL: [Relation; 5] = [
        Relation::RelatedTo,
        Relation::UsedIn,
        Relation::IsA,
        Relation::Explains,
        Relation::Bridges,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::RelatedTo => "related_to",
            Relation::UsedIn => "used_in",
            Relation::IsA => "is_a",
            Relation::Explains => "explains",
            Relation::Bridges => "bridges",
        }
    }

    /// Lenient parse used on model output ("Is A", "used-in", ...).
    pub fn parse(raw: &str) -> Option<Relation> {
        let key: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        Relation::ALL.into_iter().find(|r| r.as_str() == key)
    }

    /// Everything except the generic `related_to`.
    pub fn is_specific(&self) -> bool {
        *self != Relation::RelatedTo
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Markers the Merger and Checker attach to edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeFlag {
    Conflict,
    Duplicate,
    Downgraded,
}

/// Citation backing an edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub title: String,
    /// One or more newline-separated fragments
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
}

impl Evidence {
    /// Non-empty snippet fragments, each an independent citation candidate.
    pub fn fragments(&self) -> impl Iterator<Item = &str> {
        self.snippet
            .split('\n')
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.fragments().next().is_none()
    }

    /// Append fragments not already present, keeping one fragment per line.
    pub fn absorb(&mut self, other: &Evidence) {
        let known: HashSet<String> = self.fragments().map(normalize_text).collect();
        let mut added: Vec<String> = Vec::new();
        for fragment in other.fragments() {
            let key = normalize_text(fragment);
            if !known.contains(&key) && !added.iter().any(|a| normalize_text(a) == key) {
                added.push(fragment.to_string());
            }
        }
        for fragment in added {
            if !self.snippet.is_empty() {
                self.snippet.push('\n');
            }
            self.snippet.push_str(&fragment);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub domain: Domain,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    pub confidence: f64,
}

impl Node {
    /// Node with the canonical `<domain>:<name>` id.
    pub fn new(name: impl Into<String>, domain: Domain, confidence: f64) -> Self {
        let name = name.into();
        Self {
            id: node_id(&domain, &name),
            name,
            domain,
            definition: None,
            confidence,
        }
    }

    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = Some(definition.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default)]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    pub relation: Relation,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub evidence: Evidence,
    pub confidence: f64,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub check_reason: Option<String>,
    #[serde(default)]
    pub flags: BTreeSet<EdgeFlag>,
}

impl Edge {
    /// Unchecked edge, as produced by the Extractor.
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relation: Relation,
        explanation: impl Into<String>,
        evidence: Evidence,
        confidence: f64,
    ) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
            relation,
            explanation: explanation.into(),
            evidence,
            confidence,
            checked: false,
            check_reason: Some(PENDING_CHECK.to_string()),
            flags: BTreeSet::new(),
        }
    }

    pub fn has_flag(&self, flag: EdgeFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn flag(&mut self, flag: EdgeFlag) {
        self.flags.insert(flag);
    }

    /// Stable id derived from `source|relation|target`.
    pub fn base_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}|{}|{}", self.source, self.relation, self.target));
        let digest = format!("{:x}", hasher.finalize());
        digest[..12].to_string()
    }

    /// Same unordered endpoint pair.
    pub fn same_pair(&self, other: &Edge) -> bool {
        (self.source == other.source && self.target == other.target)
            || (self.source == other.target && self.target == other.source)
    }
}

/// Give every id-less edge a unique id; later instances of a triple get `-N`.
pub fn assign_edge_ids(edges: &mut [Edge]) -> usize {
    let mut used: HashSet<String> = edges.iter().filter_map(|e| e.id.clone()).collect();
    let mut assigned = 0;
    for edge in edges.iter_mut().filter(|e| e.id.is_none()) {
        let base = edge.base_id();
        let mut candidate = base.clone();
        let mut n = 2;
        while used.contains(&candidate) {
            candidate = format!("{}-{}", base, n);
            n += 1;
        }
        used.insert(candidate.clone());
        edge.id = Some(candidate);
        assigned += 1;
    }
    assigned
}

/// Candidate graph produced for one domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl SubGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckerSummary {
    pub passed: usize,
    pub failed: usize,
    #[serde(default)]
    pub schema_fixed: usize,
    #[serde(default)]
    pub edges_checked: usize,
    #[serde(default)]
    pub edges_dropped: usize,
    #[serde(default)]
    pub edges_downgraded: usize,
    #[serde(default)]
    pub conflicts_flagged: usize,
    #[serde(default)]
    pub dedup_nodes_merged: usize,
    #[serde(default)]
    pub dedup_edges_flagged: usize,
    #[serde(default)]
    pub bridges_derived: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Ok,
    Failed,
}

/// What one domain pipeline planned and saw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainTrace {
    pub queries: Vec<String>,
    /// Sample of the retrieved passages
    pub passages: Vec<Evidence>,
    pub passage_count: usize,
    pub status: TraceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub type AgentTrace = BTreeMap<String, DomainTrace>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub generated_at: DateTime<Utc>,
    pub version: u32,
    pub checker_summary: CheckerSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_trace: Option<AgentTrace>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphResult {
    pub concept: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub meta: Meta,
}

impl GraphResult {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id.as_deref() == Some(id))
    }

    /// The single `Core` node (the seed concept).
    pub fn core_node(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.domain.is_core())
    }

    /// Structural invariants every persisted graph must satisfy.
    ///
    /// Returns one message per violation; an empty list means the graph is
    /// consistent.
    pub fn integrity_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let mut ids: HashMap<&str, &Node> = HashMap::new();
        let mut names: HashMap<String, &str> = HashMap::new();

        for node in &self.nodes {
            if ids.insert(node.id.as_str(), node).is_some() {
                violations.push(format!("duplicate node id {}", node.id));
            }
            if let Some(other) = names.insert(normalize_name(&node.name), node.id.as_str()) {
                violations.push(format!(
                    "nodes {} and {} share a normalized name",
                    other, node.id
                ));
            }
            if !(0.0..=1.0).contains(&node.confidence) {
                violations.push(format!("node {} confidence out of range", node.id));
            }
        }

        let cores = self.nodes.iter().filter(|n| n.domain.is_core()).count();
        if cores != 1 {
            violations.push(format!("expected exactly one Core node, found {}", cores));
        }

        let mut edge_ids = HashSet::new();
        for edge in &self.edges {
            let label = edge.id.clone().unwrap_or_else(|| edge.base_id());
            if !edge_ids.insert(label.clone()) {
                violations.push(format!("duplicate edge id {}", label));
            }
            if !ids.contains_key(edge.source.as_str()) || !ids.contains_key(edge.target.as_str()) {
                violations.push(format!("edge {} has an unresolved endpoint", label));
            }
            if edge.source == edge.target {
                violations.push(format!("edge {} is a self loop", label));
            }
            if !(0.0..=1.0).contains(&edge.confidence) {
                violations.push(format!("edge {} confidence out of range", label));
            }
            if !edge.checked
                && edge
                    .check_reason
                    .as_deref()
                    .map_or(true, |r| r.trim().is_empty())
            {
                violations.push(format!("unchecked edge {} has no check_reason", label));
            }
            if edge.has_flag(EdgeFlag::Downgraded) && edge.relation != Relation::RelatedTo {
                violations.push(format!("downgraded edge {} kept relation {}", label, edge.relation));
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence(snippet: &str) -> Evidence {
        Evidence {
            title: "t".to_string(),
            snippet: snippet.to_string(),
            url: None,
            domain: None,
        }
    }

    fn tiny_graph() -> GraphResult {
        let core = Node::new("Entropy", Domain::core(), 0.9);
        let info = Node::new("Information", Domain::new("Computer Science"), 0.78);
        let mut edge = Edge::new(
            core.id.clone(),
            info.id.clone(),
            Relation::RelatedTo,
            "x",
            evidence("entropy and information"),
            0.7,
        );
        edge.id = Some(edge.base_id());
        GraphResult {
            concept: "Entropy".to_string(),
            nodes: vec![core, info],
            edges: vec![edge],
            meta: Meta {
                generated_at: Utc::now(),
                version: 1,
                checker_summary: CheckerSummary::default(),
                agent_trace: None,
            },
        }
    }

    #[test]
    fn test_relation_lenient_parse() {
        assert_eq!(Relation::parse("Is A"), Some(Relation::IsA));
        assert_eq!(Relation::parse("used-in"), Some(Relation::UsedIn));
        assert_eq!(Relation::parse(" bridges "), Some(Relation::Bridges));
        assert_eq!(Relation::parse("causes"), None);
        assert!(!Relation::RelatedTo.is_specific());
        assert!(Relation::Explains.is_specific());
    }

    #[test]
    fn test_relation_serde_names() {
        let json = serde_json::to_string(&Relation::RelatedTo).unwrap();
        assert_eq!(json, "\"related_to\"");
        let flag: EdgeFlag = serde_json::from_str("\"downgraded\"").unwrap();
        assert_eq!(flag, EdgeFlag::Downgraded);
    }

    #[test]
    fn test_domain_structural() {
        assert!(Domain::core().is_structural());
        assert!(Domain::bridge().is_structural());
        assert!(!Domain::new("  Physics ").is_structural());
        assert_eq!(Domain::new("  Physics ").as_str(), "Physics");
    }

    #[test]
    fn test_evidence_fragments_and_absorb() {
        let mut ev = evidence("first line\n\n  second line  ");
        assert_eq!(ev.fragments().collect::<Vec<_>>(), vec!["first line", "second line"]);

        ev.absorb(&evidence("Second   line\nthird line"));
        assert_eq!(ev.snippet, "first line\n\n  second line  \nthird line");
        assert!(evidence("  \n ").is_empty());
    }

    #[test]
    fn test_assign_edge_ids_keeps_duplicates_distinct() {
        let mut edges = vec![
            Edge::new("a", "b", Relation::IsA, "", Evidence::default(), 0.5),
            Edge::new("a", "b", Relation::IsA, "", Evidence::default(), 0.4),
            Edge::new("a", "c", Relation::IsA, "", Evidence::default(), 0.4),
        ];
        assert_eq!(assign_edge_ids(&mut edges), 3);
        let base = edges[0].base_id();
        assert_eq!(edges[0].id.as_deref(), Some(base.as_str()));
        assert_eq!(edges[1].id, Some(format!("{}-2", base)));
        assert_ne!(edges[2].id, edges[0].id);
        assert_eq!(base.len(), 12);
    }

    #[test]
    fn test_integrity_of_consistent_graph() {
        assert!(tiny_graph().integrity_violations().is_empty());
    }

    #[test]
    fn test_integrity_catches_broken_graph() {
        let mut graph = tiny_graph();
        graph.edges[0].target = "computer_science:missing".to_string();
        graph.edges[0].check_reason = None;
        let violations = graph.integrity_violations();
        assert!(violations.iter().any(|v| v.contains("unresolved endpoint")));
        assert!(violations.iter().any(|v| v.contains("no check_reason")));
    }

    #[test]
    fn test_graph_result_json_shape() {
        let graph = tiny_graph();
        let value = serde_json::to_value(&graph).unwrap();
        assert_eq!(value["meta"]["version"], 1);
        assert_eq!(value["edges"][0]["relation"], "related_to");
        assert_eq!(value["nodes"][0]["domain"], "Core");
        assert!(value["meta"].get("agent_trace").is_none());
        let back: GraphResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, graph);
    }
}

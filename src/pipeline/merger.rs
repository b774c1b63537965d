//! Union of per-domain subgraphs into one concept graph.

use std::collections::{HashMap, HashSet};

use crate::graph::{
    assign_edge_ids, normalize_name, CheckerSummary, Domain, Edge, EdgeFlag, GraphResult, Node, Relation,
    SubGraph,
};

/// Counters reported in the checker summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub nodes_merged: usize,
    pub duplicates_flagged: usize,
    pub self_loops_dropped: usize,
    pub bridges_derived: usize,
}

impl MergeStats {
    pub fn apply_to(&self, summary: &mut CheckerSummary) {
        summary.dedup_nodes_merged = self.nodes_merged;
        summary.dedup_edges_flagged += self.duplicates_flagged;
        summary.bridges_derived = self.bridges_derived;
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub stats: MergeStats,
}

/// Merge subgraphs for a fresh generation of `concept`.
pub fn merge(concept: &str, parts: Vec<SubGraph>) -> MergeOutcome {
    Merger::new(None).run(concept, parts)
}

/// Merge subgraphs into an existing graph; existing node ids never change.
pub fn merge_into(existing: &GraphResult, parts: Vec<SubGraph>) -> MergeOutcome {
    Merger::new(Some(existing)).run(&existing.concept, parts)
}

#[derive(Default)]
struct Merger {
    nodes: Vec<Node>,
    pinned: HashSet<usize>,
    by_name: HashMap<String, usize>,
    /// any id seen so far -> id of the node that now represents it
    aliases: HashMap<String, String>,
    edges: Vec<Edge>,
    stats: MergeStats,
}

impl Merger {
    fn new(existing: Option<&GraphResult>) -> Self {
        let mut merger = Merger::default();
        if let Some(graph) = existing {
            for node in &graph.nodes {
                let idx = merger.nodes.len();
                merger.by_name.insert(normalize_name(&node.name), idx);
                merger.aliases.insert(node.id.clone(), node.id.clone());
                merger.pinned.insert(idx);
                merger.nodes.push(node.clone());
            }
            merger.edges.extend(graph.edges.iter().cloned());
        }
        merger
    }

    fn run(mut self, concept: &str, parts: Vec<SubGraph>) -> MergeOutcome {
        for part in parts {
            for node in part.nodes {
                self.add_node(node);
            }
            self.edges.extend(part.edges);
        }

        self.resolve_edges();
        self.ensure_single_core(concept);
        self.derive_bridges();
        self.flag_duplicates();
        assign_edge_ids(&mut self.edges);

        MergeOutcome {
            nodes: self.nodes,
            edges: self.edges,
            stats: self.stats,
        }
    }

    /// Same normalized name means same node: the higher confidence wins,
    /// first seen on ties, and pinned nodes always keep their id.
    fn add_node(&mut self, node: Node) {
        let key = normalize_name(&node.name);
        let Some(&idx) = self.by_name.get(&key) else {
            self.aliases.insert(node.id.clone(), node.id.clone());
            self.by_name.insert(key, self.nodes.len());
            self.nodes.push(node);
            return;
        };

        self.stats.nodes_merged += 1;
        let keeper = &mut self.nodes[idx];
        if self.pinned.contains(&idx) || node.confidence <= keeper.confidence {
            keeper.confidence = keeper.confidence.max(node.confidence);
            if keeper.definition.is_none() {
                keeper.definition = node.definition;
            }
            let keeper_id = keeper.id.clone();
            self.aliases.insert(node.id, keeper_id);
            return;
        }

        let old_id = keeper.id.clone();
        let old_definition = keeper.definition.take();
        *keeper = node;
        if keeper.definition.is_none() {
            keeper.definition = old_definition;
        }
        let new_id = keeper.id.clone();
        for target in self.aliases.values_mut() {
            if *target == old_id {
                *target = new_id.clone();
            }
        }
        self.aliases.insert(old_id, new_id.clone());
        self.aliases.insert(new_id.clone(), new_id);
    }

    fn resolve_edges(&mut self) {
        let aliases = &self.aliases;
        let before = self.edges.len();
        self.edges.retain_mut(|edge| {
            if let Some(id) = aliases.get(&edge.source) {
                edge.source = id.clone();
            }
            if let Some(id) = aliases.get(&edge.target) {
                edge.target = id.clone();
            }
            edge.source != edge.target
        });
        self.stats.self_loops_dropped = before - self.edges.len();
    }

    /// Exactly one `Core` node: the seed concept.
    fn ensure_single_core(&mut self, concept: &str) {
        let seed_idx = match self.by_name.get(&normalize_name(concept)) {
            Some(&idx) => idx,
            None => {
                let idx = self.nodes.len();
                let seed = Node::new(concept.trim(), Domain::core(), 0.9);
                self.aliases.insert(seed.id.clone(), seed.id.clone());
                self.by_name.insert(normalize_name(concept), idx);
                self.nodes.push(seed);
                idx
            }
        };

        for (idx, node) in self.nodes.iter_mut().enumerate() {
            if idx == seed_idx {
                node.domain = Domain::core();
            } else if node.domain.is_core() {
                node.domain = Domain::bridge();
            }
        }
    }

    /// An edge between two different non-structural domains makes the
    /// endpoint outside the edge's origin domain a `Bridge` node.
    fn derive_bridges(&mut self) {
        let index: HashMap<String, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(idx, n)| (n.id.clone(), idx))
            .collect();

        for edge in self.edges.iter_mut() {
            let (Some(&si), Some(&ti)) = (index.get(&edge.source), index.get(&edge.target)) else {
                continue;
            };
            let (source_domain, target_domain) = (&self.nodes[si].domain, &self.nodes[ti].domain);
            if source_domain.is_structural() || target_domain.is_structural() || source_domain == target_domain {
                continue;
            }

            let origin = match &edge.evidence.domain {
                Some(d) if d == source_domain || d == target_domain => d.clone(),
                _ => source_domain.clone(),
            };
            let promote = if &origin == source_domain { ti } else { si };
            self.nodes[promote].domain = Domain::bridge();
            self.stats.bridges_derived += 1;

            if edge.relation == Relation::RelatedTo && !edge.has_flag(EdgeFlag::Downgraded) {
                edge.relation = Relation::Bridges;
            }
        }
    }

    fn flag_duplicates(&mut self) {
        self.stats.duplicates_flagged += flag_duplicate_edges(&mut self.edges);
    }
}

/// Repeated (source, target, relation) triples stay, flagged; the most
/// confident unflagged instance collects the others' evidence.
///
/// Returns how many edges gained the `duplicate` flag.
pub(crate) fn flag_duplicate_edges(edges: &mut [Edge]) -> usize {
    let mut groups: HashMap<(String, String, Relation), Vec<usize>> = HashMap::new();
    let mut order: Vec<(String, String, Relation)> = Vec::new();
    for (idx, edge) in edges.iter().enumerate() {
        let key = (edge.source.clone(), edge.target.clone(), edge.relation);
        let group = groups.entry(key.clone()).or_default();
        if group.is_empty() {
            order.push(key);
        }
        group.push(idx);
    }

    let mut flagged = 0;
    for key in order {
        let Some(members) = groups.get(&key) else { continue };
        if members.len() < 2 {
            continue;
        }
        let rank = |idx: usize| (!edges[idx].has_flag(EdgeFlag::Duplicate), edges[idx].confidence);
        let mut canonical = members[0];
        for &idx in &members[1..] {
            if rank(idx) > rank(canonical) {
                canonical = idx;
            }
        }

        for &idx in members {
            if idx == canonical {
                continue;
            }
            let evidence = edges[idx].evidence.clone();
            edges[canonical].evidence.absorb(&evidence);
            if !edges[idx].has_flag(EdgeFlag::Duplicate) {
                edges[idx].flag(EdgeFlag::Duplicate);
                flagged += 1;
            }
        }
    }
    flagged
}

//! Coercion of raw model output into a domain subgraph.

use serde_json::{Map, Value};
use std::collections::HashMap;

use super::extractor::Seed;
use crate::graph::{normalize_name, Domain, Edge, Evidence, Node, Relation, SubGraph};
use crate::llm::extract_json_object;

const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Outcome of coercing one model answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Coercion {
    WellFormed(SubGraph),
    Repaired { graph: SubGraph, repairs: Vec<String> },
    Unrecoverable(String),
}

impl Coercion {
    pub fn into_graph(self) -> Option<SubGraph> {
        match self {
            Coercion::WellFormed(graph) | Coercion::Repaired { graph, .. } => Some(graph),
            Coercion::Unrecoverable(_) => None,
        }
    }
}

/// Coerce model text into nodes and unchecked edges for `domain`.
pub fn coerce_subgraph(raw: &str, seed: &Seed, domain: &Domain) -> Coercion {
    let obj = match extract_json_object(raw) {
        Ok(obj) => obj,
        Err(e) => return Coercion::Unrecoverable(format!("unparseable output: {}", e)),
    };
    let Some(raw_nodes) = obj.get("nodes").and_then(Value::as_array) else {
        return Coercion::Unrecoverable("output has no nodes array".to_string());
    };

    let mut repairs = Vec::new();
    let seed_key = normalize_name(&seed.name);
    let mut nodes: Vec<Node> = Vec::new();
    // model id or normalized name -> canonical id
    let mut aliases: HashMap<String, String> = HashMap::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();

    for value in raw_nodes {
        let Some(fields) = value.as_object() else {
            repairs.push("dropped non-object node".to_string());
            continue;
        };
        let Some(name) = string_field(fields, "name") else {
            repairs.push("dropped node without a name".to_string());
            continue;
        };
        let key = normalize_name(&name);
        if key.is_empty() {
            repairs.push(format!("dropped node with unusable name '{}'", name));
            continue;
        }

        if let Some(&existing) = by_name.get(&key) {
            if let Some(model_id) = string_field(fields, "id") {
                aliases.insert(model_id, nodes[existing].id.clone());
            }
            repairs.push(format!("merged repeated node '{}'", name));
            continue;
        }

        let node_domain = if key == seed_key {
            seed.domain.clone()
        } else {
            coerce_domain(fields, &name, domain, &mut repairs)
        };
        let confidence = coerce_confidence(fields.get("confidence"), &name, &mut repairs);

        let mut node = if key == seed_key {
            Node {
                id: seed.node_id.clone(),
                name: seed.name.clone(),
                domain: node_domain,
                definition: None,
                confidence,
            }
        } else {
            Node::new(name.clone(), node_domain, confidence)
        };
        node.definition = string_field(fields, "definition");

        if let Some(model_id) = string_field(fields, "id") {
            aliases.insert(model_id, node.id.clone());
        }
        aliases.insert(key.clone(), node.id.clone());
        by_name.insert(key, nodes.len());
        nodes.push(node);
    }

    if nodes.is_empty() {
        return Coercion::Unrecoverable("output contains no usable nodes".to_string());
    }
    if !by_name.contains_key(&seed_key) {
        nodes.insert(
            0,
            Node {
                id: seed.node_id.clone(),
                name: seed.name.clone(),
                domain: seed.domain.clone(),
                definition: None,
                confidence: 0.9,
            },
        );
        aliases.insert(seed_key, seed.node_id.clone());
        repairs.push("added missing seed node".to_string());
    }

    let edges = match obj.get("edges") {
        Some(Value::Array(raw_edges)) => raw_edges
            .iter()
            .filter_map(|value| coerce_edge(value, &aliases, domain, &mut repairs))
            .collect(),
        _ => {
            repairs.push("missing edges array".to_string());
            Vec::new()
        }
    };

    let graph = SubGraph { nodes, edges };
    if repairs.is_empty() {
        Coercion::WellFormed(graph)
    } else {
        Coercion::Repaired { graph, repairs }
    }
}

fn string_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Domain of a non-seed node: the current domain or `Bridge`; a `Core`
/// label on anything but the seed means a cross-domain connector.
fn coerce_domain(
    fields: &Map<String, Value>,
    name: &str,
    domain: &Domain,
    repairs: &mut Vec<String>,
) -> Domain {
    match string_field(fields, "domain").map(Domain::new) {
        None => {
            repairs.push(format!("defaulted domain of '{}'", name));
            domain.clone()
        }
        Some(d) if &d == domain || d.is_bridge() => d,
        Some(d) if d.is_core() => {
            repairs.push(format!("moved non-seed Core node '{}' to Bridge", name));
            Domain::bridge()
        }
        Some(d) => {
            repairs.push(format!("moved '{}' from {} into {}", name, d, domain));
            domain.clone()
        }
    }
}

fn coerce_confidence(value: Option<&Value>, label: &str, repairs: &mut Vec<String>) -> f64 {
    match value.and_then(Value::as_f64) {
        Some(c) if (0.0..=1.0).contains(&c) => c,
        Some(c) if c.is_finite() => {
            repairs.push(format!("clamped confidence of '{}'", label));
            c.clamp(0.0, 1.0)
        }
        _ => {
            repairs.push(format!("defaulted confidence of '{}'", label));
            DEFAULT_CONFIDENCE
        }
    }
}

fn resolve(aliases: &HashMap<String, String>, reference: &str) -> Option<String> {
    aliases
        .get(reference)
        .or_else(|| aliases.get(&normalize_name(reference)))
        .cloned()
}

fn coerce_edge(
    value: &Value,
    aliases: &HashMap<String, String>,
    domain: &Domain,
    repairs: &mut Vec<String>,
) -> Option<Edge> {
    let Some(fields) = value.as_object() else {
        repairs.push("dropped non-object edge".to_string());
        return None;
    };

    let (Some(source_ref), Some(target_ref)) =
        (string_field(fields, "source"), string_field(fields, "target"))
    else {
        repairs.push("dropped edge without endpoints".to_string());
        return None;
    };
    let (Some(source), Some(target)) = (resolve(aliases, &source_ref), resolve(aliases, &target_ref))
    else {
        repairs.push(format!(
            "dropped edge {} -> {} with an unresolved endpoint",
            source_ref, target_ref
        ));
        return None;
    };
    if source == target {
        repairs.push(format!("dropped self-loop on {}", source));
        return None;
    }

    let relation = match string_field(fields, "relation") {
        Some(raw) => Relation::parse(&raw).unwrap_or_else(|| {
            repairs.push(format!("unknown relation '{}' coerced to related_to", raw));
            Relation::RelatedTo
        }),
        None => {
            repairs.push("missing relation coerced to related_to".to_string());
            Relation::RelatedTo
        }
    };

    let mut evidence = match fields.get("evidence") {
        Some(Value::Object(ev)) => Evidence {
            title: string_field(ev, "title").unwrap_or_default(),
            snippet: string_field(ev, "snippet").unwrap_or_default(),
            url: string_field(ev, "url"),
            domain: None,
        },
        Some(Value::String(snippet)) => Evidence {
            snippet: snippet.trim().to_string(),
            ..Evidence::default()
        },
        _ => {
            repairs.push(format!("missing evidence on {} -> {}", source, target));
            Evidence::default()
        }
    };
    evidence.domain = Some(domain.clone());

    let label = format!("{} -> {}", source, target);
    let confidence = coerce_confidence(fields.get("confidence"), &label, repairs);
    let explanation = string_field(fields, "explanation").unwrap_or_default();

    Some(Edge::new(source, target, relation, explanation, evidence, confidence))
}

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};

use super::{GraphStore, NodeLocation};
use crate::db::Db;
use crate::error::{Result, XkgError};
use crate::graph::{subgraph_within, Domain, Edge, EdgeFlag, Evidence, GraphResult, Meta, Node, Relation};

pub(crate) fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Graph store over the SQLite tables from `001_graph_store.sql`.
#[derive(Debug, Clone)]
pub struct SqliteGraphStore {
    db: Db,
}

impl SqliteGraphStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn write_graph(conn: &mut Connection, graph: &GraphResult) -> Result<()> {
    let tx = conn.transaction()?;
    let meta_json = serde_json::to_string(&graph.meta)?;

    tx.execute(
        "INSERT INTO graphs (concept, version, generated_at, meta_json)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(concept, version) DO UPDATE SET
            generated_at = excluded.generated_at,
            meta_json = excluded.meta_json",
        params![graph.concept, graph.meta.version, timestamp(&graph.meta.generated_at), meta_json],
    )?;
    tx.execute(
        "DELETE FROM graph_nodes WHERE concept = ?1 AND version = ?2",
        params![graph.concept, graph.meta.version],
    )?;
    tx.execute(
        "DELETE FROM graph_edges WHERE concept = ?1 AND version = ?2",
        params![graph.concept, graph.meta.version],
    )?;

    {
        let mut insert_node = tx.prepare(
            "INSERT INTO graph_nodes (concept, version, node_id, position, name, domain, definition, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for (position, node) in graph.nodes.iter().enumerate() {
            insert_node.execute(params![
                graph.concept,
                graph.meta.version,
                node.id,
                position as i64,
                node.name,
                node.domain.as_str(),
                node.definition,
                node.confidence,
            ])?;
        }

        let mut insert_edge = tx.prepare(
            "INSERT INTO graph_edges (concept, version, edge_id, position, source, target, relation,
                                      explanation, evidence_json, confidence, checked, check_reason, flags_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )?;
        for (position, edge) in graph.edges.iter().enumerate() {
            let edge_id = edge.id.clone().ok_or_else(|| {
                XkgError::Persistence(format!("edge {} -> {} has no id", edge.source, edge.target))
            })?;
            insert_edge.execute(params![
                graph.concept,
                graph.meta.version,
                edge_id,
                position as i64,
                edge.source,
                edge.target,
                edge.relation.as_str(),
                edge.explanation,
                serde_json::to_string(&edge.evidence)?,
                edge.confidence,
                edge.checked,
                edge.check_reason,
                serde_json::to_string(&edge.flags)?,
            ])?;
        }
    }

    tx.commit()?;
    Ok(())
}

fn resolve_version(conn: &Connection, concept: &str, version: Option<u32>) -> Result<Option<u32>> {
    match version {
        Some(v) => Ok(conn
            .query_row(
                "SELECT version FROM graphs WHERE concept = ?1 AND version = ?2",
                params![concept, v],
                |row| row.get(0),
            )
            .optional()?),
        None => Ok(conn.query_row(
            "SELECT MAX(version) FROM graphs WHERE concept = ?1",
            params![concept],
            |row| row.get::<_, Option<u32>>(0),
        )?),
    }
}

fn read_graph(conn: &Connection, concept: &str, version: u32) -> Result<GraphResult> {
    let meta_json: String = conn.query_row(
        "SELECT meta_json FROM graphs WHERE concept = ?1 AND version = ?2",
        params![concept, version],
        |row| row.get(0),
    )?;
    let meta: Meta = serde_json::from_str(&meta_json)?;

    let mut stmt = conn.prepare(
        "SELECT node_id, name, domain, definition, confidence FROM graph_nodes
         WHERE concept = ?1 AND version = ?2 ORDER BY position",
    )?;
    let nodes = stmt
        .query_map(params![concept, version], |row| {
            Ok(Node {
                id: row.get(0)?,
                name: row.get(1)?,
                domain: Domain::new(row.get::<_, String>(2)?),
                definition: row.get(3)?,
                confidence: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT edge_id, source, target, relation, explanation, evidence_json, confidence,
                checked, check_reason, flags_json
         FROM graph_edges WHERE concept = ?1 AND version = ?2 ORDER BY position",
    )?;
    let rows = stmt
        .query_map(params![concept, version], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, f64>(6)?,
                row.get::<_, bool>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, String>(9)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut edges = Vec::with_capacity(rows.len());
    for (id, source, target, relation, explanation, evidence_json, confidence, checked, check_reason, flags_json) in
        rows
    {
        let relation = Relation::parse(&relation)
            .ok_or_else(|| XkgError::Persistence(format!("unknown relation '{}' in edge {}", relation, id)))?;
        let evidence: Evidence = serde_json::from_str(&evidence_json)?;
        let flags: BTreeSet<EdgeFlag> = serde_json::from_str(&flags_json)?;
        edges.push(Edge {
            id: Some(id),
            source,
            target,
            relation,
            explanation,
            evidence,
            confidence,
            checked,
            check_reason,
            flags,
        });
    }

    Ok(GraphResult {
        concept: concept.to_string(),
        nodes,
        edges,
        meta,
    })
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn upsert(&self, graph: &GraphResult) -> Result<()> {
        let graph = graph.clone();
        self.db
            .with_connection(move |conn| write_graph(conn, &graph))
            .await
    }

    async fn query(&self, concept: &str, depth: Option<usize>, version: Option<u32>) -> Result<Option<GraphResult>> {
        let concept = concept.trim().to_string();
        let graph = self
            .db
            .with_connection(move |conn| match resolve_version(conn, &concept, version)? {
                Some(v) => read_graph(conn, &concept, v).map(Some),
                None => Ok(None),
            })
            .await?;
        Ok(match (graph, depth) {
            (Some(g), Some(d)) => Some(subgraph_within(&g, d)),
            (graph, _) => graph,
        })
    }

    async fn find_node(&self, node_id: &str, concept: Option<&str>) -> Result<Option<NodeLocation>> {
        let node_id = node_id.to_string();
        let concept = concept.map(|c| c.trim().to_string());
        self.db
            .with_connection(move |conn| {
                let found: Option<(String, u32)> = conn
                    .query_row(
                        "SELECT n.concept, n.version FROM graph_nodes n
                         JOIN graphs g ON g.concept = n.concept AND g.version = n.version
                         WHERE n.node_id = ?1 AND (?2 IS NULL OR n.concept = ?2)
                         ORDER BY g.generated_at DESC, n.version DESC
                         LIMIT 1",
                        params![node_id, concept],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                let Some((concept, version)) = found else {
                    return Ok(None);
                };
                let graph = read_graph(conn, &concept, version)?;
                Ok(graph.node(&node_id).cloned().map(|node| NodeLocation {
                    concept,
                    version,
                    node,
                }))
            })
            .await
    }

    async fn latest_version(&self, concept: &str) -> Result<Option<u32>> {
        let concept = concept.trim().to_string();
        self.db
            .with_connection(move |conn| resolve_version(conn, &concept, None))
            .await
    }
}

/// In-process graph store for tests and one-shot CLI runs.
#[derive(Default)]
pub struct MemoryGraphStore {
    graphs: Mutex<HashMap<(String, u32), GraphResult>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn graphs(&self) -> std::sync::MutexGuard<'_, HashMap<(String, u32), GraphResult>> {
        self.graphs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert(&self, graph: &GraphResult) -> Result<()> {
        self.graphs()
            .insert((graph.concept.clone(), graph.meta.version), graph.clone());
        Ok(())
    }

    async fn query(&self, concept: &str, depth: Option<usize>, version: Option<u32>) -> Result<Option<GraphResult>> {
        let concept = concept.trim();
        let graphs = self.graphs();
        let version = match version {
            Some(v) => Some(v),
            None => graphs.keys().filter(|(c, _)| c == concept).map(|(_, v)| *v).max(),
        };
        let graph = version.and_then(|v| graphs.get(&(concept.to_string(), v)));
        Ok(match (graph, depth) {
            (Some(g), Some(d)) => Some(subgraph_within(g, d)),
            (g, _) => g.cloned(),
        })
    }

    async fn find_node(&self, node_id: &str, concept: Option<&str>) -> Result<Option<NodeLocation>> {
        let graphs = self.graphs();
        let latest = graphs
            .values()
            .filter(|g| concept.map_or(true, |c| g.concept == c.trim()))
            .filter_map(|g| g.node(node_id).map(|n| (g, n)))
            .max_by(|(a, _), (b, _)| {
                (a.meta.generated_at, a.meta.version).cmp(&(b.meta.generated_at, b.meta.version))
            });
        Ok(latest.map(|(g, n)| NodeLocation {
            concept: g.concept.clone(),
            version: g.meta.version,
            node: n.clone(),
        }))
    }

    async fn latest_version(&self, concept: &str) -> Result<Option<u32>> {
        let concept = concept.trim();
        Ok(self
            .graphs()
            .keys()
            .filter(|(c, _)| c == concept)
            .map(|(_, v)| *v)
            .max())
    }
}

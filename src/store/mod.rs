//! Persistence seams for graphs and job records.

pub mod graph_store;
pub mod job_store;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::graph::{GraphResult, Node};
use crate::jobs::{Job, JobSummary};

pub use graph_store::{MemoryGraphStore, SqliteGraphStore};
pub use job_store::{MemoryJobStore, SqliteJobStore};

/// Where a node was found.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeLocation {
    pub concept: String,
    pub version: u32,
    pub node: Node,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert or replace the graph stored under (concept, version).
    async fn upsert(&self, graph: &GraphResult) -> Result<()>;

    /// The graph for `concept`, latest version unless one is given,
    /// limited to `depth` hops around the Core node when given.
    async fn query(&self, concept: &str, depth: Option<usize>, version: Option<u32>) -> Result<Option<GraphResult>>;

    /// Latest graph containing `node_id`, optionally within one concept.
    async fn find_node(&self, node_id: &str, concept: Option<&str>) -> Result<Option<NodeLocation>>;

    async fn latest_version(&self, concept: &str) -> Result<Option<u32>>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Publish the whole record, replacing any previous one.
    async fn put(&self, job: &Job) -> Result<()>;

    async fn get(&self, job_id: &str) -> Result<Option<Job>>;

    /// Most recent jobs first.
    async fn history(&self, limit: usize) -> Result<Vec<JobSummary>>;

    /// Drop terminal jobs idle for longer than `ttl`; returns how many.
    async fn evict_expired(&self, ttl: Duration) -> Result<usize>;
}

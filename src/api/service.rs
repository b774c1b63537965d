use std::collections::HashMap;
use std::sync::Arc;

use super::types::{ExpandBody, GenerateBody, PathResponse};
use crate::error::{Result, XkgError};
use crate::graph::{shortest_path, GraphResult};
use crate::jobs::{Job, JobSummary, Orchestrator, WorkerPool};

/// Transport-agnostic operations behind the HTTP routes and the CLIs.
pub struct GraphService {
    orchestrator: Arc<Orchestrator>,
    workers: WorkerPool,
    history_limit: usize,
}

impl GraphService {
    pub fn new(orchestrator: Arc<Orchestrator>, workers: WorkerPool, history_limit: usize) -> Self {
        Self {
            orchestrator,
            workers,
            history_limit,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Validate and queue a generation; returns the job id at once.
    pub async fn submit_generation(&self, body: GenerateBody) -> Result<String> {
        let request = body.into_request()?;
        self.workers.submit(request).await
    }

    pub async fn job(&self, job_id: &str) -> Result<Job> {
        self.orchestrator
            .job_store()
            .get(job_id)
            .await?
            .ok_or_else(|| XkgError::JobNotFound(job_id.to_string()))
    }

    pub async fn graph(&self, concept: &str, depth: Option<usize>, version: Option<u32>) -> Result<GraphResult> {
        let label = match version {
            Some(v) => format!("{} (version {})", concept.trim(), v),
            None => concept.trim().to_string(),
        };
        self.orchestrator
            .graph_store()
            .query(concept, depth, version)
            .await?
            .ok_or(XkgError::GraphNotFound(label))
    }

    pub async fn expand(&self, body: ExpandBody) -> Result<GraphResult> {
        let request = body.into_request()?;
        self.orchestrator.expand(request).await
    }

    pub async fn history(&self) -> Result<Vec<JobSummary>> {
        self.orchestrator.job_store().history(self.history_limit).await
    }

    /// Shortest undirected path between two node ids of a stored graph.
    pub async fn path(&self, concept: &str, from: &str, to: &str, version: Option<u32>) -> Result<PathResponse> {
        let graph = self.graph(concept, None, version).await?;
        for id in [from, to] {
            if graph.node(id).is_none() {
                return Err(XkgError::NodeNotFound(id.to_string()));
            }
        }

        let ids = shortest_path(&graph.edges, from, to).ok_or_else(|| {
            XkgError::NodeNotFound(format!("no path between {} and {}", from, to))
        })?;

        let nodes = ids.iter().filter_map(|id| graph.node(id).cloned()).collect();
        let mut edges = Vec::with_capacity(ids.len().saturating_sub(1));
        let mut by_pair: HashMap<(&str, &str), usize> = HashMap::new();
        for (idx, edge) in graph.edges.iter().enumerate() {
            by_pair.entry((edge.source.as_str(), edge.target.as_str())).or_insert(idx);
            by_pair.entry((edge.target.as_str(), edge.source.as_str())).or_insert(idx);
        }
        for pair in ids.windows(2) {
            if let Some(&idx) = by_pair.get(&(pair[0].as_str(), pair[1].as_str())) {
                edges.push(graph.edges[idx].clone());
            }
        }

        Ok(PathResponse {
            concept: graph.concept.clone(),
            version: graph.meta.version,
            nodes,
            edges,
        })
    }

    /// Drain the worker queue.
    pub async fn shutdown(self) {
        self.workers.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Domain;
    use crate::jobs::{JobStatus, OrchestratorSettings};
    use crate::pipeline::{Extractor, Planner, Retriever};
    use crate::sources::SeedCorpus;
    use crate::store::{MemoryGraphStore, MemoryJobStore};
    use std::time::Duration;

    fn service() -> GraphService {
        let orchestrator = Arc::new(Orchestrator::new(
            Planner::new(vec![Domain::new("Physics"), Domain::new("Computer Science")]),
            Retriever::new(Arc::new(SeedCorpus::new()), 10),
            Extractor::heuristic(),
            Arc::new(MemoryGraphStore::new()),
            Arc::new(MemoryJobStore::new()),
            OrchestratorSettings::default(),
        ));
        let workers = WorkerPool::start(orchestrator.clone(), 1, 8);
        GraphService::new(orchestrator, workers, 50)
    }

    async fn wait_for(service: &GraphService, job_id: &str) -> Job {
        for _ in 0..200 {
            let job = service.job(job_id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never finished", job_id);
    }

    fn generate(concept: &str) -> GenerateBody {
        GenerateBody {
            concept: concept.to_string(),
            domains: None,
            depth: 1,
            strict_check: true,
        }
    }

    #[tokio::test]
    async fn test_generate_then_query() {
        let service = service();
        let job_id = service.submit_generation(generate("Entropy")).await.unwrap();
        let job = wait_for(&service, &job_id).await;
        assert_eq!(job.status, JobStatus::Succeeded);

        let graph = service.graph("Entropy", None, None).await.unwrap();
        assert_eq!(graph.meta.version, 1);
        let shallow = service.graph("Entropy", Some(0), None).await.unwrap();
        assert_eq!(shallow.nodes.len(), 1);

        let history = service.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].job_id, job_id);
    }

    #[tokio::test]
    async fn test_not_found_and_invalid_input() {
        let service = service();
        assert!(matches!(service.job("nope").await, Err(XkgError::JobNotFound(_))));
        assert!(matches!(
            service.graph("Nothing", None, None).await,
            Err(XkgError::GraphNotFound(_))
        ));
        assert!(matches!(
            service.submit_generation(generate("   ")).await,
            Err(XkgError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_path_between_nodes() {
        let service = service();
        let job_id = service.submit_generation(generate("Entropy")).await.unwrap();
        wait_for(&service, &job_id).await;
        let graph = service.graph("Entropy", None, None).await.unwrap();
        let core = graph.core_node().unwrap().id.clone();
        let leaf = graph.edges[0].target.clone();

        let path = service.path("Entropy", &core, &leaf, None).await.unwrap();
        assert_eq!(path.nodes.first().map(|n| n.id.as_str()), Some(core.as_str()));
        assert_eq!(path.nodes.last().map(|n| n.id.as_str()), Some(leaf.as_str()));
        assert_eq!(path.edges.len(), path.nodes.len() - 1);

        assert!(matches!(
            service.path("Entropy", &core, "physics:missing", None).await,
            Err(XkgError::NodeNotFound(_))
        ));
    }
}

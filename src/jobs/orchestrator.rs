//! Drives one generation or expansion through every stage.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;

use super::tracker::JobTracker;
use super::{Job, JobKind};
use crate::config::Config;
use crate::error::{Result, XkgError};
use crate::graph::{AgentTrace, Domain, DomainTrace, GraphResult, Meta, Node, SubGraph, TraceStatus};
use crate::llm::GenerationClient;
use crate::pipeline::{
    merge, merge_into, CheckPolicy, Checker, Extractor, MergeOutcome, PlanRequest, Planner, QueryPlan, Retriever,
    Seed,
};
use crate::sources::{EvidenceSource, Passage};
use crate::store::{GraphStore, JobStore};

const PROGRESS_PLANNED: u8 = 10;
const PROGRESS_DOMAINS: u8 = 70;
const PROGRESS_MERGED: u8 = 90;
const PROGRESS_CHECKED: u8 = 95;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub concept: String,
    /// `None` uses the configured domains
    pub domains: Option<Vec<Domain>>,
    pub depth: u8,
    pub strict_check: bool,
}

impl GenerationRequest {
    pub fn new(concept: impl Into<String>) -> Self {
        Self {
            concept: concept.into(),
            domains: None,
            depth: 2,
            strict_check: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpandRequest {
    pub node_id: String,
    pub depth_increment: u8,
    /// Restrict the node lookup to this concept's graphs
    pub concept: Option<String>,
    pub strict_check: bool,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub domain_concurrency: usize,
    pub domain_timeout: Duration,
    pub trace_sample: usize,
    pub strict: CheckPolicy,
    pub relaxed: CheckPolicy,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            domain_concurrency: config.pipeline.domain_concurrency,
            domain_timeout: config.pipeline.domain_timeout(),
            trace_sample: config.pipeline.trace_sample,
            strict: config.check.strict_policy(),
            relaxed: config.check.relaxed_policy(),
        }
    }

    fn policy(&self, strict: bool) -> CheckPolicy {
        if strict {
            self.strict
        } else {
            self.relaxed
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            domain_concurrency: 4,
            domain_timeout: Duration::from_secs(60),
            trace_sample: 3,
            strict: CheckPolicy::strict(),
            relaxed: CheckPolicy::relaxed(),
        }
    }
}

/// What one domain task produced.
struct DomainOutcome {
    domain: Domain,
    queries: Vec<String>,
    passages: Vec<Passage>,
    failures: Vec<String>,
    result: Result<SubGraph>,
    elapsed: Duration,
}

impl DomainOutcome {
    fn is_usable(&self) -> bool {
        matches!(&self.result, Ok(graph) if !graph.is_empty())
    }

    fn trace(&self, sample: usize) -> DomainTrace {
        let error = match &self.result {
            Ok(graph) if graph.is_empty() => Some("extraction produced no nodes".to_string()),
            Ok(_) => None,
            Err(e) => Some(e.to_string()),
        };
        DomainTrace {
            queries: self.queries.clone(),
            passages: self.passages.iter().take(sample).map(Passage::evidence).collect(),
            passage_count: self.passages.len(),
            status: if error.is_none() { TraceStatus::Ok } else { TraceStatus::Failed },
            error,
        }
    }
}

async fn run_domain(
    retriever: Retriever,
    extractor: Extractor,
    seed: Seed,
    domain: Domain,
    queries: Vec<String>,
    timeout: Duration,
) -> DomainOutcome {
    let started = Instant::now();
    let mut passages = Vec::new();
    let mut failures = Vec::new();

    let stage = async {
        let retrieval = retriever.retrieve(&domain, &queries).await?;
        passages = retrieval.passages;
        failures = retrieval.failures;
        extractor.extract(&seed, &domain, &passages).await
    };
    let result = match tokio::time::timeout(timeout, stage).await {
        Ok(result) => result,
        Err(_) => Err(XkgError::Retrieval {
            domain: domain.to_string(),
            reason: format!("timed out after {}s", timeout.as_secs_f64()),
        }),
    };

    DomainOutcome {
        domain,
        queries,
        passages,
        failures,
        result,
        elapsed: started.elapsed(),
    }
}

pub struct Orchestrator {
    planner: Planner,
    retriever: Retriever,
    extractor: Extractor,
    graph_store: Arc<dyn GraphStore>,
    job_store: Arc<dyn JobStore>,
    settings: OrchestratorSettings,
    /// Held from version allocation through persist, one per concept
    concept_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        planner: Planner,
        retriever: Retriever,
        extractor: Extractor,
        graph_store: Arc<dyn GraphStore>,
        job_store: Arc<dyn JobStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            planner,
            retriever,
            extractor,
            graph_store,
            job_store,
            settings,
            concept_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wire the stages from configuration; `generator` switches planning
    /// and extraction to the model.
    pub fn from_config(
        config: &Config,
        source: Arc<dyn EvidenceSource>,
        generator: Option<Arc<dyn GenerationClient>>,
        graph_store: Arc<dyn GraphStore>,
        job_store: Arc<dyn JobStore>,
    ) -> Self {
        let domains = config.pipeline.domains.iter().map(Domain::new).collect();
        let (planner, extractor) = match generator {
            Some(generator) => (
                Planner::new(domains).with_generator(generator.clone()),
                Extractor::with_model(generator),
            ),
            None => (Planner::new(domains), Extractor::heuristic()),
        };
        let retriever = Retriever::new(source, config.retrieval.max_passages_per_domain);
        Self::new(
            planner,
            retriever,
            extractor,
            graph_store,
            job_store,
            OrchestratorSettings::from_config(config),
        )
    }

    pub fn graph_store(&self) -> &Arc<dyn GraphStore> {
        &self.graph_store
    }

    pub fn job_store(&self) -> &Arc<dyn JobStore> {
        &self.job_store
    }

    fn concept_lock(&self, concept: &str) -> Arc<AsyncMutex<()>> {
        self.concept_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(concept.to_string())
            .or_default()
            .clone()
    }

    /// Create and publish a queued job.
    pub async fn create_job(&self, kind: JobKind, concept: &str) -> Result<Job> {
        let job = Job::new(kind, concept.trim());
        self.job_store.put(&job).await?;
        Ok(job)
    }

    /// Create a job and run it to completion on the current task.
    pub async fn generate(&self, request: GenerationRequest) -> Result<Job> {
        let job = self.create_job(JobKind::Generate, &request.concept).await?;
        self.run_generation(job, request).await
    }

    /// Run a queued generation job to a terminal state.
    ///
    /// Pipeline failures end up in the job record; the returned error is
    /// reserved for the job store itself failing.
    pub async fn run_generation(&self, job: Job, request: GenerationRequest) -> Result<Job> {
        let mut tracker = JobTracker::new(job, self.job_store.clone());
        tracker.start().await?;

        match self.generation_pipeline(&mut tracker, &request).await {
            Ok(graph) => tracker.succeed(graph).await?,
            Err(e) => tracker.fail(failure_message(&e)).await?,
        }
        Ok(tracker.into_job())
    }

    async fn generation_pipeline(&self, tracker: &mut JobTracker, request: &GenerationRequest) -> Result<GraphResult> {
        let concept = request.concept.trim().to_string();
        let plan = self
            .planner
            .plan(&PlanRequest {
                concept: concept.clone(),
                domains: request.domains.clone(),
                depth: request.depth,
                include_core: true,
            })
            .await?;
        tracker
            .step(
                format!(
                    "[Planner] '{}' depth {}: {} domains, {} queries ({})",
                    concept,
                    request.depth,
                    plan.entries.len(),
                    plan.total_queries(),
                    plan.domains().map(Domain::as_str).collect::<Vec<_>>().join(", ")
                ),
                PROGRESS_PLANNED,
            )
            .await?;

        let outcomes = self.fan_out(tracker, &Seed::concept(&concept), &plan).await?;
        let (parts, trace) = self.collect(tracker, &outcomes).await?;

        let merged = merge(&concept, parts);
        self.finish(tracker, &concept, merged, trace, request.strict_check).await
    }

    /// Grow an existing graph around one of its nodes.
    ///
    /// Runs synchronously but is recorded as an `expand` job; returns the
    /// newly persisted version.
    pub async fn expand(&self, request: ExpandRequest) -> Result<GraphResult> {
        let location = self
            .graph_store
            .find_node(&request.node_id, request.concept.as_deref())
            .await?
            .ok_or_else(|| XkgError::NodeNotFound(request.node_id.clone()))?;
        let existing = self
            .graph_store
            .query(&location.concept, None, None)
            .await?
            .ok_or_else(|| XkgError::GraphNotFound(location.concept.clone()))?;

        let job = self.create_job(JobKind::Expand, &location.concept).await?;
        let mut tracker = JobTracker::new(job, self.job_store.clone());
        tracker.start().await?;

        match self.expand_pipeline(&mut tracker, &request, &location.node, existing).await {
            Ok(graph) => {
                tracker.succeed(graph.clone()).await?;
                Ok(graph)
            }
            Err(e) => {
                tracker.fail(failure_message(&e)).await?;
                Err(e)
            }
        }
    }

    async fn expand_pipeline(
        &self,
        tracker: &mut JobTracker,
        request: &ExpandRequest,
        node: &Node,
        existing: GraphResult,
    ) -> Result<GraphResult> {
        let domains = if node.domain.is_structural() {
            None
        } else {
            Some(vec![node.domain.clone()])
        };
        let depth = 1 + request.depth_increment;
        let plan = self
            .planner
            .plan(&PlanRequest {
                concept: node.name.clone(),
                domains,
                depth,
                include_core: false,
            })
            .await?;
        tracker
            .step(
                format!(
                    "[Planner] expanding '{}' ({}) in {} domains, depth {}",
                    node.name,
                    node.id,
                    plan.entries.len(),
                    depth
                ),
                PROGRESS_PLANNED,
            )
            .await?;

        let outcomes = self.fan_out(tracker, &Seed::anchor(node), &plan).await?;
        let (parts, trace) = self.collect(tracker, &outcomes).await?;

        let merged = merge_into(&existing, parts);
        self.finish(tracker, &existing.concept, merged, trace, request.strict_check)
            .await
    }

    /// Run every planned domain concurrently, bounded by the semaphore and
    /// the per-domain timeout. Outcomes come back in plan order.
    async fn fan_out(&self, tracker: &mut JobTracker, seed: &Seed, plan: &QueryPlan) -> Result<Vec<DomainOutcome>> {
        let semaphore = Arc::new(Semaphore::new(self.settings.domain_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for entry in &plan.entries {
            let semaphore = semaphore.clone();
            let retriever = self.retriever.clone();
            let extractor = self.extractor.clone();
            let seed = seed.clone();
            let domain = entry.domain.clone();
            let queries = entry.queries.clone();
            let timeout = self.settings.domain_timeout;

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                run_domain(retriever, extractor, seed, domain, queries, timeout).await
            });
        }

        let total = plan.entries.len().max(1);
        let mut outcomes: Vec<DomainOutcome> = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    log::debug!("[Domain] {} finished in {:?}", outcome.domain, outcome.elapsed);
                    outcomes.push(outcome);
                }
                Err(e) => log::error!("[Domain] task aborted: {}", e),
            }
            let done = outcomes.len().min(total);
            let progress = PROGRESS_PLANNED as usize + PROGRESS_DOMAINS as usize * done / total;
            tracker.progress(progress as u8).await?;
        }

        // domains whose task died never reported back
        for entry in &plan.entries {
            if !outcomes.iter().any(|o| o.domain == entry.domain) {
                outcomes.push(DomainOutcome {
                    domain: entry.domain.clone(),
                    queries: entry.queries.clone(),
                    passages: Vec::new(),
                    failures: Vec::new(),
                    result: Err(XkgError::Extraction {
                        domain: entry.domain.to_string(),
                        reason: "domain task aborted".to_string(),
                    }),
                    elapsed: Duration::ZERO,
                });
            }
        }
        outcomes.sort_by_key(|o| plan.entries.iter().position(|e| e.domain == o.domain));
        Ok(outcomes)
    }

    /// Log per-domain results and keep the usable subgraphs.
    ///
    /// Fails only when no domain produced anything usable.
    async fn collect(&self, tracker: &mut JobTracker, outcomes: &[DomainOutcome]) -> Result<(Vec<SubGraph>, AgentTrace)> {
        let mut parts = Vec::new();
        let mut trace = AgentTrace::new();
        let mut failed: Vec<String> = Vec::new();

        for outcome in outcomes {
            trace.insert(outcome.domain.to_string(), outcome.trace(self.settings.trace_sample));
            match &outcome.result {
                Ok(graph) if !graph.is_empty() => {
                    tracker
                        .log(format!(
                            "[Retrieve] {}: {} passages, {} failed queries",
                            outcome.domain,
                            outcome.passages.len(),
                            outcome.failures.len()
                        ))
                        .await?;
                    tracker
                        .log(format!(
                            "[Extract] {}: {} nodes, {} edges",
                            outcome.domain,
                            graph.nodes.len(),
                            graph.edges.len()
                        ))
                        .await?;
                }
                _ => {
                    let reason = outcome
                        .trace(0)
                        .error
                        .unwrap_or_else(|| "unknown failure".to_string());
                    tracker
                        .log(format!("[Domain] {} failed: {}", outcome.domain, reason))
                        .await?;
                    failed.push(outcome.domain.to_string());
                }
            }
        }

        let usable = outcomes.iter().filter(|o| o.is_usable()).count();
        let failed_note = if failed.is_empty() {
            String::new()
        } else {
            format!("; failed: {}", failed.join(", "))
        };
        tracker
            .log(format!("[Summary] {}/{} domains succeeded{}", usable, outcomes.len(), failed_note))
            .await?;

        if usable == 0 {
            return Err(XkgError::Retrieval {
                domain: "every domain".to_string(),
                reason: format!("no usable evidence ({})", failed.join(", ")),
            });
        }
        for outcome in outcomes {
            if let Ok(graph) = &outcome.result {
                if !graph.is_empty() {
                    parts.push(graph.clone());
                }
            }
        }
        Ok((parts, trace))
    }

    /// Check, verify and persist a merged graph as the concept's next
    /// version.
    ///
    /// The version is read and written under the concept lock, so jobs for
    /// the same concept never persist the same version.
    async fn finish(
        &self,
        tracker: &mut JobTracker,
        concept: &str,
        merged: MergeOutcome,
        trace: AgentTrace,
        strict_check: bool,
    ) -> Result<GraphResult> {
        let lock = self.concept_lock(concept);
        let _guard = lock.lock().await;
        let version = self.graph_store.latest_version(concept).await?.map_or(1, |v| v + 1);

        let MergeOutcome { nodes, edges, stats } = merged;
        tracker
            .step(
                format!(
                    "[Merge] {} nodes, {} edges ({} nodes merged, {} duplicate edges, {} bridges)",
                    nodes.len(),
                    edges.len(),
                    stats.nodes_merged,
                    stats.duplicates_flagged,
                    stats.bridges_derived
                ),
                PROGRESS_MERGED,
            )
            .await?;

        let mut graph = GraphResult {
            concept: concept.to_string(),
            nodes,
            edges,
            meta: Meta {
                generated_at: Utc::now(),
                version,
                checker_summary: Default::default(),
                agent_trace: Some(trace),
            },
        };

        let checker = Checker::new(self.settings.policy(strict_check));
        let mut summary = checker.check(&mut graph);
        stats.apply_to(&mut summary);
        graph.meta.checker_summary = summary.clone();
        tracker
            .step(
                format!(
                    "[Check] {} mode: passed={} failed={} downgraded={} conflicts={} dropped={}",
                    if strict_check { "strict" } else { "relaxed" },
                    summary.passed,
                    summary.failed,
                    summary.edges_downgraded,
                    summary.conflicts_flagged,
                    summary.edges_dropped
                ),
                PROGRESS_CHECKED,
            )
            .await?;

        let violations = graph.integrity_violations();
        if !violations.is_empty() {
            return Err(XkgError::SchemaRepair(format!(
                "merged graph failed integrity checks: {}",
                violations.join("; ")
            )));
        }

        self.graph_store.upsert(&graph).await?;
        tracker
            .log(format!("[Persist] '{}' version {}", graph.concept, graph.meta.version))
            .await?;
        Ok(graph)
    }
}

fn failure_message(error: &XkgError) -> String {
    match error {
        XkgError::Planning(reason) => format!("Planning failed: {}", reason),
        XkgError::Retrieval { domain, reason } if domain == "every domain" => {
            format!("All domains failed: {}", reason)
        }
        XkgError::SchemaRepair(reason) => format!("Check failed: {}", reason),
        XkgError::Persistence(reason) => format!("Persistence failed: {}", reason),
        XkgError::Database(e) => format!("Persistence failed: {}", e),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeFlag, Relation};
    use crate::jobs::JobStatus;
    use crate::llm::MockGenerator;
    use crate::db::Db;
    use crate::sources::{MockSource, SeedCorpus};
    use crate::store::{MemoryGraphStore, MemoryJobStore, SqliteGraphStore};
    use std::path::Path;
    use tempfile::TempDir;

    fn orchestrator(source: impl EvidenceSource + 'static) -> Orchestrator {
        orchestrator_with(Arc::new(source), None, OrchestratorSettings::default())
    }

    fn orchestrator_with(
        source: Arc<dyn EvidenceSource>,
        generator: Option<Arc<dyn GenerationClient>>,
        settings: OrchestratorSettings,
    ) -> Orchestrator {
        orchestrator_on(source, generator, settings, Arc::new(MemoryGraphStore::new()))
    }

    fn orchestrator_on(
        source: Arc<dyn EvidenceSource>,
        generator: Option<Arc<dyn GenerationClient>>,
        settings: OrchestratorSettings,
        graph_store: Arc<dyn GraphStore>,
    ) -> Orchestrator {
        let domains = crate::config::default_domains().iter().map(Domain::new).collect();
        let (planner, extractor) = match generator {
            Some(g) => (Planner::new(domains).with_generator(g.clone()), Extractor::with_model(g)),
            None => (Planner::new(domains), Extractor::heuristic()),
        };
        Orchestrator::new(
            planner,
            Retriever::new(source, 10),
            extractor,
            graph_store,
            Arc::new(MemoryJobStore::new()),
            settings,
        )
    }

    async fn sqlite_graph_store(dir: &TempDir) -> Arc<dyn GraphStore> {
        let db = Db::new(dir.path().join("xkg.db"));
        db.migrate(&Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"))
            .await
            .unwrap();
        Arc::new(SqliteGraphStore::new(db))
    }

    fn request(concept: &str, domains: &[&str]) -> GenerationRequest {
        GenerationRequest {
            concept: concept.to_string(),
            domains: Some(domains.iter().map(|d| Domain::new(*d)).collect()),
            depth: 1,
            strict_check: true,
        }
    }

    #[tokio::test]
    async fn test_seed_corpus_generation_succeeds() {
        let orch = orchestrator(SeedCorpus::new());
        let job = orch.generate(GenerationRequest::new("Entropy")).await.unwrap();

        assert_eq!(job.status, JobStatus::Succeeded, "{:?}", job.logs);
        assert_eq!(job.progress, 100);
        let graph = job.result.unwrap();
        assert_eq!(graph.meta.version, 1);
        assert!(graph.integrity_violations().is_empty());
        assert_eq!(graph.core_node().map(|n| n.name.as_str()), Some("Entropy"));
        assert!(graph.nodes.len() > 5);
        assert!(graph.meta.checker_summary.passed > 0);
        assert_eq!(graph.meta.agent_trace.as_ref().map(|t| t.len()), Some(6));

        let stored = orch.graph_store().query("Entropy", None, None).await.unwrap().unwrap();
        assert_eq!(stored, graph);
        let published = orch.job_store().get(&job.job_id).await.unwrap().unwrap();
        assert_eq!(published.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_logs_follow_stage_order() {
        let orch = orchestrator(SeedCorpus::new());
        let job = orch.generate(request("Entropy", &["Physics"])).await.unwrap();
        let tags: Vec<&str> = job
            .logs
            .iter()
            .filter_map(|l| l.split(']').next())
            .map(|t| t.trim_start_matches('['))
            .collect();
        let first = |tag: &str| tags.iter().position(|t| *t == tag).unwrap();
        assert!(first("Planner") < first("Retrieve"));
        assert!(first("Extract") < first("Summary"));
        assert!(first("Summary") < first("Merge"));
        assert!(first("Merge") < first("Check"));
        assert!(first("Check") < first("Persist"));
    }

    #[tokio::test]
    async fn test_regeneration_bumps_version() {
        let orch = orchestrator(SeedCorpus::new());
        orch.generate(request("Entropy", &["Physics"])).await.unwrap();
        let second = orch.generate(request("Entropy", &["Physics"])).await.unwrap();
        assert_eq!(second.result.unwrap().meta.version, 2);
        assert_eq!(orch.graph_store().latest_version("Entropy").await.unwrap(), Some(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_generations_get_distinct_versions() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new()
            .with_passage("Physics", "Heat", "Entropy governs heat flow.")
            .with_delay(Duration::from_millis(50));
        let orch = orchestrator_on(
            Arc::new(source),
            None,
            OrchestratorSettings::default(),
            sqlite_graph_store(&dir).await,
        );

        let mut relaxed = request("Entropy", &["Physics"]);
        relaxed.strict_check = false;
        let (a, b) = tokio::join!(orch.generate(request("Entropy", &["Physics"])), orch.generate(relaxed));
        let a = a.unwrap().result.unwrap();
        let b = b.unwrap().result.unwrap();

        assert_ne!(a.meta.version, b.meta.version);
        assert_eq!(orch.graph_store().latest_version("Entropy").await.unwrap(), Some(2));
        for graph in [a, b] {
            let stored = orch
                .graph_store()
                .query("Entropy", None, Some(graph.meta.version))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(stored.nodes, graph.nodes);
            assert_eq!(stored.edges, graph.edges);
            assert_eq!(stored.meta.checker_summary, graph.meta.checker_summary);
        }
    }

    #[tokio::test]
    async fn test_computer_science_passage_yields_checked_edge() {
        let source = MockSource::new().with_passage(
            "Computer Science",
            "Information",
            "Entropy measures the average information content of a message.",
        );
        let orch = orchestrator(source);
        let job = orch.generate(request("Entropy", &["Computer Science"])).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded, "{:?}", job.logs);

        let graph = job.result.unwrap();
        let core = graph.core_node().unwrap();
        let information = graph.nodes.iter().find(|n| n.name.eq_ignore_ascii_case("information")).unwrap();
        assert_eq!(information.domain, Domain::new("Computer Science"));

        let edge = graph
            .edges
            .iter()
            .find(|e| {
                (e.source == core.id && e.target == information.id)
                    || (e.source == information.id && e.target == core.id)
            })
            .unwrap();
        assert!(edge.checked, "{:?}", edge);
    }

    #[tokio::test]
    async fn test_partial_domain_failure_still_succeeds() {
        let source = MockSource::new()
            .with_passage("Physics", "Heat", "Entropy governs heat flow; the second law explains it.")
            .fail_domain("Biology");
        let orch = orchestrator(source);
        let job = orch
            .generate(request("Entropy", &["Physics", "Biology"]))
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(job.logs.iter().any(|l| l.starts_with("[Domain] Biology failed")));
        assert!(job.logs.iter().any(|l| l.contains("failed: Biology")));
        let trace = job.result.unwrap().meta.agent_trace.unwrap();
        assert_eq!(trace["Biology"].status, TraceStatus::Failed);
        assert_eq!(trace["Physics"].status, TraceStatus::Ok);
    }

    #[tokio::test]
    async fn test_every_domain_failing_fails_the_job() {
        let orch = orchestrator(MockSource::new().fail_domain("Physics").fail_domain("Core"));
        let job = orch.generate(request("Entropy", &["Physics"])).await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result.is_none());
        assert!(job.message.as_deref().unwrap().starts_with("All domains failed"));
        assert!(orch.graph_store().latest_version("Entropy").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_planning_failure_fails_the_job() {
        let orch = orchestrator(SeedCorpus::new());
        let mut req = request("Entropy", &[]);
        req.domains = Some(vec![]);
        let job = orch.generate(req).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.message.as_deref().unwrap().starts_with("Planning failed"));
    }

    #[tokio::test]
    async fn test_domain_timeout_counts_as_failure() {
        let settings = OrchestratorSettings {
            domain_timeout: Duration::from_millis(50),
            ..OrchestratorSettings::default()
        };
        let slow = MockSource::new()
            .with_passage("Physics", "Heat", "Entropy and heat.")
            .with_delay(Duration::from_millis(500));
        let orch = orchestrator_with(Arc::new(slow), None, settings);
        let job = orch.generate(request("Entropy", &["Physics"])).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.logs.iter().any(|l| l.contains("timed out")));
    }

    #[tokio::test]
    async fn test_model_conflict_is_flagged_not_dropped() {
        let physics = r#"{"nodes": [
                {"id": "s", "name": "Entropy", "domain": "Core", "confidence": 0.9},
                {"id": "a", "name": "Disorder", "domain": "Physics", "confidence": 0.8}],
            "edges": [
                {"source": "s", "target": "a", "relation": "is_a", "explanation": "x",
                 "evidence": {"title": "T", "snippet": "Entropy is a measure of disorder."}, "confidence": 0.8},
                {"source": "a", "target": "s", "relation": "is_a", "explanation": "y",
                 "evidence": {"title": "T", "snippet": "Entropy is a measure of disorder."}, "confidence": 0.7}]}"#;
        let core = r#"{"nodes": [{"id": "s", "name": "Entropy", "domain": "Core", "confidence": 0.9}], "edges": []}"#;
        let generator = MockGenerator::new()
            .when("\"domain\":\"Physics\"", physics)
            .when("\"domain\":\"Core\"", core)
            .respond(r#"{"domains": {}}"#);
        let source = MockSource::new()
            .with_passage("Physics", "T", "Entropy is a measure of disorder.")
            .with_passage("Core", "Entropy", "Entropy is a measure of disorder.");
        let orch = orchestrator_with(
            Arc::new(source),
            Some(Arc::new(generator)),
            OrchestratorSettings::default(),
        );

        let job = orch.generate(request("Entropy", &["Physics"])).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded, "{:?}", job.logs);
        let graph = job.result.unwrap();
        let is_a: Vec<_> = graph.edges.iter().filter(|e| e.relation == Relation::IsA).collect();
        assert_eq!(is_a.len(), 2);
        assert!(is_a.iter().all(|e| e.has_flag(EdgeFlag::Conflict)));
        assert_eq!(graph.meta.checker_summary.conflicts_flagged, 2);
    }

    #[tokio::test]
    async fn test_expand_adds_version_and_keeps_ids() {
        let orch = orchestrator(SeedCorpus::new());
        let first = orch
            .generate(request("Entropy", &["Physics", "Computer Science"]))
            .await
            .unwrap()
            .result
            .unwrap();
        let anchor = first
            .nodes
            .iter()
            .find(|n| !n.domain.is_structural())
            .cloned()
            .unwrap();

        let expanded = orch
            .expand(ExpandRequest {
                node_id: anchor.id.clone(),
                depth_increment: 1,
                concept: None,
                strict_check: false,
            })
            .await
            .unwrap();

        assert_eq!(expanded.meta.version, 2);
        assert!(expanded.integrity_violations().is_empty());
        for node in &first.nodes {
            assert!(expanded.node(&node.id).is_some(), "lost node {}", node.id);
        }
        assert!(expanded.nodes.len() >= first.nodes.len());
        let history = orch.job_store().history(10).await.unwrap();
        assert_eq!(history[0].kind, JobKind::Expand);
    }

    #[tokio::test]
    async fn test_expand_unknown_node() {
        let orch = orchestrator(SeedCorpus::new());
        let err = orch
            .expand(ExpandRequest {
                node_id: "physics:nothing".to_string(),
                depth_increment: 1,
                concept: None,
                strict_check: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, XkgError::NodeNotFound(_)));
    }
}

//! Wiring shared by the server and the command-line tools.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::db::Db;
use crate::error::Result;
use crate::jobs::Orchestrator;
use crate::llm::build_client;
use crate::sources::build_source;
use crate::store::{GraphStore, JobStore, MemoryGraphStore, MemoryJobStore, SqliteGraphStore, SqliteJobStore};

/// Open the database, apply migrations and return both stores.
pub async fn open_stores(config: &Config) -> Result<(Db, Arc<dyn GraphStore>, Arc<dyn JobStore>)> {
    let db = Db::new(config.db_path());
    db.migrate(config.migrations_dir()).await?;
    log::info!("Database ready at {}", config.db_path().display());
    Ok((
        db.clone(),
        Arc::new(SqliteGraphStore::new(db.clone())),
        Arc::new(SqliteJobStore::new(db)),
    ))
}

/// Orchestrator over the given stores with the configured source and model.
pub fn build_orchestrator(
    config: &Config,
    graph_store: Arc<dyn GraphStore>,
    job_store: Arc<dyn JobStore>,
) -> Result<Arc<Orchestrator>> {
    let source = build_source(&config.retrieval)?;
    let generator = build_client(&config.llm)?;
    match &generator {
        Some(client) => log::info!("Planning and extraction use model {}", client.name()),
        None => log::info!("No generation model configured; using offline heuristics"),
    }
    log::info!("Evidence source: {}", source.name());
    Ok(Arc::new(Orchestrator::from_config(
        config,
        source,
        generator,
        graph_store,
        job_store,
    )))
}

/// Orchestrator that keeps everything in memory (nothing is persisted).
pub fn build_ephemeral_orchestrator(config: &Config) -> Result<Arc<Orchestrator>> {
    build_orchestrator(
        config,
        Arc::new(MemoryGraphStore::new()),
        Arc::new(MemoryJobStore::new()),
    )
}

/// Periodically drop terminal jobs older than the configured TTL.
pub fn spawn_ttl_sweeper(job_store: Arc<dyn JobStore>, ttl: Duration, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            match job_store.evict_expired(ttl).await {
                Ok(0) => {}
                Ok(n) => log::info!("Evicted {} expired job records", n),
                Err(e) => log::warn!("Job eviction failed: {}", e),
            }
        }
    })
}

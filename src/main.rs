use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use xkg::api::{self, GraphService};
use xkg::app;
use xkg::db::{migrate, Db};
use xkg::jobs::WorkerPool;
use xkg::{Config, XkgError};

const EXPECTED_TABLES: [&str; 5] = ["graph_edges", "graph_nodes", "graphs", "jobs", "schema_migrations"];

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("verify");

    match command {
        "serve" => run_server().await?,
        "verify" => run_schema_verification().await?,
        other => {
            log::warn!("Unknown command '{}', running schema verification", other);
            run_schema_verification().await?;
        }
    }

    Ok(())
}

/// Start the worker pool, the job TTL sweeper and the HTTP API.
async fn run_server() -> Result<()> {
    log::info!("Starting xkg server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    let (_db, graph_store, job_store) = app::open_stores(&config).await?;
    let orchestrator = app::build_orchestrator(&config, graph_store, job_store.clone())?;

    let workers = WorkerPool::start(
        orchestrator.clone(),
        config.pipeline.worker_pool_size,
        config.pipeline.worker_pool_size * 16,
    );
    log::info!(
        "Worker pool: {} workers, domains: {}",
        config.pipeline.worker_pool_size,
        config.pipeline.domains.join(", ")
    );

    let sweeper = app::spawn_ttl_sweeper(
        job_store,
        Duration::from_secs(config.jobs.ttl_secs),
        Duration::from_secs(config.jobs.sweep_interval_secs),
    );

    let service = Arc::new(GraphService::new(orchestrator, workers, config.jobs.history_limit));
    let outcome = api::serve(service, &config.http_server).await;
    sweeper.abort();
    outcome?;

    Ok(())
}

async fn run_schema_verification() -> Result<()> {
    log::info!("Starting xkg v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    log::info!("Configuration loaded successfully");
    log::info!("Database path: {}", config.db_path().display());
    log::info!("Generation model: {:?} ({})", config.llm.provider, config.llm.model);

    let db = Db::new(config.db_path());
    db.migrate(config.migrations_dir()).await?;
    log::info!("Database initialized successfully");

    verify_database_schema(&db).await?;
    Ok(())
}

async fn verify_database_schema(db: &Db) -> Result<()> {
    db.with_connection(|conn| {
        let tables = migrate::list_tables(conn)?;
        let missing: Vec<&str> = EXPECTED_TABLES
            .iter()
            .copied()
            .filter(|t| !tables.iter().any(|have| have == t))
            .collect();
        if !missing.is_empty() {
            return Err(XkgError::Config(format!("Missing tables: {}", missing.join(", "))));
        }

        let applied = migrate::get_applied_migrations(conn)?;
        log::debug!("{} migrations applied", applied.len());

        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            return Err(XkgError::Config(format!("Journal mode is not WAL: {}", journal_mode)));
        }

        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if integrity != "ok" {
            return Err(XkgError::Config(format!("Database integrity check failed: {}", integrity)));
        }
        Ok(())
    })
    .await?;

    log::info!("Database schema verification complete");
    Ok(())
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use xkg::api::GraphService;
use xkg::app;
use xkg::jobs::WorkerPool;
use xkg::Config;

#[derive(Parser, Debug)]
#[command(name = "inspect")]
#[command(about = "Read persisted graphs and job records")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Pretty-print the JSON output
    #[arg(long, global = true)]
    pretty: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a stored graph (latest version unless --version is given)
    Graph {
        concept: String,
        #[arg(long)]
        depth: Option<usize>,
        #[arg(long)]
        version: Option<u32>,
    },
    /// Print a job record
    Job { job_id: String },
    /// Shortest path between two node ids of a stored graph
    Path {
        concept: String,
        from: String,
        to: String,
        #[arg(long)]
        version: Option<u32>,
    },
    /// Most recent jobs, newest first
    History,
}

fn print<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", rendered);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "warn")).init();

    let args = Args::parse();
    let config = Config::load()?;
    let (_db, graph_store, job_store) = app::open_stores(&config).await?;
    let orchestrator = app::build_orchestrator(&config, graph_store, job_store)?;
    // read-only: the pool never receives work
    let workers = WorkerPool::start(orchestrator.clone(), 1, 1);
    let service = Arc::new(GraphService::new(orchestrator, workers, config.jobs.history_limit));

    match args.command {
        Command::Graph { concept, depth, version } => {
            print(&service.graph(&concept, depth, version).await?, args.pretty)?
        }
        Command::Job { job_id } => print(&service.job(&job_id).await?, args.pretty)?,
        Command::Path { concept, from, to, version } => {
            print(&service.path(&concept, &from, &to, version).await?, args.pretty)?
        }
        Command::History => {
            let history = service.history().await?;
            if history.is_empty() {
                log::warn!("No jobs recorded yet");
            }
            print(&history, args.pretty)?
        }
    }

    Ok(())
}

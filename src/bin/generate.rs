use anyhow::Result;
use clap::Parser;
use std::time::Instant;
use xkg::api::GenerateBody;
use xkg::app;
use xkg::jobs::JobStatus;
use xkg::Config;

#[derive(Parser, Debug)]
#[command(name = "generate")]
#[command(about = "Run one cross-domain graph generation in the foreground and print the result")]
struct Args {
    /// Seed concept, e.g. "Entropy"
    concept: String,

    /// Domain to explore (repeatable); defaults to pipeline.domains
    #[arg(short, long = "domain")]
    domains: Vec<String>,

    /// Traversal depth (1-3)
    #[arg(long, default_value_t = 2)]
    depth: u8,

    /// Use the relaxed check policy instead of strict
    #[arg(long)]
    relaxed: bool,

    /// Keep graphs and jobs in memory instead of the configured database
    #[arg(long)]
    memory: bool,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();
    let config = Config::load()?;

    let request = GenerateBody {
        concept: args.concept,
        domains: (!args.domains.is_empty()).then_some(args.domains),
        depth: args.depth,
        strict_check: !args.relaxed,
    }
    .into_request()?;

    let orchestrator = if args.memory {
        app::build_ephemeral_orchestrator(&config)?
    } else {
        let (_db, graph_store, job_store) = app::open_stores(&config).await?;
        app::build_orchestrator(&config, graph_store, job_store)?
    };

    let start = Instant::now();
    let job = orchestrator.generate(request).await?;
    log::info!(
        "Job {} finished as {} in {:.2}s",
        job.job_id,
        job.status.as_str(),
        start.elapsed().as_secs_f64()
    );
    for line in &job.logs {
        log::debug!("{}", line);
    }

    match (&job.status, &job.result) {
        (JobStatus::Succeeded, Some(graph)) => {
            let rendered = if args.pretty {
                serde_json::to_string_pretty(graph)?
            } else {
                serde_json::to_string(graph)?
            };
            println!("{}", rendered);
            Ok(())
        }
        _ => {
            let message = job.message.as_deref().unwrap_or("generation failed");
            eprintln!("{}", message);
            std::process::exit(1);
        }
    }
}

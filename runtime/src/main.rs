use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use toolbus::config::{RuntimeConfig, WorkersConfig};
use toolbus::executor::{BatchCall, ParallelExecutor};
use toolbus::supervisor::Supervisor;

#[derive(Parser)]
#[command(name = "toolbus")]
#[command(about = "Run tool calls against JSON-RPC worker subprocesses")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the worker roster (defaults to the nearest .toolbus.json)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the merged tool catalog
    Tools {
        /// Only list tools from a specific worker
        #[arg(long)]
        worker: Option<String>,
    },
    /// Call a tool
    Call {
        /// Tool name
        tool: String,
        /// Arguments as JSON
        #[arg(long, short)]
        args: Option<String>,
        /// Pin the call to a specific worker
        #[arg(long)]
        worker: Option<String>,
    },
    /// Call several tools in parallel; each spec is TOOL or TOOL=ARGS_JSON
    Batch {
        calls: Vec<String>,
    },
    /// Check that a worker answers a ping
    Ping {
        worker: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let roster = match &cli.config {
        Some(path) => WorkersConfig::load_from_path(path)?,
        None => WorkersConfig::load()?,
    };
    let runtime = RuntimeConfig::load()?;

    let supervisor = Supervisor::from_config(&runtime);
    let failures = supervisor.start_workers(roster.worker_configs()).await;
    for (name, err) in &failures {
        eprintln!("warning: worker '{name}' failed to start: {err}");
    }

    let outcome = run(&cli.command, &supervisor, &runtime).await;
    supervisor.stop_workers().await;
    outcome
}

async fn run(
    command: &Commands,
    supervisor: &Supervisor,
    runtime: &RuntimeConfig,
) -> Result<()> {
    match command {
        Commands::Tools { worker } => {
            for registered in supervisor.list_tools().await {
                if let Some(only) = worker {
                    if &registered.worker != only {
                        continue;
                    }
                }
                match &registered.tool.description {
                    Some(description) => println!(
                        "{}/{} - {}",
                        registered.worker, registered.tool.name, description
                    ),
                    None => println!("{}/{}", registered.worker, registered.tool.name),
                }
            }
        }
        Commands::Call { tool, args, worker } => {
            let arguments = parse_args(args.as_deref())?;
            let result = match worker {
                Some(worker) => supervisor.call_tool_on(worker, tool, arguments).await,
                None => supervisor.call_tool(tool, arguments).await,
            };
            if result.is_error {
                eprintln!("error: {}", result.text_content());
                std::process::exit(1);
            }
            println!("{}", result.text_content());
        }
        Commands::Batch { calls } => {
            let batch = calls
                .iter()
                .map(|spec| parse_batch_spec(spec))
                .collect::<Result<Vec<_>>>()?;
            let executor: ParallelExecutor = runtime.executor();
            for outcome in executor.execute(supervisor, batch).await {
                let status = if outcome.success { "ok" } else { "error" };
                println!(
                    "[{status}] {} ({}ms): {}",
                    outcome.tool,
                    outcome.duration_ms,
                    outcome.result.text_content()
                );
            }
        }
        Commands::Ping { worker } => {
            supervisor.ping_worker(worker).await?;
            println!("{worker}: ok");
        }
    }
    Ok(())
}

fn parse_args(args: Option<&str>) -> Result<serde_json::Value> {
    match args {
        Some(raw) => Ok(serde_json::from_str(raw)?),
        None => Ok(serde_json::json!({})),
    }
}

fn parse_batch_spec(spec: &str) -> Result<BatchCall> {
    match spec.split_once('=') {
        Some((tool, args)) => Ok(BatchCall::new(tool, serde_json::from_str(args)?)),
        None => Ok(BatchCall::new(spec, serde_json::json!({}))),
    }
}

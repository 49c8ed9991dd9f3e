use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use underwrite_core::config::AppConfig;
use underwrite_core::event::EventBus;
use underwrite_core::types::ApplicantProfile;
use underwrite_graph::{credit_underwriting_graph, GraphExecutor};
use underwrite_rpc::{serve_stdio, WorkerRegistry};

const DEFAULT_CONFIG: &str = "underwrite.toml";

#[derive(Parser)]
#[command(name = "underwrite", version, about = "Credit underwriting workflow runner")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = DEFAULT_CONFIG, env = "UNDERWRITE_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one application and print the run report as JSON
    Evaluate {
        /// Applicant JSON file, or `-` for stdin
        applicant: PathBuf,
        /// Stream run events to stderr as JSON lines
        #[arg(long)]
        events: bool,
    },
    /// Serve built-in capabilities over stdin/stdout
    Worker {
        /// Capabilities to serve
        #[arg(required = true)]
        capabilities: Vec<String>,
    },
    /// Print the workflow graph
    Graph {
        /// Emit Graphviz DOT instead of a table
        #[arg(long)]
        dot: bool,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries reports and the worker protocol.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("underwrite=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "underwrite", &mut std::io::stdout());
        }
        Commands::Worker { capabilities } => {
            let set = underwrite_workers::capability_set(capabilities.as_slice())?;
            serve_stdio(set).await?;
        }
        Commands::Graph { dot } => {
            let graph = credit_underwriting_graph()?;
            if dot {
                print!("{}", graph.to_dot());
            } else {
                print!("{}", graph.table());
            }
        }
        Commands::Config => {
            let config = load_config(&cli.config)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Evaluate { applicant, events } => {
            let config = load_config(&cli.config)?;
            let applicant = read_applicant(&applicant)?;
            let succeeded = evaluate(&config, applicant, events).await?;
            if !succeeded {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    if path == Path::new(DEFAULT_CONFIG) {
        warn!(path = %path.display(), "Config file not found, using defaults");
        return Ok(AppConfig::default());
    }
    Err(underwrite_core::error::UnderwriteError::ConfigNotFound(path.display().to_string()).into())
}

fn read_applicant(path: &Path) -> anyhow::Result<ApplicantProfile> {
    let text = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("reading applicant from {}", path.display()))?
    };
    let value: serde_json::Value = serde_json::from_str(&text).context("parsing applicant JSON")?;
    Ok(ApplicantProfile::from_json(value)?)
}

/// Start the workers, run the graph once and print the report.
/// Returns whether the run completed.
async fn evaluate(config: &AppConfig, applicant: ApplicantProfile, events: bool) -> anyhow::Result<bool> {
    let registry = WorkerRegistry::start_all(config).await?;

    let bus = Arc::new(EventBus::default());
    let printer = events.then(|| {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Ok(line) = serde_json::to_string(&event) {
                            eprintln!("{line}");
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Event stream lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    });

    let executor = GraphExecutor::new(credit_underwriting_graph()?)
        .with_config(config.executor.clone())
        .with_events(bus.clone());
    let result = executor.run(&registry, applicant).await;

    drop(executor);
    drop(bus);
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    registry.shutdown().await;

    let report = result?;
    info!(run_id = %report.run_id, succeeded = report.succeeded(), "Evaluation finished");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.succeeded())
}

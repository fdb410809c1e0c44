use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kestrel_core::config::AppConfig;
use kestrel_core::error::KestrelError;
use kestrel_core::traits::DataStore;
use kestrel_nodes::NodeRegistry;
use kestrel_policy::PolicyEngine;
use kestrel_runtime::{lint, DryRunSession, Graph, Orchestrator, RunRequest, RunStore, Severity};
use kestrel_store::SqliteDataStore;

/// Exit status when policy refused the work, as opposed to it failing.
const EXIT_REFUSED: i32 = 2;

#[derive(Parser)]
#[command(name = "kestrel", version, about = "Policy-gated automation graph runner")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "kestrel.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a graph document against a dry-run session
    Run {
        /// Graph document (JSON)
        graph: PathBuf,
        /// Role the run executes as
        #[arg(short, long)]
        role: String,
        /// JSON object with the profile secrets
        #[arg(short, long)]
        profile: Option<PathBuf>,
        /// SQLite database for data nodes (overrides `[store]`)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Print the node catalogue as JSON
    Catalogue,
    /// Check a URL against the egress rules
    CheckEgress { url: String },
    /// Resolve a path inside the sandbox roots
    ResolvePath { path: String },
    /// Check a graph document for problems without running it
    Lint { graph: PathBuf },
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
    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "kestrel", &mut std::io::stdout());
        return Ok(());
    }

    let config = AppConfig::load_or_default(&cli.config)?;
    init_tracing(&config);

    let policy = Arc::new(PolicyEngine::new(config.roles.clone(), &config.policy));
    let registry = NodeRegistry::with_categories(&config.nodes.categories);

    match cli.command {
        Commands::Run {
            graph,
            role,
            profile,
            db,
        } => {
            let graph = Graph::load(&graph)
                .with_context(|| format!("loading graph {}", graph.display()))?;
            for issue in lint(&graph, &registry) {
                warn!(node_id = %issue.node_id, severity = %issue.severity, "{}", issue.message);
            }

            let mut request = RunRequest::new(role).with_session(Arc::new(DryRunSession::new()));
            if let Some(path) = profile {
                request = request.with_profile(load_profile(&path)?);
            }
            let db_path = db.or_else(|| config.store.as_ref().map(|s| PathBuf::from(&s.path)));
            if let Some(path) = db_path {
                let store: Arc<dyn DataStore> = Arc::new(SqliteDataStore::open(&path)?);
                info!(path = %path.display(), "Data store opened");
                request = request.with_data_store(store);
            }

            let orchestrator = Orchestrator::new(
                Arc::new(registry),
                policy,
                Arc::new(RunStore::new()),
                config.runtime.clone(),
            );
            let result = orchestrator.run(&graph, request).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_completed() {
                std::process::exit(if result.is_policy_violation() { EXIT_REFUSED } else { 1 });
            }
        }
        Commands::Catalogue => {
            println!("{}", serde_json::to_string_pretty(&registry.export_catalogue())?);
        }
        Commands::CheckEgress { url } => match policy.check_egress(&url).await {
            Ok(target) => {
                println!("allowed: {}", target.url);
                for addr in &target.addrs {
                    println!("  via {}", addr);
                }
            }
            Err(e) => {
                eprintln!("refused ({}): {}", e.kind(), e);
                std::process::exit(exit_code(&e));
            }
        },
        Commands::ResolvePath { path } => match policy.resolve_path(&path) {
            Ok(resolved) => println!("{}", resolved.display()),
            Err(e) => {
                eprintln!("refused ({}): {}", e.kind(), e);
                std::process::exit(exit_code(&e));
            }
        },
        Commands::Lint { graph } => {
            let graph = Graph::load(&graph)
                .with_context(|| format!("loading graph {}", graph.display()))?;
            let issues = lint(&graph, &registry);
            if issues.is_empty() {
                println!("No issues found.");
            }
            for issue in &issues {
                if issue.node_id.is_empty() {
                    println!("{}: {}", issue.severity, issue.message);
                } else {
                    println!("{} [{}]: {}", issue.severity, issue.node_id, issue.message);
                }
            }
            if issues.iter().any(|i| i.severity == Severity::Error) {
                std::process::exit(1);
            }
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

/// `KESTREL_LOG` wins over `RUST_LOG`, which wins over `[log] filter`.
fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_env("KESTREL_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter().unwrap_or("kestrel=info,warn")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn exit_code(err: &KestrelError) -> i32 {
    if err.is_policy_violation() {
        EXIT_REFUSED
    } else {
        1
    }
}

fn load_profile(path: &Path) -> anyhow::Result<Map<String, Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading profile {}", path.display()))?;
    match serde_json::from_str(&content)? {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("profile {} must be a JSON object", path.display()),
    }
}

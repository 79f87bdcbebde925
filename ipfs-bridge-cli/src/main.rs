//! ipfs-bridge - add and fetch content through a bridged node
//!
//! Starts a node on a single-threaded event loop, then either adds a string
//! and keeps serving it until Ctrl-C, or fetches and prints content by CID.

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ipfs_bridge::prelude::*;

/// ipfs-bridge CLI
#[derive(Parser)]
#[command(name = "ipfs-bridge")]
#[command(about = "Add or fetch content through a bridged storage node", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the repository (must be set)
    #[arg(short, long, env = "IPFS_BRIDGE_REPO")]
    repo: Option<PathBuf>,

    /// Add this text and print its CID
    #[arg(long, conflicts_with = "cat")]
    add: Option<String>,

    /// Fetch and print the content of this CID
    #[arg(long)]
    cat: Option<String>,

    /// Node configuration file (JSON)
    #[arg(short, long, env = "IPFS_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Do not connect to other nodes
    #[arg(long)]
    offline: bool,

    /// Give up fetching missing content after this many milliseconds
    #[arg(long, env = "IPFS_BRIDGE_FETCH_TIMEOUT_MS")]
    fetch_timeout_ms: Option<u64>,

    /// Log level
    #[arg(long, env = "IPFS_BRIDGE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "IPFS_BRIDGE_LOG_JSON")]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    let Some(repo) = cli.repo.clone() else {
        eprintln!("The 'repo' parameter must be set");
        let _ = Cli::command().print_help();
        return ExitCode::FAILURE;
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start the event loop: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli, repo)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "command failed");
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(cli: &Cli) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cli: Cli, repo: PathBuf) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => NodeConfig::default(),
    };
    if cli.offline {
        config = config.with_online(false);
    }

    let mut engine_config = MemoryEngineConfig::new();
    if let Some(ms) = cli.fetch_timeout_ms {
        engine_config = engine_config.with_fetch_timeout(Duration::from_millis(ms));
    }
    let engine: Arc<dyn Engine> = Arc::new(MemoryEngine::new(engine_config));

    println!("Starting event loop, press Ctrl-C to exit.");
    let loop_handle = LoopHandle::current()?;
    let config = config.with_event_sink(Arc::new(LoggingEventSink::debug()));
    let node = Node::build(engine, &loop_handle, &repo, config)
        .await
        .into_result()
        .with_context(|| format!("failed to start node at {}", repo.display()))?;
    info!(identity = %node.identity()?, repo = %repo.display(), "node ready");

    if let Some(text) = &cli.add {
        let cid = node.add_str(text)?.await.into_result().context("add failed")?;
        println!("CID: {cid}");

        // Keep serving so that other nodes can fetch the content.
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
        info!("interrupted, stopping node");
    } else if let Some(cid) = &cli.cat {
        let operation = node.cat(cid)?;
        let token = operation.cancel_token();

        let content = tokio::select! {
            outcome = operation => outcome.into_result().context("cat failed")?,
            _ = tokio::signal::ctrl_c() => {
                if let Some(token) = token {
                    token.cancel();
                }
                bail!("interrupted while fetching {cid}");
            }
        };
        println!("Content: {}", String::from_utf8_lossy(&content));
    }

    node.stop();
    loop_handle.until_idle().await;
    Ok(())
}

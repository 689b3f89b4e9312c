//! ---
//! anvil_section: "01-core-functionality"
//! anvil_subsection: "binary"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Binary entrypoint for the Anvil agent daemon."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use anvil_api::{ApiServerBuilder, ApiServerHandle, CommandExecutor, StatusProvider};
use anvil_common::config::AppConfig;
use anvil_common::logging::init_tracing;
use anvil_common::version::VersionInfo;
use anvil_core::build_agent;
use anvil_hardware::GenericHardwareManager;
use anvil_manifest::Manifest;
use anvil_metrics::{new_registry, spawn_http_server, AgentMetrics};
use clap::{ArgAction, Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "Anvil provisioning agent daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the agent")]
    Run,
    #[command(about = "Validate a package constraint manifest and exit")]
    CheckManifest {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let version = VersionInfo::current();
    if cli.version {
        println!("{}", version.extended());
        return Ok(());
    }

    if let Some(Commands::CheckManifest { path }) = &cli.command {
        return check_manifest(path);
    }

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("/etc/anvil/agent.toml"));
    candidates.push(PathBuf::from("configs/example.dev.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let config = loaded.config;
    init_tracing("anvild", &config.logging)?;
    info!(config_path = %loaded.source.display(), "configuration loaded");

    run_daemon(config, version).await
}

async fn run_daemon(config: AppConfig, version: VersionInfo) -> Result<()> {
    let metrics_registry = new_registry();
    let metrics = AgentMetrics::new(metrics_registry.clone())?;
    metrics.inc_start();
    metrics.set_build_info(&version.semver, &version.git_sha, &version.profile);

    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(metrics_registry, config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let hardware = Arc::new(GenericHardwareManager::from_config(&config.hardware));
    let agent = build_agent(&config, version, hardware, Some(metrics))?;
    let runtime = agent.start().await?;

    let mut api_server: Option<ApiServerHandle> = None;
    if config.api.enabled {
        let provider: Arc<dyn StatusProvider> = agent.clone();
        let executor: Arc<dyn CommandExecutor> = agent.clone();
        match ApiServerBuilder::new(config.api.listen, provider, executor)
            .spawn()
            .await
        {
            Ok(server) => {
                info!(address = %server.local_addr(), "agent api listening");
                api_server = Some(server);
            }
            Err(err) => {
                warn!(error = %err, "failed to start agent api server");
            }
        }
    } else {
        info!("agent api disabled by configuration");
    }

    info!(mode = %agent.mode_name(), "agent running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    runtime.shutdown().await?;

    if let Some(server) = api_server {
        server.shutdown().await?;
    }
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    Ok(())
}

fn check_manifest(path: &PathBuf) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("unable to read manifest {}", path.display()))?;
    let manifest = Manifest::parse(&contents)
        .map_err(|err| anyhow::anyhow!("{}: {err}", path.display()))?;

    println!("{}: {} records", path.display(), manifest.len());
    for record in manifest.records() {
        let constraints = record
            .constraints
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        match &record.license {
            Some(license) => println!("  {} {} ({})", record.name, constraints, license),
            None => println!("  {} {}", record.name, constraints),
        }
    }
    Ok(())
}

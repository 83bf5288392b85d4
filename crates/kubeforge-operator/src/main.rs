//! Kubeforge operator - resumable cluster and machine lifecycles

use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::Client;
use tokio_util::sync::CancellationToken;

use kubeforge_common::config::OsEnvConfig;
use kubeforge_common::telemetry::{init_telemetry, TelemetryConfig};
use kubeforge_operator::runner;

/// Kubeforge - step-driven lifecycle operator for remote clusters
#[derive(Parser, Debug)]
#[command(name = "kubeforge", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the ForgeCluster and ForgeMachine controllers (default mode)
    Controller {
        /// Skip installing CRDs on startup
        #[arg(long)]
        skip_crd_install: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", runner::crd_manifests()?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig::from_env(&OsEnvConfig))?;

    match cli.command {
        Some(Commands::Controller { skip_crd_install }) => run_controller(skip_crd_install).await,
        None => run_controller(false).await,
    }
}

async fn run_controller(skip_crd_install: bool) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kubernetes client: {}", e))?;

    if !skip_crd_install {
        runner::ensure_crds_installed(&client).await?;
    }

    let shutdown = CancellationToken::new();
    let ctx = runner::external_context(client.clone(), &OsEnvConfig, shutdown)?;
    runner::run(client, Arc::new(ctx)).await;
    Ok(())
}

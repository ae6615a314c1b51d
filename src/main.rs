use crate::collector::KubePodLister;
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod collector;
mod config;
mod error;
mod filter;
mod image_reference;
mod pipeline;
mod policy;
mod resolver;
mod state;
mod targets;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Fetch container images from Kubernetes and map them to Snyk.
#[derive(Parser, Debug)]
#[command(name = "kube-snyk-targets", version, about)]
struct Args {
    /// Path to the Kubernetes configuration file. Defaults to the ambient kubeconfig or
    /// in-cluster configuration.
    #[arg(long)]
    kube_config: Option<PathBuf>,

    /// Path to the configuration file (JSON or YAML).
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    info!("Starting kube-snyk-targets {}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let settings = config::load_settings(&args.config)
        .map_err(error::Error::from)
        .with_context(|| format!("Failed to load config file {}", args.config.display()))?;

    let client = collector::create_client(args.kube_config.as_deref()).await?;
    let lister = KubePodLister::new(client);

    let summary = pipeline::run(&settings, &lister).await?;
    info!(
        "Finished: {} images discovered, {} excluded, {} mapped, {} unmapped, targets written to {}",
        summary.discovered,
        summary.excluded,
        summary.mapped,
        summary.unmapped,
        summary.output_path.display()
    );
    if !summary.failed_namespaces.is_empty() {
        info!(
            "Namespaces skipped after listing failures: {}",
            summary.failed_namespaces.join(", ")
        );
    }
    Ok(())
}

//! # kubed
//!
//! Kubernetes cluster daemon:
//!
//! 1. **Config syncer** - copies annotated ConfigMaps/Secrets into other
//!    namespaces and other clusters, and keeps the copies converged
//! 2. **Recycle bin** - snapshots deleted objects to disk for a retention window
//! 3. **Search index** - keeps an in-process copy of every watched object
//!
//! Exit code 0 on clean shutdown, 1 on startup failure.

use anyhow::{Context, Result};
use clap::Parser;
use kubed::cli::{version_info, Cli, Commands, RunArgs};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Version => {
            println!("{}", version_info());
            Ok(())
        }
        Commands::Run(args) => run(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("kubed failed: {:#}", e);
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = args
        .into_config()
        .context("Failed to load configuration")?;
    let init = kubed::runtime::initialize(config)
        .await
        .context("Failed to initialize daemon")?;
    kubed::runtime::run(init).await
}

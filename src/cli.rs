//! # CLI
//!
//! Command-line interface for the kubed daemon.
//!
//! ## Usage
//!
//! ```bash
//! # Run the daemon with a cluster config file
//! kubed run --clusterconfig /srv/kubed/config.yaml
//!
//! # Override the resync period and recycle bin retention
//! kubed run --resync-period 10m --recycle-bin-ttl 72h
//!
//! # Print build metadata
//! kubed version
//! ```
//!
//! Settings are layered: environment variables, then the cluster config
//! file, then flags.

use crate::config::{parse_duration, ClusterConfig, ConfigError, DaemonConfig};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Kubernetes cluster daemon
#[derive(Debug, Parser)]
#[command(name = "kubed")]
#[command(
    about = "Syncs ConfigMaps/Secrets across namespaces and clusters and keeps a recycle bin of deleted objects",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the daemon until SIGINT/SIGTERM
    Run(RunArgs),
    /// Print version and build metadata
    Version,
}

#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// Cluster config YAML file
    #[arg(long, value_name = "PATH")]
    pub clusterconfig: Option<PathBuf>,

    /// Period between full resyncs of every dispatcher (e.g. 5m, 0 disables)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub resync_period: Option<Duration>,

    /// How long trashed objects are kept (e.g. 168h)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub recycle_bin_ttl: Option<Duration>,

    /// Also trash the previous object on meaningful updates
    #[arg(long)]
    pub recycle_bin_handle_updates: bool,

    /// Keep an in-process search index of every watched object
    #[arg(long)]
    pub enable_search_index: bool,

    /// Port for /metrics, /healthz and /readyz
    #[arg(long, value_name = "PORT")]
    pub metrics_port: Option<u16>,
}

impl RunArgs {
    /// Resolve the effective configuration from the environment, the cluster
    /// config file and these flags
    pub fn into_config(self) -> Result<DaemonConfig, ConfigError> {
        let mut config = DaemonConfig::from_env();
        if let Some(path) = &self.clusterconfig {
            config.apply_cluster_config(&ClusterConfig::load(path)?);
        }
        self.apply(&mut config);
        Ok(config)
    }

    /// Flags win over everything else
    fn apply(&self, config: &mut DaemonConfig) {
        if let Some(period) = self.resync_period {
            config.resync_period = period;
        }
        if let Some(ttl) = self.recycle_bin_ttl {
            config.recycle_bin_ttl = ttl;
        }
        if self.recycle_bin_handle_updates {
            config.recycle_bin_handle_updates = true;
        }
        if self.enable_search_index {
            config.enable_search_index = true;
        }
        if let Some(port) = self.metrics_port {
            config.metrics_port = port;
        }
    }
}

/// `kubed version` output
#[must_use]
pub fn version_info() -> String {
    format!(
        "kubed {}\ngit hash: {}\ngit branch: {}\nbuild time: {}",
        env!("CARGO_PKG_VERSION"),
        env!("KUBED_BUILD_GIT_HASH"),
        env!("KUBED_BUILD_GIT_BRANCH"),
        env!("KUBED_BUILD_DATETIME"),
    )
}

//! # Initialization
//!
//! Daemon startup: rustls setup, tracing, metrics, server startup,
//! Kubernetes client setup, cluster contexts and the recycle bin.
//! Any failure here is fatal and maps to exit code 1.

use crate::cluster::ClusterContextRegistry;
use crate::config::{format_duration, DaemonConfig};
use crate::observability;
use crate::search::InMemorySearchIndex;
use crate::server::{start_server, ServerState};
use crate::syncer::annotations::resolve;
use crate::trash::TrashCan;
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Everything the supervisor needs to run the dispatchers
pub struct InitializationResult {
    pub client: Client,
    pub config: DaemonConfig,
    pub server_state: Arc<ServerState>,
    pub server_handle: JoinHandle<()>,
    pub registry: ClusterContextRegistry,
    pub trash: Option<Arc<TrashCan>>,
    pub search_index: Option<Arc<InMemorySearchIndex>>,
    /// Cancelled on SIGINT/SIGTERM; every long-running task selects on it
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("cluster_name", &self.config.cluster_name)
            .field("server_ready", &self.server_state.ready())
            .field("registry", &self.registry)
            .field("trash", &self.trash)
            .field("search_index", &self.search_index.is_some())
            .finish_non_exhaustive()
    }
}

/// Initialize the daemon runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation and API reachability check
/// - Cluster context registry
/// - Recycle bin directory
pub async fn initialize(config: DaemonConfig) -> Result<InitializationResult> {
    // Must happen before any TLS client is built; Err means already installed
    let _ = rustls::crypto::ring::default_provider().install_default();

    observability::init_tracing(config.log_format);

    info!("Starting kubed {}", env!("CARGO_PKG_VERSION"));
    info!(
        "Build info: datetime={}, git_hash={}, git_branch={}",
        env!("KUBED_BUILD_DATETIME"),
        env!("KUBED_BUILD_GIT_HASH"),
        env!("KUBED_BUILD_GIT_BRANCH")
    );
    info!(
        cluster = config.cluster_name.as_str(),
        config_syncer = config.enable_config_syncer,
        search_index = config.enable_search_index,
        recycle_bin = ?config.recycle_bin_path,
        resync_period = %format_duration(config.resync_period),
        "Effective configuration"
    );

    observability::metrics::register_metrics()?;

    let shutdown = CancellationToken::new();
    let server_state = Arc::new(ServerState::default());

    let server_handle = {
        let state = Arc::clone(&server_state);
        let port = config.metrics_port;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = start_server(port, state, shutdown).await {
                error!("HTTP server error: {}", e);
            }
        })
    };
    wait_for_server_ready(&server_state, &server_handle, &config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    // Unreachable API server at startup is fatal; later errors are retried
    Api::<Namespace>::all(client.clone())
        .list(&ListParams::default().limit(1))
        .await
        .context("Kubernetes API is not reachable")?;

    if config.enable_config_syncer {
        log_sync_sources::<ConfigMap>(&client).await;
        log_sync_sources::<Secret>(&client).await;
    }

    let registry = match &config.kube_config_file {
        Some(path) => ClusterContextRegistry::load(path, config.remote_call_timeout).await,
        None => ClusterContextRegistry::default(),
    };

    let trash = match TrashCan::from_config(&config) {
        Some(trash) => {
            std::fs::create_dir_all(trash.root()).with_context(|| {
                format!(
                    "Failed to create recycle bin directory {}",
                    trash.root().display()
                )
            })?;
            info!(
                path = %trash.root().display(),
                ttl = %format_duration(trash.ttl()),
                "Recycle bin enabled"
            );
            Some(Arc::new(trash))
        }
        None => None,
    };

    let search_index = config
        .enable_search_index
        .then(|| Arc::new(InMemorySearchIndex::default()));

    info!("Daemon initialized, starting dispatchers...");

    Ok(InitializationResult {
        client,
        config,
        server_state,
        server_handle,
        registry,
        trash,
        search_index,
        shutdown,
    })
}

/// Wait for the HTTP server to bind its listener
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &JoinHandle<()>,
    config: &DaemonConfig,
) -> Result<()> {
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.is_bound.load(Ordering::Relaxed) {
            info!("HTTP server is accepting connections");
            break;
        }

        if start_time.elapsed() > config.server_startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to bind within {} seconds",
                config.server_startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(config.server_poll_interval).await;
    }

    Ok(())
}

/// Log the sync sources of one kind, grouped by namespace
async fn log_sync_sources<K>(client: &Client)
where
    K: kube::Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
{
    let kind = K::kind(&());
    let list = match Api::<K>::all(client.clone())
        .list_metadata(&ListParams::default())
        .await
    {
        Ok(list) => list,
        Err(e) => {
            warn!(resource.kind = %kind, "Could not list sync sources for startup summary: {}", e);
            return;
        }
    };

    let mut by_namespace: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for item in &list.items {
        if resolve(item).is_synced() {
            by_namespace
                .entry(item.namespace().unwrap_or_default())
                .or_default()
                .push(item.name_any());
        }
    }

    let total: usize = by_namespace.values().map(Vec::len).sum();
    info!("kubed - Startup Sync Source Summary");
    info!("Resource Kind: {}", kind);
    info!("Total Sync Sources: {}", total);
    info!("Namespaces: {}", by_namespace.len());

    for (namespace, names) in &mut by_namespace {
        names.sort();
        info!("Namespace: {}", namespace);
        info!(
            "  Sources ({}): {}",
            names.len(),
            if names.len() <= 3 {
                names.join(", ")
            } else {
                format!("{}, ... ({} total)", names[..3].join(", "), names.len())
            }
        );
    }
}

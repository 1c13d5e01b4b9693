//! # Supervisor
//!
//! Builds one dispatcher per watched kind, registers its handlers in a fixed
//! order and runs everything until a shutdown signal arrives:
//!
//! 1. search index (if enabled)
//! 2. config syncer (ConfigMap/Secret, if enabled)
//! 3. namespace watcher (Namespace, if the config syncer is enabled)
//! 4. trash can (if a recycle-bin path is configured)
//!
//! On shutdown the token is cancelled, readiness is cleared, and the
//! supervisor waits for every dispatcher loop, in-flight reconciliation and
//! the trash sweeper before returning.

use crate::dispatcher::{RestartPolicy, WatchDispatcher, WatchedKind};
use crate::runtime::InitializationResult;
use crate::search::{SearchIndex, SearchIndexHandler};
use crate::syncer::{
    ConfigSyncer, KubeReplicaApi, NamespaceFeedback, NamespaceWatcher, ReplicaApi,
    ReplicaReconciler, SyncedKind,
};
use crate::trash::TrashCanHandler;
use anyhow::Result;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use k8s_openapi::NamespaceResourceScope;
use kube::api::Api;
use kube::Resource;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Shared inputs for building dispatchers
struct Wiring<'a> {
    init: &'a InitializationResult,
    search: Option<Arc<dyn SearchIndex>>,
    tasks: TaskTracker,
}

impl Wiring<'_> {
    /// Dispatcher with the search index handler already attached
    fn dispatcher<K: WatchedKind>(&self) -> WatchDispatcher<K> {
        let config = &self.init.config;
        let mut dispatcher = WatchDispatcher::new(
            Api::<K>::all(self.init.client.clone()),
            config.resync_period,
            RestartPolicy::from_config(config),
        );
        if let Some(index) = &self.search {
            dispatcher.add_handler(Arc::new(SearchIndexHandler::<K>::new(Arc::clone(index))));
        }
        dispatcher
    }

    fn syncer<K>(&self, dispatcher: &WatchDispatcher<K>) -> ConfigSyncer<K>
    where
        K: SyncedKind + Resource<Scope = NamespaceResourceScope>,
    {
        let config = &self.init.config;
        let local: Arc<dyn ReplicaApi<K>> =
            Arc::new(KubeReplicaApi::<K>::new(self.init.client.clone()));
        let reconciler = ReplicaReconciler::new(
            config.cluster_name.clone(),
            local,
            self.init.registry.replica_apis::<K>(),
            config.remote_call_timeout,
        );
        ConfigSyncer::new(
            reconciler,
            dispatcher.store(),
            self.init.shutdown.clone(),
            self.tasks.clone(),
        )
    }

    fn attach_trash<K: WatchedKind>(&self, dispatcher: &mut WatchDispatcher<K>) {
        if let Some(trash) = &self.init.trash {
            dispatcher.add_handler(Arc::new(TrashCanHandler::<K>::new(
                Arc::clone(trash),
                self.init.config.recycle_bin_handle_updates,
            )));
        }
    }

    fn spawn<K: WatchedKind>(&self, dispatcher: WatchDispatcher<K>) {
        info!(resource.kind = dispatcher.kind(), "Starting dispatcher");
        self.tasks.spawn(dispatcher.run(self.init.shutdown.clone()));
    }
}

/// Run every dispatcher until shutdown
pub async fn run(init: InitializationResult) -> Result<()> {
    let tasks = TaskTracker::new();
    spawn_signal_listener(init.shutdown.clone());

    let wiring = Wiring {
        init: &init,
        search: init
            .search_index
            .as_ref()
            .map(|index| Arc::clone(index) as Arc<dyn SearchIndex>),
        tasks: tasks.clone(),
    };
    let syncer_enabled = init.config.enable_config_syncer;

    let mut config_maps = wiring.dispatcher::<ConfigMap>();
    let mut secrets = wiring.dispatcher::<Secret>();
    let mut namespaces = wiring.dispatcher::<Namespace>();
    let mut deployments = wiring.dispatcher::<Deployment>();

    if syncer_enabled {
        let config_map_syncer = wiring.syncer(&config_maps);
        let secret_syncer = wiring.syncer(&secrets);
        config_maps.add_handler(Arc::new(config_map_syncer.clone()));
        secrets.add_handler(Arc::new(secret_syncer.clone()));
        namespaces.add_handler(Arc::new(NamespaceWatcher::new(vec![
            Arc::new(config_map_syncer) as Arc<dyn NamespaceFeedback>,
            Arc::new(secret_syncer),
        ])));
    } else {
        info!("Config syncer disabled");
    }

    wiring.attach_trash(&mut config_maps);
    wiring.attach_trash(&mut secrets);
    wiring.attach_trash(&mut namespaces);
    wiring.attach_trash(&mut deployments);

    wiring.spawn(config_maps);
    wiring.spawn(secrets);
    wiring.spawn(namespaces);
    wiring.spawn(deployments);

    if let Some(trash) = &init.trash {
        tasks.spawn(Arc::clone(trash).run_sweeper(init.shutdown.clone()));
    }

    init.server_state.mark_ready();
    info!("kubed is running");

    init.shutdown.cancelled().await;
    init.server_state.mark_not_ready();
    info!("Marked server as not ready, waiting for dispatchers and in-flight reconciliations...");

    tasks.close();
    tasks.wait().await;

    if let Err(e) = init.server_handle.await {
        warn!("HTTP server task ended abnormally: {}", e);
    }
    info!("Shutdown complete");
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM
fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            error!("Failed to install SIGTERM handler, only SIGINT will stop the daemon: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

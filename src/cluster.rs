//! # Cluster Context Registry
//!
//! One API client per remote cluster context, built once at startup from a
//! multi-context kubeconfig file. Contexts that cannot be turned into a
//! client are logged and skipped; a missing registry just means
//! cross-cluster targets resolve to nothing.

use crate::syncer::{KubeReplicaApi, ReplicaApi, SyncedKind};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone, Default)]
pub struct ClusterContextRegistry {
    clients: BTreeMap<String, Client>,
}

impl std::fmt::Debug for ClusterContextRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterContextRegistry")
            .field("contexts", &self.context_names())
            .finish()
    }
}

impl ClusterContextRegistry {
    /// Load every context of the kubeconfig at `path`
    ///
    /// An unreadable file yields an empty registry.
    pub async fn load(path: &Path, call_timeout: Duration) -> Self {
        match Kubeconfig::read_from(path) {
            Ok(kubeconfig) => Self::from_kubeconfig(&kubeconfig, call_timeout).await,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    "Failed to read cluster contexts kubeconfig, cross-cluster sync disabled: {}",
                    e
                );
                Self::default()
            }
        }
    }

    pub async fn from_kubeconfig(kubeconfig: &Kubeconfig, call_timeout: Duration) -> Self {
        let mut clients = BTreeMap::new();

        for named in &kubeconfig.contexts {
            let name = named.name.clone();
            let options = KubeConfigOptions {
                context: Some(name.clone()),
                ..KubeConfigOptions::default()
            };
            let mut config = match Config::from_custom_kubeconfig(kubeconfig.clone(), &options).await {
                Ok(config) => config,
                Err(e) => {
                    warn!(context = name.as_str(), "Skipping cluster context: {}", e);
                    continue;
                }
            };
            config.connect_timeout = Some(call_timeout);
            config.read_timeout = Some(call_timeout);
            config.write_timeout = Some(call_timeout);

            match Client::try_from(config) {
                Ok(client) => {
                    clients.insert(name, client);
                }
                Err(e) => {
                    warn!(context = name.as_str(), "Skipping cluster context, client setup failed: {}", e);
                }
            }
        }

        info!(
            contexts = ?clients.keys().collect::<Vec<_>>(),
            "Loaded {} cluster context(s)",
            clients.len()
        );
        Self { clients }
    }

    #[must_use]
    pub fn client_for(&self, name: &str) -> Option<Client> {
        self.clients.get(name).cloned()
    }

    #[must_use]
    pub fn context_names(&self) -> Vec<&str> {
        self.clients.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// A replica API per context for kind `K`
    #[must_use]
    pub fn replica_apis<K>(&self) -> BTreeMap<String, Arc<dyn ReplicaApi<K>>>
    where
        K: SyncedKind + Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    {
        self.clients
            .iter()
            .map(|(name, client)| {
                let api: Arc<dyn ReplicaApi<K>> = Arc::new(KubeReplicaApi::<K>::new(client.clone()));
                (name.clone(), api)
            })
            .collect()
    }
}

//! # Config Syncer
//!
//! Replicates ConfigMaps and Secrets across namespaces and clusters.
//!
//! The syncer is a handler on the ConfigMap/Secret dispatchers. Every event
//! only enqueues the source's key; the pass itself reads the latest source
//! from the dispatcher's indexer, resolves its annotations and reconciles.
//! Passes for the same source are single-flight.
//!
//! Events on a replica (an object carrying our origin annotation) also
//! enqueue its source, so a hand-edited or deleted replica is put back and a
//! replica whose source vanished while the daemon was down is collected on
//! the first relist or resync.

pub mod annotations;
pub mod api;
pub mod namespace;
pub mod reconciler;
pub mod replica;
pub mod selector;
pub mod single_flight;

#[cfg(test)]
pub(crate) mod testing;

pub use annotations::{resolve, SyncDescriptor};
pub use api::{ApiError, KubeReplicaApi, ReplicaApi};
pub use namespace::{NamespaceFeedback, NamespaceWatcher};
pub use reconciler::{ReconcileError, ReconcileSummary, ReplicaReconciler, SourceKey, Target};
pub use replica::{Origin, SyncedKind};
pub use selector::{Selector, SelectorError};
pub use single_flight::SingleFlight;

use crate::dispatcher::{HandlerError, ResourceEventHandler, WatchedObject};
use crate::observability::metrics;
use async_trait::async_trait;
use kube_runtime::reflector::{ObjectRef, Store};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn, Instrument};

struct Inner<K: SyncedKind> {
    reconciler: ReplicaReconciler<K>,
    store: Store<K>,
    flight: SingleFlight<SourceKey>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

pub struct ConfigSyncer<K: SyncedKind> {
    inner: Arc<Inner<K>>,
}

impl<K: SyncedKind> Clone for ConfigSyncer<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: SyncedKind> std::fmt::Debug for ConfigSyncer<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigSyncer")
            .field("kind", &K::kind(&()))
            .field("reconciler", &self.inner.reconciler)
            .field("in_flight", &self.inner.flight)
            .finish_non_exhaustive()
    }
}

impl<K: SyncedKind> ConfigSyncer<K> {
    /// `store` must be the indexer of the dispatcher this syncer is registered on
    #[must_use]
    pub fn new(
        reconciler: ReplicaReconciler<K>,
        store: Store<K>,
        shutdown: CancellationToken,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                reconciler,
                store,
                flight: SingleFlight::default(),
                shutdown,
                tasks,
            }),
        }
    }

    /// Schedule a reconciliation pass for `key` in the background
    pub fn enqueue(&self, key: SourceKey) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        let syncer = self.clone();
        self.inner.tasks.spawn(async move {
            syncer.sync(&key).await;
        });
    }

    /// Run one single-flight pass for `key`
    ///
    /// Returns `None` when the trigger was coalesced into a pass already queued.
    pub async fn sync(&self, key: &SourceKey) -> Option<Result<ReconcileSummary, ReconcileError>> {
        let span = tracing::info_span!(
            "syncer.reconcile",
            resource.kind = %K::kind(&()),
            resource.namespace = key.namespace.as_str(),
            resource.name = key.name.as_str(),
        );
        let outcome = self
            .inner
            .flight
            .run(key, || self.reconcile_latest(key))
            .instrument(span)
            .await;
        if outcome.is_none() {
            metrics::increment_reconciliations_coalesced();
            debug!(source = %key, "Coalesced into queued reconciliation");
        }
        outcome
    }

    async fn reconcile_latest(&self, key: &SourceKey) -> Result<ReconcileSummary, ReconcileError> {
        let start = Instant::now();
        metrics::increment_reconciliations();

        let source = self.source(key);
        let descriptor = source
            .as_deref()
            .map_or(SyncDescriptor::Unsynced, resolve);
        let result = self
            .inner
            .reconciler
            .reconcile(key, source.as_deref(), &descriptor, &self.inner.shutdown)
            .await;

        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
        match &result {
            Ok(summary) if summary.failed > 0 => {
                metrics::increment_reconciliation_errors();
                warn!(
                    source = %key,
                    failed = summary.failed,
                    "Some replica writes failed, the next resync retries them"
                );
            }
            Ok(_) => {}
            Err(ReconcileError::Cancelled) => {
                debug!(source = %key, "Reconciliation cancelled by shutdown");
            }
            Err(e) if e.is_transient() => {
                metrics::increment_reconciliation_errors();
                warn!(source = %key, "Reconciliation failed, the next resync retries it: {}", e);
            }
            Err(e) => {
                metrics::increment_reconciliation_errors();
                error!(source = %key, "Reconciliation failed: {}", e);
            }
        }
        result
    }

    fn source(&self, key: &SourceKey) -> Option<Arc<K>> {
        let obj_ref = ObjectRef::<K>::new(&key.name).within(&key.namespace);
        self.inner.store.get(&obj_ref)
    }

    /// Key of the source `obj` was replicated from, if it is one of our replicas
    fn replica_source(&self, obj: &K) -> Option<SourceKey> {
        Origin::from_replica(obj)
            .filter(|origin| origin.cluster == self.inner.reconciler.cluster_name())
            .map(|origin| SourceKey::new(origin.namespace, origin.name))
    }
}

impl<K: SyncedKind> NamespaceFeedback for ConfigSyncer<K> {
    fn requeue_namespace_scoped(&self) -> usize {
        let keys = self
            .inner
            .store
            .state()
            .iter()
            .filter(|obj| resolve(obj.as_ref()).is_namespace_scoped())
            .map(|obj| SourceKey::of(obj.as_ref()))
            .collect::<Vec<_>>();
        let count = keys.len();
        for key in keys {
            self.enqueue(key);
        }
        count
    }

    fn cascade_source_namespace(&self, namespace: &str) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        let syncer = self.clone();
        let namespace = namespace.to_string();
        self.inner.tasks.spawn(async move {
            let result = syncer
                .inner
                .reconciler
                .cascade_origin_namespace(&namespace, &syncer.inner.shutdown)
                .await;
            if let Err(e) = result {
                metrics::increment_reconciliation_errors();
                error!(
                    origin.namespace = namespace.as_str(),
                    resource.kind = %K::kind(&()),
                    "Failed to remove replicas of deleted namespace: {}",
                    e
                );
            }
        });
    }
}

#[async_trait]
impl<K: SyncedKind> ResourceEventHandler<K> for ConfigSyncer<K> {
    fn name(&self) -> &'static str {
        "config-syncer"
    }

    async fn on_add(&self, obj: &WatchedObject<K>) -> Result<(), HandlerError> {
        self.enqueue(SourceKey::of(obj.object.as_ref()));
        // A relist after a restart is the only event an orphaned replica gets
        if let Some(source) = self.replica_source(&obj.object) {
            self.enqueue(source);
        }
        Ok(())
    }

    async fn on_update(
        &self,
        _old: &WatchedObject<K>,
        new: &WatchedObject<K>,
    ) -> Result<(), HandlerError> {
        self.enqueue(SourceKey::of(new.object.as_ref()));
        if let Some(source) = self.replica_source(&new.object) {
            self.enqueue(source);
        }
        Ok(())
    }

    async fn on_delete(&self, obj: &WatchedObject<K>) -> Result<(), HandlerError> {
        self.enqueue(SourceKey::of(obj.object.as_ref()));
        if let Some(source) = self.replica_source(&obj.object) {
            self.enqueue(source);
        }
        Ok(())
    }
}

//! # Namespace Watcher
//!
//! Feeds namespace lifecycle events back into the config syncers:
//!
//! - a new namespace, or a label change on one, re-queues every source whose
//!   target set depends on namespaces (all-namespaces or selector)
//! - a deleted namespace removes every replica whose source lived there

use crate::dispatcher::{HandlerError, ResourceEventHandler, WatchedObject};
use crate::dispatcher::kinds::maps_equal;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use std::sync::Arc;
use tracing::{debug, info};

/// What a syncer exposes to namespace lifecycle events
pub trait NamespaceFeedback: Send + Sync {
    /// Re-queue every source with a namespace-dependent target set, returning how many
    fn requeue_namespace_scoped(&self) -> usize;

    /// Start removing replicas whose source lived in `namespace`
    fn cascade_source_namespace(&self, namespace: &str);
}

#[derive(Default)]
pub struct NamespaceWatcher {
    syncers: Vec<Arc<dyn NamespaceFeedback>>,
}

impl std::fmt::Debug for NamespaceWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceWatcher")
            .field("syncers", &self.syncers.len())
            .finish()
    }
}

impl NamespaceWatcher {
    #[must_use]
    pub fn new(syncers: Vec<Arc<dyn NamespaceFeedback>>) -> Self {
        Self { syncers }
    }

    fn requeue(&self, namespace: &str, reason: &str) {
        let requeued: usize = self
            .syncers
            .iter()
            .map(|s| s.requeue_namespace_scoped())
            .sum();
        if requeued > 0 {
            info!(
                resource.namespace = namespace,
                reason = reason,
                sources = requeued,
                "Re-queued namespace-scoped sources"
            );
        }
    }
}

#[async_trait]
impl ResourceEventHandler<Namespace> for NamespaceWatcher {
    fn name(&self) -> &'static str {
        "namespace-watcher"
    }

    async fn on_add(&self, obj: &WatchedObject<Namespace>) -> Result<(), HandlerError> {
        self.requeue(&obj.name(), "namespace added");
        Ok(())
    }

    async fn on_update(
        &self,
        old: &WatchedObject<Namespace>,
        new: &WatchedObject<Namespace>,
    ) -> Result<(), HandlerError> {
        // Resync redelivers the same object; sources get their own resync
        if Arc::ptr_eq(&old.object, &new.object) {
            return Ok(());
        }
        if !maps_equal(
            old.meta().labels.as_ref(),
            new.meta().labels.as_ref(),
        ) {
            self.requeue(&new.name(), "namespace labels changed");
        } else {
            debug!(resource.namespace = %new.name(), "Namespace update without label change");
        }
        Ok(())
    }

    async fn on_delete(&self, obj: &WatchedObject<Namespace>) -> Result<(), HandlerError> {
        let namespace = obj.name();
        info!(resource.namespace = namespace.as_str(), "Namespace deleted, removing replicas of its sources");
        for syncer in &self.syncers {
            syncer.cascade_source_namespace(&namespace);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        requeues: Mutex<usize>,
        cascades: Mutex<Vec<String>>,
    }

    impl NamespaceFeedback for Recorder {
        fn requeue_namespace_scoped(&self) -> usize {
            *self.requeues.lock().unwrap() += 1;
            1
        }

        fn cascade_source_namespace(&self, namespace: &str) {
            self.cascades.lock().unwrap().push(namespace.to_string());
        }
    }

    fn ns(name: &str, labels: &[(&str, &str)]) -> WatchedObject<Namespace> {
        WatchedObject::new(Arc::new(Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }))
    }

    fn watcher() -> (NamespaceWatcher, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let watcher =
            NamespaceWatcher::new(vec![Arc::clone(&recorder) as Arc<dyn NamespaceFeedback>]);
        (watcher, recorder)
    }

    #[tokio::test]
    async fn test_add_requeues() {
        let (watcher, recorder) = watcher();

        watcher.on_add(&ns("fresh", &[])).await.unwrap();

        assert_eq!(*recorder.requeues.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_label_change_requeues_but_other_updates_do_not() {
        let (watcher, recorder) = watcher();

        watcher
            .on_update(&ns("a", &[]), &ns("a", &[("app", "foo")]))
            .await
            .unwrap();
        watcher
            .on_update(&ns("a", &[("app", "foo")]), &ns("a", &[("app", "foo")]))
            .await
            .unwrap();
        let same = ns("a", &[("app", "foo")]);
        watcher.on_update(&same, &same).await.unwrap();

        assert_eq!(*recorder.requeues.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let (watcher, recorder) = watcher();

        watcher.on_delete(&ns("gone", &[])).await.unwrap();

        assert_eq!(*recorder.cascades.lock().unwrap(), vec!["gone".to_string()]);
    }
}

//! # Replica Reconciler
//!
//! Computes the replicas a source should have, lists the replicas it does
//! have, and issues the creates, updates and deletes that close the gap.
//!
//! The reconciler keeps no state between passes. Existing replicas are
//! always re-derived from a label query, so a restart loses nothing.
//!
//! ## Per-target writes
//!
//! Each target is written independently:
//!
//! - a conflict re-reads that one target and recomputes its write
//! - a not-found on update or delete counts as converged
//! - a same-named object without back-references is foreign and skipped
//! - any other failure is logged and counted, the pass carries on
//!
//! Every API call is bounded by the call timeout so one unreachable remote
//! context cannot stall the pass.

use crate::observability::metrics;
use crate::syncer::annotations::SyncDescriptor;
use crate::syncer::api::{ApiError, ReplicaApi};
use crate::syncer::replica::{
    content_hash, desired_replica, is_replica_of, origin_namespace_selector, origin_selector,
    Origin, SyncedKind,
};
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to list namespaces: {0}")]
    ListNamespaces(#[source] ApiError),
    #[error("failed to list replicas of {source_key}: {error}")]
    ListReplicas {
        source_key: String,
        #[source]
        error: ApiError,
    },
    #[error("failed to write replica at {target}: {error}")]
    Write {
        target: String,
        #[source]
        error: ApiError,
    },
    #[error("unknown cluster context '{0}'")]
    UnknownContext(String),
    #[error("reconciliation cancelled")]
    Cancelled,
}

impl ReconcileError {
    /// Whether a later pass can succeed without anything changing on our side
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            ReconcileError::ListNamespaces(error)
            | ReconcileError::ListReplicas { error, .. }
            | ReconcileError::Write { error, .. } => error.is_transient(),
            ReconcileError::UnknownContext(_) | ReconcileError::Cancelled => false,
        }
    }
}

/// Identity of a source object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceKey {
    pub namespace: String,
    pub name: String,
}

impl SourceKey {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn of<K: SyncedKind>(object: &K) -> Self {
        Self::new(object.namespace().unwrap_or_default(), object.name_any())
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Where a replica lives: a namespace in the local cluster or a remote context
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Target {
    pub context: Option<String>,
    pub namespace: String,
}

impl Target {
    #[must_use]
    pub fn local(namespace: impl Into<String>) -> Self {
        Self {
            context: None,
            namespace: namespace.into(),
        }
    }

    #[must_use]
    pub fn remote(context: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            context: Some(context.into()),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{}:{}", context, self.namespace),
            None => write!(f, "{}", self.namespace),
        }
    }
}

/// Counts of what one pass did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    /// Foreign objects and unreachable contexts
    pub skipped: usize,
    pub failed: usize,
}

impl ReconcileSummary {
    #[must_use]
    pub fn writes(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Deleted => self.deleted += 1,
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Created,
    Updated,
    Deleted,
    Unchanged,
    Skipped,
}

pub struct ReplicaReconciler<K: SyncedKind> {
    cluster_name: String,
    local: Arc<dyn ReplicaApi<K>>,
    contexts: BTreeMap<String, Arc<dyn ReplicaApi<K>>>,
    call_timeout: Duration,
}

impl<K: SyncedKind> fmt::Debug for ReplicaReconciler<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicaReconciler")
            .field("cluster_name", &self.cluster_name)
            .field("contexts", &self.contexts.keys().collect::<Vec<_>>())
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl<K: SyncedKind> ReplicaReconciler<K> {
    #[must_use]
    pub fn new(
        cluster_name: impl Into<String>,
        local: Arc<dyn ReplicaApi<K>>,
        contexts: BTreeMap<String, Arc<dyn ReplicaApi<K>>>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            local,
            contexts,
            call_timeout,
        }
    }

    #[must_use]
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Converge the replicas of `key` to `descriptor`
    ///
    /// `source` is `None` when the source has been deleted, which drives the
    /// replica set to empty regardless of `descriptor`.
    pub async fn reconcile(
        &self,
        key: &SourceKey,
        source: Option<&K>,
        descriptor: &SyncDescriptor,
        cancel: &CancellationToken,
    ) -> Result<ReconcileSummary, ReconcileError> {
        if cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled);
        }
        let origin = match source {
            Some(source) => Origin::of(source, &self.cluster_name),
            None => Origin {
                name: key.name.clone(),
                namespace: key.namespace.clone(),
                uid: None,
                resource_version: None,
                cluster: self.cluster_name.clone(),
            },
        };

        let desired = match source {
            Some(_) => self.desired_targets(key, descriptor).await?,
            None => BTreeSet::new(),
        };
        let (existing, unreachable) = self.existing_replicas(key, &origin, cancel).await?;

        let mut summary = ReconcileSummary::default();

        for target in &desired {
            if cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled);
            }
            let Some(source) = source else { break };
            if target
                .context
                .as_ref()
                .is_some_and(|c| unreachable.contains(c))
            {
                summary.record(Outcome::Skipped);
                continue;
            }
            let current = existing.get(target).cloned();
            match self
                .converge_target(target, source, &origin, current, cancel)
                .await
            {
                Ok(outcome) => summary.record(outcome),
                Err(ReconcileError::Cancelled) => return Err(ReconcileError::Cancelled),
                Err(e) => {
                    if e.is_transient() {
                        warn!(source = %key, replica.target = %target, "Replica write failed, retrying on a later pass: {}", e);
                    } else {
                        error!(source = %key, replica.target = %target, "Replica write failed: {}", e);
                    }
                    summary.failed += 1;
                }
            }
        }

        for target in existing.keys().filter(|t| !desired.contains(*t)) {
            if cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled);
            }
            match self.delete_replica(target, &key.name).await {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    if e.is_transient() {
                        warn!(source = %key, replica.target = %target, "Replica delete failed, retrying on a later pass: {}", e);
                    } else {
                        error!(source = %key, replica.target = %target, "Replica delete failed: {}", e);
                    }
                    summary.failed += 1;
                }
            }
        }

        if summary.writes() > 0 || summary.failed > 0 {
            info!(
                source = %key,
                descriptor = %descriptor,
                created = summary.created,
                updated = summary.updated,
                deleted = summary.deleted,
                failed = summary.failed,
                "Replicas reconciled"
            );
        } else {
            debug!(source = %key, descriptor = %descriptor, "Replicas already converged");
        }
        Ok(summary)
    }

    /// Delete every replica whose source lived in `namespace`
    pub async fn cascade_origin_namespace(
        &self,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<ReconcileSummary, ReconcileError> {
        let selector = origin_namespace_selector(namespace, &self.cluster_name);
        let mut summary = ReconcileSummary::default();

        for (context, api) in self.apis() {
            if cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled);
            }
            let replicas = match self.call(api.list(&selector)).await {
                Ok(replicas) => replicas,
                Err(e) if context.is_some() => {
                    warn!(target.context = ?context, "Skipping unreachable context during namespace cascade: {}", e);
                    summary.record(Outcome::Skipped);
                    continue;
                }
                Err(e) => {
                    return Err(ReconcileError::ListReplicas {
                        source_key: format!("{namespace}/*"),
                        error: e,
                    });
                }
            };

            for replica in replicas {
                if cancel.is_cancelled() {
                    return Err(ReconcileError::Cancelled);
                }
                let owned = Origin::from_replica(&replica).is_none_or(|o| {
                    o.namespace == namespace && o.cluster == self.cluster_name
                });
                if !owned {
                    continue;
                }
                let target = Target {
                    context: context.map(str::to_string),
                    namespace: replica.namespace().unwrap_or_default(),
                };
                if target.context.is_none() && target.namespace == namespace {
                    continue;
                }
                match self.delete_replica(&target, &replica.name_any()).await {
                    Ok(outcome) => summary.record(outcome),
                    Err(e) => {
                        warn!(replica.target = %target, "Replica delete failed: {}", e);
                        summary.failed += 1;
                    }
                }
            }
        }

        if summary.deleted > 0 {
            info!(
                origin.namespace = namespace,
                deleted = summary.deleted,
                "Deleted replicas of sources in removed namespace"
            );
        }
        Ok(summary)
    }

    async fn desired_targets(
        &self,
        key: &SourceKey,
        descriptor: &SyncDescriptor,
    ) -> Result<BTreeSet<Target>, ReconcileError> {
        match descriptor {
            SyncDescriptor::Unsynced => Ok(BTreeSet::new()),
            SyncDescriptor::AllNamespaces | SyncDescriptor::NamespaceSelector(_) => {
                let namespaces = self
                    .call(self.local.list_namespaces())
                    .await
                    .map_err(ReconcileError::ListNamespaces)?;
                Ok(namespaces
                    .iter()
                    .filter(|ns| ns.name_any() != key.namespace)
                    .filter(|ns| !is_terminating(ns))
                    .filter(|ns| match descriptor {
                        SyncDescriptor::NamespaceSelector(selector) => {
                            selector.matches(ns.labels())
                        }
                        _ => true,
                    })
                    .map(|ns| Target::local(ns.name_any()))
                    .collect())
            }
            SyncDescriptor::ClusterContexts(contexts) => Ok(contexts
                .iter()
                .filter(|context| {
                    let known = self.contexts.contains_key(*context);
                    if !known {
                        warn!(
                            source = %key,
                            target.context = context.as_str(),
                            "Skipping unknown cluster context"
                        );
                    }
                    known
                })
                .map(|context| Target::remote(context.as_str(), key.namespace.as_str()))
                .collect()),
        }
    }

    /// Replicas of `origin` per target, plus the contexts that could not be listed
    ///
    /// The source's own identity in the local cluster is never a replica, even
    /// when another daemon with the same cluster name wrote it there.
    async fn existing_replicas(
        &self,
        key: &SourceKey,
        origin: &Origin,
        cancel: &CancellationToken,
    ) -> Result<(BTreeMap<Target, K>, BTreeSet<String>), ReconcileError> {
        let selector = origin_selector(&origin.name, &origin.namespace, &origin.cluster);
        let mut existing = BTreeMap::new();
        let mut unreachable = BTreeSet::new();

        for (context, api) in self.apis() {
            if cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled);
            }
            let replicas = match self.call(api.list(&selector)).await {
                Ok(replicas) => replicas,
                Err(e) => match context {
                    Some(context) => {
                        warn!(
                            source = %key,
                            target.context = context,
                            "Cluster context unreachable, skipping it for this pass: {}",
                            e
                        );
                        unreachable.insert(context.to_string());
                        continue;
                    }
                    None => {
                        return Err(ReconcileError::ListReplicas {
                            source_key: key.to_string(),
                            error: e,
                        });
                    }
                },
            };
            for replica in replicas.into_iter().filter(|r| is_replica_of(r, origin)) {
                let target = Target {
                    context: context.map(str::to_string),
                    namespace: replica.namespace().unwrap_or_default(),
                };
                if target.context.is_none() && target.namespace == key.namespace {
                    continue;
                }
                existing.insert(target, replica);
            }
        }
        Ok((existing, unreachable))
    }

    /// Create or update the replica at `target` until it matches `source`
    async fn converge_target(
        &self,
        target: &Target,
        source: &K,
        origin: &Origin,
        mut current: Option<K>,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ReconcileError> {
        let api = self.api_for(target)?;
        let desired = desired_replica(source, &target.namespace, &self.cluster_name);
        let wanted_hash = content_hash(source);

        loop {
            if cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled);
            }

            match current.take() {
                None => match self.call(api.create(&target.namespace, &desired)).await {
                    Ok(_) => {
                        debug!(target.namespace = target.namespace.as_str(), target.context = ?target.context, "Created replica");
                        metrics::increment_replica_writes("create");
                        return Ok(Outcome::Created);
                    }
                    Err(ApiError::AlreadyExists(_)) => {
                        let name = desired.name_any();
                        match self.call(api.get(&target.namespace, &name)).await {
                            Ok(Some(found)) if is_replica_of(&found, origin) => {
                                current = Some(found);
                            }
                            Ok(Some(_)) => {
                                warn!(
                                    target.namespace = target.namespace.as_str(),
                                    target.context = ?target.context,
                                    resource.name = name.as_str(),
                                    "Refusing to overwrite an object not created by kubed"
                                );
                                return Ok(Outcome::Skipped);
                            }
                            Ok(None) => {}
                            Err(e) => return Err(self.write_error(target, e)),
                        }
                    }
                    Err(e) => return Err(self.write_error(target, e)),
                },
                Some(existing) => {
                    if content_hash(&existing) == wanted_hash {
                        return Ok(Outcome::Unchanged);
                    }
                    let mut update = desired.clone();
                    update.meta_mut().resource_version = existing.resource_version();
                    match self.call(api.replace(&target.namespace, &update)).await {
                        Ok(_) => {
                            debug!(target.namespace = target.namespace.as_str(), target.context = ?target.context, "Updated replica");
                            metrics::increment_replica_writes("update");
                            return Ok(Outcome::Updated);
                        }
                        Err(ApiError::NotFound) => {
                            debug!(replica.target = %target, "Replica vanished before update");
                            return Ok(Outcome::Unchanged);
                        }
                        Err(ApiError::Conflict(_)) => {
                            debug!(replica.target = %target, "Conflict updating replica, re-reading");
                            let name = desired.name_any();
                            match self.call(api.get(&target.namespace, &name)).await {
                                Ok(Some(found)) if is_replica_of(&found, origin) => {
                                    current = Some(found);
                                }
                                Ok(Some(_)) => return Ok(Outcome::Skipped),
                                Ok(None) => {}
                                Err(e) => return Err(self.write_error(target, e)),
                            }
                        }
                        Err(e) => return Err(self.write_error(target, e)),
                    }
                }
            }
        }
    }

    async fn delete_replica(&self, target: &Target, name: &str) -> Result<Outcome, ReconcileError> {
        let api = self.api_for(target)?;
        match self.call(api.delete(&target.namespace, name)).await {
            Ok(()) => {
                debug!(target.namespace = target.namespace.as_str(), target.context = ?target.context, "Deleted replica");
                metrics::increment_replica_writes("delete");
                Ok(Outcome::Deleted)
            }
            Err(ApiError::NotFound) => Ok(Outcome::Unchanged),
            Err(e) => Err(self.write_error(target, e)),
        }
    }

    fn api_for(&self, target: &Target) -> Result<&Arc<dyn ReplicaApi<K>>, ReconcileError> {
        match &target.context {
            None => Ok(&self.local),
            Some(context) => self
                .contexts
                .get(context)
                .ok_or_else(|| ReconcileError::UnknownContext(context.clone())),
        }
    }

    fn write_error(&self, target: &Target, error: ApiError) -> ReconcileError {
        ReconcileError::Write {
            target: target.to_string(),
            error,
        }
    }

    /// Local cluster first, then every registered context
    fn apis(&self) -> impl Iterator<Item = (Option<&str>, &Arc<dyn ReplicaApi<K>>)> {
        std::iter::once((None, &self.local)).chain(
            self.contexts
                .iter()
                .map(|(name, api)| (Some(name.as_str()), api)),
        )
    }

    async fn call<T>(&self, fut: impl Future<Output = Result<T, ApiError>>) -> Result<T, ApiError> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout(self.call_timeout)),
        }
    }
}

fn is_terminating(namespace: &Namespace) -> bool {
    namespace.metadata.deletion_timestamp.is_some()
        || namespace
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            == Some("Terminating")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CONFIG_SYNC_KEY;
    use crate::syncer::annotations::resolve;
    use crate::syncer::testing::InMemoryCluster;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn source(sync: Option<&str>) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("shared".to_string()),
                namespace: Some("src".to_string()),
                uid: Some("uid-shared".to_string()),
                annotations: sync.map(|v| BTreeMap::from([(CONFIG_SYNC_KEY.to_string(), v.to_string())])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("color".to_string(), "blue".to_string())])),
            ..Default::default()
        }
    }

    fn setup(namespaces: &[&str]) -> (Arc<InMemoryCluster<ConfigMap>>, ReplicaReconciler<ConfigMap>) {
        let cluster = Arc::new(InMemoryCluster::with_namespaces(namespaces));
        let reconciler = ReplicaReconciler::new(
            "local",
            Arc::clone(&cluster) as Arc<dyn ReplicaApi<ConfigMap>>,
            BTreeMap::new(),
            TIMEOUT,
        );
        (cluster, reconciler)
    }

    async fn run(
        reconciler: &ReplicaReconciler<ConfigMap>,
        source: Option<&ConfigMap>,
    ) -> ReconcileSummary {
        let key = SourceKey::new("src", "shared");
        let descriptor = source.map(resolve).unwrap_or(SyncDescriptor::Unsynced);
        reconciler
            .reconcile(&key, source, &descriptor, &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_all_namespaces_converges_everywhere_but_source() {
        let (cluster, reconciler) = setup(&["src", "a", "b", "c"]);
        let src = cluster.put(source(Some("")));

        let summary = run(&reconciler, Some(&src)).await;

        assert_eq!(summary.created, 3);
        assert_eq!(cluster.namespaces_with("shared"), vec!["a", "b", "c", "src"]);
        let replica = cluster.object("a", "shared").unwrap();
        assert_eq!(replica.data, src.data);
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let (cluster, reconciler) = setup(&["src", "a", "b"]);
        let src = cluster.put(source(Some("")));
        run(&reconciler, Some(&src)).await;
        cluster.take_writes();

        let summary = run(&reconciler, Some(&src)).await;

        assert_eq!(summary.writes(), 0);
        assert_eq!(summary.unchanged, 2);
        assert!(cluster.take_writes().is_empty());
    }

    #[tokio::test]
    async fn test_selector_limits_targets_and_follows_annotation_changes() {
        let (cluster, reconciler) = setup(&["src", "plain"]);
        cluster.add_namespace("labelled", &[("app", "foo")]);
        let src = cluster.put(source(Some("app=foo")));

        run(&reconciler, Some(&src)).await;
        assert_eq!(cluster.namespaces_with("shared"), vec!["labelled", "src"]);

        let src = cluster.put(source(Some("app=do-not-match")));
        run(&reconciler, Some(&src)).await;
        assert_eq!(cluster.namespaces_with("shared"), vec!["src"]);

        let src = cluster.put(source(Some("")));
        run(&reconciler, Some(&src)).await;
        assert_eq!(
            cluster.namespaces_with("shared"),
            vec!["labelled", "plain", "src"]
        );
    }

    #[tokio::test]
    async fn test_removing_annotation_cascades_but_keeps_source() {
        let (cluster, reconciler) = setup(&["src", "a", "b"]);
        let src = cluster.put(source(Some("")));
        run(&reconciler, Some(&src)).await;

        let src = cluster.put(source(None));
        let summary = run(&reconciler, Some(&src)).await;

        assert_eq!(summary.deleted, 2);
        assert_eq!(cluster.namespaces_with("shared"), vec!["src"]);
    }

    #[tokio::test]
    async fn test_source_deletion_cascades() {
        let (cluster, reconciler) = setup(&["src", "a", "b"]);
        let src = cluster.put(source(Some("")));
        run(&reconciler, Some(&src)).await;
        cluster.remove_namespace("src");

        let summary = run(&reconciler, None).await;

        assert_eq!(summary.deleted, 2);
        assert!(cluster.namespaces_with("shared").is_empty());
    }

    #[tokio::test]
    async fn test_source_namespace_removal_cascades() {
        let (cluster, reconciler) = setup(&["src", "a", "b"]);
        let src = cluster.put(source(Some("")));
        run(&reconciler, Some(&src)).await;
        cluster.remove_namespace("src");

        let summary = reconciler
            .cascade_origin_namespace("src", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.deleted, 2);
        assert!(cluster.namespaces_with("shared").is_empty());
    }

    #[tokio::test]
    async fn test_update_propagates_without_changing_membership() {
        let (cluster, reconciler) = setup(&["src", "a", "b"]);
        let src = cluster.put(source(Some("")));
        run(&reconciler, Some(&src)).await;

        let mut changed = source(Some(""));
        changed
            .data
            .as_mut()
            .unwrap()
            .insert("color".to_string(), "green".to_string());
        changed
            .labels_mut()
            .insert("tier".to_string(), "backend".to_string());
        let src = cluster.put(changed);
        let summary = run(&reconciler, Some(&src)).await;

        assert_eq!(summary.updated, 2);
        assert_eq!(summary.created + summary.deleted, 0);
        let replica = cluster.object("b", "shared").unwrap();
        assert_eq!(replica.data.as_ref().unwrap()["color"], "green");
        assert_eq!(replica.labels()["tier"], "backend");
    }

    #[tokio::test]
    async fn test_new_namespace_is_backfilled() {
        let (cluster, reconciler) = setup(&["src", "a"]);
        let src = cluster.put(source(Some("app=foo")));
        run(&reconciler, Some(&src)).await;
        assert_eq!(cluster.namespaces_with("shared"), vec!["src"]);

        cluster.add_namespace("late", &[("app", "foo")]);
        let summary = run(&reconciler, Some(&src)).await;

        assert_eq!(summary.created, 1);
        assert_eq!(cluster.namespaces_with("shared"), vec!["late", "src"]);
    }

    #[tokio::test]
    async fn test_conflict_is_retried_for_that_target_only() {
        let (cluster, reconciler) = setup(&["src", "a"]);
        let src = cluster.put(source(Some("")));
        run(&reconciler, Some(&src)).await;

        let mut changed = source(Some(""));
        changed.data = Some(BTreeMap::from([("color".to_string(), "red".to_string())]));
        let src = cluster.put(changed);
        cluster.inject_conflicts(2);
        let summary = run(&reconciler, Some(&src)).await;

        assert_eq!(summary.updated, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(cluster.object("a", "shared").unwrap().data, src.data);
    }

    #[tokio::test]
    async fn test_foreign_object_is_never_overwritten() {
        let (cluster, reconciler) = setup(&["src", "a", "b"]);
        let foreign = ConfigMap {
            metadata: ObjectMeta {
                name: Some("shared".to_string()),
                namespace: Some("a".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("mine".to_string(), "yes".to_string())])),
            ..Default::default()
        };
        cluster.put(foreign.clone());
        let src = cluster.put(source(Some("")));

        let summary = run(&reconciler, Some(&src)).await;

        assert_eq!(summary.created, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(cluster.object("a", "shared").unwrap().data, foreign.data);

        let src = cluster.put(source(None));
        run(&reconciler, Some(&src)).await;
        assert!(cluster.object("a", "shared").is_some());
        assert!(cluster.object("b", "shared").is_none());
    }

    #[tokio::test]
    async fn test_terminating_namespace_is_not_targeted() {
        let (cluster, reconciler) = setup(&["src", "a", "going"]);
        cluster.mark_terminating("going");
        let src = cluster.put(source(Some("")));

        let summary = run(&reconciler, Some(&src)).await;

        assert_eq!(summary.created, 1);
        assert_eq!(cluster.namespaces_with("shared"), vec!["a", "src"]);
    }

    #[tokio::test]
    async fn test_cluster_contexts_replicate_into_source_namespace() {
        let local = Arc::new(InMemoryCluster::<ConfigMap>::with_namespaces(&["src"]));
        let east = Arc::new(InMemoryCluster::<ConfigMap>::with_namespaces(&["src"]));
        let west = Arc::new(InMemoryCluster::<ConfigMap>::with_namespaces(&["src"]));
        let contexts = BTreeMap::from([
            ("east".to_string(), Arc::clone(&east) as Arc<dyn ReplicaApi<ConfigMap>>),
            ("west".to_string(), Arc::clone(&west) as Arc<dyn ReplicaApi<ConfigMap>>),
        ]);
        let reconciler = ReplicaReconciler::new(
            "local",
            Arc::clone(&local) as Arc<dyn ReplicaApi<ConfigMap>>,
            contexts,
            TIMEOUT,
        );
        let mut src = source(None);
        src.annotations_mut().insert(
            crate::constants::CONFIG_SYNC_CONTEXTS_KEY.to_string(),
            "east, missing".to_string(),
        );
        let src = local.put(src);

        let summary = run(&reconciler, Some(&src)).await;

        assert_eq!(summary.created, 1);
        assert!(east.object("src", "shared").is_some());
        assert!(west.object("src", "shared").is_none());

        // Retarget to west while east is unreachable: east keeps its replica for now
        let mut src = src.clone();
        src.annotations_mut().insert(
            crate::constants::CONFIG_SYNC_CONTEXTS_KEY.to_string(),
            "west".to_string(),
        );
        east.set_unreachable(true);
        let summary = run(&reconciler, Some(&src)).await;

        assert_eq!(summary.created, 1);
        assert!(west.object("src", "shared").is_some());
        east.set_unreachable(false);
        assert!(east.object("src", "shared").is_some());

        // Once reachable again, the next pass removes it
        let summary = run(&reconciler, Some(&src)).await;
        assert_eq!(summary.deleted, 1);
        assert!(east.object("src", "shared").is_none());
    }

    #[tokio::test]
    async fn test_cancelled_pass_stops_before_writing() {
        let (cluster, reconciler) = setup(&["src", "a"]);
        let src = cluster.put(source(Some("")));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = reconciler
            .reconcile(
                &SourceKey::of(&src),
                Some(&src),
                &SyncDescriptor::AllNamespaces,
                &cancel,
            )
            .await;

        assert!(matches!(result, Err(ReconcileError::Cancelled)));
        assert!(cluster.take_writes().is_empty());
        assert_eq!(cluster.reads(), 0);
    }

    #[tokio::test]
    async fn test_pass_queued_past_shutdown_makes_no_calls() {
        let (cluster, reconciler) = setup(&["src", "a"]);
        let src = cluster.put(source(Some("")));
        run(&reconciler, Some(&src)).await;
        let reads_before = cluster.reads();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = reconciler
            .reconcile(&SourceKey::of(&src), None, &SyncDescriptor::Unsynced, &cancel)
            .await;

        assert!(matches!(result, Err(ReconcileError::Cancelled)));
        assert_eq!(cluster.reads(), reads_before);
        assert!(cluster.object("a", "shared").is_some());
    }

    #[test]
    fn test_transient_reconcile_errors() {
        let write = |error| ReconcileError::Write {
            target: "a".to_string(),
            error,
        };

        assert!(write(ApiError::Unavailable("down".to_string())).is_transient());
        assert!(ReconcileError::ListNamespaces(ApiError::Timeout(TIMEOUT)).is_transient());
        assert!(!write(ApiError::Other("forbidden".to_string())).is_transient());
        assert!(!ReconcileError::UnknownContext("east".to_string()).is_transient());
        assert!(!ReconcileError::Cancelled.is_transient());
    }

    #[tokio::test]
    async fn test_own_identity_is_never_treated_as_replica() {
        let (cluster, reconciler) = setup(&["src", "a"]);
        // A peer daemon sharing our cluster name replicated into this cluster
        let peer_source = source(Some(""));
        let incoming = cluster.put(desired_replica(&peer_source, "src", "local"));

        let summary = run(&reconciler, Some(&incoming)).await;

        assert_eq!(summary.deleted, 0);
        assert_eq!(summary.writes(), 0);
        assert!(cluster.object("src", "shared").is_some());

        let summary = run(&reconciler, None).await;
        assert_eq!(summary.deleted, 0);
    }

    #[tokio::test]
    async fn test_namespace_cascade_spares_objects_inside_that_namespace() {
        let (cluster, reconciler) = setup(&["src", "a"]);
        let peer_source = source(Some(""));
        cluster.put(desired_replica(&peer_source, "src", "local"));
        cluster.put(desired_replica(&peer_source, "a", "local"));

        let summary = reconciler
            .cascade_origin_namespace("src", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.deleted, 1);
        assert_eq!(cluster.namespaces_with("shared"), vec!["src"]);
    }
}

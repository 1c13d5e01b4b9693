//! In-memory cluster used by syncer tests

use crate::syncer::api::{ApiError, ReplicaApi};
use crate::syncer::replica::SyncedKind;
use crate::syncer::selector::Selector;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, NamespaceStatus};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Mutex;

struct State<K> {
    namespaces: BTreeMap<String, Namespace>,
    objects: BTreeMap<(String, String), K>,
    next_version: u64,
    writes: Vec<String>,
    reads: usize,
    conflicts_to_inject: usize,
    unreachable: bool,
}

pub(crate) struct InMemoryCluster<K> {
    state: Mutex<State<K>>,
}

impl<K: SyncedKind> Default for InMemoryCluster<K> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                namespaces: BTreeMap::new(),
                objects: BTreeMap::new(),
                next_version: 1,
                writes: Vec::new(),
                reads: 0,
                conflicts_to_inject: 0,
                unreachable: false,
            }),
        }
    }
}

impl<K: SyncedKind> InMemoryCluster<K> {
    pub(crate) fn with_namespaces(names: &[&str]) -> Self {
        let cluster = Self::default();
        for name in names {
            cluster.add_namespace(name, &[]);
        }
        cluster
    }

    pub(crate) fn add_namespace(&self, name: &str, labels: &[(&str, &str)]) {
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        };
        self.lock().namespaces.insert(name.to_string(), namespace);
    }

    pub(crate) fn mark_terminating(&self, name: &str) {
        if let Some(namespace) = self.lock().namespaces.get_mut(name) {
            namespace.status = Some(NamespaceStatus {
                phase: Some("Terminating".to_string()),
                ..Default::default()
            });
        }
    }

    pub(crate) fn remove_namespace(&self, name: &str) {
        let mut state = self.lock();
        state.namespaces.remove(name);
        state.objects.retain(|(ns, _), _| ns != name);
    }

    /// Store an object as-is, assigning a fresh resourceVersion
    pub(crate) fn put(&self, mut object: K) -> K {
        let mut state = self.lock();
        let version = state.bump();
        object.meta_mut().resource_version = Some(version);
        let key = (object.namespace().unwrap_or_default(), object.name_any());
        state.objects.insert(key, object.clone());
        object
    }

    pub(crate) fn object(&self, namespace: &str, name: &str) -> Option<K> {
        self.lock()
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Namespaces holding an object called `name`
    pub(crate) fn namespaces_with(&self, name: &str) -> Vec<String> {
        self.lock()
            .objects
            .keys()
            .filter(|(_, n)| n == name)
            .map(|(ns, _)| ns.clone())
            .collect()
    }

    pub(crate) fn take_writes(&self) -> Vec<String> {
        std::mem::take(&mut self.lock().writes)
    }

    /// Number of list and get calls served so far
    pub(crate) fn reads(&self) -> usize {
        self.lock().reads
    }

    pub(crate) fn inject_conflicts(&self, count: usize) {
        self.lock().conflicts_to_inject = count;
    }

    pub(crate) fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State<K>> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check_reachable(state: &State<K>) -> Result<(), ApiError> {
        if state.unreachable {
            Err(ApiError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

impl<K> State<K> {
    fn bump(&mut self) -> String {
        let version = self.next_version;
        self.next_version += 1;
        version.to_string()
    }
}

#[async_trait]
impl<K: SyncedKind> ReplicaApi<K> for InMemoryCluster<K> {
    async fn list_namespaces(&self) -> Result<Vec<Namespace>, ApiError> {
        let mut state = self.lock();
        state.reads += 1;
        Self::check_reachable(&state)?;
        Ok(state.namespaces.values().cloned().collect())
    }

    async fn list(&self, label_selector: &str) -> Result<Vec<K>, ApiError> {
        let mut state = self.lock();
        state.reads += 1;
        Self::check_reachable(&state)?;
        let selector =
            Selector::parse(label_selector).map_err(|e| ApiError::Other(e.to_string()))?;
        Ok(state
            .objects
            .values()
            .filter(|o| selector.matches(o.labels()))
            .cloned()
            .collect())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, ApiError> {
        let mut state = self.lock();
        state.reads += 1;
        Self::check_reachable(&state)?;
        Ok(state
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create(&self, namespace: &str, object: &K) -> Result<K, ApiError> {
        let mut state = self.lock();
        Self::check_reachable(&state)?;
        let key = (namespace.to_string(), object.name_any());
        if !state.namespaces.contains_key(namespace) {
            return Err(ApiError::NotFound);
        }
        if state.objects.contains_key(&key) {
            return Err(ApiError::AlreadyExists(format!("{}/{}", key.0, key.1)));
        }
        let mut stored = object.clone();
        stored.meta_mut().resource_version = Some(state.bump());
        state.objects.insert(key.clone(), stored.clone());
        state.writes.push(format!("create {}/{}", key.0, key.1));
        Ok(stored)
    }

    async fn replace(&self, namespace: &str, object: &K) -> Result<K, ApiError> {
        let mut state = self.lock();
        Self::check_reachable(&state)?;
        let key = (namespace.to_string(), object.name_any());
        let Some(current_version) = state.objects.get(&key).map(|o| o.resource_version()) else {
            return Err(ApiError::NotFound);
        };
        if state.conflicts_to_inject > 0 {
            // Simulate a concurrent writer landing first
            state.conflicts_to_inject -= 1;
            let version = state.bump();
            if let Some(current) = state.objects.get_mut(&key) {
                current.meta_mut().resource_version = Some(version);
            }
            return Err(ApiError::Conflict("object has been modified".to_string()));
        }
        if current_version != object.resource_version() {
            return Err(ApiError::Conflict("object has been modified".to_string()));
        }
        let mut stored = object.clone();
        stored.meta_mut().resource_version = Some(state.bump());
        state.objects.insert(key.clone(), stored.clone());
        state.writes.push(format!("update {}/{}", key.0, key.1));
        Ok(stored)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ApiError> {
        let mut state = self.lock();
        Self::check_reachable(&state)?;
        let key = (namespace.to_string(), name.to_string());
        if state.objects.remove(&key).is_none() {
            return Err(ApiError::NotFound);
        }
        state.writes.push(format!("delete {namespace}/{name}"));
        Ok(())
    }
}

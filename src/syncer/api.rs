//! # Replica API
//!
//! The slice of the Kubernetes API the reconciler writes through, one
//! instance per cluster (local or a remote context). Kept behind a trait so
//! reconciliation can be exercised against an in-memory cluster.

use crate::syncer::replica::SyncedKind;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, Resource};
use std::marker::PhantomData;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("API server unavailable: {0}")]
    Unavailable(String),
    #[error("API request failed: {0}")]
    Other(String),
}

impl ApiError {
    /// Transient failures worth retrying on a later pass
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::Conflict(_) | ApiError::Timeout(_) | ApiError::Unavailable(_)
        )
    }
}

impl From<kube::Error> for ApiError {
    fn from(error: kube::Error) -> Self {
        match &error {
            kube::Error::Api(response) => match response.code {
                404 => ApiError::NotFound,
                409 if response.reason == "AlreadyExists" => {
                    ApiError::AlreadyExists(response.message.clone())
                }
                409 => ApiError::Conflict(response.message.clone()),
                429 | 500 | 502 | 503 | 504 => ApiError::Unavailable(response.message.clone()),
                _ => ApiError::Other(error.to_string()),
            },
            kube::Error::HyperError(_) | kube::Error::Service(_) => {
                ApiError::Unavailable(error.to_string())
            }
            _ => ApiError::Other(error.to_string()),
        }
    }
}

/// CRUD on replicas of one kind plus namespace listing, in one cluster
#[async_trait]
pub trait ReplicaApi<K: SyncedKind>: Send + Sync {
    async fn list_namespaces(&self) -> Result<Vec<Namespace>, ApiError>;

    /// List objects across all namespaces matching a label selector
    async fn list(&self, label_selector: &str) -> Result<Vec<K>, ApiError>;

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, ApiError>;

    async fn create(&self, namespace: &str, object: &K) -> Result<K, ApiError>;

    /// Replace, failing with [`ApiError::Conflict`] if `object`'s resourceVersion is stale
    async fn replace(&self, namespace: &str, object: &K) -> Result<K, ApiError>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ApiError>;
}

/// [`ReplicaApi`] backed by a real cluster
pub struct KubeReplicaApi<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for KubeReplicaApi<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K> std::fmt::Debug for KubeReplicaApi<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeReplicaApi").finish_non_exhaustive()
    }
}

impl<K: SyncedKind> KubeReplicaApi<K> {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }

    fn namespaced(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl<K> ReplicaApi<K> for KubeReplicaApi<K>
where
    K: SyncedKind + Resource<Scope = k8s_openapi::NamespaceResourceScope>,
{
    async fn list_namespaces(&self) -> Result<Vec<Namespace>, ApiError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list(&self, label_selector: &str) -> Result<Vec<K>, ApiError> {
        let api: Api<K> = Api::all(self.client.clone());
        Ok(api
            .list(&ListParams::default().labels(label_selector))
            .await?
            .items)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, ApiError> {
        Ok(self.namespaced(namespace).get_opt(name).await?)
    }

    async fn create(&self, namespace: &str, object: &K) -> Result<K, ApiError> {
        Ok(self
            .namespaced(namespace)
            .create(&PostParams::default(), object)
            .await?)
    }

    async fn replace(&self, namespace: &str, object: &K) -> Result<K, ApiError> {
        let name = object.meta().name.clone().unwrap_or_default();
        Ok(self
            .namespaced(namespace)
            .replace(&name, &PostParams::default(), object)
            .await?)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ApiError> {
        match self
            .namespaced(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

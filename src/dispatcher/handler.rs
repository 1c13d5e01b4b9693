//! # Event Handlers
//!
//! The handler interface every subsystem registers with a dispatcher, and the
//! normalized object handed to it.

use crate::dispatcher::kinds::WatchedKind;
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::TypeMeta;
use kube::ResourceExt;
use std::sync::Arc;
use thiserror::Error;

/// Error returned by a handler; logged by the dispatcher, never propagated
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("trash can: {0}")]
    Trash(#[from] crate::trash::TrashError),
    #[error("search index: {0}")]
    SearchIndex(#[from] crate::search::SearchIndexError),
    #[error("serialize object: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// An object as delivered to handlers, with its type metadata stamped
///
/// Watch payloads may omit `apiVersion`/`kind`; the dispatcher fills them in
/// from the compile-time kind before any handler sees the object.
#[derive(Debug)]
pub struct WatchedObject<K> {
    pub types: TypeMeta,
    pub object: Arc<K>,
}

impl<K> Clone for WatchedObject<K> {
    fn clone(&self) -> Self {
        Self {
            types: self.types.clone(),
            object: Arc::clone(&self.object),
        }
    }
}

impl<K: WatchedKind> WatchedObject<K> {
    #[must_use]
    pub fn new(object: Arc<K>) -> Self {
        Self {
            types: TypeMeta {
                api_version: K::api_version(&()).into_owned(),
                kind: K::kind(&()).into_owned(),
            },
            object,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.types.kind
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.object.name_any()
    }

    #[must_use]
    pub fn namespace(&self) -> Option<String> {
        self.object.namespace()
    }

    #[must_use]
    pub fn resource_version(&self) -> Option<String> {
        self.object.resource_version()
    }

    #[must_use]
    pub fn meta(&self) -> &ObjectMeta {
        self.object.meta()
    }

    /// `namespace/name`, or just `name` for cluster-scoped objects
    #[must_use]
    pub fn key(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}/{}", ns, self.name()),
            None => self.name(),
        }
    }

    /// Full JSON payload with `apiVersion` and `kind` set
    pub fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut value = serde_json::to_value(self.object.as_ref())?;
        if let Some(map) = value.as_object_mut() {
            map.insert(
                "apiVersion".to_string(),
                serde_json::Value::String(self.types.api_version.clone()),
            );
            map.insert(
                "kind".to_string(),
                serde_json::Value::String(self.types.kind.clone()),
            );
        }
        Ok(value)
    }
}

/// Add/update/delete callbacks attached to one kind's dispatcher
///
/// Handlers run in registration order for every event. A returned error is
/// logged and counted against the handler; it never stops the remaining
/// handlers or the dispatcher.
#[async_trait]
pub trait ResourceEventHandler<K: WatchedKind>: Send + Sync {
    /// Stable name used in logs and metrics
    fn name(&self) -> &'static str;

    async fn on_add(&self, _obj: &WatchedObject<K>) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Also invoked on periodic resync with `old` and `new` pointing at the same object
    async fn on_update(
        &self,
        _old: &WatchedObject<K>,
        _new: &WatchedObject<K>,
    ) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn on_delete(&self, _obj: &WatchedObject<K>) -> Result<(), HandlerError> {
        Ok(())
    }
}

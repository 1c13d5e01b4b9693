//! # Search Index
//!
//! Collaborator that keeps a searchable copy of every watched object. The
//! dispatcher reaches it through [`SearchIndexHandler`], which turns watch
//! events into [`IndexDocument`]s. Index failures are logged by the
//! dispatcher and never affect other handlers.

use crate::dispatcher::{HandlerError, ResourceEventHandler, WatchedKind, WatchedObject};
use async_trait::async_trait;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchIndexError {
    #[error("document identity changed from {old} to {new}")]
    IdentityMismatch { old: IndexKey, new: IndexKey },
    #[error("encode document: {0}")]
    Encode(#[from] serde_json::Error),
}

/// `(kind, namespace, name)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexKey {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl IndexKey {
    #[must_use]
    pub fn new(kind: &str, namespace: Option<&str>, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.map(ToString::to_string),
            name: name.to_string(),
        }
    }
}

impl std::fmt::Display for IndexKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocument {
    pub key: IndexKey,
    pub resource_version: Option<String>,
    pub payload: serde_json::Value,
}

impl IndexDocument {
    pub fn from_object<K: WatchedKind>(obj: &WatchedObject<K>) -> Result<Self, SearchIndexError> {
        Ok(Self {
            key: IndexKey {
                kind: obj.kind().to_string(),
                namespace: obj.namespace(),
                name: obj.name(),
            },
            resource_version: obj.resource_version(),
            payload: obj.payload()?,
        })
    }
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn handle_add(&self, doc: IndexDocument) -> Result<(), SearchIndexError>;

    async fn handle_update(
        &self,
        old: IndexDocument,
        new: IndexDocument,
    ) -> Result<(), SearchIndexError>;

    async fn handle_delete(&self, doc: IndexDocument) -> Result<(), SearchIndexError>;
}

/// In-process index holding the latest payload of every object
#[derive(Debug, Default)]
pub struct InMemorySearchIndex {
    documents: RwLock<HashMap<IndexKey, IndexDocument>>,
}

impl InMemorySearchIndex {
    #[must_use]
    pub fn get(&self, key: &IndexKey) -> Option<IndexDocument> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn upsert(&self, doc: IndexDocument) {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(doc.key.clone(), doc);
    }
}

#[async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn handle_add(&self, doc: IndexDocument) -> Result<(), SearchIndexError> {
        self.upsert(doc);
        Ok(())
    }

    async fn handle_update(
        &self,
        old: IndexDocument,
        new: IndexDocument,
    ) -> Result<(), SearchIndexError> {
        if old.key != new.key {
            return Err(SearchIndexError::IdentityMismatch {
                old: old.key,
                new: new.key,
            });
        }
        self.upsert(new);
        Ok(())
    }

    async fn handle_delete(&self, doc: IndexDocument) -> Result<(), SearchIndexError> {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&doc.key);
        Ok(())
    }
}

/// Adapts a [`SearchIndex`] to one kind's dispatcher
pub struct SearchIndexHandler<K> {
    index: Arc<dyn SearchIndex>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> std::fmt::Debug for SearchIndexHandler<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchIndexHandler").finish_non_exhaustive()
    }
}

impl<K> SearchIndexHandler<K> {
    #[must_use]
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self {
            index,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K: WatchedKind> ResourceEventHandler<K> for SearchIndexHandler<K> {
    fn name(&self) -> &'static str {
        "search-index"
    }

    async fn on_add(&self, obj: &WatchedObject<K>) -> Result<(), HandlerError> {
        self.index.handle_add(IndexDocument::from_object(obj)?).await?;
        Ok(())
    }

    async fn on_update(
        &self,
        old: &WatchedObject<K>,
        new: &WatchedObject<K>,
    ) -> Result<(), HandlerError> {
        self.index
            .handle_update(IndexDocument::from_object(old)?, IndexDocument::from_object(new)?)
            .await?;
        Ok(())
    }

    async fn on_delete(&self, obj: &WatchedObject<K>) -> Result<(), HandlerError> {
        self.index.handle_delete(IndexDocument::from_object(obj)?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;
    use kube::api::ObjectMeta;

    fn secret(name: &str, rv: &str) -> WatchedObject<Secret> {
        WatchedObject::new(Arc::new(Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("team-a".to_string()),
                resource_version: Some(rv.to_string()),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn test_handler_tracks_object_lifecycle() {
        let index = Arc::new(InMemorySearchIndex::default());
        let handler = SearchIndexHandler::<Secret>::new(Arc::clone(&index) as Arc<dyn SearchIndex>);
        let key = IndexKey::new("Secret", Some("team-a"), "creds");

        handler.on_add(&secret("creds", "1")).await.unwrap();
        assert_eq!(index.get(&key).unwrap().resource_version.as_deref(), Some("1"));

        handler
            .on_update(&secret("creds", "1"), &secret("creds", "2"))
            .await
            .unwrap();
        let doc = index.get(&key).unwrap();
        assert_eq!(doc.resource_version.as_deref(), Some("2"));
        assert_eq!(doc.payload["kind"], "Secret");
        assert_eq!(index.len(), 1);

        handler.on_delete(&secret("creds", "2")).await.unwrap();
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_update_rejects_identity_change() {
        let index = InMemorySearchIndex::default();
        let old = IndexDocument::from_object(&secret("a", "1")).unwrap();
        let new = IndexDocument::from_object(&secret("b", "1")).unwrap();

        let err = index.handle_update(old, new).await.unwrap_err();

        assert!(matches!(err, SearchIndexError::IdentityMismatch { .. }));
        assert!(index.is_empty());
    }
}

//! # Search Index Tests
//!
//! The in-process index through its collaborator interface.

use kubed::search::{IndexDocument, IndexKey, InMemorySearchIndex, SearchIndex, SearchIndexError};
use serde_json::json;

fn doc(kind: &str, namespace: Option<&str>, name: &str, rv: &str) -> IndexDocument {
    IndexDocument {
        key: IndexKey::new(kind, namespace, name),
        resource_version: Some(rv.to_string()),
        payload: json!({"kind": kind, "metadata": {"name": name, "resourceVersion": rv}}),
    }
}

#[tokio::test]
async fn test_documents_are_keyed_by_kind_namespace_and_name() {
    let index = InMemorySearchIndex::default();

    index.handle_add(doc("ConfigMap", Some("a"), "app", "1")).await.unwrap();
    index.handle_add(doc("Secret", Some("a"), "app", "1")).await.unwrap();
    index.handle_add(doc("ConfigMap", Some("b"), "app", "1")).await.unwrap();
    index.handle_add(doc("Namespace", None, "a", "1")).await.unwrap();

    assert_eq!(index.len(), 4);
    assert!(index.get(&IndexKey::new("Namespace", None, "a")).is_some());
    assert!(index.get(&IndexKey::new("ConfigMap", Some("c"), "app")).is_none());
}

#[tokio::test]
async fn test_add_is_idempotent_and_update_replaces() {
    let index = InMemorySearchIndex::default();
    let key = IndexKey::new("ConfigMap", Some("a"), "app");

    index.handle_add(doc("ConfigMap", Some("a"), "app", "1")).await.unwrap();
    index.handle_add(doc("ConfigMap", Some("a"), "app", "1")).await.unwrap();
    index
        .handle_update(
            doc("ConfigMap", Some("a"), "app", "1"),
            doc("ConfigMap", Some("a"), "app", "2"),
        )
        .await
        .unwrap();

    assert_eq!(index.len(), 1);
    let stored = index.get(&key).unwrap();
    assert_eq!(stored.resource_version.as_deref(), Some("2"));
    assert_eq!(stored.payload["metadata"]["resourceVersion"], "2");
}

#[tokio::test]
async fn test_delete_of_unknown_document_is_ok() {
    let index = InMemorySearchIndex::default();

    index.handle_delete(doc("Secret", Some("a"), "ghost", "1")).await.unwrap();

    assert!(index.is_empty());
}

#[tokio::test]
async fn test_identity_change_is_rejected() {
    let index = InMemorySearchIndex::default();
    index.handle_add(doc("Secret", Some("a"), "x", "1")).await.unwrap();

    let err = index
        .handle_update(doc("Secret", Some("a"), "x", "1"), doc("Secret", Some("b"), "x", "2"))
        .await
        .unwrap_err();

    assert!(matches!(err, SearchIndexError::IdentityMismatch { .. }));
    assert!(err.to_string().contains("Secret/a/x"));
    assert_eq!(
        index
            .get(&IndexKey::new("Secret", Some("a"), "x"))
            .unwrap()
            .resource_version
            .as_deref(),
        Some("1")
    );
}

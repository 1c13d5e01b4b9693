//! # Replicas
//!
//! How a replica is derived from its source, how it points back at the
//! source, and how its content is compared.
//!
//! A replica carries three origin labels (source name, namespace, cluster)
//! so every replica of a source can be listed with one label query, plus an
//! origin annotation holding the exact source identity. Label values longer
//! than a label allows are shortened with a hash suffix; the annotation is
//! what ownership is finally checked against.

use crate::constants::{
    CONFIG_SYNC_CONTEXTS_KEY, CONFIG_SYNC_KEY, CONTENT_HASH_ANNOTATION, LAST_APPLIED_ANNOTATION,
    ORIGIN_ANNOTATION, ORIGIN_CLUSTER_LABEL, ORIGIN_NAMESPACE_LABEL, ORIGIN_NAME_LABEL,
};
use crate::dispatcher::WatchedKind;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const MAX_LABEL_VALUE_LEN: usize = 63;
const LABEL_HASH_LEN: usize = 8;

/// A kind whose content can be replicated
pub trait SyncedKind: WatchedKind + Default {
    /// The replicated payload fields as JSON
    fn content(&self) -> serde_json::Value;

    /// Overwrite this object's payload fields with `source`'s
    fn copy_content_from(&mut self, source: &Self);
}

impl SyncedKind for ConfigMap {
    fn content(&self) -> serde_json::Value {
        serde_json::json!({
            "data": self.data,
            "binaryData": self.binary_data,
        })
    }

    fn copy_content_from(&mut self, source: &Self) {
        self.data.clone_from(&source.data);
        self.binary_data.clone_from(&source.binary_data);
        self.immutable = None;
    }
}

impl SyncedKind for Secret {
    fn content(&self) -> serde_json::Value {
        serde_json::json!({
            "data": self.data,
            "type": self.type_,
        })
    }

    fn copy_content_from(&mut self, source: &Self) {
        self.data.clone_from(&source.data);
        self.type_.clone_from(&source.type_);
        self.immutable = None;
    }
}

/// Identity of the source a replica was derived from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Source resourceVersion the replica was last written from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    pub cluster: String,
}

impl Origin {
    #[must_use]
    pub fn of<K: SyncedKind>(source: &K, cluster: &str) -> Self {
        Self {
            name: source.name_any(),
            namespace: source.namespace().unwrap_or_default(),
            uid: source.uid(),
            resource_version: source.resource_version(),
            cluster: cluster.to_string(),
        }
    }

    /// Parse the origin annotation of a replica
    #[must_use]
    pub fn from_replica<K: SyncedKind>(replica: &K) -> Option<Self> {
        replica
            .annotations()
            .get(ORIGIN_ANNOTATION)
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    #[must_use]
    pub fn same_source(&self, other: &Origin) -> bool {
        self.name == other.name
            && self.namespace == other.namespace
            && self.cluster == other.cluster
    }
}

/// Shorten `value` to fit a label value, keeping it unique via a hash suffix
#[must_use]
pub fn label_value(value: &str) -> String {
    if value.len() <= MAX_LABEL_VALUE_LEN {
        return value.to_string();
    }
    let digest = format!("{:x}", Sha256::digest(value.as_bytes()));
    let keep = MAX_LABEL_VALUE_LEN - LABEL_HASH_LEN - 1;
    let mut cut = keep;
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}-{}", &value[..cut], &digest[..LABEL_HASH_LEN])
}

/// Back-reference labels stamped on every replica of a source
#[must_use]
pub fn origin_labels(name: &str, namespace: &str, cluster: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (ORIGIN_NAME_LABEL.to_string(), label_value(name)),
        (ORIGIN_NAMESPACE_LABEL.to_string(), label_value(namespace)),
        (ORIGIN_CLUSTER_LABEL.to_string(), label_value(cluster)),
    ])
}

/// Label query listing every replica of a source
#[must_use]
pub fn origin_selector(name: &str, namespace: &str, cluster: &str) -> String {
    join_selector(&origin_labels(name, namespace, cluster))
}

/// Label query listing every replica whose source lived in `namespace`
#[must_use]
pub fn origin_namespace_selector(namespace: &str, cluster: &str) -> String {
    join_selector(&BTreeMap::from([
        (ORIGIN_NAMESPACE_LABEL.to_string(), label_value(namespace)),
        (ORIGIN_CLUSTER_LABEL.to_string(), label_value(cluster)),
    ]))
}

fn join_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Source labels that are copied to replicas
#[must_use]
pub fn user_labels<K: SyncedKind>(object: &K) -> BTreeMap<String, String> {
    object
        .labels()
        .iter()
        .filter(|(k, _)| !is_origin_label(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Source annotations that are copied to replicas
#[must_use]
pub fn user_annotations<K: SyncedKind>(object: &K) -> BTreeMap<String, String> {
    object
        .annotations()
        .iter()
        .filter(|(k, _)| !is_reserved_annotation(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn is_origin_label(key: &str) -> bool {
    matches!(
        key,
        ORIGIN_NAME_LABEL | ORIGIN_NAMESPACE_LABEL | ORIGIN_CLUSTER_LABEL
    )
}

fn is_reserved_annotation(key: &str) -> bool {
    matches!(
        key,
        CONFIG_SYNC_KEY
            | CONFIG_SYNC_CONTEXTS_KEY
            | ORIGIN_ANNOTATION
            | CONTENT_HASH_ANNOTATION
            | LAST_APPLIED_ANNOTATION
    )
}

/// SHA-256 over the replicated content, user labels and user annotations
///
/// A source and a faithful replica of it hash the same.
#[must_use]
pub fn content_hash<K: SyncedKind>(object: &K) -> String {
    let canonical = serde_json::json!({
        "content": object.content(),
        "labels": user_labels(object),
        "annotations": user_annotations(object),
    });
    format!("{:x}", Sha256::digest(canonical.to_string().as_bytes()))
}

/// The replica of `source` that should exist in `target_namespace`
#[must_use]
pub fn desired_replica<K: SyncedKind>(source: &K, target_namespace: &str, cluster: &str) -> K {
    let origin = Origin::of(source, cluster);
    let mut labels = user_labels(source);
    labels.extend(origin_labels(&origin.name, &origin.namespace, cluster));

    let mut annotations = user_annotations(source);
    if let Ok(raw) = serde_json::to_string(&origin) {
        annotations.insert(ORIGIN_ANNOTATION.to_string(), raw);
    }
    annotations.insert(CONTENT_HASH_ANNOTATION.to_string(), content_hash(source));

    let mut replica = K::default();
    replica.copy_content_from(source);
    let meta = replica.meta_mut();
    meta.name = Some(origin.name);
    meta.namespace = Some(target_namespace.to_string());
    meta.labels = Some(labels);
    meta.annotations = Some(annotations);
    replica
}

/// Whether `existing` is a replica of the source identified by `origin`
///
/// An object with the source's name but without matching back-references is
/// foreign and must be left alone.
#[must_use]
pub fn is_replica_of<K: SyncedKind>(existing: &K, origin: &Origin) -> bool {
    let expected = origin_labels(&origin.name, &origin.namespace, &origin.cluster);
    let labels = existing.labels();
    let labelled = expected.iter().all(|(k, v)| labels.get(k) == Some(v));
    if !labelled {
        return false;
    }
    match Origin::from_replica(existing) {
        Some(recorded) => recorded.same_source(origin),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn source() -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("app-config".to_string()),
                namespace: Some("team-a".to_string()),
                uid: Some("uid-1".to_string()),
                resource_version: Some("42".to_string()),
                labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
                annotations: Some(BTreeMap::from([
                    (CONFIG_SYNC_KEY.to_string(), String::new()),
                    (LAST_APPLIED_ANNOTATION.to_string(), "{}".to_string()),
                    ("team".to_string(), "a".to_string()),
                ])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("k".to_string(), "v".to_string())])),
            ..Default::default()
        }
    }

    #[test]
    fn test_desired_replica_metadata() {
        let replica = desired_replica(&source(), "team-b", "prod");

        assert_eq!(replica.metadata.name.as_deref(), Some("app-config"));
        assert_eq!(replica.metadata.namespace.as_deref(), Some("team-b"));
        assert_eq!(replica.data, source().data);

        let labels = replica.labels();
        assert_eq!(labels["app"], "web");
        assert_eq!(labels[ORIGIN_NAME_LABEL], "app-config");
        assert_eq!(labels[ORIGIN_NAMESPACE_LABEL], "team-a");
        assert_eq!(labels[ORIGIN_CLUSTER_LABEL], "prod");

        let annotations = replica.annotations();
        assert_eq!(annotations["team"], "a");
        assert!(!annotations.contains_key(CONFIG_SYNC_KEY));
        assert!(!annotations.contains_key(LAST_APPLIED_ANNOTATION));
        assert_eq!(annotations[CONTENT_HASH_ANNOTATION], content_hash(&source()));

        let origin = Origin::from_replica(&replica).unwrap();
        assert_eq!(origin.resource_version.as_deref(), Some("42"));
        assert_eq!(origin.uid.as_deref(), Some("uid-1"));
    }

    #[test]
    fn test_source_and_replica_hash_equal() {
        let src = source();
        let replica = desired_replica(&src, "team-b", "prod");

        assert_eq!(content_hash(&src), content_hash(&replica));
    }

    #[test]
    fn test_hash_tracks_data_labels_and_annotations() {
        let base = content_hash(&source());

        let mut data_changed = source();
        data_changed
            .data
            .as_mut()
            .unwrap()
            .insert("k".to_string(), "v2".to_string());
        assert_ne!(content_hash(&data_changed), base);

        let mut label_changed = source();
        label_changed
            .labels_mut()
            .insert("tier".to_string(), "1".to_string());
        assert_ne!(content_hash(&label_changed), base);

        let mut annotation_changed = source();
        annotation_changed
            .annotations_mut()
            .insert("team".to_string(), "b".to_string());
        assert_ne!(content_hash(&annotation_changed), base);

        let mut version_changed = source();
        version_changed.metadata.resource_version = Some("43".to_string());
        assert_eq!(content_hash(&version_changed), base);
    }

    #[test]
    fn test_foreign_object_is_not_a_replica() {
        let origin = Origin::of(&source(), "prod");
        let foreign = ConfigMap {
            metadata: ObjectMeta {
                name: Some("app-config".to_string()),
                namespace: Some("team-b".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(!is_replica_of(&foreign, &origin));
        assert!(is_replica_of(
            &desired_replica(&source(), "team-b", "prod"),
            &origin
        ));
    }

    #[test]
    fn test_long_label_values_are_shortened() {
        let name = "x".repeat(200);
        let value = label_value(&name);

        assert_eq!(value.len(), MAX_LABEL_VALUE_LEN);
        assert_ne!(value, label_value(&"y".repeat(200)));
        assert_eq!(label_value("short"), "short");
    }

    #[test]
    fn test_secret_content_includes_type() {
        let mut a = Secret::default();
        a.type_ = Some("Opaque".to_string());
        let mut b = a.clone();
        b.type_ = Some("kubernetes.io/tls".to_string());

        assert_ne!(content_hash(&a), content_hash(&b));
    }
}

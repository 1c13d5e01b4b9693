//! # Annotation Resolver Tests
//!
//! These tests verify:
//! - Priority between the contexts and sync annotations
//! - Legacy and empty sync values
//! - Malformed selectors degrade to unsynced

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use kubed::constants::{CONFIG_SYNC_CONTEXTS_KEY, CONFIG_SYNC_KEY};
use kubed::syncer::annotations::{parse_context_list, resolve, resolve_annotations};
use kubed::syncer::{Selector, SyncDescriptor};
use std::collections::{BTreeMap, BTreeSet};

fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn resolve_pairs(pairs: &[(&str, &str)]) -> SyncDescriptor {
    resolve_annotations(Some(&annotations(pairs)), "default/app")
}

#[test]
fn test_no_annotations_is_unsynced() {
    assert_eq!(resolve_annotations(None, "default/app"), SyncDescriptor::Unsynced);
    assert_eq!(resolve_pairs(&[("team", "a")]), SyncDescriptor::Unsynced);
}

#[test]
fn test_empty_and_legacy_values_mean_all_namespaces() {
    assert_eq!(resolve_pairs(&[(CONFIG_SYNC_KEY, "")]), SyncDescriptor::AllNamespaces);
    assert_eq!(resolve_pairs(&[(CONFIG_SYNC_KEY, "true")]), SyncDescriptor::AllNamespaces);
    assert_eq!(resolve_pairs(&[(CONFIG_SYNC_KEY, "  ")]), SyncDescriptor::AllNamespaces);
}

#[test]
fn test_selector_value() {
    let descriptor = resolve_pairs(&[(CONFIG_SYNC_KEY, "app=foo,env in (prod,stage)")]);

    let SyncDescriptor::NamespaceSelector(selector) = descriptor else {
        panic!("expected a selector, got {descriptor}");
    };
    assert!(selector.matches(&annotations(&[("app", "foo"), ("env", "prod")])));
    assert!(!selector.matches(&annotations(&[("app", "foo"), ("env", "dev")])));
}

#[test]
fn test_malformed_selector_is_unsynced() {
    assert_eq!(
        resolve_pairs(&[(CONFIG_SYNC_KEY, "app in (foo")]),
        SyncDescriptor::Unsynced
    );
    assert_eq!(
        resolve_pairs(&[(CONFIG_SYNC_KEY, "bad key=value")]),
        SyncDescriptor::Unsynced
    );
}

#[test]
fn test_contexts_win_over_sync() {
    let descriptor = resolve_pairs(&[
        (CONFIG_SYNC_KEY, "app=foo"),
        (CONFIG_SYNC_CONTEXTS_KEY, "west, east,,west"),
    ]);

    assert_eq!(
        descriptor,
        SyncDescriptor::ClusterContexts(BTreeSet::from(["east".to_string(), "west".to_string()]))
    );
    assert!(!descriptor.is_namespace_scoped());
}

#[test]
fn test_blank_contexts_fall_back_to_sync() {
    let descriptor = resolve_pairs(&[(CONFIG_SYNC_KEY, ""), (CONFIG_SYNC_CONTEXTS_KEY, " , ")]);

    assert_eq!(descriptor, SyncDescriptor::AllNamespaces);
    assert!(descriptor.is_namespace_scoped());
}

#[test]
fn test_resolve_reads_object_metadata() {
    let cm = ConfigMap {
        metadata: ObjectMeta {
            name: Some("app".to_string()),
            namespace: Some("default".to_string()),
            annotations: Some(annotations(&[(CONFIG_SYNC_KEY, "env=prod")])),
            ..Default::default()
        },
        ..Default::default()
    };

    assert_eq!(
        resolve(&cm),
        SyncDescriptor::NamespaceSelector(Selector::parse("env=prod").unwrap())
    );
}

#[test]
fn test_parse_context_list() {
    assert!(parse_context_list("").is_empty());
    assert_eq!(parse_context_list("a,b , a").len(), 2);
}

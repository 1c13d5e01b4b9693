//! # Watched Kinds
//!
//! The resource kinds the daemon watches, each with an explicit comparator
//! that decides whether an update is semantically meaningful. Status and
//! bookkeeping churn (resourceVersion, managedFields, status) never counts.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// A kind a [`WatchDispatcher`](crate::dispatcher::WatchDispatcher) can serve
pub trait WatchedKind:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// True when `old` and `new` differ only in fields that do not matter
    fn semantically_equal(old: &Self, new: &Self) -> bool;
}

/// Label/annotation maps compare equal when one is absent and the other empty
#[must_use]
pub fn maps_equal<V: PartialEq>(
    a: Option<&BTreeMap<String, V>>,
    b: Option<&BTreeMap<String, V>>,
) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        (Some(m), None) | (None, Some(m)) => m.is_empty(),
        (None, None) => true,
    }
}

fn metadata_equal<K: Resource>(old: &K, new: &K) -> bool {
    maps_equal(old.meta().labels.as_ref(), new.meta().labels.as_ref())
        && maps_equal(
            old.meta().annotations.as_ref(),
            new.meta().annotations.as_ref(),
        )
}

impl WatchedKind for ConfigMap {
    fn semantically_equal(old: &Self, new: &Self) -> bool {
        metadata_equal(old, new)
            && maps_equal(old.data.as_ref(), new.data.as_ref())
            && maps_equal(old.binary_data.as_ref(), new.binary_data.as_ref())
    }
}

impl WatchedKind for Secret {
    fn semantically_equal(old: &Self, new: &Self) -> bool {
        metadata_equal(old, new)
            && maps_equal(old.data.as_ref(), new.data.as_ref())
            && old.type_ == new.type_
    }
}

impl WatchedKind for Namespace {
    fn semantically_equal(old: &Self, new: &Self) -> bool {
        metadata_equal(old, new)
    }
}

impl WatchedKind for Deployment {
    fn semantically_equal(old: &Self, new: &Self) -> bool {
        metadata_equal(old, new) && old.spec == new.spec
    }
}

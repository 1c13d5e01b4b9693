//! # Annotation Resolver
//!
//! Turns the sync-control annotations on a source object into the target set
//! it should be replicated into. Resolution is pure and total: malformed
//! input degrades to [`SyncDescriptor::Unsynced`] with a warning.

use crate::constants::{CONFIG_SYNC_CONTEXTS_KEY, CONFIG_SYNC_KEY, LEGACY_SYNC_VALUE};
use crate::syncer::selector::Selector;
use kube::Resource;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::warn;

/// Declarative target set of a source object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncDescriptor {
    Unsynced,
    /// Every namespace except the source's own
    AllNamespaces,
    /// Every namespace whose labels match, except the source's own
    NamespaceSelector(Selector),
    /// The source's namespace in each named remote context
    ClusterContexts(BTreeSet<String>),
}

impl SyncDescriptor {
    #[must_use]
    pub fn is_synced(&self) -> bool {
        !matches!(self, SyncDescriptor::Unsynced)
    }

    /// True when the target set depends on which namespaces exist
    #[must_use]
    pub fn is_namespace_scoped(&self) -> bool {
        matches!(
            self,
            SyncDescriptor::AllNamespaces | SyncDescriptor::NamespaceSelector(_)
        )
    }
}

impl fmt::Display for SyncDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDescriptor::Unsynced => write!(f, "unsynced"),
            SyncDescriptor::AllNamespaces => write!(f, "all-namespaces"),
            SyncDescriptor::NamespaceSelector(selector) => write!(f, "selector({selector})"),
            SyncDescriptor::ClusterContexts(contexts) => {
                let names = contexts.iter().cloned().collect::<Vec<_>>();
                write!(f, "contexts({})", names.join(","))
            }
        }
    }
}

/// Resolve an object's sync annotations
///
/// Priority:
/// 1. a non-empty `sync-contexts` list wins
/// 2. `sync` empty or `"true"` means every namespace
/// 3. any other `sync` value is a namespace label selector
/// 4. otherwise unsynced
#[must_use]
pub fn resolve<K: Resource>(object: &K) -> SyncDescriptor {
    let meta = object.meta();
    let key = format!(
        "{}/{}",
        meta.namespace.as_deref().unwrap_or_default(),
        meta.name.as_deref().unwrap_or_default()
    );
    resolve_annotations(meta.annotations.as_ref(), &key)
}

/// Resolve raw annotations; `source` only labels warnings
#[must_use]
pub fn resolve_annotations(
    annotations: Option<&BTreeMap<String, String>>,
    source: &str,
) -> SyncDescriptor {
    let Some(annotations) = annotations else {
        return SyncDescriptor::Unsynced;
    };

    if let Some(raw) = annotations.get(CONFIG_SYNC_CONTEXTS_KEY) {
        let contexts = parse_context_list(raw);
        if !contexts.is_empty() {
            return SyncDescriptor::ClusterContexts(contexts);
        }
    }

    let Some(value) = annotations.get(CONFIG_SYNC_KEY) else {
        return SyncDescriptor::Unsynced;
    };
    let value = value.trim();
    if value.is_empty() || value == LEGACY_SYNC_VALUE {
        return SyncDescriptor::AllNamespaces;
    }

    match Selector::parse(value) {
        Ok(selector) if selector.is_empty() => SyncDescriptor::AllNamespaces,
        Ok(selector) => SyncDescriptor::NamespaceSelector(selector),
        Err(e) => {
            warn!(
                resource.key = source,
                annotation = CONFIG_SYNC_KEY,
                value = value,
                "Ignoring malformed namespace selector: {}",
                e
            );
            SyncDescriptor::Unsynced
        }
    }
}

/// Split a comma-separated context list, dropping blanks and duplicates
#[must_use]
pub fn parse_context_list(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use kubed::prelude::*;
//! ```

// Dispatcher and handler interface
pub use crate::dispatcher::{
    HandlerError, ResourceEventHandler, RestartPolicy, WatchDispatcher, WatchedKind,
    WatchedObject,
};

// Config syncer
pub use crate::syncer::{
    ApiError, ConfigSyncer, NamespaceWatcher, ReconcileError, ReconcileSummary, ReplicaApi,
    ReplicaReconciler, Selector, SourceKey, SyncDescriptor, SyncedKind, Target,
};

// Collaborators
pub use crate::cluster::ClusterContextRegistry;
pub use crate::search::{InMemorySearchIndex, SearchIndex, SearchIndexError};
pub use crate::trash::{TrashCan, TrashEntry, TrashError, TrashedObject};

// Config types
pub use crate::config::{ClusterConfig, ConfigError, DaemonConfig};

//! # Constants
//!
//! Shared constants used throughout the daemon.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Sync-enable annotation on a source ConfigMap/Secret
/// Value is empty, the legacy literal `"true"`, or a label selector expression
pub const CONFIG_SYNC_KEY: &str = "kubed.appscode.com/sync";

/// Cross-cluster annotation on a source ConfigMap/Secret
/// Value is a comma-separated list of kubeconfig context names
pub const CONFIG_SYNC_CONTEXTS_KEY: &str = "kubed.appscode.com/sync-contexts";

/// Legacy sync annotation value, read as "all namespaces"
pub const LEGACY_SYNC_VALUE: &str = "true";

/// Replica back-reference label: source name
pub const ORIGIN_NAME_LABEL: &str = "kubed.appscode.com/origin.name";

/// Replica back-reference label: source namespace
pub const ORIGIN_NAMESPACE_LABEL: &str = "kubed.appscode.com/origin.namespace";

/// Replica back-reference label: cluster the source lives in
pub const ORIGIN_CLUSTER_LABEL: &str = "kubed.appscode.com/origin.cluster";

/// Replica annotation carrying the JSON origin record
pub const ORIGIN_ANNOTATION: &str = "kubed.appscode.com/origin";

/// Replica annotation carrying the content hash written with the replica
pub const CONTENT_HASH_ANNOTATION: &str = "kubed.appscode.com/content-hash";

/// Client-side apply bookkeeping that must not leak into replicas
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Default cluster name used in origin labels
pub const DEFAULT_CLUSTER_NAME: &str = "kubed";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 56790;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default full resync period for every watched kind
pub const DEFAULT_RESYNC_PERIOD_SECS: u64 = 5 * 60;

/// Default recycle bin retention window
pub const DEFAULT_RECYCLE_BIN_TTL_SECS: u64 = 7 * 24 * 3600;

/// Default interval between recycle bin sweeps
pub const DEFAULT_RECYCLE_BIN_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Default per-call timeout for API writes (bounds remote cluster stalls)
pub const DEFAULT_REMOTE_CALL_TIMEOUT_SECS: u64 = 10;

/// Default watch backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default watch backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Directory name used in the recycle bin for cluster-scoped objects
pub const CLUSTER_SCOPED_DIR: &str = "_cluster";

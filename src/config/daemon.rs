//! # Daemon Configuration
//!
//! Process-level settings loaded from environment variables, then layered
//! with the cluster config file and command-line overrides.

use crate::config::cluster::ClusterConfig;
use crate::config::duration::parse_duration;
use crate::constants::*;
use std::path::PathBuf;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable text
    Text,
    /// One JSON document per line
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Daemon-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Name of the local cluster, stamped on replica origin labels
    pub cluster_name: String,
    /// Whether ConfigMap/Secret replication runs at all
    pub enable_config_syncer: bool,
    /// Kubeconfig holding the remote cluster contexts
    pub kube_config_file: Option<PathBuf>,
    /// Full resync period for every watched kind (zero disables resync)
    pub resync_period: Duration,
    /// Recycle bin directory; `None` disables the trash can
    pub recycle_bin_path: Option<PathBuf>,
    /// Retention window for trashed snapshots
    pub recycle_bin_ttl: Duration,
    /// Interval between expired-snapshot sweeps
    pub recycle_bin_sweep_interval: Duration,
    /// Snapshot the previous object on semantically meaningful updates
    pub recycle_bin_handle_updates: bool,
    /// Feed watched objects into the search index
    pub enable_search_index: bool,
    /// HTTP port for metrics and probes
    pub metrics_port: u16,
    /// How long to wait for the HTTP server to bind
    pub server_startup_timeout: Duration,
    /// Poll interval while waiting for the HTTP server
    pub server_poll_interval: Duration,
    /// Per-call timeout for API reads and writes during reconciliation
    pub remote_call_timeout: Duration,
    /// Watch backoff starting value (milliseconds)
    pub backoff_start_ms: u64,
    /// Watch backoff maximum value (milliseconds)
    pub backoff_max_ms: u64,
    /// Watch restart delay after unknown errors
    pub watch_restart_delay: Duration,
    /// Watch restart delay after a stream ends
    pub watch_restart_delay_after_end: Duration,
    /// Log format
    pub log_format: LogFormat,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            enable_config_syncer: true,
            kube_config_file: None,
            resync_period: Duration::from_secs(DEFAULT_RESYNC_PERIOD_SECS),
            recycle_bin_path: None,
            recycle_bin_ttl: Duration::from_secs(DEFAULT_RECYCLE_BIN_TTL_SECS),
            recycle_bin_sweep_interval: Duration::from_secs(
                DEFAULT_RECYCLE_BIN_SWEEP_INTERVAL_SECS,
            ),
            recycle_bin_handle_updates: false,
            enable_search_index: false,
            metrics_port: DEFAULT_METRICS_PORT,
            server_startup_timeout: Duration::from_secs(DEFAULT_SERVER_STARTUP_TIMEOUT_SECS),
            server_poll_interval: Duration::from_millis(DEFAULT_SERVER_POLL_INTERVAL_MS),
            remote_call_timeout: Duration::from_secs(DEFAULT_REMOTE_CALL_TIMEOUT_SECS),
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            watch_restart_delay: Duration::from_secs(DEFAULT_WATCH_RESTART_DELAY_SECS),
            watch_restart_delay_after_end: Duration::from_secs(
                DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            ),
            log_format: LogFormat::Text,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cluster_name: env_var_or_default_str("CLUSTER_NAME", &defaults.cluster_name),
            enable_config_syncer: env_var_or_default_bool(
                "ENABLE_CONFIG_SYNCER",
                defaults.enable_config_syncer,
            ),
            kube_config_file: std::env::var("KUBECONFIG_FILE").ok().map(PathBuf::from),
            resync_period: env_var_duration_or_default("RESYNC_PERIOD", defaults.resync_period),
            recycle_bin_path: std::env::var("RECYCLE_BIN_PATH").ok().map(PathBuf::from),
            recycle_bin_ttl: env_var_duration_or_default(
                "RECYCLE_BIN_TTL",
                defaults.recycle_bin_ttl,
            ),
            recycle_bin_sweep_interval: env_var_duration_or_default(
                "RECYCLE_BIN_SWEEP_INTERVAL",
                defaults.recycle_bin_sweep_interval,
            ),
            recycle_bin_handle_updates: env_var_or_default_bool(
                "RECYCLE_BIN_HANDLE_UPDATES",
                defaults.recycle_bin_handle_updates,
            ),
            enable_search_index: env_var_or_default_bool(
                "ENABLE_SEARCH_INDEX",
                defaults.enable_search_index,
            ),
            metrics_port: env_var_or_default("METRICS_PORT", defaults.metrics_port),
            server_startup_timeout: Duration::from_secs(env_var_or_default(
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            )),
            server_poll_interval: Duration::from_millis(env_var_or_default(
                "SERVER_POLL_INTERVAL_MS",
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            )),
            remote_call_timeout: Duration::from_secs(env_var_or_default(
                "REMOTE_CALL_TIMEOUT_SECS",
                DEFAULT_REMOTE_CALL_TIMEOUT_SECS,
            )),
            backoff_start_ms: env_var_or_default("BACKOFF_START_MS", DEFAULT_BACKOFF_START_MS),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            watch_restart_delay: Duration::from_secs(env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            )),
            watch_restart_delay_after_end: Duration::from_secs(env_var_or_default(
                "WATCH_RESTART_DELAY_AFTER_END_SECS",
                DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            )),
            log_format: LogFormat::parse(&env_var_or_default_str("LOG_FORMAT", "text")),
        }
    }

    /// Layer the cluster config file on top of the environment
    ///
    /// Only fields present in the file take effect.
    pub fn apply_cluster_config(&mut self, cluster: &ClusterConfig) {
        if let Some(name) = &cluster.cluster_name {
            self.cluster_name.clone_from(name);
        }
        if let Some(enabled) = cluster.enable_config_syncer {
            self.enable_config_syncer = enabled;
        }
        if let Some(path) = &cluster.kube_config_file {
            self.kube_config_file = Some(path.clone());
        }
        if let Some(bin) = &cluster.recycle_bin {
            self.recycle_bin_path = Some(bin.path.clone());
            if let Some(ttl) = bin.ttl {
                self.recycle_bin_ttl = ttl;
            }
            if let Some(handle_updates) = bin.handle_updates {
                self.recycle_bin_handle_updates = handle_updates;
            }
        }
        if let Some(enabled) = cluster.search_index.as_ref().and_then(|s| s.enabled) {
            self.enable_search_index = enabled;
        }
    }

    /// Watch restart backoff starting value
    #[must_use]
    pub fn backoff_start_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_start_ms)
    }

    /// Watch restart backoff maximum value
    #[must_use]
    pub fn backoff_max_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read environment variable as a duration string or return default
fn env_var_duration_or_default(key: &str, default: Duration) -> Duration {
    match std::env::var(key) {
        Ok(value) => match parse_duration(&value) {
            Ok(duration) => duration,
            Err(e) => {
                tracing::warn!("Ignoring {}: {}", key, e);
                default
            }
        },
        Err(_) => default,
    }
}

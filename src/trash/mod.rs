//! # Trash Can
//!
//! A recycle bin for deleted objects. Every qualifying delete (and, when
//! enabled, every semantically meaningful update) writes an immutable YAML
//! snapshot under the configured path:
//!
//! ```text
//! <root>/<lowercase-kind>/<namespace or _cluster>/<name>.<unix nanos>.yaml
//! ```
//!
//! Snapshots are never overwritten. Deleting a recreated object again
//! produces another file next to the first, each addressable by its stamp.
//! A background sweeper purges snapshots older than the retention window.

pub mod handler;

pub use handler::TrashCanHandler;

use crate::config::DaemonConfig;
use crate::constants::CLUSTER_SCOPED_DIR;
use crate::observability::metrics;
use chrono::{DateTime, TimeDelta, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::TypeMeta;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use walkdir::WalkDir;

const SNAPSHOT_EXTENSION: &str = "yaml";

#[derive(Debug, Error)]
pub enum TrashError {
    #[error("i/o on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encode snapshot: {0}")]
    Encode(#[from] serde_yaml::Error),
    #[error("object has no name")]
    MissingName,
    #[error("timestamp {0} cannot be expressed in nanoseconds")]
    TimestampOutOfRange(DateTime<Utc>),
}

impl TrashError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrashReason {
    Deleted,
    Updated,
}

/// The document stored for every snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrashedObject {
    pub kind: String,
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    pub deletion_timestamp: DateTime<Utc>,
    pub reason: TrashReason,
    pub object: serde_json::Value,
}

/// Address of one snapshot on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrashEntry {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    pub stamp_nanos: i64,
    pub path: PathBuf,
}

impl TrashEntry {
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.stamp_nanos)
    }

    /// Rebuild an entry from a snapshot path below `root`
    fn from_path(root: &Path, path: &Path) -> Option<Self> {
        let relative = path.strip_prefix(root).ok()?;
        let mut parts = relative.components().map(|c| c.as_os_str().to_str());
        let kind = parts.next()??;
        let scope = parts.next()??;
        let file = parts.next()??;
        if parts.next().is_some() {
            return None;
        }

        let stem = file.strip_suffix(SNAPSHOT_EXTENSION)?.strip_suffix('.')?;
        let (name, stamp) = stem.rsplit_once('.')?;
        let stamp_nanos = stamp.parse::<i64>().ok()?;
        if name.is_empty() {
            return None;
        }

        Some(Self {
            kind: kind.to_string(),
            namespace: (scope != CLUSTER_SCOPED_DIR).then(|| scope.to_string()),
            name: name.to_string(),
            stamp_nanos,
            path: path.to_path_buf(),
        })
    }
}

#[derive(Debug)]
pub struct TrashCan {
    root: PathBuf,
    ttl: Duration,
    sweep_interval: Duration,
}

impl TrashCan {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, ttl: Duration, sweep_interval: Duration) -> Self {
        Self {
            root: root.into(),
            ttl,
            sweep_interval,
        }
    }

    /// `None` when no recycle-bin path is configured
    #[must_use]
    pub fn from_config(config: &DaemonConfig) -> Option<Self> {
        config.recycle_bin_path.as_ref().map(|path| {
            Self::new(
                path.clone(),
                config.recycle_bin_ttl,
                config.recycle_bin_sweep_interval,
            )
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Snapshot a deleted object
    pub fn delete(
        &self,
        types: &TypeMeta,
        meta: &ObjectMeta,
        object: &serde_json::Value,
    ) -> Result<TrashEntry, TrashError> {
        self.record_at(types, meta, object, TrashReason::Deleted, Utc::now())
    }

    /// Snapshot the object an update replaced
    pub fn update(
        &self,
        types: &TypeMeta,
        old_meta: &ObjectMeta,
        old_object: &serde_json::Value,
    ) -> Result<TrashEntry, TrashError> {
        self.record_at(types, old_meta, old_object, TrashReason::Updated, Utc::now())
    }

    /// Write a snapshot stamped `at`, never replacing an existing file
    pub fn record_at(
        &self,
        types: &TypeMeta,
        meta: &ObjectMeta,
        object: &serde_json::Value,
        reason: TrashReason,
        at: DateTime<Utc>,
    ) -> Result<TrashEntry, TrashError> {
        let name = meta.name.clone().ok_or(TrashError::MissingName)?;
        let kind = types.kind.to_lowercase();
        let dir = self.scope_dir(&kind, meta.namespace.as_deref());
        fs::create_dir_all(&dir).map_err(|e| TrashError::io(&dir, e))?;

        let mut stamp_nanos = at
            .timestamp_nanos_opt()
            .ok_or(TrashError::TimestampOutOfRange(at))?;

        let (path, mut file) = loop {
            let path = dir.join(format!("{name}.{stamp_nanos}.{SNAPSHOT_EXTENSION}"));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => stamp_nanos += 1,
                Err(e) => return Err(TrashError::io(&path, e)),
            }
        };

        let document = TrashedObject {
            kind: types.kind.clone(),
            api_version: types.api_version.clone(),
            namespace: meta.namespace.clone(),
            name: name.clone(),
            deletion_timestamp: DateTime::from_timestamp_nanos(stamp_nanos),
            reason,
            object: object.clone(),
        };
        let written = serde_yaml::to_string(&document)
            .map_err(TrashError::from)
            .and_then(|encoded| {
                file.write_all(encoded.as_bytes())
                    .and_then(|()| file.sync_all())
                    .map_err(|e| TrashError::io(&path, e))
            });
        if let Err(e) = written {
            // A half-written snapshot would fail every later load
            let _ = fs::remove_file(&path);
            return Err(e);
        }

        metrics::increment_trash_snapshots();
        debug!(
            resource.kind = types.kind.as_str(),
            resource.namespace = meta.namespace.as_deref().unwrap_or_default(),
            resource.name = name.as_str(),
            path = %path.display(),
            "Stored trash snapshot"
        );

        Ok(TrashEntry {
            kind,
            namespace: meta.namespace.clone(),
            name,
            stamp_nanos,
            path,
        })
    }

    /// Snapshots of one identity, oldest first
    pub fn list(
        &self,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Vec<TrashEntry>, TrashError> {
        let dir = self.scope_dir(&kind.to_lowercase(), namespace);
        let read_dir = match fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TrashError::io(&dir, e)),
        };

        let mut entries = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry.map_err(|e| TrashError::io(&dir, e))?;
            if let Some(entry) = TrashEntry::from_path(&self.root, &dir_entry.path()) {
                if entry.name == name {
                    entries.push(entry);
                }
            }
        }
        entries.sort_by_key(|e| e.stamp_nanos);
        Ok(entries)
    }

    /// Every snapshot in the bin, oldest first
    #[must_use]
    pub fn entries(&self) -> Vec<TrashEntry> {
        let mut entries: Vec<TrashEntry> = WalkDir::new(&self.root)
            .min_depth(3)
            .max_depth(3)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| TrashEntry::from_path(&self.root, e.path()))
            .collect();
        entries.sort_by_key(|e| e.stamp_nanos);
        entries
    }

    /// Read a snapshot back for recovery
    pub fn load(&self, entry: &TrashEntry) -> Result<TrashedObject, TrashError> {
        let raw = fs::read_to_string(&entry.path).map_err(|e| TrashError::io(&entry.path, e))?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Remove snapshots older than the retention window, returning how many
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, TrashError> {
        let ttl = TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        let mut purged = 0;

        for entry in self.entries() {
            if now.signed_duration_since(entry.timestamp()) <= ttl {
                continue;
            }
            match fs::remove_file(&entry.path) {
                Ok(()) => purged += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(TrashError::io(&entry.path, e)),
            }
        }

        if purged > 0 {
            metrics::increment_trash_purged(purged);
        }
        Ok(purged)
    }

    /// Purge expired snapshots every sweep interval until `shutdown` fires
    ///
    /// A zero sweep interval disables the sweeper; snapshots are then kept
    /// until removed by hand.
    pub async fn run_sweeper(self: Arc<Self>, shutdown: CancellationToken) {
        let span = tracing::info_span!("trash.sweeper", root = %self.root.display());
        async move {
            if self.sweep_interval.is_zero() {
                warn!("Trash sweep interval is zero, expired snapshots will not be purged");
                return;
            }
            info!(
                ttl = ?self.ttl,
                interval = ?self.sweep_interval,
                "Starting trash sweeper"
            );
            let mut interval = tokio::time::interval(self.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let trash = Arc::clone(&self);
                match tokio::task::spawn_blocking(move || trash.purge_expired(Utc::now())).await {
                    Ok(Ok(0)) => {}
                    Ok(Ok(purged)) => info!(purged, "Purged expired trash snapshots"),
                    Ok(Err(e)) => warn!("Trash sweep failed: {}", e),
                    Err(e) => error!("Trash sweep task panicked: {}", e),
                }
            }
            info!("Trash sweeper stopped");
        }
        .instrument(span)
        .await;
    }

    fn scope_dir(&self, kind: &str, namespace: Option<&str>) -> PathBuf {
        self.root
            .join(kind)
            .join(namespace.unwrap_or(CLUSTER_SCOPED_DIR))
    }
}

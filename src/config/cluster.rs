//! # Cluster Config File
//!
//! YAML file passed with `--clusterconfig`.
//!
//! ```yaml
//! clusterName: prod-east
//! enableConfigSyncer: true
//! kubeConfigFile: /srv/kubed/kubeconfig
//! recycleBin:
//!   path: /tmp/kubed/trash
//!   ttl: 168h
//!   handleUpdates: false
//! searchIndex:
//!   enabled: true
//! ```

use crate::config::duration::parse_duration;
use crate::config::ConfigError;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Parsed cluster config file
///
/// Every field is optional; absent fields keep the environment value.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    #[serde(default)]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub enable_config_syncer: Option<bool>,
    #[serde(default)]
    pub kube_config_file: Option<PathBuf>,
    #[serde(default)]
    pub recycle_bin: Option<RecycleBinSpec>,
    #[serde(default)]
    pub search_index: Option<SearchIndexSpec>,
}

/// Recycle bin settings
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecycleBinSpec {
    /// Directory snapshots are written to
    pub path: PathBuf,
    /// Retention window, e.g. `168h`
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub ttl: Option<Duration>,
    /// Snapshot the previous object on meaningful updates as well as deletes
    #[serde(default)]
    pub handle_updates: Option<bool>,
}

/// Search index settings
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchIndexSpec {
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl ClusterConfig {
    /// Parse a cluster config document
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse the cluster config file at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(name) = &self.cluster_name {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "clusterName must not be empty".to_string(),
                ));
            }
        }
        if let Some(bin) = &self.recycle_bin {
            if bin.path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(
                    "recycleBin.path must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|value| parse_duration(&value).map_err(serde::de::Error::custom))
        .transpose()
}

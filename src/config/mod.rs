//! # Configuration
//!
//! - `daemon`: environment-driven daemon settings
//! - `cluster`: the YAML cluster config file
//! - `duration`: `<number><unit>` duration strings

pub mod cluster;
pub mod daemon;
pub mod duration;

pub use cluster::{ClusterConfig, RecycleBinSpec, SearchIndexSpec};
pub use daemon::{DaemonConfig, LogFormat};
pub use duration::{format_duration, parse_duration};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

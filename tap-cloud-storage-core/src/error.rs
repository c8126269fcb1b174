//! Error types shared by the core crate.
//!
//! Every fallible operation in the core returns one of these. The CLI crate
//! wraps them in `anyhow` with context at the process boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Problems with the configuration file. All of them are fatal before any
/// remote call is made.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("config field `{field}` is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("target_dir {} does not exist or is not a directory", path.display())]
    TargetDir { path: PathBuf },
    #[error("incremental_mode is enabled but no state file path was given")]
    MissingStatePath,
}

/// Failures talking to the object store or writing a downloaded object.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("service account credentials rejected: {reason}")]
    Credentials { reason: String },
    #[error("malformed object listing: {0}")]
    Listing(String),
    #[error("failed to write {}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Failures reading or writing the state file.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to read state file {}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("state file {} is not valid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("state file {} holds a malformed bookmarks section: {source}", path.display())]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write state file {}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialise state: {0}")]
    Serialise(#[from] serde_json::Error),
}

/// Errors that abort a download run.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to list objects under prefix `{prefix}`")]
    List {
        prefix: String,
        source: StorageError,
    },
    #[error("failed to download `{key}`")]
    Object { key: String, source: StorageError },
    #[error(transparent)]
    State(#[from] StateError),
}

//! Top-level pipeline: run the download engine, then persist state.
//!
//! # Responsibilities
//! - Refuse to start an incremental run that has nowhere to write its state
//! - Run one pass of [`download::run`]
//! - In incremental mode, write the complete state once, after every object
//!   was processed; a failed pass writes nothing
//!
//! # Callable From
//! - The CLI crate and integration tests, with any [`ObjectStorage`]
//!   implementation

use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::config::TapConfig;
use crate::contract::ObjectStorage;
use crate::download::{self, DownloadReport};
use crate::error::{ConfigError, DownloadError};
use crate::state::State;

#[derive(Debug, Clone, PartialEq)]
pub struct SynchroniseReport {
    pub download: DownloadReport,
    /// Where the state was written; `None` outside incremental mode.
    pub state_path: Option<PathBuf>,
}

/// Entrypoint: download according to `config`, persisting state to
/// `state_path` in incremental mode.
pub async fn synchronise<S>(
    config: &TapConfig,
    storage: &S,
    state: State,
    state_path: Option<&Path>,
) -> Result<SynchroniseReport, DownloadError>
where
    S: ObjectStorage + ?Sized,
{
    let state_path = match (config.incremental_mode, state_path) {
        (true, None) => {
            error!("[SYNC] Incremental mode requires a state file path");
            return Err(ConfigError::MissingStatePath.into());
        }
        (true, Some(path)) => Some(path),
        (false, _) => None,
    };

    let report = download::run(config, storage, state).await?;

    if let Some(path) = state_path {
        report.state.persist(path).map_err(|e| {
            error!(error = %e, state_path = %path.display(), "[SYNC] Failed to write state");
            e
        })?;
        info!(
            state_path = %path.display(),
            bookmarks = report.state.bookmarks.len(),
            "[SYNC] State written"
        );
    }

    Ok(SynchroniseReport {
        download: report,
        state_path: state_path.map(Path::to_path_buf),
    })
}

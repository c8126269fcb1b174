//! Incremental download engine.
//!
//! One sequential pass over the objects under `path_prefix`: folder
//! placeholders are skipped, every other object lands in `target_dir` under
//! its basename. In incremental mode each object first goes through
//! [`decide`] against its bookmark, and downloaded objects get their bookmark
//! moved to the remote timestamp.

use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::config::TapConfig;
use crate::contract::{ObjectStorage, RemoteObject};
use crate::error::DownloadError;
use crate::state::State;

/// Outcome of the bookmark decision rule for one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No bookmark yet.
    New,
    /// Remote timestamp is strictly newer than the bookmark.
    Updated,
    /// Remote timestamp is equal to or older than the bookmark.
    Unchanged,
}

impl Decision {
    pub fn should_download(self) -> bool {
        !matches!(self, Decision::Unchanged)
    }
}

/// Bookmark decision rule. Equal timestamps count as unchanged.
pub fn decide(object: &RemoteObject, state: &State) -> Decision {
    let Some(bookmark) = state.bookmark(&object.key) else {
        return Decision::New;
    };
    if object.updated > bookmark.replication_key_value.with_timezone(&Utc) {
        Decision::Updated
    } else {
        Decision::Unchanged
    }
}

/// Local destination for `object`: `target_dir` joined with the key's
/// basename. Keys sharing a basename map to the same file.
pub fn target_path(target_dir: &Path, object: &RemoteObject) -> PathBuf {
    target_dir.join(object.basename())
}

/// What a run did, plus the state it ended with.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DownloadReport {
    pub downloaded: Vec<String>,
    pub unchanged: Vec<String>,
    pub directories_skipped: usize,
    pub state: State,
}

/// Run one pass of the engine.
///
/// Any listing or download failure aborts the pass immediately; the returned
/// error carries the key being processed. Files already written stay on disk.
pub async fn run<S>(
    config: &TapConfig,
    storage: &S,
    mut state: State,
) -> Result<DownloadReport, DownloadError>
where
    S: ObjectStorage + ?Sized,
{
    info!(
        bucket = %config.bucket,
        path_prefix = %config.path_prefix,
        incremental_mode = config.incremental_mode,
        "[DOWNLOAD] Downloading data"
    );

    let objects = storage
        .list_objects(&config.path_prefix)
        .await
        .map_err(|source| {
            error!(error = %source, path_prefix = %config.path_prefix, "[DOWNLOAD] Listing failed");
            DownloadError::List {
                prefix: config.path_prefix.clone(),
                source,
            }
        })?;
    debug!(objects = objects.len(), "[DOWNLOAD] Listing complete");

    let mut report = DownloadReport::default();

    for object in &objects {
        if object.is_directory_placeholder() {
            debug!(key = %object.key, "[DOWNLOAD] Skipping directory placeholder");
            report.directories_skipped += 1;
            continue;
        }

        let target = target_path(&config.target_dir, object);

        if config.incremental_mode {
            let decision = decide(object, &state);
            if !decision.should_download() {
                info!(key = %object.key, "[DOWNLOAD] Ignored, no updates since last run");
                report.unchanged.push(object.key.clone());
                continue;
            }
            info!(
                key = %object.key,
                target = %target.display(),
                ?decision,
                "[DOWNLOAD] Downloading incremental"
            );
            fetch(storage, object, &target).await?;
            state.set_bookmark(&object.key, object.updated);
        } else {
            debug!(
                bucket = %config.bucket,
                key = %object.key,
                target = %target.display(),
                "[DOWNLOAD] Downloading"
            );
            fetch(storage, object, &target).await?;
        }
        report.downloaded.push(object.key.clone());
    }

    info!(
        downloaded = report.downloaded.len(),
        unchanged = report.unchanged.len(),
        directories_skipped = report.directories_skipped,
        "[DOWNLOAD] Data downloaded"
    );
    report.state = state;
    Ok(report)
}

async fn fetch<S>(storage: &S, object: &RemoteObject, target: &Path) -> Result<(), DownloadError>
where
    S: ObjectStorage + ?Sized,
{
    storage
        .download_to_file(object, target)
        .await
        .map_err(|source| {
            error!(key = %object.key, error = %source, "[DOWNLOAD] Download failed, aborting run");
            DownloadError::Object {
                key: object.key.clone(),
                source,
            }
        })
}

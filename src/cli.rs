///
/// This module implements the CLI interface for tap-cloud-storage: argument
/// parsing and the async entrypoint that wires config, state, the GCS client
/// and the download engine together.
///
/// All decision logic (bookmarks, state persistence) lives in the
/// [`tap-cloud-storage-core`] crate. This module is glue only.
///
/// ## How To Use
/// - Command line: `tap-cloud-storage --config config.json [--state state.json]`.
/// - Programmatic/integration use: call [`run`] with a constructed [`Cli`].
///
/// [`tap-cloud-storage-core`]: ../../tap-cloud-storage-core/
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use tap_cloud_storage_core::error::ConfigError;
use tap_cloud_storage_core::synchronise::{synchronise, SynchroniseReport};

use crate::load_config::{load_config, load_state};
use crate::storage::GcsClient;

/// Download objects from a Google Cloud Storage bucket into a local directory.
#[derive(Parser, Debug)]
#[clap(
    name = "tap-cloud-storage",
    version,
    about = "Download objects from a Google Cloud Storage bucket, optionally only those changed since the last run"
)]
pub struct Cli {
    /// Path to the JSON config file
    #[clap(short, long)]
    pub config: PathBuf,

    /// Path to the JSON state file; read if present, rewritten in incremental mode
    #[clap(short, long)]
    pub state: Option<PathBuf>,
}

/// Async CLI entrypoint for main() and integration tests.
pub async fn run(cli: Cli) -> Result<SynchroniseReport> {
    tracing::info!("trace_initialised");

    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;

    let state_path = cli.state.as_deref();
    if config.incremental_mode && state_path.is_none() {
        return Err(ConfigError::MissingStatePath)
            .context("Pass --state to run in incremental mode");
    }

    // Outside incremental mode the state file is neither read nor written.
    let state = if config.incremental_mode {
        load_state(state_path).context("Failed to load state")?
    } else {
        Default::default()
    };

    let storage = GcsClient::from_config(&config).context("Failed to construct storage client")?;

    match synchronise(&config, &storage, state, state_path).await {
        Ok(report) => {
            tracing::info!(
                downloaded = report.download.downloaded.len(),
                unchanged = report.download.unchanged.len(),
                "Run complete"
            );
            Ok(report)
        }
        Err(e) => {
            tracing::error!(error = %e, "Run failed");
            Err(anyhow::Error::new(e).context("Download run failed"))
        }
    }
}

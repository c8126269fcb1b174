/// `load_config` module: reads the JSON config and state files and hands the
/// engine strongly-typed [`TapConfig`] and [`State`] values.
///
/// This is the only place where user-supplied files are parsed.
///
/// # Responsibilities
/// - Read and validate the config; every failure is a [`ConfigError`] naming
///   the file or field at fault
/// - Read the state file, normalising a missing or non-object file to the
///   empty state (see [`State::load`])
///
/// # Errors
/// Typed errors from the core crate; the CLI adds context with `anyhow`.
use std::fs;
use std::path::Path;
use tracing::{error, info};

use tap_cloud_storage_core::config::TapConfig;
use tap_cloud_storage_core::error::{ConfigError, StateError};
use tap_cloud_storage_core::state::State;

/// Load and validate the tap config at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<TapConfig, ConfigError> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(ConfigError::Read {
                path: path_ref.to_path_buf(),
                source: e,
            });
        }
    };

    match TapConfig::from_json(path_ref, &config_content) {
        Ok(config) => {
            config.trace_loaded();
            Ok(config)
        }
        Err(e) => {
            error!(error = %e, config_path = ?path_ref, "Invalid config");
            Err(e)
        }
    }
}

/// Load the state file, or the empty state when no path was given.
pub fn load_state(path: Option<&Path>) -> Result<State, StateError> {
    match path {
        Some(path) => State::load(path),
        None => {
            info!("No state file given, starting from empty state");
            Ok(State::default())
        }
    }
}

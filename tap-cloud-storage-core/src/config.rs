use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::ConfigError;

/// Tap configuration as read from the JSON config file.
///
/// The same file often doubles as the service-account key for the storage
/// client, so unknown fields are ignored rather than rejected.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TapConfig {
    pub bucket: String,
    pub path_prefix: String,
    pub target_dir: PathBuf,
    #[serde(default)]
    pub incremental_mode: bool,
    /// OAuth2 bearer token for the storage API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Base URL of the storage API, e.g. a local emulator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_email: Option<String>,
    /// PEM-encoded RSA key of the service account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_uri: Option<String>,
}

/// Service-account credentials carried in the config file.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ServiceAccountKey<'a> {
    pub client_email: &'a str,
    pub private_key: &'a str,
    pub token_uri: Option<&'a str>,
}

impl fmt::Debug for ServiceAccountKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for TapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TapConfig")
            .field("bucket", &self.bucket)
            .field("path_prefix", &self.path_prefix)
            .field("target_dir", &self.target_dir)
            .field("incremental_mode", &self.incremental_mode)
            .field("access_token_set", &self.access_token.is_some())
            .field("storage_endpoint", &self.storage_endpoint)
            .field("client_email", &self.client_email)
            .field("private_key_set", &self.private_key.is_some())
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl TapConfig {
    /// Parse and validate a config document.
    pub fn from_json(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let config: TapConfig =
            serde_json::from_str(content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the fields serde cannot check on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::InvalidField {
                field: "bucket",
                reason: "must not be empty".into(),
            });
        }
        if let Some(endpoint) = &self.storage_endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(ConfigError::InvalidField {
                    field: "storage_endpoint",
                    reason: format!("`{endpoint}` is not an http(s) URL"),
                });
            }
        }
        match (&self.client_email, &self.private_key) {
            (Some(_), None) => {
                return Err(ConfigError::InvalidField {
                    field: "private_key",
                    reason: "required when client_email is set".into(),
                })
            }
            (None, Some(_)) => {
                return Err(ConfigError::InvalidField {
                    field: "client_email",
                    reason: "required when private_key is set".into(),
                })
            }
            _ => {}
        }
        if !self.target_dir.is_dir() {
            return Err(ConfigError::TargetDir {
                path: self.target_dir.clone(),
            });
        }
        Ok(())
    }

    /// The service-account key, when the config carries one.
    pub fn service_account(&self) -> Option<ServiceAccountKey<'_>> {
        match (&self.client_email, &self.private_key) {
            (Some(client_email), Some(private_key)) => Some(ServiceAccountKey {
                client_email,
                private_key,
                token_uri: self.token_uri.as_deref(),
            }),
            _ => None,
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            bucket = %self.bucket,
            path_prefix = %self.path_prefix,
            target_dir = %self.target_dir.display(),
            incremental_mode = self.incremental_mode,
            "Loaded tap config"
        );
        debug!(
            access_token_set = self.access_token.is_some(),
            service_account = ?self.client_email,
            storage_endpoint = ?self.storage_endpoint,
            "Storage client settings"
        );
    }
}

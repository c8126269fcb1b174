//! # contract: the object-storage interface the download engine runs against
//!
//! The engine never talks to a storage service directly. It enumerates and
//! fetches objects through [`ObjectStorage`], which is implemented by the GCS
//! client in the CLI crate and by `mockall` mocks in tests.
//!
//! ## Mocking & Testing
//! - The trait is annotated for `mockall`; `MockObjectStorage` is exported
//!   with the default `test-export-mocks` feature so dependent crates can use
//!   it in their own tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use std::path::Path;

use crate::error::StorageError;

/// One object as reported by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Full object name, may contain `/`.
    pub key: String,
    /// Last-modification time as reported by the storage service.
    pub updated: DateTime<Utc>,
    pub size: u64,
}

impl RemoteObject {
    pub fn new(key: impl Into<String>, updated: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            updated,
            size: 0,
        }
    }

    /// Keys ending in `/` are folder placeholders, not content.
    pub fn is_directory_placeholder(&self) -> bool {
        self.key.ends_with('/')
    }

    /// Final `/`-separated segment of the key.
    pub fn basename(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Enumerate and fetch objects from a single bucket.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// List every object whose key starts with `prefix`, in whatever order the
    /// service returns them.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<RemoteObject>, StorageError>;

    /// Write the content of `object` to `target`, creating or truncating it.
    async fn download_to_file(
        &self,
        object: &RemoteObject,
        target: &Path,
    ) -> Result<(), StorageError>;
}

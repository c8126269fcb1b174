#![doc = "Google Cloud Storage client: implements the core `ObjectStorage` contract over the Cloud Storage JSON API."]
//
//! # GCS client
//!
//! [`GcsClient`] lists objects with `GET /storage/v1/b/{bucket}/o` (following
//! `nextPageToken`) and downloads them with `alt=media`, streaming the body
//! into the destination file.
//!
//! ## Settings
//! - Endpoint: `storage_endpoint` from the config, else `STORAGE_EMULATOR_HOST`,
//!   else `https://storage.googleapis.com`.
//! - Auth: `access_token` from the config, else the config's service-account
//!   key (see [`crate::auth`]), else `GOOGLE_OAUTH_ACCESS_TOKEN` (e.g. the
//!   output of `gcloud auth print-access-token`). Without any of them requests
//!   are anonymous, which works for public buckets and emulators.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::{RequestBuilder, Url};
use serde::Deserialize;
use std::env;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use tap_cloud_storage_core::config::{ServiceAccountKey, TapConfig};
use tap_cloud_storage_core::contract::{ObjectStorage, RemoteObject};
use tap_cloud_storage_core::error::StorageError;

use crate::auth::ServiceAccountTokens;

pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
pub const EMULATOR_HOST_ENV: &str = "STORAGE_EMULATOR_HOST";

enum Auth {
    Anonymous,
    Bearer(String),
    ServiceAccount(ServiceAccountTokens),
}

pub struct GcsClient {
    http: reqwest::Client,
    endpoint: Url,
    bucket: String,
    auth: Auth,
}

impl std::fmt::Debug for GcsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("bucket", &self.bucket)
            .field("auth", &self.auth_method())
            .finish()
    }
}

impl GcsClient {
    pub fn new(
        bucket: impl Into<String>,
        endpoint: &str,
        access_token: Option<String>,
    ) -> Result<Self, StorageError> {
        let with_scheme = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("http://{endpoint}")
        };
        let endpoint = Url::parse(&with_scheme).map_err(|e| StorageError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(StorageError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: "not a base URL".into(),
            });
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("tap-cloud-storage/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StorageError::Transport {
                url: endpoint.to_string(),
                source: Box::new(e),
            })?;
        let auth = match access_token {
            Some(token) => Auth::Bearer(token),
            None => Auth::Anonymous,
        };
        Ok(Self {
            http,
            endpoint,
            bucket: bucket.into(),
            auth,
        })
    }

    /// Authenticate with a service-account key instead. The first request
    /// exchanges the key for an access token.
    pub fn with_service_account(
        mut self,
        key: ServiceAccountKey<'_>,
    ) -> Result<Self, StorageError> {
        self.auth = Auth::ServiceAccount(ServiceAccountTokens::new(self.http.clone(), key)?);
        Ok(self)
    }

    /// Build a client from the tap config, falling back to the environment
    /// for endpoint and token.
    pub fn from_config(config: &TapConfig) -> Result<Self, StorageError> {
        let endpoint = config
            .storage_endpoint
            .clone()
            .or_else(|| non_empty_env(EMULATOR_HOST_ENV))
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let client = match (&config.access_token, config.service_account()) {
            (Some(token), _) => Self::new(config.bucket.clone(), &endpoint, Some(token.clone()))?,
            (None, Some(key)) => {
                Self::new(config.bucket.clone(), &endpoint, None)?.with_service_account(key)?
            }
            (None, None) => {
                Self::new(config.bucket.clone(), &endpoint, non_empty_env(ACCESS_TOKEN_ENV))?
            }
        };
        tracing::info!(
            endpoint = %client.endpoint,
            bucket = %client.bucket,
            auth = client.auth_method(),
            "Initialised GCS client"
        );
        Ok(client)
    }

    pub fn auth_method(&self) -> &'static str {
        match &self.auth {
            Auth::Anonymous => "anonymous",
            Auth::Bearer(_) => "access_token",
            Auth::ServiceAccount(_) => "service_account",
        }
    }

    /// `{endpoint}/storage/v1/b/{bucket}/o`
    pub fn objects_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["storage", "v1", "b", self.bucket.as_str(), "o"]);
        }
        url
    }

    /// `{endpoint}/storage/v1/b/{bucket}/o/{key}`, with `/` in the key
    /// percent-encoded.
    pub fn object_url(&self, key: &str) -> Url {
        let mut url = self.objects_url();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(key);
        }
        url
    }

    async fn authorize(&self, req: RequestBuilder) -> Result<RequestBuilder, StorageError> {
        Ok(match &self.auth {
            Auth::Anonymous => req,
            Auth::Bearer(token) => req.bearer_auth(token),
            Auth::ServiceAccount(tokens) => req.bearer_auth(tokens.token().await?),
        })
    }

    async fn send(
        &self,
        req: RequestBuilder,
        url: &Url,
    ) -> Result<reqwest::Response, StorageError> {
        let resp = self
            .authorize(req)
            .await?
            .send()
            .await
            .map_err(|e| transport(url, e))?;
        ensure_success(resp, url).await
    }
}

/// Turn a non-success response into `StorageError::Status`, keeping the body.
pub(crate) async fn ensure_success(
    resp: reqwest::Response,
    url: &Url,
) -> Result<reqwest::Response, StorageError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp
        .text()
        .await
        .unwrap_or_else(|_| String::from("<failed to decode response body>"));
    tracing::error!(url = %url, status = %status, body = %body, "Storage API returned error");
    Err(StorageError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ObjectStorage for GcsClient {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<RemoteObject>, StorageError> {
        let url = self.objects_url();
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("prefix", prefix.to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let resp = self.send(self.http.get(url.clone()).query(&query), &url).await?;
            let body = resp.text().await.map_err(|e| transport(&url, e))?;
            let page = parse_listing(&body)?;
            tracing::debug!(
                items = page.items.len(),
                more = page.next_page_token.is_some(),
                "Fetched listing page"
            );
            for item in page.items {
                objects.push(item.into_remote_object()?);
            }
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        tracing::info!(bucket = %self.bucket, prefix = %prefix, objects = objects.len(), "Listed objects");
        Ok(objects)
    }

    async fn download_to_file(
        &self,
        object: &RemoteObject,
        target: &Path,
    ) -> Result<(), StorageError> {
        let url = self.object_url(&object.key);
        let resp = self
            .send(self.http.get(url.clone()).query(&[("alt", "media")]), &url)
            .await?;

        let write_err = |source: std::io::Error| StorageError::Write {
            path: target.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::create(target).await.map_err(write_err)?;
        let mut stream = resp.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| transport(&url, e))?;
            file.write_all(&chunk).await.map_err(write_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(write_err)?;

        tracing::debug!(key = %object.key, target = %target.display(), bytes = written, "Object written");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    #[serde(default)]
    items: Vec<ObjectResource>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectResource {
    name: String,
    updated: DateTime<Utc>,
    /// The JSON API encodes uint64 values as strings.
    #[serde(default)]
    size: Option<String>,
}

impl ObjectResource {
    fn into_remote_object(self) -> Result<RemoteObject, StorageError> {
        let size = match self.size.as_deref() {
            None => 0,
            Some(raw) => raw.parse::<u64>().map_err(|e| {
                let name = &self.name;
                StorageError::Listing(format!("object `{name}` has invalid size `{raw}`: {e}"))
            })?,
        };
        Ok(RemoteObject {
            key: self.name,
            updated: self.updated,
            size,
        })
    }
}

fn parse_listing(body: &str) -> Result<ListPage, StorageError> {
    serde_json::from_str(body).map_err(|e| StorageError::Listing(e.to_string()))
}

pub(crate) fn transport(url: &Url, e: reqwest::Error) -> StorageError {
    StorageError::Transport {
        url: url.to_string(),
        source: Box::new(e),
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

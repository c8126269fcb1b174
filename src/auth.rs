//! Access tokens for a service-account key, via the OAuth2 JWT bearer grant.
//!
//! The key's `client_email` signs a short-lived RS256 assertion which the
//! token endpoint trades for a bearer token. Tokens are cached and fetched
//! again a minute before they expire.

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use tap_cloud_storage_core::config::ServiceAccountKey;
use tap_cloud_storage_core::error::StorageError;

use crate::storage::{ensure_success, transport};

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const READ_ONLY_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_only";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

pub struct ServiceAccountTokens {
    http: reqwest::Client,
    client_email: String,
    key: EncodingKey,
    token_uri: Url,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokens {
    pub fn new(http: reqwest::Client, key: ServiceAccountKey<'_>) -> Result<Self, StorageError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| {
            StorageError::Credentials {
                reason: format!("private_key is not an RSA PEM key: {e}"),
            }
        })?;
        let raw_uri = key.token_uri.unwrap_or(DEFAULT_TOKEN_URI);
        let token_uri = Url::parse(raw_uri).map_err(|e| StorageError::Credentials {
            reason: format!("invalid token_uri `{raw_uri}`: {e}"),
        })?;
        Ok(Self {
            http,
            client_email: key.client_email.to_string(),
            key: encoding_key,
            token_uri,
            cached: Mutex::new(None),
        })
    }

    /// A bearer token that stays valid for at least another minute.
    pub async fn token(&self) -> Result<String, StorageError> {
        let mut cached = self.cached.lock().await;
        if let Some(current) = cached.as_ref() {
            if Instant::now() + REFRESH_MARGIN < current.expires_at {
                return Ok(current.token.clone());
            }
        }
        let fresh = self.fetch().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    fn assertion(&self) -> Result<String, StorageError> {
        let iat = Utc::now().timestamp();
        let claims = Claims {
            iss: &self.client_email,
            scope: READ_ONLY_SCOPE,
            aud: self.token_uri.as_str(),
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key).map_err(|e| {
            StorageError::Credentials {
                reason: format!("failed to sign token request: {e}"),
            }
        })
    }

    async fn fetch(&self) -> Result<CachedToken, StorageError> {
        let assertion = self.assertion()?;
        let requested_at = Instant::now();
        let req = self
            .http
            .post(self.token_uri.clone())
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())]);
        let resp = req.send().await.map_err(|e| transport(&self.token_uri, e))?;
        let resp = ensure_success(resp, &self.token_uri).await?;
        let body = resp.text().await.map_err(|e| transport(&self.token_uri, e))?;
        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| StorageError::Credentials {
                reason: format!("unexpected token response: {e}"),
            })?;
        let lifetime = Duration::from_secs(parsed.expires_in.unwrap_or(3600));
        tracing::info!(
            client_email = %self.client_email,
            expires_in_secs = lifetime.as_secs(),
            "Obtained service account access token"
        );
        Ok(CachedToken {
            token: parsed.access_token,
            expires_at: requested_at + lifetime,
        })
    }
}

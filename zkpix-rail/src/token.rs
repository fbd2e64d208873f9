//! OAuth2 client-credentials tokens and the shared credential cache.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info};

use crate::{config::RailConfig, error::RailError};

#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            value: value.into(),
            expires_at: Instant::now() + expires_in,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// True while more than `margin` of validity remains.
    pub fn is_fresh(&self, margin: Duration) -> bool {
        Instant::now() + margin < self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Something that can mint a new access token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<AccessToken, RailError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// Client-credentials grant against the rail's token endpoint.
pub struct OAuthTokenSource {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
}

impl OAuthTokenSource {
    pub fn new(http: reqwest::Client, config: &RailConfig) -> Self {
        Self {
            http,
            token_url: config.token_url(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: config.scope.clone(),
        }
    }
}

#[async_trait]
impl TokenSource for OAuthTokenSource {
    async fn fetch_token(&self) -> Result<AccessToken, RailError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];
        let response = self.http.post(&self.token_url).form(&form).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
            || status == reqwest::StatusCode::BAD_REQUEST
        {
            return Err(RailError::Auth(format!(
                "token endpoint rejected client credentials (HTTP {})",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(RailError::Status {
                status: status.as_u16(),
                operation: "authenticate",
            });
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| RailError::Decode(format!("token response: {}", e.without_url())))?;
        if body.access_token.is_empty() {
            return Err(RailError::Auth("token endpoint returned an empty token".into()));
        }
        Ok(AccessToken::new(
            body.access_token,
            Duration::from_secs(body.expires_in),
        ))
    }
}

/// Process-wide token cache shared by every in-flight request.
///
/// The slot is guarded by an async mutex held across the fetch, so callers
/// that find the token missing or near expiry wait on a single refresh.
pub struct CredentialCache<S> {
    source: S,
    slot: Mutex<Option<AccessToken>>,
    refresh_margin: Duration,
    auth_timeout: Duration,
    refreshes: AtomicU64,
}

impl<S: TokenSource> CredentialCache<S> {
    pub fn new(source: S, refresh_margin: Duration, auth_timeout: Duration) -> Self {
        Self {
            source,
            slot: Mutex::new(None),
            refresh_margin,
            auth_timeout,
            refreshes: AtomicU64::new(0),
        }
    }

    /// Current token, refreshing first if it is missing or about to expire.
    pub async fn get_token(&self) -> Result<AccessToken, RailError> {
        let mut slot = self.slot.lock().await;
        if let Some(token) = slot.as_ref().filter(|t| t.is_fresh(self.refresh_margin)) {
            return Ok(token.clone());
        }
        let token = self.fetch().await?;
        *slot = Some(token.clone());
        Ok(token)
    }

    /// Called after the rail rejected `stale`. Fetches a new token unless
    /// another caller already replaced it.
    pub async fn refresh_after_rejection(
        &self,
        stale: &AccessToken,
    ) -> Result<AccessToken, RailError> {
        let mut slot = self.slot.lock().await;
        if let Some(token) = slot
            .as_ref()
            .filter(|t| t.value != stale.value && t.is_fresh(self.refresh_margin))
        {
            return Ok(token.clone());
        }
        *slot = None;
        let token = self.fetch().await?;
        *slot = Some(token.clone());
        Ok(token)
    }

    /// Number of tokens fetched from the source so far.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    async fn fetch(&self) -> Result<AccessToken, RailError> {
        debug!("refreshing payment rail access token");
        let token = tokio::time::timeout(self.auth_timeout, self.source.fetch_token())
            .await
            .map_err(|_| {
                RailError::Auth(format!(
                    "token request timed out after {:?}",
                    self.auth_timeout
                ))
            })??;
        let count = self.refreshes.fetch_add(1, Ordering::Relaxed) + 1;
        info!(refreshes = count, "payment rail access token refreshed");
        Ok(token)
    }
}

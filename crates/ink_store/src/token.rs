//! Access-token lifecycle.
//!
//! One controller per remote origin. Tokens are cached in memory and
//! persisted in the encrypted key/value store under `auth_token/<origin>`,
//! so a restarted process picks up where it left off. Expiry is checked
//! with a safety margin: a token that expires within the margin is treated
//! as already expired, keeping in-flight requests from racing the clock.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::kv::{EncryptedKvStore, KvBackend};

const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenState {
    /// Remote origin the pair was issued for; persisted alongside the
    /// tokens and verified on load against the controller's origin.
    pub origin: String,
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

impl AccessTokenState {
    fn access_usable(&self, now: DateTime<Utc>) -> bool {
        self.access_expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) > now
    }

    fn refresh_usable(&self, now: DateTime<Utc>) -> bool {
        self.refresh_expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) > now
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Token endpoints of the remote. Implementations do the actual network
/// exchange; the controller only decides when to call them.
#[async_trait]
pub trait AuthApiClient: Send + Sync {
    async fn token_from_credentials(
        &self,
        origin: &str,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<AccessTokenState, StoreError>;

    async fn token_from_refresh(
        &self,
        origin: &str,
        refresh_token: &str,
        cancel: &CancellationToken,
    ) -> Result<AccessTokenState, StoreError>;
}

#[async_trait]
impl<T: AuthApiClient + ?Sized> AuthApiClient for std::sync::Arc<T> {
    async fn token_from_credentials(
        &self,
        origin: &str,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<AccessTokenState, StoreError> {
        (**self).token_from_credentials(origin, credentials, cancel).await
    }

    async fn token_from_refresh(
        &self,
        origin: &str,
        refresh_token: &str,
        cancel: &CancellationToken,
    ) -> Result<AccessTokenState, StoreError> {
        (**self).token_from_refresh(origin, refresh_token, cancel).await
    }
}

pub struct AccessTokenController<B, A> {
    origin: String,
    storage: EncryptedKvStore<B>,
    api: A,
    // Held across the refresh exchange so concurrent callers coalesce
    // into one network round trip.
    current: tokio::sync::Mutex<Option<AccessTokenState>>,
}

impl<B: KvBackend, A: AuthApiClient> AccessTokenController<B, A> {
    pub fn new(origin: impl Into<String>, storage: EncryptedKvStore<B>, api: A) -> Self {
        Self {
            origin: origin.into(),
            storage,
            api,
            current: tokio::sync::Mutex::new(None),
        }
    }

    fn storage_key(&self) -> String {
        format!("auth_token/{}", self.origin)
    }

    /// Exchange credentials for the first token pair and persist it. The
    /// pair itself stays inside the controller; callers obtain access
    /// tokens through [`AccessTokenController::get_token`].
    pub async fn get_initial_token(
        &self,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let state = self
            .api
            .token_from_credentials(&self.origin, credentials, cancel)
            .await?;

        let mut current = self.current.lock().await;
        self.storage.set(&self.storage_key(), &state, cancel).await?;
        *current = Some(state);
        Ok(())
    }

    /// Return a usable access token, refreshing it first if needed.
    ///
    /// Fails with `Unauthorized` when neither the access token nor the
    /// refresh token is still usable; the caller must re-authenticate via
    /// [`AccessTokenController::get_initial_token`].
    pub async fn get_token(&self, cancel: &CancellationToken) -> Result<String, StoreError> {
        let mut current = self.current.lock().await;

        if current.is_none() {
            let loaded: Option<AccessTokenState> =
                self.storage.get(&self.storage_key(), cancel).await?;
            if let Some(state) = &loaded {
                if state.origin != self.origin {
                    return Err(StoreError::Validation(format!(
                        "stored token state belongs to origin {}, expected {}",
                        state.origin, self.origin
                    )));
                }
            }
            *current = loaded;
        }

        let now = Utc::now();
        let state = current.as_ref().ok_or_else(unauthorized)?;

        if state.access_usable(now) {
            return Ok(state.access_token.clone());
        }
        if !state.refresh_usable(now) {
            return Err(unauthorized());
        }

        tracing::debug!(origin = %self.origin, "refreshing access token");
        let refreshed = self
            .api
            .token_from_refresh(&self.origin, &state.refresh_token, cancel)
            .await?;
        self.storage
            .set(&self.storage_key(), &refreshed, cancel)
            .await?;
        let token = refreshed.access_token.clone();
        *current = Some(refreshed);
        Ok(token)
    }

    /// Drop the cached and persisted tokens (sign-out).
    pub async fn reset(&self, cancel: &CancellationToken) -> Result<(), StoreError> {
        let mut current = self.current.lock().await;
        self.storage.remove(&self.storage_key(), cancel).await?;
        *current = None;
        Ok(())
    }
}

fn unauthorized() -> StoreError {
    StoreError::Unauthorized("no valid access token or refresh token".to_string())
}

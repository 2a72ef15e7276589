//! Token lifecycle management.
//!
//! The [`TokenManager`] owns the current access token and hands out valid
//! ones to the engine. Refresh is proactive (inside the grace window before
//! expiry) and reactive (after the backend rejects a token), with a bounded
//! retry count so a revoked credential surfaces as `Failed(Auth)` instead of
//! a retry loop.

use crate::adapter::BackendAdapter;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A bearer token with optional refresh material.
#[derive(Debug, Clone)]
pub struct AuthToken {
    /// The access token presented on every adapter call.
    pub access_token: String,
    /// Refresh token, when the backend grants one.
    pub refresh_token: Option<String>,
    /// Absolute expiry. `None` means the token does not expire.
    pub expires_at: Option<SystemTime>,
}

impl AuthToken {
    /// Creates a non-expiring token without refresh material.
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    /// True if the token expires within `grace` from now.
    pub fn expires_within(&self, grace: Duration) -> bool {
        match self.expires_at {
            Some(expiry) => match expiry.duration_since(SystemTime::now()) {
                Ok(remaining) => remaining <= grace,
                // Already past expiry.
                Err(_) => true,
            },
            None => false,
        }
    }
}

/// Owns the current token for one backend and refreshes it as needed.
pub struct TokenManager<A: BackendAdapter> {
    adapter: Arc<A>,
    token: RwLock<Option<AuthToken>>,
    grace: Duration,
    max_refresh_attempts: u32,
}

impl<A: BackendAdapter> TokenManager<A> {
    /// Creates a manager with no token; the first [`Self::valid_token`] call
    /// authenticates.
    pub fn new(adapter: Arc<A>, config: &SyncConfig) -> Self {
        Self {
            adapter,
            token: RwLock::new(None),
            grace: config.token_grace,
            max_refresh_attempts: config.max_refresh_attempts,
        }
    }

    /// Seeds the manager with a token obtained out of band (e.g. restored
    /// from the host's keychain).
    pub async fn install(&self, token: AuthToken) {
        *self.token.write().await = Some(token);
    }

    /// Returns an access token guaranteed valid for at least the grace
    /// window, refreshing or re-authenticating first when necessary.
    pub async fn valid_token(&self) -> SyncResult<String> {
        {
            let guard = self.token.read().await;
            if let Some(token) = guard.as_ref() {
                if !token.expires_within(self.grace) {
                    return Ok(token.access_token.clone());
                }
            }
        }
        self.renew(false).await
    }

    /// Called after the backend rejected the current token. Forces a
    /// renewal even if the token looks unexpired.
    pub async fn on_unauthorized(&self) -> SyncResult<String> {
        debug!(backend = self.adapter.backend_name(), "token rejected, renewing");
        self.renew(true).await
    }

    async fn renew(&self, force: bool) -> SyncResult<String> {
        let mut guard = self.token.write().await;

        // Another caller may have renewed while we waited for the lock.
        if !force {
            if let Some(token) = guard.as_ref() {
                if !token.expires_within(self.grace) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let refresh_token = guard.as_ref().and_then(|t| t.refresh_token.clone());
        let mut last_err = None;
        for attempt in 0..self.max_refresh_attempts {
            let result = match refresh_token.as_deref() {
                Some(refresh) => self.adapter.refresh(refresh).await,
                None => self.adapter.authenticate().await,
            };
            match result {
                Ok(mut fresh) => {
                    // Backends that rotate refresh tokens return a new one;
                    // otherwise keep the one we have.
                    if fresh.refresh_token.is_none() {
                        fresh.refresh_token = refresh_token.clone();
                    }
                    info!(
                        backend = self.adapter.backend_name(),
                        "obtained fresh access token"
                    );
                    let access = fresh.access_token.clone();
                    *guard = Some(fresh);
                    return Ok(access);
                }
                Err(err) if err.is_retryable() => {
                    warn!(
                        backend = self.adapter.backend_name(),
                        attempt,
                        error = %err,
                        "token renewal failed, retrying"
                    );
                    last_err = Some(err);
                }
                Err(err) => {
                    // A definitive rejection: the credential itself is bad.
                    *guard = None;
                    return Err(match err {
                        SyncError::Auth(msg) => SyncError::Auth(msg),
                        other => SyncError::Auth(other.to_string()),
                    });
                }
            }
        }

        *guard = None;
        Err(SyncError::Auth(match last_err {
            Some(err) => format!("token renewal exhausted retries: {err}"),
            None => "token renewal exhausted retries".to_string(),
        }))
    }
}

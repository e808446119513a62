//! Credential Store
//!
//! Holds the host's registration token, hands it to agents, and rotates
//! it ahead of expiry. Rotated tokens are written to an encrypted cache so
//! a daemon restart can skip registration from scratch.

pub mod cache;
pub mod cipher;

pub use cache::TokenCache;
pub use cipher::EncryptionKey;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use corral_core::domain::token::RegistrationToken;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::sleep_or_cancel;
use crate::error::{Result, RunnerError};

/// Issues a fresh token in exchange for the current one
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn refresh(&self, current: &str) -> Result<RegistrationToken>;
}

#[derive(Debug, Clone)]
pub struct CredentialConfig {
    /// Refresh once less than this fraction of the token's lifetime remains
    pub refresh_fraction: f64,

    /// How often the refresh loop checks the token
    pub check_interval: Duration,

    /// Consecutive failed refreshes before the store marks itself invalid
    pub max_refresh_attempts: u32,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            refresh_fraction: 0.1,
            check_interval: Duration::from_secs(30),
            max_refresh_attempts: 5,
        }
    }
}

#[derive(Default)]
struct StoreState {
    token: Option<RegistrationToken>,
    invalid: bool,
    failed_refreshes: u32,
}

/// Shared, read-mostly token holder
pub struct CredentialStore {
    config: CredentialConfig,
    state: RwLock<StoreState>,
    cache: Option<TokenCache>,
    valid_tx: watch::Sender<bool>,
}

impl CredentialStore {
    pub fn new(config: CredentialConfig, cache: Option<TokenCache>) -> Self {
        let (valid_tx, _) = watch::channel(false);
        Self {
            config,
            state: RwLock::new(StoreState::default()),
            cache,
            valid_tx,
        }
    }

    /// Builds a store, preferring an unexpired cached token over `bootstrap`
    pub fn open(
        config: CredentialConfig,
        cache: Option<TokenCache>,
        bootstrap: Option<RegistrationToken>,
    ) -> Result<Self> {
        let cached = match cache.as_ref().map(TokenCache::load).transpose() {
            Ok(token) => token.flatten(),
            Err(e) => {
                warn!("Ignoring unreadable token cache: {}", e);
                None
            }
        };

        let now = Utc::now();
        let token = cached
            .filter(|t| !t.is_expired_at(now))
            .inspect(|_| info!("Loaded registration token from cache"))
            .or(bootstrap);

        let store = Self::new(config, cache);
        if let Some(token) = token {
            store.rotate(token)?;
        }
        Ok(store)
    }

    /// Current token value, or `Auth` if there is no usable token
    pub fn get_token(&self) -> Result<String> {
        self.get_token_at(Utc::now())
    }

    pub fn get_token_at(&self, now: DateTime<Utc>) -> Result<String> {
        let state = self.read_state();

        if state.invalid {
            return Err(RunnerError::Auth(
                "credential store is invalid after repeated refresh failures".to_string(),
            ));
        }

        match &state.token {
            Some(token) if !token.is_expired_at(now) => Ok(token.value.clone()),
            Some(_) => Err(RunnerError::Auth("registration token expired".to_string())),
            None => Err(RunnerError::Auth("no registration token".to_string())),
        }
    }

    /// Installs `token` and persists it to the cache
    pub fn rotate(&self, token: RegistrationToken) -> Result<()> {
        if let Some(cache) = &self.cache {
            cache.store(&token)?;
        }

        {
            let mut state = self.write_state();
            debug!("Token rotated, expires at {}", token.expires_at);
            state.token = Some(token);
            state.invalid = false;
            state.failed_refreshes = 0;
        }

        // Always notifies: an expired token leaves the flag set, and agents
        // waiting on it must still see the replacement
        self.valid_tx.send_replace(true);
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        *self.valid_tx.borrow()
    }

    /// Validity updates, for agents that must go offline when the store fails
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.valid_tx.subscribe()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.read_state().token.as_ref().map(|t| t.expires_at)
    }

    /// Whether the token is inside its refresh margin at `now`
    pub fn refresh_due_at(&self, now: DateTime<Utc>) -> bool {
        let state = self.read_state();
        match &state.token {
            Some(token) => {
                let margin_ms =
                    token.lifetime().num_milliseconds() as f64 * self.config.refresh_fraction;
                token.remaining_at(now).num_milliseconds() as f64 <= margin_ms
            }
            None => false,
        }
    }

    pub fn mark_invalid(&self, reason: &str) {
        self.write_state().invalid = true;
        if self.valid_tx.send_if_modified(|valid| std::mem::replace(valid, false)) {
            error!("Credential store invalid: {}", reason);
        }
    }

    /// One refresh attempt, if the token is due; failures count toward
    /// invalidation
    pub async fn refresh_if_due(&self, source: &dyn TokenSource) -> Result<bool> {
        if !self.refresh_due_at(Utc::now()) {
            return Ok(false);
        }

        // The current value is read even when expired; the source decides.
        let current = match self.read_state().token.as_ref() {
            Some(token) => token.value.clone(),
            None => return Ok(false),
        };

        match source.refresh(&current).await {
            Ok(token) => {
                self.rotate(token)?;
                info!("Registration token refreshed");
                Ok(true)
            }
            Err(e) => {
                let failures = {
                    let mut state = self.write_state();
                    state.failed_refreshes += 1;
                    state.failed_refreshes
                };
                warn!(
                    "Token refresh failed ({}/{}): {}",
                    failures, self.config.max_refresh_attempts, e
                );
                if failures >= self.config.max_refresh_attempts {
                    self.mark_invalid(&format!("{} consecutive refresh failures", failures));
                }
                Err(e)
            }
        }
    }

    /// Checks the token every `check_interval` until `shutdown` fires
    pub async fn run_refresh_loop(
        self: Arc<Self>,
        source: Arc<dyn TokenSource>,
        shutdown: CancellationToken,
    ) {
        info!("Token refresh loop started");

        loop {
            let _ = self.refresh_if_due(source.as_ref()).await;

            if !sleep_or_cancel(self.config.check_interval, &shutdown).await {
                break;
            }
        }

        info!("Token refresh loop stopped");
    }

    // Critical sections never panic, so a poisoned lock still holds
    // consistent data.
    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}
